// Token refresh coordination
//
// At most one refresh is in flight. Requests that hit 401 while it runs wait
// in arrival order and receive the same outcome.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;

use super::session::SessionAuthority;
use super::store::TokenStore;
use crate::error::AuthError;

type RefreshOutcome = Result<String, AuthError>;

/// A request suspended behind an in-flight refresh
struct PendingRequest {
    ticket: u64,
    tx: oneshot::Sender<RefreshOutcome>,
}

#[derive(Default)]
struct RefreshState {
    is_refreshing: bool,
    waiters: VecDeque<PendingRequest>,
}

enum Role {
    Refresher,
    Waiter(u64, oneshot::Receiver<RefreshOutcome>),
    /// A refresh completed after the failed request was sent
    AlreadyRefreshed(String),
}

/// Single-flight access token refresh with a FIFO waiter queue
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    store: Arc<dyn TokenStore>,
    authority: Arc<dyn SessionAuthority>,
    refresh_timeout: Duration,
    next_ticket: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<dyn TokenStore>,
        authority: Arc<dyn SessionAuthority>,
        refresh_timeout: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(RefreshState::default()),
            store,
            authority,
            refresh_timeout,
            next_ticket: AtomicU64::new(0),
        }
    }

    /// True while a refresh call is in flight
    pub fn is_refreshing(&self) -> bool {
        self.lock_state().is_refreshing
    }

    /// Number of requests queued behind the in-flight refresh
    pub fn waiting(&self) -> usize {
        self.lock_state().waiters.len()
    }

    /// Obtain a usable access token after a request failed with 401.
    ///
    /// `stale_token` is the token the failed request was sent with. The first
    /// caller while idle performs the refresh; callers arriving during it
    /// wait for its outcome.
    pub async fn recover(&self, stale_token: Option<&str>) -> Result<String, AuthError> {
        match self.claim(stale_token) {
            Role::AlreadyRefreshed(token) => {
                tracing::debug!("Access token already refreshed, reusing it");
                Ok(token)
            }
            Role::Waiter(ticket, rx) => {
                let outcome = rx.await.unwrap_or(Err(AuthError::RefreshAbandoned));
                tracing::debug!(ticket, ok = outcome.is_ok(), "Released from refresh queue");
                outcome
            }
            Role::Refresher => {
                let mut guard = SettleGuard {
                    coordinator: self,
                    settled: false,
                };
                let outcome = self.refresh().await;
                guard.settle(&outcome);
                outcome
            }
        }
    }

    fn claim(&self, stale_token: Option<&str>) -> Role {
        let mut state = self.lock_state();

        if state.is_refreshing {
            let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(PendingRequest { ticket, tx });
            tracing::debug!(
                ticket,
                queued = state.waiters.len(),
                "Refresh in flight, queuing request"
            );
            return Role::Waiter(ticket, rx);
        }

        if let Some(current) = self.store.get_access_token() {
            if stale_token != Some(current.as_str()) {
                return Role::AlreadyRefreshed(current);
            }
        }

        state.is_refreshing = true;
        Role::Refresher
    }

    async fn refresh(&self) -> RefreshOutcome {
        let refresh_token = self
            .store
            .get_refresh_token()
            .ok_or(AuthError::NoRefreshToken)?;

        let pair = tokio::time::timeout(
            self.refresh_timeout,
            self.authority.refresh_token(&refresh_token),
        )
        .await
        .map_err(|_| AuthError::RefreshTimeout(self.refresh_timeout))??;

        self.store.set_tokens(&pair);
        Ok(pair.access_token)
    }

    /// Release every waiter with `outcome` and return to idle.
    ///
    /// Returns the released tickets in release order.
    fn settle(&self, outcome: &RefreshOutcome, logout_on_failure: bool) -> Vec<u64> {
        let mut state = self.lock_state();

        if let Err(e) = outcome {
            tracing::error!("Token refresh failed: {}", e);
            if logout_on_failure {
                self.authority.logout();
            }
        } else {
            tracing::info!(waiters = state.waiters.len(), "Token refresh succeeded");
        }

        let released = release(std::mem::take(&mut state.waiters), outcome);
        state.is_refreshing = false;
        released
    }

    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Hand `outcome` to each waiter in queue order
fn release(waiters: VecDeque<PendingRequest>, outcome: &RefreshOutcome) -> Vec<u64> {
    let mut released = Vec::with_capacity(waiters.len());
    for waiter in waiters {
        // A dropped receiver means that caller went away; nothing to resume
        let _ = waiter.tx.send(outcome.clone());
        released.push(waiter.ticket);
    }
    if !released.is_empty() {
        tracing::debug!(tickets = ?released, "Released refresh waiters");
    }
    released
}

/// Returns the coordinator to idle even if the refreshing future is dropped
struct SettleGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl SettleGuard<'_> {
    fn settle(&mut self, outcome: &RefreshOutcome) {
        self.settled = true;
        self.coordinator.settle(outcome, true);
    }
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!("Refreshing request dropped, releasing waiters");
            self.coordinator
                .settle(&Err(AuthError::RefreshAbandoned), false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::types::TokenPair;
    use crate::auth::MemoryTokenStore;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Authority whose refresh blocks until the test opens the gate
    struct GatedAuthority {
        store: Arc<dyn TokenStore>,
        gate: Notify,
        outcome: Result<TokenPair, AuthError>,
        refresh_calls: AtomicUsize,
        logout_calls: AtomicUsize,
    }

    impl GatedAuthority {
        fn new(store: Arc<dyn TokenStore>, outcome: Result<TokenPair, AuthError>) -> Self {
            Self {
                store,
                gate: Notify::new(),
                outcome,
                refresh_calls: AtomicUsize::new(0),
                logout_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SessionAuthority for GatedAuthority {
        async fn refresh_token(&self, _refresh_token: &str) -> Result<TokenPair, AuthError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            self.outcome.clone()
        }

        fn logout(&self) {
            self.logout_calls.fetch_add(1, Ordering::SeqCst);
            self.store.clear();
        }
    }

    fn pair(access: &str, refresh: &str) -> TokenPair {
        TokenPair {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
        }
    }

    fn setup(
        access: Option<&str>,
        refresh: Option<&str>,
        outcome: Result<TokenPair, AuthError>,
        timeout: Duration,
    ) -> (Arc<RefreshCoordinator>, Arc<GatedAuthority>, Arc<dyn TokenStore>) {
        let store: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::with_tokens(access, refresh));
        let authority = Arc::new(GatedAuthority::new(store.clone(), outcome));
        let coordinator = Arc::new(RefreshCoordinator::new(
            store.clone(),
            authority.clone(),
            timeout,
        ));
        (coordinator, authority, store)
    }

    async fn wait_for_waiters(coordinator: &RefreshCoordinator, n: usize) {
        while coordinator.waiting() < n {
            tokio::task::yield_now().await;
        }
    }

    async fn wait_for_refresh_start(authority: &GatedAuthority) {
        while authority.refresh_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_single_refresh_shared_by_waiters() {
        let (coordinator, authority, store) = setup(
            Some("A1"),
            Some("R1"),
            Ok(pair("A2", "R2")),
            Duration::from_secs(5),
        );

        let refresher = {
            let c = coordinator.clone();
            tokio::spawn(async move { c.recover(Some("A1")).await })
        };
        wait_for_refresh_start(&authority).await;
        assert!(coordinator.is_refreshing());

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let c = coordinator.clone();
                tokio::spawn(async move { c.recover(Some("A1")).await })
            })
            .collect();
        wait_for_waiters(&coordinator, 3).await;

        authority.gate.notify_one();

        assert_eq!(refresher.await.unwrap(), Ok("A2".to_string()));
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), Ok("A2".to_string()));
        }

        assert_eq!(authority.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(authority.logout_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.get_access_token().as_deref(), Some("A2"));
        assert_eq!(store.get_refresh_token().as_deref(), Some("R2"));
        assert!(!coordinator.is_refreshing());
        assert_eq!(coordinator.waiting(), 0);
    }

    #[tokio::test]
    async fn test_failed_refresh_rejects_everyone_and_logs_out() {
        let failure = AuthError::RefreshFailed("HTTP error! status: 401".to_string());
        let (coordinator, authority, store) = setup(
            Some("A1"),
            Some("R1"),
            Err(failure.clone()),
            Duration::from_secs(5),
        );

        let refresher = {
            let c = coordinator.clone();
            tokio::spawn(async move { c.recover(Some("A1")).await })
        };
        wait_for_refresh_start(&authority).await;

        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let c = coordinator.clone();
                tokio::spawn(async move { c.recover(Some("A1")).await })
            })
            .collect();
        wait_for_waiters(&coordinator, 2).await;

        authority.gate.notify_one();

        assert_eq!(refresher.await.unwrap(), Err(failure.clone()));
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), Err(failure.clone()));
        }

        assert_eq!(authority.logout_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get_access_token(), None);
        assert_eq!(store.get_refresh_token(), None);
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_missing_refresh_token_short_circuits() {
        let (coordinator, authority, store) = setup(
            Some("A1"),
            None,
            Ok(pair("A2", "R2")),
            Duration::from_secs(5),
        );

        let result = coordinator.recover(Some("A1")).await;

        assert_eq!(result, Err(AuthError::NoRefreshToken));
        assert_eq!(authority.refresh_calls.load(Ordering::SeqCst), 0);
        assert_eq!(authority.logout_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get_access_token(), None);
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_refresh_timeout_releases_waiters() {
        let (coordinator, authority, store) = setup(
            Some("A1"),
            Some("R1"),
            Ok(pair("A2", "R2")),
            Duration::from_millis(50),
        );

        let refresher = {
            let c = coordinator.clone();
            tokio::spawn(async move { c.recover(Some("A1")).await })
        };
        wait_for_refresh_start(&authority).await;

        let waiter = {
            let c = coordinator.clone();
            tokio::spawn(async move { c.recover(Some("A1")).await })
        };
        wait_for_waiters(&coordinator, 1).await;

        // The gate never opens
        let expected = Err(AuthError::RefreshTimeout(Duration::from_millis(50)));
        assert_eq!(refresher.await.unwrap(), expected);
        assert_eq!(waiter.await.unwrap(), expected);
        assert_eq!(store.get_refresh_token(), None);
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_stale_token_reuses_refreshed_token() {
        let (coordinator, authority, _store) = setup(
            Some("A2"),
            Some("R2"),
            Ok(pair("A3", "R3")),
            Duration::from_secs(5),
        );

        let result = coordinator.recover(Some("A1")).await;

        assert_eq!(result, Ok("A2".to_string()));
        assert_eq!(authority.refresh_calls.load(Ordering::SeqCst), 0);
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_dropped_refresher_abandons_waiters() {
        let (coordinator, authority, store) = setup(
            Some("A1"),
            Some("R1"),
            Ok(pair("A2", "R2")),
            Duration::from_secs(5),
        );

        let refresher = {
            let c = coordinator.clone();
            tokio::spawn(async move { c.recover(Some("A1")).await })
        };
        wait_for_refresh_start(&authority).await;

        let waiter = {
            let c = coordinator.clone();
            tokio::spawn(async move { c.recover(Some("A1")).await })
        };
        wait_for_waiters(&coordinator, 1).await;

        refresher.abort();
        assert!(refresher.await.unwrap_err().is_cancelled());

        assert_eq!(waiter.await.unwrap(), Err(AuthError::RefreshAbandoned));
        assert!(!coordinator.is_refreshing());
        assert_eq!(authority.logout_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.get_refresh_token().as_deref(), Some("R1"));
    }

    #[test]
    fn test_settle_releases_in_arrival_order() {
        let (coordinator, _authority, _store) = setup(
            Some("A1"),
            Some("R1"),
            Ok(pair("A2", "R2")),
            Duration::from_secs(5),
        );

        assert!(matches!(coordinator.claim(Some("A1")), Role::Refresher));
        let receivers: Vec<_> = (0..4)
            .map(|_| match coordinator.claim(Some("A1")) {
                Role::Waiter(ticket, rx) => (ticket, rx),
                _ => panic!("expected to queue behind the refresh"),
            })
            .collect();

        let released = coordinator.settle(&Ok("A2".to_string()), true);
        let tickets: Vec<u64> = receivers.iter().map(|(ticket, _)| *ticket).collect();
        assert_eq!(released, tickets);

        for (_, mut rx) in receivers {
            assert_eq!(rx.try_recv().unwrap(), Ok("A2".to_string()));
        }
    }

    proptest! {
        #[test]
        fn prop_release_order_matches_enqueue_order(n in 0usize..64, fail in any::<bool>()) {
            let mut waiters = VecDeque::new();
            let mut receivers = Vec::new();
            for ticket in 0..n as u64 {
                let (tx, rx) = oneshot::channel();
                waiters.push_back(PendingRequest { ticket, tx });
                receivers.push(rx);
            }

            let outcome = if fail {
                Err(AuthError::NoRefreshToken)
            } else {
                Ok("A2".to_string())
            };
            let released = release(waiters, &outcome);

            prop_assert_eq!(released, (0..n as u64).collect::<Vec<_>>());
            for mut rx in receivers {
                prop_assert_eq!(rx.try_recv().unwrap(), outcome.clone());
            }
        }
    }
}
