// Session authority
// Performs the refresh network call and local logout on behalf of the gateway

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;

use super::store::TokenStore;
use super::types::{RefreshRequest, TokenPair};
use crate::error::AuthError;
use crate::http_client::{OriginalRequest, RequestExecutor};

/// Session refresh endpoint
pub const REFRESH_ENDPOINT: &str = "/auth-sessions/refresh";

/// Collaborator that owns session-level credentials
#[async_trait]
pub trait SessionAuthority: Send + Sync {
    /// Exchange a refresh token for a new token pair
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, AuthError>;

    /// Drop local credentials
    fn logout(&self);
}

/// Session authority backed by the storefront auth endpoints.
///
/// The refresh call goes straight to the executor, so a 401 from the refresh
/// endpoint is a refresh failure and never re-enters token recovery.
pub struct HttpSessionAuthority {
    executor: Arc<RequestExecutor>,
}

impl HttpSessionAuthority {
    pub fn new(executor: Arc<RequestExecutor>) -> Self {
        Self { executor }
    }

    fn store(&self) -> &Arc<dyn TokenStore> {
        self.executor.token_store()
    }
}

#[async_trait]
impl SessionAuthority for HttpSessionAuthority {
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        tracing::info!("Refreshing access token...");

        let body = serde_json::to_value(RefreshRequest { refresh_token })
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;
        let request = OriginalRequest::new(Method::POST, REFRESH_ENDPOINT).with_body(body);

        let pair: TokenPair = self
            .executor
            .execute(&request)
            .await
            .and_then(|response| response.json())
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

        if pair.access_token.is_empty() {
            return Err(AuthError::RefreshFailed(
                "refresh response does not contain accessToken".to_string(),
            ));
        }

        tracing::info!("Access token refreshed");
        Ok(pair)
    }

    fn logout(&self) {
        tracing::info!("Clearing stored credentials");
        self.store().clear();
    }
}
