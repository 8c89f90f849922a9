// Authenticated request gateway
// Bearer auth on every call, transparent token refresh on 401

use std::sync::Arc;

use reqwest::{multipart, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::auth::{
    HttpSessionAuthority, RefreshCoordinator, SessionAuthority, SqliteTokenStore, TokenStore,
};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::http_client::{ApiResponse, OriginalRequest, RequestExecutor};
use crate::models::ListEnvelope;

/// Entry point for every call to the storefront API.
///
/// Callers never see a 401 that a token refresh could fix: the gateway refreshes
/// the access token once for all concurrent callers and replays their requests.
pub struct ApiGateway {
    executor: Arc<RequestExecutor>,
    coordinator: RefreshCoordinator,

    /// Token recoveries allowed per call before a 401 is returned to the caller
    max_auth_retries: u32,
}

impl ApiGateway {
    /// Build a gateway persisting tokens in the configured SQLite database
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let store: Arc<dyn TokenStore> =
            Arc::new(SqliteTokenStore::open_or_detached(&config.token_db));
        Self::with_store(config, store)
    }

    /// Build a gateway over an existing token store
    pub fn with_store(config: &GatewayConfig, store: Arc<dyn TokenStore>) -> Result<Self> {
        let executor = Arc::new(RequestExecutor::new(
            &config.base_url,
            &config.api_prefix,
            store,
            config.connect_timeout,
            config.request_timeout,
        )?);
        let authority = Arc::new(HttpSessionAuthority::new(executor.clone()));
        Ok(Self::with_authority(config, executor, authority))
    }

    /// Build a gateway with a custom session authority
    pub fn with_authority(
        config: &GatewayConfig,
        executor: Arc<RequestExecutor>,
        authority: Arc<dyn SessionAuthority>,
    ) -> Self {
        let coordinator = RefreshCoordinator::new(
            executor.token_store().clone(),
            authority,
            config.refresh_timeout,
        );

        Self {
            executor,
            coordinator,
            max_auth_retries: config.max_auth_retries,
        }
    }

    pub fn token_store(&self) -> &Arc<dyn TokenStore> {
        self.executor.token_store()
    }

    /// Executor without 401 recovery, for calls that must not trigger a refresh
    pub fn executor(&self) -> &Arc<RequestExecutor> {
        &self.executor
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn is_authenticated(&self) -> bool {
        self.token_store().is_authenticated()
    }

    /// Execute a request, recovering from 401 by refreshing the access token
    pub async fn request(&self, request: OriginalRequest) -> Result<ApiResponse> {
        let request_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let mut token = self.token_store().get_access_token();
        let mut recoveries = 0;

        loop {
            let result = self
                .executor
                .execute_with_token(&request, token.as_deref())
                .await;

            match result {
                Err(err) if err.is_unauthorized() => {
                    if recoveries >= self.max_auth_retries {
                        tracing::warn!(
                            request_id = %request_id,
                            endpoint = %request.endpoint,
                            recoveries,
                            "Still unauthorized after token recovery, giving up"
                        );
                        return Err(err);
                    }

                    tracing::debug!(
                        request_id = %request_id,
                        endpoint = %request.endpoint,
                        "Received 401, recovering access token"
                    );
                    recoveries += 1;
                    token = Some(self.coordinator.recover(token.as_deref()).await?);
                }
                Err(err) => {
                    tracing::error!(
                        request_id = %request_id,
                        endpoint = %request.endpoint,
                        "API request failed: {}",
                        err
                    );
                    return Err(err);
                }
                Ok(response) => return Ok(response),
            }
        }
    }

    pub async fn get(&self, endpoint: &str) -> Result<ApiResponse> {
        self.request(OriginalRequest::get(endpoint)).await
    }

    pub async fn post<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<ApiResponse> {
        let body = serde_json::to_value(body)?;
        self.request(OriginalRequest::new(Method::POST, endpoint).with_body(body))
            .await
    }

    pub async fn patch<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<ApiResponse> {
        let body = serde_json::to_value(body)?;
        self.request(OriginalRequest::new(Method::PATCH, endpoint).with_body(body))
            .await
    }

    pub async fn delete(&self, endpoint: &str) -> Result<ApiResponse> {
        self.request(OriginalRequest::delete(endpoint)).await
    }

    /// GET a list endpoint, whatever envelope it answers with
    pub async fn get_list<T: DeserializeOwned>(&self, endpoint: &str) -> Result<Vec<T>> {
        let envelope: ListEnvelope<T> = self.get(endpoint).await?.json()?;
        Ok(envelope.into_items())
    }

    /// Upload a multipart form.
    ///
    /// Uploads do not recover from 401: the stored tokens are cleared and the
    /// call fails immediately.
    pub async fn upload(&self, endpoint: &str, form: multipart::Form) -> Result<Value> {
        let response = self.executor.send_multipart(endpoint, form).await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(endpoint = %endpoint, "Upload unauthorized, clearing credentials");
            self.token_store().clear();
            return Err(GatewayError::UploadUnauthorized);
        }

        if !status.is_success() {
            tracing::error!(endpoint = %endpoint, status = status.as_u16(), "Upload failed");
            return Err(GatewayError::Http {
                status: status.as_u16(),
                body: None,
            });
        }

        response.json::<Value>().await.map_err(GatewayError::Decode)
    }
}
