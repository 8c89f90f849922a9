use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{multipart, Client, Method, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::TokenStore;
use crate::error::{GatewayError, Result};

/// A request as issued by the caller, kept so it can be replayed after a token swap
#[derive(Debug, Clone, PartialEq)]
pub struct OriginalRequest {
    pub endpoint: String,
    pub method: Method,
    /// Caller headers; `Authorization` is always overwritten when a token is present
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl OriginalRequest {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(Method::DELETE, endpoint)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Parsed result of a successful call
#[derive(Debug)]
pub enum ApiResponse {
    /// Body of a JSON response
    Json(Value),
    /// Any other content type, handed back untouched
    Raw(Response),
}

impl ApiResponse {
    /// JSON body, failing for non-JSON responses
    pub fn into_json(self) -> Result<Value> {
        match self {
            ApiResponse::Json(value) => Ok(value),
            ApiResponse::Raw(response) => Err(GatewayError::UnexpectedContent(content_type(
                &response,
            ))),
        }
    }

    /// Deserialize a JSON body into `T`
    pub fn json<T: DeserializeOwned>(self) -> Result<T> {
        Ok(serde_json::from_value(self.into_json()?)?)
    }
}

fn content_type(response: &Response) -> String {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("none")
        .to_string()
}

/// Issues single HTTP calls against the storefront API with bearer auth
pub struct RequestExecutor {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Scheme, host and API prefix prepended to every endpoint
    base_url: String,

    store: Arc<dyn TokenStore>,
}

impl RequestExecutor {
    /// Create a new executor
    pub fn new(
        base_url: &str,
        api_prefix: &str,
        store: Arc<dyn TokenStore>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| GatewayError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: format!("{}{}", base_url.trim_end_matches('/'), api_prefix),
            store,
        })
    }

    pub fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    pub fn token_store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Execute with whatever access token is currently stored
    pub async fn execute(&self, request: &OriginalRequest) -> Result<ApiResponse> {
        let token = self.store.get_access_token();
        self.execute_with_token(request, token.as_deref()).await
    }

    /// Execute with an explicit access token
    pub async fn execute_with_token(
        &self,
        request: &OriginalRequest,
        token: Option<&str>,
    ) -> Result<ApiResponse> {
        let url = self.url(&request.endpoint);
        let headers = build_headers(&request.headers, token)?;

        tracing::debug!(
            method = %request.method,
            url = %url,
            authorized = token.is_some(),
            "Sending HTTP request"
        );

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(headers);
        if let Some(ref body) = request.body {
            builder = builder.body(serde_json::to_vec(body)?);
        }

        let response = builder.send().await.map_err(|e| {
            tracing::warn!(
                error_kind = error_kind(&e),
                error = %e,
                url = %url,
                "HTTP request error"
            );
            GatewayError::Network(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.ok().filter(|text| !text.is_empty());
            tracing::warn!(
                status = status.as_u16(),
                url = %url,
                response_body = body.as_deref().unwrap_or(""),
                "Received error response"
            );
            return Err(GatewayError::Http {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(status = %status, "Request successful");

        if content_type(&response).contains("application/json") {
            let value = response.json::<Value>().await.map_err(GatewayError::Decode)?;
            Ok(ApiResponse::Json(value))
        } else {
            Ok(ApiResponse::Raw(response))
        }
    }

    /// POST a multipart form with bearer auth and no JSON content type
    pub async fn send_multipart(&self, endpoint: &str, form: multipart::Form) -> Result<Response> {
        let url = self.url(endpoint);
        let mut builder = self.client.post(&url).multipart(form);
        if let Some(token) = self.store.get_access_token() {
            builder = builder.bearer_auth(token);
        }

        tracing::debug!(url = %url, "Sending multipart upload");

        builder.send().await.map_err(|e| {
            tracing::warn!(
                error_kind = error_kind(&e),
                error = %e,
                url = %url,
                "Upload request error"
            );
            GatewayError::Network(e)
        })
    }
}

/// Default JSON content type, then caller headers, then bearer auth
fn build_headers(extra: &[(String, String)], token: Option<&str>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    for (name, value) in extra {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| GatewayError::InvalidHeader(name.clone()))?;
        let value =
            HeaderValue::from_str(value).map_err(|_| GatewayError::InvalidHeader(name.to_string()))?;
        headers.insert(name, value);
    }

    if let Some(token) = token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| GatewayError::InvalidHeader(AUTHORIZATION.to_string()))?;
        headers.insert(AUTHORIZATION, value);
    }

    Ok(headers)
}

/// Categorize a transport error for logging
fn error_kind(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connection_failed"
    } else if e.is_request() {
        "request_error"
    } else if e.is_body() {
        "body_error"
    } else if e.is_decode() {
        "decode_error"
    } else {
        "unknown"
    }
}
