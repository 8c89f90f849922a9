// Error handling module
// Defines the gateway and refresh error types

use std::time::Duration;

use thiserror::Error;

/// Errors produced while refreshing the access token.
///
/// Every request queued behind a refresh receives a copy of the same outcome,
/// so this type is `Clone`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Refresh attempted with no refresh token stored
    #[error("No refresh token available")]
    NoRefreshToken,

    /// The refresh endpoint rejected the refresh token or could not be reached
    #[error("Refresh token failed: {0}")]
    RefreshFailed(String),

    /// The refresh call did not settle within the configured bound
    #[error("Token refresh timed out after {0:?}")]
    RefreshTimeout(Duration),

    /// The refreshing request was dropped before the refresh settled
    #[error("Token refresh was abandoned before completing")]
    RefreshAbandoned,
}

/// Errors returned by the gateway to its callers
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Non-success HTTP status
    #[error("HTTP error! status: {status}{suffix}", suffix = body_suffix(.body))]
    Http { status: u16, body: Option<String> },

    /// Token refresh failed; the session has been logged out
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Transport-level failure, no status available
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    /// Success response whose body could not be read or parsed
    #[error("Failed to decode response body: {0}")]
    Decode(#[source] reqwest::Error),

    /// JSON value did not match the expected shape
    #[error("Unexpected response shape: {0}")]
    Deserialize(#[from] serde_json::Error),

    /// Success response that was not JSON where JSON was required
    #[error("Unexpected content type: {0}")]
    UnexpectedContent(String),

    /// Upload rejected with 401; tokens have been cleared
    #[error("Authentication failed")]
    UploadUnauthorized,

    /// Caller supplied a header that cannot be sent
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// HTTP client construction failed
    #[error("Client error: {0}")]
    Client(String),
}

impl GatewayError {
    /// HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Http { status, .. } => Some(*status),
            GatewayError::Network(e) | GatewayError::Decode(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// True for the 401 responses that drive token refresh
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, GatewayError::Http { status: 401, .. })
    }
}

fn body_suffix(body: &Option<String>) -> String {
    match body {
        Some(text) => format!(" - {}", text),
        None => String::new(),
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
