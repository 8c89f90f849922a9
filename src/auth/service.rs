// Session operations: login, registration, profile and password management

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

use super::session::REFRESH_ENDPOINT;
use super::types::{
    ForgotPasswordRequest, LoginRequest, RefreshRequest, ResetPasswordRequest, SessionResponse,
    TokenPair, UpdatePasswordRequest,
};
use crate::gateway::ApiGateway;
use crate::http_client::OriginalRequest;

const LOGIN_ENDPOINT: &str = "/auth-sessions/email";
const USERS_ENDPOINT: &str = "/users";
const ME_ENDPOINT: &str = "/users/me";

/// Auth endpoints of the storefront API
pub struct AuthService {
    gateway: Arc<ApiGateway>,
}

impl AuthService {
    pub fn new(gateway: Arc<ApiGateway>) -> Self {
        Self { gateway }
    }

    /// Create a session and store its tokens
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionResponse> {
        let response: SessionResponse = self
            .gateway
            .post(LOGIN_ENDPOINT, &LoginRequest { email, password })
            .await
            .and_then(|r| r.json())
            .context("Login failed")?;

        match response.tokens() {
            Some(tokens) => self.gateway.token_store().set_tokens(&tokens),
            None => tracing::warn!("Login response did not include both tokens"),
        }

        tracing::info!("Logged in as {}", email);
        Ok(response)
    }

    /// Create an account; stores tokens when the backend issues them
    pub async fn register<T: Serialize + ?Sized>(&self, user: &T) -> Result<SessionResponse> {
        let response: SessionResponse = self
            .gateway
            .post(USERS_ENDPOINT, user)
            .await
            .and_then(|r| r.json())
            .context("Registration failed")?;

        if let Some(tokens) = response.tokens() {
            self.gateway.token_store().set_tokens(&tokens);
        }

        Ok(response)
    }

    /// Drop local credentials; no network call
    pub fn logout(&self) {
        self.gateway.token_store().clear();
    }

    /// Exchange a refresh token for a new pair without touching the store.
    ///
    /// Sent without 401 recovery: a rejected refresh token is reported as is.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair> {
        let body = serde_json::to_value(RefreshRequest { refresh_token })?;
        let request = OriginalRequest::new(Method::POST, REFRESH_ENDPOINT).with_body(body);

        self.gateway
            .executor()
            .execute(&request)
            .await
            .and_then(|r| r.json())
            .context("Refresh token failed")
    }

    pub async fn forgot_password(&self, email: &str) -> Result<Value> {
        self.post_json("/users/forgot-password", &ForgotPasswordRequest { email })
            .await
            .context("Forgot password failed")
    }

    pub async fn reset_password(&self, email: &str, code: &str, new_password: &str) -> Result<Value> {
        let request = ResetPasswordRequest {
            email,
            code,
            password: new_password,
        };
        self.post_json("/users/reset-password", &request)
            .await
            .context("Reset password failed")
    }

    pub async fn update_password(&self, current_password: &str, new_password: &str) -> Result<Value> {
        let request = UpdatePasswordRequest {
            current_password,
            new_password,
        };
        self.post_json("/users/update-password", &request)
            .await
            .context("Update password failed")
    }

    /// Current user
    pub async fn get_me(&self) -> Result<Value> {
        self.gateway
            .get(ME_ENDPOINT)
            .await
            .and_then(|r| r.into_json())
            .context("Get user failed")
    }

    pub async fn update_me<T: Serialize + ?Sized>(&self, changes: &T) -> Result<Value> {
        self.gateway
            .patch(ME_ENDPOINT, changes)
            .await
            .and_then(|r| r.into_json())
            .context("Update profile failed")
    }

    pub fn is_authenticated(&self) -> bool {
        self.gateway.is_authenticated()
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &T,
    ) -> crate::error::Result<Value> {
        self.gateway.post(endpoint, body).await?.into_json()
    }
}
