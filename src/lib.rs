// Storefront Gateway - authenticated client for the storefront API

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http_client;
pub mod models;

pub use error::{AuthError, GatewayError};
pub use gateway::ApiGateway;
