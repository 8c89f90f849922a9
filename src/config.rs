use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Storefront API client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Backend base URL (scheme and host)
    #[arg(
        short = 'u',
        long,
        env = "STOREFRONT_BASE_URL",
        default_value = "http://localhost:3000"
    )]
    pub base_url: String,

    /// Path prefix prepended to every endpoint
    #[arg(long, env = "STOREFRONT_API_PREFIX", default_value = "/api")]
    pub api_prefix: String,

    /// Path to the SQLite token database
    #[arg(short = 'd', long, env = "STOREFRONT_TOKEN_DB")]
    pub token_db: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "60")]
    pub http_timeout: u64,

    /// Token recoveries allowed per request before a 401 is returned
    #[arg(long, env = "MAX_AUTH_RETRIES", default_value = "1")]
    pub max_auth_retries: u32,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Create a session with email and password
    Login {
        #[arg(short, long)]
        email: String,
        /// Prompted for when omitted
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Create an account
    Register {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Drop the stored tokens
    Logout,
    /// Show the current user
    Whoami,
    /// Show whether tokens are stored
    Status,
    /// GET an endpoint
    Get { endpoint: String },
    /// POST a JSON body to an endpoint
    Post { endpoint: String, body: String },
    /// PATCH an endpoint with a JSON body
    Patch { endpoint: String, body: String },
    /// DELETE an endpoint
    Delete { endpoint: String },
    /// Upload a file as multipart form data
    Upload {
        endpoint: String,
        file: PathBuf,
        /// Form field name for the file
        #[arg(long, default_value = "file")]
        field: String,
    },
}

/// Settings for the gateway and its HTTP client
#[derive(Clone, Debug, PartialEq)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_prefix: String,
    pub token_db: PathBuf,

    // Timeouts
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub refresh_timeout: Duration,

    pub max_auth_retries: u32,
    pub log_level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            api_prefix: "/api".to_string(),
            token_db: default_token_db(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            refresh_timeout: Duration::from_secs(30),
            max_auth_retries: 1,
            log_level: "warn".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Build configuration with priority: CLI > ENV > defaults
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            base_url: args.base_url.clone(),
            api_prefix: args.api_prefix.clone(),

            token_db: args
                .token_db
                .as_deref()
                .map(expand_tilde)
                .unwrap_or(defaults.token_db),

            connect_timeout: env_secs(
                "HTTP_CONNECT_TIMEOUT",
                std::env::var("HTTP_CONNECT_TIMEOUT").ok(),
                defaults.connect_timeout,
            )?,

            request_timeout: Duration::from_secs(args.http_timeout),

            refresh_timeout: env_secs(
                "TOKEN_REFRESH_TIMEOUT",
                std::env::var("TOKEN_REFRESH_TIMEOUT").ok(),
                defaults.refresh_timeout,
            )?,

            max_auth_retries: args.max_auth_retries,
            log_level: args.log_level.clone(),
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            anyhow::bail!("STOREFRONT_BASE_URL cannot be empty");
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            anyhow::bail!(
                "STOREFRONT_BASE_URL must start with http:// or https://: {}",
                self.base_url
            );
        }

        if !self.api_prefix.is_empty() && !self.api_prefix.starts_with('/') {
            anyhow::bail!(
                "STOREFRONT_API_PREFIX must start with '/': {}",
                self.api_prefix
            );
        }

        if self.connect_timeout.is_zero()
            || self.request_timeout.is_zero()
            || self.refresh_timeout.is_zero()
        {
            anyhow::bail!("Timeouts must be greater than zero");
        }

        Ok(())
    }
}

/// Seconds from an env-only setting; unset means the default
fn env_secs(name: &str, value: Option<String>, default: Duration) -> Result<Duration> {
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Duration::from_secs)
            .with_context(|| format!("{} must be a whole number of seconds: {}", name, raw)),
        None => Ok(default),
    }
}

/// Default token database location under the user's data directory
fn default_token_db() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("storefront-gateway")
        .join("tokens.sqlite3")
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
