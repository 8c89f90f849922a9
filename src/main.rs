use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::Password;
use reqwest::multipart;
use serde_json::{json, Value};
use std::sync::Arc;

use storefront_gateway::auth::AuthService;
use storefront_gateway::config::{CliArgs, Command, GatewayConfig};
use storefront_gateway::http_client::ApiResponse;
use storefront_gateway::ApiGateway;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    dotenvy::dotenv().ok();

    let args = CliArgs::parse();
    let config = GatewayConfig::from_args(&args)?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(
        base_url = %config.base_url,
        token_db = %config.token_db.display(),
        "Configuration loaded"
    );

    let gateway = Arc::new(ApiGateway::from_config(&config)?);
    let auth = AuthService::new(gateway.clone());

    match args.command {
        Command::Login { email, password } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password()?,
            };
            auth.login(&email, &password).await?;
            let me = auth.get_me().await?;
            print_json(&me)?;
        }

        Command::Register {
            email,
            name,
            password,
        } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password()?,
            };
            let response = auth
                .register(&json!({"email": email, "name": name, "password": password}))
                .await?;
            print_json(&Value::Object(response.extra))?;
            if auth.is_authenticated() {
                eprintln!("Registered and logged in");
            }
        }

        Command::Logout => {
            auth.logout();
            eprintln!("Logged out");
        }

        Command::Whoami => {
            let me = auth.get_me().await?;
            print_json(&me)?;
        }

        Command::Status => {
            let credentials = gateway.token_store().credentials();
            print_json(&json!({
                "baseUrl": format!("{}{}", config.base_url, config.api_prefix),
                "tokenDb": config.token_db.display().to_string(),
                "authenticated": credentials.access_token.is_some(),
                "hasRefreshToken": credentials.refresh_token.is_some(),
            }))?;
        }

        Command::Get { endpoint } => {
            let response = gateway
                .get(&endpoint)
                .await
                .with_context(|| format!("GET {} failed", endpoint))?;
            print_response(response).await?;
        }

        Command::Post { endpoint, body } => {
            let body = parse_body(&body)?;
            let response = gateway
                .post(&endpoint, &body)
                .await
                .with_context(|| format!("POST {} failed", endpoint))?;
            print_response(response).await?;
        }

        Command::Patch { endpoint, body } => {
            let body = parse_body(&body)?;
            let response = gateway
                .patch(&endpoint, &body)
                .await
                .with_context(|| format!("PATCH {} failed", endpoint))?;
            print_response(response).await?;
        }

        Command::Delete { endpoint } => {
            let response = gateway
                .delete(&endpoint)
                .await
                .with_context(|| format!("DELETE {} failed", endpoint))?;
            print_response(response).await?;
        }

        Command::Upload {
            endpoint,
            file,
            field,
        } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "upload".to_string());
            let form = multipart::Form::new()
                .part(field, multipart::Part::bytes(bytes).file_name(file_name));

            let value = gateway
                .upload(&endpoint, form)
                .await
                .with_context(|| format!("Upload to {} failed", endpoint))?;
            print_json(&value)?;
        }
    }

    Ok(())
}

fn prompt_password() -> Result<String> {
    Password::new()
        .with_prompt("Password")
        .interact()
        .context("Failed to read password")
}

fn parse_body(body: &str) -> Result<Value> {
    serde_json::from_str(body).context("Request body must be valid JSON")
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn print_response(response: ApiResponse) -> Result<()> {
    match response {
        ApiResponse::Json(value) => print_json(&value),
        ApiResponse::Raw(raw) => {
            let text = raw.text().await.context("Failed to read response body")?;
            if !text.is_empty() {
                println!("{}", text);
            }
            Ok(())
        }
    }
}
