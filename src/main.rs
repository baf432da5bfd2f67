use anyhow::{Context, Result};
use dialoguer::{Input, Password};
use serde::Serialize;
use std::sync::Arc;

use video_app_client::api::VideoApiClient;
use video_app_client::auth::{token_preview, SqliteCredentialStore, TokenManager};
use video_app_client::config::{self, Command, LogFormat};
use video_app_client::error::GatewayError;
use video_app_client::http_client::AuthenticatedClient;
use video_app_client::models::WatchProgress;

#[tokio::main]
async fn main() -> Result<()> {
    let (config, command) = config::Config::load()?;
    config.validate()?;

    init_logging(&config);

    tracing::debug!("API base URL: {}", config.api_base_url);
    tracing::debug!(
        "Credential store: {}",
        config.credentials_db_file.display()
    );

    let store = Arc::new(
        SqliteCredentialStore::open(&config.credentials_db_file).with_context(|| {
            format!(
                "Failed to open credential store: {}",
                config.credentials_db_file.display()
            )
        })?,
    );

    let tokens = Arc::new(
        TokenManager::new(
            store,
            video_app_client::auth::refresh_url(&config.api_base_url),
            config.refresh_timeout,
        )?
        .with_expiry_skew(config.token_expiry_skew),
    );

    let gateway = Arc::new(AuthenticatedClient::new(
        tokens,
        config.http_max_connections,
        config.http_connect_timeout,
        config.http_request_timeout,
    )?);

    let api = VideoApiClient::new(gateway, config.api_base_url.clone());

    match run(&api, command).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_session_expired() => {
            eprintln!("Session expired, please log in again: video-app-client login");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Initialize tracing; logs go to stderr so stdout stays machine-readable
fn init_logging(config: &config::Config) {
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn run(api: &VideoApiClient, command: Command) -> Result<(), GatewayError> {
    match command {
        Command::Login { email, password } => {
            let email = prompt_or(email, "Email")?;
            let password = match password {
                Some(p) => p,
                None => Password::new()
                    .with_prompt("Password")
                    .interact()
                    .context("Failed to read password")?,
            };
            let response = api.login(&email, &password).await?;
            print_json(&response.user)
        }

        Command::Signup { name, email } => {
            let name = prompt_or(name, "Name")?;
            let email = prompt_or(email, "Email")?;
            let password = Password::new()
                .with_prompt("Password")
                .with_confirmation("Confirm password", "Passwords do not match")
                .interact()
                .context("Failed to read password")?;
            let response = api.signup(&name, &email, &password).await?;
            print_json(&response.user)
        }

        Command::Logout => {
            api.logout().await?;
            println!("Logged out");
            Ok(())
        }

        Command::Me => print_json(&api.me().await?),

        Command::Dashboard { page, per_page } => {
            // Both calls may hit an expired token at once; they share one refresh
            let (profile, dashboard) = tokio::try_join!(api.me(), api.dashboard(page, per_page))?;
            print_json(&serde_json::json!({
                "user": profile,
                "videos": dashboard.videos,
                "pagination": dashboard.pagination,
            }))
        }

        Command::Stream { video_id, token } => print_json(&api.stream(&video_id, &token).await?),

        Command::Watch {
            video_id,
            progress,
            duration,
            completed,
        } => {
            let progress = WatchProgress {
                progress_seconds: progress,
                duration_seconds: duration,
                completed,
            };
            print_json(&api.track_watch(&video_id, &progress).await?)
        }

        Command::Health => print_json(&api.health().await?),

        Command::Status => {
            let tokens = api.tokens();
            let credential = tokens.credential()?;
            print_json(&serde_json::json!({
                "authenticated": tokens.is_authenticated(),
                "token_expired": tokens.is_token_expired(),
                "access_token": credential.as_ref().map(|c| token_preview(&c.access_token)),
                "has_refresh_token": credential.as_ref().is_some_and(|c| c.refresh_token.is_some()),
                "issued_at": credential.as_ref().and_then(|c| c.issued_at).map(|t| t.to_rfc3339()),
                "expires_at": credential.as_ref().and_then(|c| c.expires_at).map(|t| t.to_rfc3339()),
            }))
        }

        Command::Refresh => {
            let token = api
                .tokens()
                .resolve_token()
                .await
                .map_err(GatewayError::SessionExpired)?;
            println!("Access token refreshed ({})", token_preview(&token));
            Ok(())
        }
    }
}

fn prompt_or(value: Option<String>, prompt: &str) -> Result<String, GatewayError> {
    match value {
        Some(v) => Ok(v),
        None => Ok(Input::<String>::new()
            .with_prompt(prompt)
            .interact_text()
            .with_context(|| format!("Failed to read {}", prompt.to_lowercase()))?),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), GatewayError> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", text);
    Ok(())
}
