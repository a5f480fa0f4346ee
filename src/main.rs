use anyhow::{Context, Result};
use dialoguer::Password;
use std::sync::Arc;

use carnet_admin::auth::{token_preview, SessionManager, SqliteSessionStorage};
use carnet_admin::config::{Command, Config};
use carnet_admin::error::ApiError;
use carnet_admin::http_client::{parse_method, AuthenticatedClient};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::debug!("Gateway: {}", config.api_url);
    tracing::debug!("Session database: {}", config.session_db.display());

    let storage = Arc::new(SqliteSessionStorage::open(&config.session_db)?);
    let sessions = Arc::new(SessionManager::restore(storage)?);

    let client = AuthenticatedClient::new(
        sessions,
        config.api_url.clone(),
        config.http_connect_timeout,
        config.http_request_timeout,
    )?
    .validate_after_response(config.validate_after_response);

    match run(&client, &config).await {
        Ok(()) => Ok(()),
        Err(e) if e.requires_login() => {
            tracing::error!("❌ {}", e);
            anyhow::bail!("Session is no longer valid, log in again: carnet-admin login -e <correo>")
        }
        Err(e) => Err(e.into()),
    }
}

async fn run(client: &AuthenticatedClient, config: &Config) -> Result<(), ApiError> {
    match &config.command {
        Command::Login { email, password } => {
            let password = match password {
                Some(p) => p.clone(),
                None => Password::new()
                    .with_prompt("Contraseña")
                    .interact()
                    .context("Failed to read password")?,
            };

            let session = client.login(email, &password).await?;
            tracing::info!(
                "✅ Logged in (token: {}...)",
                token_preview(&session.access_token)
            );

            // The profile is a convenience; the session is usable without it
            let session = match client.load_profile(&config.users_url).await {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!("Could not load user profile: {}", e);
                    session
                }
            };

            println!(
                "Logged in as {} (user {})",
                session.user.full_name.as_deref().unwrap_or(email),
                session.user.user_id
            );
        }

        Command::Logout => {
            client.logout().await?;
            println!("Logged out");
        }

        Command::Status => match client.sessions().get().await {
            Some(session) => {
                println!("  User:        {}", session.user.user_id);
                if let Some(ref name) = session.user.full_name {
                    println!("  Name:        {}", name);
                }
                println!("  Token:       {}...", token_preview(&session.access_token));
                println!("  Expires at:  {}", session.expires_at.to_rfc3339());
                let state = if session.is_expired() {
                    "expired (will refresh on next request)"
                } else if session.is_expiring_soon(config.token_refresh_threshold) {
                    "expiring soon"
                } else {
                    "valid"
                };
                println!("  State:       {}", state);
            }
            None => println!("Not logged in"),
        },

        Command::Validate => {
            client.validate_session().await?;
            println!("Token is valid");
        }

        Command::Request { method, path, data } => {
            let mut request = client.request(parse_method(method)?, path);
            if let Some(data) = data {
                let body: serde_json::Value = serde_json::from_str(data).map_err(|e| {
                    ApiError::ValidationError(format!("Invalid JSON body: {}", e))
                })?;
                request = request.json(&body)?;
            }

            let response = client.execute(request).await?;
            let body = response.text().await?;
            match serde_json::from_str::<serde_json::Value>(&body) {
                Ok(json) => println!(
                    "{}",
                    serde_json::to_string_pretty(&json).unwrap_or(body)
                ),
                Err(_) => println!("{}", body),
            }
        }
    }

    Ok(())
}
