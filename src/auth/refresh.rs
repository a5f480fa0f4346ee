// Token refresh logic

use anyhow::{Context, Result};
use reqwest::Client;

use super::types::{expiry_from_now, token_preview, RefreshResponse, Session, TokenData};

/// Header carrying the refresh token
pub const REFRESH_TOKEN_HEADER: &str = "refresh_token";

/// Get refresh URL for the gateway base
fn get_refresh_url(base_url: &str) -> String {
    format!("{}/refresh", base_url.trim_end_matches('/'))
}

/// Exchange the session's refresh token for a new token set
///
/// Only the refresh token is sent, never the access token. Fails without
/// touching the network when the session has no refresh token.
pub async fn refresh_session(
    client: &Client,
    base_url: &str,
    session: &Session,
) -> Result<TokenData> {
    if session.refresh_token.is_empty() {
        anyhow::bail!("No refresh token available");
    }

    let url = get_refresh_url(base_url);
    tracing::info!(
        url = %url,
        refresh_token = token_preview(&session.refresh_token),
        "Refreshing access token..."
    );

    let response = client
        .post(&url)
        .header(REFRESH_TOKEN_HEADER, session.refresh_token.as_str())
        .send()
        .await
        .context("Failed to send refresh request")?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        tracing::error!(
            status = status.as_u16(),
            body = %error_text,
            "Token refresh rejected"
        );
        anyhow::bail!("Refresh endpoint returned {} - {}", status, error_text);
    }

    let data: RefreshResponse = response
        .json()
        .await
        .context("Failed to parse refresh response")?;

    if data.access_token.is_empty() {
        anyhow::bail!("Refresh response does not contain access_token");
    }

    // Some gateways keep the refresh token and omit it from the response
    let refresh_token = if data.refresh_token.is_empty() {
        session.refresh_token.clone()
    } else {
        data.refresh_token
    };

    let expires_at = expiry_from_now(data.expires_in);
    tracing::info!(
        "Token refreshed, expires: {}",
        expires_at.to_rfc3339()
    );

    Ok(TokenData {
        access_token: data.access_token,
        refresh_token,
        expires_in: data.expires_in,
        expires_at,
    })
}
