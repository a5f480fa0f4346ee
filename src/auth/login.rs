// Login against the gateway

use reqwest::Client;

use super::types::{LoginResponse, Session, UserType};
use crate::error::ApiError;

const STUDENT_DOMAIN: &str = "@cuc.cr";
const STAFF_DOMAIN: &str = "@cuc.ac.cr";

/// Map an e-mail address to the gateway's user type
pub fn user_type_for_email(email: &str) -> Option<UserType> {
    let email = email.trim().to_lowercase();
    if email.ends_with(STUDENT_DOMAIN) {
        Some(UserType::Student)
    } else if email.ends_with(STAFF_DOMAIN) {
        Some(UserType::Staff)
    } else {
        None
    }
}

/// Log in with e-mail and password, returning a fresh session
///
/// Credentials travel in headers with an empty body, which is what the
/// gateway expects. The caller installs the session in its manager.
pub async fn login(
    client: &Client,
    base_url: &str,
    email: &str,
    password: &str,
) -> Result<Session, ApiError> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(ApiError::ValidationError(
            "E-mail and password are required".to_string(),
        ));
    }

    let user_type = user_type_for_email(email).ok_or_else(|| {
        ApiError::ValidationError(format!("E-mail domain is not allowed: {}", email))
    })?;

    let url = format!("{}/login", base_url.trim_end_matches('/'));
    tracing::info!(
        url = %url,
        user_type = user_type.as_header_value(),
        "Logging in..."
    );

    let response = client
        .post(&url)
        .header("correo", email.trim())
        .header("contrasena", password)
        .header("tipousuario", user_type.as_header_value())
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), "Login rejected");
        return Err(ApiError::Upstream {
            status: status.as_u16(),
            message,
        });
    }

    let data: LoginResponse = response.json().await?;
    if data.access_token.is_empty() {
        return Err(ApiError::Internal(anyhow::anyhow!(
            "Login response does not contain access_token"
        )));
    }

    tracing::info!(user_id = data.user_id, "Login successful");
    Ok(Session::from_login(data))
}
