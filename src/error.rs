// Error handling module
// Defines the errors surfaced by the authenticated client

use thiserror::Error;

/// API errors that can occur while talking to the gateway
#[derive(Error, Debug)]
pub enum ApiError {
    /// 401 received while no session was present
    #[error("No valid session")]
    NoSession,

    /// The refresh call failed; the session has been cleared
    #[error("Token refresh failed: {0:#}")]
    RefreshFailed(#[source] anyhow::Error),

    /// The validation endpoint rejected the current token
    #[error("Session invalidated: {0}")]
    SessionInvalidated(String),

    /// Non-success status from the gateway
    #[error("API error: {status} - {message}")]
    Upstream { status: u16, message: String },

    /// Network or protocol failure
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Local input validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Session persistence failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// HTTP status returned by the gateway, if the error carries one
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Upstream { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the session is gone and the user has to log in again
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            ApiError::NoSession | ApiError::RefreshFailed(_) | ApiError::SessionInvalidated(_)
        )
    }
}

/// Result type alias for API operations
pub type Result<T> = std::result::Result<T, ApiError>;
