// Session and token types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Identity of the logged-in user
/// Carried unchanged across token refreshes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub user_id: i64,
    pub full_name: Option<String>,

    /// Full profile document from the users endpoint, if fetched
    pub profile: Option<serde_json::Value>,
}

impl UserIdentity {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            full_name: None,
            profile: None,
        }
    }
}

/// Logged-in session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,

    /// Lifetime in seconds as reported by the server
    pub expires_in: u64,

    /// Absolute expiry computed when the tokens were issued
    pub expires_at: DateTime<Utc>,

    pub user: UserIdentity,
}

impl Session {
    /// Build a session from a login response
    pub fn from_login(login: LoginResponse) -> Self {
        let expires_at = expiry_from_now(login.expires_in);
        Self {
            access_token: login.access_token,
            refresh_token: login.refresh_token,
            expires_in: login.expires_in,
            expires_at,
            user: UserIdentity::new(login.user_id),
        }
    }

    /// Copy of this session with fresh tokens, identity untouched
    pub fn with_tokens(&self, tokens: TokenData) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_in: tokens.expires_in,
            expires_at: tokens.expires_at,
            user: self.user.clone(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Check if the access token expires within `threshold_secs`
    pub fn is_expiring_soon(&self, threshold_secs: i64) -> bool {
        self.expires_at <= Utc::now() + Duration::seconds(threshold_secs)
    }
}

/// Token data from a refresh response
#[derive(Debug, Clone, PartialEq)]
pub struct TokenData {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    pub expires_at: DateTime<Utc>,
}

/// Login endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_expires_in", deserialize_with = "lenient_expires_in")]
    pub expires_in: u64,
    #[serde(rename = "usuarioID")]
    pub user_id: i64,
}

/// Refresh endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default = "default_expires_in", deserialize_with = "lenient_expires_in")]
    pub expires_in: u64,
}

/// Gateway user category, derived from the e-mail domain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserType {
    Student,
    Staff,
}

impl UserType {
    /// Value sent in the `tipousuario` login header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            UserType::Student => "estudiante",
            UserType::Staff => "funcionario",
        }
    }
}

fn default_expires_in() -> u64 {
    3600
}

/// `expires_in` as the gateway sends it: seconds as a number or a string
#[derive(Deserialize)]
#[serde(untagged)]
enum ExpiresIn {
    Seconds(u64),
    Fractional(f64),
    Text(String),
    Other(serde_json::Value),
}

/// Accept `3600`, `"3600"` or `3600.0`; anything unparseable falls back
/// to the default lifetime
fn lenient_expires_in<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let seconds = match ExpiresIn::deserialize(deserializer)? {
        ExpiresIn::Seconds(secs) => Some(secs),
        ExpiresIn::Fractional(secs) if secs.is_finite() && secs >= 0.0 => Some(secs as u64),
        ExpiresIn::Fractional(_) => None,
        ExpiresIn::Text(text) => text.trim().parse::<u64>().ok(),
        ExpiresIn::Other(value) => {
            tracing::debug!(value = %value, "expires_in has an unexpected type");
            None
        }
    };

    Ok(seconds.unwrap_or_else(|| {
        tracing::warn!("Unusable expires_in in token response, using default");
        default_expires_in()
    }))
}

/// Absolute expiry for a lifetime in seconds
pub fn expiry_from_now(expires_in: u64) -> DateTime<Utc> {
    Utc::now() + Duration::seconds(expires_in.min(u32::MAX as u64) as i64)
}

/// Shortened token for log output
pub fn token_preview(token: &str) -> &str {
    let end = token
        .char_indices()
        .nth(12)
        .map(|(i, _)| i)
        .unwrap_or(token.len());
    &token[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login_response() -> LoginResponse {
        serde_json::from_value(serde_json::json!({
            "access_token": "A1",
            "refresh_token": "R1",
            "expires_in": 3600,
            "usuarioID": 42
        }))
        .unwrap()
    }

    #[test]
    fn test_session_from_login() {
        let session = Session::from_login(login_response());
        assert_eq!(session.access_token, "A1");
        assert_eq!(session.refresh_token, "R1");
        assert_eq!(session.expires_in, 3600);
        assert_eq!(session.user.user_id, 42);
        assert!(!session.is_expired());
        assert!(!session.is_expiring_soon(300));
        assert!(session.is_expiring_soon(7200));
    }

    #[test]
    fn test_with_tokens_preserves_identity() {
        let mut session = Session::from_login(login_response());
        session.user.full_name = Some("Ana Mora".to_string());
        session.user.profile = Some(serde_json::json!({"correo": "ana@cuc.cr"}));

        let refreshed = session.with_tokens(TokenData {
            access_token: "A2".to_string(),
            refresh_token: "R2".to_string(),
            expires_in: 60,
            expires_at: expiry_from_now(60),
        });

        assert_eq!(refreshed.access_token, "A2");
        assert_eq!(refreshed.refresh_token, "R2");
        assert_eq!(refreshed.expires_in, 60);
        assert_eq!(refreshed.user, session.user);
    }

    #[test]
    fn test_expired_session() {
        let mut session = Session::from_login(login_response());
        session.expires_at = Utc::now() - Duration::seconds(5);
        assert!(session.is_expired());
    }

    #[test]
    fn test_refresh_response_defaults() {
        let data: RefreshResponse = serde_json::from_str(r#"{"access_token":"A2"}"#).unwrap();
        assert_eq!(data.access_token, "A2");
        assert_eq!(data.refresh_token, "");
        assert_eq!(data.expires_in, 3600);
    }

    #[test]
    fn test_expires_in_as_string() {
        let data: RefreshResponse =
            serde_json::from_str(r#"{"access_token":"A2","expires_in":"1800"}"#).unwrap();
        assert_eq!(data.expires_in, 1800);

        let login: LoginResponse = serde_json::from_value(serde_json::json!({
            "access_token": "A1",
            "refresh_token": "R1",
            "expires_in": " 3600 ",
            "usuarioID": 42
        }))
        .unwrap();
        assert_eq!(login.expires_in, 3600);
    }

    #[test]
    fn test_expires_in_unparseable_uses_default() {
        for raw in [r#""soon""#, r#""""#, "-5", "null", "true", r#"{"s":1}"#] {
            let body = format!(r#"{{"access_token":"A2","expires_in":{}}}"#, raw);
            let data: RefreshResponse = serde_json::from_str(&body).unwrap();
            assert_eq!(data.expires_in, 3600, "expires_in = {}", raw);
        }
    }

    #[test]
    fn test_expires_in_fractional_number() {
        let data: RefreshResponse =
            serde_json::from_str(r#"{"access_token":"A2","expires_in":900.0}"#).unwrap();
        assert_eq!(data.expires_in, 900);
    }

    #[test]
    fn test_token_preview() {
        assert_eq!(token_preview("short"), "short");
        assert_eq!(token_preview("eyJhbGciOiJIUzI1NiJ9.payload"), "eyJhbGciOiJI");
        assert_eq!(token_preview(""), "");
    }
}
