use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Carnet Admin - digital ID card gateway client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Gateway base URL (login, refresh and validate endpoints)
    #[arg(short = 'u', long, env = "API_URL")]
    pub api_url: Option<String>,

    /// Users service base URL, used to load the profile after login
    #[arg(long, env = "USERS_API_URL")]
    pub users_url: Option<String>,

    /// Path to the session database
    #[arg(short = 's', long, env = "SESSION_DB_FILE")]
    pub session_db: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "10")]
    pub connect_timeout: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// Validate the access token after every successful response
    #[arg(long, env = "VALIDATE_AFTER_RESPONSE", default_value = "false")]
    pub validate_after_response: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Log in and store the session
    Login {
        /// Institutional e-mail (@cuc.cr or @cuc.ac.cr)
        #[arg(short, long)]
        email: String,

        /// Password (prompted when omitted)
        #[arg(short, long, env = "CARNET_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Drop the stored session
    Logout,

    /// Show the stored session
    Status,

    /// Check the access token against the gateway
    Validate,

    /// Send an authenticated request and print the response body
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE)
        method: String,

        /// Path relative to the gateway URL, or an absolute URL
        path: String,

        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    // Gateway
    pub api_url: String,
    pub users_url: String,

    // Session
    pub session_db: PathBuf,
    pub token_refresh_threshold: i64,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,
    pub validate_after_response: bool,

    // Logging
    pub log_level: String,

    pub command: Command,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Self::from_args(CliArgs::parse())
    }

    /// Build configuration from parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let api_url = args
            .api_url
            .context("API_URL is required (use -u or set API_URL env var)")?
            .trim_end_matches('/')
            .to_string();

        let users_url = args
            .users_url
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| api_url.clone());

        let session_db = args
            .session_db
            .map(|s| expand_tilde(&s))
            .unwrap_or_else(default_session_db);

        Ok(Config {
            api_url,
            users_url,
            session_db,
            token_refresh_threshold: std::env::var("TOKEN_REFRESH_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            http_connect_timeout: args.connect_timeout,
            http_request_timeout: args.http_timeout,
            validate_after_response: args.validate_after_response,
            log_level: args.log_level,
            command: args.command,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [("API_URL", &self.api_url), ("USERS_API_URL", &self.users_url)] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("{} must be an http(s) URL: {}", name, url);
            }
        }

        if self.http_connect_timeout == 0 || self.http_request_timeout == 0 {
            anyhow::bail!("HTTP timeouts must be greater than zero");
        }

        Ok(())
    }
}

/// Default session database location
fn default_session_db() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("carnet-admin").join("session.sqlite3"))
        .unwrap_or_else(|| PathBuf::from("session.sqlite3"))
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
