use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Portfolio Gateway - authenticated client for the portfolio API
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Base URL of the portfolio API
    #[arg(short = 'u', long, env = "PORTFOLIO_API_URL")]
    pub base_url: Option<String>,

    /// Path to the SQLite credential store
    #[arg(short = 'd', long, env = "PORTFOLIO_CREDENTIALS_DB")]
    pub db_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Log in and store the issued tokens
    Login {
        /// Account email (prompted when omitted)
        #[arg(short, long)]
        email: Option<String>,

        /// Account password (prompted when omitted)
        #[arg(short, long, env = "PORTFOLIO_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Remove stored tokens
    Logout,
    /// Check whether the stored session is still accepted
    Status,
    /// GET an API path and print the JSON response
    Get {
        /// API path, e.g. /client/portfolio
        path: String,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    // Backend
    pub base_url: String,

    // Credential storage
    pub credentials_db: PathBuf,

    // HTTP client
    pub http_max_connections: usize,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Session classification
    pub deactivated_marker: String,

    // Logging
    pub log_level: String,
}

impl Config {
    /// Build configuration with priority: CLI > ENV > .env > defaults.
    /// Call `dotenvy::dotenv()` before parsing so .env values reach clap.
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let config = Config {
            base_url: args
                .base_url
                .clone()
                .or_else(|| std::env::var("PORTFOLIO_API_URL").ok())
                .context("PORTFOLIO_API_URL is required (use -u or set PORTFOLIO_API_URL env var)")?,

            credentials_db: args
                .db_file
                .as_deref()
                .map(expand_tilde)
                .unwrap_or_else(default_credentials_db),

            http_max_connections: env_or("HTTP_MAX_CONNECTIONS", 10),

            http_connect_timeout: env_or("HTTP_CONNECT_TIMEOUT", 10),

            http_request_timeout: args.http_timeout,

            deactivated_marker: std::env::var("DEACTIVATED_MARKER")
                .unwrap_or_else(|_| "deactivated".to_string()),

            log_level: args.log_level.clone(),
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let base_url = self.base_url.trim();
        if base_url.is_empty() {
            anyhow::bail!("PORTFOLIO_API_URL cannot be empty");
        }
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            anyhow::bail!(
                "PORTFOLIO_API_URL must start with http:// or https://: {}",
                base_url
            );
        }
        if self.http_request_timeout == 0 || self.http_connect_timeout == 0 {
            anyhow::bail!("HTTP timeouts must be greater than zero");
        }

        Ok(())
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Default credential database location under the user's home directory
fn default_credentials_db() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".portfolio-gateway")
        .join("credentials.sqlite3")
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
