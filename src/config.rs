use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::auth::{DEFAULT_EXPIRY_SKEW_SECS, DEFAULT_REFRESH_TIMEOUT_SECS};

/// Video App Client - command line access to the video app API
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Base URL of the REST API
    #[arg(
        short = 'u',
        long,
        env = "API_BASE_URL",
        default_value = "http://localhost:5000/api",
        global = true
    )]
    pub api_url: String,

    /// Path to the SQLite credential database
    #[arg(short = 'd', long, env = "CREDENTIALS_DB_FILE", global = true)]
    pub db_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn", global = true)]
    pub log_level: String,

    /// Log output format (text, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30", global = true)]
    pub http_timeout: u64,

    /// Token refresh timeout in seconds
    #[arg(long, env = "REFRESH_TIMEOUT", default_value_t = DEFAULT_REFRESH_TIMEOUT_SECS, global = true)]
    pub refresh_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Log in and store the session
    Login {
        #[arg(short, long)]
        email: Option<String>,
        /// Prompted for when omitted
        #[arg(short, long, env = "VIDEO_APP_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Create an account and store the session
    Signup {
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        email: Option<String>,
    },
    /// Revoke the session and clear stored credentials
    Logout,
    /// Show the current user profile
    Me,
    /// List videos on the dashboard
    Dashboard {
        #[arg(long, default_value = "1")]
        page: u32,
        #[arg(long, default_value = "2")]
        per_page: u32,
    },
    /// Fetch stream details for a video
    Stream {
        video_id: String,
        /// Playback token from the dashboard listing
        #[arg(short, long)]
        token: String,
    },
    /// Record watch progress for a video
    Watch {
        video_id: String,
        #[arg(long)]
        progress: u64,
        #[arg(long)]
        duration: Option<u64>,
        #[arg(long)]
        completed: bool,
    },
    /// Check backend health
    Health,
    /// Show the local session state
    Status,
    /// Force a token refresh
    Refresh,
}

#[derive(Clone, Debug)]
pub struct Config {
    // API
    pub api_base_url: String,

    // Credentials
    pub credentials_db_file: PathBuf,

    // Timeouts
    pub refresh_timeout: u64,
    pub token_expiry_skew: i64,

    // HTTP client
    pub http_max_connections: usize,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Logging
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > .env > defaults
    pub fn load() -> Result<(Self, Command)> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        let config = Self::from_args(&args);
        Ok((config, args.command))
    }

    /// Build config from parsed arguments, reading the env-only settings
    pub fn from_args(args: &CliArgs) -> Self {
        Config {
            api_base_url: args.api_url.trim_end_matches('/').to_string(),

            credentials_db_file: args
                .db_file
                .as_deref()
                .map(expand_tilde)
                .unwrap_or_else(default_db_path),

            refresh_timeout: args.refresh_timeout,

            token_expiry_skew: env_or("TOKEN_EXPIRY_SKEW", DEFAULT_EXPIRY_SKEW_SECS),

            http_max_connections: env_or("HTTP_MAX_CONNECTIONS", 10),

            http_connect_timeout: env_or("HTTP_CONNECT_TIMEOUT", 10),

            http_request_timeout: args.http_timeout,

            log_level: args.log_level.clone(),

            log_format: parse_log_format(&args.log_format),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://"))
        {
            anyhow::bail!(
                "API_BASE_URL must start with http:// or https://: {}",
                self.api_base_url
            );
        }

        if self.http_request_timeout == 0
            || self.http_connect_timeout == 0
            || self.refresh_timeout == 0
        {
            anyhow::bail!("Timeouts must be greater than zero");
        }

        if self.token_expiry_skew < 0 {
            anyhow::bail!("TOKEN_EXPIRY_SKEW cannot be negative");
        }

        Ok(())
    }
}

/// Read an env-only numeric setting, falling back to `default`
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
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

/// Default credential database location under the platform data directory
fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("video-app-client")
        .join("credentials.sqlite3")
}

/// Parse log format from string
fn parse_log_format(s: &str) -> LogFormat {
    match s.to_lowercase().as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            api_base_url: "http://localhost:5000/api".to_string(),
            credentials_db_file: PathBuf::from("/tmp/credentials.sqlite3"),
            refresh_timeout: 15,
            token_expiry_skew: 60,
            http_max_connections: 10,
            http_connect_timeout: 10,
            http_request_timeout: 30,
            log_level: "warn".to_string(),
            log_format: LogFormat::Text,
        }
    }

    #[test]
    fn test_expand_tilde() {
        let path = expand_tilde("~/test/file.txt");
        assert!(path.to_string_lossy().contains("test/file.txt"));
        assert!(!path.to_string_lossy().starts_with('~'));

        let path = expand_tilde("/absolute/path");
        assert_eq!(path, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_tilde_just_tilde() {
        // Just "~" without slash should not expand
        assert_eq!(expand_tilde("~"), PathBuf::from("~"));
    }

    #[test]
    fn test_default_db_path() {
        let path = default_db_path();
        assert!(path.ends_with("video-app-client/credentials.sqlite3"));
    }

    #[test]
    fn test_parse_log_format() {
        assert_eq!(parse_log_format("json"), LogFormat::Json);
        assert_eq!(parse_log_format("JSON"), LogFormat::Json);
        assert_eq!(parse_log_format("text"), LogFormat::Text);
        assert_eq!(parse_log_format("anything"), LogFormat::Text);
    }

    #[test]
    fn test_validate() {
        assert!(test_config().validate().is_ok());

        let mut config = test_config();
        config.api_base_url = "localhost:5000".to_string();
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.refresh_timeout = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_parsing() {
        let args = CliArgs::try_parse_from([
            "video-app-client",
            "--api-url",
            "https://videos.example.com/api/",
            "dashboard",
            "--page",
            "3",
        ])
        .unwrap();

        assert_eq!(
            args.command,
            Command::Dashboard {
                page: 3,
                per_page: 2
            }
        );

        let config = Config::from_args(&args);
        assert_eq!(config.api_base_url, "https://videos.example.com/api");
    }

    #[test]
    fn test_cli_watch_flags() {
        let args = CliArgs::try_parse_from([
            "video-app-client",
            "watch",
            "v1",
            "--progress",
            "120",
            "--completed",
        ])
        .unwrap();

        assert_eq!(
            args.command,
            Command::Watch {
                video_id: "v1".to_string(),
                progress: 120,
                duration: None,
                completed: true,
            }
        );
    }
}
