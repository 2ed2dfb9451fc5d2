use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use reqwest::Url;
use std::path::PathBuf;
use std::str::FromStr;

use crate::auth::TokenFields;
use crate::error::ClientError;
use crate::routing::{is_absolute_url, NoAuthList, RoutePattern};

pub const DEFAULT_LOGIN_PATH: &str = "/auth/token/";
pub const DEFAULT_REFRESH_PATH: &str = "/auth/token/refresh/";
pub const DEFAULT_PUBLIC_SEARCH_PREFIX: &str = "/places/search/";

/// Shrine directory API client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Base URL of the REST API
    #[arg(short = 'u', long, env = "API_BASE_URL")]
    pub base_url: String,

    /// Token refresh endpoint, relative to the base URL
    #[arg(long, env = "API_REFRESH_PATH", default_value = DEFAULT_REFRESH_PATH)]
    pub refresh_path: String,

    /// Login endpoint, relative to the base URL
    #[arg(long, env = "API_LOGIN_PATH", default_value = DEFAULT_LOGIN_PATH)]
    pub login_path: String,

    /// Optional server-side logout endpoint
    #[arg(long, env = "API_LOGOUT_PATH")]
    pub logout_path: Option<String>,

    /// Comma-separated patterns that never receive credentials
    #[arg(long, env = "API_NO_AUTH", value_delimiter = ',')]
    pub no_auth: Vec<String>,

    /// Comma-separated patterns that must not get a trailing slash
    #[arg(long, env = "API_NO_TRAILING_SLASH", value_delimiter = ',')]
    pub no_trailing_slash: Vec<String>,

    /// Replace the stored refresh token when the server rotates it
    #[arg(long, env = "API_ROTATE_REFRESH_TOKEN", default_value = "true", action = ArgAction::Set)]
    pub rotate_refresh_token: bool,

    /// Path to the session SQLite database
    #[arg(short = 'd', long, env = "SESSION_DB_FILE")]
    pub db_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "10")]
    pub connect_timeout: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub request_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Sign in and store the session
    Login {
        #[arg(long)]
        username: String,

        /// Prompted for when omitted
        #[arg(long, env = "API_PASSWORD")]
        password: Option<String>,

        /// JSON field carrying the username
        #[arg(long, default_value = "username")]
        username_field: String,
    },

    /// Drop the stored session
    Logout,

    /// Show whether a session is stored
    Status,

    /// Send a request through the session-aware client
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE)
        method: String,

        /// Path relative to the base URL
        path: String,

        /// JSON request body
        #[arg(long)]
        data: Option<String>,
    },
}

impl CliArgs {
    /// Load `.env` then parse CLI arguments (CLI > ENV > defaults)
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        CliArgs::parse()
    }

    /// Session database location, defaulting to the user's data directory
    pub fn session_db_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.db_file {
            return Ok(expand_tilde(path));
        }

        dirs::data_local_dir()
            .map(|dir| dir.join("shrine-client").join("session.sqlite3"))
            .context("Could not determine a data directory (use -d or set SESSION_DB_FILE)")
    }

    /// Build the client configuration from parsed arguments
    pub fn client_config(&self) -> Result<ClientConfig> {
        let mut config = ClientConfig::new(&self.base_url)
            .with_refresh_path(&self.refresh_path)
            .with_login_path(&self.login_path)
            .with_rotate_refresh_token(self.rotate_refresh_token)
            .with_timeouts(self.connect_timeout, self.request_timeout);

        if let Some(ref logout) = self.logout_path {
            config = config.with_logout_path(logout);
        }

        if !self.no_auth.is_empty() {
            let no_auth = NoAuthList::new(
                parse_patterns(&self.no_auth).context("Invalid API_NO_AUTH pattern")?,
            );
            config = config.with_no_auth(no_auth);
        }

        if !self.no_trailing_slash.is_empty() {
            config = config.with_trailing_slash_exceptions(
                parse_patterns(&self.no_trailing_slash)
                    .context("Invalid API_NO_TRAILING_SLASH pattern")?,
            );
        }

        config.validate()?;
        Ok(config)
    }
}

/// Configuration of the session-aware client
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub base_url: String,
    pub login_path: String,
    pub refresh_path: String,
    pub logout_path: Option<String>,

    pub no_auth: NoAuthList,
    pub trailing_slash_exceptions: Vec<RoutePattern>,

    // Token endpoint payloads
    pub token_fields: TokenFields,
    pub rotate_refresh_token: bool,

    // HTTP client
    pub connect_timeout: u64,
    pub request_timeout: u64,
    pub max_connections: usize,
}

impl ClientConfig {
    /// Defaults for everything except the base URL
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim().to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            logout_path: None,
            no_auth: NoAuthList::new(vec![
                RoutePattern::exact(DEFAULT_LOGIN_PATH),
                RoutePattern::exact(DEFAULT_REFRESH_PATH),
                RoutePattern::prefix(DEFAULT_PUBLIC_SEARCH_PREFIX),
            ]),
            trailing_slash_exceptions: Vec::new(),
            token_fields: TokenFields::default(),
            rotate_refresh_token: true,
            connect_timeout: 10,
            request_timeout: 30,
            max_connections: 20,
        }
    }

    pub fn with_login_path(mut self, path: &str) -> Self {
        self.login_path = path.to_string();
        self
    }

    pub fn with_refresh_path(mut self, path: &str) -> Self {
        self.refresh_path = path.to_string();
        self
    }

    pub fn with_logout_path(mut self, path: &str) -> Self {
        self.logout_path = Some(path.to_string());
        self
    }

    /// Replace the no-auth list; token endpoints stay exempt regardless
    pub fn with_no_auth(mut self, no_auth: NoAuthList) -> Self {
        self.no_auth = no_auth;
        self
    }

    pub fn with_trailing_slash_exceptions(mut self, exceptions: Vec<RoutePattern>) -> Self {
        self.trailing_slash_exceptions = exceptions;
        self
    }

    pub fn with_token_fields(mut self, fields: TokenFields) -> Self {
        self.token_fields = fields;
        self
    }

    pub fn with_rotate_refresh_token(mut self, rotate: bool) -> Self {
        self.rotate_refresh_token = rotate;
        self
    }

    pub fn with_timeouts(mut self, connect_timeout: u64, request_timeout: u64) -> Self {
        self.connect_timeout = connect_timeout;
        self.request_timeout = request_timeout;
        self
    }

    /// The configured no-auth list plus the login and refresh endpoints
    pub fn effective_no_auth(&self) -> NoAuthList {
        let mut list = self.no_auth.clone();
        for path in [&self.login_path, &self.refresh_path] {
            let path = with_leading_slash(path);
            if !list.matches(&path) {
                list.push(RoutePattern::exact(&path));
            }
        }
        list
    }

    /// The configured trailing-slash exceptions plus any token endpoint
    /// configured without a trailing slash
    pub fn effective_trailing_slash_exceptions(&self) -> Vec<RoutePattern> {
        let mut exceptions = self.trailing_slash_exceptions.clone();
        for path in [&self.login_path, &self.refresh_path] {
            if path.trim().ends_with('/') || is_absolute_url(path.trim()) {
                continue;
            }
            let path = with_leading_slash(path);
            if !exceptions.iter().any(|p| p.matches(&path)) {
                exceptions.push(RoutePattern::exact(&path));
            }
        }
        exceptions
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ClientError> {
        let url = Url::parse(&self.base_url).map_err(|e| {
            ClientError::Config(format!("API_BASE_URL is not a valid URL ({}): {}", self.base_url, e))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::Config(format!(
                "API_BASE_URL must use http or https: {}",
                self.base_url
            )));
        }

        if self.token_fields.access.is_empty() {
            return Err(ClientError::Config(
                "at least one access token field name is required".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_patterns(raw: &[String]) -> Result<Vec<RoutePattern>> {
    raw.iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| RoutePattern::from_str(s).with_context(|| format!("bad pattern: {}", s)))
        .collect()
}

/// Expand tilde (~) in file paths to user's home directory
fn with_leading_slash(path: &str) -> String {
    format!("/{}", path.trim().trim_start_matches('/'))
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
