// Error handling module
// Defines the error taxonomy surfaced to callers of the client

use thiserror::Error;

/// Errors returned by the session-aware client
///
/// Non-401 HTTP statuses are not errors: they come back as ordinary
/// responses for the caller to interpret.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Network-level failure (DNS, timeout, connection reset)
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The session is gone: refresh failed or no refresh token was available
    #[error("Session expired: {reason}")]
    SessionExpired { reason: String },

    /// Login endpoint refused the supplied credentials
    #[error("Login rejected: {status} - {message}")]
    LoginRejected { status: u16, message: String },

    /// Request could not be built (bad method, header or body)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Client configuration is unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session storage failed during an explicit storage operation
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Response or request payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification of a [`ClientError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    SessionExpired,
    LoginRejected,
    InvalidRequest,
    Config,
    Storage,
    Serialization,
}

impl ClientError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Transport(_) => ErrorKind::Transport,
            ClientError::SessionExpired { .. } => ErrorKind::SessionExpired,
            ClientError::LoginRejected { .. } => ErrorKind::LoginRejected,
            ClientError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ClientError::Config(_) => ErrorKind::Config,
            ClientError::Storage(_) => ErrorKind::Storage,
            ClientError::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// True when the caller should route the user back to sign-in
    pub fn is_session_expired(&self) -> bool {
        self.kind() == ErrorKind::SessionExpired
    }
}

impl From<RefreshError> for ClientError {
    fn from(err: RefreshError) -> Self {
        ClientError::SessionExpired {
            reason: err.to_string(),
        }
    }
}

/// Outcome of a failed token refresh
///
/// Cloneable so that one in-flight refresh can hand the same failure to
/// every request waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// No refresh token stored; no network call was made
    #[error("no refresh token available")]
    MissingRefreshToken,

    /// Refresh endpoint answered with a non-success status
    #[error("refresh rejected: {status} - {body}")]
    Rejected { status: u16, body: String },

    /// Refresh endpoint could not be reached
    #[error("refresh transport failure: {0}")]
    Transport(String),

    /// Refresh endpoint answered 2xx without a usable access token
    #[error("malformed refresh response: {0}")]
    MalformedResponse(String),
}

/// Failure of the durable session medium
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
