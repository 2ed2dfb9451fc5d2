// Shrine session client - Library root

pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;
pub mod pipeline;
pub mod routing;

pub use auth::{MemoryStorage, SessionStorage, SqliteStorage, TokenStore};
pub use config::ClientConfig;
pub use error::{ClientError, ErrorKind};
pub use http_client::ApiClient;
pub use pipeline::ApiRequest;
