// Authentication module
// Owns the session, its persistence and the token refresh cycle

mod coordinator;
mod refresh;
mod sqlite;
mod store;
mod types;

pub use coordinator::{PendingRequest, RefreshCoordinator};
pub use refresh::{run_refresh, RefreshSettings};
pub use sqlite::SqliteStorage;
pub use store::{MemoryStorage, SessionStorage, TokenStore};
pub use types::{extract_token, parse_token_response, Session, TokenData, TokenFields};
