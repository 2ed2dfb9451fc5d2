// Session token storage
// In-process session state with write-through to a durable medium

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use super::types::{parse_datetime, token_preview, Session};
use crate::error::StorageError;

pub const ACCESS_TOKEN_KEY: &str = "session:access";
pub const REFRESH_TOKEN_KEY: &str = "session:refresh";
pub const UPDATED_AT_KEY: &str = "session:updated_at";

/// Durable key-value medium backing the session
///
/// Implementations: [`MemoryStorage`] and `SqliteStorage`.
pub trait SessionStorage: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn store(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Process-local storage, nothing survives a restart
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemoryStorage {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StorageError::Unavailable("memory storage lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn store(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::Unavailable("memory storage lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::Unavailable("memory storage lock poisoned".to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

/// Owner of the current [`Session`]
///
/// Cheap to clone; clones share the same session. Reads never fail: a
/// storage problem degrades to "no token" so requests go out unauthenticated
/// instead of erroring.
#[derive(Clone)]
pub struct TokenStore {
    session: Arc<RwLock<Session>>,
    storage: Arc<dyn SessionStorage>,
}

impl TokenStore {
    /// Create a store over `storage`, loading any persisted session
    pub fn open(storage: Arc<dyn SessionStorage>) -> Self {
        let session = load_session(storage.as_ref());

        if session.is_authenticated() {
            tracing::info!(
                can_refresh = session.can_refresh(),
                "Restored persisted session"
            );
        } else {
            tracing::debug!("No persisted session found, starting signed out");
        }

        Self {
            session: Arc::new(RwLock::new(session)),
            storage,
        }
    }

    /// Empty store backed by [`MemoryStorage`]
    pub fn in_memory() -> Self {
        Self::open(Arc::new(MemoryStorage::new()))
    }

    /// Current access token
    pub fn get(&self) -> Option<String> {
        self.read().access_token.clone()
    }

    /// Current refresh token
    pub fn get_refresh(&self) -> Option<String> {
        self.read().refresh_token.clone()
    }

    /// Snapshot of the whole session
    pub fn session(&self) -> Session {
        self.read().clone()
    }

    /// Store a new access token; `refresh_token: None` keeps the stored one
    pub fn set(&self, access_token: &str, refresh_token: Option<&str>) {
        let now = Utc::now();
        {
            let mut session = self.write();
            session.access_token = Some(access_token.to_string());
            if let Some(refresh) = refresh_token {
                session.refresh_token = Some(refresh.to_string());
            }
            session.updated_at = Some(now);
        }

        tracing::debug!(
            access_token = %token_preview(access_token),
            refresh_rotated = refresh_token.is_some(),
            "Session tokens updated"
        );

        self.persist(ACCESS_TOKEN_KEY, Some(access_token));
        if let Some(refresh) = refresh_token {
            self.persist(REFRESH_TOKEN_KEY, Some(refresh));
        }
        self.persist(UPDATED_AT_KEY, Some(&now.to_rfc3339()));
    }

    /// Remove both tokens; idempotent
    pub fn clear(&self) {
        {
            let mut session = self.write();
            *session = Session::default();
        }

        tracing::debug!("Session cleared");

        self.persist(ACCESS_TOKEN_KEY, None);
        self.persist(REFRESH_TOKEN_KEY, None);
        self.persist(UPDATED_AT_KEY, None);
    }

    fn persist(&self, key: &str, value: Option<&str>) {
        let result = match value {
            Some(v) => self.storage.store(key, v),
            None => self.storage.remove(key),
        };

        if let Err(e) = result {
            tracing::warn!(key = key, error = %e, "Failed to persist session state");
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Session> {
        self.session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Session> {
        self.session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.read();
        f.debug_struct("TokenStore")
            .field("authenticated", &session.is_authenticated())
            .field("can_refresh", &session.can_refresh())
            .finish()
    }
}

/// Read a persisted session, treating any storage error as "absent"
fn load_session(storage: &dyn SessionStorage) -> Session {
    let load = |key: &str| match storage.load(key) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(key = key, error = %e, "Session storage unavailable, treating as signed out");
            None
        }
    };

    Session {
        access_token: load(ACCESS_TOKEN_KEY),
        refresh_token: load(REFRESH_TOKEN_KEY),
        updated_at: load(UPDATED_AT_KEY).and_then(|s| parse_datetime(&s).ok()),
    }
}
