// Single-flight token refresh with request replay

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::{Response, StatusCode};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::refresh::{run_refresh, RefreshSettings};
use super::store::TokenStore;
use crate::error::{ClientError, RefreshError};
use crate::pipeline::{PreparedRequest, RequestPipeline};

type RefreshOutcome = Result<String, RefreshError>;
type InFlightRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;
type RefreshSlot = Mutex<Option<InFlightRefresh>>;

/// A request whose first attempt came back 401
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request: PreparedRequest,

    /// Token the failed attempt carried
    pub rejected_token: Option<String>,
}

/// Coordinates refreshes so at most one is in flight
///
/// Every 401 arriving while a refresh runs waits on that same refresh;
/// the refresh updates (or clears) the [`TokenStore`] before any waiter
/// is released, so replays always carry the new token.
pub struct RefreshCoordinator {
    pipeline: Arc<RequestPipeline>,
    store: TokenStore,
    settings: Arc<RefreshSettings>,

    /// The active refresh, if any
    in_flight: Arc<RefreshSlot>,

    /// Refresh operations started so far
    started: Arc<AtomicU64>,

    /// Requests currently waiting on a refresh
    waiting: AtomicUsize,
}

impl RefreshCoordinator {
    pub fn new(pipeline: Arc<RequestPipeline>, store: TokenStore, settings: RefreshSettings) -> Self {
        Self {
            pipeline,
            store,
            settings: Arc::new(settings),
            in_flight: Arc::new(Mutex::new(None)),
            started: Arc::new(AtomicU64::new(0)),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Number of refresh operations started since creation
    pub fn refresh_count(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    /// Number of requests waiting on the active refresh
    pub fn pending_count(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn is_refreshing(&self) -> bool {
        lock_slot(&self.in_flight).is_some()
    }

    /// Wait for a refresh and replay `pending` once with the new token
    ///
    /// A 401 on the replay is returned as the final response. A failed
    /// refresh surfaces as [`ClientError::SessionExpired`].
    pub async fn replay(&self, pending: PendingRequest) -> Result<Response, ClientError> {
        let token = match self.fresh_token(pending.rejected_token.as_deref()).await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(
                    path = %pending.request.path,
                    error = %e,
                    "Session expired, request rejected"
                );
                return Err(e.into());
            }
        };

        tracing::debug!(path = %pending.request.path, "Replaying request with refreshed token");

        let response = self.pipeline.dispatch(&pending.request, Some(&token)).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!(
                path = %pending.request.path,
                "Request rejected again after refresh, returning 401 as final"
            );
        }

        Ok(response)
    }

    /// A token newer than `rejected`, refreshing if none exists yet
    pub async fn fresh_token(&self, rejected: Option<&str>) -> RefreshOutcome {
        let refresh = {
            let mut slot = lock_slot(&self.in_flight);

            if let Some(active) = slot.clone() {
                tracing::debug!("Refresh already in flight, waiting on it");
                active
            } else {
                // A refresh may have completed after this request went out
                if let Some(current) = self.store.get() {
                    if rejected != Some(current.as_str()) {
                        tracing::debug!("Access token already refreshed, skipping refresh");
                        return Ok(current);
                    }
                }

                let refresh = self.start_refresh();
                *slot = Some(refresh.clone());
                refresh
            }
        };

        self.waiting.fetch_add(1, Ordering::SeqCst);
        let outcome = refresh.await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    /// Build the shared refresh operation; the slot is cleared when it settles
    fn start_refresh(&self) -> InFlightRefresh {
        let count = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(refresh = count, "Starting token refresh");

        let pipeline = self.pipeline.clone();
        let store = self.store.clone();
        let settings = self.settings.clone();
        let slot: Weak<RefreshSlot> = Arc::downgrade(&self.in_flight);

        async move {
            let outcome = match run_refresh(&pipeline, &store, &settings).await {
                Ok(data) => {
                    store.set(&data.access_token, data.refresh_token.as_deref());
                    Ok(data.access_token)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Token refresh failed, clearing session");
                    store.clear();
                    Err(e)
                }
            };

            if let Some(slot) = slot.upgrade() {
                lock_slot(&slot).take();
            }

            outcome
        }
        .boxed()
        .shared()
    }
}

fn lock_slot(slot: &RefreshSlot) -> MutexGuard<'_, Option<InFlightRefresh>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenFields;
    use crate::config::ClientConfig;

    fn coordinator(base_url: &str, store: TokenStore) -> RefreshCoordinator {
        let pipeline = Arc::new(RequestPipeline::new(&ClientConfig::new(base_url)).unwrap());
        RefreshCoordinator::new(
            pipeline,
            store,
            RefreshSettings {
                path: "/auth/token/refresh/".to_string(),
                fields: TokenFields::default(),
                rotate_refresh_token: true,
            },
        )
    }

    #[tokio::test]
    async fn test_stale_rejection_uses_current_token() {
        let store = TokenStore::in_memory();
        store.set("A2", Some("R1"));

        // Nothing listens here: a refresh attempt would fail
        let coordinator = coordinator("http://127.0.0.1:9", store);

        let token = coordinator.fresh_token(Some("A1")).await.unwrap();
        assert_eq!(token, "A2");
        assert_eq!(coordinator.refresh_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_refresh_token_clears_session() {
        let store = TokenStore::in_memory();
        store.set("A1", None);

        let coordinator = coordinator("http://127.0.0.1:9", store.clone());

        let err = coordinator.fresh_token(Some("A1")).await.unwrap_err();
        assert_eq!(err, RefreshError::MissingRefreshToken);
        assert_eq!(coordinator.refresh_count(), 1);
        assert!(!coordinator.is_refreshing());
        assert_eq!(store.get(), None);
    }

    #[tokio::test]
    async fn test_concurrent_waiters_share_one_refresh() {
        let mut server = mockito::Server::new_async().await;
        let refresh = server
            .mock("POST", "/auth/token/refresh/")
            .with_status(200)
            .with_body(r#"{"access":"A2"}"#)
            .expect(1)
            .create_async()
            .await;

        let store = TokenStore::in_memory();
        store.set("A1", Some("R1"));
        let coordinator = coordinator(&server.url(), store.clone());

        let (a, b, c) = tokio::join!(
            coordinator.fresh_token(Some("A1")),
            coordinator.fresh_token(Some("A1")),
            coordinator.fresh_token(Some("A1")),
        );

        assert_eq!(a.unwrap(), "A2");
        assert_eq!(b.unwrap(), "A2");
        assert_eq!(c.unwrap(), "A2");
        assert_eq!(coordinator.refresh_count(), 1);
        assert_eq!(coordinator.pending_count(), 0);
        assert!(!coordinator.is_refreshing());
        assert_eq!(store.get().as_deref(), Some("A2"));
        assert_eq!(store.get_refresh().as_deref(), Some("R1"));
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_refresh_is_shared_by_waiters() {
        let mut server = mockito::Server::new_async().await;
        let refresh = server
            .mock("POST", "/auth/token/refresh/")
            .with_status(401)
            .with_body(r#"{"detail":"Token is blacklisted"}"#)
            .expect(1)
            .create_async()
            .await;

        let store = TokenStore::in_memory();
        store.set("A1", Some("R1"));
        let coordinator = coordinator(&server.url(), store.clone());

        let (a, b) = tokio::join!(
            coordinator.fresh_token(Some("A1")),
            coordinator.fresh_token(Some("A1")),
        );

        assert!(matches!(a, Err(RefreshError::Rejected { status: 401, .. })));
        assert_eq!(a, b);
        assert_eq!(store.session().access_token, None);
        assert_eq!(store.session().refresh_token, None);
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_new_refresh_after_previous_settled() {
        let mut server = mockito::Server::new_async().await;
        let refresh = server
            .mock("POST", "/auth/token/refresh/")
            .with_status(200)
            .with_body(r#"{"access":"A2"}"#)
            .expect(2)
            .create_async()
            .await;

        let store = TokenStore::in_memory();
        store.set("A1", Some("R1"));
        let coordinator = coordinator(&server.url(), store.clone());

        assert_eq!(coordinator.fresh_token(Some("A1")).await.unwrap(), "A2");
        // The server now rejects A2 too: a second cycle is a fresh refresh
        assert_eq!(coordinator.fresh_token(Some("A2")).await.unwrap(), "A2");
        assert_eq!(coordinator.refresh_count(), 2);
        refresh.assert_async().await;
    }
}
