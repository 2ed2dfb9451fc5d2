use reqwest::{Method, Response, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::Instrument;

use crate::auth::{
    parse_token_response, PendingRequest, RefreshCoordinator, RefreshSettings, Session,
    TokenStore,
};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::pipeline::{ApiRequest, RequestPipeline};

/// Session-aware HTTP client for the REST API
///
/// Attaches the stored bearer token, and on a 401 from an authenticated
/// endpoint refreshes the session once and replays the request. Callers
/// only ever see the final response, or [`ClientError::SessionExpired`]
/// when the session could not be recovered.
pub struct ApiClient {
    pipeline: Arc<RequestPipeline>,
    store: TokenStore,
    coordinator: RefreshCoordinator,
    config: Arc<ClientConfig>,
}

impl ApiClient {
    /// Create a client with its own pooled HTTP client
    pub fn new(config: ClientConfig, store: TokenStore) -> Result<Self> {
        config.validate()?;
        let pipeline = Arc::new(RequestPipeline::new(&config)?);
        Ok(Self::assemble(config, store, pipeline))
    }

    /// Create a client around an existing `reqwest::Client`
    pub fn with_http_client(
        config: ClientConfig,
        store: TokenStore,
        client: reqwest::Client,
    ) -> Result<Self> {
        config.validate()?;
        let pipeline = Arc::new(RequestPipeline::with_client(client, &config));
        Ok(Self::assemble(config, store, pipeline))
    }

    fn assemble(config: ClientConfig, store: TokenStore, pipeline: Arc<RequestPipeline>) -> Self {
        let settings = RefreshSettings {
            path: config.refresh_path.clone(),
            fields: config.token_fields.clone(),
            rotate_refresh_token: config.rotate_refresh_token,
        };
        let coordinator = RefreshCoordinator::new(pipeline.clone(), store.clone(), settings);

        tracing::debug!(
            base_url = %config.base_url,
            refresh_path = %config.refresh_path,
            rotate_refresh_token = config.rotate_refresh_token,
            "API client initialized"
        );

        Self {
            pipeline,
            store,
            coordinator,
            config: Arc::new(config),
        }
    }

    /// Send `method path` with an optional JSON body
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Response> {
        let mut request = ApiRequest::new(method, path);
        if let Some(body) = body {
            request = request.json(body)?;
        }
        self.send(request).await
    }

    /// Send a fully described request
    pub async fn send(&self, request: ApiRequest) -> Result<Response> {
        let request_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let span = tracing::debug_span!(
            "api_request",
            request_id = %request_id,
            method = %request.method,
        );

        self.send_once_then_recover(request).instrument(span).await
    }

    async fn send_once_then_recover(&self, request: ApiRequest) -> Result<Response> {
        let request = self.pipeline.prepare(request);
        let token = if request.requires_auth {
            self.store.get()
        } else {
            None
        };

        let response = self.pipeline.dispatch(&request, token.as_deref()).await?;

        if response.status() != StatusCode::UNAUTHORIZED || !request.requires_auth {
            return Ok(response);
        }

        tracing::info!(
            path = %request.path,
            had_token = token.is_some(),
            "Received 401, refreshing session"
        );

        self.coordinator
            .replay(PendingRequest {
                request,
                rejected_token: token,
            })
            .await
    }

    pub async fn get(&self, path: &str) -> Result<Response> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Response> {
        self.send(ApiRequest::new(Method::POST, path).json(body)?).await
    }

    pub async fn put<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Response> {
        self.send(ApiRequest::new(Method::PUT, path).json(body)?).await
    }

    pub async fn patch<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Response> {
        self.send(ApiRequest::new(Method::PATCH, path).json(body)?).await
    }

    pub async fn delete(&self, path: &str) -> Result<Response> {
        self.request(Method::DELETE, path, None).await
    }

    /// Exchange credentials for a session at the login endpoint
    pub async fn login(&self, credentials: &Value) -> Result<()> {
        let request = ApiRequest::post(self.config.login_path.as_str()).json(credentials)?;
        let request = self.pipeline.prepare(request);

        let response = self.pipeline.dispatch(&request, None).await?;
        let status = response.status();
        let body_text = response.text().await?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Login rejected");
            return Err(ClientError::LoginRejected {
                status: status.as_u16(),
                message: body_text,
            });
        }

        let body: Value = serde_json::from_str(&body_text)?;
        let data = parse_token_response(&body, &self.config.token_fields, true).ok_or_else(|| {
            ClientError::LoginRejected {
                status: status.as_u16(),
                message: "login response did not contain an access token".to_string(),
            }
        })?;

        self.store
            .set(&data.access_token, data.refresh_token.as_deref());
        tracing::info!(can_refresh = data.refresh_token.is_some(), "Signed in");

        Ok(())
    }

    /// End the session locally, notifying the server first when configured
    ///
    /// Server-side failures are logged; the local session is cleared
    /// regardless.
    pub async fn logout(&self) -> Result<()> {
        if let (Some(path), Some(refresh)) = (&self.config.logout_path, self.store.get_refresh()) {
            let mut payload = Map::new();
            payload.insert(
                self.config.token_fields.refresh_request.clone(),
                Value::String(refresh),
            );

            let request = ApiRequest::post(path.as_str()).json(&Value::Object(payload))?;
            match self.send(request).await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!("Server acknowledged logout");
                }
                Ok(response) => {
                    tracing::warn!(status = %response.status(), "Server-side logout failed");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Server-side logout failed");
                }
            }
        }

        self.store.clear();
        tracing::info!("Signed out");
        Ok(())
    }

    /// An access token is stored
    pub fn is_authenticated(&self) -> bool {
        self.store.get().is_some()
    }

    /// Snapshot of the current session
    pub fn session(&self) -> Session {
        self.store.session()
    }

    /// Refresh operations performed by this client
    pub fn refresh_count(&self) -> u64 {
        self.coordinator.refresh_count()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}
