// Outgoing request shaping
// Resolves URLs, normalizes paths and attaches bearer credentials

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, Response};
use serde::Serialize;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::routing::{is_absolute_url, normalize_path, NoAuthList, RoutePattern};

/// Request descriptor as supplied by a caller
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Serialize `body` as the JSON payload
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ClientError> {
        let bytes = serde_json::to_vec(body)?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(bytes));
        Ok(self)
    }

    /// Raw payload, sent as-is
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Result<Self, ClientError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ClientError::InvalidRequest(format!("invalid header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ClientError::InvalidRequest(format!("invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }
}

/// A request after URL resolution and auth classification
///
/// Cloning is cheap: the body is reference counted, so a request can be
/// replayed without re-serializing it.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,

    /// Normalized path (or the absolute URL as given)
    pub path: String,
    pub url: String,
    pub requires_auth: bool,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// Shapes every outgoing request the same way
pub struct RequestPipeline {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Base URL without trailing slash
    base_url: String,

    no_auth: NoAuthList,
    trailing_slash_exceptions: Vec<RoutePattern>,
}

impl RequestPipeline {
    /// Build a pipeline with its own pooled HTTP client
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .pool_max_idle_per_host(config.max_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .timeout(Duration::from_secs(config.request_timeout))
            .build()
            .map_err(|e| ClientError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self::with_client(client, config))
    }

    /// Build a pipeline around an existing HTTP client
    pub fn with_client(client: Client, config: &ClientConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            no_auth: config.effective_no_auth(),
            trailing_slash_exceptions: config.effective_trailing_slash_exceptions(),
        }
    }

    pub fn normalize(&self, path: &str) -> String {
        normalize_path(path, &self.trailing_slash_exceptions)
    }

    /// Whether a normalized path gets credentials
    ///
    /// Absolute URLs point outside the configured API and never do.
    pub fn requires_auth(&self, normalized: &str) -> bool {
        if is_absolute_url(normalized) {
            return false;
        }
        match self.no_auth.find(normalized) {
            Some(pattern) => {
                tracing::trace!(path = normalized, pattern = %pattern, "Path is on the no-auth list");
                false
            }
            None => true,
        }
    }

    pub fn resolve_url(&self, normalized: &str) -> String {
        if is_absolute_url(normalized) {
            normalized.to_string()
        } else {
            format!("{}{}", self.base_url, normalized)
        }
    }

    /// Normalize and classify a caller request
    ///
    /// Any caller-supplied Authorization header is dropped: credentials are
    /// owned by the pipeline.
    pub fn prepare(&self, request: ApiRequest) -> PreparedRequest {
        let path = self.normalize(&request.path);
        let requires_auth = self.requires_auth(&path);
        let url = self.resolve_url(&path);

        let mut headers = request.headers;
        if headers.remove(AUTHORIZATION).is_some() {
            tracing::debug!(path = %path, "Dropping caller-supplied Authorization header");
        }

        PreparedRequest {
            method: request.method,
            path,
            url,
            requires_auth,
            headers,
            body: request.body,
        }
    }

    /// Send a prepared request once
    ///
    /// `token` is attached as a bearer credential only when the request
    /// requires auth. Transport errors are returned unchanged.
    pub async fn dispatch(
        &self,
        request: &PreparedRequest,
        token: Option<&str>,
    ) -> Result<Response, reqwest::Error> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone());

        let authenticated = request.requires_auth && token.is_some();
        if let (true, Some(token)) = (request.requires_auth, token) {
            builder = builder.bearer_auth(token);
        }

        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        tracing::debug!(
            method = %request.method,
            url = %request.url,
            authenticated = authenticated,
            "Sending HTTP request"
        );

        let result = builder.send().await;

        match &result {
            Ok(response) => {
                tracing::debug!(status = %response.status(), "Received HTTP response");
            }
            Err(e) => {
                // Categorize the error for better debugging
                let error_kind = if e.is_timeout() {
                    "timeout"
                } else if e.is_connect() {
                    "connection_failed"
                } else if e.is_request() {
                    "request_error"
                } else if e.is_body() {
                    "body_error"
                } else {
                    "unknown"
                };

                tracing::warn!(
                    error_kind = error_kind,
                    error = %e,
                    url = %request.url,
                    "HTTP request error"
                );
            }
        }

        result
    }
}
