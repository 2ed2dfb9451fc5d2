// Token refresh logic

use serde_json::{Map, Value};

use super::store::TokenStore;
use super::types::{parse_token_response, token_preview, TokenData, TokenFields};
use crate::error::RefreshError;
use crate::pipeline::{ApiRequest, RequestPipeline};

/// What a refresh call needs besides the pipeline and the store
#[derive(Debug, Clone)]
pub struct RefreshSettings {
    /// Refresh endpoint, relative to the base URL
    pub path: String,
    pub fields: TokenFields,

    /// Keep a rotated refresh token from the response
    pub rotate_refresh_token: bool,
}

/// Exchange the stored refresh token for a new access token
///
/// Fails without touching the network when no refresh token is stored.
/// Does not write to the store; the caller decides what to persist.
pub async fn run_refresh(
    pipeline: &RequestPipeline,
    store: &TokenStore,
    settings: &RefreshSettings,
) -> Result<TokenData, RefreshError> {
    let refresh_token = match store.get_refresh() {
        Some(token) => token,
        None => {
            tracing::info!("No refresh token stored, skipping refresh call");
            return Err(RefreshError::MissingRefreshToken);
        }
    };

    tracing::info!(
        refresh_token = %token_preview(&refresh_token),
        "Refreshing access token..."
    );

    let mut payload = Map::new();
    payload.insert(
        settings.fields.refresh_request.clone(),
        Value::String(refresh_token),
    );

    let request = ApiRequest::post(settings.path.as_str())
        .json(&Value::Object(payload))
        .map_err(|e| RefreshError::Transport(format!("failed to encode refresh payload: {}", e)))?;
    let request = pipeline.prepare(request);

    let response = pipeline
        .dispatch(&request, None)
        .await
        .map_err(|e| RefreshError::Transport(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        tracing::error!(
            status = status.as_u16(),
            body = %error_text,
            "Token refresh rejected"
        );
        return Err(RefreshError::Rejected {
            status: status.as_u16(),
            body: error_text,
        });
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| RefreshError::MalformedResponse(e.to_string()))?;

    let token_data = parse_token_response(&body, &settings.fields, settings.rotate_refresh_token)
        .ok_or_else(|| {
            RefreshError::MalformedResponse(format!(
                "response does not contain any of: {}",
                settings.fields.access.join(", ")
            ))
        })?;

    tracing::info!(
        access_token = %token_preview(&token_data.access_token),
        refresh_rotated = token_data.refresh_token.is_some(),
        "Access token refreshed"
    );

    Ok(token_data)
}
