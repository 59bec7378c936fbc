//! Control API used by the UI: settings, statistics and the tunnel.
//!
//! Mutations apply to the [`StateStore`](crate::state::StateStore) first and
//! are then persisted; a failed write is reported as `{"success": false}` but
//! the in-memory change stands.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::{
    api::parse_body, error::GatewayError, settings::Settings, state::AppState,
    tunnel::TunnelStatus,
};

#[derive(Deserialize)]
struct ModelBody {
    model: String,
}

#[derive(Deserialize)]
struct ApiKeyBody {
    key: String,
}

/// GET /api/config
pub async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.settings().redacted())
}

/// POST /api/config/save: replace all settings. An omitted or empty
/// `apiKey` keeps the stored credential.
pub async fn save_config(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, GatewayError> {
    let incoming: Settings = parse_body(&body)?;
    let saved = state.store.save_settings(incoming);
    tracing::info!(model = %saved.current_model, "settings saved");
    let success = state.persist().await;
    Ok(Json(json!({ "success": success })))
}

/// POST /api/model
pub async fn set_model(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, GatewayError> {
    let ModelBody { model } = parse_body(&body)?;
    tracing::info!(%model, "model changed");
    state.store.set_model(model);
    let success = state.persist().await;
    Ok(Json(json!({ "success": success })))
}

/// POST /api/apikey: set the credential verbatim; `""` clears it.
pub async fn set_api_key(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, GatewayError> {
    let ApiKeyBody { key } = parse_body(&body)?;
    let saved = state.store.set_api_key(key);
    tracing::info!(configured = saved.has_api_key(), "API key updated");
    let success = state.persist().await;
    Ok(Json(json!({ "success": success })))
}

/// GET /api/stats
pub async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.stats())
}

/// POST /api/stats/reset
pub async fn reset_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.store.reset_statistics();
    Json(json!({ "success": true }))
}

/// POST /api/tunnel/start
///
/// Tunnel failures are a result, not an HTTP error: the response is always
/// `200` with `success` telling the UI what happened.
pub async fn start_tunnel(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut body = Map::new();
    match state.tunnel.start().await {
        Ok(status) => {
            body.insert("success".into(), Value::Bool(true));
            body.insert("status".into(), json!(status.status));
            if !status.url.is_empty() {
                body.insert("url".into(), Value::String(status.url));
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "tunnel start failed");
            body.insert("success".into(), Value::Bool(false));
            body.insert("error".into(), Value::String(e.to_string()));
        }
    }
    Json(Value::Object(body))
}

/// POST /api/tunnel/stop
pub async fn stop_tunnel(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.tunnel.stop().await;
    Json(json!({ "success": true }))
}

/// GET /api/tunnel/status
pub async fn tunnel_status(State(state): State<Arc<AppState>>) -> Json<TunnelStatus> {
    Json(state.tunnel.status())
}
