//! HTTP surface.
//!
//! - [`proxy`]: the OpenAI-compatible endpoints clients talk to.
//! - [`control`]: settings, statistics and tunnel lifecycle for the UI.
//! - [`health`]: combined status.
//! - [`middleware`]: CORS and request IDs, applied to every route.

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::{error::GatewayError, state::AppState};

pub mod control;
pub mod health;
pub mod middleware;
pub mod proxy;

/// Build the full application router with CORS and request-ID middleware.
///
/// Routes are registered per method, so e.g. `GET /api/stats/reset` answers
/// `405 Method Not Allowed`. Chat requests carry whole conversations and
/// inline images, so the proxy route has no body size cap.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/health", get(health::health))
        .route("/api/config", get(control::get_config))
        .route("/api/config/save", post(control::save_config))
        .route("/api/model", post(control::set_model))
        .route("/api/apikey", post(control::set_api_key))
        .route("/api/stats", get(control::stats))
        .route("/api/stats/reset", post(control::reset_stats))
        .route("/api/tunnel/start", post(control::start_tunnel))
        .route("/api/tunnel/stop", post(control::stop_tunnel))
        .route("/api/tunnel/status", get(control::tunnel_status))
        .route(
            "/v1/chat/completions",
            post(proxy::chat_completions).layer(DefaultBodyLimit::disable()),
        )
        .route("/v1/models", get(proxy::list_models))
        .layer(axum::middleware::from_fn(middleware::request_id))
        .layer(axum::middleware::from_fn(middleware::cors))
        .with_state(state)
}

/// Decode a JSON request body regardless of its `Content-Type`.
pub(crate) fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, GatewayError> {
    serde_json::from_slice(body).map_err(|e| GatewayError::MalformedRequest(e.to_string()))
}
