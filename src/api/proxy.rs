//! OpenAI-compatible endpoints.
//!
//! Handlers stay thin: translation lives in [`crate::translate`], the upstream
//! call in [`crate::upstream`] and response handling in [`crate::relay`]. This
//! layer sequences them and keeps the statistics honest about failures.

use std::sync::Arc;

use axum::{
    extract::{rejection::BytesRejection, State},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde_json::json;
use tracing::info;

use crate::{error::GatewayError, relay::relay, state::AppState, translate::translate};

/// `POST /v1/chat/completions`: translate, forward to NIM, relay back.
///
/// The body is read raw and its rejection taken by value, so an unreadable
/// or non-JSON payload surfaces as our own 400 envelope rather than axum's
/// plain-text one. Every failure is also appended to the error log with the
/// status it is answered with.
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, GatewayError> {
    let store = &state.store;
    let body = body
        .map_err(|e| GatewayError::MalformedRequest(e.body_text()))
        .inspect_err(|e| store.record_error(e.to_string(), e.status().as_u16()))?;
    let settings = store.settings();

    let translation = translate(&body, &settings).inspect_err(|e| {
        store.record_error(e.to_string(), e.status().as_u16());
    })?;
    let request = translation.request;

    if settings.log_requests {
        info!(
            requested = translation.requested_model.as_deref().unwrap_or("-"),
            model = %request.model,
            stream = request.stream,
            "chat completion"
        );
    }

    let upstream = state
        .upstream
        .chat_completions(&settings.api_key, &request)
        .await
        .inspect_err(|e| store.record_error(e.to_string(), 500))?;

    store.record_request();

    let status = upstream.status().as_u16();
    let response = relay(upstream, request.stream, store)
        .await
        .inspect_err(|e| store.record_error(e.to_string(), 500))?;

    if settings.log_requests {
        info!(status, stream = request.stream, "upstream responded");
    }
    Ok(response)
}

/// `GET /v1/models`: the gateway serves a single configured model and does
/// not enumerate the upstream catalogue.
pub async fn list_models() -> impl IntoResponse {
    Json(json!({ "object": "list", "data": [] }))
}
