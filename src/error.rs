//! Gateway error type and its HTTP rendering.
//!
//! Every failure on the request path is a [`GatewayError`]. Handlers return
//! `Result<T, GatewayError>` and propagate with `?`; the [`IntoResponse`] impl
//! turns the error into the OpenAI-style envelope
//! `{"error": {"message", "type", "code"}}` so callers never see a bare 500.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn handler(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response, GatewayError> {
//!     let request = translate(&body, &state.store.settings())?;
//!     ...
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The inbound body is not a JSON object with a `messages` field.
    #[error("{0}")]
    MalformedRequest(String),

    /// No upstream credential has been configured.
    #[error("API key not configured")]
    ConfigurationError,

    /// No response at all could be obtained from the upstream.
    #[error("{0}")]
    UpstreamCallFailure(String),

    /// None of the tunnel executable candidates exist.
    #[error("cloudflared not found (searched: {searched}). Install with: pkg install cloudflared")]
    ExecutableNotFound { searched: String },

    #[error("Failed to start cloudflared: {0}")]
    SpawnFailed(#[source] std::io::Error),

    /// The tunnel supervisor task is no longer running.
    #[error("tunnel supervisor is not running")]
    TunnelUnavailable,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The `type` string of the error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedRequest(_) => "invalid_request_error",
            Self::ConfigurationError => "configuration_error",
            Self::UpstreamCallFailure(_) => "api_error",
            Self::ExecutableNotFound { .. } | Self::SpawnFailed(_) | Self::TunnelUnavailable => {
                "tunnel_error"
            }
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        Self::UpstreamCallFailure(e.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!(error = %self, status = status.as_u16(), "request failed");
        (
            status,
            Json(json!({
                "error": {
                    "message": self.to_string(),
                    "type": self.kind(),
                    "code": status.as_u16(),
                }
            })),
        )
            .into_response()
    }
}
