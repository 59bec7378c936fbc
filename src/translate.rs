//! OpenAI request → NIM request translation.
//!
//! The caller's body is reduced to an explicit set of fields:
//!
//! | Field | Source |
//! |---|---|
//! | `model` | always the configured model; the caller's value is informational |
//! | `messages` | caller, verbatim (required) |
//! | `temperature` / `max_tokens` / `stream` | caller if present and well-typed, else configured default |
//! | [`PASSTHROUGH_FIELDS`] | caller, verbatim, only if present |
//!
//! Anything else in the inbound body is dropped.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{error::GatewayError, settings::Settings};

/// Sampling and context parameters forwarded to the upstream untouched.
pub const PASSTHROUGH_FIELDS: [&str; 12] = [
    "top_p",
    "top_k",
    "frequency_penalty",
    "presence_penalty",
    "repetition_penalty",
    "min_p",
    "seed",
    "stop",
    "n",
    "context_length",
    "context_window",
    "truncate",
];

/// Body sent to the upstream `/v1/chat/completions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpstreamRequest {
    pub model: String,
    pub messages: Value,
    pub temperature: f64,
    pub max_tokens: u64,
    pub stream: bool,
    #[serde(flatten)]
    pub passthrough: Map<String, Value>,
}

/// The parts of the inbound body worth logging.
#[derive(Debug, Clone)]
pub struct Translation {
    /// The `model` the caller asked for, if any.
    pub requested_model: Option<String>,
    pub request: UpstreamRequest,
}

/// Translate a raw inbound body using the current settings.
///
/// Fails with [`GatewayError::ConfigurationError`] when no credential is set
/// (checked first, so nothing is parsed for a gateway that cannot forward),
/// and with [`GatewayError::MalformedRequest`] when the body is not a JSON
/// object carrying `messages`.
pub fn translate(body: &[u8], settings: &Settings) -> Result<Translation, GatewayError> {
    if !settings.has_api_key() {
        return Err(GatewayError::ConfigurationError);
    }

    let inbound: Value =
        serde_json::from_slice(body).map_err(|e| GatewayError::MalformedRequest(e.to_string()))?;
    let Value::Object(mut inbound) = inbound else {
        return Err(GatewayError::MalformedRequest(
            "request body must be a JSON object".into(),
        ));
    };

    let messages = inbound
        .remove("messages")
        .ok_or_else(|| GatewayError::MalformedRequest("`messages` field is required".into()))?;

    let requested_model = inbound
        .get("model")
        .and_then(Value::as_str)
        .map(str::to_owned);

    let temperature = inbound
        .get("temperature")
        .and_then(Value::as_f64)
        .unwrap_or(settings.temperature);

    let max_tokens = inbound
        .get("max_tokens")
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)))
        .unwrap_or(settings.max_tokens);

    let stream = inbound
        .get("stream")
        .and_then(Value::as_bool)
        .unwrap_or(settings.streaming_enabled);

    let mut passthrough = Map::new();
    for key in PASSTHROUGH_FIELDS {
        if let Some(value) = inbound.remove(key) {
            passthrough.insert(key.to_owned(), value);
        }
    }

    Ok(Translation {
        requested_model,
        request: UpstreamRequest {
            model: settings.current_model.clone(),
            messages,
            temperature,
            max_tokens,
            stream,
            passthrough,
        },
    })
}
