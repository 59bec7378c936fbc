//! Upstream response → caller.
//!
//! Two paths:
//!
//! - **Streaming**: bytes are forwarded chunk by chunk as they arrive. A
//!   background task pumps the upstream body into a channel that backs the
//!   caller's response body; when the caller goes away the next send fails,
//!   the task returns and the upstream response (and its connection) is dropped.
//! - **Buffered**: the whole body is read, `usage` is folded into the
//!   statistics when present, and the original status and bytes are returned
//!   unmodified. A body that is not JSON is still forwarded.

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::StreamExt as _;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{error::GatewayError, state::StateStore, stats::Usage};

/// Channel depth between the upstream reader and the caller's body.
const RELAY_BUFFER: usize = 32;

/// Relay `upstream` to the caller.
///
/// The request has already been counted by the caller of this function.
pub async fn relay(
    upstream: reqwest::Response,
    stream: bool,
    store: &StateStore,
) -> Result<Response, GatewayError> {
    if stream {
        Ok(relay_stream(upstream))
    } else {
        relay_buffered(upstream, store).await
    }
}

fn relay_stream(upstream: reqwest::Response) -> Response {
    let status = status_of(&upstream);
    let (tx, mut rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(RELAY_BUFFER);

    tokio::spawn(async move {
        let mut byte_stream = upstream.bytes_stream();
        let mut forwarded = 0usize;

        while let Some(chunk) = byte_stream.next().await {
            match chunk {
                Ok(bytes) => {
                    forwarded += bytes.len();
                    if tx.send(Ok(bytes)).await.is_err() {
                        debug!(forwarded, "caller disconnected; dropping upstream stream");
                        return;
                    }
                }
                Err(e) => {
                    warn!(error = %e, forwarded, "upstream stream ended with error");
                    let _ = tx.send(Err(std::io::Error::other(e))).await;
                    return;
                }
            }
        }
        debug!(forwarded, "upstream stream complete");
    });

    let body = Body::from_stream(futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)));

    let mut response = (status, body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

async fn relay_buffered(
    upstream: reqwest::Response,
    store: &StateStore,
) -> Result<Response, GatewayError> {
    let status = status_of(&upstream);
    let content_type = upstream
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| HeaderValue::from_bytes(v.as_bytes()).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));
    let body = upstream.bytes().await?;

    match serde_json::from_slice::<Value>(&body) {
        Ok(json) => {
            if let Some(usage) = Usage::from_response(&json) {
                store.add_usage(&usage);
            }
        }
        Err(e) => debug!(error = %e, %status, "upstream body is not JSON; forwarding as-is"),
    }

    Ok((status, [(header::CONTENT_TYPE, content_type)], body).into_response())
}

/// reqwest and axum can sit on different `http` versions; go through the code.
fn status_of(upstream: &reqwest::Response) -> StatusCode {
    StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY)
}
