//! HTTP client for the upstream NIM chat-completions API.
//!
//! One [`UpstreamClient`] is built at startup and shared; [`reqwest::Client`]
//! pools connections internally. The credential is supplied per call because
//! it can change at runtime through the control API.

use std::time::Duration;

use anyhow::Context;
use reqwest::{header, Client, Response};

use crate::{config::UpstreamConfig, error::GatewayError, translate::UpstreamRequest};

pub struct UpstreamClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl UpstreamClient {
    /// Build the client from the `[upstream]` section.
    ///
    /// The connect timeout is set on the client; the total round-trip bound is
    /// applied per request in [`chat_completions`](Self::chat_completions).
    pub fn new(cfg: &UpstreamConfig) -> anyhow::Result<Self> {
        let mut builder = Client::builder().connect_timeout(cfg.connect_timeout());

        if cfg.accept_invalid_certs {
            tracing::warn!(
                base_url = %cfg.base_url,
                "upstream TLS certificate verification is DISABLED"
            );
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            timeout: cfg.timeout(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    /// POST a translated request and return the raw response, whatever its status.
    ///
    /// Buffered requests carry the total timeout for the whole exchange,
    /// body included. Streaming requests are bounded only until the response
    /// head arrives, so a long generation is not cut off mid-stream.
    ///
    /// # Errors
    /// [`GatewayError::UpstreamCallFailure`] when no response could be obtained
    /// (connect failure, timeout, TLS error). A non-2xx status is not an error.
    pub async fn chat_completions(
        &self,
        api_key: &str,
        body: &UpstreamRequest,
    ) -> Result<Response, GatewayError> {
        let request = self
            .client
            .post(self.endpoint())
            .header(header::AUTHORIZATION, format!("Bearer {api_key}"))
            .json(body);

        if body.stream {
            tokio::time::timeout(self.timeout, request.send())
                .await
                .map_err(|_| {
                    GatewayError::UpstreamCallFailure(format!(
                        "upstream did not respond within {}s",
                        self.timeout.as_secs()
                    ))
                })?
                .map_err(GatewayError::from)
        } else {
            request.timeout(self.timeout).send().await.map_err(GatewayError::from)
        }
    }
}
