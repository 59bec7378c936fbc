//! Cumulative usage statistics and the bounded error log.
//!
//! [`ErrorLog`] is a fixed-capacity ring-buffer kept newest-first: an insert
//! goes to the front and anything past [`ERROR_LOG_CAPACITY`] falls off the
//! back, so memory stays bounded regardless of how often the upstream fails.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum number of [`ErrorEntry`] records retained.
pub const ERROR_LOG_CAPACITY: usize = 50;

/// Usage counters since startup or the last reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub message_count: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub error_count: u64,
    pub last_request_time: Option<DateTime<Utc>>,
    pub start_time: DateTime<Utc>,
    pub error_log: ErrorLog,
}

impl Statistics {
    /// A fresh record: zero counters, empty log, start time now.
    pub fn new() -> Self {
        Self {
            message_count: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            error_count: 0,
            last_request_time: None,
            start_time: Utc::now(),
            error_log: ErrorLog::default(),
        }
    }

    /// Count one request that reached the upstream.
    pub fn record_request(&mut self) {
        self.message_count = self.message_count.saturating_add(1);
        self.last_request_time = Some(Utc::now());
    }

    /// Add the token counts reported by one upstream response.
    ///
    /// Counts come from the upstream, so every counter saturates at `u64::MAX`.
    pub fn add_usage(&mut self, usage: &Usage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(usage.prompt_tokens.unwrap_or(0));
        self.completion_tokens = self
            .completion_tokens
            .saturating_add(usage.completion_tokens.unwrap_or(0));
        self.total_tokens = self.total_tokens.saturating_add(usage.total_tokens.unwrap_or(0));
    }

    /// Log a failure and bump the error counter.
    pub fn record_error(&mut self, message: impl Into<String>, code: u16) {
        self.error_count = self.error_count.saturating_add(1);
        self.error_log.push(ErrorEntry::new(message, code));
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

/// A single recorded failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    /// HTTP-style status the failure was surfaced with.
    pub code: u16,
}

impl ErrorEntry {
    pub fn new(message: impl Into<String>, code: u16) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            code,
        }
    }
}

/// Newest-first, capped list of [`ErrorEntry`] records.
///
/// Serializes as a plain JSON array.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorLog(VecDeque<ErrorEntry>);

impl ErrorLog {
    pub fn push(&mut self, entry: ErrorEntry) {
        self.0.push_front(entry);
        self.0.truncate(ERROR_LOG_CAPACITY);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &ErrorEntry> {
        self.0.iter()
    }
}

/// Token accounting block of a chat-completion response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

impl Usage {
    /// Pull `usage` out of a response body.
    ///
    /// Returns `None` when there is no `usage` object. Individual counters that
    /// are missing or non-numeric are left as `None` and contribute nothing.
    pub fn from_response(body: &Value) -> Option<Self> {
        let usage = body.get("usage")?.as_object()?;
        let field = |name: &str| {
            usage
                .get(name)
                .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)))
        };
        Some(Self {
            prompt_tokens: field("prompt_tokens"),
            completion_tokens: field("completion_tokens"),
            total_tokens: field("total_tokens"),
        })
    }
}
