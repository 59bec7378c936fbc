//! Shared gateway state.
//!
//! [`StateStore`] owns the live [`Settings`] and [`Statistics`] behind a single
//! reader/writer lock. Every operation takes the lock, touches memory only and
//! releases it: nothing that awaits (body reads, upstream calls, file writes)
//! ever runs while the lock is held.
//!
//! [`AppState`] bundles the store with the other process-lifetime collaborators
//! and is injected into every handler via [`axum::extract::State`].

use std::{
    sync::{Arc, RwLock},
    time::Instant,
};

use crate::{
    config::Config,
    settings::{Settings, SettingsFile},
    stats::{Statistics, Usage},
    tunnel::TunnelHandle,
    upstream::UpstreamClient,
};

/// A consistent point-in-time copy of settings and statistics.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub settings: Settings,
    pub stats: Statistics,
}

/// Settings + statistics under one lock.
#[derive(Debug)]
pub struct StateStore {
    inner: RwLock<Snapshot>,
}

impl StateStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: RwLock::new(Snapshot {
                settings,
                stats: Statistics::new(),
            }),
        }
    }

    /// Clone out the current state. Never observes a half-applied update.
    pub fn read(&self) -> Snapshot {
        self.inner.read().expect("state lock poisoned").clone()
    }

    /// Clone out only the settings.
    pub fn settings(&self) -> Settings {
        self.inner.read().expect("state lock poisoned").settings.clone()
    }

    /// Clone out only the statistics.
    pub fn stats(&self) -> Statistics {
        self.inner.read().expect("state lock poisoned").stats.clone()
    }

    /// Apply `f` with exclusive access and return its result.
    ///
    /// `f` must be quick and must not block; it runs with the write lock held.
    pub fn update<R>(&self, f: impl FnOnce(&mut Snapshot) -> R) -> R {
        let mut guard = self.inner.write().expect("state lock poisoned");
        f(&mut guard)
    }

    /// Replace the settings, keeping the stored credential when `incoming`
    /// has none. Returns the resulting settings.
    pub fn save_settings(&self, incoming: Settings) -> Settings {
        self.update(|s| {
            s.settings.merge_save(incoming);
            s.settings.clone()
        })
    }

    pub fn set_model(&self, model: String) -> Settings {
        self.update(|s| {
            s.settings.current_model = model;
            s.settings.clone()
        })
    }

    /// Set the credential verbatim; an empty string clears it.
    pub fn set_api_key(&self, key: String) -> Settings {
        self.update(|s| {
            s.settings.api_key = key;
            s.settings.clone()
        })
    }

    /// Swap in a fresh statistics record (new start time, empty error log).
    pub fn reset_statistics(&self) {
        self.update(|s| s.stats = Statistics::new());
    }

    pub fn record_request(&self) {
        self.update(|s| s.stats.record_request());
    }

    pub fn add_usage(&self, usage: &Usage) {
        self.update(|s| s.stats.add_usage(usage));
    }

    /// Prepend an error entry, bump the error count and cap the log in one step.
    pub fn record_error(&self, message: impl Into<String>, code: u16) {
        let message = message.into();
        self.update(|s| s.stats.record_error(message, code));
    }
}

/// Shared application state injected into every request handler.
pub struct AppState {
    pub config: Arc<Config>,
    pub store: StateStore,
    pub settings_file: SettingsFile,
    pub upstream: UpstreamClient,
    pub tunnel: TunnelHandle,
    /// Gateway start time, for the `uptime` field of the health endpoint.
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        settings_file: SettingsFile,
        upstream: UpstreamClient,
        tunnel: TunnelHandle,
    ) -> Self {
        let settings = settings_file.load().unwrap_or_default();
        Self {
            config,
            store: StateStore::new(settings),
            settings_file,
            upstream,
            tunnel,
            started_at: Instant::now(),
        }
    }

    /// Write the current settings to disk, logging rather than propagating
    /// failures. Returns whether the write succeeded.
    ///
    /// The snapshot is taken under the settings file's write lock, so
    /// concurrent saves can never leave an older state on disk.
    pub async fn persist(&self) -> bool {
        match self.settings_file.save_latest(|| self.store.settings()).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    path = %self.settings_file.path().display(),
                    error = %e,
                    "failed to persist settings"
                );
                false
            }
        }
    }
}
