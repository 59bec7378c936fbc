//! Static gateway configuration for nim-bridge.
//!
//! This is the startup layer: listen port, upstream endpoint and timeouts,
//! tunnel executable lookup. It is loaded once from a TOML file and validated
//! before the server opens any ports. Runtime-editable knobs (model, credential,
//! sampling defaults) live in [`crate::settings`] instead.
//!
//! Every section is optional; a missing file means "all defaults".
//!
//! # Example
//! ```toml
//! [gateway]
//! port = 3000
//! settings_path = "/data/nimb/settings.json"
//!
//! [upstream]
//! base_url             = "https://integrate.api.nvidia.com"
//! timeout_ms           = 120000
//! connect_timeout_ms   = 30000
//! accept_invalid_certs = false
//!
//! [tunnel]
//! executable      = "/opt/cloudflared/cloudflared"
//! hostname_marker = "trycloudflare.com"
//! ```

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Where translated chat requests are sent.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub tunnel: TunnelConfig,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&content).context("parsing config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when it exists, otherwise fall back to built-in defaults.
    ///
    /// A file that exists but fails to parse or validate is still an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.gateway.port != 0, "[gateway] port must be non-zero");
        anyhow::ensure!(
            !self.upstream.base_url.trim().is_empty(),
            "[upstream] base_url must not be empty"
        );
        anyhow::ensure!(
            self.upstream.timeout_ms > 0 && self.upstream.connect_timeout_ms > 0,
            "[upstream] timeouts must be non-zero"
        );
        anyhow::ensure!(
            self.upstream.connect_timeout_ms <= self.upstream.timeout_ms,
            "[upstream] connect_timeout_ms ({}) exceeds timeout_ms ({})",
            self.upstream.connect_timeout_ms,
            self.upstream.timeout_ms
        );
        anyhow::ensure!(
            !self.tunnel.hostname_marker.is_empty(),
            "[tunnel] hostname_marker must not be empty"
        );
        Ok(())
    }
}

/// Listener and persistence settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Port for both the control API and the OpenAI-compatible proxy (default: 3000).
    ///
    /// The tunnel is pointed at this same port.
    #[serde(default = "defaults::port")]
    pub port: u16,

    /// Interface to bind (default: `0.0.0.0`).
    #[serde(default = "defaults::bind")]
    pub bind: String,

    /// Location of the persisted runtime settings.
    ///
    /// Defaults to `~/.nimb/settings.json`.
    #[serde(default)]
    pub settings_path: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: defaults::port(),
            bind: defaults::bind(),
            settings_path: None,
        }
    }
}

impl GatewayConfig {
    pub fn settings_path(&self) -> PathBuf {
        self.settings_path.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".nimb")
                .join("settings.json")
        })
    }
}

/// The single upstream chat-completion service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Base URL without the `/v1/...` suffix.
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// Upper bound on the full round trip in milliseconds (default: 120 000).
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,

    /// Upper bound on connection establishment in milliseconds (default: 30 000).
    #[serde(default = "defaults::connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Skip TLS certificate verification for the upstream.
    ///
    /// Only meant for hosts without a usable trust store (e.g. some Android
    /// shells). Off unless explicitly enabled.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            timeout_ms: defaults::timeout_ms(),
            connect_timeout_ms: defaults::connect_timeout_ms(),
            accept_invalid_certs: false,
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Tunnel subprocess settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TunnelConfig {
    /// Explicit executable path, checked before the platform search list.
    #[serde(default)]
    pub executable: Option<PathBuf>,

    /// Text that must appear in a chunk of tunnel output before a URL is taken from it.
    #[serde(default = "defaults::hostname_marker")]
    pub hostname_marker: String,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            executable: None,
            hostname_marker: defaults::hostname_marker(),
        }
    }
}

mod defaults {
    pub fn port() -> u16 { 3000 }
    pub fn bind() -> String { "0.0.0.0".into() }
    pub fn base_url() -> String { "https://integrate.api.nvidia.com".into() }
    pub fn timeout_ms() -> u64 { 120_000 }
    pub fn connect_timeout_ms() -> u64 { 30_000 }
    pub fn hostname_marker() -> String { "trycloudflare.com".into() }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // Parsing & defaults
    // -----------------------------------------------------------------------

    #[test]
    fn empty_document_yields_all_defaults() {
        let config: Config = toml::from_str("").expect("empty config should parse");
        config.validate().expect("defaults should be valid");
        assert_eq!(config.gateway.port, 3000);
        assert_eq!(config.gateway.bind, "0.0.0.0");
        assert_eq!(config.upstream.base_url, "https://integrate.api.nvidia.com");
        assert_eq!(config.upstream.timeout_ms, 120_000);
        assert_eq!(config.upstream.connect_timeout_ms, 30_000);
        assert!(!config.upstream.accept_invalid_certs);
        assert_eq!(config.tunnel.hostname_marker, "trycloudflare.com");
        assert!(config.tunnel.executable.is_none());
    }

    #[test]
    fn partial_sections_keep_defaults_for_missing_keys() {
        let config: Config = toml::from_str(
            r#"
            [gateway]
            port = 8088

            [upstream]
            accept_invalid_certs = true
            "#,
        )
        .expect("should parse");
        assert_eq!(config.gateway.port, 8088);
        assert_eq!(config.gateway.bind, "0.0.0.0");
        assert!(config.upstream.accept_invalid_certs);
        assert_eq!(config.upstream.timeout(), Duration::from_secs(120));
        assert_eq!(config.upstream.connect_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn explicit_settings_path_is_used_verbatim() {
        let config: Config = toml::from_str(
            r#"
            [gateway]
            settings_path = "/tmp/nimb/settings.json"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.gateway.settings_path(),
            PathBuf::from("/tmp/nimb/settings.json")
        );
    }

    #[test]
    fn default_settings_path_ends_with_nimb_settings_json() {
        let path = GatewayConfig::default().settings_path();
        assert!(path.ends_with(".nimb/settings.json"), "got {}", path.display());
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    #[test]
    fn validation_rejects_zero_port() {
        let mut config = Config::default();
        config.gateway.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_empty_base_url() {
        let mut config = Config::default();
        config.upstream.base_url = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_connect_timeout_longer_than_total() {
        let mut config = Config::default();
        config.upstream.timeout_ms = 1_000;
        config.upstream.connect_timeout_ms = 5_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("connect_timeout_ms"), "got: {err}");
    }

    #[test]
    fn validation_rejects_empty_hostname_marker() {
        let mut config = Config::default();
        config.tunnel.hostname_marker.clear();
        assert!(config.validate().is_err());
    }

    // -----------------------------------------------------------------------
    // Loading from disk
    // -----------------------------------------------------------------------

    #[test]
    fn load_or_default_falls_back_when_file_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.gateway.port, 3000);
    }

    #[test]
    fn load_or_default_surfaces_parse_errors_for_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[gateway\nport = ").unwrap();
        assert!(Config::load_or_default(&path).is_err());
    }

    #[test]
    fn load_reads_tunnel_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[tunnel]\nexecutable = \"/opt/cf/cloudflared\"\nhostname_marker = \"example.net\"\n",
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.tunnel.executable.as_deref(),
            Some(Path::new("/opt/cf/cloudflared"))
        );
        assert_eq!(config.tunnel.hostname_marker, "example.net");
    }
}
