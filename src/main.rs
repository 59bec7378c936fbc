use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use tokio::signal;
use tracing::info;

mod api;
mod config;
mod error;
mod relay;
mod settings;
mod state;
mod stats;
mod translate;
mod tunnel;
mod upstream;

use config::Config;
use settings::SettingsFile;
use state::AppState;
use tunnel::{Launch, TunnelHandle};
use upstream::UpstreamClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Container HEALTHCHECK: probe /api/health and exit without starting a server.
    if std::env::args().nth(1).as_deref() == Some("--healthcheck") {
        return healthcheck().await;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nim_bridge=info,tower_http=warn".into()),
        )
        .init();

    let config = load_config()?;
    let config = Arc::new(config);

    let settings_file = SettingsFile::new(config.gateway.settings_path());
    let upstream = UpstreamClient::new(&config.upstream)?;
    let tunnel = TunnelHandle::spawn(Launch::cloudflared(&config.tunnel, config.gateway.port));

    let state = Arc::new(AppState::new(
        Arc::clone(&config),
        settings_file,
        upstream,
        tunnel,
    ));

    {
        let settings = state.store.settings();
        info!(
            port = state.config.gateway.port,
            upstream = %state.upstream.endpoint(),
            model = %settings.current_model,
            api_key_configured = settings.has_api_key(),
            settings = %state.settings_file.path().display(),
            "nim-bridge starting"
        );
        if !settings.has_api_key() {
            info!("no API key configured yet; set one via POST /api/apikey");
        }
    }

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port)
        .parse()
        .with_context(|| format!("invalid listen address {}", config.gateway.bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");

    let app = api::router(Arc::clone(&state)).layer(
        tower_http::trace::TraceLayer::new_for_http()
            .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
            .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO)),
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let tunnel = state.tunnel.status();
    if tunnel.has_process {
        info!(pid = ?tunnel.pid, url = %tunnel.url, "shutting down; stopping tunnel");
        state.tunnel.stop().await;
    }
    Ok(())
}

/// `NIMB_CONFIG` must point at a readable file when set; otherwise
/// `~/.nimb/config.toml` is used if present, else built-in defaults.
fn load_config() -> anyhow::Result<Config> {
    match std::env::var("NIMB_CONFIG") {
        Ok(path) => {
            let path = PathBuf::from(path);
            Config::load(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))
        }
        Err(_) => {
            let path = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".nimb")
                .join("config.toml");
            Config::load_or_default(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

/// GET /api/health on the configured port; exit 0 on 200, 1 otherwise.
async fn healthcheck() -> anyhow::Result<()> {
    let port = load_config().map(|c| c.gateway.port).unwrap_or(3000);
    let url = format!("http://127.0.0.1:{port}/api/health");

    match reqwest::get(&url).await {
        Ok(resp) if resp.status().is_success() => std::process::exit(0),
        _ => std::process::exit(1),
    }
}
