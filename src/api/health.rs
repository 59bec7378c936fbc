//! Combined status endpoint, served on `/health` and `/api/health`.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::state::AppState;

/// `GET /api/health`: settings (credential redacted), statistics, tunnel
/// state and uptime in one document. Never fails; safe as a liveness probe.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.store.read();
    let tunnel = state.tunnel.status();
    let configured = snapshot.settings.has_api_key();

    Json(json!({
        "status": "ok",
        "service": "NIM Bridge",
        "model": snapshot.settings.current_model,
        "api_key_configured": configured,
        "config": snapshot.settings.redacted(),
        "stats": snapshot.stats,
        "tunnel": tunnel,
        "uptime": state.started_at.elapsed().as_secs(),
        "setupComplete": configured,
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use tower::ServiceExt; // oneshot

    use crate::api::test_support::{body_json, fixture, fixture_with_key, get};

    #[tokio::test]
    async fn health_reports_unconfigured_gateway() {
        let f = fixture("http://127.0.0.1:1");
        let resp = f.router().oneshot(get("/api/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp.into_body()).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["service"], "NIM Bridge");
        assert_eq!(json["model"], "deepseek-ai/deepseek-v3.2");
        assert_eq!(json["api_key_configured"], false);
        assert_eq!(json["setupComplete"], false);
        assert_eq!(json["tunnel"]["status"], "stopped");
        assert_eq!(json["tunnel"]["url"], "");
        assert_eq!(json["stats"]["messageCount"], 0);
        assert!(json["uptime"].is_u64());
    }

    #[tokio::test]
    async fn health_never_leaks_the_credential() {
        let f = fixture_with_key("http://127.0.0.1:1");
        let resp = f.router().oneshot(get("/health")).await.unwrap();
        let json = body_json(resp.into_body()).await;

        assert_eq!(json["api_key_configured"], true);
        assert_eq!(json["setupComplete"], true);
        assert_eq!(json["config"]["apiKeyConfigured"], true);
        assert!(json["config"].get("apiKey").is_none());
        assert!(!json.to_string().contains("nvapi-test"));
    }

    #[tokio::test]
    async fn health_reflects_recorded_errors() {
        let f = fixture("http://127.0.0.1:1");
        f.state.store.record_error("boom", 500);
        let resp = f.router().oneshot(get("/api/health")).await.unwrap();
        let json = body_json(resp.into_body()).await;
        assert_eq!(json["stats"]["errorCount"], 1);
        assert_eq!(json["stats"]["errorLog"][0]["message"], "boom");
    }
}
