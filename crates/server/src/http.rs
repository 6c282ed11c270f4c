//! Metrics/health HTTP server
//!
//! Bound to its own port, separate from the WebSocket listener.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::metrics::{prometheus_handle, refresh_pipeline_gauges};
use crate::state::AppState;

/// Build the metrics/health router
pub fn metrics_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Liveness: the transport accepts connections, the STT worker pool is
/// responsive, and at least one TTS engine is loadable.
async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let mut checks = serde_json::Map::new();
    let mut healthy = true;

    let accepting = state.is_accepting();
    checks.insert(
        "transport".to_string(),
        serde_json::json!({ "status": if accepting { "ok" } else { "down" } }),
    );
    healthy &= accepting;

    let stt_ok = state.stt.is_responsive();
    checks.insert(
        "stt_pool".to_string(),
        serde_json::json!({
            "status": if stt_ok { "ok" } else { "busy" },
            "model": state.stt.current_model(),
            "gpu": state.stt.gpu_available(),
        }),
    );
    healthy &= stt_ok;

    let tts_ok = state.registry.probe().await;
    checks.insert(
        "tts_engines".to_string(),
        serde_json::json!({
            "status": if tts_ok { "ok" } else { "none_loadable" },
        }),
    );
    healthy &= tts_ok;

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(serde_json::json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "version": env!("CARGO_PKG_VERSION"),
            "sessions": state.sessions.count(),
            "checks": checks,
        })),
    )
}

/// Prometheus scrape endpoint
async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    refresh_pipeline_gauges(&state);
    match prometheus_handle() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not initialized\n".to_string(),
        ),
    }
}
