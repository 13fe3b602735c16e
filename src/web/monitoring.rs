use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::monitoring::{classify_stream_kind_label, ComponentHealth, HealthStatus};
use crate::streaming::StreamKind;
use crate::web::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/stats/summary", get(stats_summary))
        .route("/start", post(start))
        .route("/stop", post(stop))
}

async fn metrics(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshot = state.registry.snapshot();
    let system = state.monitor.last_system_metrics();
    Json(json!({ "streams": snapshot, "system": system }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let (status, components) = state.monitor.overall_health();
    Json(json!({ "status": status, "components": components }))
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let per_kind: Vec<(&'static str, usize)> = [
        StreamKind::Camera,
        StreamKind::Sse,
        StreamKind::File,
        StreamKind::Inspection,
        StreamKind::Analysis,
    ]
    .into_iter()
    .map(|k| (classify_stream_kind_label(k), state.registry.count_by_kind(k)))
    .collect();
    Json(json!({ "active_streams": state.registry.len(), "by_kind": per_kind.into_iter().collect::<std::collections::HashMap<_, _>>() }))
}

async fn stats_summary(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshot = state.registry.snapshot();
    let total_bytes: u64 = snapshot.iter().map(|s| s.bytes_sent).sum();
    let total_errors: u64 = snapshot.iter().map(|s| s.errors).sum();
    Json(json!({
        "active_streams": snapshot.len(),
        "total_bytes_sent": total_bytes,
        "total_errors": total_errors,
    }))
}

/// No-op toggles: metrics sampling runs continuously on its own interval
/// (§4.10); these exist for API-surface parity with the original control
/// endpoints.
async fn start(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.monitor.set_component_health(
        "monitoring",
        ComponentHealth { status: HealthStatus::Healthy, details: "monitoring active".to_string() },
    );
    Json(json!({ "status": "started" }))
}

async fn stop(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.monitor.set_component_health(
        "monitoring",
        ComponentHealth { status: HealthStatus::Degraded, details: "monitoring stopped by operator".to_string() },
    );
    Json(json!({ "status": "stopped" }))
}
