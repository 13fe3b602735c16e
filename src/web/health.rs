use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::monitoring::HealthStatus;
use crate::web::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health)).route("/api/health", get(health))
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let (status, components) = state.monitor.overall_health();
    let code = match status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (
        code,
        Json(json!({
            "status": status,
            "components": components,
        })),
    )
}
