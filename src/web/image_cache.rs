use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::cache::Variant;
use crate::error::{AppError, AppResult};
use crate::web::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/image", get(image))
        .route("/stats", get(stats))
        .route("/cleanup", post(cleanup))
}

async fn image(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<Response> {
    let path = params.get("path").cloned().unwrap_or_default();
    let source = state
        .inspection_root
        .join(&path)
        .canonicalize()
        .unwrap_or_else(|_| state.inspection_root.join(&path));

    let entry = state
        .cache
        .get_or_create(&source, Variant::Jpg)
        .map_err(|_| AppError::FileNotFound { attempted: vec![source.clone()] })?;
    let bytes = tokio::fs::read(&entry.cache_path)
        .await
        .map_err(|e| AppError::CacheIo(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, entry.content_type)], bytes).into_response())
}

/// Read-only: never triggers eviction. Separate from `/cleanup`, which is
/// the only mutating entry point.
async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!(state.cache.stats()))
}

async fn cleanup(State(state): State<AppState>) -> Json<serde_json::Value> {
    let removed = state.cache.cleanup();
    Json(json!({ "removed": removed }))
}
