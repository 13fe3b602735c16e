use std::collections::HashMap;
use std::path::PathBuf;

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::cache::Variant;
use crate::error::{AppError, AppResult};
use crate::resolver;
use crate::streaming::file::stream_file;
use crate::streaming::StreamKind;
use crate::web::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(serve_file)).route("/check", get(check_file))
}

pub fn stream_router() -> Router<AppState> {
    Router::new().route("/file", get(stream_file_handler))
}

fn wants_jpg(params: &HashMap<String, String>) -> bool {
    params.get("convert").map(|v| v == "jpg").unwrap_or(false)
}

fn resolve_or_404(path: &str, root: &std::path::Path) -> AppResult<PathBuf> {
    let outcome = resolver::resolve(path, root);
    outcome.found.ok_or(AppError::FileNotFound { attempted: outcome.attempted })
}

async fn serve_file(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<Response> {
    let path = params.get("path").cloned().unwrap_or_default();
    let resolved = resolve_or_404(&path, &state.inspection_root)?;
    let convert = wants_jpg(&params);

    let is_bmp = resolved
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("bmp"))
        .unwrap_or(false);

    if convert && is_bmp {
        let entry = state
            .cache
            .get_or_create(&resolved, Variant::Jpg)
            .map_err(|e| AppError::CacheIo(e.to_string()))?;
        let bytes = tokio::fs::read(&entry.cache_path)
            .await
            .map_err(|e| AppError::CacheIo(e.to_string()))?;
        return Ok(([(header::CONTENT_TYPE, entry.content_type)], bytes).into_response());
    }

    let bytes = tokio::fs::read(&resolved)
        .await
        .map_err(|_| AppError::FileNotFound { attempted: vec![resolved.clone()] })?;
    let content_type = guess_content_type(&resolved);
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

async fn check_file(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let path = params.get("path").cloned().unwrap_or_default();
    let outcome = resolver::resolve(&path, &state.inspection_root);
    Json(json!({
        "found": outcome.found.is_some(),
        "resolved_path": outcome.found,
        "attempted": outcome.attempted,
    }))
}

async fn stream_file_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<Response> {
    let path = params.get("path").cloned().unwrap_or_default();
    let resolved = resolve_or_404(&path, &state.inspection_root)?;
    let convert = wants_jpg(&params);

    let registered = state.registry.register(StreamKind::File, "file-stream-client", &state.shutdown);
    let resp = stream_file(&resolved, convert, &state.cache, registered).await?;
    Ok(([(header::CONTENT_TYPE, resp.content_type)], resp.body).into_response())
}

fn guess_content_type(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase().as_str() {
        "bmp" => "image/bmp",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        _ => "application/octet-stream",
    }
}
