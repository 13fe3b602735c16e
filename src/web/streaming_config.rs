use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::web::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_all).put(put_all))
        .route("/:section", get(get_section).put(put_section))
        .route("/reload", post(reload))
        .route("/validate", post(validate))
        .route("/reset", post(reset))
}

async fn get_all(State(state): State<AppState>) -> Json<Config> {
    Json((*state.config.load()).clone())
}

async fn get_section(State(state): State<AppState>, Path(section): Path<String>) -> AppResult<Json<Value>> {
    let cfg = state.config.load();
    section_value(&cfg, &section)
}

fn section_value(cfg: &Config, section: &str) -> AppResult<Json<Value>> {
    let value = match section {
        "camera" => serde_json::to_value(&cfg.camera),
        "sensor" => serde_json::to_value(&cfg.sensor),
        "ui" => serde_json::to_value(&cfg.ui),
        "logging" => serde_json::to_value(&cfg.logging),
        "streaming" => serde_json::to_value(&cfg.streaming),
        "data" => serde_json::to_value(&cfg.streaming.data),
        other => {
            return Err(AppError::ConfigValidation {
                violations: vec![format!("unknown configuration section '{other}'")],
            })
        }
    };
    Ok(Json(value.unwrap_or(Value::Null)))
}

async fn put_all(State(state): State<AppState>, Json(candidate): Json<Config>) -> AppResult<Json<Value>> {
    state
        .config
        .update(candidate)
        .map_err(|violations| AppError::ConfigValidation { violations })?;
    Ok(Json(json!({ "status": "updated" })))
}

/// Merges a partial section update into the running config, validates the
/// whole candidate, then swaps atomically — or rejects, leaving the active
/// config untouched.
async fn put_section(
    State(state): State<AppState>,
    Path(section): Path<String>,
    Json(patch): Json<Value>,
) -> AppResult<Json<Value>> {
    let mut candidate = (*state.config.load()).clone();
    merge_section(&mut candidate, &section, patch)?;
    state
        .config
        .update(candidate)
        .map_err(|violations| AppError::ConfigValidation { violations })?;
    Ok(Json(json!({ "status": "updated", "section": section })))
}

fn merge_section(candidate: &mut Config, section: &str, patch: Value) -> AppResult<()> {
    let err = |other: &str| {
        AppError::ConfigValidation { violations: vec![format!("unknown configuration section '{other}'")] }
    };
    match section {
        "camera" => candidate.camera = serde_json::from_value(patch).map_err(|e| AppError::ConfigValidation { violations: vec![e.to_string()] })?,
        "sensor" => candidate.sensor = serde_json::from_value(patch).map_err(|e| AppError::ConfigValidation { violations: vec![e.to_string()] })?,
        "ui" => candidate.ui = serde_json::from_value(patch).map_err(|e| AppError::ConfigValidation { violations: vec![e.to_string()] })?,
        "logging" => candidate.logging = serde_json::from_value(patch).map_err(|e| AppError::ConfigValidation { violations: vec![e.to_string()] })?,
        "streaming" => candidate.streaming = serde_json::from_value(patch).map_err(|e| AppError::ConfigValidation { violations: vec![e.to_string()] })?,
        "data" => candidate.streaming.data = serde_json::from_value(patch).map_err(|e| AppError::ConfigValidation { violations: vec![e.to_string()] })?,
        other => return Err(err(other)),
    }
    Ok(())
}

async fn reload(State(state): State<AppState>) -> AppResult<Json<Value>> {
    state.config.reload_from_file().map_err(|e| AppError::ConfigValidation { violations: vec![e.to_string()] })?;
    Ok(Json(json!({ "status": "reloaded" })))
}

/// Dry-run: validates the candidate but never swaps the active config,
/// unlike `PUT`.
async fn validate(Json(candidate): Json<Config>) -> Json<Value> {
    let violations = candidate.validate();
    Json(json!({ "valid": violations.is_empty(), "violations": violations }))
}

async fn reset(State(state): State<AppState>) -> AppResult<Json<Value>> {
    state
        .config
        .update(Config::default())
        .map_err(|violations| AppError::ConfigValidation { violations })?;
    Ok(Json(json!({ "status": "reset" })))
}
