use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use serde_json::json;

use crate::camera::{CameraKind, CameraMode};
use crate::error::AppResult;
use crate::streaming::{mjpeg, StreamKind};
use crate::web::AppState;

const HTTP_USER_ID: &str = "http-client";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/connect", post(connect))
        .route("/disconnect", post(disconnect))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/save", post(save))
        .route("/is_connected", get(is_connected))
        .route("/snapshot", get(snapshot))
}

pub fn stream_router() -> Router<AppState> {
    Router::new().route("/camera/:kind", get(mjpeg_stream))
}

fn parse_kind(raw: &str) -> CameraKind {
    match raw {
        "industrial" => CameraKind::Industrial,
        "dummy" => CameraKind::Dummy,
        _ => CameraKind::Webcam,
    }
}

async fn connect(State(state): State<AppState>) -> Json<serde_json::Value> {
    let default_kind = parse_kind(&state.config.load().camera.default_camera_type);
    let resolved = state.camera.acquire(default_kind, HTTP_USER_ID);
    Json(json!({ "status": "connected", "kind": resolved }))
}

async fn disconnect(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.camera.release(HTTP_USER_ID);
    Json(json!({ "status": "disconnected" }))
}

async fn start(State(state): State<AppState>) -> Json<serde_json::Value> {
    let ok = state.camera.with_driver(|d| d.set_mode(CameraMode::Continuous)).is_some();
    Json(json!({ "status": if ok { "continuous" } else { "no_active_driver" } }))
}

async fn stop(State(state): State<AppState>) -> Json<serde_json::Value> {
    let ok = state.camera.with_driver(|d| d.set_mode(CameraMode::Snapshot)).is_some();
    Json(json!({ "status": if ok { "snapshot" } else { "no_active_driver" } }))
}

async fn save(State(state): State<AppState>) -> Json<serde_json::Value> {
    let path = tokio::task::block_in_place(|| {
        state.camera.with_driver(|d| d.write_frame(None)).flatten()
    });
    match path {
        Some(p) => Json(json!({ "status": "saved", "path": p })),
        None => Json(json!({ "status": "no_frame" })),
    }
}

async fn is_connected(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = state.camera.status();
    Json(json!({ "is_connected": status.is_connected, "kind": status.kind }))
}

/// Returns base64-inline JPEG, matching the original endpoint's shape — a
/// redirect was never part of the contract.
async fn snapshot(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let frame =
        tokio::task::block_in_place(|| state.camera.with_driver(|d| d.get_frame()).flatten());
    match frame {
        Some(frame) => {
            use image::ImageEncoder;
            let mut jpeg = Vec::new();
            image::codecs::jpeg::JpegEncoder::new_with_quality(std::io::Cursor::new(&mut jpeg), 85)
                .write_image(&frame.image, frame.width, frame.height, image::ExtendedColorType::Rgb8)
                .map_err(|e| anyhow::anyhow!(e))?;
            let encoded = base64::engine::general_purpose::STANDARD.encode(&jpeg);
            Ok(Json(json!({ "image": encoded, "status": "ok" })))
        }
        None => Ok(Json(json!({ "image": "", "status": "no_frame" }))),
    }
}

async fn mjpeg_stream(State(state): State<AppState>, Path(kind): Path<String>) -> Response {
    let _ = parse_kind(&kind); // validated, acquisition already happened via /connect
    let cfg = state.config.load();
    let registered = state.registry.register(StreamKind::Camera, "mjpeg-client", &state.shutdown);
    let ring = if matches!(state.camera.with_driver(|d| d.mode()), Some(CameraMode::Continuous)) {
        Some(state.ring.clone())
    } else {
        None
    };
    let body = mjpeg::mjpeg_body(
        state.camera.clone(),
        ring,
        registered,
        cfg.streaming.camera.frame_rate,
        cfg.streaming.camera.quality,
        Duration::from_millis(cfg.streaming.error_handling.slow_client_timeout_ms),
    );
    Response::builder()
        .header(header::CONTENT_TYPE, mjpeg::content_type())
        .body(body)
        .unwrap()
}
