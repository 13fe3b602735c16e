pub mod camera;
pub mod file;
pub mod health;
pub mod image_cache;
pub mod inspections;
pub mod monitoring;
pub mod sensor;
pub mod streaming_config;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::cache::ImageCache;
use crate::camera::{CameraManager, RingBuffer};
use crate::config::Store as ConfigStore;
use crate::db::Database;
use crate::monitoring::Monitor;
use crate::sensor::SensorMachine;
use crate::streaming::{SensorEventBus, StreamRegistry};
use crate::watcher::InspectionWatcher;

pub struct AppStateInner {
    pub camera: Arc<CameraManager>,
    pub ring: Arc<RingBuffer>,
    pub sensor: Arc<parking_lot::Mutex<SensorMachine>>,
    pub sensor_bus: Arc<SensorEventBus>,
    pub registry: Arc<StreamRegistry>,
    pub cache: Arc<ImageCache>,
    pub db: Arc<Database>,
    pub watcher: Arc<InspectionWatcher>,
    pub monitor: Arc<Monitor>,
    pub config: Arc<ConfigStore>,
    pub inspection_root: PathBuf,
    pub shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct AppState(pub Arc<AppStateInner>);

impl std::ops::Deref for AppState {
    type Target = AppStateInner;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Assembles the full HTTP surface (§6), nesting one sub-router per
/// concern. CORS is permissive crate-wide; every request is traced at
/// `debug` level.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/camera", camera::router())
        .nest(
            "/api/stream",
            camera::stream_router()
                .merge(sensor::stream_router())
                .merge(inspections::stream_router())
                .merge(file::stream_router()),
        )
        .nest("/api/file", file::router())
        .nest("/api/image-cache", image_cache::router())
        .nest("/api/streaming/config", streaming_config::router())
        .nest("/api/streaming/monitoring", monitoring::router())
        .merge(inspections::router())
        .merge(health::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
