use std::time::Duration;

use axum::extract::State;
use axum::response::sse::Sse;
use axum::routing::get;
use axum::Router;

use crate::streaming::{sse::sensor_sse, StreamKind};
use crate::web::AppState;

pub fn stream_router() -> Router<AppState> {
    Router::new().route("/sensor/status", get(status))
}

async fn status(State(state): State<AppState>) -> Sse<impl futures_util::Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>> {
    let cfg = state.config.load();
    let registered = state.registry.register(StreamKind::Sse, "sse-client", &state.shutdown);
    sensor_sse(&state.sensor_bus, registered, Duration::from_secs(cfg.streaming.sse.heartbeat_sec as u64))
}
