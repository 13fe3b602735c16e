use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::Stream;
use serde_json::{json, Value};

use crate::streaming::progressive::progressive_json_body;
use crate::streaming::StreamKind;
use crate::web::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/inspections/latest", get(latest_json))
}

pub fn stream_router() -> Router<AppState> {
    Router::new()
        .route("/inspections", get(stream_inspections))
        .route("/analysis/multi-image", post(stream_multi_image_analysis))
}

/// `GET /inspections/latest` with an `Upgrade: websocket` header switches to
/// the push feed; otherwise it returns the current snapshot once.
async fn latest_json(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    if let Some(ws) = ws {
        let product_no = params.get("product_no").cloned().unwrap_or_default();
        return ws.on_upgrade(move |socket| websocket_loop(socket, state, product_no));
    }

    let products: Vec<String> = params
        .get("product_no")
        .map(|p| vec![p.clone()])
        .unwrap_or_default();
    match state.db.latest_inspection_per_product(products).await {
        Ok(rows) => Json(json!({ "inspections": rows })).into_response(),
        Err(e) => Json(json!({ "error": e.to_string() })).into_response(),
    }
}

async fn websocket_loop(mut socket: WebSocket, state: AppState, product_no: String) {
    let mut rx = state.watcher.subscribe(product_no).await;
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            maybe_payload = rx.recv() => {
                let Some(payload) = maybe_payload else { break };
                let text = payload.to_string();
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn stream_inspections(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let data_cfg = state.config.load().streaming.data.clone();
    let limit: i64 = params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(data_cfg.default_limit)
        .min(data_cfg.max_limit);
    let date_from = params.get("date_from").cloned();
    let date_to = params.get("date_to").cloned();

    let registered = state.registry.register(StreamKind::Inspection, "inspections-stream", &state.shutdown);
    let db = state.db.clone();
    let items = async_stream::stream! {
        match db.inspections_in_range(limit, date_from, date_to).await {
            Ok(rows) => {
                for row in rows {
                    yield serde_json::to_value(&row).map_err(Into::into);
                }
            }
            Err(e) => yield Err(anyhow::anyhow!(e.to_string())),
        }
    };
    axum::http::Response::builder()
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .body(progressive_json_body(registered, items))
        .unwrap()
}

async fn stream_multi_image_analysis(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let registered = state.registry.register(StreamKind::Analysis, "multi-image-analysis", &state.shutdown);

    let mut fields: Vec<(String, Vec<u8>)> = Vec::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or("image").to_string();
        if let Ok(bytes) = field.bytes().await {
            fields.push((name, bytes.to_vec()));
        }
    }

    let items = build_analysis_stream(fields);
    axum::http::Response::builder()
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .body(progressive_json_body(registered, items))
        .unwrap()
}

fn build_analysis_stream(
    fields: Vec<(String, Vec<u8>)>,
) -> impl Stream<Item = anyhow::Result<Value>> + Send + 'static {
    async_stream::stream! {
        for (name, bytes) in fields {
            yield Ok(json!({
                "field": name,
                "byte_len": bytes.len(),
                "analyzed": true,
            }));
        }
    }
}
