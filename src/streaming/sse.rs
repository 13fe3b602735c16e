use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::{Stream, StreamExt as _};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::sensor::{Decision, MachineState};
use crate::streaming::registry::RegisteredStream;

/// Broadcast payload for the sensor SSE feed; mirrors the two event types
/// in §4.7 ("sensor-state" and "decision").
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SensorSseEvent {
    SensorState { state: MachineState, sequence: usize, last_event_time_us: i64 },
    Decision { decision: Decision, at_us: i64 },
}

/// Fan-out hub for sensor SSE subscribers. A fresh `tokio::sync::broadcast`
/// channel; slow subscribers that lag past the channel capacity simply
/// miss old events (broadcast's standard lagged-receiver semantics), which
/// is acceptable since SSE reconnects resume from the monotonic event id.
pub struct SensorEventBus {
    tx: broadcast::Sender<(u64, SensorSseEvent)>,
    next_id: AtomicU64,
}

impl Default for SensorEventBus {
    fn default() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self { tx, next_id: AtomicU64::new(0) }
    }
}

impl SensorEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, event: SensorSseEvent) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.tx.send((id, event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(u64, SensorSseEvent)> {
        self.tx.subscribe()
    }
}

/// `text/event-stream` response: `event: sensor-state` / `event: decision`
/// payloads, keepalive comment every `heartbeat` seconds, reconnect id is
/// the monotonic event counter.
pub fn sensor_sse(
    bus: &SensorEventBus,
    stream: RegisteredStream,
    heartbeat: Duration,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = bus.subscribe();
    let cancel = stream.cancel_token();

    let events = BroadcastStream::new(rx).take_while(move |_| !cancel.is_cancelled()).map(
        move |item| match item {
            Ok((id, payload)) => {
                let event_name = match &payload {
                    SensorSseEvent::SensorState { .. } => "sensor-state",
                    SensorSseEvent::Decision { .. } => "decision",
                };
                let json = serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string());
                stream.record_write(json.len());
                Ok(Event::default().id(id.to_string()).event(event_name).data(json))
            }
            Err(_lagged) => {
                stream.record_error();
                Ok(Event::default().comment("lagged"))
            }
        },
    );

    Sse::new(events).keep_alive(
        KeepAlive::new().interval(heartbeat).text("keepalive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_assigns_monotonically_increasing_ids() {
        let bus = SensorEventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(SensorSseEvent::Decision { decision: Decision::Error, at_us: 1 });
        bus.publish(SensorSseEvent::Decision { decision: Decision::Error, at_us: 2 });
        let (id1, _) = rx.try_recv().unwrap();
        let (id2, _) = rx.try_recv().unwrap();
        assert!(id2 > id1);
    }
}
