use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Camera,
    Sse,
    File,
    Inspection,
    Analysis,
}

/// Per-stream counters, cheap to update from the producer without taking
/// the registry's lock.
#[derive(Debug, Default)]
pub struct StreamCounters {
    pub bytes_sent: AtomicU64,
    pub messages_sent: AtomicU64,
    pub errors: AtomicU64,
}

/// A live stream's registration. Created on client attach, retired on
/// detach or fatal error. The registry's size equals the number of live
/// producer tasks — no orphans (§3/§8).
pub struct StreamHandle {
    pub stream_id: Uuid,
    pub kind: StreamKind,
    pub client_endpoint: String,
    pub started_at: Instant,
    pub counters: StreamCounters,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamSnapshot {
    pub stream_id: Uuid,
    pub kind: StreamKind,
    pub client_endpoint: String,
    pub connection_duration_ms: u64,
    pub bytes_sent: u64,
    pub messages_sent: u64,
    pub errors: u64,
}

/// Guard returned by `StreamRegistry::register`; deregisters on drop so a
/// producer task that panics or returns early still retires its slot.
pub struct RegisteredStream {
    registry: std::sync::Arc<StreamRegistry>,
    pub handle: std::sync::Arc<StreamHandle>,
}

impl RegisteredStream {
    pub fn record_write(&self, bytes: usize) {
        self.handle.counters.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.handle.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.handle.counters.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.handle.cancel.clone()
    }
}

impl Drop for RegisteredStream {
    fn drop(&mut self) {
        self.registry.deregister(self.handle.stream_id);
    }
}

/// Registry of all live stream producers, keyed by `stream_id`. Guarded by
/// a single `parking_lot::Mutex`; never held across I/O.
pub struct StreamRegistry {
    streams: Mutex<HashMap<Uuid, std::sync::Arc<StreamHandle>>>,
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self { streams: Mutex::new(HashMap::new()) }
    }
}

impl StreamRegistry {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }

    pub fn register(
        self: &std::sync::Arc<Self>,
        kind: StreamKind,
        client_endpoint: impl Into<String>,
        parent_cancel: &CancellationToken,
    ) -> RegisteredStream {
        let handle = std::sync::Arc::new(StreamHandle {
            stream_id: Uuid::new_v4(),
            kind,
            client_endpoint: client_endpoint.into(),
            started_at: Instant::now(),
            counters: StreamCounters::default(),
            cancel: parent_cancel.child_token(),
        });
        self.streams.lock().insert(handle.stream_id, handle.clone());
        RegisteredStream { registry: self.clone(), handle }
    }

    fn deregister(&self, stream_id: Uuid) {
        self.streams.lock().remove(&stream_id);
    }

    pub fn len(&self) -> usize {
        self.streams.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<StreamSnapshot> {
        self.streams
            .lock()
            .values()
            .map(|h| StreamSnapshot {
                stream_id: h.stream_id,
                kind: h.kind,
                client_endpoint: h.client_endpoint.clone(),
                connection_duration_ms: h.started_at.elapsed().as_millis() as u64,
                bytes_sent: h.counters.bytes_sent.load(Ordering::Relaxed),
                messages_sent: h.counters.messages_sent.load(Ordering::Relaxed),
                errors: h.counters.errors.load(Ordering::Relaxed),
            })
            .collect()
    }

    pub fn count_by_kind(&self, kind: StreamKind) -> usize {
        self.streams.lock().values().filter(|h| h.kind == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_size_equals_live_handles() {
        let registry = StreamRegistry::new();
        let root = CancellationToken::new();
        {
            let _a = registry.register(StreamKind::Camera, "peer-a", &root);
            let _b = registry.register(StreamKind::Sse, "peer-b", &root);
            assert_eq!(registry.len(), 2);
        }
        assert_eq!(registry.len(), 0, "drop must deregister");
    }

    #[test]
    fn counters_accumulate_per_stream() {
        let registry = StreamRegistry::new();
        let root = CancellationToken::new();
        let stream = registry.register(StreamKind::File, "peer-c", &root);
        stream.record_write(128);
        stream.record_write(64);
        let snap = registry.snapshot();
        assert_eq!(snap[0].bytes_sent, 192);
        assert_eq!(snap[0].messages_sent, 2);
    }

    #[test]
    fn child_token_cancels_with_parent() {
        let registry = StreamRegistry::new();
        let root = CancellationToken::new();
        let stream = registry.register(StreamKind::Camera, "peer-d", &root);
        let child = stream.cancel_token();
        assert!(!child.is_cancelled());
        root.cancel();
        assert!(child.is_cancelled());
    }
}
