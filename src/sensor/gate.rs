use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{error, info};

use crate::camera::manager::CameraManager;
use crate::sensor::machine::{Decision, DecisionSink, Notification};

/// Emitted when the gate has persisted (or failed to persist) a
/// `pass-L->R` capture.
#[derive(Debug, Clone)]
pub struct PersistEvent {
    pub path: Option<PathBuf>,
    pub succeeded: bool,
}

pub trait PersistSink: Send + Sync {
    fn on_persist(&self, event: PersistEvent);
}

/// Bridges sensor decisions to the camera driver, persisting only
/// `pass-L->R` captures. Guarantees at-most-one persisted artifact per
/// `pass-L->R` decision; every other terminal decision discards any
/// buffered frames for that pass.
pub struct CaptureGate {
    camera: Arc<CameraManager>,
    inspection_root: PathBuf,
    persist_sink: Arc<dyn PersistSink>,
    last_path: Mutex<Option<PathBuf>>,
}

impl CaptureGate {
    pub fn new(
        camera: Arc<CameraManager>,
        inspection_root: impl Into<PathBuf>,
        persist_sink: Arc<dyn PersistSink>,
    ) -> Self {
        Self {
            camera,
            inspection_root: inspection_root.into(),
            persist_sink,
            last_path: Mutex::new(None),
        }
    }

    fn dated_dir(&self) -> PathBuf {
        self.inspection_root.join(Utc::now().format("%Y%m%d").to_string())
    }
}

impl DecisionSink for CaptureGate {
    fn notify(&self, notification: Notification) {
        let Some(decision) = notification.decision else {
            return;
        };

        if decision == Decision::PassLeftToRight {
            let dir = self.dated_dir();
            let camera = &self.camera;
            let path = tokio::task::block_in_place(|| {
                camera.with_driver(|driver| driver.write_frame(Some(&dir))).flatten()
            });
            match &path {
                Some(p) => info!(path = %p.display(), "pass-L->R persisted"),
                None => error!("pass-L->R capture failed to write a frame"),
            }
            *self.last_path.lock() = path.clone();
            self.persist_sink.on_persist(PersistEvent {
                succeeded: path.is_some(),
                path,
            });
        } else {
            // Any other terminal decision discards buffered frames for this pass.
            *self.last_path.lock() = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSink {
        persists: AtomicUsize,
        successes: AtomicUsize,
    }

    impl PersistSink for CountingSink {
        fn on_persist(&self, event: PersistEvent) {
            self.persists.fetch_add(1, Ordering::SeqCst);
            if event.succeeded {
                self.successes.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    // notify() calls tokio::task::block_in_place on the pass-L->R branch,
    // which requires a multi-threaded runtime.
    #[tokio::test(flavor = "multi_thread")]
    async fn pass_left_to_right_persists_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let camera = Arc::new(CameraManager::new(dir.path()));
        camera.acquire(CameraKind::Dummy, "gate");
        let sink = Arc::new(CountingSink::default());
        let gate = CaptureGate::new(camera, dir.path().join("inspection"), sink.clone());

        gate.notify(Notification { decision: Some(Decision::PassLeftToRight), state: crate::sensor::machine::MachineState::Idle });

        assert_eq!(sink.persists.load(Ordering::SeqCst), 1);
        assert_eq!(sink.successes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn other_decisions_discard_without_persisting() {
        let dir = tempfile::tempdir().unwrap();
        let camera = Arc::new(CameraManager::new(dir.path()));
        camera.acquire(CameraKind::Dummy, "gate");
        let sink = Arc::new(CountingSink::default());
        let gate = CaptureGate::new(camera, dir.path().join("inspection"), sink.clone());

        gate.notify(Notification { decision: Some(Decision::ReturnFromRight), state: crate::sensor::machine::MachineState::Idle });

        assert_eq!(sink.persists.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn non_terminal_notification_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let camera = Arc::new(CameraManager::new(dir.path()));
        let sink = Arc::new(CountingSink::default());
        let gate = CaptureGate::new(camera, dir.path(), sink.clone());
        gate.notify(Notification { decision: None, state: crate::sensor::machine::MachineState::AActive });
        assert_eq!(sink.persists.load(Ordering::SeqCst), 0);
    }
}
