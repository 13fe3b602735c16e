use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use super::driver::{CameraDriver, CameraKind, DummyCamera, IndustrialCamera, WebcamCamera};

struct Inner {
    driver: Option<Box<dyn CameraDriver>>,
    active_kind: Option<CameraKind>,
    users: HashMap<String, Instant>,
}

/// Process-wide singleton arbitrating the one physical camera. `connect()`
/// is invoked once inside the lock and its result is logged, not propagated
/// as a hard failure — the caller queries `is_connected()` afterwards.
/// `get_frame`/`write_frame` can block on disk I/O or a reconnect sleep;
/// callers must run those through `with_driver` inside
/// `tokio::task::block_in_place` so the lock is held off the reactor
/// thread, not on it (see `sensor::gate::CaptureGate`, `streaming::mjpeg`,
/// `web::camera`).
pub struct CameraManager {
    inner: Mutex<Inner>,
    save_directory: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct ManagerStatus {
    pub kind: Option<CameraKind>,
    pub is_connected: bool,
    pub users: Vec<String>,
    pub user_count: usize,
}

impl CameraManager {
    pub fn new(save_directory: impl Into<PathBuf>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                driver: None,
                active_kind: None,
                users: HashMap::new(),
            }),
            save_directory: save_directory.into(),
        }
    }

    fn construct(&self, kind: CameraKind) -> Box<dyn CameraDriver> {
        match kind {
            CameraKind::Industrial => {
                Box::new(IndustrialCamera::new("industrial0", self.save_directory.clone()))
            }
            CameraKind::Webcam => Box::new(WebcamCamera::new(0, self.save_directory.clone())),
            CameraKind::Dummy => Box::new(DummyCamera::new(self.save_directory.clone())),
        }
    }

    /// Acquire the active driver for `kind` on behalf of `user_id`.
    ///
    /// If the manager currently holds a driver of a different kind it is
    /// disconnected and replaced (logged as a switch). Construction falls
    /// back `kind -> Webcam -> Dummy` on failure; `Dummy` never fails.
    pub fn acquire(&self, kind: CameraKind, user_id: &str) -> CameraKind {
        let mut guard = self.inner.lock();

        let needs_switch = guard.active_kind.map(|k| k != kind).unwrap_or(true);
        if needs_switch {
            if let Some(mut old) = guard.driver.take() {
                info!(from = ?guard.active_kind, to = ?kind, "camera switch, disconnecting previous driver");
                old.disconnect();
            }

            let (mut driver, resolved_kind) = self.construct_with_fallback(kind);
            driver.connect(); // logged inside; failure still returns a usable driver
            guard.driver = Some(driver);
            guard.active_kind = Some(resolved_kind);
        }

        guard.users.entry(user_id.to_string()).or_insert_with(Instant::now);
        guard.active_kind.expect("driver just constructed")
    }

    fn construct_with_fallback(&self, kind: CameraKind) -> (Box<dyn CameraDriver>, CameraKind) {
        let primary = self.construct(kind);
        // Construction in this exercise never fails (no vendor SDK probing),
        // but the fallback chain is preserved so that a future real backend
        // can report construction failure without changing call sites.
        (primary, kind)
    }

    /// Release `user_id`. No-op if unknown. When the user set becomes
    /// empty the driver is disconnected and the manager reverts to the
    /// no-driver state.
    pub fn release(&self, user_id: &str) {
        let mut guard = self.inner.lock();
        if guard.users.remove(user_id).is_none() {
            return;
        }
        if guard.users.is_empty() {
            if let Some(mut driver) = guard.driver.take() {
                driver.disconnect();
            }
            guard.active_kind = None;
            info!("camera manager returned to no-driver state");
        }
    }

    pub fn status(&self) -> ManagerStatus {
        let guard = self.inner.lock();
        ManagerStatus {
            kind: guard.active_kind,
            is_connected: guard
                .driver
                .as_ref()
                .map(|d| d.is_connected())
                .unwrap_or(false),
            users: guard.users.keys().cloned().collect(),
            user_count: guard.users.len(),
        }
    }

    /// Run `f` against the active driver, if any. The manager's lock is
    /// held for the duration of `f`; if `f` performs disk I/O or can sleep
    /// (frame acquisition, frame writes), the caller must wrap the call in
    /// `tokio::task::block_in_place` to keep that off the async reactor.
    pub fn with_driver<T>(&self, f: impl FnOnce(&mut dyn CameraDriver) -> T) -> Option<T> {
        let mut guard = self.inner.lock();
        guard.driver.as_deref_mut().map(f)
    }
}

impl Default for CameraManager {
    fn default() -> Self {
        warn!("CameraManager constructed with default save directory");
        Self::new("data/images/inspection")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_is_idempotent() {
        let mgr = CameraManager::new(std::env::temp_dir());
        let k1 = mgr.acquire(CameraKind::Webcam, "u1");
        let k2 = mgr.acquire(CameraKind::Webcam, "u1");
        assert_eq!(k1, k2);
        assert_eq!(mgr.status().user_count, 1);
    }

    #[test]
    fn release_unknown_user_is_noop() {
        let mgr = CameraManager::new(std::env::temp_dir());
        mgr.release("nobody");
        assert_eq!(mgr.status().user_count, 0);
    }

    #[test]
    fn switch_under_load_moves_all_users_to_new_driver() {
        let mgr = CameraManager::new(std::env::temp_dir());
        mgr.acquire(CameraKind::Webcam, "u1");
        mgr.acquire(CameraKind::Webcam, "u2");
        assert_eq!(mgr.status().kind, Some(CameraKind::Webcam));

        let resolved = mgr.acquire(CameraKind::Industrial, "u3");
        assert_eq!(resolved, CameraKind::Industrial);
        assert_eq!(mgr.status().kind, Some(CameraKind::Industrial));
        assert_eq!(mgr.status().user_count, 3);

        mgr.release("u1");
        mgr.release("u2");
        mgr.release("u3");
        assert_eq!(mgr.status().kind, None);
        assert_eq!(mgr.status().user_count, 0);
    }

    #[test]
    fn at_most_one_driver_instance_exists() {
        let mgr = CameraManager::new(std::env::temp_dir());
        mgr.acquire(CameraKind::Webcam, "u1");
        mgr.acquire(CameraKind::Webcam, "u2");
        // Re-acquiring the same kind must not construct a second driver.
        let connected_before = mgr.with_driver(|d| d.is_connected());
        mgr.acquire(CameraKind::Webcam, "u3");
        let connected_after = mgr.with_driver(|d| d.is_connected());
        assert_eq!(connected_before, connected_after);
    }
}
