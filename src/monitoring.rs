use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Disks, System};

use crate::streaming::registry::StreamKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub details: String,
}

/// Per-stream metrics tracked in the registry, mirrored here for the
/// aggregate view (§4.10).
#[derive(Debug, Default)]
pub struct StreamCounters {
    pub bytes_sent: AtomicU64,
    pub messages_sent: AtomicU64,
    pub errors: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamMetricsSnapshot {
    pub bytes_sent: u64,
    pub messages_sent: u64,
    pub errors: u64,
    pub connection_duration_ms: u64,
    pub throughput_bps: f64,
}

/// EWMA throughput tracker over a 60 s window.
pub struct ThroughputEwma {
    rate: Mutex<f64>,
    last_sample: Mutex<Instant>,
}

impl Default for ThroughputEwma {
    fn default() -> Self {
        Self {
            rate: Mutex::new(0.0),
            last_sample: Mutex::new(Instant::now()),
        }
    }
}

impl ThroughputEwma {
    const WINDOW_SECS: f64 = 60.0;

    pub fn record(&self, bytes: u64) {
        let now = Instant::now();
        let mut last = self.last_sample.lock();
        let dt = now.duration_since(*last).as_secs_f64().max(0.001);
        *last = now;

        let instantaneous = bytes as f64 / dt;
        let alpha = (dt / Self::WINDOW_SECS).min(1.0);
        let mut rate = self.rate.lock();
        *rate = *rate * (1.0 - alpha) + instantaneous * alpha;
    }

    pub fn rate(&self) -> f64 {
        *self.rate.lock()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub memory_mb: u64,
    pub disk_percent: f32,
}

/// Aggregates throughput, latency, and error rate; polls system metrics
/// every 5 s; exposes liveness probes per component.
pub struct Monitor {
    system: Mutex<System>,
    last_system_metrics: Mutex<SystemMetrics>,
    health: Mutex<HashMap<&'static str, ComponentHealth>>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self {
            system: Mutex::new(System::new_all()),
            last_system_metrics: Mutex::new(SystemMetrics::default()),
            health: Mutex::new(HashMap::new()),
        }
    }
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_system_metrics(&self) -> SystemMetrics {
        let mut sys = self.system.lock();
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let cpu_percent = sys.global_cpu_usage();
        let memory_mb = sys.used_memory() / (1024 * 1024);
        let memory_percent = if sys.total_memory() > 0 {
            (sys.used_memory() as f32 / sys.total_memory() as f32) * 100.0
        } else {
            0.0
        };

        let disks = Disks::new_with_refreshed_list();
        let disk_percent = disks
            .list()
            .first()
            .map(|d| {
                let total = d.total_space() as f32;
                let avail = d.available_space() as f32;
                if total > 0.0 {
                    (1.0 - avail / total) * 100.0
                } else {
                    0.0
                }
            })
            .unwrap_or(0.0);

        let metrics = SystemMetrics { cpu_percent, memory_percent, memory_mb, disk_percent };
        *self.last_system_metrics.lock() = metrics.clone();
        metrics
    }

    pub fn last_system_metrics(&self) -> SystemMetrics {
        self.last_system_metrics.lock().clone()
    }

    pub fn set_component_health(&self, component: &'static str, health: ComponentHealth) {
        self.health.lock().insert(component, health);
    }

    /// Overall health is `unhealthy` if any critical component is
    /// unhealthy, `degraded` if any is degraded, else `healthy`.
    pub fn overall_health(&self) -> (HealthStatus, HashMap<&'static str, ComponentHealth>) {
        let guard = self.health.lock();
        let mut status = HealthStatus::Healthy;
        for h in guard.values() {
            match h.status {
                HealthStatus::Unhealthy => {
                    status = HealthStatus::Unhealthy;
                    break;
                }
                HealthStatus::Degraded if status == HealthStatus::Healthy => {
                    status = HealthStatus::Degraded;
                }
                _ => {}
            }
        }
        (status, guard.clone())
    }
}

pub const SYSTEM_METRICS_INTERVAL: Duration = Duration::from_secs(5);

pub fn classify_stream_kind_label(kind: StreamKind) -> &'static str {
    match kind {
        StreamKind::Camera => "camera",
        StreamKind::Sse => "sse",
        StreamKind::File => "file",
        StreamKind::Inspection => "inspection",
        StreamKind::Analysis => "analysis",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overall_health_is_unhealthy_if_any_component_is() {
        let monitor = Monitor::new();
        monitor.set_component_health("camera", ComponentHealth { status: HealthStatus::Healthy, details: "ok".into() });
        monitor.set_component_health("db", ComponentHealth { status: HealthStatus::Unhealthy, details: "down".into() });
        let (status, _) = monitor.overall_health();
        assert_eq!(status, HealthStatus::Unhealthy);
    }

    #[test]
    fn overall_health_is_degraded_when_no_unhealthy_present() {
        let monitor = Monitor::new();
        monitor.set_component_health("camera", ComponentHealth { status: HealthStatus::Degraded, details: "slow".into() });
        let (status, _) = monitor.overall_health();
        assert_eq!(status, HealthStatus::Degraded);
    }

    #[test]
    fn overall_health_is_healthy_by_default() {
        let monitor = Monitor::new();
        let (status, _) = monitor.overall_health();
        assert_eq!(status, HealthStatus::Healthy);
    }

    #[test]
    fn ewma_throughput_tracks_positive_rate() {
        let ewma = ThroughputEwma::default();
        ewma.record(1000);
        assert!(ewma.rate() >= 0.0);
    }
}

impl Clone for ComponentHealth {
    fn clone(&self) -> Self {
        Self { status: self.status, details: self.details.clone() }
    }
}
