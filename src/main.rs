mod cache;
mod camera;
mod config;
mod db;
mod error;
mod logging;
mod monitoring;
mod resolver;
mod sensor;
mod sensor_io;
mod streaming;
mod watcher;
mod web;

use std::process::ExitCode;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::camera::{CameraManager, RingBuffer};
use crate::cache::ImageCache;
use crate::config::{Config, Store as ConfigStore};
use crate::db::Database;
use crate::monitoring::{ComponentHealth, HealthStatus, Monitor, SYSTEM_METRICS_INTERVAL};
use crate::sensor::{CaptureGate, DecisionSink, Notification, PersistEvent, PersistSink, SensorMachine};
use crate::sensor_io::{run_beam_poll_loop, SimulatedBeamSource};
use crate::streaming::sse::{SensorEventBus, SensorSseEvent};
use crate::watcher::InspectionWatcher;
use crate::web::{router, AppState, AppStateInner};

const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "settings.toml")]
    config: std::path::PathBuf,

    /// Port the HTTP server listens on.
    #[arg(long, default_value_t = 8080)]
    web_port: u16,

    /// Root directory for persisted state (images, cache, sqlite.db, logs).
    #[arg(long, default_value = "data")]
    data_dir: std::path::PathBuf,
}

/// Discards buffered frames on every non-pass-L->R decision and publishes
/// both the raw state-change and (when terminal) the decision itself to the
/// sensor SSE bus, then forwards to `CaptureGate` for persistence. The
/// `pass-L->R` persist callback runs synchronously inside `notify`, which is
/// what `sensor::machine::DecisionSink` requires.
struct CombinedSink {
    gate: CaptureGate,
    bus: Arc<SensorEventBus>,
    sequence: AtomicUsize,
    last_event_time_us: AtomicI64,
}

impl DecisionSink for CombinedSink {
    fn notify(&self, notification: Notification) {
        let now_us = crate::camera::frame::now_us();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.last_event_time_us.store(now_us, Ordering::Relaxed);

        self.bus.publish(SensorSseEvent::SensorState {
            state: notification.state,
            sequence,
            last_event_time_us: now_us,
        });
        if let Some(decision) = notification.decision {
            self.bus.publish(SensorSseEvent::Decision { decision, at_us: now_us });
        }

        self.gate.notify(notification);
    }
}

struct LoggingPersistSink;

impl PersistSink for LoggingPersistSink {
    fn on_persist(&self, event: PersistEvent) {
        match event.path {
            Some(path) if event.succeeded => info!(path = %path.display(), "inspection capture persisted"),
            _ => warn!("pass-L->R capture did not persist a frame"),
        }
    }
}

fn main() -> ExitCode {
    let args = CliArgs::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(async_main(args))
}

async fn async_main(args: CliArgs) -> ExitCode {
    let config = Config::from_file(&args.config).unwrap_or_else(|e| {
        eprintln!("failed to load {}: {e}, falling back to defaults", args.config.display());
        Config::default()
    });

    let _log_guard = match logging::init(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(config = ?args.config, "starting wood inspection streaming backend");

    let inspection_root = args.data_dir.join("images/inspection");
    let cache_dir = args.data_dir.join("image_cache");
    let sqlite_path = args.data_dir.join("sqlite.db");

    if let Err(e) = std::fs::create_dir_all(&inspection_root) {
        error!(error = %e, "failed to create inspection root directory");
        return ExitCode::FAILURE;
    }

    let db = match Database::open(&sqlite_path) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!(error = %e, "database unavailable, cannot start");
            return ExitCode::FAILURE;
        }
    };

    let cache = match ImageCache::new(&cache_dir) {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            error!(error = %e, "failed to initialize image cache");
            return ExitCode::FAILURE;
        }
    };

    let camera = Arc::new(CameraManager::new(inspection_root.clone()));
    let ring = Arc::new(RingBuffer::from_duration_and_fps(
        config.sensor.buffer_duration,
        config.sensor.buffer_fps,
    ));
    let sensor_bus = Arc::new(SensorEventBus::new());
    let registry = crate::streaming::StreamRegistry::new();
    let monitor = Arc::new(Monitor::new());
    let watcher = Arc::new(InspectionWatcher::new(db.clone()));
    let config_store = Arc::new(ConfigStore::new(config.clone(), args.config.clone()));
    let sensor_machine = Arc::new(parking_lot::Mutex::new(SensorMachine::new()));

    let shutdown = CancellationToken::new();

    let combined_sink = Arc::new(CombinedSink {
        gate: CaptureGate::new(camera.clone(), inspection_root.clone(), Arc::new(LoggingPersistSink)),
        bus: sensor_bus.clone(),
        sequence: AtomicUsize::new(0),
        last_event_time_us: AtomicI64::new(0),
    });

    let state = AppState(Arc::new(AppStateInner {
        camera: camera.clone(),
        ring: ring.clone(),
        sensor: sensor_machine.clone(),
        sensor_bus: sensor_bus.clone(),
        registry: registry.clone(),
        cache: cache.clone(),
        db: db.clone(),
        watcher: watcher.clone(),
        monitor: monitor.clone(),
        config: config_store.clone(),
        inspection_root: inspection_root.clone(),
        shutdown: shutdown.clone(),
    }));

    monitor.set_component_health("db", ComponentHealth { status: HealthStatus::Healthy, details: "connected".to_string() });
    monitor.set_component_health("camera", ComponentHealth { status: HealthStatus::Healthy, details: "idle".to_string() });

    spawn_background_tasks(&config_store, &cache, &watcher, &monitor, &shutdown);

    if config.sensor.simulation_mode {
        let machine = sensor_machine.clone();
        let sink = combined_sink.clone();
        let token = shutdown.child_token();
        tokio::spawn(async move {
            run_beam_poll_loop(SimulatedBeamSource::new(), &machine, sink.as_ref(), token).await;
        });
    } else {
        info!("sensor.simulation_mode is disabled and no real beam hardware driver is wired up; sensor state will remain idle");
    }

    let app = router(state);
    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", args.web_port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(port = args.web_port, error = %e, "failed to bind HTTP listener");
            return ExitCode::FAILURE;
        }
    };
    info!(port = args.web_port, "listening");

    let serve_shutdown = shutdown.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        serve_shutdown.cancelled().await;
    });

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server exited with error");
                return ExitCode::FAILURE;
            }
        }
        _ = wait_for_shutdown_signal() => {
            info!("shutdown signal received, draining for up to 5s");
            shutdown.cancel();
            tokio::time::sleep(SHUTDOWN_DRAIN).await;
        }
    }

    info!("shutdown complete");
    ExitCode::SUCCESS
}

fn spawn_background_tasks(
    config: &Arc<ConfigStore>,
    cache: &Arc<ImageCache>,
    watcher: &Arc<InspectionWatcher>,
    monitor: &Arc<Monitor>,
    shutdown: &CancellationToken,
) {
    let watcher = watcher.clone();
    let token = shutdown.child_token();
    tokio::spawn(async move { watcher.run(token).await });

    let cache = cache.clone();
    let token = shutdown.child_token();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(ImageCache::cleanup_interval()) => {
                    cache.cleanup();
                }
            }
        }
    });

    let log_directory = config.load().logging.log_directory.clone();
    let retention_days = config.load().logging.retention_days;
    let token = shutdown.child_token();
    tokio::spawn(logging::run_retention_sweep(log_directory, retention_days, token));

    let monitor = monitor.clone();
    let token = shutdown.child_token();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(SYSTEM_METRICS_INTERVAL) => {
                    monitor.sample_system_metrics();
                }
            }
        }
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
