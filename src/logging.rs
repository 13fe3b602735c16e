use std::path::Path;
use std::time::Duration;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Initializes the global `tracing` subscriber: a console layer gated by
/// `LOGGING.console_logging`, plus a daily-rotating file layer under
/// `LOGGING.log_directory`. Returns the file appender's guard, which must
/// stay alive for the life of the process or buffered lines are lost.
pub fn init(config: &Config) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(&config.logging.log_directory)?;
    let file_appender = tracing_appender::rolling::Builder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix("application")
        .filename_suffix("log")
        .build(&config.logging.log_directory)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_new(&config.logging.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.console_logging {
        registry.with(fmt::layer()).with(file_layer).init();
    } else {
        registry.with(file_layer).init();
    }

    Ok(guard)
}

/// Unlinks rotated log files under `log_directory` older than
/// `retention_days`. `tracing-appender` handles daily rotation but not
/// retention, so this runs on its own interval alongside the other
/// background sweeps.
pub async fn run_retention_sweep(log_directory: impl Into<std::path::PathBuf>, retention_days: u32, shutdown: tokio_util::sync::CancellationToken) {
    let log_directory = log_directory.into();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(RETENTION_SWEEP_INTERVAL) => {}
        }
        sweep_once(&log_directory, retention_days);
    }
}

fn sweep_once(log_directory: &Path, retention_days: u32) {
    let cutoff = std::time::SystemTime::now() - Duration::from_secs(retention_days as u64 * 24 * 3600);
    let Ok(entries) = std::fs::read_dir(log_directory) else { return };
    for entry in entries.flatten() {
        let Ok(metadata) = entry.metadata() else { continue };
        let Ok(modified) = metadata.modified() else { continue };
        if modified < cutoff {
            if let Err(e) = std::fs::remove_file(entry.path()) {
                tracing::warn!(path = %entry.path().display(), error = %e, "failed to unlink retired log file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_leaves_fresh_files_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let fresh_file = dir.path().join("application.log");
        std::fs::write(&fresh_file, b"fresh").unwrap();

        sweep_once(dir.path(), 14);
        assert!(fresh_file.exists());
    }
}
