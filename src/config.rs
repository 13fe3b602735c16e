use std::fs;
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

/// Top-level configuration, mirroring §4.11's sections.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub camera: CameraSection,
    #[serde(default)]
    pub sensor: SensorSection,
    #[serde(default)]
    pub ui: UiSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub streaming: StreamingSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct CameraSection {
    #[serde(default = "default_camera_type")]
    pub default_camera_type: String, // "industrial" | "webcam"
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u32,
}

impl Default for CameraSection {
    fn default() -> Self {
        Self {
            default_camera_type: default_camera_type(),
            auto_reconnect: true,
            connection_timeout: default_connection_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct SensorSection {
    #[serde(default)]
    pub simulation_mode: bool,
    #[serde(default = "default_buffer_duration")]
    pub buffer_duration: u32,
    #[serde(default = "default_buffer_fps")]
    pub buffer_fps: u32,
}

impl Default for SensorSection {
    fn default() -> Self {
        Self {
            simulation_mode: false,
            buffer_duration: default_buffer_duration(),
            buffer_fps: default_buffer_fps(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct UiSection {
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u32,
    #[serde(default = "default_notification_timeout")]
    pub notification_timeout: u32,
}

impl Default for UiSection {
    fn default() -> Self {
        Self {
            polling_interval: default_polling_interval(),
            notification_timeout: default_notification_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct LoggingSection {
    #[serde(default = "default_log_directory")]
    pub log_directory: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_rotation_time")]
    pub rotation_time: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u32,
    #[serde(default = "default_true")]
    pub console_logging: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            log_directory: default_log_directory(),
            log_level: default_log_level(),
            rotation_time: default_rotation_time(),
            retention_days: default_retention_days(),
            max_file_size_mb: default_max_file_size_mb(),
            console_logging: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub struct StreamingSection {
    #[serde(default)]
    pub camera: StreamingCameraSection,
    #[serde(default)]
    pub sse: StreamingSseSection,
    #[serde(default)]
    pub file: StreamingFileSection,
    #[serde(default)]
    pub data: StreamingDataSection,
    #[serde(default)]
    pub error_handling: StreamingErrorHandlingSection,
    #[serde(default)]
    pub monitoring: StreamingMonitoringSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct StreamingCameraSection {
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    #[serde(default = "default_quality")]
    pub quality: u32,
}

impl Default for StreamingCameraSection {
    fn default() -> Self {
        Self { frame_rate: default_frame_rate(), quality: default_quality() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct StreamingSseSection {
    #[serde(default = "default_heartbeat_sec")]
    pub heartbeat_sec: u32,
}

impl Default for StreamingSseSection {
    fn default() -> Self {
        Self { heartbeat_sec: default_heartbeat_sec() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct StreamingFileSection {
    #[serde(default = "default_chunk_bytes")]
    pub chunk_bytes: usize,
}

impl Default for StreamingFileSection {
    fn default() -> Self {
        Self { chunk_bytes: default_chunk_bytes() }
    }
}

/// Governs the progressive-JSON inspection-data feed (`/api/stream/inspections`):
/// how many rows a single request yields absent an explicit `limit`, and the
/// hard ceiling a client-supplied `limit` is clamped to.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct StreamingDataSection {
    #[serde(default = "default_data_limit")]
    pub default_limit: i64,
    #[serde(default = "default_data_max_limit")]
    pub max_limit: i64,
}

impl Default for StreamingDataSection {
    fn default() -> Self {
        Self { default_limit: default_data_limit(), max_limit: default_data_max_limit() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct StreamingErrorHandlingSection {
    #[serde(default = "default_slow_client_timeout_ms")]
    pub slow_client_timeout_ms: u64,
}

impl Default for StreamingErrorHandlingSection {
    fn default() -> Self {
        Self { slow_client_timeout_ms: default_slow_client_timeout_ms() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct StreamingMonitoringSection {
    #[serde(default = "default_monitoring_interval_sec")]
    pub interval_sec: u32,
}

impl Default for StreamingMonitoringSection {
    fn default() -> Self {
        Self { interval_sec: default_monitoring_interval_sec() }
    }
}

fn default_camera_type() -> String { "webcam".to_string() }
fn default_connection_timeout() -> u32 { 10 }
fn default_buffer_duration() -> u32 { 10 }
fn default_buffer_fps() -> u32 { 30 }
fn default_polling_interval() -> u32 { 1000 }
fn default_notification_timeout() -> u32 { 5000 }
fn default_log_directory() -> String { "./log".to_string() }
fn default_log_level() -> String { "INFO".to_string() }
fn default_rotation_time() -> String { "00:00".to_string() }
fn default_retention_days() -> u32 { 14 }
fn default_max_file_size_mb() -> u32 { 50 }
fn default_frame_rate() -> u32 { 15 }
fn default_quality() -> u32 { 80 }
fn default_heartbeat_sec() -> u32 { 15 }
fn default_chunk_bytes() -> usize { 64 * 1024 }
fn default_data_limit() -> i64 { 50 }
fn default_data_max_limit() -> i64 { 500 }
fn default_slow_client_timeout_ms() -> u64 { 2000 }
fn default_monitoring_interval_sec() -> u32 { 5 }
fn default_true() -> bool { true }

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            camera: CameraSection::default(),
            sensor: SensorSection::default(),
            ui: UiSection::default(),
            logging: LoggingSection::default(),
            streaming: StreamingSection::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&content)?;
        let violations = config.validate();
        if !violations.is_empty() {
            anyhow::bail!("invalid configuration: {}", violations.join("; "));
        }
        Ok(config)
    }

    /// Validates a full candidate config, returning human-readable
    /// violations. An update is transactional: on any violation, no state
    /// changes (the caller never swaps).
    pub fn validate(&self) -> Vec<String> {
        let mut violations = Vec::new();

        if !matches!(self.camera.default_camera_type.as_str(), "industrial" | "webcam") {
            violations.push(format!(
                "camera.default_camera_type must be 'industrial' or 'webcam', got '{}'",
                self.camera.default_camera_type
            ));
        }
        if self.camera.connection_timeout == 0 {
            violations.push("camera.connection_timeout must be > 0".to_string());
        }
        if self.sensor.buffer_fps == 0 {
            violations.push("sensor.buffer_fps must be > 0".to_string());
        }
        if !matches!(self.logging.log_level.as_str(), "DEBUG" | "INFO" | "WARN" | "ERROR") {
            violations.push(format!(
                "logging.log_level must be one of DEBUG,INFO,WARN,ERROR, got '{}'",
                self.logging.log_level
            ));
        }
        if self.logging.retention_days == 0 {
            violations.push("logging.retention_days must be > 0".to_string());
        }
        if !(1..=30).contains(&self.streaming.camera.frame_rate) {
            violations.push("streaming.camera.frame_rate must be in 1..=30".to_string());
        }
        if !(10..=100).contains(&self.streaming.camera.quality) {
            violations.push("streaming.camera.quality must be in 10..=100".to_string());
        }
        if self.streaming.file.chunk_bytes == 0 {
            violations.push("streaming.file.chunk_bytes must be > 0".to_string());
        }
        if self.streaming.data.default_limit <= 0 {
            violations.push("streaming.data.default_limit must be > 0".to_string());
        }
        if self.streaming.data.max_limit < self.streaming.data.default_limit {
            violations.push("streaming.data.max_limit must be >= streaming.data.default_limit".to_string());
        }

        violations
    }
}

/// Live-reloadable configuration store. Readers call `load()` and get a
/// cheap `Arc<Config>` snapshot without locking (copy-on-write: readers
/// never lock, per §5). Writers validate a full candidate before an
/// atomic swap.
pub struct Store {
    current: ArcSwap<Config>,
    path: std::path::PathBuf,
}

impl Store {
    pub fn new(initial: Config, path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            path: path.into(),
        }
    }

    pub fn load(&self) -> Arc<Config> {
        self.current.load_full()
    }

    /// Validate-then-swap. On failure, the active config is untouched.
    pub fn update(&self, candidate: Config) -> Result<(), Vec<String>> {
        let violations = candidate.validate();
        if !violations.is_empty() {
            return Err(violations);
        }
        self.current.store(Arc::new(candidate));
        Ok(())
    }

    pub fn reload_from_file(&self) -> anyhow::Result<()> {
        let candidate = Config::from_file(&self.path)?;
        self.update(candidate).map_err(|v| anyhow::anyhow!(v.join("; ")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_empty());
    }

    #[test]
    fn invalid_update_does_not_change_state() {
        let store = Store::new(Config::default(), "settings.toml");
        let mut candidate = Config::default();
        candidate.streaming.camera.frame_rate = 0;
        let result = store.update(candidate);
        assert!(result.is_err());
        assert_eq!(*store.load(), Config::default());
    }

    #[test]
    fn valid_update_swaps_atomically() {
        let store = Store::new(Config::default(), "settings.toml");
        let mut candidate = Config::default();
        candidate.streaming.camera.quality = 50;
        store.update(candidate.clone()).unwrap();
        assert_eq!(store.load().streaming.camera.quality, 50);
    }

    #[test]
    fn data_max_limit_below_default_is_rejected() {
        let mut candidate = Config::default();
        candidate.streaming.data.max_limit = 10;
        candidate.streaming.data.default_limit = 50;
        let violations = candidate.validate();
        assert!(violations.iter().any(|v| v.contains("streaming.data.max_limit")));
    }

    #[test]
    fn round_trip_set_then_get() {
        let store = Store::new(Config::default(), "settings.toml");
        let mut candidate = Config::default();
        candidate.ui.polling_interval = 2500;
        store.update(candidate).unwrap();
        assert_eq!(store.load().ui.polling_interval, 2500);
    }
}
