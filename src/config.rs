//! Configuration management.
//!
//! Settings load from `config/default.toml` (or a named file under
//! `config/`) via the `config` crate; every field has a serde default so a
//! missing file yields a fully usable configuration.

use std::time::Duration;

use config::Config;
use serde::Deserialize;

use crate::error::{AppResult, LogError};
use crate::flush::{FlushMode, DEFAULT_FLUSH_THRESHOLD};
use crate::segment::DEFAULT_SEGMENT_ROW_LIMIT;

/// Top-level application settings.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub log_level: LogLevel,
    pub storage: StorageSettings,
    pub flush: FlushSettings,
    pub acquisition: AcquisitionSettings,
}

/// Newtype so the default log level is "info", not an empty string.
#[derive(Debug, Deserialize, Clone)]
pub struct LogLevel(pub String);

impl Default for LogLevel {
    fn default() -> Self {
        Self("info".to_string())
    }
}

/// Where and how segments are written.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory under which per-run session directories are created.
    pub session_root: String,
    /// Rows per segment before rotation.
    pub segment_row_limit: u64,
    /// Run the merge step as part of shutdown.
    pub merge_on_shutdown: bool,
    /// Sample buffer capacity; `None` means unbounded (enqueue never
    /// blocks), `Some(n)` blocks the producer when `n` samples are pending.
    pub buffer_capacity: Option<usize>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            session_root: "data".to_string(),
            segment_row_limit: DEFAULT_SEGMENT_ROW_LIMIT,
            merge_on_shutdown: true,
            buffer_capacity: None,
        }
    }
}

/// Flush cadence.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FlushSettings {
    pub mode: FlushMode,
    /// Pending-sample count triggering a flush in `threshold` mode.
    pub threshold: usize,
    /// Flush period for `interval` mode (e.g. `"500ms"`, `"2s"`).
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
}

impl Default for FlushSettings {
    fn default() -> Self {
        Self {
            mode: FlushMode::default(),
            threshold: DEFAULT_FLUSH_THRESHOLD,
            interval: None,
        }
    }
}

/// Acquisition loop settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Experiment name used in the session directory name.
    pub experiment: String,
    /// Delay between consecutive mock reads.
    #[serde(with = "humantime_serde")]
    pub sample_period: Duration,
    /// Stop after this many accepted samples (`None` = run until Ctrl-C).
    pub max_samples: Option<u64>,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            experiment: "loadcell".to_string(),
            sample_period: Duration::from_millis(10),
            max_samples: None,
        }
    }
}

impl Settings {
    /// Load settings from `config/{name}.toml`, falling back to defaults
    /// when the file is absent.
    pub fn new(config_name: Option<&str>) -> AppResult<Self> {
        let config_path = format!("config/{}", config_name.unwrap_or("default"));
        let s = Config::builder()
            .add_source(config::File::with_name(&config_path).required(false))
            .build()
            .map_err(LogError::Config)?;

        let settings: Settings = s.try_deserialize().map_err(LogError::Config)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Semantic checks the `config` crate cannot express.
    pub fn validate(&self) -> AppResult<()> {
        if self.storage.segment_row_limit == 0 {
            return Err(LogError::Configuration(
                "storage.segment_row_limit must be at least 1".into(),
            ));
        }
        if self.flush.threshold == 0 {
            return Err(LogError::Configuration(
                "flush.threshold must be at least 1".into(),
            ));
        }
        if self.flush.mode == FlushMode::Interval && self.flush.interval.is_none() {
            return Err(LogError::Configuration(
                "flush.interval is required when flush.mode = \"interval\"".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(text: &str) -> AppResult<Settings> {
        let s = Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()
            .map_err(LogError::Config)?;
        let settings: Settings = s.try_deserialize().map_err(LogError::Config)?;
        settings.validate()?;
        Ok(settings)
    }

    #[test]
    fn default_settings_are_usable() {
        let settings = Settings::default();
        assert_eq!(settings.storage.segment_row_limit, 1000);
        assert_eq!(settings.flush.threshold, 1000);
        assert_eq!(settings.flush.mode, FlushMode::Threshold);
        assert!(settings.storage.merge_on_shutdown);
        assert!(settings.storage.buffer_capacity.is_none());
        assert_eq!(settings.acquisition.experiment, "loadcell");
    }

    #[test]
    fn parses_full_toml() {
        let settings = from_toml(
            r#"
            log_level = "debug"

            [storage]
            session_root = "/tmp/sessions"
            segment_row_limit = 2
            merge_on_shutdown = false
            buffer_capacity = 64

            [flush]
            mode = "interval"
            interval = "250ms"

            [acquisition]
            experiment = "bench"
            sample_period = "5ms"
            max_samples = 100
            "#,
        )
        .unwrap();
        assert_eq!(settings.storage.segment_row_limit, 2);
        assert_eq!(settings.storage.buffer_capacity, Some(64));
        assert_eq!(settings.flush.mode, FlushMode::Interval);
        assert_eq!(settings.flush.interval, Some(Duration::from_millis(250)));
        assert_eq!(settings.acquisition.max_samples, Some(100));
        assert_eq!(settings.acquisition.sample_period, Duration::from_millis(5));
    }

    #[test]
    fn interval_mode_requires_interval() {
        let err = from_toml("[flush]\nmode = \"interval\"\n").unwrap_err();
        assert!(matches!(err, LogError::Configuration(_)));
    }

    #[test]
    fn zero_row_limit_rejected() {
        let err = from_toml("[storage]\nsegment_row_limit = 0\n").unwrap_err();
        assert!(matches!(err, LogError::Configuration(_)));
    }
}
