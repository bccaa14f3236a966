//! Configuration System using Figment
//!
//! Strongly-typed configuration for the acquisition core. Configuration is
//! loaded from:
//! 1. a TOML file (default `config/thermo_daq.toml`), optional
//! 2. environment variables prefixed with `THERMO_DAQ_`, using `__` between
//!    nested keys
//!
//! Every field has a default, so a missing file yields a valid configuration.
//!
//! # Example
//! ```no_run
//! use thermo_daq::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! println!("Polling every {}s", config.acquisition.poll_interval_secs);
//! # Ok::<(), thermo_daq::error::DaqError>(())
//! ```

use crate::channel::{ChannelId, ChannelTable, SensorType, CHANNEL_COUNT};
use crate::error::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Shortest accepted poll interval, in seconds.
pub const MIN_POLL_INTERVAL_SECS: u64 = 1;
/// Longest accepted poll interval, in seconds.
pub const MAX_POLL_INTERVAL_SECS: u64 = 3600;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Polling loop settings
    pub acquisition: AcquisitionConfig,
    /// Hardware driver selection
    pub hardware: HardwareConfig,
    /// Data file settings
    pub storage: StorageConfig,
    /// Diagnostic log settings
    pub diagnostics: DiagnosticsConfig,
    /// Per-channel settings, CH1 first
    pub channels: Vec<ChannelConfig>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level for `tracing` events bridged into the diagnostic log
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Thermo DAQ".to_string(),
            log_level: "debug".to_string(),
        }
    }
}

/// Acquisition loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Seconds between poll cycles (1..=3600)
    pub poll_interval_secs: u64,
    /// Upper bound on a single channel read, in milliseconds
    pub read_timeout_ms: u64,
    /// Signal magnitude at or below which a channel counts as unplugged (mV)
    pub disconnect_threshold_mv: f64,
    /// Extra margin above the threshold required to report a reconnect (mV)
    pub hysteresis_mv: f64,
    /// Seed for the synthetic source; `None` seeds from the OS
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthetic_seed: Option<u64>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            read_timeout_ms: 500,
            disconnect_threshold_mv: 0.0,
            hysteresis_mv: 0.0,
            synthetic_seed: None,
        }
    }
}

impl AcquisitionConfig {
    /// Poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Per-read timeout as a `Duration`.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Which hardware connector to try at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareDriver {
    /// No driver available; acquisition always runs on the synthetic source.
    #[default]
    None,
    /// Simulated card (see [`crate::hardware::mock`]).
    Mock,
}

/// Hardware configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// Driver to open at start-up
    pub driver: HardwareDriver,
}

/// Data file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory receiving the daily CSV files
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("Data"),
        }
    }
}

/// Diagnostic log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Directory holding the active log and its backups
    pub log_dir: PathBuf,
    /// Active log file name
    pub file_name: String,
    /// Rotation threshold in bytes
    pub max_bytes: u64,
    /// Number of numbered backups kept
    pub backup_count: usize,
    /// Mirror Info-and-above records to stdout
    pub console: bool,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("Data/logs"),
            file_name: "thermo_daq.log".to_string(),
            max_bytes: 5 * 1024 * 1024,
            backup_count: 5,
            console: true,
        }
    }
}

impl DiagnosticsConfig {
    /// Path of the active log file.
    pub fn log_path(&self) -> PathBuf {
        self.log_dir.join(&self.file_name)
    }
}

/// Per-channel configuration entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Whether the channel is polled
    pub enabled: bool,
    /// Thermocouple type
    pub sensor_type: SensorType,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sensor_type: SensorType::K,
        }
    }
}

impl AppConfig {
    /// Load configuration from `config/thermo_daq.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `THERMO_DAQ_`.
    /// Example: `THERMO_DAQ_ACQUISITION__POLL_INTERVAL_SECS=10`
    pub fn load() -> AppResult<Self> {
        Self::load_from("config/thermo_daq.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("THERMO_DAQ_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        validate_poll_interval(self.acquisition.poll_interval_secs)?;

        if self.acquisition.read_timeout_ms == 0 {
            return Err(DaqError::Configuration(
                "read_timeout_ms must be greater than zero".to_string(),
            ));
        }
        let interval_ms = self.acquisition.poll_interval_secs.saturating_mul(1000);
        if self.acquisition.read_timeout_ms >= interval_ms {
            return Err(DaqError::Configuration(format!(
                "read_timeout_ms ({}) must be shorter than the poll interval ({interval_ms} ms)",
                self.acquisition.read_timeout_ms
            )));
        }

        let threshold = self.acquisition.disconnect_threshold_mv;
        let hysteresis = self.acquisition.hysteresis_mv;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(DaqError::Configuration(format!(
                "disconnect_threshold_mv must be a non-negative number, got {threshold}"
            )));
        }
        if !hysteresis.is_finite() || hysteresis < 0.0 {
            return Err(DaqError::Configuration(format!(
                "hysteresis_mv must be a non-negative number, got {hysteresis}"
            )));
        }

        if self.diagnostics.max_bytes == 0 {
            return Err(DaqError::Configuration(
                "diagnostics.max_bytes must be greater than zero".to_string(),
            ));
        }
        if self.diagnostics.file_name.is_empty() {
            return Err(DaqError::Configuration(
                "diagnostics.file_name must not be empty".to_string(),
            ));
        }

        if self.channels.len() > CHANNEL_COUNT {
            return Err(DaqError::Configuration(format!(
                "{} channel entries configured, the card has {}",
                self.channels.len(),
                CHANNEL_COUNT
            )));
        }

        Ok(())
    }

    /// Build the channel table, filling missing entries with defaults.
    pub fn channel_table(&self) -> ChannelTable {
        let mut table = ChannelTable::default();
        for (id, entry) in ChannelId::all().zip(self.channels.iter()) {
            table.set_enabled(id, entry.enabled);
            table.set_sensor_type(id, entry.sensor_type);
        }
        table
    }
}

/// Check a poll interval against the supported range.
pub fn validate_poll_interval(secs: u64) -> AppResult<Duration> {
    if (MIN_POLL_INTERVAL_SECS..=MAX_POLL_INTERVAL_SECS).contains(&secs) {
        Ok(Duration::from_secs(secs))
    } else {
        Err(DaqError::InvalidPollInterval(secs))
    }
}
