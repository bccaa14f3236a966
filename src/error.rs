//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the acquisition core.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of errors that can occur, from configuration issues to
//! persistence I/O and hardware problems.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically parse or type errors in the
//!   TOML file or environment overrides.
//! - **`Configuration`**: Semantic errors in an otherwise well-formed configuration
//!   (e.g. a poll interval outside the supported range). Caught by `AppConfig::validate`.
//! - **`Io`** / **`Csv`**: Persistence failures (permission, disk full, missing directory).
//! - **`Instrument`**: Failures reported by the thermocouple card or its connector.
//! - **`InvalidChannel`** / **`InvalidPollInterval`**: Rejected command arguments.
//!
//! Hardware reads use the narrower [`crate::hardware::DeviceError`], which the
//! acquisition worker folds into NaN readings rather than propagating.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Instrument error: {0}")]
    Instrument(String),

    #[error("Invalid channel {0}: channels are numbered 1..=8")]
    InvalidChannel(u8),

    #[error("Invalid poll interval {0}s: must be within 1..=3600")]
    InvalidPollInterval(u64),

    #[error("Acquisition is already running")]
    AcquisitionRunning,

    #[error("Acquisition is not running")]
    AcquisitionNotRunning,

    #[error("Acquisition task failed: {0}")]
    TaskFailed(String),
}

impl DaqError {
    /// Whether the caller can simply retry on the next cycle.
    ///
    /// Persistence failures are retried by the worker; configuration and
    /// argument errors need a different input.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DaqError::Io(_) | DaqError::Csv(_) | DaqError::Storage(_) | DaqError::Instrument(_)
        )
    }
}
