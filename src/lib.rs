//! # Thermo DAQ Core Library
//!
//! Acquisition-and-persistence core for an eight-channel thermocouple logger.
//! Front ends (a GUI, a display driver, the bundled CLI) drive it through
//! [`acquisition::AcquisitionController`] and listen on its event stream.
//!
//! ## Crate Structure
//!
//! - **`acquisition`**: The background polling worker and the controller that
//!   starts, stops and reconfigures it.
//! - **`channel`**: Channel ids, thermocouple types and the channel table.
//! - **`config`**: Figment-based configuration (TOML file + environment).
//! - **`connectivity`**: Plugged/unplugged classification from the raw signal.
//! - **`data`**: The daily CSV writer used by sessions.
//! - **`diagnostics`**: The process-wide rotating event log and its `tracing`
//!   bridge.
//! - **`error`**: The `DaqError` enum shared across the crate.
//! - **`hardware`**: Device capability traits, the mock card, the synthetic
//!   generator and source selection.
//! - **`measurement_types`**: Readings and reading batches.

pub mod acquisition;
pub mod channel;
pub mod config;
pub mod connectivity;
pub mod data;
pub mod diagnostics;
pub mod error;
pub mod hardware;
pub mod measurement_types;
