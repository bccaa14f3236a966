//! Thermocouple Card Capabilities
//!
//! The acquisition core never speaks the card's wire protocol directly. A
//! driver implements [`ThermocoupleDevice`] and a [`DeviceConnector`] knows how
//! to open it; everything above this module works against the traits.
//!
//! # Contract
//!
//! - Channels are addressed by [`ChannelId`] (1..=8).
//! - Every method takes `&self`; drivers use interior mutability for bus state.
//! - Reads may be slow, but callers always bound them with a timeout, so a
//!   driver is allowed to hang without stalling other channels.
//! - A read that fails for one channel returns [`DeviceError::Channel`]. A
//!   failure that means the whole card is gone returns [`DeviceError::Lost`].
//!
//! # Example
//!
//! ```rust,ignore
//! struct MyCard { bus: Mutex<I2cBus> }
//!
//! #[async_trait]
//! impl ThermocoupleDevice for MyCard {
//!     async fn read_temperature(&self, channel: ChannelId) -> Result<f64, DeviceError> {
//!         let raw = self.bus.lock().await.read_word(channel.index() * 2)?;
//!         Ok(f64::from(raw) / 10.0)
//!     }
//!     // ...
//! }
//! ```

use crate::channel::{ChannelId, SensorType};
use async_trait::async_trait;
use thiserror::Error;

/// Errors reported by a thermocouple driver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// One channel could not be read; the others are unaffected.
    #[error("{0}")]
    Channel(String),

    /// The read did not complete within the configured timeout.
    #[error("read timed out after {0} ms")]
    Timeout(u64),

    /// The card stopped responding altogether.
    #[error("device lost: {0}")]
    Lost(String),
}

/// Capability: multi-channel thermocouple input.
#[async_trait]
pub trait ThermocoupleDevice: Send + Sync {
    /// Human-readable device description for diagnostics.
    fn describe(&self) -> String;

    /// Read the temperature of one channel in °C.
    async fn read_temperature(&self, channel: ChannelId) -> Result<f64, DeviceError>;

    /// Read the raw thermocouple voltage of one channel in mV.
    ///
    /// A reading of 0.00 mV conventionally means nothing is plugged in.
    async fn read_millivolts(&self, channel: ChannelId) -> Result<f64, DeviceError>;

    /// Configure the thermocouple type for one channel.
    async fn set_sensor_type(
        &self,
        channel: ChannelId,
        sensor_type: SensorType,
    ) -> Result<(), DeviceError>;
}

/// Opens a thermocouple device.
///
/// Called at most once per process: if it fails, acquisition falls back to
/// the synthetic source for good.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    /// Open the device, returning a reason string on failure.
    async fn connect(&self) -> anyhow::Result<Box<dyn ThermocoupleDevice>>;
}

/// Connector used when no driver is configured. Always fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHardware;

#[async_trait]
impl DeviceConnector for NoHardware {
    async fn connect(&self) -> anyhow::Result<Box<dyn ThermocoupleDevice>> {
        anyhow::bail!("no thermocouple driver configured")
    }
}
