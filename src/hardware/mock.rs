//! Mock Hardware Implementation
//!
//! A simulated eight-channel thermocouple card for tests and for running the
//! acquisition loop on a machine without the real card (`driver = "mock"`).
//!
//! The card is scriptable: per-channel temperature and voltage can be set, a
//! channel can be made to fail or hang, and the whole card can be "unplugged".
//! Clones share state, so a test can keep a handle while the worker owns the
//! boxed device.
//!
//! # Example
//!
//! ```rust,ignore
//! let card = MockThermocouple::new();
//! card.set_fault(ChannelId::new(3)?, ChannelFault::Fail("crc mismatch".into()));
//! let connector = MockConnector::new(card.clone());
//! ```

use crate::channel::{ChannelId, SensorType, CHANNEL_COUNT};
use crate::hardware::capabilities::{DeviceConnector, DeviceError, ThermocoupleDevice};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Scripted behaviour of one channel.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ChannelFault {
    /// Reads succeed.
    #[default]
    None,
    /// Reads fail with the given reason.
    Fail(String),
    /// Reads never complete.
    Hang,
}

#[derive(Debug)]
struct MockState {
    temperatures: [f64; CHANNEL_COUNT],
    millivolts: [f64; CHANNEL_COUNT],
    faults: [ChannelFault; CHANNEL_COUNT],
    sensor_types: [SensorType; CHANNEL_COUNT],
    reject_sensor_type: bool,
    lost: bool,
}

/// Simulated thermocouple card.
#[derive(Debug, Clone)]
pub struct MockThermocouple {
    state: Arc<Mutex<MockState>>,
    reads: Arc<AtomicUsize>,
}

impl MockThermocouple {
    /// Card with every channel plugged in, CH1 at 21 °C rising 1 °C per channel.
    pub fn new() -> Self {
        let temperatures = std::array::from_fn(|i| 21.0 + i as f64);
        let millivolts = temperatures.map(|t| t * 0.041);
        Self {
            state: Arc::new(Mutex::new(MockState {
                temperatures,
                millivolts,
                faults: Default::default(),
                sensor_types: [SensorType::K; CHANNEL_COUNT],
                reject_sensor_type: false,
                lost: false,
            })),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Set the temperature returned for a channel.
    pub fn set_temperature(&self, channel: ChannelId, celsius: f64) {
        self.lock().temperatures[channel.index()] = celsius;
    }

    /// Set the raw voltage returned for a channel. 0.0 reads as unplugged.
    pub fn set_millivolts(&self, channel: ChannelId, millivolts: f64) {
        self.lock().millivolts[channel.index()] = millivolts;
    }

    /// Unplug a channel (0.00 mV) or plug it back in.
    pub fn set_plugged(&self, channel: ChannelId, plugged: bool) {
        let mut state = self.lock();
        let idx = channel.index();
        state.millivolts[idx] = if plugged {
            state.temperatures[idx] * 0.041
        } else {
            0.0
        };
    }

    /// Script a channel fault.
    pub fn set_fault(&self, channel: ChannelId, fault: ChannelFault) {
        self.lock().faults[channel.index()] = fault;
    }

    /// Make sensor-type configuration fail.
    pub fn reject_sensor_type(&self, reject: bool) {
        self.lock().reject_sensor_type = reject;
    }

    /// Simulate the whole card disappearing from the bus.
    pub fn set_lost(&self, lost: bool) {
        self.lock().lost = lost;
    }

    /// Thermocouple type last configured for a channel.
    pub fn sensor_type(&self, channel: ChannelId) -> SensorType {
        self.lock().sensor_types[channel.index()]
    }

    /// Number of temperature reads served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn check(&self, channel: ChannelId) -> Result<Option<ChannelFault>, DeviceError> {
        let state = self.lock();
        if state.lost {
            return Err(DeviceError::Lost("card not responding".to_string()));
        }
        match &state.faults[channel.index()] {
            ChannelFault::None => Ok(None),
            fault => Ok(Some(fault.clone())),
        }
    }
}

impl MockThermocouple {
    async fn respond(
        &self,
        fault: Option<ChannelFault>,
        value: impl FnOnce(&MockState) -> f64,
    ) -> Result<f64, DeviceError> {
        match fault {
            None => {
                let state = self.lock();
                Ok(value(&state))
            }
            Some(ChannelFault::Fail(reason)) => Err(DeviceError::Channel(reason)),
            Some(_) => std::future::pending().await,
        }
    }
}

impl Default for MockThermocouple {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ThermocoupleDevice for MockThermocouple {
    fn describe(&self) -> String {
        "mock thermocouple card (8 channels)".to_string()
    }

    async fn read_temperature(&self, channel: ChannelId) -> Result<f64, DeviceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let fault = self.check(channel)?;
        self.respond(fault, |state| state.temperatures[channel.index()])
            .await
    }

    async fn read_millivolts(&self, channel: ChannelId) -> Result<f64, DeviceError> {
        let fault = self.check(channel)?;
        self.respond(fault, |state| state.millivolts[channel.index()])
            .await
    }

    async fn set_sensor_type(
        &self,
        channel: ChannelId,
        sensor_type: SensorType,
    ) -> Result<(), DeviceError> {
        let mut state = self.lock();
        if state.lost {
            return Err(DeviceError::Lost("card not responding".to_string()));
        }
        if state.reject_sensor_type {
            return Err(DeviceError::Channel(format!(
                "write of type {sensor_type} to {channel} not acknowledged"
            )));
        }
        state.sensor_types[channel.index()] = sensor_type;
        Ok(())
    }
}

/// Connector that hands out a [`MockThermocouple`], or fails on request.
#[derive(Debug, Clone)]
pub struct MockConnector {
    device: MockThermocouple,
    failure: Option<String>,
    attempts: Arc<AtomicUsize>,
}

impl MockConnector {
    /// Connector that succeeds with the given card.
    pub fn new(device: MockThermocouple) -> Self {
        Self {
            device,
            failure: None,
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Connector that always fails with the given reason.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            device: MockThermocouple::new(),
            failure: Some(reason.into()),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of times `connect` has been called.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceConnector for MockConnector {
    async fn connect(&self) -> anyhow::Result<Box<dyn ThermocoupleDevice>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(reason) => anyhow::bail!("{reason}"),
            None => Ok(Box::new(self.device.clone())),
        }
    }
}
