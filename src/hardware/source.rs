//! Data source polled by the acquisition worker.
//!
//! A [`DataSource`] is either the real card behind a [`ThermocoupleDevice`] or
//! the [`SyntheticSource`]. Which one is decided once by [`select_source`]; the
//! worker only ever moves from hardware to synthetic (when the card is lost),
//! never back.
//!
//! Hardware polls read every requested channel concurrently. Each read is
//! bounded by the configured timeout, so a hanging or failing channel yields an
//! error for that channel alone.

use crate::channel::{ChannelId, ChannelTable, ConnectivityState, SensorType};
use crate::config::AcquisitionConfig;
use crate::connectivity::ChannelStateTracker;
use crate::diagnostics::DiagnosticSink;
use crate::hardware::capabilities::{DeviceConnector, DeviceError, ThermocoupleDevice};
use crate::hardware::synthetic::SyntheticSource;
use crate::measurement_types::SourceKind;
use chrono::Local;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

const COMPONENT: &str = "hardware";

/// Upper bound on opening the card.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of reading one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSample {
    /// Temperature in °C, or why it could not be read
    pub temperature: Result<f64, DeviceError>,
    /// Raw thermocouple voltage in mV, if it could be read
    pub signal_mv: Option<f64>,
}

/// Result of one poll.
#[derive(Debug, Clone, Default)]
pub struct PollOutcome {
    /// One sample per requested channel, ascending
    pub samples: BTreeMap<ChannelId, ChannelSample>,
    /// Set when a read reported that the whole device is gone
    pub device_lost: Option<String>,
}

/// The acquisition card, with per-read timeouts.
pub struct HardwareSource {
    device: Box<dyn ThermocoupleDevice>,
    read_timeout: Duration,
}

impl std::fmt::Debug for HardwareSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareSource")
            .field("device", &self.device.describe())
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

impl HardwareSource {
    /// Wrap an opened device.
    pub fn new(device: Box<dyn ThermocoupleDevice>, read_timeout: Duration) -> Self {
        Self {
            device,
            read_timeout,
        }
    }

    /// Device description.
    pub fn describe(&self) -> String {
        self.device.describe()
    }

    async fn bounded<F>(&self, op: F) -> Result<F::Output, DeviceError>
    where
        F: Future,
    {
        tokio::time::timeout(self.read_timeout, op)
            .await
            .map_err(|_| DeviceError::Timeout(timeout_ms(self.read_timeout)))
    }

    /// Push every channel's configured thermocouple type to the card.
    ///
    /// Per-channel failures are logged and skipped. Returns an error only if
    /// the card is gone.
    pub async fn configure(
        &self,
        table: &ChannelTable,
        diag: &DiagnosticSink,
    ) -> Result<(), DeviceError> {
        for channel in table.iter() {
            match self.set_sensor_type(channel.id, channel.sensor_type).await {
                Ok(()) => {}
                Err(DeviceError::Lost(reason)) => return Err(DeviceError::Lost(reason)),
                Err(e) => diag.error_with(
                    COMPONENT,
                    format!(
                        "Failed to configure {} as type {}",
                        channel.id, channel.sensor_type
                    ),
                    e,
                ),
            }
        }
        Ok(())
    }

    /// Configure one channel's thermocouple type.
    pub async fn set_sensor_type(
        &self,
        channel: ChannelId,
        sensor_type: SensorType,
    ) -> Result<(), DeviceError> {
        self.bounded(self.device.set_sensor_type(channel, sensor_type))
            .await?
    }

    /// Read the signal of every enabled channel once and return those that
    /// look unplugged, logging a summary line when there are any.
    ///
    /// Read failures are logged per channel and leave that channel out.
    pub async fn check_connectivity(
        &self,
        table: &ChannelTable,
        config: &AcquisitionConfig,
        diag: &DiagnosticSink,
    ) -> Vec<ChannelId> {
        diag.info(COMPONENT, "Checking for unplugged channels");
        let reads = table.enabled().into_iter().map(|channel| async move {
            let signal = self
                .bounded(self.device.read_millivolts(channel))
                .await
                .and_then(|r| r);
            (channel, signal)
        });

        let mut tracker = ChannelStateTracker::from_config(config);
        let mut unplugged = Vec::new();
        for (channel, signal) in join_all(reads).await {
            match signal {
                Ok(mv) => {
                    let state = tracker.update(channel, Some(mv)).map(|t| t.to);
                    if state == Some(ConnectivityState::Disconnected) {
                        unplugged.push(channel);
                    }
                }
                Err(e) => diag.error_with(COMPONENT, format!("Error checking {channel} voltage"), e),
            }
        }

        if !unplugged.is_empty() {
            let names: Vec<String> = unplugged.iter().map(ToString::to_string).collect();
            diag.info(
                COMPONENT,
                format!("Unplugged channels detected: {}", names.join(", ")),
            );
        }
        unplugged
    }

    /// Read temperature and signal voltage of each channel concurrently.
    pub async fn poll(&self, channels: &[ChannelId]) -> PollOutcome {
        let reads = channels.iter().map(|&channel| async move {
            let (temperature, signal) = futures::join!(
                self.bounded(self.device.read_temperature(channel)),
                self.bounded(self.device.read_millivolts(channel)),
            );
            (channel, temperature.and_then(|r| r), signal.and_then(|r| r))
        });

        let mut outcome = PollOutcome::default();
        for (channel, temperature, signal) in join_all(reads).await {
            for result in [&temperature, &signal] {
                if let Err(DeviceError::Lost(reason)) = result {
                    outcome.device_lost.get_or_insert_with(|| reason.clone());
                }
            }
            outcome.samples.insert(
                channel,
                ChannelSample {
                    temperature,
                    signal_mv: signal.ok(),
                },
            );
        }
        outcome
    }
}

fn timeout_ms(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

/// Where readings come from.
#[derive(Debug)]
pub enum DataSource {
    /// The acquisition card
    Hardware(HardwareSource),
    /// Generated data
    Synthetic(SyntheticSource),
}

impl DataSource {
    /// Source tag attached to readings.
    pub fn kind(&self) -> SourceKind {
        match self {
            DataSource::Hardware(_) => SourceKind::Hardware,
            DataSource::Synthetic(_) => SourceKind::Synthetic,
        }
    }

    /// Human-readable description.
    pub fn describe(&self) -> String {
        match self {
            DataSource::Hardware(hw) => hw.describe(),
            DataSource::Synthetic(synthetic) => {
                format!("synthetic source ({})", synthetic.generator_name())
            }
        }
    }

    /// Sample the given channels. Never blocks longer than the read timeout.
    pub async fn poll(&self, channels: &[ChannelId]) -> PollOutcome {
        match self {
            DataSource::Hardware(hw) => hw.poll(channels).await,
            DataSource::Synthetic(synthetic) => {
                let t_secs = Local::now().timestamp_millis() as f64 / 1000.0;
                let samples = channels
                    .iter()
                    .map(|&channel| {
                        let celsius = synthetic.temperature_at(channel, t_secs);
                        let sample = ChannelSample {
                            temperature: Ok(celsius),
                            signal_mv: Some(synthetic.millivolts_for(celsius)),
                        };
                        (channel, sample)
                    })
                    .collect();
                PollOutcome {
                    samples,
                    device_lost: None,
                }
            }
        }
    }

    /// Apply a thermocouple type change. A no-op for synthetic data.
    pub async fn set_sensor_type(
        &self,
        channel: ChannelId,
        sensor_type: SensorType,
    ) -> Result<(), DeviceError> {
        match self {
            DataSource::Hardware(hw) => hw.set_sensor_type(channel, sensor_type).await,
            DataSource::Synthetic(_) => Ok(()),
        }
    }

    /// Replace the source with synthetic data for the rest of the process.
    pub fn degrade(&mut self, seed: Option<u64>) {
        *self = DataSource::Synthetic(SyntheticSource::new(seed));
    }
}

/// Outcome of the one-time source selection.
#[derive(Debug)]
pub struct SourceSelection {
    /// The selected source
    pub source: DataSource,
    /// Why hardware was not used, if it was not
    pub fallback_reason: Option<String>,
    /// Channels found unplugged by the check run when hardware is selected
    pub unplugged: Vec<ChannelId>,
}

/// Open the card through `connector`, or fall back to synthetic data.
///
/// On success the configured thermocouple types are pushed to the card and
/// the enabled channels are checked for unplugged thermocouples. On failure a
/// single Warning is logged with the reason.
pub async fn select_source(
    connector: &dyn DeviceConnector,
    table: &ChannelTable,
    config: &AcquisitionConfig,
    diag: &DiagnosticSink,
) -> SourceSelection {
    let reason = match tokio::time::timeout(CONNECT_TIMEOUT, connector.connect()).await {
        Ok(Ok(device)) => {
            let hw = HardwareSource::new(device, config.read_timeout());
            match hw.configure(table, diag).await {
                Ok(()) => {
                    diag.info(COMPONENT, format!("Using hardware source: {}", hw.describe()));
                    let unplugged = hw.check_connectivity(table, config, diag).await;
                    return SourceSelection {
                        source: DataSource::Hardware(hw),
                        fallback_reason: None,
                        unplugged,
                    };
                }
                Err(e) => e.to_string(),
            }
        }
        Ok(Err(e)) => format!("{e:#}"),
        Err(_) => format!("connect timed out after {} ms", timeout_ms(CONNECT_TIMEOUT)),
    };

    let synthetic = SyntheticSource::new(config.synthetic_seed);
    diag.warning_with(
        COMPONENT,
        format!(
            "Hardware unavailable, falling back to synthetic data ({})",
            synthetic.generator_name()
        ),
        &reason,
    );
    SourceSelection {
        source: DataSource::Synthetic(synthetic),
        fallback_reason: Some(reason),
        unplugged: Vec::new(),
    }
}
