//! Per-channel connectivity classification.
//!
//! A thermocouple that is not plugged in reads as 0.00 mV. The tracker
//! classifies each channel from the magnitude of its raw signal:
//!
//! - `|mV| <= threshold` is Disconnected (a tie counts as Disconnected)
//! - leaving Disconnected requires `|mV| > threshold + hysteresis`
//! - anything else is Connected
//!
//! Updates are edge-triggered: [`ChannelStateTracker::update`] returns a
//! [`Transition`] only when the state actually changes. A missing or NaN
//! signal leaves the state untouched.

use crate::channel::{ChannelId, ConnectivityState, CHANNEL_COUNT};
use crate::config::AcquisitionConfig;

/// A change of connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Channel that changed
    pub channel: ChannelId,
    /// State before the update
    pub from: ConnectivityState,
    /// State after the update
    pub to: ConnectivityState,
}

/// Connectivity state machine for all channels.
#[derive(Debug, Clone)]
pub struct ChannelStateTracker {
    threshold_mv: f64,
    hysteresis_mv: f64,
    states: [ConnectivityState; CHANNEL_COUNT],
}

impl Default for ChannelStateTracker {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl ChannelStateTracker {
    /// Tracker with every channel `Unknown`.
    pub fn new(threshold_mv: f64, hysteresis_mv: f64) -> Self {
        Self {
            threshold_mv,
            hysteresis_mv,
            states: [ConnectivityState::Unknown; CHANNEL_COUNT],
        }
    }

    /// Tracker using the configured threshold and hysteresis.
    pub fn from_config(config: &AcquisitionConfig) -> Self {
        Self::new(config.disconnect_threshold_mv, config.hysteresis_mv)
    }

    /// Current state of a channel.
    pub fn state(&self, channel: ChannelId) -> ConnectivityState {
        self.states[channel.index()]
    }

    /// Feed one raw signal reading.
    pub fn update(&mut self, channel: ChannelId, signal_mv: Option<f64>) -> Option<Transition> {
        let magnitude = signal_mv.filter(|mv| !mv.is_nan())?.abs();
        let from = self.states[channel.index()];

        let to = match from {
            ConnectivityState::Disconnected
                if magnitude <= self.threshold_mv + self.hysteresis_mv =>
            {
                ConnectivityState::Disconnected
            }
            _ if magnitude <= self.threshold_mv => ConnectivityState::Disconnected,
            _ => ConnectivityState::Connected,
        };

        if to == from {
            return None;
        }
        self.states[channel.index()] = to;
        Some(Transition { channel, from, to })
    }

    /// Return a channel to `Unknown`, e.g. after reconfiguration.
    pub fn reset(&mut self, channel: ChannelId) {
        self.states[channel.index()] = ConnectivityState::Unknown;
    }
}
