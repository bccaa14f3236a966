//! Channel identity and per-channel configuration.
//!
//! The acquisition card exposes a fixed set of eight thermocouple inputs. Each
//! input carries an enabled flag, the thermocouple type it is wired for, and the
//! connectivity state last reported by the [`crate::connectivity::ChannelStateTracker`].

use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of thermocouple inputs on the card.
pub const CHANNEL_COUNT: usize = 8;

/// One-based channel identifier (1..=8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ChannelId(u8);

impl ChannelId {
    /// Create a channel id, rejecting anything outside 1..=8.
    pub fn new(number: u8) -> AppResult<Self> {
        if (1..=CHANNEL_COUNT as u8).contains(&number) {
            Ok(Self(number))
        } else {
            Err(DaqError::InvalidChannel(number))
        }
    }

    /// All channels in ascending order.
    pub fn all() -> impl Iterator<Item = ChannelId> {
        (1..=CHANNEL_COUNT as u8).map(ChannelId)
    }

    /// One-based channel number as printed on the card.
    pub fn number(self) -> u8 {
        self.0
    }

    /// Zero-based position, used to index per-channel tables.
    pub fn index(self) -> usize {
        usize::from(self.0 - 1)
    }
}

impl TryFrom<u8> for ChannelId {
    type Error = DaqError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChannelId> for u8 {
    fn from(id: ChannelId) -> Self {
        id.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CH{}", self.0)
    }
}

/// Thermocouple type a channel is wired for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SensorType {
    B,
    E,
    J,
    #[default]
    K,
    N,
    R,
    S,
    T,
}

impl SensorType {
    /// Every supported type, in device-code order.
    pub const ALL: [SensorType; 8] = [
        SensorType::B,
        SensorType::E,
        SensorType::J,
        SensorType::K,
        SensorType::N,
        SensorType::R,
        SensorType::S,
        SensorType::T,
    ];

    /// Numeric code the card firmware uses for this type.
    pub fn device_code(self) -> u8 {
        match self {
            SensorType::B => 0,
            SensorType::E => 1,
            SensorType::J => 2,
            SensorType::K => 3,
            SensorType::N => 4,
            SensorType::R => 5,
            SensorType::S => 6,
            SensorType::T => 7,
        }
    }

    /// Single-letter name.
    pub fn letter(self) -> char {
        match self {
            SensorType::B => 'B',
            SensorType::E => 'E',
            SensorType::J => 'J',
            SensorType::K => 'K',
            SensorType::N => 'N',
            SensorType::R => 'R',
            SensorType::S => 'S',
            SensorType::T => 'T',
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl FromStr for SensorType {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        SensorType::ALL
            .into_iter()
            .find(|t| trimmed.len() == 1 && trimmed.eq_ignore_ascii_case(&t.letter().to_string()))
            .ok_or_else(|| {
                DaqError::Configuration(format!(
                    "Unknown thermocouple type '{s}'. Must be one of: B, E, J, K, N, R, S, T"
                ))
            })
    }
}

impl TryFrom<String> for SensorType {
    type Error = DaqError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SensorType> for String {
    fn from(t: SensorType) -> Self {
        t.to_string()
    }
}

/// Connectivity of a thermocouple input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectivityState {
    /// No signal has been classified since start-up or reconfiguration.
    #[default]
    Unknown,
    /// A thermocouple is producing a signal.
    Connected,
    /// The input reads as unplugged.
    Disconnected,
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectivityState::Unknown => "unknown",
            ConnectivityState::Connected => "connected",
            ConnectivityState::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// One input slot of the card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel identity.
    pub id: ChannelId,
    /// Whether the channel is polled.
    pub enabled: bool,
    /// Thermocouple type.
    pub sensor_type: SensorType,
    /// Last classified connectivity.
    pub state: ConnectivityState,
}

impl Channel {
    fn new(id: ChannelId) -> Self {
        Self {
            id,
            enabled: true,
            sensor_type: SensorType::default(),
            state: ConnectivityState::Unknown,
        }
    }
}

/// The full set of eight channels, indexed by [`ChannelId`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelTable {
    channels: [Channel; CHANNEL_COUNT],
}

impl Default for ChannelTable {
    fn default() -> Self {
        Self {
            channels: std::array::from_fn(|i| {
                Channel::new(ChannelId(i as u8 + 1))
            }),
        }
    }
}

impl ChannelTable {
    /// Look up a channel.
    pub fn get(&self, id: ChannelId) -> &Channel {
        &self.channels[id.index()]
    }

    /// Enable or disable a channel. Returns `true` if the flag changed, in
    /// which case the connectivity state is reset to `Unknown`.
    pub fn set_enabled(&mut self, id: ChannelId, enabled: bool) -> bool {
        let channel = &mut self.channels[id.index()];
        if channel.enabled == enabled {
            return false;
        }
        channel.enabled = enabled;
        channel.state = ConnectivityState::Unknown;
        true
    }

    /// Change a channel's thermocouple type. Returns `true` if it changed.
    pub fn set_sensor_type(&mut self, id: ChannelId, sensor_type: SensorType) -> bool {
        let channel = &mut self.channels[id.index()];
        if channel.sensor_type == sensor_type {
            return false;
        }
        channel.sensor_type = sensor_type;
        channel.state = ConnectivityState::Unknown;
        true
    }

    /// Record a connectivity classification.
    pub fn set_state(&mut self, id: ChannelId, state: ConnectivityState) {
        self.channels[id.index()].state = state;
    }

    /// Enabled channel ids in ascending order.
    pub fn enabled(&self) -> Vec<ChannelId> {
        self.channels
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.id)
            .collect()
    }

    /// Iterate all channels in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_ids_are_one_based() {
        assert!(ChannelId::new(0).is_err());
        assert!(ChannelId::new(9).is_err());
        let ch = ChannelId::new(8).unwrap();
        assert_eq!(ch.index(), 7);
        assert_eq!(ch.to_string(), "CH8");
        assert_eq!(ChannelId::all().count(), CHANNEL_COUNT);
    }

    #[test]
    fn sensor_type_parsing() {
        assert_eq!("k".parse::<SensorType>().unwrap(), SensorType::K);
        assert_eq!(" T ".parse::<SensorType>().unwrap(), SensorType::T);
        assert!("KK".parse::<SensorType>().is_err());
        assert!("X".parse::<SensorType>().is_err());
        assert_eq!(SensorType::B.device_code(), 0);
        assert_eq!(SensorType::T.device_code(), 7);
    }

    #[test]
    fn sensor_type_serde_uses_letters() {
        let json = serde_json::to_string(&SensorType::J).unwrap();
        assert_eq!(json, "\"J\"");
        let back: SensorType = serde_json::from_str("\"n\"").unwrap();
        assert_eq!(back, SensorType::N);
    }

    #[test]
    fn reconfiguration_resets_state() {
        let mut table = ChannelTable::default();
        let ch = ChannelId::new(3).unwrap();
        table.set_state(ch, ConnectivityState::Connected);

        assert!(!table.set_enabled(ch, true));
        assert_eq!(table.get(ch).state, ConnectivityState::Connected);

        assert!(table.set_sensor_type(ch, SensorType::J));
        assert_eq!(table.get(ch).state, ConnectivityState::Unknown);

        assert!(table.set_enabled(ch, false));
        assert_eq!(table.enabled().len(), CHANNEL_COUNT - 1);
        assert!(!table.enabled().contains(&ch));
    }
}
