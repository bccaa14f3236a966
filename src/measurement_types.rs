//! Reading types produced by the acquisition worker.
//!
//! A [`Reading`] is an immutable sample of one channel; a [`ReadingBatch`]
//! groups the readings of one poll cycle in ascending channel order. Batches
//! are broadcast to subscribers and handed to the persistence writer.

use crate::channel::{ChannelId, CHANNEL_COUNT};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a reading came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// The acquisition card.
    Hardware,
    /// The synthetic generator used when no card is available.
    Synthetic,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Hardware => f.write_str("hardware"),
            SourceKind::Synthetic => f.write_str("synthetic"),
        }
    }
}

/// One sample of one channel.
///
/// `value` is in °C and is NaN when the read failed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Time of the poll cycle that produced the sample
    pub timestamp: DateTime<Local>,
    /// Channel sampled
    pub channel: ChannelId,
    /// Temperature in °C, NaN on failure
    pub value: f64,
    /// Source that produced the sample
    pub source: SourceKind,
}

impl Reading {
    /// Whether the read succeeded.
    pub fn is_valid(&self) -> bool {
        !self.value.is_nan()
    }
}

/// The readings of one poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingBatch {
    /// Monotonic cycle counter, starting at 1 for each run
    pub cycle: u64,
    /// Cycle timestamp shared by every reading in the batch
    pub timestamp: DateTime<Local>,
    /// Readings of the enabled channels, ascending by channel id
    pub readings: Vec<Reading>,
}

impl ReadingBatch {
    /// Value for a channel, if it was polled this cycle.
    pub fn value(&self, channel: ChannelId) -> Option<f64> {
        self.readings
            .iter()
            .find(|r| r.channel == channel)
            .map(|r| r.value)
    }

    /// Values positioned by channel (CH1 first); `None` for channels not polled.
    pub fn row(&self) -> [Option<f64>; CHANNEL_COUNT] {
        let mut row = [None; CHANNEL_COUNT];
        for reading in &self.readings {
            row[reading.channel.index()] = Some(reading.value);
        }
        row
    }

    /// Number of readings that failed this cycle.
    pub fn failed_count(&self) -> usize {
        self.readings.iter().filter(|r| !r.is_valid()).count()
    }
}
