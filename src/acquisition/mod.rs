//! Acquisition Loop
//!
//! ```text
//!  AcquisitionController ──commands (mpsc)──▶ AcquisitionWorker (tokio task)
//!          │    ▲                                   │
//!          │    └──────── DataSource (on stop) ─────┤
//!          │                                        ├─▶ ChannelStateTracker
//!          ▼                                        ├─▶ PersistenceWriter (shared)
//!  subscribers ◀──────── AcquisitionEvent (broadcast)┤
//!                                                   └─▶ DiagnosticSink
//! ```
//!
//! The controller is the command surface used by front ends. It selects the
//! data source once, spawns the worker on start and takes the source back when
//! the worker stops, so a restarted run keeps using the same source.

pub mod controller;
pub mod worker;

pub use controller::AcquisitionController;
pub use worker::AcquisitionWorker;

use crate::channel::{ChannelId, ConnectivityState, SensorType};
use crate::measurement_types::{ReadingBatch, SourceKind};
use std::time::Duration;

/// Capacity of the event broadcast channel. Slow subscribers lag rather than
/// block the worker.
pub const EVENT_CAPACITY: usize = 256;

/// Notifications published to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionEvent {
    /// One poll cycle completed
    NewReadings(ReadingBatch),
    /// A channel was plugged in or unplugged
    ConnectivityChanged {
        /// Channel that changed
        channel: ChannelId,
        /// New state
        state: ConnectivityState,
    },
    /// A channel could not be read this cycle
    ReadFailed {
        /// Channel that failed
        channel: ChannelId,
        /// Driver-reported reason
        reason: String,
    },
    /// A session was started or stopped
    SessionStateChanged {
        /// Whether a session is now active
        active: bool,
    },
    /// The data source was chosen
    SourceSelected(SourceKind),
    /// Hardware could not be used; synthetic data from now on
    SourceFallback {
        /// Why the hardware was abandoned
        reason: String,
    },
}

/// Commands applied by the worker between cycles.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerCommand {
    /// A channel was enabled or disabled
    ChannelEnabled(ChannelId, bool),
    /// A channel's thermocouple type changed
    SensorTypeChanged(ChannelId, SensorType),
    /// New poll interval
    SetPollInterval(Duration),
}
