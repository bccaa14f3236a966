//! Hardware Abstraction
//!
//! - [`capabilities`]: the traits a thermocouple driver implements
//! - [`mock`]: a scriptable simulated card
//! - [`synthetic`]: the generator used when no card is available
//! - [`source`]: the [`DataSource`] the acquisition worker polls, and the
//!   one-time hardware/synthetic selection

pub mod capabilities;
pub mod mock;
pub mod source;
pub mod synthetic;

pub use capabilities::{DeviceConnector, DeviceError, NoHardware, ThermocoupleDevice};
pub use mock::{ChannelFault, MockConnector, MockThermocouple};
pub use source::{
    select_source, ChannelSample, DataSource, HardwareSource, PollOutcome, SourceSelection,
};
pub use synthetic::SyntheticSource;
