//! Stream-mode acquisition on LabJack T-series devices.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rust_ljm::{ConnectionType, DeviceType, LabJackDevice, MockLjm, StreamSettings};
//!
//! # fn main() -> Result<(), rust_ljm::LjmError> {
//! let device = LabJackDevice::open(Arc::new(MockLjm::new()), DeviceType::T7, ConnectionType::Usb, "ANY")?;
//! let recording = device.stream_in(
//!     StreamSettings::new(["AIN0", "AIN1"]).with_sampling_rate(1000.0).with_duration(0.1),
//! )?;
//! assert_eq!(recording.records.len(), 2);
//! # Ok(())
//! # }
//! ```

mod acquisition;
mod plan;
mod records;
mod trigger;

pub use acquisition::StreamIn;
pub use plan::{AnalogInputSettings, StreamPlan, StreamSettings, DEFAULT_SAMPLING_RATE_HZ};
pub use records::{deinterleave, ChannelRecord, ReadSummary, StreamRecording};
pub use trigger::{
    TriggerEdge, TriggerMode, TriggerSettings, DEFAULT_TRIGGER_CHANNEL, STREAM_TRIGGER_INDEX,
};
