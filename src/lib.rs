//! Streaming acquisition and generation tasks for multi-channel DAQ
//! hardware.
//!
//! A task is described by a list of [`channel::ChannelDescriptor`]s plus a
//! [`timing::TimingSpec`] and optional [`timing::TriggerSpec`], and runs
//! against any [`driver::Driver`] backend. Input tasks push
//! [`buffer::SampleBuffer`]s to a [`sink::BufferSink`] from a dedicated
//! acquisition thread; output tasks drain an iterator of buffers into
//! paced hardware writes. Teardown is deterministic on every exit path:
//! stop, then dispose, exactly once.

pub mod buffer;
pub mod channel;
pub mod driver;
pub mod error;
pub mod input;
pub mod output;
pub mod sink;
pub mod task;
pub mod timing;

pub use buffer::{PortArray, PortState, SampleBuffer, Samples};
pub use channel::ChannelDescriptor;
pub use error::Error;
pub use input::{AnalogInput, DigitalInput, Subscription};
pub use output::{AnalogOutput, DigitalOutput};
pub use sink::{BufferSink, SinkFlow};
pub use timing::{TimingSpec, TriggerSpec};
