//! Hardware driver capability.
//!
//! The task engine never talks to a device directly; it is handed a
//! [`Driver`] and drives the [`DriverTask`]s it creates. Backends live in
//! submodules behind cargo features so the engine and its tests run without
//! any vendor runtime installed.

use ndarray::{Array2, ArrayView2};

use crate::channel::{ChannelDescriptor, Direction, SignalKind};
use crate::error::DriverError;
use crate::timing::{TimingSpec, TriggerSpec};

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "nidaq")]
pub mod nidaq;

/// Entry point of a hardware backend.
pub trait Driver {
    type Task: DriverTask;

    /// Allocate a fresh device task. One task per stream subscription.
    fn create_task(&self) -> Result<Self::Task, DriverError>;

    /// Names of the physical channels available for the given kind and
    /// direction. Advisory only: configuration tooling uses it to populate
    /// pickers, the runtime engine never calls it.
    fn physical_channels(
        &self,
        kind: SignalKind,
        direction: Direction,
    ) -> Result<Vec<String>, DriverError>;
}

/// One device-side sampling task.
///
/// All calls are blocking; the engine owns threading and never issues two
/// calls to the same task concurrently. Reads return row-major buffers with
/// one row per virtual channel in creation order. `dispose` releases the
/// device resource and is called exactly once, after `stop`.
pub trait DriverTask: Send + 'static {
    fn create_channel(&mut self, descriptor: &ChannelDescriptor) -> Result<(), DriverError>;

    fn configure_sample_clock(&mut self, timing: &TimingSpec) -> Result<(), DriverError>;

    fn configure_start_trigger(&mut self, trigger: &TriggerSpec) -> Result<(), DriverError>;

    fn verify(&mut self) -> Result<(), DriverError>;

    fn start(&mut self) -> Result<(), DriverError>;

    fn stop(&mut self) -> Result<(), DriverError>;

    /// Block until the device reports the programmed sample count has been
    /// generated. Finite generation only.
    fn wait_until_done(&mut self) -> Result<(), DriverError>;

    fn dispose(&mut self) -> Result<(), DriverError>;

    /// Blocking read of `samples_per_channel` voltage samples per channel.
    ///
    /// Backends must not block indefinitely: when no data arrives within the
    /// backend's own bounded timeout, the read returns `Ok(None)` with no
    /// samples consumed, and the caller decides whether to retry. This is
    /// what keeps cancellation responsive while a start trigger is armed but
    /// has not fired.
    fn read_analog(
        &mut self,
        samples_per_channel: usize,
    ) -> Result<Option<Array2<f64>>, DriverError>;

    /// Blocking read of `samples_per_channel` port/line samples per channel.
    /// Same timeout contract as [`read_analog`].
    ///
    /// [`read_analog`]: DriverTask::read_analog
    fn read_digital_u8(
        &mut self,
        samples_per_channel: usize,
    ) -> Result<Option<Array2<u8>>, DriverError>;

    /// Write a voltage burst; returns samples written per channel.
    fn write_analog(
        &mut self,
        samples: ArrayView2<'_, f64>,
        auto_start: bool,
    ) -> Result<usize, DriverError>;

    /// Write per-line logic levels, one row per line channel.
    fn write_digital_lines(
        &mut self,
        samples: ArrayView2<'_, u8>,
        auto_start: bool,
    ) -> Result<usize, DriverError>;

    fn write_digital_u8(
        &mut self,
        samples: ArrayView2<'_, u8>,
        auto_start: bool,
    ) -> Result<usize, DriverError>;

    fn write_digital_u16(
        &mut self,
        samples: ArrayView2<'_, u16>,
        auto_start: bool,
    ) -> Result<usize, DriverError>;

    fn write_digital_u32(
        &mut self,
        samples: ArrayView2<'_, u32>,
        auto_start: bool,
    ) -> Result<usize, DriverError>;
}
