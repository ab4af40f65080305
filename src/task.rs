//! Device task lifecycle.
//!
//! [`TaskResource`] owns one driver task and enforces the forward-only
//! lifecycle `Built -> Verified -> Started -> Stopped -> Disposed`.
//! [`TaskGuard`] is the single owner of teardown: stop then dispose on every
//! exit path, exactly once.

use ndarray::ArrayView2;
use tracing::{debug, info, warn};

use crate::buffer::SampleBuffer;
use crate::channel::{ChannelDescriptor, Direction, SignalKind};
use crate::driver::{Driver, DriverTask};
use crate::error::Error;
use crate::timing::{QuantityMode, TimingSpec, TriggerSpec};

/// Lifecycle state of a device task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Built,
    Verified,
    Started,
    Stopped,
    Disposed,
}

/// A built hardware task plus the shape facts the engine checks buffers
/// against.
pub struct TaskResource<T: DriverTask> {
    task: T,
    state: TaskState,
    channel_count: usize,
    kind: SignalKind,
    direction: Direction,
    quantity_mode: QuantityMode,
}

impl<T: DriverTask> TaskResource<T> {
    /// Build a task from a channel set plus optional timing and trigger.
    ///
    /// Allocation is eager: the device task and its channels are created
    /// here, so configuration errors surface before any stream activity.
    pub fn build<D: Driver<Task = T>>(
        driver: &D,
        descriptors: &[ChannelDescriptor],
        timing: Option<&TimingSpec>,
        trigger: Option<&TriggerSpec>,
    ) -> Result<Self, Error> {
        let first = descriptors
            .first()
            .ok_or_else(|| Error::Config("task has no channels".into()))?;
        let direction = first.direction();
        let kind = first.kind();
        if let Some(mixed) = descriptors
            .iter()
            .find(|d| d.direction() != direction || d.kind() != kind)
        {
            return Err(Error::Config(format!(
                "channel {} mixes direction or signal kind within one task",
                mixed.label()
            )));
        }
        if trigger.is_some() && direction != Direction::Input {
            return Err(Error::Config(
                "start triggers only apply to input tasks".into(),
            ));
        }

        let mut task = driver.create_task().map_err(Error::config)?;
        for descriptor in descriptors {
            debug!(channel = descriptor.label(), "creating virtual channel");
            task.create_channel(descriptor).map_err(Error::config)?;
        }
        if let Some(timing) = timing {
            debug!(
                rate = timing.sample_rate,
                source = %timing.clock_source,
                "configuring sample clock"
            );
            task.configure_sample_clock(timing).map_err(Error::config)?;
        }
        if let Some(trigger) = trigger {
            debug!(terminal = %trigger.terminal, "configuring start trigger");
            task.configure_start_trigger(trigger)
                .map_err(Error::config)?;
        }

        Ok(Self {
            task,
            state: TaskState::Built,
            channel_count: descriptors.len(),
            kind,
            direction,
            quantity_mode: timing.map(|t| t.quantity_mode).unwrap_or_default(),
        })
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn quantity_mode(&self) -> QuantityMode {
        self.quantity_mode
    }

    /// Ask the driver to validate the assembled task. Must precede `start`.
    pub fn verify(&mut self) -> Result<(), Error> {
        self.expect_state(TaskState::Built, "verify")?;
        self.task.verify().map_err(Error::verify)?;
        self.state = TaskState::Verified;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), Error> {
        self.expect_state(TaskState::Verified, "start")?;
        self.task.start().map_err(Error::hardware)?;
        self.state = TaskState::Started;
        info!("task started");
        Ok(())
    }

    /// Stop the task. Stopping an already stopped (or never started) task is
    /// a no-op; drivers reporting "already stopped" are treated as benign.
    pub fn stop(&mut self) -> Result<(), Error> {
        match self.state {
            TaskState::Started => {
                self.state = TaskState::Stopped;
                match self.task.stop() {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        warn!(error = %err, "driver reported an error on stop");
                        Err(Error::hardware(err))
                    }
                }
            }
            TaskState::Disposed => Err(Error::Config("stop called on a disposed task".into())),
            _ => Ok(()),
        }
    }

    /// Block until the device reports finite generation complete.
    pub fn wait_until_done(&mut self) -> Result<(), Error> {
        self.expect_state(TaskState::Started, "wait_until_done")?;
        self.task.wait_until_done().map_err(Error::hardware)
    }

    /// Release the device resource. Called exactly once, by [`TaskGuard`].
    fn dispose(&mut self) -> Result<(), Error> {
        if self.state == TaskState::Disposed {
            return Err(Error::Config("task disposed twice".into()));
        }
        self.state = TaskState::Disposed;
        self.task.dispose().map_err(Error::hardware)
    }

    /// One blocking read. `Ok(None)` means the driver's bounded timeout
    /// elapsed with no data; the caller may retry.
    pub fn read_analog(
        &mut self,
        samples_per_channel: usize,
    ) -> Result<Option<SampleBuffer<f64>>, Error> {
        self.expect_state(TaskState::Started, "read")?;
        let Some(data) = self
            .task
            .read_analog(samples_per_channel)
            .map_err(Error::hardware)?
        else {
            return Ok(None);
        };
        self.check_read_shape(data.nrows(), data.ncols(), samples_per_channel)?;
        Ok(Some(SampleBuffer::from_array(data)))
    }

    pub fn read_digital_u8(
        &mut self,
        samples_per_channel: usize,
    ) -> Result<Option<SampleBuffer<u8>>, Error> {
        self.expect_state(TaskState::Started, "read")?;
        let Some(data) = self
            .task
            .read_digital_u8(samples_per_channel)
            .map_err(Error::hardware)?
        else {
            return Ok(None);
        };
        self.check_read_shape(data.nrows(), data.ncols(), samples_per_channel)?;
        Ok(Some(SampleBuffer::from_array(data)))
    }

    pub fn write_analog(
        &mut self,
        samples: ArrayView2<'_, f64>,
        auto_start: bool,
    ) -> Result<usize, Error> {
        self.check_write_shape(samples.nrows())?;
        let written = self
            .task
            .write_analog(samples, auto_start)
            .map_err(Error::hardware)?;
        self.note_auto_start(auto_start);
        Ok(written)
    }

    pub fn write_digital_lines(
        &mut self,
        samples: ArrayView2<'_, u8>,
        auto_start: bool,
    ) -> Result<usize, Error> {
        self.check_write_shape(samples.nrows())?;
        let written = self
            .task
            .write_digital_lines(samples, auto_start)
            .map_err(Error::hardware)?;
        self.note_auto_start(auto_start);
        Ok(written)
    }

    pub fn write_digital_u8(
        &mut self,
        samples: ArrayView2<'_, u8>,
        auto_start: bool,
    ) -> Result<usize, Error> {
        self.check_write_shape(samples.nrows())?;
        let written = self
            .task
            .write_digital_u8(samples, auto_start)
            .map_err(Error::hardware)?;
        self.note_auto_start(auto_start);
        Ok(written)
    }

    pub fn write_digital_u16(
        &mut self,
        samples: ArrayView2<'_, u16>,
        auto_start: bool,
    ) -> Result<usize, Error> {
        self.check_write_shape(samples.nrows())?;
        let written = self
            .task
            .write_digital_u16(samples, auto_start)
            .map_err(Error::hardware)?;
        self.note_auto_start(auto_start);
        Ok(written)
    }

    pub fn write_digital_u32(
        &mut self,
        samples: ArrayView2<'_, u32>,
        auto_start: bool,
    ) -> Result<usize, Error> {
        self.check_write_shape(samples.nrows())?;
        let written = self
            .task
            .write_digital_u32(samples, auto_start)
            .map_err(Error::hardware)?;
        self.note_auto_start(auto_start);
        Ok(written)
    }

    /// An auto-start write starts the task on the device side; mirror that
    /// transition so teardown sees the task as started.
    fn note_auto_start(&mut self, auto_start: bool) {
        if auto_start && matches!(self.state, TaskState::Built | TaskState::Verified) {
            self.state = TaskState::Started;
        }
    }

    fn expect_state(&self, expected: TaskState, operation: &str) -> Result<(), Error> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "{operation} requires task state {expected:?}, task is {:?}",
                self.state
            )))
        }
    }

    fn check_read_shape(&self, rows: usize, cols: usize, requested: usize) -> Result<(), Error> {
        if rows != self.channel_count || cols != requested {
            return Err(Error::Hardware(format!(
                "driver returned a {rows}x{cols} buffer for a {}-channel read of {requested} \
                 samples per channel",
                self.channel_count
            )));
        }
        Ok(())
    }

    fn check_write_shape(&self, rows: usize) -> Result<(), Error> {
        if rows != self.channel_count {
            return Err(Error::Config(format!(
                "buffer has {rows} channel rows but the task has {} channels",
                self.channel_count
            )));
        }
        Ok(())
    }
}

/// Scoped owner of a task's teardown.
///
/// Whatever way the surrounding stream ends, dropping the guard stops the
/// task and then disposes it, in that order, exactly once. For finite
/// generation the guard first waits for hardware completion; [`abort`]
/// cancels that wait for the write-error path.
///
/// [`abort`]: TaskGuard::abort
pub struct TaskGuard<T: DriverTask> {
    resource: TaskResource<T>,
    wait_on_teardown: bool,
    torn_down: bool,
}

impl<T: DriverTask> TaskGuard<T> {
    pub fn new(resource: TaskResource<T>) -> Self {
        let wait_on_teardown = resource.direction() == Direction::Output
            && resource.quantity_mode() == QuantityMode::Finite;
        Self {
            resource,
            wait_on_teardown,
            torn_down: false,
        }
    }

    pub fn resource(&mut self) -> &mut TaskResource<T> {
        &mut self.resource
    }

    /// Stop immediately, skipping any completion wait. Used when a write
    /// fails mid-sequence so the task is not left running.
    pub fn abort(&mut self) {
        self.wait_on_teardown = false;
        if let Err(err) = self.resource.stop() {
            warn!(error = %err, "stop on abort failed");
        }
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        if self.wait_on_teardown && self.resource.state() == TaskState::Started {
            if let Err(err) = self.resource.wait_until_done() {
                warn!(error = %err, "wait for finite generation failed during teardown");
            }
        }
        if let Err(err) = self.resource.stop() {
            warn!(error = %err, "stop during teardown failed");
        }
        if let Err(err) = self.resource.dispose() {
            warn!(error = %err, "dispose during teardown failed");
        }
        info!("task released");
    }
}

impl<T: DriverTask> Drop for TaskGuard<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;

    fn analog_pair() -> Vec<ChannelDescriptor> {
        vec![
            ChannelDescriptor::analog_input("Dev1/ai0"),
            ChannelDescriptor::analog_input("Dev1/ai1"),
        ]
    }

    #[test]
    fn build_rejects_empty_channel_list() {
        let driver = MockDriver::new();
        let result = TaskResource::build(&driver, &[], None, None);
        assert!(matches!(result, Err(Error::Config(_))));
        // No hardware resource may be allocated for a rejected build.
        assert_eq!(driver.created_tasks(), 0);
    }

    #[test]
    fn build_rejects_mixed_directions() {
        let driver = MockDriver::new();
        let descriptors = vec![
            ChannelDescriptor::analog_input("Dev1/ai0"),
            ChannelDescriptor::analog_output("Dev1/ao0"),
        ];
        let result = TaskResource::build(&driver, &descriptors, None, None);
        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(driver.created_tasks(), 0);
    }

    #[test]
    fn build_rejects_trigger_on_output_task() {
        let driver = MockDriver::new();
        let descriptors = vec![ChannelDescriptor::analog_output("Dev1/ao0")];
        let trigger = TriggerSpec::rising("/Dev1/PFI0");
        let result = TaskResource::build(&driver, &descriptors, None, Some(&trigger));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn start_requires_verify() {
        let driver = MockDriver::new();
        let mut resource = TaskResource::build(&driver, &analog_pair(), None, None).unwrap();
        assert!(matches!(resource.start(), Err(Error::Config(_))));
        resource.verify().unwrap();
        resource.start().unwrap();
        assert_eq!(resource.state(), TaskState::Started);
    }

    #[test]
    fn stop_is_idempotent() {
        let driver = MockDriver::new();
        let mut resource = TaskResource::build(&driver, &analog_pair(), None, None).unwrap();
        resource.verify().unwrap();
        resource.start().unwrap();
        resource.stop().unwrap();
        resource.stop().unwrap();
        assert_eq!(driver.history().stop_count(), 1);
    }

    #[test]
    fn guard_runs_stop_then_dispose_once() {
        let driver = MockDriver::new();
        let mut resource = TaskResource::build(&driver, &analog_pair(), None, None).unwrap();
        resource.verify().unwrap();
        resource.start().unwrap();
        drop(TaskGuard::new(resource));

        let history = driver.history();
        assert_eq!(history.stop_count(), 1);
        assert_eq!(history.dispose_count(), 1);
        assert!(history.stopped_before_disposed());
    }

    #[test]
    fn driver_rejection_at_verify_maps_to_verify_error() {
        let driver = MockDriver::new().fail_verify("rate unsupported");
        let mut resource = TaskResource::build(&driver, &analog_pair(), None, None).unwrap();
        assert!(matches!(resource.verify(), Err(Error::Verify(_))));
    }

    #[test]
    fn driver_rejection_at_channel_creation_maps_to_config_error() {
        let driver = MockDriver::new().fail_channel_creation("no such terminal");
        let result = TaskResource::build(&driver, &analog_pair(), None, None);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
