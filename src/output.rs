//! Output operators: draining sample sequences into the device.
//!
//! All writes are synchronous on the calling thread. Unclocked modes write
//! each incoming element immediately with auto-start; buffer modes configure
//! the sample clock and write multi-sample bursts. If any write fails, the
//! task is stopped before the error propagates and no further elements are
//! written. Finite generation waits for hardware completion at teardown;
//! continuous generation stops immediately.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::buffer::{PortArray, PortState, SampleBuffer, Samples};
use crate::channel::ChannelDescriptor;
use crate::driver::{Driver, DriverTask};
use crate::error::Error;
use crate::task::{TaskGuard, TaskResource};
use crate::timing::TimingSpec;

/// Drain `source` into the task, aborting on the first write failure.
///
/// The guard teardown runs when this returns, so on the error path the task
/// is already stopped and is released before the caller sees the error.
fn drain<T, I, W>(mut guard: TaskGuard<T>, source: I, mut write: W) -> Result<(), Error>
where
    T: DriverTask,
    I: IntoIterator,
    W: FnMut(&mut TaskResource<T>, I::Item) -> Result<(), Error>,
{
    for element in source {
        if let Err(err) = write(guard.resource(), element) {
            guard.abort();
            return Err(err);
        }
    }
    Ok(())
}

/// Replicate one value across every channel row, one sample column.
fn broadcast<T: Clone>(value: T, channels: usize) -> Array2<T> {
    Array2::from_elem((channels, 1), value)
}

fn column<T: Clone>(values: &[T]) -> Array2<T> {
    Array2::from_shape_vec((values.len(), 1), values.to_vec())
        .expect("a k-element vector always forms a k x 1 column")
}

/// Generates voltages on one or more analog output channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalogOutput {
    pub channels: Vec<ChannelDescriptor>,
    #[serde(default)]
    pub timing: TimingSpec,
}

impl AnalogOutput {
    pub fn new(channels: Vec<ChannelDescriptor>) -> Self {
        Self {
            channels,
            timing: TimingSpec::default(),
        }
    }

    pub fn with_timing(mut self, timing: TimingSpec) -> Self {
        self.timing = timing;
        self
    }

    fn check_channels(&self) -> Result<(), Error> {
        match self
            .channels
            .iter()
            .find(|c| !matches!(c, ChannelDescriptor::AnalogOutput { .. }))
        {
            Some(wrong) => Err(Error::Config(format!(
                "analog output task cannot use channel {}",
                wrong.label()
            ))),
            None => Ok(()),
        }
    }

    fn build_guard<D: Driver>(&self, driver: &D, clocked: bool) -> Result<TaskGuard<D::Task>, Error> {
        self.check_channels()?;
        let timing = clocked.then_some(&self.timing);
        let resource = TaskResource::build(driver, &self.channels, timing, None)?;
        // Guarded from here on: a verify failure still disposes.
        let mut guard = TaskGuard::new(resource);
        guard.resource().verify()?;
        Ok(guard)
    }

    /// Write one voltage per notification, replicated across all channels.
    /// No sample clock is configured; every write auto-starts the task.
    pub fn write_scalars<D, I>(&self, driver: &D, source: I) -> Result<(), Error>
    where
        D: Driver,
        I: IntoIterator<Item = f64>,
    {
        let guard = self.build_guard(driver, false)?;
        let channels = self.channels.len();
        drain(guard, source, |resource, value| {
            resource
                .write_analog(broadcast(value, channels).view(), true)
                .map(drop)
        })
    }

    /// Write one multi-channel voltage burst per incoming buffer, paced by
    /// the sample clock configured from the timing spec.
    pub fn write_buffers<D, I>(&self, driver: &D, source: I) -> Result<(), Error>
    where
        D: Driver,
        I: IntoIterator<Item = SampleBuffer<f64>>,
    {
        let guard = self.build_guard(driver, true)?;
        info!(
            channels = self.channels.len(),
            rate = self.timing.sample_rate,
            mode = ?self.timing.quantity_mode,
            "analog generation started"
        );
        drain(guard, source, |resource, buffer| {
            resource.write_analog(buffer.view(), true).map(drop)
        })
    }

    /// Like [`write_buffers`], but for run-time-typed buffers: anything other
    /// than 64-bit float samples fails before the write is attempted.
    ///
    /// [`write_buffers`]: AnalogOutput::write_buffers
    pub fn write_samples<D, I>(&self, driver: &D, source: I) -> Result<(), Error>
    where
        D: Driver,
        I: IntoIterator<Item = Samples>,
    {
        let guard = self.build_guard(driver, true)?;
        drain(guard, source, |resource, samples| match samples {
            Samples::F64(buffer) => resource.write_analog(buffer.view(), true).map(drop),
            other => Err(Error::UnsupportedSampleType {
                found: other.element_kind(),
                expected: "analog",
            }),
        })
    }
}

/// Generates logic levels on one or more digital output channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigitalOutput {
    pub channels: Vec<ChannelDescriptor>,
    #[serde(default)]
    pub timing: TimingSpec,
}

impl DigitalOutput {
    pub fn new(channels: Vec<ChannelDescriptor>) -> Self {
        Self {
            channels,
            timing: TimingSpec::default(),
        }
    }

    pub fn with_timing(mut self, timing: TimingSpec) -> Self {
        self.timing = timing;
        self
    }

    fn check_channels(&self) -> Result<(), Error> {
        match self
            .channels
            .iter()
            .find(|c| !matches!(c, ChannelDescriptor::DigitalOutput { .. }))
        {
            Some(wrong) => Err(Error::Config(format!(
                "digital output task cannot use channel {}",
                wrong.label()
            ))),
            None => Ok(()),
        }
    }

    fn build_guard<D: Driver>(&self, driver: &D, clocked: bool) -> Result<TaskGuard<D::Task>, Error> {
        self.check_channels()?;
        let timing = clocked.then_some(&self.timing);
        let resource = TaskResource::build(driver, &self.channels, timing, None)?;
        let mut guard = TaskGuard::new(resource);
        guard.resource().verify()?;
        Ok(guard)
    }

    /// Write one logic level per notification to every line channel.
    pub fn write_line_states<D, I>(&self, driver: &D, source: I) -> Result<(), Error>
    where
        D: Driver,
        I: IntoIterator<Item = bool>,
    {
        let guard = self.build_guard(driver, false)?;
        let channels = self.channels.len();
        drain(guard, source, |resource, level| {
            resource
                .write_digital_lines(broadcast(level as u8, channels).view(), true)
                .map(drop)
        })
    }

    /// Write one per-line level array per notification; the array length
    /// must match the channel count.
    pub fn write_line_arrays<D, I>(&self, driver: &D, source: I) -> Result<(), Error>
    where
        D: Driver,
        I: IntoIterator<Item = Vec<bool>>,
    {
        let guard = self.build_guard(driver, false)?;
        drain(guard, source, |resource, levels| {
            let levels: Vec<u8> = levels.iter().map(|&level| level as u8).collect();
            resource
                .write_digital_lines(column(&levels).view(), true)
                .map(drop)
        })
    }

    /// Write one port bitmask per notification, replicated across all port
    /// channels, in the width the sample carries.
    pub fn write_port_states<D, I>(&self, driver: &D, source: I) -> Result<(), Error>
    where
        D: Driver,
        I: IntoIterator<Item = PortState>,
    {
        let guard = self.build_guard(driver, false)?;
        let channels = self.channels.len();
        drain(guard, source, |resource, state| match state {
            PortState::U8(value) => resource
                .write_digital_u8(broadcast(value, channels).view(), true)
                .map(drop),
            PortState::U16(value) => resource
                .write_digital_u16(broadcast(value, channels).view(), true)
                .map(drop),
            PortState::U32(value) => resource
                .write_digital_u32(broadcast(value, channels).view(), true)
                .map(drop),
        })
    }

    /// Write one port sample per channel per notification; the array length
    /// must match the channel count.
    pub fn write_port_arrays<D, I>(&self, driver: &D, source: I) -> Result<(), Error>
    where
        D: Driver,
        I: IntoIterator<Item = PortArray>,
    {
        let guard = self.build_guard(driver, false)?;
        drain(guard, source, |resource, states| match states {
            PortArray::U8(values) => resource
                .write_digital_u8(column(&values).view(), true)
                .map(drop),
            PortArray::U16(values) => resource
                .write_digital_u16(column(&values).view(), true)
                .map(drop),
            PortArray::U32(values) => resource
                .write_digital_u32(column(&values).view(), true)
                .map(drop),
        })
    }

    /// Write one multi-channel burst per incoming buffer, paced by the
    /// sample clock. Boolean buffers map to per-line writes, 8/16/32-bit
    /// buffers to port writes; any other element type fails with
    /// [`Error::UnsupportedSampleType`] before the write is attempted.
    pub fn write_buffers<D, I>(&self, driver: &D, source: I) -> Result<(), Error>
    where
        D: Driver,
        I: IntoIterator<Item = Samples>,
    {
        let guard = self.build_guard(driver, true)?;
        info!(
            channels = self.channels.len(),
            rate = self.timing.sample_rate,
            mode = ?self.timing.quantity_mode,
            "digital generation started"
        );
        drain(guard, source, |resource, samples| match samples {
            Samples::Bool(buffer) => {
                let levels = buffer.into_array().mapv(|level| level as u8);
                resource.write_digital_lines(levels.view(), true).map(drop)
            }
            Samples::U8(buffer) => resource.write_digital_u8(buffer.view(), true).map(drop),
            Samples::U16(buffer) => resource.write_digital_u16(buffer.view(), true).map(drop),
            Samples::U32(buffer) => resource.write_digital_u32(buffer.view(), true).map(drop),
            other => Err(Error::UnsupportedSampleType {
                found: other.element_kind(),
                expected: "digital port",
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::{Call, MockDriver};

    fn port_output(timing: TimingSpec) -> DigitalOutput {
        DigitalOutput::new(vec![ChannelDescriptor::digital_output_port("Dev1/port0")])
            .with_timing(timing)
    }

    #[test]
    fn scalar_mode_skips_clock_configuration() {
        let driver = MockDriver::new();
        let output = AnalogOutput::new(vec![ChannelDescriptor::analog_output("Dev1/ao0")]);
        output.write_scalars(&driver, [1.0, 2.0, 3.0]).unwrap();

        let history = driver.history();
        assert_eq!(history.write_count(), 3);
        assert!(
            !history
                .calls()
                .iter()
                .any(|c| matches!(c, Call::ConfigureSampleClock { .. }))
        );
    }

    #[test]
    fn scalar_writes_cover_all_channels() {
        let driver = MockDriver::new();
        let output = AnalogOutput::new(vec![
            ChannelDescriptor::analog_output("Dev1/ao0"),
            ChannelDescriptor::analog_output("Dev1/ao1"),
        ]);
        output.write_scalars(&driver, [0.5]).unwrap();
        assert!(
            driver
                .history()
                .calls()
                .contains(&Call::WriteAnalog { channels: 2, samples: 1 })
        );
    }

    #[test]
    fn line_states_write_one_level_to_every_line() {
        let driver = MockDriver::new();
        let output = DigitalOutput::new(vec![
            ChannelDescriptor::digital_output("Dev1/port0/line0"),
            ChannelDescriptor::digital_output("Dev1/port0/line1"),
        ]);
        output
            .write_line_states(&driver, [true, false, true])
            .unwrap();

        let history = driver.history();
        assert_eq!(history.write_count(), 3);
        assert_eq!(
            history
                .calls()
                .iter()
                .filter(|c| *c == &Call::WriteDigitalLines { channels: 2, samples: 1 })
                .count(),
            3
        );
    }

    #[test]
    fn port_arrays_write_one_sample_per_channel_in_declared_width() {
        let driver = MockDriver::new();
        let output = DigitalOutput::new(vec![
            ChannelDescriptor::digital_output_port("Dev1/port0"),
            ChannelDescriptor::digital_output_port("Dev1/port1"),
        ]);
        output
            .write_port_arrays(&driver, [PortArray::U32(vec![0xDEAD_BEEF, 0x0000_FFFF])])
            .unwrap();
        assert!(driver.history().calls().contains(&Call::WriteDigitalPort {
            channels: 2,
            samples: 1,
            width: 32,
        }));
    }

    #[test]
    fn port_array_length_must_match_channel_count() {
        let driver = MockDriver::new();
        let output = port_output(TimingSpec::default());
        let err = output
            .write_port_arrays(&driver, [PortArray::U8(vec![1, 2])])
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn analog_samples_reject_non_float_buffers_before_any_write() {
        let driver = MockDriver::new();
        let output = AnalogOutput::new(vec![ChannelDescriptor::analog_output("Dev1/ao0")])
            .with_timing(TimingSpec::continuous(1000.0));
        let err = output
            .write_samples(&driver, [Samples::from(SampleBuffer::<u8>::zeros(1, 10))])
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedSampleType { .. }));
        assert_eq!(driver.history().write_count(), 0);
    }

    #[test]
    fn analog_samples_write_float_buffers() {
        let driver = MockDriver::new();
        let output = AnalogOutput::new(vec![ChannelDescriptor::analog_output("Dev1/ao0")])
            .with_timing(TimingSpec::continuous(1000.0));
        output
            .write_samples(&driver, [Samples::from(SampleBuffer::<f64>::zeros(1, 20))])
            .unwrap();
        assert!(
            driver
                .history()
                .calls()
                .contains(&Call::WriteAnalog { channels: 1, samples: 20 })
        );
    }

    #[test]
    fn line_array_length_must_match_channel_count() {
        let driver = MockDriver::new();
        let output = DigitalOutput::new(vec![
            ChannelDescriptor::digital_output("Dev1/port0/line0"),
            ChannelDescriptor::digital_output("Dev1/port0/line1"),
        ]);
        let err = output
            .write_line_arrays(&driver, [vec![true]])
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn unsupported_buffer_type_fails_before_any_write() {
        let driver = MockDriver::new();
        let output = port_output(TimingSpec::continuous(1000.0));
        let err = output
            .write_buffers(&driver, [Samples::from(SampleBuffer::<f64>::zeros(1, 10))])
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedSampleType { .. }));
        assert_eq!(driver.history().write_count(), 0);
    }

    #[test]
    fn port_states_write_in_declared_width() {
        let driver = MockDriver::new();
        let output = port_output(TimingSpec::default());
        output
            .write_port_states(&driver, [PortState::U16(0xBEEF)])
            .unwrap();
        assert!(driver.history().calls().contains(&Call::WriteDigitalPort {
            channels: 1,
            samples: 1,
            width: 16,
        }));
    }

    #[test]
    fn finite_mode_waits_for_completion_before_stop() {
        let driver = MockDriver::new();
        let output = port_output(TimingSpec::finite(1000.0, 50));
        let buffers = (0..3).map(|_| Samples::from(SampleBuffer::<u8>::zeros(1, 50)));
        output.write_buffers(&driver, buffers).unwrap();

        let history = driver.history();
        assert_eq!(history.write_count(), 3);
        assert_eq!(history.wait_count(), 1);
        assert!(history.waited_before_stop());
        assert!(history.stopped_before_disposed());
    }

    #[test]
    fn continuous_mode_stops_without_waiting() {
        let driver = MockDriver::new();
        let output = port_output(TimingSpec::continuous(1000.0));
        output
            .write_buffers(&driver, [Samples::from(SampleBuffer::<u8>::zeros(1, 1000))])
            .unwrap();

        let history = driver.history();
        assert_eq!(history.wait_count(), 0);
        assert_eq!(history.stop_count(), 1);
        assert_eq!(history.dispose_count(), 1);
    }

    #[test]
    fn write_error_stops_task_and_suppresses_further_writes() {
        let driver = MockDriver::new().fail_write_at(2);
        let output = AnalogOutput::new(vec![ChannelDescriptor::analog_output("Dev1/ao0")])
            .with_timing(TimingSpec::finite(1000.0, 10));
        let buffers = (0..5).map(|_| SampleBuffer::<f64>::zeros(1, 10));
        let err = output.write_buffers(&driver, buffers).unwrap_err();
        assert!(matches!(err, Error::Hardware(_)));

        let history = driver.history();
        assert_eq!(history.write_count(), 2);
        assert!(!history.wrote_after_stop());
        // Abort path must not block on finite completion.
        assert_eq!(history.wait_count(), 0);
        assert_eq!(history.dispose_count(), 1);
    }
}
