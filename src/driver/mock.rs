//! In-memory driver backend.
//!
//! Generates simulated samples and records every call it receives, so tests
//! can assert on lifecycle order (stop before dispose, wait before stop, no
//! writes after a failure) without any hardware attached. Failure injection
//! covers the build, verify, read and write phases.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use ndarray::{Array2, ArrayView2};
use tracing::info;

use crate::channel::{ChannelDescriptor, Direction, SignalKind};
use crate::driver::{Driver, DriverTask};
use crate::error::DriverError;
use crate::timing::{TimingSpec, TriggerSpec};

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateTask,
    CreateChannel(String),
    ConfigureSampleClock { rate: f64 },
    ConfigureStartTrigger { terminal: String },
    Verify,
    Start,
    Stop,
    WaitUntilDone,
    Dispose,
    ReadAnalog { samples_per_channel: usize },
    ReadDigital { samples_per_channel: usize },
    ReadTimedOut,
    WriteAnalog { channels: usize, samples: usize },
    WriteDigitalLines { channels: usize, samples: usize },
    WriteDigitalPort { channels: usize, samples: usize, width: usize },
}

impl Call {
    fn is_write(&self) -> bool {
        matches!(
            self,
            Call::WriteAnalog { .. } | Call::WriteDigitalLines { .. } | Call::WriteDigitalPort { .. }
        )
    }
}

/// Snapshot of the calls a [`MockDriver`] has seen.
#[derive(Debug, Clone)]
pub struct History(Vec<Call>);

impl History {
    pub fn calls(&self) -> &[Call] {
        &self.0
    }

    fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.0.iter().filter(|call| predicate(call)).count()
    }

    pub fn stop_count(&self) -> usize {
        self.count(|c| *c == Call::Stop)
    }

    pub fn dispose_count(&self) -> usize {
        self.count(|c| *c == Call::Dispose)
    }

    pub fn wait_count(&self) -> usize {
        self.count(|c| *c == Call::WaitUntilDone)
    }

    pub fn write_count(&self) -> usize {
        self.count(Call::is_write)
    }

    pub fn read_count(&self) -> usize {
        self.count(|c| matches!(c, Call::ReadAnalog { .. } | Call::ReadDigital { .. }))
    }

    fn position(&self, call: &Call) -> Option<usize> {
        self.0.iter().position(|c| c == call)
    }

    pub fn stopped_before_disposed(&self) -> bool {
        match (self.position(&Call::Stop), self.position(&Call::Dispose)) {
            (Some(stop), Some(dispose)) => stop < dispose,
            _ => false,
        }
    }

    pub fn waited_before_stop(&self) -> bool {
        match (self.position(&Call::WaitUntilDone), self.position(&Call::Stop)) {
            (Some(wait), Some(stop)) => wait < stop,
            _ => false,
        }
    }

    /// Whether any write was issued after the first stop.
    pub fn wrote_after_stop(&self) -> bool {
        match self.position(&Call::Stop) {
            Some(stop) => self.0[stop..].iter().any(Call::is_write),
            None => false,
        }
    }
}

#[derive(Default)]
struct MockState {
    calls: Vec<Call>,
    created_tasks: usize,
    reads_seen: usize,
    writes_seen: usize,
    fail_channel: Option<String>,
    fail_verify: Option<String>,
    fail_read_at: Option<usize>,
    fail_write_at: Option<usize>,
    timeout_reads: usize,
}

/// Simulated driver for tests and hardware-less development.
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
    /// Pace reads according to the configured sample rate instead of
    /// returning immediately.
    realtime: bool,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make reads block for roughly `samples / rate`, like a clocked device.
    pub fn realtime(mut self) -> Self {
        self.realtime = true;
        self
    }

    /// Reject every channel creation with `message`.
    pub fn fail_channel_creation(self, message: &str) -> Self {
        self.state.lock().unwrap().fail_channel = Some(message.to_owned());
        self
    }

    /// Reject verification with `message`.
    pub fn fail_verify(self, message: &str) -> Self {
        self.state.lock().unwrap().fail_verify = Some(message.to_owned());
        self
    }

    /// Fail the `n`th read (1-based) across all tasks of this driver.
    pub fn fail_read_at(self, n: usize) -> Self {
        self.state.lock().unwrap().fail_read_at = Some(n);
        self
    }

    /// Fail the `n`th write (1-based) across all tasks of this driver.
    pub fn fail_write_at(self, n: usize) -> Self {
        self.state.lock().unwrap().fail_write_at = Some(n);
        self
    }

    /// Make the first `n` reads time out with no data, like a device whose
    /// start trigger has not fired yet.
    pub fn time_out_first_reads(self, n: usize) -> Self {
        self.state.lock().unwrap().timeout_reads = n;
        self
    }

    pub fn history(&self) -> History {
        History(self.state.lock().unwrap().calls.clone())
    }

    pub fn created_tasks(&self) -> usize {
        self.state.lock().unwrap().created_tasks
    }
}

impl Driver for MockDriver {
    type Task = MockTask;

    fn create_task(&self) -> Result<MockTask, DriverError> {
        let mut state = self.state.lock().unwrap();
        state.created_tasks += 1;
        state.calls.push(Call::CreateTask);
        Ok(MockTask {
            state: Arc::clone(&self.state),
            realtime: self.realtime,
            channels: 0,
            timing: None,
            disposed: false,
        })
    }

    fn physical_channels(
        &self,
        kind: SignalKind,
        direction: Direction,
    ) -> Result<Vec<String>, DriverError> {
        let names = match (kind, direction) {
            (SignalKind::Analog, Direction::Input) => {
                (0..8).map(|i| format!("Mock1/ai{i}")).collect()
            }
            (SignalKind::Analog, Direction::Output) => {
                (0..2).map(|i| format!("Mock1/ao{i}")).collect()
            }
            (SignalKind::Digital, _) => (0..8).map(|i| format!("Mock1/port0/line{i}")).collect(),
        };
        Ok(names)
    }
}

/// Task handle produced by [`MockDriver`].
pub struct MockTask {
    state: Arc<Mutex<MockState>>,
    realtime: bool,
    channels: usize,
    timing: Option<TimingSpec>,
    disposed: bool,
}

impl MockTask {
    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn pace(&self, samples_per_channel: usize) {
        if !self.realtime {
            return;
        }
        if let Some(timing) = &self.timing {
            if timing.is_clocked() {
                let secs = samples_per_channel as f64 / timing.sample_rate;
                std::thread::sleep(Duration::from_secs_f64(secs));
            }
        }
    }

    /// Gate one read: `Ok(false)` simulates a bounded-timeout read that
    /// returned without data.
    fn next_read(&self, call: Call) -> Result<bool, DriverError> {
        let mut state = self.state.lock().unwrap();
        if state.timeout_reads > 0 {
            state.timeout_reads -= 1;
            state.calls.push(Call::ReadTimedOut);
            return Ok(false);
        }
        state.reads_seen += 1;
        if state.fail_read_at == Some(state.reads_seen) {
            state.calls.push(call);
            return Err(DriverError::new("injected read failure"));
        }
        Ok(true)
    }

    fn next_write(&self, call: Call) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        state.writes_seen += 1;
        state.calls.push(call);
        if state.fail_write_at == Some(state.writes_seen) {
            return Err(DriverError::new("injected write failure"));
        }
        Ok(())
    }
}

impl DriverTask for MockTask {
    fn create_channel(&mut self, descriptor: &ChannelDescriptor) -> Result<(), DriverError> {
        let fail = self.state.lock().unwrap().fail_channel.clone();
        self.record(Call::CreateChannel(descriptor.physical_binding().to_owned()));
        if let Some(message) = fail {
            return Err(DriverError(message));
        }
        self.channels += 1;
        Ok(())
    }

    fn configure_sample_clock(&mut self, timing: &TimingSpec) -> Result<(), DriverError> {
        self.record(Call::ConfigureSampleClock {
            rate: timing.sample_rate,
        });
        self.timing = Some(timing.clone());
        Ok(())
    }

    fn configure_start_trigger(&mut self, trigger: &TriggerSpec) -> Result<(), DriverError> {
        self.record(Call::ConfigureStartTrigger {
            terminal: trigger.terminal.clone(),
        });
        Ok(())
    }

    fn verify(&mut self) -> Result<(), DriverError> {
        let fail = self.state.lock().unwrap().fail_verify.clone();
        self.record(Call::Verify);
        match fail {
            Some(message) => Err(DriverError(message)),
            None => Ok(()),
        }
    }

    fn start(&mut self) -> Result<(), DriverError> {
        self.record(Call::Start);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        self.record(Call::Stop);
        Ok(())
    }

    fn wait_until_done(&mut self) -> Result<(), DriverError> {
        self.record(Call::WaitUntilDone);
        Ok(())
    }

    fn dispose(&mut self) -> Result<(), DriverError> {
        if self.disposed {
            return Err(DriverError::new("task already disposed"));
        }
        self.disposed = true;
        self.record(Call::Dispose);
        info!("mock task disposed");
        Ok(())
    }

    fn read_analog(
        &mut self,
        samples_per_channel: usize,
    ) -> Result<Option<Array2<f64>>, DriverError> {
        if !self.next_read(Call::ReadAnalog { samples_per_channel })? {
            return Ok(None);
        }
        self.pace(samples_per_channel);
        self.record(Call::ReadAnalog { samples_per_channel });
        Ok(Some(Array2::from_shape_fn(
            (self.channels, samples_per_channel),
            |_| rand::random_range(-10.0..=10.0),
        )))
    }

    fn read_digital_u8(
        &mut self,
        samples_per_channel: usize,
    ) -> Result<Option<Array2<u8>>, DriverError> {
        if !self.next_read(Call::ReadDigital { samples_per_channel })? {
            return Ok(None);
        }
        self.pace(samples_per_channel);
        self.record(Call::ReadDigital { samples_per_channel });
        Ok(Some(Array2::from_shape_fn(
            (self.channels, samples_per_channel),
            |_| rand::random::<u8>(),
        )))
    }

    fn write_analog(
        &mut self,
        samples: ArrayView2<'_, f64>,
        _auto_start: bool,
    ) -> Result<usize, DriverError> {
        self.next_write(Call::WriteAnalog {
            channels: samples.nrows(),
            samples: samples.ncols(),
        })?;
        Ok(samples.ncols())
    }

    fn write_digital_lines(
        &mut self,
        samples: ArrayView2<'_, u8>,
        _auto_start: bool,
    ) -> Result<usize, DriverError> {
        self.next_write(Call::WriteDigitalLines {
            channels: samples.nrows(),
            samples: samples.ncols(),
        })?;
        Ok(samples.ncols())
    }

    fn write_digital_u8(
        &mut self,
        samples: ArrayView2<'_, u8>,
        _auto_start: bool,
    ) -> Result<usize, DriverError> {
        self.next_write(Call::WriteDigitalPort {
            channels: samples.nrows(),
            samples: samples.ncols(),
            width: 8,
        })?;
        Ok(samples.ncols())
    }

    fn write_digital_u16(
        &mut self,
        samples: ArrayView2<'_, u16>,
        _auto_start: bool,
    ) -> Result<usize, DriverError> {
        self.next_write(Call::WriteDigitalPort {
            channels: samples.nrows(),
            samples: samples.ncols(),
            width: 16,
        })?;
        Ok(samples.ncols())
    }

    fn write_digital_u32(
        &mut self,
        samples: ArrayView2<'_, u32>,
        _auto_start: bool,
    ) -> Result<usize, DriverError> {
        self.next_write(Call::WriteDigitalPort {
            channels: samples.nrows(),
            samples: samples.ncols(),
            width: 32,
        })?;
        Ok(samples.ncols())
    }
}
