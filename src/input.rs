//! Input operators: continuous acquisition and on-demand reads.
//!
//! A continuous subscription bridges the driver's completion-driven read
//! interface into a push sequence: one read in flight at a time, each
//! completed buffer emitted synchronously into the sink before the next
//! read is issued. The on-demand reader instead performs one blocking read
//! per upstream notification.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::buffer::SampleBuffer;
use crate::channel::ChannelDescriptor;
use crate::driver::{Driver, DriverTask};
use crate::error::Error;
use crate::sink::{BufferSink, SinkFlow};
use crate::task::{TaskGuard, TaskResource};
use crate::timing::{TimingSpec, TriggerSpec};

/// Handle to a running continuous acquisition.
///
/// Cancelling is race-safe against a read in flight: the acquisition thread
/// observes the flag between pump iterations and a buffer completing after
/// cancellation is discarded without touching the released task. Teardown
/// (stop then dispose) runs on the acquisition thread before the terminal
/// result becomes observable through [`wait`].
///
/// [`wait`]: Subscription::wait
pub struct Subscription {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<(), Error>>>,
}

impl Subscription {
    /// Request the acquisition to end. Returns immediately.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Block until the acquisition thread has torn the task down, and return
    /// the stream's terminal result: `Ok` for cancellation or a sink-initiated
    /// stop, the hardware error otherwise.
    pub fn wait(mut self) -> Result<(), Error> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(Error::Hardware("acquisition thread panicked".into()))),
            None => Ok(()),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle
                .join()
                .unwrap_or_else(|_| Err(Error::Hardware("acquisition thread panicked".into())))
            {
                error!(error = %err, "acquisition ended with an error");
            }
        }
    }
}

fn spawn_pump<T, S, R>(
    mut guard: TaskGuard<T>,
    samples_per_channel: usize,
    mut sink: impl BufferSink<S> + 'static,
    mut read: R,
) -> Result<Subscription, Error>
where
    T: DriverTask,
    S: Send + 'static,
    R: FnMut(&mut TaskResource<T>, usize) -> Result<Option<SampleBuffer<S>>, Error> + Send + 'static,
{
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    let handle = std::thread::Builder::new()
        .name("daq-acquisition".into())
        .spawn(move || {
            // Iterative pump: read, emit, read again. The next read is only
            // issued once the sink has returned, so downstream speed paces
            // acquisition and exactly one read is in flight at any time.
            // Reads use the driver's bounded timeout, so a starved device
            // (armed trigger, no signal) cycles back here and the cancel
            // flag stays responsive.
            let result = loop {
                if flag.load(Ordering::Acquire) {
                    break Ok(());
                }
                match read(guard.resource(), samples_per_channel) {
                    Ok(Some(buffer)) => {
                        if flag.load(Ordering::Acquire) {
                            // Completed after cancellation: discard.
                            break Ok(());
                        }
                        match sink.on_buffer(buffer) {
                            SinkFlow::Continue => {}
                            SinkFlow::Stop => break Ok(()),
                        }
                    }
                    Ok(None) => {}
                    Err(err) => break Err(err),
                }
            };
            // Teardown happens here, before wait() can observe the result.
            drop(guard);
            result
        })
        .map_err(|err| Error::Hardware(format!("failed to spawn acquisition thread: {err}")))?;
    Ok(Subscription {
        cancel,
        handle: Some(handle),
    })
}

/// Pull adapter performing one synchronous read per upstream notification.
///
/// The task is built, verified and started when the adapter is constructed;
/// it is stopped and disposed when the notification sequence ends, when a
/// read fails, or when the adapter is dropped.
pub struct OnDemandReader<T: DriverTask, I, S> {
    guard: Option<TaskGuard<T>>,
    notifications: I,
    samples_per_channel: usize,
    read: fn(&mut TaskResource<T>, usize) -> Result<Option<SampleBuffer<S>>, Error>,
}

impl<T, I, S> Iterator for OnDemandReader<T, I, S>
where
    T: DriverTask,
    I: Iterator,
{
    type Item = Result<SampleBuffer<S>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.guard.as_ref()?;
        if self.notifications.next().is_none() {
            // Upstream completed: release the task now rather than at drop.
            self.guard = None;
            return None;
        }
        loop {
            let guard = self.guard.as_mut()?;
            match (self.read)(guard.resource(), self.samples_per_channel) {
                Ok(Some(buffer)) => return Some(Ok(buffer)),
                // Driver timeout with no data; the notification still wants
                // one buffer, so read again.
                Ok(None) => {}
                Err(err) => {
                    // Teardown before the error is observable downstream.
                    self.guard = None;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// Acquires voltage sample buffers from one or more analog input channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalogInput {
    pub channels: Vec<ChannelDescriptor>,
    #[serde(default)]
    pub timing: TimingSpec,
    /// Optional digital edge start trigger gating the acquisition.
    #[serde(default)]
    pub trigger: Option<TriggerSpec>,
}

impl AnalogInput {
    pub fn new(channels: Vec<ChannelDescriptor>) -> Self {
        Self {
            channels,
            timing: TimingSpec::default(),
            trigger: None,
        }
    }

    pub fn with_timing(mut self, timing: TimingSpec) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerSpec) -> Self {
        self.trigger = Some(trigger);
        self
    }

    fn check_channels(&self) -> Result<(), Error> {
        match self
            .channels
            .iter()
            .find(|c| !matches!(c, ChannelDescriptor::AnalogInput { .. }))
        {
            Some(wrong) => Err(Error::Config(format!(
                "analog input task cannot use channel {}",
                wrong.label()
            ))),
            None => Ok(()),
        }
    }

    /// Start a clocked continuous acquisition, emitting one buffer per
    /// completed read into `sink` until cancelled or the driver fails.
    pub fn subscribe<D>(
        &self,
        driver: &D,
        sink: impl BufferSink<f64> + 'static,
    ) -> Result<Subscription, Error>
    where
        D: Driver,
    {
        self.check_channels()?;
        let resource = TaskResource::build(
            driver,
            &self.channels,
            Some(&self.timing),
            self.trigger.as_ref(),
        )?;
        // Guarded from here on: a verify or start failure still disposes.
        let mut guard = TaskGuard::new(resource);
        guard.resource().verify()?;
        guard.resource().start()?;
        info!(
            channels = self.channels.len(),
            rate = self.timing.sample_rate,
            "analog acquisition started"
        );
        spawn_pump(
            guard,
            self.timing.samples_per_channel(),
            sink,
            |resource, samples| resource.read_analog(samples),
        )
    }

    /// Read one buffer per notification of `source`, in notification order.
    /// The sample clock is only configured when a positive rate is set;
    /// otherwise sampling is driven purely by notification arrival.
    pub fn read_on_demand<D, I>(
        &self,
        driver: &D,
        source: I,
    ) -> Result<OnDemandReader<D::Task, I::IntoIter, f64>, Error>
    where
        D: Driver,
        I: IntoIterator,
    {
        self.check_channels()?;
        let timing = self.timing.is_clocked().then_some(&self.timing);
        let resource = TaskResource::build(driver, &self.channels, timing, self.trigger.as_ref())?;
        let mut guard = TaskGuard::new(resource);
        guard.resource().verify()?;
        guard.resource().start()?;
        Ok(OnDemandReader {
            guard: Some(guard),
            notifications: source.into_iter(),
            samples_per_channel: self.timing.samples_per_channel(),
            read: |resource, samples| resource.read_analog(samples),
        })
    }
}

/// Acquires logic-level sample buffers from one or more digital input
/// channels. Each sample is a single line level or a port bitmask depending
/// on the channel's line grouping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigitalInput {
    pub channels: Vec<ChannelDescriptor>,
    #[serde(default)]
    pub timing: TimingSpec,
    #[serde(default)]
    pub trigger: Option<TriggerSpec>,
}

impl DigitalInput {
    pub fn new(channels: Vec<ChannelDescriptor>) -> Self {
        Self {
            channels,
            timing: TimingSpec::default(),
            trigger: None,
        }
    }

    pub fn with_timing(mut self, timing: TimingSpec) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerSpec) -> Self {
        self.trigger = Some(trigger);
        self
    }

    fn check_channels(&self) -> Result<(), Error> {
        match self
            .channels
            .iter()
            .find(|c| !matches!(c, ChannelDescriptor::DigitalInput { .. }))
        {
            Some(wrong) => Err(Error::Config(format!(
                "digital input task cannot use channel {}",
                wrong.label()
            ))),
            None => Ok(()),
        }
    }

    /// Start a clocked continuous acquisition of port samples.
    pub fn subscribe<D>(
        &self,
        driver: &D,
        sink: impl BufferSink<u8> + 'static,
    ) -> Result<Subscription, Error>
    where
        D: Driver,
    {
        self.check_channels()?;
        let resource = TaskResource::build(
            driver,
            &self.channels,
            Some(&self.timing),
            self.trigger.as_ref(),
        )?;
        let mut guard = TaskGuard::new(resource);
        guard.resource().verify()?;
        guard.resource().start()?;
        info!(
            channels = self.channels.len(),
            rate = self.timing.sample_rate,
            "digital acquisition started"
        );
        spawn_pump(
            guard,
            self.timing.samples_per_channel(),
            sink,
            |resource, samples| resource.read_digital_u8(samples),
        )
    }

    /// Read one buffer per notification of `source`, in notification order.
    pub fn read_on_demand<D, I>(
        &self,
        driver: &D,
        source: I,
    ) -> Result<OnDemandReader<D::Task, I::IntoIter, u8>, Error>
    where
        D: Driver,
        I: IntoIterator,
    {
        self.check_channels()?;
        let timing = self.timing.is_clocked().then_some(&self.timing);
        let resource = TaskResource::build(driver, &self.channels, timing, self.trigger.as_ref())?;
        let mut guard = TaskGuard::new(resource);
        guard.resource().verify()?;
        guard.resource().start()?;
        Ok(OnDemandReader {
            guard: Some(guard),
            notifications: source.into_iter(),
            samples_per_channel: self.timing.samples_per_channel(),
            read: |resource, samples| resource.read_digital_u8(samples),
        })
    }
}
