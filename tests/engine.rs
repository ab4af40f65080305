//! End-to-end streaming scenarios against the mock driver.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use daq_stream::channel::ChannelDescriptor;
use daq_stream::driver::mock::{Call, MockDriver};
use daq_stream::error::Error;
use daq_stream::input::{AnalogInput, DigitalInput};
use daq_stream::output::DigitalOutput;
use daq_stream::sink::{SinkFlow, channel_sink};
use daq_stream::{SampleBuffer, Samples, TimingSpec, TriggerSpec};

fn continuous_timing(samples_per_channel: usize) -> TimingSpec {
    TimingSpec {
        samples_per_channel: Some(samples_per_channel),
        ..TimingSpec::continuous(1000.0)
    }
}

#[test]
fn continuous_acquisition_streams_fixed_shape_buffers() {
    let driver = MockDriver::new();
    let input = AnalogInput::new(vec![
        ChannelDescriptor::analog_input("Dev1/ai0"),
        ChannelDescriptor::analog_input("Dev1/ai1"),
    ])
    .with_timing(continuous_timing(100));

    let received = Arc::new(Mutex::new(Vec::new()));
    let buffers = Arc::clone(&received);
    let subscription = input
        .subscribe(&driver, move |buffer: SampleBuffer<f64>| {
            let mut buffers = buffers.lock().unwrap();
            buffers.push(buffer);
            if buffers.len() == 3 {
                SinkFlow::Stop
            } else {
                SinkFlow::Continue
            }
        })
        .unwrap();
    subscription.wait().unwrap();

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 3);
    for buffer in received.iter() {
        assert_eq!(buffer.channels(), 2);
        assert_eq!(buffer.samples_per_channel(), 100);
    }

    let history = driver.history();
    assert_eq!(history.read_count(), 3);
    assert_eq!(history.stop_count(), 1);
    assert_eq!(history.dispose_count(), 1);
    assert!(history.stopped_before_disposed());
}

#[test]
fn acquisition_configures_task_before_starting() {
    let driver = MockDriver::new();
    let input = AnalogInput::new(vec![ChannelDescriptor::analog_input("Dev1/ai0")])
        .with_timing(continuous_timing(10))
        .with_trigger(TriggerSpec::rising("/Dev1/PFI0"));

    let subscription = input
        .subscribe(&driver, |_: SampleBuffer<f64>| SinkFlow::Stop)
        .unwrap();
    subscription.wait().unwrap();

    let calls = driver.history();
    let calls = calls.calls();
    let position = |call: &Call| calls.iter().position(|c| c == call).unwrap();
    let clock = calls
        .iter()
        .position(|c| matches!(c, Call::ConfigureSampleClock { .. }))
        .unwrap();
    let trigger = calls
        .iter()
        .position(|c| matches!(c, Call::ConfigureStartTrigger { .. }))
        .unwrap();
    assert!(position(&Call::CreateChannel("Dev1/ai0".into())) < clock);
    assert!(clock < trigger);
    assert!(trigger < position(&Call::Verify));
    assert!(position(&Call::Verify) < position(&Call::Start));
}

#[test]
fn cancellation_discards_the_read_in_flight() {
    // Paced reads so cancel lands while a read is pending.
    let driver = MockDriver::new().realtime();
    let input = AnalogInput::new(vec![ChannelDescriptor::analog_input("Dev1/ai0")]).with_timing(
        TimingSpec {
            samples_per_channel: Some(50),
            ..TimingSpec::continuous(100.0)
        },
    );

    let emitted = Arc::new(Mutex::new(0usize));
    let count = Arc::clone(&emitted);
    let subscription = input
        .subscribe(&driver, move |_: SampleBuffer<f64>| {
            *count.lock().unwrap() += 1;
            SinkFlow::Continue
        })
        .unwrap();
    std::thread::sleep(Duration::from_millis(50));
    subscription.cancel();
    subscription.wait().unwrap();

    let history = driver.history();
    assert_eq!(history.stop_count(), 1);
    assert_eq!(history.dispose_count(), 1);
    assert!(history.stopped_before_disposed());
    // Everything that reached the sink was emitted before the flag was seen.
    assert!(*emitted.lock().unwrap() <= history.read_count());
}

#[test]
fn read_failure_tears_down_then_surfaces_through_wait() {
    let driver = MockDriver::new().fail_read_at(2);
    let input = AnalogInput::new(vec![ChannelDescriptor::analog_input("Dev1/ai0")])
        .with_timing(continuous_timing(10));

    let subscription = input
        .subscribe(&driver, |_: SampleBuffer<f64>| SinkFlow::Continue)
        .unwrap();
    let err = subscription.wait().unwrap_err();
    assert!(matches!(err, Error::Hardware(_)));

    let history = driver.history();
    assert_eq!(history.read_count(), 2);
    assert_eq!(history.dispose_count(), 1);
    assert!(history.stopped_before_disposed());
}

#[test]
fn digital_acquisition_delivers_port_samples() {
    let driver = MockDriver::new();
    let input = DigitalInput::new(vec![ChannelDescriptor::digital_input("Dev1/port0/line0:3")])
        .with_timing(continuous_timing(8));

    let subscription = input
        .subscribe(&driver, |buffer: SampleBuffer<u8>| {
            assert_eq!(buffer.channels(), 1);
            assert_eq!(buffer.samples_per_channel(), 8);
            SinkFlow::Stop
        })
        .unwrap();
    subscription.wait().unwrap();
    assert_eq!(driver.history().read_count(), 1);
}

#[test]
fn channel_sink_bridges_buffers_out_of_the_acquisition_thread() {
    let driver = MockDriver::new();
    let input = AnalogInput::new(vec![ChannelDescriptor::analog_input("Dev1/ai0")])
        .with_timing(continuous_timing(25));

    let (sink, mut receiver) = channel_sink();
    let subscription = input.subscribe(&driver, sink).unwrap();
    let buffer = receiver.blocking_recv().unwrap();
    assert_eq!(buffer.channels(), 1);
    assert_eq!(buffer.samples_per_channel(), 25);

    // Dropping the receiver ends the subscription on its next emission.
    drop(receiver);
    subscription.wait().unwrap();
    assert_eq!(driver.history().dispose_count(), 1);
}

#[test]
fn finite_generation_writes_all_buffers_then_waits_out_the_clock() {
    let driver = MockDriver::new();
    let output = DigitalOutput::new(vec![ChannelDescriptor::digital_output_port("Dev1/port0")])
        .with_timing(TimingSpec::finite(1000.0, 50));

    let buffers = (0..3).map(|_| Samples::from(SampleBuffer::<u8>::zeros(1, 50)));
    output.write_buffers(&driver, buffers).unwrap();

    let history = driver.history();
    assert_eq!(history.write_count(), 3);
    assert!(history.calls().contains(&Call::WriteDigitalPort {
        channels: 1,
        samples: 50,
        width: 8,
    }));
    assert_eq!(history.wait_count(), 1);
    assert!(history.waited_before_stop());
    assert!(history.stopped_before_disposed());
}

#[test]
fn empty_channel_list_fails_without_touching_hardware() {
    let driver = MockDriver::new();
    let input = AnalogInput::new(Vec::new());
    let result = input.subscribe(&driver, |_: SampleBuffer<f64>| SinkFlow::Continue);
    assert!(matches!(result, Err(Error::Config(_))));
    assert_eq!(driver.created_tasks(), 0);
    assert!(driver.history().calls().is_empty());
}

#[test]
fn verify_failure_still_releases_the_task() {
    let driver = MockDriver::new().fail_verify("route conflict");
    let input = AnalogInput::new(vec![ChannelDescriptor::analog_input("Dev1/ai0")])
        .with_timing(continuous_timing(10));
    let result = input.subscribe(&driver, |_: SampleBuffer<f64>| SinkFlow::Continue);
    assert!(matches!(result, Err(Error::Verify(_))));
    assert_eq!(driver.history().dispose_count(), 1);
}

#[test]
fn descriptors_round_trip_through_configuration_files() {
    let json = r#"{
        "channels": [
            { "AnalogInput": { "physical_channel": "Dev1/ai0" } },
            { "AnalogInput": { "physical_channel": "Dev1/ai1", "minimum_value": -5.0, "maximum_value": 5.0 } }
        ],
        "timing": { "sample_rate": 1000.0, "samples_per_channel": 100 }
    }"#;
    let input: AnalogInput = serde_json::from_str(json).unwrap();
    assert_eq!(input.channels.len(), 2);
    assert_eq!(input.timing.samples_per_channel(), 100);
    assert!(input.trigger.is_none());

    let driver = MockDriver::new();
    let subscription = input
        .subscribe(&driver, |_: SampleBuffer<f64>| SinkFlow::Stop)
        .unwrap();
    subscription.wait().unwrap();
    assert_eq!(driver.history().dispose_count(), 1);
}
