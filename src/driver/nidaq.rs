//! NI-DAQmx driver backend.
//!
//! Thin safe wrapper over the DAQmx C API implementing the driver
//! capability. Every DAQmx call returns an `int32`; negative codes are
//! errors and positive codes warnings, both resolved to text through
//! `DAQmxGetExtendedErrorInfo`. Link flags come from `build.rs` when the
//! `nidaq` feature is enabled.

use std::ffi::{CStr, CString};
use std::ptr;

use libc::{c_char, c_double, c_int, c_uint, c_ulonglong, c_void};
use ndarray::{Array2, ArrayView2};
use tracing::{error, warn};

use crate::channel::{ChannelDescriptor, Direction, LineGrouping, SignalKind, TerminalConfig};
use crate::driver::{Driver, DriverTask};
use crate::error::DriverError;
use crate::timing::{ActiveEdge, QuantityMode, TimingSpec, TriggerSpec};

type CConstStr = *const c_char;
type CFloat64 = c_double;
type CInt32 = c_int;
type CUint32 = c_uint;
type CUint64 = c_ulonglong;
type CBool32 = c_uint;
type TaskHandle = *mut c_void;

const DAQMX_VAL_RISING: CInt32 = 10280;
const DAQMX_VAL_FALLING: CInt32 = 10171;
const DAQMX_VAL_VOLTS: CInt32 = 10348;
const DAQMX_VAL_FINITE_SAMPS: CInt32 = 10178;
const DAQMX_VAL_CONT_SAMPS: CInt32 = 10123;
const DAQMX_VAL_GROUP_BY_CHANNEL: CBool32 = 0;
const DAQMX_VAL_WAIT_INFINITELY: CFloat64 = -1.0;
const DAQMX_VAL_CHAN_PER_LINE: CInt32 = 0;
const DAQMX_VAL_CHAN_FOR_ALL_LINES: CInt32 = 1;
const DAQMX_VAL_DIFF: CInt32 = 10106;
const DAQMX_VAL_RSE: CInt32 = 10083;
const DAQMX_VAL_NRSE: CInt32 = 10078;
const DAQMX_VAL_PSEUDO_DIFF: CInt32 = 10529;
const DAQMX_VAL_TASK_VERIFY: CInt32 = 2;
const DAQMX_ERR_TIMED_OUT: CInt32 = -200284;

const STRING_BUFFER_LEN: usize = 2048;

/// Headroom added to the nominal acquisition time of one buffer before a
/// read gives up and reports a timeout.
const READ_TIMEOUT_SLACK_SECS: f64 = 5.0;
/// Read timeout for tasks without a configured sample clock.
const UNCLOCKED_READ_TIMEOUT_SECS: f64 = 10.0;

unsafe extern "C" {
    fn DAQmxGetExtendedErrorInfo(errorString: *mut c_char, bufferSize: CUint32) -> CInt32;

    fn DAQmxCreateTask(taskName: CConstStr, taskHandle: *mut TaskHandle) -> CInt32;
    fn DAQmxStartTask(handle: TaskHandle) -> CInt32;
    fn DAQmxStopTask(handle: TaskHandle) -> CInt32;
    fn DAQmxClearTask(handle: TaskHandle) -> CInt32;
    fn DAQmxTaskControl(handle: TaskHandle, action: CInt32) -> CInt32;
    fn DAQmxWaitUntilTaskDone(handle: TaskHandle, timeToWait: CFloat64) -> CInt32;

    fn DAQmxCfgSampClkTiming(
        handle: TaskHandle,
        source: CConstStr,
        rate: CFloat64,
        activeEdge: CInt32,
        sampleMode: CInt32,
        sampsPerChan: CUint64,
    ) -> CInt32;
    fn DAQmxCfgDigEdgeStartTrig(
        handle: TaskHandle,
        triggerSource: CConstStr,
        triggerEdge: CInt32,
    ) -> CInt32;

    fn DAQmxCreateAIVoltageChan(
        handle: TaskHandle,
        physicalChannel: CConstStr,
        name: CConstStr,
        terminalConfig: CInt32,
        minVal: CFloat64,
        maxVal: CFloat64,
        units: CInt32,
        customScaleName: CConstStr,
    ) -> CInt32;
    fn DAQmxCreateAOVoltageChan(
        handle: TaskHandle,
        physicalChannel: CConstStr,
        name: CConstStr,
        minVal: CFloat64,
        maxVal: CFloat64,
        units: CInt32,
        customScaleName: CConstStr,
    ) -> CInt32;
    fn DAQmxCreateDIChan(
        handle: TaskHandle,
        lines: CConstStr,
        name: CConstStr,
        lineGrouping: CInt32,
    ) -> CInt32;
    fn DAQmxCreateDOChan(
        handle: TaskHandle,
        lines: CConstStr,
        name: CConstStr,
        lineGrouping: CInt32,
    ) -> CInt32;

    fn DAQmxReadAnalogF64(
        handle: TaskHandle,
        numSampsPerChan: CInt32,
        timeout: CFloat64,
        fillMode: CBool32,
        readArray: *mut CFloat64,
        arraySizeInSamps: CUint32,
        sampsPerChanRead: *mut CInt32,
        reserved: *mut CBool32,
    ) -> CInt32;
    fn DAQmxReadDigitalU8(
        handle: TaskHandle,
        numSampsPerChan: CInt32,
        timeout: CFloat64,
        fillMode: CBool32,
        readArray: *mut u8,
        arraySizeInSamps: CUint32,
        sampsPerChanRead: *mut CInt32,
        reserved: *mut CBool32,
    ) -> CInt32;

    fn DAQmxWriteAnalogF64(
        handle: TaskHandle,
        numSampsPerChan: CInt32,
        autoStart: CBool32,
        timeout: CFloat64,
        dataLayout: CBool32,
        writeArray: *const CFloat64,
        sampsPerChanWritten: *mut CInt32,
        reserved: *mut CBool32,
    ) -> CInt32;
    fn DAQmxWriteDigitalLines(
        handle: TaskHandle,
        numSampsPerChan: CInt32,
        autoStart: CBool32,
        timeout: CFloat64,
        dataLayout: CBool32,
        writeArray: *const u8,
        sampsPerChanWritten: *mut CInt32,
        reserved: *mut CBool32,
    ) -> CInt32;
    fn DAQmxWriteDigitalU8(
        handle: TaskHandle,
        numSampsPerChan: CInt32,
        autoStart: CBool32,
        timeout: CFloat64,
        dataLayout: CBool32,
        writeArray: *const u8,
        sampsPerChanWritten: *mut CInt32,
        reserved: *mut CBool32,
    ) -> CInt32;
    fn DAQmxWriteDigitalU16(
        handle: TaskHandle,
        numSampsPerChan: CInt32,
        autoStart: CBool32,
        timeout: CFloat64,
        dataLayout: CBool32,
        writeArray: *const u16,
        sampsPerChanWritten: *mut CInt32,
        reserved: *mut CBool32,
    ) -> CInt32;
    fn DAQmxWriteDigitalU32(
        handle: TaskHandle,
        numSampsPerChan: CInt32,
        autoStart: CBool32,
        timeout: CFloat64,
        dataLayout: CBool32,
        writeArray: *const u32,
        sampsPerChanWritten: *mut CInt32,
        reserved: *mut CBool32,
    ) -> CInt32;

    fn DAQmxGetDevAIPhysicalChans(
        device: CConstStr,
        data: *mut c_char,
        bufferSize: CUint32,
    ) -> CInt32;
    fn DAQmxGetDevAOPhysicalChans(
        device: CConstStr,
        data: *mut c_char,
        bufferSize: CUint32,
    ) -> CInt32;
    fn DAQmxGetDevDILines(device: CConstStr, data: *mut c_char, bufferSize: CUint32) -> CInt32;
    fn DAQmxGetDevDOLines(device: CConstStr, data: *mut c_char, bufferSize: CUint32) -> CInt32;
}

/// Resolve a DAQmx status code: negative is an error, positive a warning.
fn check_err(code: CInt32) -> Result<(), DriverError> {
    if code == 0 {
        return Ok(());
    }
    let mut buffer = [0 as c_char; STRING_BUFFER_LEN];
    unsafe {
        DAQmxGetExtendedErrorInfo(buffer.as_mut_ptr(), STRING_BUFFER_LEN as CUint32);
    }
    let message = unsafe { CStr::from_ptr(buffer.as_ptr()) }
        .to_string_lossy()
        .into_owned();
    if code < 0 {
        error!(code, "{message}");
        Err(DriverError(message))
    } else {
        warn!(code, "DAQmx warning: {message}");
        Ok(())
    }
}

fn cstring(value: &str) -> Result<CString, DriverError> {
    CString::new(value).map_err(|_| DriverError::new("string contains an interior NUL byte"))
}

fn edge_value(edge: ActiveEdge) -> CInt32 {
    match edge {
        ActiveEdge::Rising => DAQMX_VAL_RISING,
        ActiveEdge::Falling => DAQMX_VAL_FALLING,
    }
}

fn grouping_value(grouping: LineGrouping) -> CInt32 {
    match grouping {
        LineGrouping::PerLine => DAQMX_VAL_CHAN_PER_LINE,
        LineGrouping::PerPort => DAQMX_VAL_CHAN_FOR_ALL_LINES,
    }
}

fn terminal_value(config: TerminalConfig) -> CInt32 {
    match config {
        TerminalConfig::Differential => DAQMX_VAL_DIFF,
        TerminalConfig::Rse => DAQMX_VAL_RSE,
        TerminalConfig::Nrse => DAQMX_VAL_NRSE,
        TerminalConfig::PseudoDifferential => DAQMX_VAL_PSEUDO_DIFF,
    }
}

/// Driver for one NI-DAQmx device.
#[derive(Debug, Clone)]
pub struct NidaqDriver {
    device: String,
}

impl NidaqDriver {
    /// Driver for the device with the given DAQmx name, e.g. `Dev1`.
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl Driver for NidaqDriver {
    type Task = NidaqTask;

    fn create_task(&self) -> Result<NidaqTask, DriverError> {
        let name = cstring("")?;
        let mut handle: TaskHandle = ptr::null_mut();
        check_err(unsafe { DAQmxCreateTask(name.as_ptr(), &mut handle) })?;
        Ok(NidaqTask {
            handle,
            channels: 0,
            sample_rate: 0.0,
            cleared: false,
        })
    }

    fn physical_channels(
        &self,
        kind: SignalKind,
        direction: Direction,
    ) -> Result<Vec<String>, DriverError> {
        let device = cstring(&self.device)?;
        let getter = match (kind, direction) {
            (SignalKind::Analog, Direction::Input) => DAQmxGetDevAIPhysicalChans,
            (SignalKind::Analog, Direction::Output) => DAQmxGetDevAOPhysicalChans,
            (SignalKind::Digital, Direction::Input) => DAQmxGetDevDILines,
            (SignalKind::Digital, Direction::Output) => DAQmxGetDevDOLines,
        };
        let list = device_property(&device, getter)?;
        Ok(list
            .split(',')
            .map(|name| name.trim().to_owned())
            .filter(|name| !name.is_empty())
            .collect())
    }
}

/// Read a string-valued device property. Called with a null buffer, DAQmx
/// property getters return the byte count the value needs, so the list is
/// never truncated no matter how many channels the device carries.
fn device_property(
    device: &CString,
    getter: unsafe extern "C" fn(CConstStr, *mut c_char, CUint32) -> CInt32,
) -> Result<String, DriverError> {
    let needed = unsafe { getter(device.as_ptr(), ptr::null_mut(), 0) };
    if needed < 0 {
        check_err(needed)?;
    }
    let mut buffer = vec![0 as c_char; needed as usize + 1];
    check_err(unsafe { getter(device.as_ptr(), buffer.as_mut_ptr(), buffer.len() as CUint32) })?;
    Ok(unsafe { CStr::from_ptr(buffer.as_ptr()) }
        .to_string_lossy()
        .into_owned())
}

/// One DAQmx task handle.
pub struct NidaqTask {
    handle: TaskHandle,
    channels: usize,
    sample_rate: f64,
    cleared: bool,
}

impl NidaqTask {
    /// Bounded read timeout: the nominal time one buffer takes to acquire
    /// plus slack. Never infinite, so a starved read (e.g. an armed start
    /// trigger that has not fired) returns control to the caller.
    fn read_timeout(&self, samples_per_channel: usize) -> CFloat64 {
        if self.sample_rate > 0.0 {
            samples_per_channel as f64 / self.sample_rate + READ_TIMEOUT_SLACK_SECS
        } else {
            UNCLOCKED_READ_TIMEOUT_SECS
        }
    }
}

// The handle is only a token passed to the DAQmx runtime; the engine never
// uses one task from two threads at once.
unsafe impl Send for NidaqTask {}

impl DriverTask for NidaqTask {
    fn create_channel(&mut self, descriptor: &ChannelDescriptor) -> Result<(), DriverError> {
        let code = match descriptor {
            ChannelDescriptor::AnalogInput {
                name,
                physical_channel,
                minimum_value,
                maximum_value,
                terminal_config,
                ..
            } => {
                let physical = cstring(physical_channel)?;
                let name = cstring(name)?;
                unsafe {
                    DAQmxCreateAIVoltageChan(
                        self.handle,
                        physical.as_ptr(),
                        name.as_ptr(),
                        terminal_value(*terminal_config),
                        *minimum_value,
                        *maximum_value,
                        DAQMX_VAL_VOLTS,
                        ptr::null(),
                    )
                }
            }
            ChannelDescriptor::AnalogOutput {
                name,
                physical_channel,
                minimum_value,
                maximum_value,
                ..
            } => {
                let physical = cstring(physical_channel)?;
                let name = cstring(name)?;
                unsafe {
                    DAQmxCreateAOVoltageChan(
                        self.handle,
                        physical.as_ptr(),
                        name.as_ptr(),
                        *minimum_value,
                        *maximum_value,
                        DAQMX_VAL_VOLTS,
                        ptr::null(),
                    )
                }
            }
            ChannelDescriptor::DigitalInput {
                name,
                lines,
                line_grouping,
            } => {
                let lines = cstring(lines)?;
                let name = cstring(name)?;
                unsafe {
                    DAQmxCreateDIChan(
                        self.handle,
                        lines.as_ptr(),
                        name.as_ptr(),
                        grouping_value(*line_grouping),
                    )
                }
            }
            ChannelDescriptor::DigitalOutput {
                name,
                lines,
                line_grouping,
            } => {
                let lines = cstring(lines)?;
                let name = cstring(name)?;
                unsafe {
                    DAQmxCreateDOChan(
                        self.handle,
                        lines.as_ptr(),
                        name.as_ptr(),
                        grouping_value(*line_grouping),
                    )
                }
            }
        };
        check_err(code)?;
        self.channels += 1;
        Ok(())
    }

    fn configure_sample_clock(&mut self, timing: &TimingSpec) -> Result<(), DriverError> {
        let source = cstring(&timing.clock_source)?;
        let mode = match timing.quantity_mode {
            QuantityMode::Finite => DAQMX_VAL_FINITE_SAMPS,
            QuantityMode::Continuous => DAQMX_VAL_CONT_SAMPS,
        };
        check_err(unsafe {
            DAQmxCfgSampClkTiming(
                self.handle,
                if timing.clock_source.is_empty() {
                    ptr::null()
                } else {
                    source.as_ptr()
                },
                timing.sample_rate,
                edge_value(timing.active_edge),
                mode,
                timing.buffer_depth as CUint64,
            )
        })?;
        self.sample_rate = timing.sample_rate;
        Ok(())
    }

    fn configure_start_trigger(&mut self, trigger: &TriggerSpec) -> Result<(), DriverError> {
        let terminal = cstring(&trigger.terminal)?;
        check_err(unsafe {
            DAQmxCfgDigEdgeStartTrig(self.handle, terminal.as_ptr(), edge_value(trigger.edge))
        })
    }

    fn verify(&mut self) -> Result<(), DriverError> {
        check_err(unsafe { DAQmxTaskControl(self.handle, DAQMX_VAL_TASK_VERIFY) })
    }

    fn start(&mut self) -> Result<(), DriverError> {
        check_err(unsafe { DAQmxStartTask(self.handle) })
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        check_err(unsafe { DAQmxStopTask(self.handle) })
    }

    fn wait_until_done(&mut self) -> Result<(), DriverError> {
        check_err(unsafe { DAQmxWaitUntilTaskDone(self.handle, DAQMX_VAL_WAIT_INFINITELY) })
    }

    fn dispose(&mut self) -> Result<(), DriverError> {
        if self.cleared {
            return Ok(());
        }
        self.cleared = true;
        check_err(unsafe { DAQmxClearTask(self.handle) })
    }

    fn read_analog(
        &mut self,
        samples_per_channel: usize,
    ) -> Result<Option<Array2<f64>>, DriverError> {
        let mut data = Array2::<f64>::zeros((self.channels, samples_per_channel));
        let mut read: CInt32 = 0;
        let code = unsafe {
            DAQmxReadAnalogF64(
                self.handle,
                samples_per_channel as CInt32,
                self.read_timeout(samples_per_channel),
                DAQMX_VAL_GROUP_BY_CHANNEL,
                data.as_mut_ptr(),
                (self.channels * samples_per_channel) as CUint32,
                &mut read,
                ptr::null_mut(),
            )
        };
        if code == DAQMX_ERR_TIMED_OUT && read == 0 {
            return Ok(None);
        }
        check_err(code)?;
        if read as usize != samples_per_channel {
            return Err(DriverError(format!(
                "analog read returned {read} of {samples_per_channel} samples per channel"
            )));
        }
        Ok(Some(data))
    }

    fn read_digital_u8(
        &mut self,
        samples_per_channel: usize,
    ) -> Result<Option<Array2<u8>>, DriverError> {
        let mut data = Array2::<u8>::zeros((self.channels, samples_per_channel));
        let mut read: CInt32 = 0;
        let code = unsafe {
            DAQmxReadDigitalU8(
                self.handle,
                samples_per_channel as CInt32,
                self.read_timeout(samples_per_channel),
                DAQMX_VAL_GROUP_BY_CHANNEL,
                data.as_mut_ptr(),
                (self.channels * samples_per_channel) as CUint32,
                &mut read,
                ptr::null_mut(),
            )
        };
        if code == DAQMX_ERR_TIMED_OUT && read == 0 {
            return Ok(None);
        }
        check_err(code)?;
        if read as usize != samples_per_channel {
            return Err(DriverError(format!(
                "digital read returned {read} of {samples_per_channel} samples per channel"
            )));
        }
        Ok(Some(data))
    }

    fn write_analog(
        &mut self,
        samples: ArrayView2<'_, f64>,
        auto_start: bool,
    ) -> Result<usize, DriverError> {
        let data = samples.as_standard_layout();
        let mut written: CInt32 = 0;
        check_err(unsafe {
            DAQmxWriteAnalogF64(
                self.handle,
                samples.ncols() as CInt32,
                auto_start as CBool32,
                DAQMX_VAL_WAIT_INFINITELY,
                DAQMX_VAL_GROUP_BY_CHANNEL,
                data.as_ptr(),
                &mut written,
                ptr::null_mut(),
            )
        })?;
        Ok(written as usize)
    }

    fn write_digital_lines(
        &mut self,
        samples: ArrayView2<'_, u8>,
        auto_start: bool,
    ) -> Result<usize, DriverError> {
        let data = samples.as_standard_layout();
        let mut written: CInt32 = 0;
        check_err(unsafe {
            DAQmxWriteDigitalLines(
                self.handle,
                samples.ncols() as CInt32,
                auto_start as CBool32,
                DAQMX_VAL_WAIT_INFINITELY,
                DAQMX_VAL_GROUP_BY_CHANNEL,
                data.as_ptr(),
                &mut written,
                ptr::null_mut(),
            )
        })?;
        Ok(written as usize)
    }

    fn write_digital_u8(
        &mut self,
        samples: ArrayView2<'_, u8>,
        auto_start: bool,
    ) -> Result<usize, DriverError> {
        let data = samples.as_standard_layout();
        let mut written: CInt32 = 0;
        check_err(unsafe {
            DAQmxWriteDigitalU8(
                self.handle,
                samples.ncols() as CInt32,
                auto_start as CBool32,
                DAQMX_VAL_WAIT_INFINITELY,
                DAQMX_VAL_GROUP_BY_CHANNEL,
                data.as_ptr(),
                &mut written,
                ptr::null_mut(),
            )
        })?;
        Ok(written as usize)
    }

    fn write_digital_u16(
        &mut self,
        samples: ArrayView2<'_, u16>,
        auto_start: bool,
    ) -> Result<usize, DriverError> {
        let data = samples.as_standard_layout();
        let mut written: CInt32 = 0;
        check_err(unsafe {
            DAQmxWriteDigitalU16(
                self.handle,
                samples.ncols() as CInt32,
                auto_start as CBool32,
                DAQMX_VAL_WAIT_INFINITELY,
                DAQMX_VAL_GROUP_BY_CHANNEL,
                data.as_ptr(),
                &mut written,
                ptr::null_mut(),
            )
        })?;
        Ok(written as usize)
    }

    fn write_digital_u32(
        &mut self,
        samples: ArrayView2<'_, u32>,
        auto_start: bool,
    ) -> Result<usize, DriverError> {
        let data = samples.as_standard_layout();
        let mut written: CInt32 = 0;
        check_err(unsafe {
            DAQmxWriteDigitalU32(
                self.handle,
                samples.ncols() as CInt32,
                auto_start as CBool32,
                DAQMX_VAL_WAIT_INFINITELY,
                DAQMX_VAL_GROUP_BY_CHANNEL,
                data.as_ptr(),
                &mut written,
                ptr::null_mut(),
            )
        })?;
        Ok(written as usize)
    }
}

impl Drop for NidaqTask {
    fn drop(&mut self) {
        if !self.cleared {
            unsafe {
                DAQmxClearTask(self.handle);
            }
        }
    }
}
