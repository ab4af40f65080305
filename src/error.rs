use thiserror::Error;

use crate::buffer::ElementKind;

/// Error raised by a hardware driver backend.
///
/// Backends report a single stringly-typed error; the task engine classifies
/// it into [`Error`] according to the lifecycle phase it occurred in.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct DriverError(pub String);

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors produced by the task streaming engine.
///
/// Every variant terminates the owning stream; the task is stopped and
/// released before the error becomes observable to the caller.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Malformed channel, timing or trigger specification, or a channel
    /// binding the driver rejected while the task was being built.
    #[error("invalid task configuration: {0}")]
    Config(String),

    /// The driver rejected the assembled task before start, e.g. an
    /// unsupported sample rate or a conflicting terminal.
    #[error("task verification failed: {0}")]
    Verify(String),

    /// A read or write against the device failed. Hardware faults are not
    /// assumed transient and are never retried.
    #[error("hardware I/O error: {0}")]
    Hardware(String),

    /// An output buffer's element type is not supported by the channel kind
    /// it was written to. Detected before any native write for that buffer.
    #[error("unsupported sample type {found:?} for {expected} write")]
    UnsupportedSampleType {
        found: ElementKind,
        expected: &'static str,
    },
}

impl Error {
    pub(crate) fn config(err: DriverError) -> Self {
        Error::Config(err.0)
    }

    pub(crate) fn verify(err: DriverError) -> Self {
        Error::Verify(err.0)
    }

    pub(crate) fn hardware(err: DriverError) -> Self {
        Error::Hardware(err.0)
    }
}
