//! Downstream consumers of acquired buffers.
//!
//! Continuous acquisition emits synchronously into a [`BufferSink`] on the
//! acquisition thread: there is no queue in between, so a slow sink defers
//! the next hardware read. That can desynchronize wall-clock timing from
//! acquisition, but cannot corrupt or drop samples in this layer.

use tokio::sync::mpsc;
use tracing::debug;

use crate::buffer::SampleBuffer;

/// Whether the subscription keeps running after an emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkFlow {
    Continue,
    Stop,
}

/// Synchronous consumer of multi-channel buffers.
pub trait BufferSink<T>: Send {
    /// Called once per completed read, on the acquisition thread, with full
    /// ownership of the buffer.
    fn on_buffer(&mut self, buffer: SampleBuffer<T>) -> SinkFlow;
}

impl<T, F> BufferSink<T> for F
where
    F: FnMut(SampleBuffer<T>) -> SinkFlow + Send,
{
    fn on_buffer(&mut self, buffer: SampleBuffer<T>) -> SinkFlow {
        self(buffer)
    }
}

/// Sink end of [`channel_sink`].
pub struct ChannelSink<T> {
    sender: mpsc::UnboundedSender<SampleBuffer<T>>,
}

impl<T: Send> BufferSink<T> for ChannelSink<T> {
    fn on_buffer(&mut self, buffer: SampleBuffer<T>) -> SinkFlow {
        match self.sender.send(buffer) {
            Ok(()) => SinkFlow::Continue,
            Err(_) => {
                debug!("buffer receiver dropped, stopping acquisition");
                SinkFlow::Stop
            }
        }
    }
}

/// Bridge a subscription into an async consumer.
///
/// Returns a sink to subscribe with and the receiving half of an unbounded
/// channel. Unlike direct sink emission this decouples the consumer from the
/// acquisition pace: buffers queue without bound while the consumer lags.
/// Dropping the receiver stops the subscription on its next emission.
pub fn channel_sink<T: Send>() -> (ChannelSink<T>, mpsc::UnboundedReceiver<SampleBuffer<T>>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (ChannelSink { sender }, receiver)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_stops_when_receiver_dropped() {
        let (mut sink, receiver) = channel_sink::<f64>();
        assert_eq!(
            sink.on_buffer(SampleBuffer::zeros(1, 4)),
            SinkFlow::Continue
        );
        drop(receiver);
        assert_eq!(sink.on_buffer(SampleBuffer::zeros(1, 4)), SinkFlow::Stop);
    }
}
