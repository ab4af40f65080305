//! Multi-channel sample buffers.
//!
//! Buffers are 2-D and row-major: one row per virtual channel in descriptor
//! order, one column per sample. Ownership transfers fully on emission, so
//! successive buffers never alias.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Element type of a run-time-typed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementKind {
    Bool,
    U8,
    U16,
    U32,
    F64,
}

/// Owned multi-channel buffer with a fixed element type.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer<T> {
    data: Array2<T>,
}

impl<T> SampleBuffer<T> {
    /// Wrap an existing array; rows are channels, columns are samples.
    pub fn from_array(data: Array2<T>) -> Self {
        Self { data }
    }

    /// Number of channel rows.
    pub fn channels(&self) -> usize {
        self.data.nrows()
    }

    /// Number of sample columns.
    pub fn samples_per_channel(&self) -> usize {
        self.data.ncols()
    }

    pub fn view(&self) -> ArrayView2<'_, T> {
        self.data.view()
    }

    pub fn into_array(self) -> Array2<T> {
        self.data
    }

    /// Samples of one channel, in acquisition order.
    pub fn channel(&self, row: usize) -> ndarray::ArrayView1<'_, T> {
        self.data.row(row)
    }
}

impl<T: Clone + Default> SampleBuffer<T> {
    /// All-default buffer of the given shape (zeros for numeric elements).
    pub fn zeros(channels: usize, samples_per_channel: usize) -> Self {
        Self {
            data: Array2::from_elem((channels, samples_per_channel), T::default()),
        }
    }
}

impl<T: Clone> SampleBuffer<T> {
    /// Build a buffer from per-channel sample rows. All rows must share one
    /// length; panics otherwise (construction error, not a stream error).
    pub fn from_rows(rows: &[Vec<T>]) -> Self {
        let channels = rows.len();
        let samples = rows.first().map(Vec::len).unwrap_or(0);
        assert!(
            rows.iter().all(|row| row.len() == samples),
            "all channel rows must have the same sample count"
        );
        let flat: Vec<T> = rows.iter().flat_map(|row| row.iter().cloned()).collect();
        Self {
            data: Array2::from_shape_vec((channels, samples), flat)
                .expect("row-major shape follows from the row lengths"),
        }
    }
}

impl<T> From<Array2<T>> for SampleBuffer<T> {
    fn from(data: Array2<T>) -> Self {
        Self::from_array(data)
    }
}

impl<T> From<SampleBuffer<T>> for Array2<T> {
    fn from(buffer: SampleBuffer<T>) -> Self {
        buffer.data
    }
}

/// Multi-channel buffer whose element type is only known at run time.
///
/// This is the writer engine's dynamic input shape: upstream pipelines carry
/// buffers of whatever width the producer chose, and the engine checks the
/// width against the channel kind before any write is issued.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    Bool(SampleBuffer<bool>),
    U8(SampleBuffer<u8>),
    U16(SampleBuffer<u16>),
    U32(SampleBuffer<u32>),
    F64(SampleBuffer<f64>),
}

impl Samples {
    pub fn element_kind(&self) -> ElementKind {
        match self {
            Samples::Bool(_) => ElementKind::Bool,
            Samples::U8(_) => ElementKind::U8,
            Samples::U16(_) => ElementKind::U16,
            Samples::U32(_) => ElementKind::U32,
            Samples::F64(_) => ElementKind::F64,
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            Samples::Bool(b) => b.channels(),
            Samples::U8(b) => b.channels(),
            Samples::U16(b) => b.channels(),
            Samples::U32(b) => b.channels(),
            Samples::F64(b) => b.channels(),
        }
    }

    pub fn samples_per_channel(&self) -> usize {
        match self {
            Samples::Bool(b) => b.samples_per_channel(),
            Samples::U8(b) => b.samples_per_channel(),
            Samples::U16(b) => b.samples_per_channel(),
            Samples::U32(b) => b.samples_per_channel(),
            Samples::F64(b) => b.samples_per_channel(),
        }
    }
}

impl From<SampleBuffer<f64>> for Samples {
    fn from(buffer: SampleBuffer<f64>) -> Self {
        Samples::F64(buffer)
    }
}

impl From<SampleBuffer<u8>> for Samples {
    fn from(buffer: SampleBuffer<u8>) -> Self {
        Samples::U8(buffer)
    }
}

impl From<SampleBuffer<u16>> for Samples {
    fn from(buffer: SampleBuffer<u16>) -> Self {
        Samples::U16(buffer)
    }
}

impl From<SampleBuffer<u32>> for Samples {
    fn from(buffer: SampleBuffer<u32>) -> Self {
        Samples::U32(buffer)
    }
}

impl From<SampleBuffer<bool>> for Samples {
    fn from(buffer: SampleBuffer<bool>) -> Self {
        Samples::Bool(buffer)
    }
}

/// One port bitmask sample, in the narrowest width the caller chose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    U8(u8),
    U16(u16),
    U32(u32),
}

/// One port sample per channel, all in the same width. Used by the
/// unclocked per-notification array write path; the vector length must
/// match the task's channel count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortArray {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl PortArray {
    pub fn len(&self) -> usize {
        match self {
            PortArray::U8(v) => v.len(),
            PortArray::U16(v) => v.len(),
            PortArray::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rows_preserves_channel_order() {
        let buffer = SampleBuffer::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert_eq!(buffer.channels(), 2);
        assert_eq!(buffer.samples_per_channel(), 2);
        assert_eq!(buffer.channel(0).to_vec(), vec![1.0, 2.0]);
        assert_eq!(buffer.channel(1).to_vec(), vec![3.0, 4.0]);
    }

    #[test]
    #[should_panic(expected = "same sample count")]
    fn from_rows_rejects_ragged_rows() {
        let _ = SampleBuffer::from_rows(&[vec![1.0, 2.0], vec![3.0]]);
    }

    #[test]
    fn samples_reports_element_kind_and_shape() {
        let samples = Samples::from(SampleBuffer::<u16>::zeros(1, 50));
        assert_eq!(samples.element_kind(), ElementKind::U16);
        assert_eq!(samples.channels(), 1);
        assert_eq!(samples.samples_per_channel(), 50);
    }
}
