//! Sample clock and start trigger specifications.

use serde::{Deserialize, Serialize};

/// Clock or trigger edge on which sampling takes place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActiveEdge {
    #[default]
    Rising,
    Falling,
}

/// Whether a task runs for a fixed sample count or indefinitely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuantityMode {
    Finite,
    #[default]
    Continuous,
}

fn default_buffer_depth() -> usize {
    1000
}

/// Sample clock configuration of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingSpec {
    /// Source terminal of the sample clock. Empty selects the device's
    /// internal clock.
    #[serde(default)]
    pub clock_source: String,
    /// Sampling rate in samples per second. A non-positive rate leaves the
    /// task unclocked where the operator allows on-demand sampling.
    #[serde(default)]
    pub sample_rate: f64,
    #[serde(default)]
    pub active_edge: ActiveEdge,
    #[serde(default)]
    pub quantity_mode: QuantityMode,
    /// Number of samples to acquire or generate for finite runs, or the
    /// driver buffer size for continuous runs.
    #[serde(default = "default_buffer_depth")]
    pub buffer_depth: usize,
    /// Samples transferred per read or write, per channel. Defaults to the
    /// buffer depth when unset.
    #[serde(default)]
    pub samples_per_channel: Option<usize>,
}

impl Default for TimingSpec {
    fn default() -> Self {
        Self {
            clock_source: String::new(),
            sample_rate: 0.0,
            active_edge: ActiveEdge::default(),
            quantity_mode: QuantityMode::default(),
            buffer_depth: default_buffer_depth(),
            samples_per_channel: None,
        }
    }
}

impl TimingSpec {
    /// Continuous sampling at `sample_rate` from the internal clock.
    pub fn continuous(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            ..Self::default()
        }
    }

    /// Finite run generating or acquiring `buffer_depth` samples per channel
    /// at `sample_rate`.
    pub fn finite(sample_rate: f64, buffer_depth: usize) -> Self {
        Self {
            sample_rate,
            quantity_mode: QuantityMode::Finite,
            buffer_depth,
            ..Self::default()
        }
    }

    /// Column count of every buffer a read or write transfers.
    pub fn samples_per_channel(&self) -> usize {
        self.samples_per_channel.unwrap_or(self.buffer_depth)
    }

    /// Whether a sample clock drives the task at all.
    pub fn is_clocked(&self) -> bool {
        self.sample_rate > 0.0
    }
}

/// Optional digital edge start trigger gating when an input task begins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    /// Terminal carrying the trigger pulse, e.g. `/Dev1/PFI0`.
    pub terminal: String,
    #[serde(default)]
    pub edge: ActiveEdge,
}

impl TriggerSpec {
    pub fn rising(terminal: impl Into<String>) -> Self {
        Self {
            terminal: terminal.into(),
            edge: ActiveEdge::Rising,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_per_channel_defaults_to_buffer_depth() {
        let timing = TimingSpec::continuous(1000.0);
        assert_eq!(timing.samples_per_channel(), 1000);

        let timing = TimingSpec {
            samples_per_channel: Some(100),
            ..TimingSpec::continuous(1000.0)
        };
        assert_eq!(timing.samples_per_channel(), 100);
    }

    #[test]
    fn unset_rate_means_unclocked() {
        assert!(!TimingSpec::default().is_clocked());
        assert!(TimingSpec::continuous(10.0).is_clocked());
    }

    #[test]
    fn deserializes_with_defaults() {
        let timing: TimingSpec = serde_json::from_str(r#"{ "sample_rate": 500.0 }"#).unwrap();
        assert_eq!(timing.buffer_depth, 1000);
        assert_eq!(timing.quantity_mode, QuantityMode::Continuous);
        assert_eq!(timing.active_edge, ActiveEdge::Rising);
        assert!(timing.clock_source.is_empty());
    }
}
