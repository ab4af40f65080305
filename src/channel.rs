//! Virtual channel descriptors.
//!
//! A [`ChannelDescriptor`] binds one physical channel, line or port to a
//! virtual channel inside a task. All descriptors of one task must share the
//! same direction and signal kind, and their order fixes the row order of
//! every sample buffer the task produces or consumes.

use serde::{Deserialize, Serialize};

/// Whether a channel acquires samples from or generates samples to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Input,
    Output,
}

/// Whether a channel carries voltage measurements or logic levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    Analog,
    Digital,
}

/// Terminal configuration of an analog input channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalConfig {
    #[default]
    Differential,
    Rse,
    Nrse,
    PseudoDifferential,
}

/// Units of analog samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoltageUnits {
    #[default]
    Volts,
}

/// How digital lines are grouped into a virtual channel: one channel per
/// line, or all lines combined into a single port bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineGrouping {
    #[default]
    PerLine,
    PerPort,
}

fn default_min() -> f64 {
    -10.0
}

fn default_max() -> f64 {
    10.0
}

/// Description of one virtual channel.
///
/// Kind-specific fields live on the variant. Mixing kinds or directions
/// within a task is rejected at build time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChannelDescriptor {
    AnalogInput {
        /// Name of the virtual channel. The physical binding is used if empty.
        #[serde(default)]
        name: String,
        /// Physical channel the virtual channel is bound to, e.g. `Dev1/ai0`.
        physical_channel: String,
        #[serde(default = "default_min")]
        minimum_value: f64,
        #[serde(default = "default_max")]
        maximum_value: f64,
        #[serde(default)]
        terminal_config: TerminalConfig,
        #[serde(default)]
        voltage_units: VoltageUnits,
    },
    AnalogOutput {
        #[serde(default)]
        name: String,
        physical_channel: String,
        #[serde(default = "default_min")]
        minimum_value: f64,
        #[serde(default = "default_max")]
        maximum_value: f64,
        #[serde(default)]
        voltage_units: VoltageUnits,
    },
    DigitalInput {
        #[serde(default)]
        name: String,
        /// Digital lines or port to bind, e.g. `Dev1/port0/line0:3`.
        lines: String,
        #[serde(default)]
        line_grouping: LineGrouping,
    },
    DigitalOutput {
        #[serde(default)]
        name: String,
        lines: String,
        #[serde(default)]
        line_grouping: LineGrouping,
    },
}

impl ChannelDescriptor {
    /// Analog input channel with default range, terminal and units.
    pub fn analog_input(physical_channel: impl Into<String>) -> Self {
        ChannelDescriptor::AnalogInput {
            name: String::new(),
            physical_channel: physical_channel.into(),
            minimum_value: default_min(),
            maximum_value: default_max(),
            terminal_config: TerminalConfig::default(),
            voltage_units: VoltageUnits::default(),
        }
    }

    /// Analog output channel with default range and units.
    pub fn analog_output(physical_channel: impl Into<String>) -> Self {
        ChannelDescriptor::AnalogOutput {
            name: String::new(),
            physical_channel: physical_channel.into(),
            minimum_value: default_min(),
            maximum_value: default_max(),
            voltage_units: VoltageUnits::default(),
        }
    }

    /// Digital input channel addressed per line.
    pub fn digital_input(lines: impl Into<String>) -> Self {
        ChannelDescriptor::DigitalInput {
            name: String::new(),
            lines: lines.into(),
            line_grouping: LineGrouping::default(),
        }
    }

    /// Digital output channel addressed per line.
    pub fn digital_output(lines: impl Into<String>) -> Self {
        ChannelDescriptor::DigitalOutput {
            name: String::new(),
            lines: lines.into(),
            line_grouping: LineGrouping::default(),
        }
    }

    /// Digital input channel with all lines combined into one port channel.
    pub fn digital_input_port(lines: impl Into<String>) -> Self {
        ChannelDescriptor::DigitalInput {
            name: String::new(),
            lines: lines.into(),
            line_grouping: LineGrouping::PerPort,
        }
    }

    /// Digital output channel with all lines combined into one port channel.
    pub fn digital_output_port(lines: impl Into<String>) -> Self {
        ChannelDescriptor::DigitalOutput {
            name: String::new(),
            lines: lines.into(),
            line_grouping: LineGrouping::PerPort,
        }
    }

    /// Assign a virtual channel name.
    pub fn named(mut self, channel_name: impl Into<String>) -> Self {
        match &mut self {
            ChannelDescriptor::AnalogInput { name, .. }
            | ChannelDescriptor::AnalogOutput { name, .. }
            | ChannelDescriptor::DigitalInput { name, .. }
            | ChannelDescriptor::DigitalOutput { name, .. } => *name = channel_name.into(),
        }
        self
    }

    /// Set the voltage range of an analog channel. No effect on digital
    /// channels.
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        match &mut self {
            ChannelDescriptor::AnalogInput {
                minimum_value,
                maximum_value,
                ..
            }
            | ChannelDescriptor::AnalogOutput {
                minimum_value,
                maximum_value,
                ..
            } => {
                *minimum_value = min;
                *maximum_value = max;
            }
            _ => {}
        }
        self
    }

    /// Set the terminal configuration of an analog input channel.
    pub fn with_terminal_config(mut self, config: TerminalConfig) -> Self {
        if let ChannelDescriptor::AnalogInput {
            terminal_config, ..
        } = &mut self
        {
            *terminal_config = config;
        }
        self
    }

    pub fn direction(&self) -> Direction {
        match self {
            ChannelDescriptor::AnalogInput { .. } | ChannelDescriptor::DigitalInput { .. } => {
                Direction::Input
            }
            ChannelDescriptor::AnalogOutput { .. } | ChannelDescriptor::DigitalOutput { .. } => {
                Direction::Output
            }
        }
    }

    pub fn kind(&self) -> SignalKind {
        match self {
            ChannelDescriptor::AnalogInput { .. } | ChannelDescriptor::AnalogOutput { .. } => {
                SignalKind::Analog
            }
            ChannelDescriptor::DigitalInput { .. } | ChannelDescriptor::DigitalOutput { .. } => {
                SignalKind::Digital
            }
        }
    }

    /// Physical channel, lines or port the descriptor is bound to.
    pub fn physical_binding(&self) -> &str {
        match self {
            ChannelDescriptor::AnalogInput {
                physical_channel, ..
            }
            | ChannelDescriptor::AnalogOutput {
                physical_channel, ..
            } => physical_channel,
            ChannelDescriptor::DigitalInput { lines, .. }
            | ChannelDescriptor::DigitalOutput { lines, .. } => lines,
        }
    }

    /// Display label: the virtual channel name, falling back to the physical
    /// binding when no name was assigned.
    pub fn label(&self) -> &str {
        let name = match self {
            ChannelDescriptor::AnalogInput { name, .. }
            | ChannelDescriptor::AnalogOutput { name, .. }
            | ChannelDescriptor::DigitalInput { name, .. }
            | ChannelDescriptor::DigitalOutput { name, .. } => name,
        };
        if name.is_empty() {
            self.physical_binding()
        } else {
            name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_falls_back_to_physical_binding() {
        let unnamed = ChannelDescriptor::analog_input("Dev1/ai0");
        assert_eq!(unnamed.label(), "Dev1/ai0");

        let named = ChannelDescriptor::analog_input("Dev1/ai0").named("preload");
        assert_eq!(named.label(), "preload");
    }

    #[test]
    fn direction_and_kind_follow_variant() {
        let ai = ChannelDescriptor::analog_input("Dev1/ai0");
        assert_eq!(ai.direction(), Direction::Input);
        assert_eq!(ai.kind(), SignalKind::Analog);

        let dout = ChannelDescriptor::digital_output_port("Dev1/port0");
        assert_eq!(dout.direction(), Direction::Output);
        assert_eq!(dout.kind(), SignalKind::Digital);
    }

    #[test]
    fn analog_defaults_deserialize() {
        let descriptor: ChannelDescriptor =
            serde_json::from_str(r#"{ "AnalogInput": { "physical_channel": "Dev1/ai3" } }"#)
                .unwrap();
        match descriptor {
            ChannelDescriptor::AnalogInput {
                minimum_value,
                maximum_value,
                terminal_config,
                ..
            } => {
                assert_eq!(minimum_value, -10.0);
                assert_eq!(maximum_value, 10.0);
                assert_eq!(terminal_config, TerminalConfig::Differential);
            }
            other => panic!("unexpected descriptor: {other:?}"),
        }
    }
}
