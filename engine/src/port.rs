use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{HostError, Result};

/// Returned through the C boundary when a symbol does not name a port.
pub const INVALID_PORT_INDEX: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortType {
    Audio,
    Control,
    Atom,
    Cv,
    Unknown,
}

impl PortType {
    /// Ports whose buffers are sample regions supplied by the audio engine.
    pub fn is_signal(self) -> bool {
        matches!(self, Self::Audio | Self::Cv)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortFlow {
    Input,
    Output,
}

impl PortFlow {
    pub fn from_input(is_input: bool) -> Self {
        if is_input { Self::Input } else { Self::Output }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortRange {
    pub min: f32,
    pub max: f32,
    pub default: f32,
}

impl PortRange {
    pub fn new(min: f32, max: f32, default: f32) -> Self {
        Self { min, max, default }
    }

    /// Widens an empty or inverted range around the default value.
    pub fn sanitized(self) -> Self {
        if matches!(self.min.partial_cmp(&self.max), Some(std::cmp::Ordering::Less)) {
            self
        } else {
            Self {
                min: self.default - 1.0,
                max: self.default + 1.0,
                default: self.default,
            }
        }
    }

    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalePoint {
    pub label: String,
    pub value: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDescriptor {
    pub index: u32,
    pub port_type: PortType,
    pub flow: PortFlow,
    pub symbol: String,
    pub name: String,
    pub range: Option<PortRange>,
    pub scale_points: Vec<ScalePoint>,
    pub enumerated: bool,
    pub optional: bool,
    pub midi: bool,
}

impl PortDescriptor {
    pub fn new(index: u32, port_type: PortType, flow: PortFlow, symbol: &str) -> Self {
        Self {
            index,
            port_type,
            flow,
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            range: None,
            scale_points: vec![],
            enumerated: false,
            optional: false,
            midi: false,
        }
    }

    pub fn audio(index: u32, flow: PortFlow, symbol: &str) -> Self {
        Self::new(index, PortType::Audio, flow, symbol)
    }

    pub fn control(index: u32, flow: PortFlow, symbol: &str, range: PortRange) -> Self {
        Self::new(index, PortType::Control, flow, symbol).with_range(range)
    }

    pub fn atom(index: u32, flow: PortFlow, symbol: &str) -> Self {
        Self::new(index, PortType::Atom, flow, symbol)
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_range(mut self, range: PortRange) -> Self {
        self.range = Some(range.sanitized());
        self
    }

    pub fn with_scale_point(mut self, label: &str, value: f32) -> Self {
        self.scale_points.push(ScalePoint {
            label: label.to_string(),
            value,
        });
        self
    }

    pub fn enumerated(mut self) -> Self {
        self.enumerated = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn midi(mut self) -> Self {
        self.midi = true;
        self
    }

    pub fn is_input(&self) -> bool {
        self.flow == PortFlow::Input
    }

    pub fn is_output(&self) -> bool {
        self.flow == PortFlow::Output
    }

    pub fn default_value(&self) -> f32 {
        self.range.map(|r| r.default).unwrap_or(0.0)
    }

    /// Label of the scale point sitting exactly on `value`, if any.
    pub fn scale_point_label(&self, value: f32) -> Option<&str> {
        self.scale_points
            .iter()
            .find(|point| point.value == value)
            .map(|point| point.label.as_str())
    }

    /// Scale point closest to `value`; enumerated ports snap to these.
    pub fn nearest_scale_point(&self, value: f32) -> Option<&ScalePoint> {
        self.scale_points.iter().min_by(|a, b| {
            (a.value - value)
                .abs()
                .total_cmp(&(b.value - value).abs())
        })
    }
}

/// Channel number ↔ port index mapping per port type and flow.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelConfig {
    inputs: HashMap<PortType, Vec<u32>>,
    outputs: HashMap<PortType, Vec<u32>>,
}

impl ChannelConfig {
    fn from_ports(ports: &[PortDescriptor]) -> Self {
        let mut config = Self::default();
        for port in ports {
            let side = match port.flow {
                PortFlow::Input => &mut config.inputs,
                PortFlow::Output => &mut config.outputs,
            };
            side.entry(port.port_type).or_default().push(port.index);
        }
        config
    }

    fn side(&self, flow: PortFlow) -> &HashMap<PortType, Vec<u32>> {
        match flow {
            PortFlow::Input => &self.inputs,
            PortFlow::Output => &self.outputs,
        }
    }

    pub fn channel_count(&self, port_type: PortType, flow: PortFlow) -> usize {
        self.side(flow).get(&port_type).map_or(0, Vec::len)
    }

    pub fn port_for_channel(&self, port_type: PortType, channel: usize, flow: PortFlow) -> Option<u32> {
        self.side(flow)
            .get(&port_type)
            .and_then(|ports| ports.get(channel))
            .copied()
    }

    pub fn channel_for_port(&self, port_type: PortType, port: u32, flow: PortFlow) -> Option<usize> {
        self.side(flow)
            .get(&port_type)
            .and_then(|ports| ports.iter().position(|p| *p == port))
    }
}

/// Validated, index-ordered port list of one plugin.
#[derive(Debug, Clone, PartialEq)]
pub struct PortList {
    ports: Vec<PortDescriptor>,
    by_symbol: HashMap<String, u32>,
    channels: ChannelConfig,
}

impl PortList {
    pub fn new(mut ports: Vec<PortDescriptor>) -> Result<Self> {
        ports.sort_by_key(|port| port.index);
        let mut by_symbol = HashMap::with_capacity(ports.len());
        for (position, port) in ports.iter().enumerate() {
            if port.index as usize != position {
                return Err(HostError::InvalidDescriptor(format!(
                    "port indices must be contiguous, found {} at position {position}",
                    port.index
                )));
            }
            if by_symbol.insert(port.symbol.clone(), port.index).is_some() {
                return Err(HostError::InvalidDescriptor(format!(
                    "duplicate port symbol '{}'",
                    port.symbol
                )));
            }
        }
        let channels = ChannelConfig::from_ports(&ports);
        Ok(Self {
            ports,
            by_symbol,
            channels,
        })
    }

    pub fn len(&self) -> u32 {
        self.ports.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn count(&self, port_type: PortType, flow: PortFlow) -> u32 {
        self.channels.channel_count(port_type, flow) as u32
    }

    pub fn get(&self, index: u32) -> Result<&PortDescriptor> {
        self.ports.get(index as usize).ok_or(HostError::OutOfRange {
            index,
            count: self.len(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &PortDescriptor> {
        self.ports.iter()
    }

    pub fn index_of(&self, symbol: &str) -> Option<u32> {
        self.by_symbol.get(symbol).copied()
    }

    pub fn require_index(&self, symbol: &str) -> Result<u32> {
        self.index_of(symbol)
            .ok_or_else(|| HostError::NotFound(symbol.to_string()))
    }

    pub fn channels(&self) -> &ChannelConfig {
        &self.channels
    }

    pub fn midi_port(&self) -> Option<u32> {
        self.ports
            .iter()
            .find(|p| p.port_type == PortType::Atom && p.is_input() && p.midi)
            .map(|p| p.index)
    }

    pub fn notify_port(&self) -> Option<u32> {
        self.ports
            .iter()
            .find(|p| p.port_type == PortType::Atom && p.is_output())
            .map(|p| p.index)
    }
}
