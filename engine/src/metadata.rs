use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{HostError, Result};
use crate::port::{PortDescriptor, PortList, PortRange, PortType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiDescriptor {
    pub uri: String,
    pub type_uri: String,
    pub bundle_path: PathBuf,
    pub binary_path: PathBuf,
}

/// Resolved, immutable description of one plugin.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginDescriptor {
    pub uri: String,
    pub name: String,
    pub class_label: String,
    pub author: String,
    pub ports: PortList,
    pub uis: Vec<UiDescriptor>,
    pub required_features: Vec<String>,
}

impl PluginDescriptor {
    pub fn new(uri: &str, name: &str, ports: Vec<PortDescriptor>) -> Result<Self> {
        if uri.is_empty() {
            return Err(HostError::InvalidDescriptor("plugin URI is empty".into()));
        }
        Ok(Self {
            uri: uri.to_string(),
            name: name.to_string(),
            class_label: String::new(),
            author: String::new(),
            ports: PortList::new(ports)?,
            uis: vec![],
            required_features: vec![],
        })
    }

    pub fn with_class(mut self, class_label: &str) -> Self {
        self.class_label = class_label.to_string();
        self
    }

    pub fn with_author(mut self, author: &str) -> Self {
        self.author = author.to_string();
        self
    }

    pub fn with_ui(mut self, ui: UiDescriptor) -> Self {
        self.uis.push(ui);
        self
    }

    pub fn with_required_feature(mut self, uri: &str) -> Self {
        self.required_features.push(uri.to_string());
        self
    }

    pub fn port_name(&self, index: u32) -> Result<&str> {
        Ok(self.ports.get(index)?.name.as_str())
    }

    pub fn port_range(&self, index: u32) -> Result<Option<PortRange>> {
        Ok(self.ports.get(index)?.range)
    }
}

/// Range-aware view of a control port value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Parameter {
    min: f32,
    max: f32,
    default: f32,
    value: f32,
}

impl Default for Parameter {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 1.0,
            default: 0.0,
            value: 0.0,
        }
    }
}

impl Parameter {
    pub fn new(range: PortRange, value: f32) -> Self {
        let range = range.sanitized();
        let mut param = Self {
            min: range.min,
            max: range.max,
            default: range.default,
            value: range.default,
        };
        param.set(value);
        param
    }

    pub fn from_port(port: &PortDescriptor, value: f32) -> Option<Self> {
        if port.port_type != PortType::Control {
            return None;
        }
        Some(Self::new(port.range?, value))
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    pub fn default_value(&self) -> f32 {
        self.default
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    /// Returns whether the value changed. Values outside the range are ignored.
    pub fn set(&mut self, value: f32) -> bool {
        if value < self.min || value > self.max || value == self.value {
            return false;
        }
        self.value = value;
        true
    }

    pub fn set_range(&mut self, min: f32, max: f32) {
        let range = PortRange::new(min, max, self.default).sanitized();
        self.min = range.min;
        self.max = range.max;
        self.value = range.clamp(self.value);
    }

    pub fn reset(&mut self) {
        self.value = self.default.clamp(self.min, self.max);
    }

    pub fn scale_of(&self, value: f32) -> f32 {
        (value - self.min) / (self.max - self.min)
    }

    /// Current value normalized to `0.0..=1.0`.
    pub fn normal(&self) -> f32 {
        self.scale_of(self.value)
    }

    pub fn set_normal(&mut self, normal: f32) -> bool {
        let normal = normal.clamp(0.0, 1.0);
        self.set(self.min + normal * (self.max - self.min))
    }

    pub fn logarithmic(&self) -> f32 {
        Self::map_log(self.value, self.min, self.max)
    }

    /// Position of `value` on a logarithmic curve over `[min, max]`, in `0.0..=1.0`.
    pub fn map_log(value: f32, min: f32, max: f32) -> f32 {
        let offset = if min <= 0.0 { 1.0 - min } else { 0.0 };
        let (value, min, max) = (value + offset, min + offset, max + offset);
        ((value / min).ln() / (max / min).ln()).clamp(0.0, 1.0)
    }

    /// Inverse of [`Parameter::map_log`].
    pub fn map_exp(normal: f32, min: f32, max: f32) -> f32 {
        let offset = if min <= 0.0 { 1.0 - min } else { 0.0 };
        let (lo, hi) = (min + offset, max + offset);
        lo * (hi / lo).powf(normal.clamp(0.0, 1.0)) - offset
    }
}
