use serde::{Deserialize, Serialize};

use crate::uris::LV2_UI__X11_UI;

pub const DEFAULT_ATOM_BUFFER_BYTES: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockConfig {
    pub min_block_length: u32,
    pub max_block_length: u32,
    pub nominal_block_length: u32,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            min_block_length: 1,
            max_block_length: 8192,
            nominal_block_length: 1024,
        }
    }
}

/// Sizing of the two event rings every instance allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Float events per port that fit in a ring at once.
    pub events_per_port: usize,
    /// Largest payload a single event may carry; bigger writes are dropped.
    pub payload_ceiling: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            events_per_port: 64,
            payload_ceiling: 4096,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub block: BlockConfig,
    pub bridge: BridgeConfig,
    pub atom_buffer_bytes: usize,
    pub drain_interval_ms: u64,
    pub ui_container_type: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            block: BlockConfig::default(),
            bridge: BridgeConfig::default(),
            atom_buffer_bytes: DEFAULT_ATOM_BUFFER_BYTES,
            drain_interval_ms: 33,
            ui_container_type: LV2_UI__X11_UI.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: HostConfig =
            serde_json::from_str(r#"{ "bridge": { "events_per_port": 4 } }"#).unwrap();
        assert_eq!(config.bridge.events_per_port, 4);
        assert_eq!(config.bridge.payload_ceiling, 4096);
        assert_eq!(config.block, BlockConfig::default());
        assert_eq!(config.ui_container_type, LV2_UI__X11_UI);
    }
}
