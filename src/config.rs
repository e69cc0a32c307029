use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use lv2host_engine::HostConfig;
use lv2host_engine::builtin::AMP_URI;
use serde::{Deserialize, Serialize};

pub const ENV_SAMPLE_RATE: &str = "LV2HOST_SAMPLE_RATE";
pub const ENV_BLOCK_SIZE: &str = "LV2HOST_BLOCK_SIZE";
pub const ENV_CYCLES: &str = "LV2HOST_CYCLES";
pub const ENV_PLUGIN: &str = "LV2HOST_PLUGIN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub plugin: String,
    pub sample_rate: f64,
    pub block_size: u32,
    pub cycles: u32,
    /// Control input values written by symbol before the first cycle.
    pub controls: BTreeMap<String, f32>,
    pub host: HostConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            plugin: AMP_URI.to_string(),
            sample_rate: 48_000.0,
            block_size: 512,
            cycles: 64,
            controls: BTreeMap::new(),
            host: HostConfig::default(),
        }
    }
}

impl AppConfig {
    /// Reads `--config PATH` (if given), then applies `LV2HOST_*` overrides.
    pub fn load(args: impl IntoIterator<Item = String>) -> Result<Self, String> {
        let mut config = match config_path(args)? {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config '{}': {e}", path.display()))?;
        Self::from_toml(&text).map_err(|e| format!("Invalid config '{}': {e}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), String> {
        if let Some(value) = lookup(ENV_SAMPLE_RATE) {
            self.sample_rate = parse(ENV_SAMPLE_RATE, &value)?;
        }
        if let Some(value) = lookup(ENV_BLOCK_SIZE) {
            self.block_size = parse(ENV_BLOCK_SIZE, &value)?;
        }
        if let Some(value) = lookup(ENV_CYCLES) {
            self.cycles = parse(ENV_CYCLES, &value)?;
        }
        if let Some(value) = lookup(ENV_PLUGIN) {
            self.plugin = value;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), String> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(format!("Sample rate must be positive, got {}", self.sample_rate));
        }
        if self.block_size == 0 {
            return Err("Block size must be at least 1".to_string());
        }
        if self.block_size > self.host.block.max_block_length {
            return Err(format!(
                "Block size {} exceeds max block length {}",
                self.block_size, self.host.block.max_block_length
            ));
        }
        Ok(())
    }
}

fn config_path(args: impl IntoIterator<Item = String>) -> Result<Option<PathBuf>, String> {
    let mut args = args.into_iter();
    let mut path = None;
    while let Some(arg) = args.next() {
        if arg == "--config" {
            let value = args
                .next()
                .ok_or_else(|| "--config requires a path".to_string())?;
            path = Some(PathBuf::from(value));
        } else if let Some(value) = arg.strip_prefix("--config=") {
            path = Some(PathBuf::from(value));
        } else {
            return Err(format!("Unknown argument: {arg}"));
        }
    }
    Ok(path)
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| format!("Invalid {key} '{value}': {e}"))
}
