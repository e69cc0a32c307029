//! Error types for the instance runtime

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("Failed to instantiate '{uri}': {reason}")]
    InstantiationFailed { uri: String, reason: String },

    #[error("Port index {index} out of range (plugin has {count} ports)")]
    OutOfRange { index: u32, count: u32 },

    #[error("No port with symbol '{0}'")]
    NotFound(String),

    #[error("Event ring full, dropped {size} byte event for port {port}")]
    RingOverflow { port: u32, size: usize },

    #[error("Plugin UI unavailable: {0}")]
    BindingUnavailable(String),

    #[error("Invalid plugin descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Invalid instance state: {0}")]
    InvalidState(&'static str),

    #[error("Plugin state error: {0}")]
    State(String),

    #[error("State encoding error: {0}")]
    StateEncoding(#[from] serde_json::Error),

    #[error("State property decoding error: {0}")]
    StateDecoding(#[from] base64::DecodeError),
}

pub type Result<T> = std::result::Result<T, HostError>;
