pub mod atom;
pub mod bridge;
pub mod builtin;
pub mod config;
pub mod drain;
pub mod error;
pub mod features;
pub mod instance;
#[cfg(all(feature = "lilv", unix, not(target_os = "macos")))]
pub mod lilv;
pub mod metadata;
pub mod mutex;
pub mod plugin;
pub mod port;
pub mod state;
#[cfg(all(feature = "suil", unix, not(target_os = "macos")))]
pub mod suil;
pub mod ui;
pub mod urid;
pub mod uris;
pub mod worker;
pub mod world;

pub use bridge::{FLOAT_PROTOCOL, PortEvent, PortWriter};
pub use config::{BlockConfig, BridgeConfig, HostConfig};
pub use drain::{drain_period, spawn_port_event_drain};
pub use error::{HostError, Result};
pub use instance::{Instance, LifecycleState, RunHandle};
pub use metadata::{Parameter, PluginDescriptor, UiDescriptor};
pub use plugin::{NativeInstance, PluginProvider};
pub use port::{ChannelConfig, PortDescriptor, PortFlow, PortRange, PortType, ScalePoint};
pub use state::StateBlob;
pub use ui::{ControllerBinding, NativeUi, UiLoader, UiRequest};
pub use world::World;
