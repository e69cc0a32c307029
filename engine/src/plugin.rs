//! Seam between the runtime and whatever actually implements a plugin.
//!
//! Native LV2 binaries come in through the `lilv` module; Rust-native plugins
//! (the built-in amplifier, test fixtures) implement these traits directly.

use std::{ffi::c_void, sync::Arc};

use crate::features::FeatureSet;
use crate::metadata::PluginDescriptor;

/// `LV2_Descriptor::extension_data`, handed to UIs through `data-access`.
pub type ExtensionDataFn = unsafe extern "C" fn(uri: *const std::ffi::c_char) -> *const c_void;

/// Resolves a descriptor and creates native instances of it.
pub trait PluginProvider: Send + Sync {
    fn descriptor(&self) -> Arc<PluginDescriptor>;

    /// Returns `None` when the plugin refused to instantiate.
    fn instantiate(
        &self,
        sample_rate: f64,
        features: &FeatureSet,
    ) -> Option<Box<dyn NativeInstance>>;
}

/// One instantiated plugin, driven from the audio thread.
pub trait NativeInstance: Send {
    /// `LV2_Handle` of the instance; null for instances without one.
    fn handle(&self) -> *mut c_void;

    /// # Safety
    /// `data` must stay valid until it is replaced or the instance is dropped.
    unsafe fn connect_port(&mut self, port: u32, data: *mut c_void);

    fn activate(&mut self);

    fn deactivate(&mut self);

    /// # Safety
    /// Every non-optional port must be connected to a buffer that holds at
    /// least `frames` samples (or a full atom sequence).
    unsafe fn run(&mut self, frames: u32);

    /// Returns null when the extension is not provided.
    fn extension_data(&self, uri: &str) -> *const c_void;

    fn data_access(&self) -> Option<ExtensionDataFn> {
        None
    }
}
