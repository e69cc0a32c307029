//! Native LV2 plugins discovered through lilv.

use std::{ffi::c_void, path::PathBuf, sync::Arc};

use lilv::{
    World,
    instance::{ActiveInstance, Instance as LilvInstance},
    node::Node,
    plugin::Plugin,
};
use lv2_raw::LV2Feature;
use tracing::{debug, warn};

use crate::error::{HostError, Result};
use crate::features::FeatureSet;
use crate::metadata::{PluginDescriptor, UiDescriptor};
use crate::plugin::{NativeInstance, PluginProvider};
use crate::port::{PortDescriptor, PortFlow, PortRange, PortType};
use crate::uris::{
    LV2_ATOM__ATOM_PORT, LV2_CORE__AUDIO_PORT, LV2_CORE__CONNECTION_OPTIONAL,
    LV2_CORE__CONTROL_PORT, LV2_CORE__CV_PORT, LV2_CORE__ENUMERATION, LV2_CORE__INPUT_PORT,
    LV2_CORE__OUTPUT_PORT, LV2_EVENT__EVENT_PORT, LV2_MIDI__MIDI_EVENT, LV2_UI__GTK3_UI,
    LV2_UI__X11_UI,
};

/// Shared lilv world. Only touched from the message thread.
struct LilvWorld {
    world: World,
}

unsafe impl Send for LilvWorld {}
unsafe impl Sync for LilvWorld {}

/// Installed LV2 bundles, loaded once.
#[derive(Clone)]
pub struct LilvCatalog {
    inner: Arc<LilvWorld>,
}

impl Default for LilvCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl LilvCatalog {
    pub fn new() -> Self {
        let world = World::new();
        world.load_all();
        Self {
            inner: Arc::new(LilvWorld { world }),
        }
    }

    /// URIs of every plugin that passes verification, sorted.
    pub fn plugin_uris(&self) -> Vec<String> {
        let mut uris = self
            .inner
            .world
            .plugins()
            .iter()
            .filter(|plugin| plugin.verify())
            .filter_map(|plugin| plugin.uri().as_uri().map(str::to_string))
            .collect::<Vec<_>>();
        uris.sort();
        uris
    }

    /// Resolves `uri` into a provider the runtime can instantiate.
    pub fn plugin(&self, uri: &str) -> Result<LilvPlugin> {
        let plugin = find_plugin(&self.inner.world, uri)?;
        if !plugin.verify() {
            return Err(HostError::InvalidDescriptor(format!(
                "plugin failed verification: {uri}"
            )));
        }
        let descriptor = describe(&self.inner.world, &plugin, uri)?;
        debug!(
            "Resolved {uri} with {} ports and {} UIs",
            descriptor.ports.len(),
            descriptor.uis.len()
        );
        Ok(LilvPlugin {
            world: self.inner.clone(),
            descriptor: Arc::new(descriptor),
        })
    }
}

fn find_plugin(world: &World, uri: &str) -> Result<Plugin> {
    let uri_node = world.new_uri(uri);
    world
        .plugins()
        .plugin(&uri_node)
        .ok_or_else(|| HostError::NotFound(format!("plugin {uri}")))
}

fn node_string(node: &Node) -> Option<String> {
    node.as_uri()
        .map(str::to_string)
        .or_else(|| node.as_str().map(str::to_string))
}

fn describe(world: &World, plugin: &Plugin, uri: &str) -> Result<PluginDescriptor> {
    let input_port = world.new_uri(LV2_CORE__INPUT_PORT);
    let audio_port = world.new_uri(LV2_CORE__AUDIO_PORT);
    let control_port = world.new_uri(LV2_CORE__CONTROL_PORT);
    let cv_port = world.new_uri(LV2_CORE__CV_PORT);
    let atom_port = world.new_uri(LV2_ATOM__ATOM_PORT);
    let event_port = world.new_uri(LV2_EVENT__EVENT_PORT);
    let midi_event = world.new_uri(LV2_MIDI__MIDI_EVENT);
    let enumeration = world.new_uri(LV2_CORE__ENUMERATION);
    let optional = world.new_uri(LV2_CORE__CONNECTION_OPTIONAL);
    let output_port = world.new_uri(LV2_CORE__OUTPUT_PORT);

    let mut ports = Vec::new();
    for port in plugin.iter_ports() {
        let index = port.index() as u32;
        let port_type = if port.is_a(&audio_port) {
            PortType::Audio
        } else if port.is_a(&control_port) {
            PortType::Control
        } else if port.is_a(&cv_port) {
            PortType::Cv
        } else if port.is_a(&atom_port) || port.is_a(&event_port) {
            PortType::Atom
        } else {
            PortType::Unknown
        };
        if !port.is_a(&input_port) && !port.is_a(&output_port) {
            warn!("Port {index} of {uri} has no direction; treating it as an input");
        }
        let flow = PortFlow::from_input(!port.is_a(&output_port));
        let symbol = port
            .symbol()
            .and_then(|node| node.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("port_{index}"));
        let name = port
            .name()
            .and_then(|node| node.as_str().map(str::to_string))
            .unwrap_or_else(|| symbol.clone());

        let mut descriptor = PortDescriptor::new(index, port_type, flow, &symbol).with_name(&name);
        if port_type == PortType::Control {
            let range = port.range();
            let default = range.default.and_then(|node| node.as_float()).unwrap_or(0.0);
            let min = range.minimum.and_then(|node| node.as_float()).unwrap_or(0.0);
            let max = range.maximum.and_then(|node| node.as_float()).unwrap_or(1.0);
            descriptor = descriptor.with_range(PortRange::new(min, max, default));
            for point in port.scale_points().iter() {
                let label = point.label().as_str().map(str::to_string);
                let value = point.value().as_float();
                if let (Some(label), Some(value)) = (label, value) {
                    descriptor = descriptor.with_scale_point(&label, value);
                }
            }
        }
        if port.has_property(&enumeration) {
            descriptor = descriptor.enumerated();
        }
        if port.has_property(&optional) {
            descriptor = descriptor.optional();
        }
        if port_type == PortType::Atom && port.supports_event(&midi_event) {
            descriptor = descriptor.midi();
        }
        ports.push(descriptor);
    }

    let name = plugin.name().as_str().unwrap_or(uri).to_string();
    let mut descriptor = PluginDescriptor::new(uri, &name, ports)?.with_class(
        plugin.class().label().as_str().unwrap_or("Unknown"),
    );
    if let Some(author) = plugin.author_name().and_then(|node| node_string(&node)) {
        descriptor = descriptor.with_author(&author);
    }
    for feature in plugin.required_features().iter() {
        if let Some(feature) = node_string(&feature) {
            descriptor = descriptor.with_required_feature(&feature);
        }
    }
    for ui in ui_descriptors(world, plugin) {
        descriptor = descriptor.with_ui(ui);
    }
    Ok(descriptor)
}

fn ui_descriptors(world: &World, plugin: &Plugin) -> Vec<UiDescriptor> {
    let Some(uis) = plugin.uis() else {
        return vec![];
    };
    let classes = [
        (world.new_uri(LV2_UI__X11_UI), LV2_UI__X11_UI),
        (world.new_uri(LV2_UI__GTK3_UI), LV2_UI__GTK3_UI),
    ];
    let mut found = Vec::new();
    for ui in uis.iter() {
        let Some(uri) = ui.uri().as_uri().map(str::to_string) else {
            continue;
        };
        let Some((_, bundle_path)) = ui.bundle_uri().and_then(|node| node.path()) else {
            continue;
        };
        let Some((_, binary_path)) = ui.binary_uri().and_then(|node| node.path()) else {
            continue;
        };
        for (class_node, class_uri) in &classes {
            if ui.is_a(class_node) {
                found.push(UiDescriptor {
                    uri: uri.clone(),
                    type_uri: class_uri.to_string(),
                    bundle_path: PathBuf::from(&bundle_path),
                    binary_path: PathBuf::from(&binary_path),
                });
            }
        }
    }
    found
}

/// Provider backed by an installed LV2 binary.
pub struct LilvPlugin {
    world: Arc<LilvWorld>,
    descriptor: Arc<PluginDescriptor>,
}

impl PluginProvider for LilvPlugin {
    fn descriptor(&self) -> Arc<PluginDescriptor> {
        self.descriptor.clone()
    }

    fn instantiate(
        &self,
        sample_rate: f64,
        features: &FeatureSet,
    ) -> Option<Box<dyn NativeInstance>> {
        let plugin = match find_plugin(&self.world.world, &self.descriptor.uri) {
            Ok(plugin) => plugin,
            Err(e) => {
                warn!("{e}");
                return None;
            }
        };
        let feature_refs: Vec<&LV2Feature> = features.iter().collect();
        let instance = unsafe { plugin.instantiate(sample_rate, feature_refs) }?;
        Some(Box::new(LilvNative {
            slot: InstanceSlot::Idle(instance),
            _world: self.world.clone(),
        }))
    }
}

enum InstanceSlot {
    Idle(LilvInstance),
    Active(ActiveInstance),
    Gone,
}

struct LilvNative {
    slot: InstanceSlot,
    _world: Arc<LilvWorld>,
}

unsafe impl Send for LilvNative {}

impl LilvNative {
    fn instance(&self) -> Option<&LilvInstance> {
        match &self.slot {
            InstanceSlot::Idle(instance) => Some(instance),
            InstanceSlot::Active(active) => Some(active.instance()),
            InstanceSlot::Gone => None,
        }
    }

    fn instance_mut(&mut self) -> Option<&mut LilvInstance> {
        match &mut self.slot {
            InstanceSlot::Idle(instance) => Some(instance),
            InstanceSlot::Active(active) => Some(active.instance_mut()),
            InstanceSlot::Gone => None,
        }
    }
}

impl NativeInstance for LilvNative {
    fn handle(&self) -> *mut c_void {
        self.instance()
            .map_or(std::ptr::null_mut(), |instance| instance.handle().cast())
    }

    unsafe fn connect_port(&mut self, port: u32, data: *mut c_void) {
        if let Some(instance) = self.instance_mut() {
            unsafe {
                instance.connect_port_mut(port as usize, data);
            }
        }
    }

    fn activate(&mut self) {
        self.slot = match std::mem::replace(&mut self.slot, InstanceSlot::Gone) {
            InstanceSlot::Idle(instance) => InstanceSlot::Active(unsafe { instance.activate() }),
            other => other,
        };
    }

    fn deactivate(&mut self) {
        self.slot = match std::mem::replace(&mut self.slot, InstanceSlot::Gone) {
            InstanceSlot::Active(active) => match unsafe { active.deactivate() } {
                Some(instance) => InstanceSlot::Idle(instance),
                None => {
                    warn!("lilv instance was lost on deactivate");
                    InstanceSlot::Gone
                }
            },
            other => other,
        };
    }

    unsafe fn run(&mut self, frames: u32) {
        if let InstanceSlot::Active(active) = &mut self.slot {
            unsafe {
                active.run(frames as usize);
            }
        }
    }

    fn extension_data(&self, uri: &str) -> *const c_void {
        self.instance()
            .and_then(|instance| unsafe { instance.extension_data::<c_void>(uri) })
            .map_or(std::ptr::null(), |ptr| ptr.as_ptr().cast_const())
    }
}

impl Drop for LilvNative {
    fn drop(&mut self) {
        if let InstanceSlot::Active(active) = std::mem::replace(&mut self.slot, InstanceSlot::Gone) {
            let _ = unsafe { active.deactivate() };
        }
    }
}
