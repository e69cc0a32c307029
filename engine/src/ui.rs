//! Controller binding: mounts a plugin UI next to an instance.

use std::{
    cell::RefCell,
    ffi::{CStr, c_char, c_void},
    sync::{Arc, Weak},
};

use tracing::{debug, info, warn};

use crate::bridge::WeakPortWriter;
use crate::error::{HostError, Result};
use crate::features::FeatureSet;
use crate::instance::ControlValues;
use crate::metadata::{PluginDescriptor, UiDescriptor};
use crate::plugin::ExtensionDataFn;
use crate::port::{INVALID_PORT_INDEX, PortType};
use crate::uris::{
    LV2_DATA_ACCESS, LV2_INSTANCE_ACCESS, LV2_UI__IDLE_INTERFACE, LV2_UI__PARENT, LV2_UI__RESIZE,
    LV2_UI__SHOW_INTERFACE, LV2_URID__MAP, LV2_URID__MAP_TYPO_COMPAT, LV2_URID__UNMAP,
};
use crate::world::World;

pub type PortWriteFn =
    extern "C" fn(controller: *mut c_void, port: u32, size: u32, protocol: u32, buffer: *const c_void);
pub type PortIndexFn = extern "C" fn(controller: *mut c_void, symbol: *const c_char) -> u32;

#[repr(C)]
pub struct LV2UiResize {
    pub handle: *mut c_void,
    pub ui_resize: Option<extern "C" fn(*mut c_void, i32, i32) -> i32>,
}

#[repr(C)]
pub struct LV2UiIdleInterface {
    pub idle: Option<extern "C" fn(*mut c_void) -> i32>,
}

#[repr(C)]
pub struct LV2UiShowInterface {
    pub show: Option<extern "C" fn(*mut c_void) -> i32>,
    pub hide: Option<extern "C" fn(*mut c_void) -> i32>,
}

#[repr(C)]
pub struct LV2ExtensionDataFeature {
    pub data_access: Option<ExtensionDataFn>,
}

/// Everything a UI loader needs to create one UI.
pub struct UiRequest<'a> {
    pub container_type_uri: &'a str,
    pub plugin_uri: &'a str,
    pub ui: &'a UiDescriptor,
    /// Opaque pointer to pass back into `write_port` and `port_index`.
    pub controller: *mut c_void,
    pub write_port: PortWriteFn,
    pub port_index: PortIndexFn,
    pub features: &'a FeatureSet,
}

/// Creates native UI instances (suil, or an in-process toolkit).
pub trait UiLoader: Send + Sync {
    /// 0 when `ui_type_uri` cannot be shown inside `container_type_uri`.
    fn ui_supported(&self, container_type_uri: &str, ui_type_uri: &str) -> u32;

    fn instantiate(&self, request: UiRequest<'_>) -> Option<Box<dyn NativeUi>>;
}

/// One loaded UI. Dropping it frees the native resources.
pub trait NativeUi {
    fn handle(&self) -> *mut c_void;

    fn widget(&self) -> *mut c_void;

    fn port_event(&mut self, port: u32, size: u32, protocol: u32, buffer: *const c_void);

    /// Returns null when the UI lacks the extension.
    fn extension_data(&self, uri: &str) -> *const c_void;
}

/// Target of the fixed controller callbacks. Holds only weak references so
/// a UI that outlives its instance writes into nothing.
pub struct UiController {
    writer: WeakPortWriter,
    descriptor: Weak<PluginDescriptor>,
}

impl UiController {
    pub fn new(writer: WeakPortWriter, descriptor: Weak<PluginDescriptor>) -> Self {
        Self { writer, descriptor }
    }

    pub fn write(&self, port: u32, protocol: u32, payload: &[u8]) -> bool {
        self.writer
            .upgrade()
            .is_some_and(|writer| writer.write(port, protocol, payload))
    }

    pub fn port_index(&self, symbol: &str) -> u32 {
        self.descriptor
            .upgrade()
            .and_then(|descriptor| descriptor.ports.index_of(symbol))
            .unwrap_or(INVALID_PORT_INDEX)
    }
}

pub extern "C" fn controller_port_write(
    controller: *mut c_void,
    port: u32,
    size: u32,
    protocol: u32,
    buffer: *const c_void,
) {
    if controller.is_null() || (size > 0 && buffer.is_null()) {
        return;
    }
    let controller = unsafe { &*(controller as *const UiController) };
    let payload = if size == 0 {
        &[][..]
    } else {
        unsafe { std::slice::from_raw_parts(buffer.cast::<u8>(), size as usize) }
    };
    controller.write(port, protocol, payload);
}

pub extern "C" fn controller_port_index(controller: *mut c_void, symbol: *const c_char) -> u32 {
    if controller.is_null() || symbol.is_null() {
        return INVALID_PORT_INDEX;
    }
    let controller = unsafe { &*(controller as *const UiController) };
    let Some(symbol) = unsafe { CStr::from_ptr(symbol) }.to_str().ok() else {
        return INVALID_PORT_INDEX;
    };
    controller.port_index(symbol)
}

type ResizeHandler = Box<dyn FnMut(i32, i32) -> bool>;

#[derive(Default)]
struct HostResize {
    handler: Option<ResizeHandler>,
    requested: Option<(i32, i32)>,
}

extern "C" fn host_ui_resize(handle: *mut c_void, width: i32, height: i32) -> i32 {
    if handle.is_null() || width <= 0 || height <= 0 {
        return 1;
    }
    let resize = unsafe { &*(handle as *const RefCell<HostResize>) };
    let Ok(mut resize) = resize.try_borrow_mut() else {
        return 1;
    };
    resize.requested = Some((width, height));
    match resize.handler.as_mut() {
        Some(handler) => {
            if handler(width, height) {
                0
            } else {
                1
            }
        }
        None => 0,
    }
}

struct LoadedUi {
    native: Box<dyn NativeUi>,
    _features: FeatureSet,
    _data_access: Box<LV2ExtensionDataFeature>,
    client_resize: *const LV2UiResize,
    idle: *const LV2UiIdleInterface,
    show: *const LV2UiShowInterface,
}

/// Parts of the owning instance a binding needs when it loads.
pub(crate) struct BindingContext {
    pub world: Arc<World>,
    pub descriptor: Arc<PluginDescriptor>,
    pub writer: WeakPortWriter,
    pub controls: Weak<ControlValues>,
    pub instance_handle: *mut c_void,
    pub data_access: Option<ExtensionDataFn>,
}

/// At most one per instance. Starts unloaded; every operation on an
/// unloaded binding is a no-op.
pub struct ControllerBinding {
    loader: Arc<dyn UiLoader>,
    ui: UiDescriptor,
    container_type_uri: String,
    context: BindingContext,
    controller: Box<UiController>,
    host_resize: Box<RefCell<HostResize>>,
    resize_feature: Box<LV2UiResize>,
    loaded: Option<LoadedUi>,
}

impl ControllerBinding {
    pub(crate) fn new(loader: Arc<dyn UiLoader>, ui: UiDescriptor, context: BindingContext) -> Self {
        let controller = Box::new(UiController::new(
            context.writer.clone(),
            Arc::downgrade(&context.descriptor),
        ));
        let host_resize = Box::new(RefCell::new(HostResize::default()));
        let resize_feature = Box::new(LV2UiResize {
            handle: (&*host_resize as *const RefCell<HostResize>)
                .cast_mut()
                .cast::<c_void>(),
            ui_resize: Some(host_ui_resize),
        });
        Self {
            loader,
            container_type_uri: context.world.config().ui_container_type.clone(),
            ui,
            context,
            controller,
            host_resize,
            resize_feature,
            loaded: None,
        }
    }

    pub fn ui(&self) -> &UiDescriptor {
        &self.ui
    }

    pub fn container_type_uri(&self) -> &str {
        &self.container_type_uri
    }

    pub fn loaded(&self) -> bool {
        self.loaded.is_some()
    }

    fn features(&self, parent: *mut c_void, data_access: &LV2ExtensionDataFeature) -> Result<FeatureSet> {
        let urids = self.context.world.urids();
        let mut builder = FeatureSet::builder();
        if !parent.is_null() {
            builder.push(LV2_UI__PARENT, parent)?;
        }
        builder.push(
            LV2_UI__RESIZE,
            (&*self.resize_feature as *const LV2UiResize)
                .cast_mut()
                .cast::<c_void>(),
        )?;
        if !self.context.instance_handle.is_null() {
            builder.push(LV2_INSTANCE_ACCESS, self.context.instance_handle)?;
        }
        if data_access.data_access.is_some() {
            builder.push(
                LV2_DATA_ACCESS,
                (data_access as *const LV2ExtensionDataFeature)
                    .cast_mut()
                    .cast::<c_void>(),
            )?;
        }
        builder.push(LV2_URID__MAP, urids.map_data())?;
        builder.push(LV2_URID__MAP_TYPO_COMPAT, urids.map_data())?;
        builder.push(LV2_URID__UNMAP, urids.unmap_data())?;
        Ok(builder.build())
    }

    /// Negotiates features and asks the loader for the UI. `parent` is the
    /// host widget to embed into, or null for a top-level UI.
    pub fn instantiate(&mut self, parent: *mut c_void) -> Result<()> {
        if self.loaded() {
            return Ok(());
        }
        let data_access = Box::new(LV2ExtensionDataFeature {
            data_access: self.context.data_access,
        });
        let features = self.features(parent, &data_access)?;
        let controller = (&*self.controller as *const UiController)
            .cast_mut()
            .cast::<c_void>();
        let request = UiRequest {
            container_type_uri: &self.container_type_uri,
            plugin_uri: &self.context.descriptor.uri,
            ui: &self.ui,
            controller,
            write_port: controller_port_write,
            port_index: controller_port_index,
            features: &features,
        };
        let Some(native) = self.loader.instantiate(request) else {
            warn!("Failed to instantiate UI {} for {}", self.ui.uri, self.context.descriptor.uri);
            return Err(HostError::BindingUnavailable(format!(
                "UI loader refused {}",
                self.ui.uri
            )));
        };

        let client_resize = native.extension_data(LV2_UI__RESIZE).cast::<LV2UiResize>();
        let idle = native
            .extension_data(LV2_UI__IDLE_INTERFACE)
            .cast::<LV2UiIdleInterface>();
        let show = native
            .extension_data(LV2_UI__SHOW_INTERFACE)
            .cast::<LV2UiShowInterface>();
        debug!(
            "UI {} extensions: resize={} idle={} show={}",
            self.ui.uri,
            !client_resize.is_null(),
            !idle.is_null(),
            !show.is_null()
        );
        self.loaded = Some(LoadedUi {
            native,
            _features: features,
            _data_access: data_access,
            client_resize,
            idle,
            show,
        });
        info!("Loaded UI {} for {}", self.ui.uri, self.context.descriptor.uri);
        self.push_control_values();
        Ok(())
    }

    fn push_control_values(&mut self) {
        let Some(controls) = self.context.controls.upgrade() else {
            return;
        };
        let descriptor = self.context.descriptor.clone();
        for port in descriptor.ports.iter() {
            if port.port_type != PortType::Control {
                continue;
            }
            let Some(value) = controls.get(port.index) else {
                continue;
            };
            self.port_event(port.index, crate::bridge::FLOAT_PROTOCOL, &value.to_ne_bytes());
        }
    }

    /// Idempotent; also runs on drop.
    pub fn unload(&mut self) {
        if let Some(loaded) = self.loaded.take() {
            if let Some(show) = unsafe { loaded.show.as_ref() }
                && let Some(hide) = show.hide
            {
                let _ = hide(loaded.native.handle());
            }
            drop(loaded);
            info!("Unloaded UI {}", self.ui.uri);
        }
    }

    pub fn widget(&self) -> *mut c_void {
        self.loaded
            .as_ref()
            .map_or(std::ptr::null_mut(), |ui| ui.native.widget())
    }

    pub fn handle(&self) -> *mut c_void {
        self.loaded
            .as_ref()
            .map_or(std::ptr::null_mut(), |ui| ui.native.handle())
    }

    fn client_resize(&self) -> Option<(&LV2UiResize, extern "C" fn(*mut c_void, i32, i32) -> i32)> {
        let resize = unsafe { self.loaded.as_ref()?.client_resize.as_ref()? };
        Some((resize, resize.ui_resize?))
    }

    fn idle_interface(&self) -> Option<extern "C" fn(*mut c_void) -> i32> {
        unsafe { self.loaded.as_ref()?.idle.as_ref()?.idle }
    }

    fn show_interface(&self) -> Option<&LV2UiShowInterface> {
        unsafe { self.loaded.as_ref()?.show.as_ref() }
    }

    pub fn have_client_resize(&self) -> bool {
        self.client_resize().is_some()
    }

    pub fn have_show_interface(&self) -> bool {
        self.show_interface()
            .is_some_and(|show| show.show.is_some() && show.hide.is_some())
    }

    pub fn have_idle_interface(&self) -> bool {
        self.idle_interface().is_some()
    }

    /// Asks a UI that supports client resizing to take the given size.
    pub fn request_size(&self, width: i32, height: i32) -> bool {
        let Some((resize, ui_resize)) = self.client_resize() else {
            return false;
        };
        ui_resize(resize.handle, width, height) == 0
    }

    pub fn show(&self) -> bool {
        let Some(show) = self.show_interface().and_then(|iface| iface.show) else {
            return false;
        };
        show(self.handle()) == 0
    }

    pub fn hide(&self) -> bool {
        let Some(hide) = self.show_interface().and_then(|iface| iface.hide) else {
            return false;
        };
        hide(self.handle()) == 0
    }

    /// False when the UI lacks the idle interface or asked to be closed.
    pub fn idle(&self) -> bool {
        let Some(idle) = self.idle_interface() else {
            return false;
        };
        idle(self.handle()) == 0
    }

    pub fn port_event(&mut self, port: u32, protocol: u32, payload: &[u8]) {
        if let Some(loaded) = self.loaded.as_mut() {
            loaded.native.port_event(
                port,
                payload.len() as u32,
                protocol,
                payload.as_ptr().cast::<c_void>(),
            );
        }
    }

    /// Called when the UI asks the host to resize its container; return
    /// false to refuse.
    pub fn set_resize_handler(&mut self, handler: impl FnMut(i32, i32) -> bool + 'static) {
        self.host_resize.borrow_mut().handler = Some(Box::new(handler));
    }

    pub fn requested_size(&self) -> Option<(i32, i32)> {
        self.host_resize.borrow().requested
    }
}

impl Drop for ControllerBinding {
    fn drop(&mut self) {
        self.unload();
    }
}
