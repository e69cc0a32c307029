//! UI loading through libsuil.

use std::ffi::{CString, c_char, c_void};

use lv2_raw::LV2Feature;
use tracing::warn;

use crate::ui::{NativeUi, PortIndexFn, PortWriteFn, UiLoader, UiRequest};

#[repr(C)]
struct SuilHost {
    _private: [u8; 0],
}

#[repr(C)]
struct SuilInstance {
    _private: [u8; 0],
}

type SuilController = *mut c_void;
type SuilSubscribeFn = extern "C" fn(SuilController, u32, u32, *const *const LV2Feature) -> u32;

#[link(name = "suil-0")]
unsafe extern "C" {
    fn suil_host_new(
        write_func: Option<PortWriteFn>,
        index_func: Option<PortIndexFn>,
        subscribe_func: Option<SuilSubscribeFn>,
        unsubscribe_func: Option<SuilSubscribeFn>,
    ) -> *mut SuilHost;
    fn suil_host_free(host: *mut SuilHost);
    fn suil_ui_supported(host_type_uri: *const c_char, ui_type_uri: *const c_char) -> u32;
    fn suil_instance_new(
        host: *mut SuilHost,
        controller: SuilController,
        container_type_uri: *const c_char,
        plugin_uri: *const c_char,
        ui_uri: *const c_char,
        ui_type_uri: *const c_char,
        ui_bundle_path: *const c_char,
        ui_binary_path: *const c_char,
        features: *const *const LV2Feature,
    ) -> *mut SuilInstance;
    fn suil_instance_free(instance: *mut SuilInstance);
    fn suil_instance_get_widget(instance: *mut SuilInstance) -> *mut c_void;
    fn suil_instance_get_handle(instance: *mut SuilInstance) -> *mut c_void;
    fn suil_instance_extension_data(
        instance: *mut SuilInstance,
        uri: *const c_char,
    ) -> *const c_void;
    fn suil_instance_port_event(
        instance: *mut SuilInstance,
        port_index: u32,
        buffer_size: u32,
        protocol: u32,
        buffer: *const c_void,
    );
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SuilLoader;

impl UiLoader for SuilLoader {
    fn ui_supported(&self, container_type_uri: &str, ui_type_uri: &str) -> u32 {
        let (Ok(container), Ok(ui_type)) = (CString::new(container_type_uri), CString::new(ui_type_uri))
        else {
            return 0;
        };
        unsafe { suil_ui_supported(container.as_ptr(), ui_type.as_ptr()) }
    }

    fn instantiate(&self, request: UiRequest<'_>) -> Option<Box<dyn NativeUi>> {
        let bundle_path = request.ui.bundle_path.to_str()?;
        let binary_path = request.ui.binary_path.to_str()?;
        let strings = [
            request.container_type_uri,
            request.plugin_uri,
            &request.ui.uri,
            &request.ui.type_uri,
            bundle_path,
            binary_path,
        ]
        .map(CString::new);
        let [
            Ok(container),
            Ok(plugin),
            Ok(ui_uri),
            Ok(ui_type),
            Ok(bundle),
            Ok(binary),
        ] = strings
        else {
            warn!("UI paths for {} contain NUL bytes", request.ui.uri);
            return None;
        };

        let host = unsafe {
            suil_host_new(Some(request.write_port), Some(request.port_index), None, None)
        };
        if host.is_null() {
            warn!("Failed to create suil host");
            return None;
        }
        let instance = unsafe {
            suil_instance_new(
                host,
                request.controller,
                container.as_ptr(),
                plugin.as_ptr(),
                ui_uri.as_ptr(),
                ui_type.as_ptr(),
                bundle.as_ptr(),
                binary.as_ptr(),
                request.features.as_ptr(),
            )
        };
        if instance.is_null() {
            unsafe { suil_host_free(host) };
            warn!("suil failed to instantiate {}", request.ui.uri);
            return None;
        }
        Some(Box::new(SuilUi { host, instance }))
    }
}

struct SuilUi {
    host: *mut SuilHost,
    instance: *mut SuilInstance,
}

impl NativeUi for SuilUi {
    fn handle(&self) -> *mut c_void {
        unsafe { suil_instance_get_handle(self.instance) }
    }

    fn widget(&self) -> *mut c_void {
        unsafe { suil_instance_get_widget(self.instance) }
    }

    fn port_event(&mut self, port: u32, size: u32, protocol: u32, buffer: *const c_void) {
        unsafe { suil_instance_port_event(self.instance, port, size, protocol, buffer) }
    }

    fn extension_data(&self, uri: &str) -> *const c_void {
        let Ok(uri) = CString::new(uri) else {
            return std::ptr::null();
        };
        unsafe { suil_instance_extension_data(self.instance, uri.as_ptr()) }
    }
}

impl Drop for SuilUi {
    fn drop(&mut self) {
        unsafe {
            suil_instance_free(self.instance);
            suil_host_free(self.host);
        }
    }
}
