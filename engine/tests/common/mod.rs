#![allow(dead_code)]

use std::{
    ffi::{CString, c_void},
    sync::Arc,
};

use lv2_raw::{
    LV2AtomEvent, LV2AtomSequence, LV2AtomSequenceBody, LV2Feature, LV2UridMap,
    lv2_atom_sequence_append_event, lv2_atom_sequence_begin, lv2_atom_sequence_is_end,
    lv2_atom_sequence_next,
};
use lv2host_engine::features::FeatureSet;
use lv2host_engine::port::{PortDescriptor, PortFlow, PortRange};
use lv2host_engine::state::{
    LV2_STATE_IS_POD, LV2_STATE_STATUS_ERR_NO_PROPERTY, LV2_STATE_STATUS_SUCCESS, Lv2StateInterface,
    Lv2StateRetrieveFn, Lv2StateStoreFn,
};
use lv2host_engine::ui::{
    LV2UiIdleInterface, LV2UiResize, LV2UiShowInterface, NativeUi, PortIndexFn, PortWriteFn,
    UiLoader, UiRequest,
};
use lv2host_engine::uris::{
    LV2_ATOM__INT, LV2_ATOM__SEQUENCE, LV2_STATE__INTERFACE, LV2_UI__IDLE_INTERFACE,
    LV2_UI__RESIZE, LV2_UI__SHOW_INTERFACE, LV2_UI__X11_UI, LV2_URID__MAP, LV2_WORKER__INTERFACE,
    LV2_WORKER__SCHEDULE,
};
use lv2host_engine::worker::{
    LV2_WORKER_SUCCESS, Lv2WorkerInterface, Lv2WorkerRespondFunc, Lv2WorkerSchedule,
};
use lv2host_engine::{
    Instance, NativeInstance, PluginDescriptor, PluginProvider, UiDescriptor, World,
};
use parking_lot::Mutex;

pub const NOTIFIER_URI: &str = "urn:lv2host:test#notifier";
pub const NOTIFIER_UI_URI: &str = "urn:lv2host:test#notifier-ui";
pub const COUNTER_URI: &str = "urn:lv2host:test#counter";

pub const IN: u32 = 0;
pub const OUT: u32 = 1;
pub const GAIN: u32 = 2;
pub const MODE: u32 = 3;
pub const LEVEL: u32 = 4;
pub const CONTROL: u32 = 5;
pub const NOTIFY: u32 = 6;

/// Audio gain plus an atom echo: every event on `control` is copied to
/// `notify` and scheduled as worker job. `level` reports the number of
/// worker responses seen so far, which is also the saved state.
pub struct Notifier {
    descriptor: Arc<PluginDescriptor>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::with_descriptor(|descriptor| descriptor)
    }

    pub fn with_descriptor(edit: impl FnOnce(PluginDescriptor) -> PluginDescriptor) -> Self {
        let ports = vec![
            PortDescriptor::audio(IN, PortFlow::Input, "in"),
            PortDescriptor::audio(OUT, PortFlow::Output, "out"),
            PortDescriptor::control(GAIN, PortFlow::Input, "gain", PortRange::new(0.0, 4.0, 1.0))
                .with_name("Gain"),
            PortDescriptor::control(MODE, PortFlow::Input, "mode", PortRange::new(0.0, 1.0, 0.0))
                .with_name("Mode")
                .enumerated()
                .with_scale_point("Pass", 0.0)
                .with_scale_point("Invert", 1.0),
            PortDescriptor::control(LEVEL, PortFlow::Output, "level", PortRange::new(0.0, 1e6, 0.0)),
            PortDescriptor::atom(CONTROL, PortFlow::Input, "control").midi(),
            PortDescriptor::atom(NOTIFY, PortFlow::Output, "notify"),
        ];
        let descriptor = PluginDescriptor::new(NOTIFIER_URI, "Notifier", ports)
            .unwrap()
            .with_class("Utility")
            .with_required_feature(LV2_URID__MAP)
            .with_required_feature(LV2_WORKER__SCHEDULE)
            .with_ui(UiDescriptor {
                uri: NOTIFIER_UI_URI.to_string(),
                type_uri: LV2_UI__X11_UI.to_string(),
                bundle_path: "/nonexistent/notifier.lv2".into(),
                binary_path: "/nonexistent/notifier.lv2/ui.so".into(),
            });
        Self {
            descriptor: Arc::new(edit(descriptor)),
        }
    }
}

impl PluginProvider for Notifier {
    fn descriptor(&self) -> Arc<PluginDescriptor> {
        self.descriptor.clone()
    }

    fn instantiate(
        &self,
        _sample_rate: f64,
        features: &FeatureSet,
    ) -> Option<Box<dyn NativeInstance>> {
        let map = features.data(LV2_URID__MAP)?.cast::<LV2UridMap>();
        let schedule = features.data(LV2_WORKER__SCHEDULE)?.cast::<Lv2WorkerSchedule>();
        let map_uri = |uri: &str| {
            let uri = CString::new(uri).unwrap();
            unsafe { ((*map).map)((*map).handle, uri.as_ptr()) }
        };
        Some(Box::new(NotifierInstance {
            ports: [std::ptr::null_mut(); 7],
            schedule,
            sequence_urid: map_uri(LV2_ATOM__SEQUENCE),
            int_urid: map_uri(LV2_ATOM__INT),
            counter_urid: map_uri(COUNTER_URI),
            responses: 0,
            active: false,
        }))
    }
}

struct NotifierInstance {
    ports: [*mut c_void; 7],
    schedule: *const Lv2WorkerSchedule,
    sequence_urid: u32,
    int_urid: u32,
    counter_urid: u32,
    responses: i32,
    active: bool,
}

unsafe impl Send for NotifierInstance {}

static WORKER: Lv2WorkerInterface = Lv2WorkerInterface {
    work: Some(notifier_work),
    work_response: Some(notifier_work_response),
    end_run: None,
};

static STATE: Lv2StateInterface = Lv2StateInterface {
    save: Some(notifier_save),
    restore: Some(notifier_restore),
};

impl NotifierInstance {
    fn control(&self, port: u32) -> f32 {
        let ptr = self.ports[port as usize].cast::<f32>();
        if ptr.is_null() { 0.0 } else { unsafe { *ptr } }
    }

    unsafe fn echo_events(&mut self) {
        let input = self.ports[CONTROL as usize].cast::<LV2AtomSequence>();
        let output = self.ports[NOTIFY as usize].cast::<LV2AtomSequence>();
        if input.is_null() || output.is_null() {
            return;
        }
        unsafe {
            let capacity = (*output).atom.size;
            (*output).atom.mytype = self.sequence_urid;
            (*output).atom.size = std::mem::size_of::<LV2AtomSequenceBody>() as u32;

            let body = &(*input).body as *const LV2AtomSequenceBody;
            let size = (*input).atom.size;
            let mut it = lv2_atom_sequence_begin(body);
            while !lv2_atom_sequence_is_end(body, size, it) {
                let event = &*it;
                let data = (it as *const u8).add(std::mem::size_of::<LV2AtomEvent>());
                lv2_atom_sequence_append_event(output, capacity, it);
                if !self.schedule.is_null()
                    && let Some(schedule_work) = (*self.schedule).schedule_work
                {
                    schedule_work((*self.schedule).handle, event.body.size, data.cast());
                }
                it = lv2_atom_sequence_next(it);
            }
        }
    }
}

impl NativeInstance for NotifierInstance {
    fn handle(&self) -> *mut c_void {
        (self as *const Self).cast_mut().cast()
    }

    unsafe fn connect_port(&mut self, port: u32, data: *mut c_void) {
        if let Some(slot) = self.ports.get_mut(port as usize) {
            *slot = data;
        }
    }

    fn activate(&mut self) {
        self.active = true;
    }

    fn deactivate(&mut self) {
        self.active = false;
    }

    unsafe fn run(&mut self, frames: u32) {
        let gain = self.control(GAIN);
        let sign = if self.control(MODE) >= 0.5 { -1.0 } else { 1.0 };
        let input = self.ports[IN as usize].cast::<f32>();
        let output = self.ports[OUT as usize].cast::<f32>();
        if !input.is_null() && !output.is_null() {
            for i in 0..frames as usize {
                unsafe { *output.add(i) = *input.add(i) * gain * sign };
            }
        }
        unsafe { self.echo_events() };
        let level = self.ports[LEVEL as usize].cast::<f32>();
        if !level.is_null() {
            unsafe { *level = self.responses as f32 };
        }
    }

    fn extension_data(&self, uri: &str) -> *const c_void {
        match uri {
            LV2_WORKER__INTERFACE => (&WORKER as *const Lv2WorkerInterface).cast(),
            LV2_STATE__INTERFACE => (&STATE as *const Lv2StateInterface).cast(),
            _ => std::ptr::null(),
        }
    }
}

unsafe extern "C" fn notifier_work(
    _handle: *mut c_void,
    respond: Lv2WorkerRespondFunc,
    respond_handle: *mut c_void,
    size: u32,
    data: *const c_void,
) -> u32 {
    if let Some(respond) = respond {
        unsafe { respond(respond_handle, size, data) };
    }
    LV2_WORKER_SUCCESS
}

unsafe extern "C" fn notifier_work_response(
    handle: *mut c_void,
    _size: u32,
    _data: *const c_void,
) -> u32 {
    let plugin = unsafe { &mut *handle.cast::<NotifierInstance>() };
    plugin.responses += 1;
    LV2_WORKER_SUCCESS
}

unsafe extern "C" fn notifier_save(
    instance: *mut c_void,
    store: Lv2StateStoreFn,
    handle: *mut c_void,
    _flags: u32,
    _features: *const *const LV2Feature,
) -> u32 {
    let plugin = unsafe { &*instance.cast::<NotifierInstance>() };
    let Some(store) = store else {
        return LV2_STATE_STATUS_ERR_NO_PROPERTY;
    };
    unsafe {
        store(
            handle,
            plugin.counter_urid,
            (&plugin.responses as *const i32).cast(),
            std::mem::size_of::<i32>(),
            plugin.int_urid,
            LV2_STATE_IS_POD,
        )
    }
}

unsafe extern "C" fn notifier_restore(
    instance: *mut c_void,
    retrieve: Lv2StateRetrieveFn,
    handle: *mut c_void,
    _flags: u32,
    _features: *const *const LV2Feature,
) -> u32 {
    let plugin = unsafe { &mut *instance.cast::<NotifierInstance>() };
    let Some(retrieve) = retrieve else {
        return LV2_STATE_STATUS_ERR_NO_PROPERTY;
    };
    let (mut size, mut type_, mut flags) = (0, 0, 0);
    let value = unsafe { retrieve(handle, plugin.counter_urid, &mut size, &mut type_, &mut flags) };
    if value.is_null() || size != std::mem::size_of::<i32>() || type_ != plugin.int_urid {
        return LV2_STATE_STATUS_ERR_NO_PROPERTY;
    }
    plugin.responses = unsafe { value.cast::<i32>().read_unaligned() };
    LV2_STATE_STATUS_SUCCESS
}

pub fn notifier_instance(world: World) -> Instance {
    Instance::new(Arc::new(world), Arc::new(Notifier::new()))
}

/// Serialized `atom:Int` as carried by `eventTransfer`.
pub fn int_atom(world: &World, value: i32) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&4_u32.to_ne_bytes());
    bytes.extend_from_slice(&world.map(LV2_ATOM__INT).to_ne_bytes());
    bytes.extend_from_slice(&value.to_ne_bytes());
    bytes
}

/// What a [`MockUi`] observed, shared with the test body.
#[derive(Default)]
pub struct UiRecord {
    pub events: Vec<(u32, u32, Vec<u8>)>,
    pub feature_uris: Vec<String>,
    pub controller: usize,
    pub write_port: Option<PortWriteFn>,
    pub port_index: Option<PortIndexFn>,
    pub idle_calls: usize,
    pub shown: usize,
    pub hidden: usize,
    pub client_size: Option<(i32, i32)>,
    pub host_resize: usize,
    pub dropped: bool,
}

impl UiRecord {
    /// Simulates the UI writing through the host's controller callback.
    pub fn write_float(&self, port: u32, value: f32) {
        let write = self.write_port.unwrap();
        write(
            self.controller as *mut c_void,
            port,
            4,
            0,
            (&value as *const f32).cast(),
        );
    }

    pub fn index_of(&self, symbol: &str) -> u32 {
        let symbol = CString::new(symbol).unwrap();
        (self.port_index.unwrap())(self.controller as *mut c_void, symbol.as_ptr())
    }

    /// Asks the host to resize the container, as a UI would.
    pub fn request_host_resize(&self, width: i32, height: i32) -> i32 {
        let resize = unsafe { &*(self.host_resize as *const LV2UiResize) };
        (resize.ui_resize.unwrap())(resize.handle, width, height)
    }

    pub fn floats(&self, port: u32) -> Vec<f32> {
        self.events
            .iter()
            .filter(|(p, protocol, payload)| *p == port && *protocol == 0 && payload.len() == 4)
            .map(|(_, _, payload)| f32::from_ne_bytes([payload[0], payload[1], payload[2], payload[3]]))
            .collect()
    }
}

#[derive(Clone, Copy, Default)]
pub struct UiExtensions {
    pub resize: bool,
    pub idle: bool,
    pub show: bool,
}

pub struct MockLoader {
    pub record: Arc<Mutex<UiRecord>>,
    pub extensions: UiExtensions,
    pub supported: bool,
    pub refuse: bool,
}

impl MockLoader {
    pub fn new(extensions: UiExtensions) -> Self {
        Self {
            record: Arc::new(Mutex::new(UiRecord::default())),
            extensions,
            supported: true,
            refuse: false,
        }
    }
}

impl UiLoader for MockLoader {
    fn ui_supported(&self, _container_type_uri: &str, ui_type_uri: &str) -> u32 {
        u32::from(self.supported && ui_type_uri == LV2_UI__X11_UI)
    }

    fn instantiate(&self, request: UiRequest<'_>) -> Option<Box<dyn NativeUi>> {
        if self.refuse {
            return None;
        }
        {
            let mut record = self.record.lock();
            record.feature_uris = request.features.uris().map(str::to_string).collect();
            record.controller = request.controller as usize;
            record.write_port = Some(request.write_port);
            record.port_index = Some(request.port_index);
            record.host_resize = request
                .features
                .data(LV2_UI__RESIZE)
                .map_or(0, |ptr| ptr as usize);
            record.dropped = false;
        }
        let handle = Arc::as_ptr(&self.record).cast_mut().cast::<c_void>();
        Some(Box::new(MockUi {
            record: self.record.clone(),
            extensions: self.extensions,
            resize: Box::new(LV2UiResize {
                handle,
                ui_resize: Some(mock_client_resize),
            }),
        }))
    }
}

pub struct MockUi {
    record: Arc<Mutex<UiRecord>>,
    extensions: UiExtensions,
    resize: Box<LV2UiResize>,
}

static MOCK_IDLE: LV2UiIdleInterface = LV2UiIdleInterface {
    idle: Some(mock_idle),
};

static MOCK_SHOW: LV2UiShowInterface = LV2UiShowInterface {
    show: Some(mock_show),
    hide: Some(mock_hide),
};

fn record_of(handle: *mut c_void) -> &'static Mutex<UiRecord> {
    unsafe { &*handle.cast::<Mutex<UiRecord>>() }
}

extern "C" fn mock_idle(handle: *mut c_void) -> i32 {
    record_of(handle).lock().idle_calls += 1;
    0
}

extern "C" fn mock_show(handle: *mut c_void) -> i32 {
    record_of(handle).lock().shown += 1;
    0
}

extern "C" fn mock_hide(handle: *mut c_void) -> i32 {
    record_of(handle).lock().hidden += 1;
    0
}

extern "C" fn mock_client_resize(handle: *mut c_void, width: i32, height: i32) -> i32 {
    record_of(handle).lock().client_size = Some((width, height));
    0
}

impl NativeUi for MockUi {
    fn handle(&self) -> *mut c_void {
        Arc::as_ptr(&self.record).cast_mut().cast()
    }

    fn widget(&self) -> *mut c_void {
        self.handle()
    }

    fn port_event(&mut self, port: u32, size: u32, protocol: u32, buffer: *const c_void) {
        let payload = unsafe { std::slice::from_raw_parts(buffer.cast::<u8>(), size as usize) };
        self.record.lock().events.push((port, protocol, payload.to_vec()));
    }

    fn extension_data(&self, uri: &str) -> *const c_void {
        match uri {
            LV2_UI__IDLE_INTERFACE if self.extensions.idle => {
                (&MOCK_IDLE as *const LV2UiIdleInterface).cast()
            }
            LV2_UI__SHOW_INTERFACE if self.extensions.show => {
                (&MOCK_SHOW as *const LV2UiShowInterface).cast()
            }
            LV2_UI__RESIZE if self.extensions.resize => {
                (&*self.resize as *const LV2UiResize).cast()
            }
            _ => std::ptr::null(),
        }
    }
}

impl Drop for MockUi {
    fn drop(&mut self) {
        self.record.lock().dropped = true;
    }
}
