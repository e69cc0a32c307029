//! Instance lifecycle, port buffers and the audio-thread run cycle.

use std::{
    ffi::c_void,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

use lv2_raw::LV2Urid;
use tracing::{debug, info, warn};

use crate::atom::{AtomBuffer, EVENT_PREFIX_BYTES, SequenceUrids};
use crate::bridge::{
    BridgeStats, EventReader, EventWriter, PortEvent, PortWriter, Protocol, bridge_capacity,
    event_bridge,
};
use crate::error::{HostError, Result};
use crate::features::FeatureSet;
use crate::metadata::{Parameter, PluginDescriptor};
use crate::mutex::UnsafeMutex;
use crate::plugin::{NativeInstance, PluginProvider};
use crate::port::{ChannelConfig, PortDescriptor, PortFlow, PortType};
use crate::state::{Lv2StateInterface, StateBlob, restore_properties, save_properties};
use crate::ui::{BindingContext, ControllerBinding};
use crate::uris::{
    LV2_ATOM__CHUNK, LV2_ATOM__EVENT_TRANSFER, LV2_ATOM__FRAME_TIME, LV2_ATOM__SEQUENCE,
    LV2_MIDI__MIDI_EVENT, LV2_STATE__INTERFACE, LV2_WORKER__INTERFACE,
};
use crate::worker::{Lv2WorkerInterface, Worker};
use crate::world::World;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unloaded,
    Instantiated,
    Activated,
    Deactivated,
}

/// Scalar storage for every port, indexed by port index. Only control
/// ports are ever read or written; the plugin accesses the same cells
/// through the pointers handed to `connect_port`.
pub struct ControlValues {
    cells: Box<[AtomicU32]>,
}

impl ControlValues {
    fn new(descriptor: &PluginDescriptor) -> Self {
        Self {
            cells: descriptor
                .ports
                .iter()
                .map(|port| AtomicU32::new(port.default_value().to_bits()))
                .collect(),
        }
    }

    pub fn get(&self, index: u32) -> Option<f32> {
        self.cells
            .get(index as usize)
            .map(|cell| f32::from_bits(cell.load(Ordering::Relaxed)))
    }

    pub fn set(&self, index: u32, value: f32) -> bool {
        let Some(cell) = self.cells.get(index as usize) else {
            return false;
        };
        cell.store(value.to_bits(), Ordering::Relaxed);
        true
    }

    fn ptr(&self, index: u32) -> *mut c_void {
        self.cells[index as usize].as_ptr().cast::<c_void>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortLink {
    /// Instance-owned buffer (silent scratch, atom sequence or control cell).
    Internal,
    External(*mut c_void),
    /// Optional port connected to null.
    Disabled,
}

struct PortSlot {
    port_type: PortType,
    flow: PortFlow,
    optional: bool,
    link: PortLink,
}

#[derive(Clone, Copy)]
struct RunUrids {
    sequence: SequenceUrids,
    event_transfer: LV2Urid,
    midi_event: LV2Urid,
}

/// Audio-thread half of an instance. Field order is drop order: the native
/// plugin goes before the features and worker it may still point into.
struct Processor {
    native: Box<dyn NativeInstance>,
    features: FeatureSet,
    worker: Worker,
    worker_interface: *const Lv2WorkerInterface,
    state_interface: *const Lv2StateInterface,
    descriptor: Arc<PluginDescriptor>,
    slots: Vec<PortSlot>,
    controls: Arc<ControlValues>,
    reported: Vec<u32>,
    audio: Vec<Vec<f32>>,
    atoms: Vec<AtomBuffer>,
    atom_scratch: AtomBuffer,
    inbound: EventReader,
    outbound: EventWriter,
    urids: RunUrids,
    max_block: u32,
    active: bool,
}

unsafe impl Send for Processor {}

impl Processor {
    fn new(
        world: &World,
        provider: &dyn PluginProvider,
        descriptor: Arc<PluginDescriptor>,
        controls: Arc<ControlValues>,
        sample_rate: f64,
    ) -> Result<(Self, EventWriter, EventReader)> {
        let config = world.config();
        let capacity = bridge_capacity(descriptor.ports.len(), &config.bridge);
        let ceiling = config.bridge.payload_ceiling;
        let worker = Worker::new(capacity, ceiling);
        let features = world.instance_features(&descriptor, sample_rate, &worker)?;
        let native = provider
            .instantiate(sample_rate, &features)
            .ok_or_else(|| HostError::InstantiationFailed {
                uri: descriptor.uri.clone(),
                reason: "native plugin returned no handle".to_string(),
            })?;

        let (inbound_writer, inbound) = event_bridge(capacity, ceiling);
        let (outbound, outbound_reader) = event_bridge(capacity, ceiling);
        let max_block = config.block.max_block_length.max(1);
        let urids = RunUrids {
            sequence: SequenceUrids {
                sequence: world.map(LV2_ATOM__SEQUENCE),
                chunk: world.map(LV2_ATOM__CHUNK),
                frame_time: world.map(LV2_ATOM__FRAME_TIME),
            },
            event_transfer: world.map(LV2_ATOM__EVENT_TRANSFER),
            midi_event: world.map(LV2_MIDI__MIDI_EVENT),
        };

        let ports = &descriptor.ports;
        let slots = ports
            .iter()
            .map(|port| PortSlot {
                port_type: port.port_type,
                flow: port.flow,
                optional: port.optional,
                link: PortLink::Internal,
            })
            .collect();
        let audio = ports
            .iter()
            .map(|port| {
                if port.port_type.is_signal() {
                    vec![0.0; max_block as usize]
                } else {
                    vec![]
                }
            })
            .collect();
        let atoms = ports
            .iter()
            .map(|port| {
                if port.port_type == PortType::Atom {
                    AtomBuffer::new(config.atom_buffer_bytes)
                } else {
                    AtomBuffer::new(0)
                }
            })
            .collect();
        let reported = ports
            .iter()
            .map(|port| controls.get(port.index).unwrap_or_default().to_bits())
            .collect();
        let worker_interface = native
            .extension_data(LV2_WORKER__INTERFACE)
            .cast::<Lv2WorkerInterface>();
        let state_interface = native
            .extension_data(LV2_STATE__INTERFACE)
            .cast::<Lv2StateInterface>();

        let mut processor = Self {
            native,
            features,
            worker,
            worker_interface,
            state_interface,
            descriptor,
            slots,
            controls,
            reported,
            audio,
            atoms,
            atom_scratch: AtomBuffer::new(EVENT_PREFIX_BYTES + ceiling.max(config.atom_buffer_bytes)),
            inbound,
            outbound,
            urids,
            max_block,
            active: false,
        };
        processor.reset_atom_inputs();
        for index in 0..processor.slots.len() as u32 {
            processor.connect_slot(index);
        }
        Ok((processor, inbound_writer, outbound_reader))
    }

    fn buffer_ptr(&mut self, index: u32) -> *mut c_void {
        let slot = &self.slots[index as usize];
        match (slot.link, slot.port_type) {
            (PortLink::External(data), _) => data,
            (PortLink::Disabled, _) => std::ptr::null_mut(),
            (PortLink::Internal, PortType::Control) => self.controls.ptr(index),
            (PortLink::Internal, PortType::Atom) => self.atoms[index as usize].ptr_mut().cast(),
            (PortLink::Internal, PortType::Audio | PortType::Cv) => {
                self.audio[index as usize].as_mut_ptr().cast()
            }
            (PortLink::Internal, PortType::Unknown) => std::ptr::null_mut(),
        }
    }

    fn connect_slot(&mut self, index: u32) {
        let data = self.buffer_ptr(index);
        unsafe {
            self.native.connect_port(index, data);
        }
    }

    fn connect_port(&mut self, index: u32, data: *mut c_void) -> bool {
        let Some(slot) = self.slots.get_mut(index as usize) else {
            return false;
        };
        if slot.port_type == PortType::Control {
            return false;
        }
        slot.link = match (data.is_null(), slot.optional) {
            (false, _) => PortLink::External(data),
            (true, true) => PortLink::Disabled,
            (true, false) => PortLink::Internal,
        };
        self.connect_slot(index);
        true
    }

    fn reset_atom_inputs(&mut self) {
        let urids = self.urids.sequence;
        for (slot, atom) in self.slots.iter().zip(self.atoms.iter_mut()) {
            if slot.port_type == PortType::Atom
                && slot.flow == PortFlow::Input
                && slot.link == PortLink::Internal
            {
                atom.clear_sequence(urids);
            }
        }
    }

    fn queue_midi(&mut self, frames: u32, data: &[u8]) -> bool {
        let Some(port) = self.descriptor.ports.midi_port() else {
            return false;
        };
        if self.slots[port as usize].link != PortLink::Internal {
            return false;
        }
        let midi = self.urids.midi_event;
        self.atoms[port as usize].append_event(i64::from(frames), midi, data, &mut self.atom_scratch)
    }

    /// Applies pending inbound events. Float writes land in control inputs
    /// and are echoed outward; atoms are appended to atom inputs.
    fn apply_inbound(&mut self) {
        let Self {
            inbound,
            outbound,
            controls,
            slots,
            atoms,
            atom_scratch,
            urids,
            ..
        } = self;
        inbound.drain(|event: PortEvent<'_>| {
            let Some(slot) = slots.get(event.port as usize) else {
                return;
            };
            if slot.flow != PortFlow::Input {
                return;
            }
            match (event.protocol_kind(urids.event_transfer), slot.port_type) {
                (Protocol::Float, PortType::Control) => {
                    if let Some(value) = event.as_float() {
                        controls.set(event.port, value);
                        outbound.write_float(event.port, value);
                    }
                }
                (Protocol::EventTransfer, PortType::Atom) if slot.link == PortLink::Internal => {
                    atoms[event.port as usize].append_atom(0, event.payload, atom_scratch);
                }
                _ => {}
            }
        });
    }

    fn prepare_outputs(&mut self) {
        let urids = self.urids.sequence;
        for (slot, atom) in self.slots.iter().zip(self.atoms.iter_mut()) {
            if slot.port_type == PortType::Atom
                && slot.flow == PortFlow::Output
                && slot.link == PortLink::Internal
            {
                atom.prepare_output(urids);
            }
        }
    }

    fn push_notifications(&mut self) {
        let Self {
            slots,
            controls,
            reported,
            atoms,
            outbound,
            urids,
            ..
        } = self;
        for (index, slot) in slots.iter().enumerate() {
            if slot.flow != PortFlow::Output || slot.link != PortLink::Internal {
                continue;
            }
            let port = index as u32;
            match slot.port_type {
                PortType::Control => {
                    let Some(value) = controls.get(port) else {
                        continue;
                    };
                    if value.to_bits() != reported[index] && outbound.write_float(port, value) {
                        reported[index] = value.to_bits();
                    }
                }
                PortType::Atom => {
                    let event_transfer = urids.event_transfer;
                    atoms[index].for_each_event(urids.sequence.sequence, |_, atom| {
                        outbound.write(port, event_transfer, atom);
                    });
                }
                _ => {}
            }
        }
    }

    fn run(&mut self, frames: u32) {
        if !self.active {
            return;
        }
        let frames = frames.min(self.max_block);
        self.apply_inbound();
        self.prepare_outputs();
        unsafe {
            self.native.run(frames);
            let interface = self.worker_interface.as_ref();
            self.worker.run_cycle(self.native.handle(), interface);
        }
        self.push_notifications();
        self.reset_atom_inputs();
    }

    fn process(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: u32) {
        let descriptor = self.descriptor.clone();
        let channels = descriptor.ports.channels();
        let mut frames = frames;
        for (channel, input) in inputs.iter().enumerate() {
            if let Some(port) = channels.port_for_channel(PortType::Audio, channel, PortFlow::Input) {
                frames = frames.min(input.len() as u32);
                self.connect_port(port, input.as_ptr().cast_mut().cast());
            }
        }
        for (channel, output) in outputs.iter_mut().enumerate() {
            if let Some(port) = channels.port_for_channel(PortType::Audio, channel, PortFlow::Output) {
                frames = frames.min(output.len() as u32);
                self.connect_port(port, output.as_mut_ptr().cast());
            }
        }
        self.run(frames);
        // Caller buffers are only borrowed for this cycle.
        let borrowed = (0..inputs.len())
            .filter_map(|channel| channels.port_for_channel(PortType::Audio, channel, PortFlow::Input))
            .chain((0..outputs.len()).filter_map(|channel| {
                channels.port_for_channel(PortType::Audio, channel, PortFlow::Output)
            }));
        for port in borrowed {
            self.slots[port as usize].link = PortLink::Internal;
            self.connect_slot(port);
        }
    }

    fn activate(&mut self) {
        self.reset_atom_inputs();
        self.native.activate();
        self.active = true;
    }

    fn deactivate(&mut self) {
        self.native.deactivate();
        self.active = false;
    }
}

type SharedProcessor = Arc<UnsafeMutex<Option<Processor>>>;

/// Audio-thread handle on an instance.
///
/// The instance hands these out freely; the host guarantees that lifecycle
/// calls on the [`Instance`] never overlap with calls made through a handle.
#[derive(Clone)]
pub struct RunHandle {
    processor: SharedProcessor,
}

impl RunHandle {
    /// No-op unless the instance is activated. `frames` is clamped to the
    /// maximum block length.
    pub fn run(&self, frames: u32) {
        if let Some(processor) = self.processor.lock().as_mut() {
            processor.run(frames);
        }
    }

    /// Connects a caller buffer. A null pointer reverts the port to its
    /// instance-owned buffer, or disables it when the port is optional.
    /// Returns false for unknown ports and control ports.
    ///
    /// # Safety
    /// `data` must stay valid for every subsequent `run` until replaced.
    pub unsafe fn connect_port(&self, index: u32, data: *mut c_void) -> bool {
        self.processor
            .lock()
            .as_mut()
            .is_some_and(|processor| processor.connect_port(index, data))
    }

    /// Runs one cycle on borrowed per-channel audio buffers.
    pub fn process(&self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: u32) {
        if let Some(processor) = self.processor.lock().as_mut() {
            processor.process(inputs, outputs, frames);
        }
    }

    /// Queues a MIDI message into the designated MIDI input for the next run.
    pub fn queue_midi(&self, frames: u32, data: &[u8]) -> bool {
        self.processor
            .lock()
            .as_mut()
            .is_some_and(|processor| processor.queue_midi(frames, data))
    }
}

type NotifyCallback = Box<dyn FnMut(&PortEvent<'_>)>;

/// Message-thread side of a plugin instance.
pub struct Instance {
    editor: Option<ControllerBinding>,
    world: Arc<World>,
    provider: Arc<dyn PluginProvider>,
    descriptor: Arc<PluginDescriptor>,
    state: LifecycleState,
    sample_rate: f64,
    processor: SharedProcessor,
    controls: Arc<ControlValues>,
    inbound: PortWriter,
    outbound: Option<EventReader>,
    bridge_stats: Vec<Arc<BridgeStats>>,
    /// Drops counted by bridges of earlier native instances.
    retired_drops: u64,
    notify: Option<NotifyCallback>,
    event_transfer: LV2Urid,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("uri", &self.descriptor.uri)
            .field("state", &self.state)
            .field("sample_rate", &self.sample_rate)
            .field("editor", &self.editor.is_some())
            .finish()
    }
}

impl Instance {
    pub fn new(world: Arc<World>, provider: Arc<dyn PluginProvider>) -> Self {
        let descriptor = provider.descriptor();
        let controls = Arc::new(ControlValues::new(&descriptor));
        let event_transfer = world.map(LV2_ATOM__EVENT_TRANSFER);
        Self {
            editor: None,
            inbound: PortWriter::new(descriptor.ports.len()),
            world,
            provider,
            descriptor,
            state: LifecycleState::Unloaded,
            sample_rate: 0.0,
            processor: Arc::new(UnsafeMutex::new(None)),
            controls,
            outbound: None,
            bridge_stats: vec![],
            retired_drops: 0,
            notify: None,
            event_transfer,
        }
    }

    pub fn descriptor(&self) -> &Arc<PluginDescriptor> {
        &self.descriptor
    }

    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn is_loaded(&self) -> bool {
        self.state != LifecycleState::Unloaded
    }

    pub fn instantiate(&mut self, sample_rate: f64) -> Result<()> {
        if self.is_loaded() {
            return Err(HostError::InvalidState("instance is already instantiated"));
        }
        self.check_rate(sample_rate)?;
        let (processor, inbound_writer, outbound_reader) = Processor::new(
            &self.world,
            self.provider.as_ref(),
            self.descriptor.clone(),
            self.controls.clone(),
            sample_rate,
        )?;
        self.retired_drops += self.bridge_stats.drain(..).map(|stats| stats.dropped()).sum::<u64>();
        self.bridge_stats.push(inbound_writer.stats());
        self.bridge_stats.push(processor.outbound.stats());
        self.inbound.attach(Some(inbound_writer));
        self.outbound = Some(outbound_reader);
        *self.processor.lock() = Some(processor);
        self.sample_rate = sample_rate;
        self.state = LifecycleState::Instantiated;
        info!("Instantiated {} at {sample_rate} Hz", self.descriptor.uri);
        Ok(())
    }

    pub fn activate(&mut self) {
        if !matches!(
            self.state,
            LifecycleState::Instantiated | LifecycleState::Deactivated
        ) {
            return;
        }
        if let Some(processor) = self.processor.lock().as_mut() {
            processor.activate();
            self.state = LifecycleState::Activated;
            info!("Activated {}", self.descriptor.uri);
        }
    }

    pub fn deactivate(&mut self) {
        if self.state != LifecycleState::Activated {
            return;
        }
        if let Some(processor) = self.processor.lock().as_mut() {
            processor.deactivate();
        }
        self.state = LifecycleState::Deactivated;
        info!("Deactivated {}", self.descriptor.uri);
    }

    fn check_rate(&self, sample_rate: f64) -> Result<()> {
        if sample_rate.is_finite() && sample_rate > 0.0 {
            return Ok(());
        }
        Err(HostError::InstantiationFailed {
            uri: self.descriptor.uri.clone(),
            reason: format!("invalid sample rate {sample_rate}"),
        })
    }

    fn unload(&mut self) {
        self.clear_editor();
        self.deactivate();
        *self.processor.lock() = None;
        self.inbound.attach(None);
        self.outbound = None;
        self.state = LifecycleState::Unloaded;
    }

    /// Re-creates the native plugin at a new rate, keeping control input
    /// values and the activation state. The audio thread must be paused.
    /// An invalid rate is refused before the running plugin is touched.
    pub fn set_sample_rate(&mut self, sample_rate: f64) -> Result<()> {
        if sample_rate == self.sample_rate {
            return Ok(());
        }
        self.check_rate(sample_rate)?;
        if !self.is_loaded() {
            self.sample_rate = sample_rate;
            return Ok(());
        }
        let was_active = self.state == LifecycleState::Activated;
        debug!(
            "Re-instantiating {} for rate change {} -> {sample_rate}",
            self.descriptor.uri, self.sample_rate
        );
        self.unload();
        self.instantiate(sample_rate)?;
        if was_active {
            self.activate();
        }
        Ok(())
    }

    pub fn run_handle(&self) -> RunHandle {
        RunHandle {
            processor: self.processor.clone(),
        }
    }

    /// Runs one cycle from the calling thread.
    pub fn run(&self, frames: u32) {
        self.run_handle().run(frames);
    }

    /// # Safety
    /// See [`RunHandle::connect_port`].
    pub unsafe fn connect_port(&self, index: u32, data: *mut c_void) -> bool {
        unsafe { self.run_handle().connect_port(index, data) }
    }

    /// Connects the buffer for the `channel`th port of the given type and flow.
    ///
    /// # Safety
    /// See [`RunHandle::connect_port`].
    pub unsafe fn connect_channel(
        &self,
        port_type: PortType,
        flow: PortFlow,
        channel: usize,
        data: *mut c_void,
    ) -> bool {
        let Some(port) = self
            .descriptor
            .ports
            .channels()
            .port_for_channel(port_type, channel, flow)
        else {
            return false;
        };
        unsafe { self.connect_port(port, data) }
    }

    pub fn process(&self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: u32) {
        self.run_handle().process(inputs, outputs, frames);
    }

    pub fn queue_midi(&self, frames: u32, data: &[u8]) -> bool {
        self.run_handle().queue_midi(frames, data)
    }

    pub fn port_count(&self) -> u32 {
        self.descriptor.ports.len()
    }

    pub fn port_count_of(&self, port_type: PortType, flow: PortFlow) -> u32 {
        self.descriptor.ports.count(port_type, flow)
    }

    pub fn channel_config(&self) -> &ChannelConfig {
        self.descriptor.ports.channels()
    }

    pub fn port_descriptor(&self, index: u32) -> Result<&PortDescriptor> {
        self.descriptor.ports.get(index)
    }

    pub fn port_index(&self, symbol: &str) -> Option<u32> {
        self.descriptor.ports.index_of(symbol)
    }

    pub fn require_index(&self, symbol: &str) -> Result<u32> {
        self.descriptor.ports.require_index(symbol)
    }

    pub fn midi_port(&self) -> Option<u32> {
        self.descriptor.ports.midi_port()
    }

    pub fn notify_port(&self) -> Option<u32> {
        self.descriptor.ports.notify_port()
    }

    pub fn control_value(&self, index: u32) -> Result<f32> {
        let port = self.descriptor.ports.get(index)?;
        if port.port_type != PortType::Control {
            return Err(HostError::InvalidState("not a control port"));
        }
        Ok(self.controls.get(index).unwrap_or_default())
    }

    pub fn parameter(&self, index: u32) -> Result<Option<Parameter>> {
        let port = self.descriptor.ports.get(index)?;
        Ok(Parameter::from_port(port, self.control_value(index)?))
    }

    pub fn map(&self, uri: &str) -> LV2Urid {
        self.world.map(uri)
    }

    pub fn handle(&self) -> *mut c_void {
        self.processor
            .lock()
            .as_ref()
            .map_or(std::ptr::null_mut(), |p| p.native.handle())
    }

    pub fn extension_data(&self, uri: &str) -> *const c_void {
        self.processor
            .lock()
            .as_ref()
            .map_or(std::ptr::null(), |p| p.native.extension_data(uri))
    }

    /// Enqueues a write for the next run. Never blocks; returns false when
    /// the event was dropped.
    pub fn write(&self, port: u32, protocol: u32, payload: &[u8]) -> bool {
        self.inbound.write(port, protocol, payload)
    }

    pub fn write_control(&self, symbol: &str, value: f32) -> Result<bool> {
        let port = self.require_index(symbol)?;
        Ok(self.inbound.write_float(port, value))
    }

    /// Cloneable inbound writer for other message-thread producers.
    pub fn port_writer(&self) -> PortWriter {
        self.inbound.clone()
    }

    /// Events dropped by full or undersized rings since the instance was created.
    pub fn dropped_events(&self) -> u64 {
        self.retired_drops + self.bridge_stats.iter().map(|stats| stats.dropped()).sum::<u64>()
    }

    pub fn set_port_notify(&mut self, callback: impl FnMut(&PortEvent<'_>) + 'static) {
        self.notify = Some(Box::new(callback));
    }

    pub fn clear_port_notify(&mut self) {
        self.notify = None;
    }

    pub fn event_transfer_urid(&self) -> LV2Urid {
        self.event_transfer
    }

    /// Drains notifications produced by the audio thread into the notify
    /// callback and the editor. Returns the number of events delivered.
    pub fn send_port_events(&mut self) -> usize {
        let Some(reader) = self.outbound.as_mut() else {
            return 0;
        };
        let notify = &mut self.notify;
        let editor = &mut self.editor;
        let delivered = reader.drain(|event| {
            if let Some(callback) = notify.as_mut() {
                callback(&event);
            }
            if let Some(editor) = editor.as_mut() {
                editor.port_event(event.port, event.protocol, event.payload);
            }
        });
        if delivered > 0 {
            debug!("Delivered {delivered} port events for {}", self.descriptor.uri);
        }
        delivered
    }

    pub fn get_state_string(&self) -> Result<String> {
        if !self.is_loaded() {
            return Err(HostError::InvalidState("instance is not instantiated"));
        }
        let mut blob = StateBlob::new(&self.descriptor.uri);
        for port in self.descriptor.ports.iter() {
            if port.port_type == PortType::Control && port.is_input() {
                blob.ports
                    .insert(port.symbol.clone(), self.controls.get(port.index).unwrap_or_default());
            }
        }
        if let Some(processor) = self.processor.lock().as_ref()
            && let Some(interface) = unsafe { processor.state_interface.as_ref() }
        {
            blob.properties = unsafe {
                save_properties(
                    interface,
                    processor.native.handle(),
                    self.world.urids(),
                    processor.features.as_ptr(),
                )
            }?;
        }
        blob.to_json()
    }

    pub fn set_state_string(&mut self, text: &str) -> Result<()> {
        if !self.is_loaded() {
            return Err(HostError::InvalidState("instance is not instantiated"));
        }
        let blob = StateBlob::from_json(text)?;
        if blob.plugin != self.descriptor.uri {
            return Err(HostError::State(format!(
                "state belongs to '{}', not '{}'",
                blob.plugin, self.descriptor.uri
            )));
        }
        for (symbol, value) in &blob.ports {
            let Some(port) = self.descriptor.ports.index_of(symbol) else {
                warn!("Ignoring state value for unknown port '{symbol}'");
                continue;
            };
            let is_control_input = self
                .descriptor
                .ports
                .get(port)
                .is_ok_and(|p| p.port_type == PortType::Control && p.is_input());
            if !is_control_input {
                continue;
            }
            self.controls.set(port, *value);
            if let Some(editor) = self.editor.as_mut() {
                editor.port_event(port, crate::bridge::FLOAT_PROTOCOL, &value.to_ne_bytes());
            }
        }
        if let Some(processor) = self.processor.lock().as_ref()
            && let Some(interface) = unsafe { processor.state_interface.as_ref() }
        {
            unsafe {
                restore_properties(
                    interface,
                    processor.native.handle(),
                    self.world.urids(),
                    processor.features.as_ptr(),
                    &blob.properties,
                )
            }?;
        }
        info!("Restored state of {}", self.descriptor.uri);
        Ok(())
    }

    /// Creates the (still unloaded) editor for the best available UI.
    pub fn create_editor(&mut self) -> Result<&mut ControllerBinding> {
        if !self.is_loaded() {
            return Err(HostError::BindingUnavailable(
                "plugin is not instantiated".to_string(),
            ));
        }
        if self.editor.is_none() {
            let loader = self
                .world
                .ui_loader()
                .cloned()
                .ok_or_else(|| HostError::BindingUnavailable("no UI loader".to_string()))?;
            let ui = self.world.best_ui(&self.descriptor).cloned().ok_or_else(|| {
                HostError::BindingUnavailable(format!("no supported UI for {}", self.descriptor.uri))
            })?;
            let (instance_handle, data_access) = self
                .processor
                .lock()
                .as_ref()
                .map_or((std::ptr::null_mut(), None), |p| {
                    (p.native.handle(), p.native.data_access())
                });
            let context = BindingContext {
                world: self.world.clone(),
                descriptor: self.descriptor.clone(),
                writer: self.inbound.downgrade(),
                controls: Arc::downgrade(&self.controls),
                instance_handle,
                data_access,
            };
            self.editor = Some(ControllerBinding::new(loader, ui, context));
        }
        self.editor
            .as_mut()
            .ok_or_else(|| HostError::BindingUnavailable("editor missing".to_string()))
    }

    pub fn editor(&self) -> Option<&ControllerBinding> {
        self.editor.as_ref()
    }

    pub fn editor_mut(&mut self) -> Option<&mut ControllerBinding> {
        self.editor.as_mut()
    }

    pub fn clear_editor(&mut self) {
        self.editor = None;
    }

    /// Runs the editor's idle hook when it has one.
    pub fn idle_editor(&self) -> bool {
        self.editor
            .as_ref()
            .is_some_and(|editor| editor.have_idle_interface() && editor.idle())
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        self.clear_editor();
        if self.state == LifecycleState::Activated {
            warn!("Dropping active instance {}; deactivating", self.descriptor.uri);
            self.deactivate();
        }
        *self.processor.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{AMP_URI, Amp};
    use std::{cell::RefCell, rc::Rc};

    fn amp() -> Instance {
        Instance::new(Arc::new(World::default()), Arc::new(Amp::new().unwrap()))
    }

    #[test]
    fn lifecycle_transitions() {
        let mut instance = amp();
        assert_eq!(instance.state(), LifecycleState::Unloaded);
        instance.activate();
        assert_eq!(instance.state(), LifecycleState::Unloaded);

        instance.instantiate(48_000.0).unwrap();
        assert!(matches!(
            instance.instantiate(48_000.0),
            Err(HostError::InvalidState(_))
        ));
        instance.deactivate();
        assert_eq!(instance.state(), LifecycleState::Instantiated);
        instance.activate();
        instance.activate();
        assert_eq!(instance.state(), LifecycleState::Activated);
        instance.deactivate();
        assert_eq!(instance.state(), LifecycleState::Deactivated);
        instance.activate();
        assert_eq!(instance.state(), LifecycleState::Activated);
    }

    #[test]
    fn invalid_rate_leaves_instance_unloaded() {
        let mut instance = amp();
        assert!(matches!(
            instance.instantiate(0.0),
            Err(HostError::InstantiationFailed { .. })
        ));
        assert_eq!(instance.state(), LifecycleState::Unloaded);
        assert!(!instance.write(0, 0, &[]));
    }

    #[test]
    fn gain_applies_through_the_inbound_ring() {
        let mut instance = amp();
        instance.instantiate(44_100.0).unwrap();
        instance.activate();
        let gain = instance.port_index("gain").unwrap();
        assert!(instance.write_control("gain", 2.0).unwrap());
        assert_eq!(instance.control_value(gain).unwrap(), 1.0);

        let input = vec![0.5_f32; 64];
        let mut left = vec![0.0_f32; 64];
        let mut right = vec![0.0_f32; 64];
        instance.process(&[&input, &input], &mut [&mut left, &mut right], 64);
        assert_eq!(instance.control_value(gain).unwrap(), 2.0);
        assert!(left.iter().chain(right.iter()).all(|s| *s == 1.0));

        let echoed = Rc::new(RefCell::new(vec![]));
        let sink = echoed.clone();
        instance.set_port_notify(move |event| sink.borrow_mut().push((event.port, event.as_float())));
        assert_eq!(instance.send_port_events(), 1);
        assert_eq!(*echoed.borrow(), vec![(gain, Some(2.0))]);
        assert_eq!(instance.send_port_events(), 0);
        assert_eq!(instance.descriptor().uri, AMP_URI);
    }

    #[test]
    fn dropped_count_survives_reinstantiation_without_growing() {
        let mut instance = amp();
        instance.instantiate(48_000.0).unwrap();
        let refused = (0..1_000)
            .filter(|n| !instance.write_control("gain", *n as f32 / 1_000.0).unwrap())
            .count() as u64;
        assert!(refused > 0);
        assert_eq!(instance.dropped_events(), refused);

        for rate in [44_100.0, 96_000.0, 48_000.0] {
            instance.set_sample_rate(rate).unwrap();
            assert_eq!(instance.bridge_stats.len(), 2);
            assert_eq!(instance.dropped_events(), refused);
        }
        assert!(instance.write_control("gain", 1.5).unwrap());
    }

    #[test]
    fn control_ports_refuse_external_buffers() {
        let mut instance = amp();
        instance.instantiate(44_100.0).unwrap();
        let mut value = 0.0_f32;
        let gain = instance.port_index("gain").unwrap();
        assert!(!unsafe { instance.connect_port(gain, (&mut value as *mut f32).cast()) });
        assert!(!unsafe { instance.connect_port(99, std::ptr::null_mut()) });
        assert!(unsafe { instance.connect_port(0, std::ptr::null_mut()) });
    }
}
