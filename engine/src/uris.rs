//! LV2 URIs the runtime negotiates or maps.

pub const LV2_CORE__INPUT_PORT: &str = "http://lv2plug.in/ns/lv2core#InputPort";
pub const LV2_CORE__OUTPUT_PORT: &str = "http://lv2plug.in/ns/lv2core#OutputPort";
pub const LV2_CORE__AUDIO_PORT: &str = "http://lv2plug.in/ns/lv2core#AudioPort";
pub const LV2_CORE__CONTROL_PORT: &str = "http://lv2plug.in/ns/lv2core#ControlPort";
pub const LV2_CORE__CV_PORT: &str = "http://lv2plug.in/ns/lv2core#CVPort";
pub const LV2_CORE__ENUMERATION: &str = "http://lv2plug.in/ns/lv2core#enumeration";
pub const LV2_CORE__CONNECTION_OPTIONAL: &str = "http://lv2plug.in/ns/lv2core#connectionOptional";
pub const LV2_CORE__IS_LIVE: &str = "http://lv2plug.in/ns/lv2core#isLive";
pub const LV2_CORE__IN_PLACE_BROKEN: &str = "http://lv2plug.in/ns/lv2core#inPlaceBroken";
pub const LV2_CORE__HARD_RT_CAPABLE: &str = "http://lv2plug.in/ns/lv2core#hardRTCapable";

pub const LV2_ATOM__ATOM_PORT: &str = "http://lv2plug.in/ns/ext/atom#AtomPort";
pub const LV2_ATOM__SEQUENCE: &str = "http://lv2plug.in/ns/ext/atom#Sequence";
pub const LV2_ATOM__CHUNK: &str = "http://lv2plug.in/ns/ext/atom#Chunk";
pub const LV2_ATOM__INT: &str = "http://lv2plug.in/ns/ext/atom#Int";
pub const LV2_ATOM__FLOAT: &str = "http://lv2plug.in/ns/ext/atom#Float";
pub const LV2_ATOM__EVENT_TRANSFER: &str = "http://lv2plug.in/ns/ext/atom#eventTransfer";
pub const LV2_EVENT__EVENT_PORT: &str = "http://lv2plug.in/ns/ext/event#EventPort";
pub const LV2_MIDI__MIDI_EVENT: &str = "http://lv2plug.in/ns/ext/midi#MidiEvent";
pub const LV2_UNITS__FRAME: &str = "http://lv2plug.in/ns/ext/units#frame";
pub const LV2_ATOM__FRAME_TIME: &str = "http://lv2plug.in/ns/ext/atom#frameTime";

pub const LV2_URID__MAP: &str = "http://lv2plug.in/ns/ext/urid#map";
pub const LV2_URID__MAP_TYPO_COMPAT: &str = "http://lv2plug.in/ns//ext/urid#map";
pub const LV2_URID__UNMAP: &str = "http://lv2plug.in/ns/ext/urid#unmap";

pub const LV2_OPTIONS__OPTIONS: &str = "http://lv2plug.in/ns/ext/options#options";
pub const LV2_PARAMETERS__SAMPLE_RATE: &str = "http://lv2plug.in/ns/ext/parameters#sampleRate";
pub const LV2_BUF_SIZE__BOUNDED_BLOCK_LENGTH: &str =
    "http://lv2plug.in/ns/ext/buf-size#boundedBlockLength";
pub const LV2_BUF_SIZE__MIN_BLOCK_LENGTH: &str = "http://lv2plug.in/ns/ext/buf-size#minBlockLength";
pub const LV2_BUF_SIZE__MAX_BLOCK_LENGTH: &str = "http://lv2plug.in/ns/ext/buf-size#maxBlockLength";
pub const LV2_BUF_SIZE__NOMINAL_BLOCK_LENGTH: &str =
    "http://lv2plug.in/ns/ext/buf-size#nominalBlockLength";

pub const LV2_WORKER__SCHEDULE: &str = "http://lv2plug.in/ns/ext/worker#schedule";
pub const LV2_WORKER__INTERFACE: &str = "http://lv2plug.in/ns/ext/worker#interface";

pub const LV2_STATE__INTERFACE: &str = "http://lv2plug.in/ns/ext/state#interface";

pub const LV2_INSTANCE_ACCESS: &str = "http://lv2plug.in/ns/ext/instance-access";
pub const LV2_DATA_ACCESS: &str = "http://lv2plug.in/ns/ext/data-access";

pub const LV2_UI__X11_UI: &str = "http://lv2plug.in/ns/extensions/ui#X11UI";
pub const LV2_UI__GTK3_UI: &str = "http://lv2plug.in/ns/extensions/ui#Gtk3UI";
pub const LV2_UI__PARENT: &str = "http://lv2plug.in/ns/extensions/ui#parent";
pub const LV2_UI__RESIZE: &str = "http://lv2plug.in/ns/extensions/ui#resize";
pub const LV2_UI__IDLE_INTERFACE: &str = "http://lv2plug.in/ns/extensions/ui#idleInterface";
pub const LV2_UI__SHOW_INTERFACE: &str = "http://lv2plug.in/ns/extensions/ui#showInterface";

/// Host features that carry no data and only need to be acknowledged.
pub const FLAG_FEATURES: &[&str] = &[
    LV2_BUF_SIZE__BOUNDED_BLOCK_LENGTH,
    LV2_CORE__IS_LIVE,
    LV2_CORE__IN_PLACE_BROKEN,
    LV2_CORE__HARD_RT_CAPABLE,
    "http://lv2plug.in/ns/ext/buf-size#fixedBlockLength",
    "http://lv2plug.in/ns/ext/buf-size#powerOf2BlockLength",
];
