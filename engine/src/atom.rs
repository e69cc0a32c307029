use lv2_raw::{
    LV2Atom, LV2AtomEvent, LV2AtomSequence, LV2AtomSequenceBody, LV2Urid,
    lv2_atom_sequence_append_event, lv2_atom_sequence_begin, lv2_atom_sequence_is_end,
    lv2_atom_sequence_next,
};

pub const ATOM_HEADER_BYTES: usize = std::mem::size_of::<LV2Atom>();
pub const EVENT_PREFIX_BYTES: usize = std::mem::size_of::<LV2AtomEvent>();

/// URIDs every atom sequence operation needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceUrids {
    pub sequence: LV2Urid,
    pub chunk: LV2Urid,
    pub frame_time: LV2Urid,
}

/// 64-bit aligned byte buffer holding one atom sequence.
pub struct AtomBuffer {
    words: Vec<u64>,
}

impl AtomBuffer {
    pub fn new(len_bytes: usize) -> Self {
        let words = len_bytes.div_ceil(std::mem::size_of::<u64>()).max(2);
        Self {
            words: vec![0; words],
        }
    }

    fn len(&self) -> usize {
        self.words.len() * std::mem::size_of::<u64>()
    }

    pub fn ptr_mut(&mut self) -> *mut u8 {
        self.words.as_mut_ptr().cast::<u8>()
    }

    fn sequence_mut(&mut self) -> *mut LV2AtomSequence {
        self.ptr_mut().cast::<LV2AtomSequence>()
    }

    fn body_capacity(&self) -> u32 {
        self.len().saturating_sub(ATOM_HEADER_BYTES) as u32
    }

    /// Empty input sequence: only the body header counts toward its size.
    pub fn clear_sequence(&mut self, urids: SequenceUrids) {
        let seq = self.sequence_mut();
        unsafe {
            (*seq).atom.mytype = urids.sequence;
            (*seq).atom.size = std::mem::size_of::<LV2AtomSequenceBody>() as u32;
            (*seq).body.unit = urids.frame_time;
            (*seq).body.pad = 0;
        }
    }

    /// Output sequence ready for the plugin: a chunk announcing the whole capacity.
    pub fn prepare_output(&mut self, urids: SequenceUrids) {
        let capacity = self.body_capacity();
        let seq = self.sequence_mut();
        unsafe {
            (*seq).atom.mytype = urids.chunk;
            (*seq).atom.size = capacity;
            (*seq).body.unit = urids.frame_time;
            (*seq).body.pad = 0;
        }
    }

    pub fn atom_type(&self) -> LV2Urid {
        let seq = self.words.as_ptr().cast::<LV2AtomSequence>();
        unsafe { (*seq).atom.mytype }
    }

    /// Appends a complete atom (header followed by body) at `frames`.
    ///
    /// `scratch` is a preallocated staging buffer so this stays allocation free.
    /// Returns false when either buffer lacks room.
    pub fn append_atom(&mut self, frames: i64, atom: &[u8], scratch: &mut AtomBuffer) -> bool {
        if atom.len() < ATOM_HEADER_BYTES {
            return false;
        }
        let header = atom.as_ptr().cast::<LV2Atom>();
        let (size, mytype) = unsafe {
            let header = header.read_unaligned();
            (header.size, header.mytype)
        };
        let body_len = size as usize;
        if ATOM_HEADER_BYTES + body_len > atom.len() {
            return false;
        }
        self.append_event(frames, mytype, &atom[ATOM_HEADER_BYTES..ATOM_HEADER_BYTES + body_len], scratch)
    }

    pub fn append_event(
        &mut self,
        frames: i64,
        mytype: LV2Urid,
        body: &[u8],
        scratch: &mut AtomBuffer,
    ) -> bool {
        let total = EVENT_PREFIX_BYTES + body.len();
        if total > scratch.len() || body.len() > u32::MAX as usize {
            return false;
        }
        let capacity = self.body_capacity();
        let seq = self.sequence_mut();
        unsafe {
            if (*seq).atom.size > capacity || capacity - (*seq).atom.size < total as u32 {
                return false;
            }
            let raw_event = scratch.ptr_mut().cast::<LV2AtomEvent>();
            (*raw_event).time_in_frames = frames;
            (*raw_event).body.mytype = mytype;
            (*raw_event).body.size = body.len() as u32;
            let data_ptr = (raw_event as *mut u8).add(EVENT_PREFIX_BYTES);
            std::ptr::copy_nonoverlapping(body.as_ptr(), data_ptr, body.len());
            !lv2_atom_sequence_append_event(seq, capacity, raw_event).is_null()
        }
    }

    /// Visits every event of a sequence the plugin wrote.
    ///
    /// `f` receives the frame offset and the complete atom (header and body).
    /// Buffers still holding the host's chunk marker, or events that would
    /// run past the buffer, end the walk.
    pub fn for_each_event(&self, sequence_urid: LV2Urid, mut f: impl FnMut(i64, &[u8])) -> usize {
        if self.atom_type() != sequence_urid {
            return 0;
        }
        let base = self.words.as_ptr().cast::<u8>();
        let end = self.len();
        let mut visited = 0;
        unsafe {
            let seq = base.cast::<LV2AtomSequence>();
            let size = (*seq).atom.size;
            if ATOM_HEADER_BYTES + size as usize > end {
                return 0;
            }
            let body = &(*seq).body as *const LV2AtomSequenceBody;
            let mut it = lv2_atom_sequence_begin(body);
            while !lv2_atom_sequence_is_end(body, size, it) {
                let offset = (it as *const u8).offset_from(base) as usize;
                let event = &*it;
                let atom_len = ATOM_HEADER_BYTES + event.body.size as usize;
                let atom_offset = offset + std::mem::size_of::<i64>();
                if atom_offset + atom_len > end {
                    break;
                }
                if event.body.mytype != 0 {
                    let atom = std::slice::from_raw_parts(base.add(atom_offset), atom_len);
                    f(event.time_in_frames, atom);
                    visited += 1;
                }
                it = lv2_atom_sequence_next(it);
            }
        }
        visited
    }
}
