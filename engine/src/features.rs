use std::{
    collections::HashSet,
    ffi::{CStr, CString, c_void},
};

use lv2_raw::LV2Feature;

use crate::config::BlockConfig;
use crate::error::{HostError, Result};
use crate::uris::{
    LV2_ATOM__FLOAT, LV2_ATOM__INT, LV2_BUF_SIZE__MAX_BLOCK_LENGTH, LV2_BUF_SIZE__MIN_BLOCK_LENGTH,
    LV2_BUF_SIZE__NOMINAL_BLOCK_LENGTH, LV2_PARAMETERS__SAMPLE_RATE,
};
use crate::urid::UridMap;

const LV2_OPTIONS_INSTANCE: u32 = 0;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct LV2OptionsOption {
    pub context: u32,
    pub subject: u32,
    pub key: u32,
    pub size: u32,
    pub type_: u32,
    pub value: *const c_void,
}

impl LV2OptionsOption {
    fn terminator() -> Self {
        Self {
            context: 0,
            subject: 0,
            key: 0,
            size: 0,
            type_: 0,
            value: std::ptr::null(),
        }
    }
}

/// Zero-terminated `options:options` array together with the values it points at.
pub struct OptionsBlock {
    _block_lengths: Box<[u32; 3]>,
    _sample_rate: Box<f32>,
    options: Box<[LV2OptionsOption]>,
}

impl OptionsBlock {
    pub fn new(urids: &UridMap, block: &BlockConfig, sample_rate: f64) -> Self {
        let block_lengths = Box::new([
            block.min_block_length,
            block.max_block_length,
            block.nominal_block_length,
        ]);
        let rate = Box::new(sample_rate as f32);
        let int_type = urids.map(LV2_ATOM__INT);
        let int_option = |key: &str, value: &u32| LV2OptionsOption {
            context: LV2_OPTIONS_INSTANCE,
            subject: 0,
            key: urids.map(key),
            size: std::mem::size_of::<u32>() as u32,
            type_: int_type,
            value: (value as *const u32).cast::<c_void>(),
        };
        let options = vec![
            int_option(LV2_BUF_SIZE__MIN_BLOCK_LENGTH, &block_lengths[0]),
            int_option(LV2_BUF_SIZE__MAX_BLOCK_LENGTH, &block_lengths[1]),
            int_option(LV2_BUF_SIZE__NOMINAL_BLOCK_LENGTH, &block_lengths[2]),
            LV2OptionsOption {
                context: LV2_OPTIONS_INSTANCE,
                subject: 0,
                key: urids.map(LV2_PARAMETERS__SAMPLE_RATE),
                size: std::mem::size_of::<f32>() as u32,
                type_: urids.map(LV2_ATOM__FLOAT),
                value: (&*rate as *const f32).cast::<c_void>(),
            },
            LV2OptionsOption::terminator(),
        ]
        .into_boxed_slice();
        Self {
            _block_lengths: block_lengths,
            _sample_rate: rate,
            options,
        }
    }

    pub fn data(&self) -> *mut c_void {
        self.options.as_ptr().cast_mut().cast::<c_void>()
    }

    pub fn options(&self) -> &[LV2OptionsOption] {
        &self.options[..self.options.len() - 1]
    }
}

/// Owned, null-terminated LV2 feature array.
///
/// Everything the feature data pointers reference is owned here or by a
/// longer-lived collaborator, and the heap storage never moves after `build`.
pub struct FeatureSet {
    _uris: Vec<CString>,
    features: Vec<LV2Feature>,
    ptrs: Vec<*const LV2Feature>,
    _options: Option<OptionsBlock>,
    _flag_data: Box<u8>,
}

unsafe impl Send for FeatureSet {}

impl FeatureSet {
    pub fn builder() -> FeatureSetBuilder {
        FeatureSetBuilder::default()
    }

    /// Null-terminated `const LV2_Feature* const*`.
    pub fn as_ptr(&self) -> *const *const LV2Feature {
        self.ptrs.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LV2Feature> {
        self.features.iter()
    }

    pub fn uris(&self) -> impl Iterator<Item = &str> {
        self.features
            .iter()
            .filter_map(|feature| unsafe { CStr::from_ptr(feature.uri) }.to_str().ok())
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.uris().any(|candidate| candidate == uri)
    }

    pub fn data(&self, uri: &str) -> Option<*mut c_void> {
        self.features
            .iter()
            .find(|feature| unsafe { CStr::from_ptr(feature.uri) }.to_bytes() == uri.as_bytes())
            .map(|feature| feature.data)
    }
}

pub struct FeatureSetBuilder {
    seen: HashSet<String>,
    uris: Vec<CString>,
    data: Vec<*mut c_void>,
    options: Option<OptionsBlock>,
    flag_data: Box<u8>,
}

impl Default for FeatureSetBuilder {
    fn default() -> Self {
        Self {
            seen: HashSet::new(),
            uris: vec![],
            data: vec![],
            options: None,
            flag_data: Box::new(0),
        }
    }
}

impl FeatureSetBuilder {
    /// Adds a feature unless one with the same URI is already present.
    pub fn push(&mut self, uri: &str, data: *mut c_void) -> Result<&mut Self> {
        if !self.seen.insert(uri.to_string()) {
            return Ok(self);
        }
        let c_uri = CString::new(uri)
            .map_err(|e| HostError::InvalidDescriptor(format!("invalid feature URI '{uri}': {e}")))?;
        self.uris.push(c_uri);
        self.data.push(data);
        Ok(self)
    }

    /// Data-less feature; plugins only check that it is present.
    pub fn push_flag(&mut self, uri: &str) -> Result<&mut Self> {
        let data = (&*self.flag_data as *const u8).cast_mut().cast::<c_void>();
        self.push(uri, data)
    }

    pub fn options(&mut self, uri: &str, block: OptionsBlock) -> Result<&mut Self> {
        let data = block.data();
        self.options = Some(block);
        self.push(uri, data)
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.seen.contains(uri)
    }

    pub fn build(self) -> FeatureSet {
        let features: Vec<LV2Feature> = self
            .uris
            .iter()
            .zip(self.data.iter())
            .map(|(uri, data)| LV2Feature {
                uri: uri.as_ptr(),
                data: *data,
            })
            .collect();
        let mut ptrs: Vec<*const LV2Feature> =
            features.iter().map(|f| f as *const LV2Feature).collect();
        ptrs.push(std::ptr::null());
        FeatureSet {
            _uris: self.uris,
            features,
            ptrs,
            _options: self.options,
            _flag_data: self.flag_data,
        }
    }
}
