//! Opaque plugin state: control values plus `state:interface` properties,
//! serialized as a JSON document.

use std::{
    collections::{BTreeMap, HashMap},
    ffi::c_void,
};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use lv2_raw::LV2Feature;
use serde::{Deserialize, Serialize};

use crate::error::{HostError, Result};
use crate::urid::UridMap;

pub type Lv2Handle = *mut c_void;
pub type Lv2StateHandle = *mut c_void;
pub type Lv2StateStatus = u32;
pub type Lv2StateStoreFn = Option<
    unsafe extern "C" fn(
        handle: Lv2StateHandle,
        key: u32,
        value: *const c_void,
        size: usize,
        type_: u32,
        flags: u32,
    ) -> Lv2StateStatus,
>;
pub type Lv2StateRetrieveFn = Option<
    unsafe extern "C" fn(
        handle: Lv2StateHandle,
        key: u32,
        size: *mut usize,
        type_: *mut u32,
        flags: *mut u32,
    ) -> *const c_void,
>;
pub const LV2_STATE_STATUS_SUCCESS: Lv2StateStatus = 0;
pub const LV2_STATE_STATUS_ERR_NO_PROPERTY: Lv2StateStatus = 5;
pub const LV2_STATE_IS_POD: u32 = 1;
pub const LV2_STATE_IS_PORTABLE: u32 = 1 << 1;

#[repr(C)]
pub struct Lv2StateInterface {
    pub save: Option<
        unsafe extern "C" fn(
            instance: Lv2Handle,
            store: Lv2StateStoreFn,
            handle: Lv2StateHandle,
            flags: u32,
            features: *const *const LV2Feature,
        ) -> Lv2StateStatus,
    >,
    pub restore: Option<
        unsafe extern "C" fn(
            instance: Lv2Handle,
            retrieve: Lv2StateRetrieveFn,
            handle: Lv2StateHandle,
            flags: u32,
            features: *const *const LV2Feature,
        ) -> Lv2StateStatus,
    >,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateProperty {
    pub key: String,
    #[serde(rename = "type")]
    pub type_uri: String,
    #[serde(default)]
    pub flags: u32,
    /// Base64 of the raw property bytes.
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateBlob {
    pub plugin: String,
    #[serde(default)]
    pub ports: BTreeMap<String, f32>,
    #[serde(default)]
    pub properties: Vec<StateProperty>,
}

impl StateBlob {
    pub fn new(plugin: &str) -> Self {
        Self {
            plugin: plugin.to_string(),
            ports: BTreeMap::new(),
            properties: vec![],
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug)]
struct RawStateProperty {
    key: u32,
    type_: u32,
    flags: u32,
    value: Vec<u8>,
}

struct StateSaveContext {
    properties: Vec<RawStateProperty>,
}

struct StateRestoreContext {
    properties: Vec<RawStateProperty>,
    by_key: HashMap<u32, usize>,
}

/// Calls the plugin's `save` and returns the stored properties with their
/// URIDs unmapped.
///
/// # Safety
/// `instance` must be the live handle `interface` was obtained from, and
/// `features` a null-terminated feature array.
pub unsafe fn save_properties(
    interface: &Lv2StateInterface,
    instance: Lv2Handle,
    urids: &UridMap,
    features: *const *const LV2Feature,
) -> Result<Vec<StateProperty>> {
    let Some(save_fn) = interface.save else {
        return Ok(vec![]);
    };
    let mut ctx = StateSaveContext { properties: vec![] };
    let status = unsafe {
        save_fn(
            instance,
            Some(lv2_state_store_callback),
            (&mut ctx as *mut StateSaveContext).cast::<c_void>(),
            LV2_STATE_IS_POD | LV2_STATE_IS_PORTABLE,
            features,
        )
    };
    if status != LV2_STATE_STATUS_SUCCESS {
        return Err(HostError::State(format!("save returned status {status}")));
    }
    ctx.properties
        .into_iter()
        .map(|p| -> Result<StateProperty> {
            let unmap = |urid: u32| {
                urids
                    .unmap(urid)
                    .ok_or_else(|| HostError::State(format!("stored property uses unmapped URID {urid}")))
            };
            Ok(StateProperty {
                key: unmap(p.key)?,
                type_uri: unmap(p.type_)?,
                flags: p.flags,
                value: STANDARD.encode(&p.value),
            })
        })
        .collect()
}

/// Hands `properties` back to the plugin through its `restore`.
///
/// # Safety
/// Same contract as [`save_properties`].
pub unsafe fn restore_properties(
    interface: &Lv2StateInterface,
    instance: Lv2Handle,
    urids: &UridMap,
    features: *const *const LV2Feature,
    properties: &[StateProperty],
) -> Result<()> {
    if properties.is_empty() {
        return Ok(());
    }
    let Some(restore_fn) = interface.restore else {
        return Ok(());
    };
    let mut raw = Vec::with_capacity(properties.len());
    let mut by_key = HashMap::new();
    for prop in properties {
        let key = urids.map(&prop.key);
        let type_ = urids.map(&prop.type_uri);
        if key == 0 || type_ == 0 {
            continue;
        }
        by_key.insert(key, raw.len());
        raw.push(RawStateProperty {
            key,
            type_,
            flags: prop.flags,
            value: STANDARD.decode(&prop.value)?,
        });
    }
    let mut ctx = StateRestoreContext {
        properties: raw,
        by_key,
    };
    let status = unsafe {
        restore_fn(
            instance,
            Some(lv2_state_retrieve_callback),
            (&mut ctx as *mut StateRestoreContext).cast::<c_void>(),
            LV2_STATE_IS_POD | LV2_STATE_IS_PORTABLE,
            features,
        )
    };
    if status == LV2_STATE_STATUS_SUCCESS {
        Ok(())
    } else {
        Err(HostError::State(format!("restore returned status {status}")))
    }
}

unsafe extern "C" fn lv2_state_store_callback(
    handle: Lv2StateHandle,
    key: u32,
    value: *const c_void,
    size: usize,
    type_: u32,
    flags: u32,
) -> Lv2StateStatus {
    if handle.is_null() || value.is_null() || size == 0 || key == 0 {
        return LV2_STATE_STATUS_ERR_NO_PROPERTY;
    }
    let ctx = unsafe { &mut *(handle as *mut StateSaveContext) };
    let bytes = unsafe { std::slice::from_raw_parts(value.cast::<u8>(), size) };
    ctx.properties.push(RawStateProperty {
        key,
        type_,
        flags,
        value: bytes.to_vec(),
    });
    LV2_STATE_STATUS_SUCCESS
}

unsafe extern "C" fn lv2_state_retrieve_callback(
    handle: Lv2StateHandle,
    key: u32,
    size: *mut usize,
    type_: *mut u32,
    flags: *mut u32,
) -> *const c_void {
    if handle.is_null() {
        return std::ptr::null();
    }
    let ctx = unsafe { &*(handle as *const StateRestoreContext) };
    let Some(prop) = ctx.by_key.get(&key).and_then(|idx| ctx.properties.get(*idx)) else {
        return std::ptr::null();
    };
    unsafe {
        if !size.is_null() {
            *size = prop.value.len();
        }
        if !type_.is_null() {
            *type_ = prop.type_;
        }
        if !flags.is_null() {
            *flags = prop.flags;
        }
    }
    prop.value.as_ptr().cast::<c_void>()
}
