use std::{
    collections::HashMap,
    ffi::{CStr, CString, c_char, c_void},
};

use lv2_raw::{LV2Urid, LV2UridMap, LV2UridMapHandle};
use parking_lot::Mutex;

#[derive(Default)]
struct UridMapState {
    next_urid: LV2Urid,
    by_uri: HashMap<String, LV2Urid>,
    by_urid: HashMap<LV2Urid, CString>,
}

impl UridMapState {
    fn map(&mut self, uri: &str) -> LV2Urid {
        if let Some(existing) = self.by_uri.get(uri).copied() {
            return existing;
        }
        let Ok(uri_c) = CString::new(uri) else {
            return 0;
        };
        let mapped = self.next_urid;
        self.next_urid = self.next_urid.saturating_add(1);
        self.by_uri.insert(uri.to_string(), mapped);
        self.by_urid.insert(mapped, uri_c);
        mapped
    }
}

#[repr(C)]
pub struct LV2UridUnmap {
    pub handle: LV2UridMapHandle,
    pub unmap: extern "C" fn(handle: LV2UridMapHandle, urid: LV2Urid) -> *const c_char,
}

/// Process-wide URI ↔ URID table, exposed to plugins through the
/// `urid:map` and `urid:unmap` features.
///
/// The C structs and the state they point into are boxed so their addresses
/// stay valid while the map itself moves.
pub struct UridMap {
    map: Box<LV2UridMap>,
    unmap: Box<LV2UridUnmap>,
    state: Box<Mutex<UridMapState>>,
}

unsafe impl Send for UridMap {}
unsafe impl Sync for UridMap {}

impl Default for UridMap {
    fn default() -> Self {
        Self::new()
    }
}

impl UridMap {
    pub fn new() -> Self {
        let state = Box::new(Mutex::new(UridMapState {
            next_urid: 1,
            ..Default::default()
        }));
        let handle = (&*state as *const Mutex<UridMapState>).cast_mut().cast::<c_void>();
        let map = Box::new(LV2UridMap {
            handle,
            map: urid_map_callback,
        });
        let unmap = Box::new(LV2UridUnmap {
            handle,
            unmap: urid_unmap_callback,
        });
        Self { map, unmap, state }
    }

    /// Never returns 0 for a valid URI; the same URI always maps to the same id.
    pub fn map(&self, uri: &str) -> LV2Urid {
        self.state.lock().map(uri)
    }

    pub fn unmap(&self, urid: LV2Urid) -> Option<String> {
        self.state
            .lock()
            .by_urid
            .get(&urid)
            .and_then(|uri| uri.to_str().ok().map(str::to_string))
    }

    pub fn len(&self) -> usize {
        self.state.lock().by_uri.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn map_data(&self) -> *mut c_void {
        (&*self.map as *const LV2UridMap).cast_mut().cast::<c_void>()
    }

    pub fn unmap_data(&self) -> *mut c_void {
        (&*self.unmap as *const LV2UridUnmap).cast_mut().cast::<c_void>()
    }
}

extern "C" fn urid_map_callback(handle: LV2UridMapHandle, uri: *const c_char) -> LV2Urid {
    if handle.is_null() || uri.is_null() {
        return 0;
    }
    let Some(uri_str) = unsafe { CStr::from_ptr(uri) }.to_str().ok() else {
        return 0;
    };
    let state = unsafe { &*(handle as *const Mutex<UridMapState>) };
    state.lock().map(uri_str)
}

extern "C" fn urid_unmap_callback(handle: LV2UridMapHandle, urid: LV2Urid) -> *const c_char {
    if handle.is_null() || urid == 0 {
        return std::ptr::null();
    }
    let state = unsafe { &*(handle as *const Mutex<UridMapState>) };
    // CString heap buffers never move once inserted, so the pointer outlives the guard.
    state
        .lock()
        .by_urid
        .get(&urid)
        .map(|uri| uri.as_ptr())
        .unwrap_or(std::ptr::null())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_is_stable_and_nonzero() {
        let urids = UridMap::new();
        let a = urids.map("urn:a");
        let b = urids.map("urn:b");
        assert_ne!(a, 0);
        assert_ne!(a, b);
        assert_eq!(urids.map("urn:a"), a);
        assert_eq!(urids.unmap(b).as_deref(), Some("urn:b"));
        assert_eq!(urids.unmap(999), None);
        assert_eq!(urids.len(), 2);
    }

    #[test]
    fn c_callbacks_share_the_table() {
        let urids = UridMap::new();
        let map = unsafe { &*(urids.map_data() as *const LV2UridMap) };
        let unmap = unsafe { &*(urids.unmap_data() as *const LV2UridUnmap) };
        let uri = CString::new("urn:from-c").unwrap();
        let id = (map.map)(map.handle, uri.as_ptr());
        assert_eq!(urids.map("urn:from-c"), id);

        let back = (unmap.unmap)(unmap.handle, id);
        assert!(!back.is_null());
        assert_eq!(unsafe { CStr::from_ptr(back) }.to_str().unwrap(), "urn:from-c");
        assert!((unmap.unmap)(unmap.handle, 0).is_null());
        assert_eq!((map.map)(map.handle, std::ptr::null()), 0);
    }
}
