#![allow(clippy::missing_safety_doc)]

use std::cell::Cell;
use std::ffi::{c_char, c_void, CStr, CString};
use std::ptr::null_mut;
use std::slice;
use std::sync::{Arc, Mutex, RwLock};

use onecard_bridge::host::{MethodResult, METHOD_GET_INITIAL_LINK};
use onecard_bridge::reader::{Adapter, DiscoveryCallback, ReaderFlags, Tag};
use onecard_bridge::router::ConsumerSink;
use onecard_bridge::HostBridge;

static LAST_ERROR: Mutex<Option<String>> = Mutex::new(None);

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error("String is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("String contains a NUL byte: {0}")]
    Nul(#[from] std::ffi::NulError),
}

fn unwrap_or<T, E>(result: Result<T, E>, default: T) -> T
where
    E: ToString,
{
    if let Ok(mut last) = LAST_ERROR.lock() {
        // If result is an error, sets the message to LAST_ERROR.
        // Clears the last error otherwise.
        *last = result.as_ref().err().map(|e| e.to_string());
    }

    match result {
        Ok(value) => value,
        Err(_) => default,
    }
}

fn unwrap<T, E>(result: Result<T, E>) -> T
where
    T: Default,
    E: ToString,
{
    unwrap_or(result, T::default())
}

unsafe fn optional_str<'a>(ptr: *const c_char) -> Result<Option<&'a str>, Error> {
    match ptr.is_null() {
        true => Ok(None),
        _ => Ok(Some(CStr::from_ptr(ptr).to_str()?)),
    }
}

/// Function table of the host's reader adapter.
/// Every function receives `user_data` as the first argument.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct OnecardAdapter {
    pub user_data: *mut c_void,

    /// Returns whether the adapter is turned on.
    pub is_enabled: extern "C" fn(*mut c_void) -> bool,

    /// Starts reader mode with the flags.
    /// The host must hand every discovered tag to `onecard_dispatch_tag` with the callback.
    /// The callback stays valid until the bridge is freed; tags dispatched after
    /// `disable_reader_mode` are dropped.
    pub enable_reader_mode: extern "C" fn(*mut c_void, u32, *const OnecardDiscoveryCallback),

    /// Stops reader mode.
    pub disable_reader_mode: extern "C" fn(*mut c_void),
}

/// Function table of the consumer.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct OnecardSink {
    pub user_data: *mut c_void,

    /// Receives a routed link as a NUL-terminated string, valid only during the call.
    pub on_new_link: extern "C" fn(*mut c_void, *const c_char),
}

/// The discovery callback slot of an adapter.
/// Allocated once per adapter; enabling and disabling reader mode swap what it holds.
pub struct OnecardDiscoveryCallback {
    inner: RwLock<Option<Arc<dyn DiscoveryCallback>>>,
}

impl OnecardDiscoveryCallback {
    fn install(&self, callback: Option<Arc<dyn DiscoveryCallback>>) {
        if let Ok(mut inner) = self.inner.write() {
            *inner = callback;
        }
    }

    fn installed(&self) -> Option<Arc<dyn DiscoveryCallback>> {
        self.inner.read().ok().and_then(|inner| inner.clone())
    }
}

/// The bridge owned by the host.
pub struct OnecardBridge {
    inner: HostBridge<FfiAdapter, FfiSink>,
}

struct FfiAdapter {
    table: OnecardAdapter,
    callback: Box<OnecardDiscoveryCallback>,
}

impl Adapter for FfiAdapter {
    fn is_enabled(&self) -> bool {
        (self.table.is_enabled)(self.table.user_data)
    }

    fn enable_listening(&mut self, callback: Arc<dyn DiscoveryCallback>, flags: ReaderFlags) {
        self.callback.install(Some(callback));

        (self.table.enable_reader_mode)(self.table.user_data, flags.bits(), &*self.callback);
    }

    fn disable_listening(&mut self) {
        (self.table.disable_reader_mode)(self.table.user_data);
        self.callback.install(None);
    }
}

struct FfiSink {
    table: OnecardSink,
}

impl ConsumerSink for FfiSink {
    fn deliver(&mut self, link: &str) {
        if let Some(link) = unwrap(CString::new(link).map(Some).map_err(Error::Nul)) {
            (self.table.on_new_link)(self.table.user_data, link.as_ptr());
        }
    }
}

/// Initiates the library.
/// Currently this occur no side effects, but dependents should call this before using other
/// functions.
#[no_mangle]
pub extern "C" fn onecard_init() {}

/// Returns the latest error occurred before calling this function, or null pointer.
/// The string must be released with `onecard_string_free`.
#[no_mangle]
pub extern "C" fn onecard_last_error() -> *mut c_char {
    let message = LAST_ERROR.lock().ok().and_then(|last| last.clone());

    match message.and_then(|e| CString::new(e).ok()) {
        Some(str) => str.into_raw(),
        None => null_mut(),
    }
}

/// Releases a string returned by this library.
#[no_mangle]
pub unsafe extern "C" fn onecard_string_free(str: *mut c_char) {
    if !str.is_null() {
        let _ = CString::from_raw(str);
    }
}

/// Creates the bridge when the host is created.
/// `adapter` is null when the device has no reader, `launch_link` when the host was not
/// launched by a link.
#[no_mangle]
pub unsafe extern "C" fn onecard_bridge_new(
    adapter: *const OnecardAdapter,
    launch_link: *const c_char,
) -> *mut OnecardBridge {
    let launch_link = unwrap(optional_str(launch_link));
    let adapter = adapter.as_ref().map(|table| FfiAdapter {
        table: *table,
        callback: Box::new(OnecardDiscoveryCallback {
            inner: RwLock::new(None),
        }),
    });
    let adapter = Cell::new(adapter);
    let inner = HostBridge::create(&|| adapter.take(), launch_link);

    Box::into_raw(Box::new(OnecardBridge { inner }))
}

#[no_mangle]
pub unsafe extern "C" fn onecard_bridge_on_resume(bridge: *mut OnecardBridge) {
    (*bridge).inner.on_resume()
}

#[no_mangle]
pub unsafe extern "C" fn onecard_bridge_on_pause(bridge: *mut OnecardBridge) {
    (*bridge).inner.on_pause()
}

/// Handles a link delivered to the running host. `link` may be null.
#[no_mangle]
pub unsafe extern "C" fn onecard_bridge_on_new_intent(
    bridge: *mut OnecardBridge,
    link: *const c_char,
) {
    let link = unwrap(optional_str(link));

    (*bridge).inner.on_new_intent(link)
}

/// Attaches the consumer. The pending link, if any, is delivered before this returns.
#[no_mangle]
pub unsafe extern "C" fn onecard_bridge_register_consumer(
    bridge: *mut OnecardBridge,
    sink: OnecardSink,
) {
    (*bridge).inner.register_consumer(FfiSink { table: sink })
}

/// Returns the link the host was launched with, or null pointer.
/// The string must be released with `onecard_string_free`.
#[no_mangle]
pub unsafe extern "C" fn onecard_bridge_initial_link(bridge: *const OnecardBridge) -> *mut c_char {
    match (*bridge).inner.handle_method_call(METHOD_GET_INITIAL_LINK) {
        MethodResult::Success(Some(link)) => {
            match unwrap(CString::new(link).map(Some).map_err(Error::Nul)) {
                Some(str) => str.into_raw(),
                None => null_mut(),
            }
        }
        _ => null_mut(),
    }
}

#[no_mangle]
pub unsafe extern "C" fn onecard_bridge_is_reader_active(bridge: *const OnecardBridge) -> bool {
    (*bridge).inner.reader().is_active()
}

#[no_mangle]
pub unsafe extern "C" fn onecard_bridge_free(bridge: *mut OnecardBridge) {
    if !bridge.is_null() {
        let _ = Box::from_raw(bridge);
    }
}

/// Hands a discovered tag to the callback. May be called from any thread until the bridge is
/// freed; does nothing while reader mode is disabled.
#[no_mangle]
pub unsafe extern "C" fn onecard_dispatch_tag(
    callback: *const OnecardDiscoveryCallback,
    id: *const u8,
    len: usize,
) {
    let id = match id.is_null() {
        true => vec![],
        _ => slice::from_raw_parts(id, len).to_vec(),
    };

    if let Some(callback) = callback.as_ref().and_then(|c| c.installed()) {
        callback.on_tag_discovered(&Tag::new(id));
    }
}

#[cfg(test)]
mod tests {
    use std::ptr::null;

    use super::*;

    #[derive(Default)]
    struct Host {
        enabled: bool,
        flags: Option<u32>,
        callback: Option<*const OnecardDiscoveryCallback>,
        links: Vec<String>,
    }

    fn host<'a>(user_data: *mut c_void) -> &'a mut Host {
        unsafe { &mut *(user_data as *mut Host) }
    }

    extern "C" fn is_enabled(user_data: *mut c_void) -> bool {
        host(user_data).enabled
    }

    extern "C" fn enable_reader_mode(
        user_data: *mut c_void,
        flags: u32,
        callback: *const OnecardDiscoveryCallback,
    ) {
        host(user_data).flags = Some(flags);
        host(user_data).callback = Some(callback);
    }

    extern "C" fn disable_reader_mode(user_data: *mut c_void) {
        host(user_data).flags = None;
        host(user_data).callback = None;
    }

    extern "C" fn on_new_link(user_data: *mut c_void, link: *const c_char) {
        let link = unsafe { CStr::from_ptr(link) }.to_str().unwrap().to_owned();
        host(user_data).links.push(link);
    }

    fn tables(host: &mut Host) -> (OnecardAdapter, OnecardSink) {
        let user_data = host as *mut Host as *mut c_void;

        (
            OnecardAdapter {
                user_data,
                is_enabled,
                enable_reader_mode,
                disable_reader_mode,
            },
            OnecardSink {
                user_data,
                on_new_link,
            },
        )
    }

    #[test]
    fn test_lifecycle_through_function_tables() {
        let mut state = Host {
            enabled: true,
            ..Default::default()
        };
        let (adapter, sink) = tables(&mut state);
        let launch = CString::new("onecard://auth/session?x=1").unwrap();

        unsafe {
            let bridge = onecard_bridge_new(&adapter, launch.as_ptr());

            onecard_bridge_on_resume(bridge);
            assert!(onecard_bridge_is_reader_active(bridge));
            assert_eq!(Some(0x183), host(adapter.user_data).flags);

            let callback = host(adapter.user_data).callback.unwrap();
            onecard_dispatch_tag(callback, [0x04u8, 0x11].as_ptr(), 2);

            onecard_bridge_register_consumer(bridge, sink);
            let link = CString::new("onecard://auth/next").unwrap();
            onecard_bridge_on_new_intent(bridge, link.as_ptr());
            onecard_bridge_on_new_intent(bridge, null());

            onecard_bridge_on_pause(bridge);
            assert!(!onecard_bridge_is_reader_active(bridge));
            assert_eq!(None, host(adapter.user_data).flags);

            let initial = onecard_bridge_initial_link(bridge);
            assert_eq!(
                "onecard://auth/session?x=1",
                CStr::from_ptr(initial).to_str().unwrap(),
            );
            onecard_string_free(initial);
            onecard_bridge_free(bridge);
        }

        assert_eq!(
            vec!["onecard://auth/session?x=1", "onecard://auth/next"],
            state.links,
        );
    }

    #[test]
    fn test_dispatch_after_pause_is_dropped() {
        let mut state = Host {
            enabled: true,
            ..Default::default()
        };
        let (adapter, _) = tables(&mut state);

        unsafe {
            let bridge = onecard_bridge_new(&adapter, null());

            onecard_bridge_on_resume(bridge);
            let callback = host(adapter.user_data).callback.unwrap();
            assert!((*callback).installed().is_some());

            onecard_bridge_on_pause(bridge);
            assert!((*callback).installed().is_none());
            onecard_dispatch_tag(callback, [0x04u8, 0x11].as_ptr(), 2);

            onecard_bridge_on_resume(bridge);
            assert_eq!(Some(callback), host(adapter.user_data).callback);
            assert!((*callback).installed().is_some());
            onecard_dispatch_tag(callback, [0x04u8, 0x12].as_ptr(), 2);

            onecard_bridge_free(bridge);
        }
    }

    #[test]
    fn test_without_adapter_or_launch_link() {
        unsafe {
            let bridge = onecard_bridge_new(null(), null());

            onecard_bridge_on_resume(bridge);
            assert!(!onecard_bridge_is_reader_active(bridge));
            assert!(onecard_bridge_initial_link(bridge).is_null());

            onecard_bridge_free(bridge);
        }
    }
}
