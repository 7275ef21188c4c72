#![allow(clippy::missing_safety_doc)]

#[macro_use]
extern crate log;
#[cfg(target_os = "android")]
extern crate android_log;

use std::cell::Cell;
use std::sync::{Arc, Mutex, RwLock};

use jni::objects::{GlobalRef, JClass, JObject, JString, JValue};
use jni::sys::{jboolean, jbyteArray, jint, jlong, jstring, JNI_FALSE, JNI_TRUE};
use jni::{JNIEnv, JavaVM};

use onecard_bridge::host::{MethodResult, METHOD_GET_INITIAL_LINK, METHOD_ON_NEW_LINK};
use onecard_bridge::reader::{Adapter, DiscoveryCallback, ReaderFlags, Tag};
use onecard_bridge::router::ConsumerSink;
use onecard_bridge::HostBridge;

const NULL: jstring = 0 as jstring;

static LAST_ERROR: Mutex<Option<String>> = Mutex::new(None);

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error("JNI Error: {0}")]
    Jni(#[from] jni::errors::Error),
}

type Bridge = HostBridge<JniAdapter, JniSink>;

/// The discovery callback slot handed over to the Java side as a raw handle.
/// The slot lives as long as the adapter, so a tag dispatched after `disableReaderMode` finds it
/// empty instead of freed.
type CallbackSlot = RwLock<Option<Arc<dyn DiscoveryCallback>>>;

/// `android.nfc.NfcAdapter` seen through a Java delegate.
struct JniAdapter {
    vm: JavaVM,
    delegate: GlobalRef,
    callback: Box<CallbackSlot>,
}

impl JniAdapter {
    fn new(env: JNIEnv, delegate: JObject) -> Result<Self, Error> {
        Ok(Self {
            vm: env.get_java_vm()?,
            delegate: env.new_global_ref(delegate)?,
            callback: Box::default(),
        })
    }

    fn call(&self, name: &str, sig: &str, args: &[JValue]) -> Result<JValue, Error> {
        let env = self.vm.get_env()?;

        Ok(env.call_method(self.delegate.as_obj(), name, sig, args)?)
    }

    fn handle(&self) -> jlong {
        &*self.callback as *const CallbackSlot as jlong
    }

    fn install(&self, callback: Option<Arc<dyn DiscoveryCallback>>) {
        if let Ok(mut slot) = self.callback.write() {
            *slot = callback;
        }
    }
}

impl Adapter for JniAdapter {
    fn is_enabled(&self) -> bool {
        match self.call("isEnabled", "()Z", &[]).and_then(|v| Ok(v.z()?)) {
            Ok(enabled) => enabled,
            Err(e) => {
                error!("isEnabled Error: {:?}", e);
                false
            }
        }
    }

    fn enable_listening(&mut self, callback: Arc<dyn DiscoveryCallback>, flags: ReaderFlags) {
        self.install(Some(callback));

        let res = self
            .call(
                "enableReaderMode",
                "(IJ)V",
                &[JValue::Int(flags.bits() as jint), JValue::Long(self.handle())],
            )
            .map(drop);

        if let Err(e) = res {
            error!("enableReaderMode Error: {:?}", e);
            self.install(None);
        }
    }

    fn disable_listening(&mut self) {
        if let Err(e) = self.call("disableReaderMode", "()V", &[]).map(drop) {
            error!("disableReaderMode Error: {:?}", e);
        }

        self.install(None);
    }
}

/// The consumer channel, seen through a Java delegate.
struct JniSink {
    vm: JavaVM,
    delegate: GlobalRef,
}

impl JniSink {
    fn new(env: JNIEnv, delegate: JObject) -> Result<Self, Error> {
        Ok(Self {
            vm: env.get_java_vm()?,
            delegate: env.new_global_ref(delegate)?,
        })
    }

    fn try_deliver(&self, link: &str) -> Result<(), Error> {
        let env = self.vm.get_env()?;
        let link = env.new_string(link)?;

        env.call_method(
            self.delegate.as_obj(),
            METHOD_ON_NEW_LINK,
            "(Ljava/lang/String;)V",
            &[JValue::Object(JObject::from(link))],
        )?;

        Ok(())
    }
}

impl ConsumerSink for JniSink {
    fn deliver(&mut self, link: &str) {
        info!("Delivering activation link");

        if let Err(e) = self.try_deliver(link) {
            error!("onNewLink Error: {:?}", e);
            set_last_error(&e);
        }
    }
}

fn set_last_error<E>(e: &E)
where
    E: ToString,
{
    if let Ok(mut last) = LAST_ERROR.lock() {
        *last = Some(e.to_string());
    }
}

fn unwrap<T, E>(result: Result<T, E>) -> T
where
    T: Default,
    E: std::error::Error,
{
    unwrap_or_default(result, T::default())
}

fn unwrap_or_default<T, E>(result: Result<T, E>, default: T) -> T
where
    E: std::error::Error,
{
    match result {
        Ok(value) => value,
        Err(err) => {
            set_last_error(&err);
            default
        }
    }
}

macro_rules! wrap {
    (jstring, $inner: expr) => {
        unwrap_or_default((|| -> Result<jstring, Error> { $inner })(), NULL)
    };

    ($t: ty, $inner: expr) => {
        unwrap((|| -> Result<$t, Error> { $inner })())
    };
}

fn optional_string(env: JNIEnv, str: JString) -> Result<Option<String>, Error> {
    if str.is_null() {
        return Ok(None);
    }

    Ok(Some(env.get_string(str)?.into()))
}

#[cfg(target_os = "android")]
fn init_logger() {
    if let Err(e) = android_log::init("ONECARD.FFI") {
        set_last_error(&e);
    }
}

#[cfg(not(target_os = "android"))]
fn init_logger() {}

unsafe fn bridge<'a>(bridge: jlong) -> &'a mut Bridge {
    &mut *(bridge as *mut Bridge)
}

#[no_mangle]
pub extern "C" fn Java_org_onecard_bridge_ffi_LibOnecard_init(_env: JNIEnv, _class: JClass) {
    init_logger();
}

#[no_mangle]
pub extern "C" fn Java_org_onecard_bridge_ffi_LibOnecard_lastError(
    env: JNIEnv,
    _class: JClass,
) -> jstring {
    let message = LAST_ERROR.lock().ok().and_then(|last| last.clone());

    match message {
        Some(message) => wrap!(jstring, Ok(env.new_string(message)?.into_raw())),
        None => NULL,
    }
}

/// Creates the bridge when the activity is created.
/// `adapter` is null when the device has no reader, `launchLink` when the activity was not
/// launched by a link.
#[no_mangle]
pub extern "C" fn Java_org_onecard_bridge_ffi_LibOnecard_newBridge(
    env: JNIEnv,
    _class: JClass,
    adapter: JObject,
    launch_link: JString,
) -> jlong {
    wrap!(jlong, {
        let adapter = match adapter.is_null() {
            true => None,
            _ => Some(JniAdapter::new(env, adapter)?),
        };
        let launch_link = optional_string(env, launch_link)?;
        let adapter = Cell::new(adapter);
        let bridge: Bridge = HostBridge::create(&|| adapter.take(), launch_link.as_deref());

        Ok(Box::into_raw(Box::new(bridge)) as jlong)
    })
}

#[no_mangle]
pub unsafe extern "C" fn Java_org_onecard_bridge_ffi_LibOnecard_onResume(
    _env: JNIEnv,
    _class: JClass,
    ptr: jlong,
) {
    bridge(ptr).on_resume()
}

#[no_mangle]
pub unsafe extern "C" fn Java_org_onecard_bridge_ffi_LibOnecard_onPause(
    _env: JNIEnv,
    _class: JClass,
    ptr: jlong,
) {
    bridge(ptr).on_pause()
}

#[no_mangle]
pub unsafe extern "C" fn Java_org_onecard_bridge_ffi_LibOnecard_onNewIntent(
    env: JNIEnv,
    _class: JClass,
    ptr: jlong,
    link: JString,
) {
    wrap!((), {
        let link = optional_string(env, link)?;
        bridge(ptr).on_new_intent(link.as_deref());

        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn Java_org_onecard_bridge_ffi_LibOnecard_registerConsumer(
    env: JNIEnv,
    _class: JClass,
    ptr: jlong,
    sink: JObject,
) {
    wrap!((), {
        let sink = JniSink::new(env, sink)?;
        bridge(ptr).register_consumer(sink);

        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn Java_org_onecard_bridge_ffi_LibOnecard_getInitialLink(
    env: JNIEnv,
    _class: JClass,
    ptr: jlong,
) -> jstring {
    wrap!(jstring, {
        match bridge(ptr).handle_method_call(METHOD_GET_INITIAL_LINK) {
            MethodResult::Success(Some(link)) => Ok(env.new_string(link)?.into_raw()),
            _ => Ok(NULL),
        }
    })
}

#[no_mangle]
pub unsafe extern "C" fn Java_org_onecard_bridge_ffi_LibOnecard_isReaderActive(
    _env: JNIEnv,
    _class: JClass,
    ptr: jlong,
) -> jboolean {
    match bridge(ptr).reader().is_active() {
        true => JNI_TRUE,
        _ => JNI_FALSE,
    }
}

/// Hands a discovered tag to the callback installed by `enableReaderMode`.
/// May be called on the binder thread delivering the tag, until the bridge is closed.
#[no_mangle]
pub unsafe extern "C" fn Java_org_onecard_bridge_ffi_LibOnecard_dispatchTag(
    env: JNIEnv,
    _class: JClass,
    callback: jlong,
    tag_id: jbyteArray,
) {
    wrap!((), {
        let id = env.convert_byte_array(tag_id)?;
        let slot = &*(callback as *const CallbackSlot);
        let callback = slot.read().ok().and_then(|slot| slot.clone());

        if let Some(callback) = callback {
            callback.on_tag_discovered(&Tag::new(id));
        }

        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn Java_org_onecard_bridge_ffi_LibOnecard_close(
    _env: JNIEnv,
    _class: JClass,
    ptr: jlong,
) {
    let _ = Box::from_raw(ptr as *mut Bridge);
}
