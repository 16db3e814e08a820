//! C ABI for native hosts
//!
//! Exposes the bridge as plain `extern "C"` functions for engines that load
//! the library dynamically. State lives in one process-wide slot guarded by a
//! mutex, so calls from different host threads are serialized.
//!
//! Functions returning `c_int` use [`OVB_OK`] for success and a negative
//! status otherwise; [`ovb_last_error`] describes the most recent failure.
//! Returned strings stay valid until the next call that replaces them.

use std::ffi::{c_char, c_int, CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

use parking_lot::{const_mutex, Mutex};
use tracing::error;

use crate::engine::{InferenceBridge, OpenVinoBackend};
use crate::error::BridgeError;

pub const OVB_OK: c_int = 0;
pub const OVB_NOT_INITIALIZED: c_int = -1;
pub const OVB_INVALID_ARGUMENT: c_int = -2;
pub const OVB_BACKEND_ERROR: c_int = -3;
pub const OVB_PANIC: c_int = -4;

const EMPTY: &CStr = c"";

struct FfiState {
    bridge: Option<InferenceBridge<OpenVinoBackend>>,
    devices: Option<CString>,
    current_device: Option<CString>,
    last_error: Option<CString>,
}

static STATE: Mutex<FfiState> = const_mutex(FfiState {
    bridge: None,
    devices: None,
    current_device: None,
    last_error: None,
});

fn as_ptr(text: &Option<CString>) -> *const c_char {
    text.as_deref().unwrap_or(EMPTY).as_ptr()
}

fn status_of(err: &BridgeError) -> c_int {
    match err {
        BridgeError::ModelNotLoaded | BridgeError::SessionNotCompiled | BridgeError::StaleSession => {
            OVB_NOT_INITIALIZED
        }
        BridgeError::ModelLoad { .. }
        | BridgeError::Compile { .. }
        | BridgeError::Execution(_)
        | BridgeError::Backend(_) => OVB_BACKEND_ERROR,
        _ => OVB_INVALID_ARGUMENT,
    }
}

fn to_cstring(text: &str) -> CString {
    CString::new(text.replace('\0', " ")).unwrap_or_default()
}

/// Run `f` against the shared state, recording any error and never unwinding
fn guarded(f: impl FnOnce(&mut FfiState) -> Result<(), BridgeError>) -> c_int {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let mut state = STATE.lock();
        match f(&mut state) {
            Ok(()) => OVB_OK,
            Err(e) => {
                error!("{}", e);
                state.last_error = Some(to_cstring(&e.to_string()));
                status_of(&e)
            }
        }
    }));
    outcome.unwrap_or(OVB_PANIC)
}

/// Convert a C integer argument that must not be negative
fn non_negative(what: &str, value: c_int) -> Result<usize, BridgeError> {
    usize::try_from(value)
        .map_err(|_| BridgeError::InvalidArgument(format!("{} must not be negative, got {}", what, value)))
}

fn bridge_mut(state: &mut FfiState) -> Result<&mut InferenceBridge<OpenVinoBackend>, BridgeError> {
    state.bridge.as_mut().ok_or(BridgeError::ModelNotLoaded)
}

/// Create the runtime, load the model at `model_path`, list devices and apply
/// GPU cache hints.
///
/// # Safety
/// `model_path` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn ovb_initialize(model_path: *const c_char) -> c_int {
    if model_path.is_null() {
        return OVB_INVALID_ARGUMENT;
    }
    let path = CStr::from_ptr(model_path).to_string_lossy().into_owned();

    guarded(|state| {
        if state.bridge.is_none() {
            let backend = OpenVinoBackend::new().map_err(BridgeError::Backend)?;
            state.bridge = Some(InferenceBridge::new(backend));
        }
        let bridge = state.bridge.as_mut().ok_or(BridgeError::ModelNotLoaded)?;
        bridge.initialize(Path::new(&path))?;
        state.devices = Some(to_cstring(bridge.available_devices()));
        Ok(())
    })
}

/// Comma-separated device list, accelerators first. Null before initialization.
#[no_mangle]
pub extern "C" fn ovb_available_devices() -> *const c_char {
    let state = STATE.lock();
    if state.bridge.is_none() {
        return std::ptr::null();
    }
    as_ptr(&state.devices)
}

/// Re-apply the compiled-artifact cache directory to GPU devices
#[no_mangle]
pub extern "C" fn ovb_set_device_cache() -> c_int {
    guarded(|state| {
        bridge_mut(state)?.configure_device_cache();
        Ok(())
    })
}

/// Resize the model input. A device must be selected again afterwards.
#[no_mangle]
pub extern "C" fn ovb_set_input_dims(width: c_int, height: c_int) -> c_int {
    guarded(|state| {
        let width = non_negative("width", width)?;
        let height = non_negative("height", height)?;
        bridge_mut(state)?.set_input_dimensions(width, height)?;
        Ok(())
    })
}

/// Compile the model for the device at `index` in the listing. Returns the
/// chosen device id, or null on failure.
#[no_mangle]
pub extern "C" fn ovb_upload_model_to_device(index: c_int) -> *const c_char {
    let status = guarded(|state| {
        let index = non_negative("device index", index)?;
        let device = bridge_mut(state)?.select_device(index)?.to_string();
        state.current_device = Some(to_cstring(&device));
        Ok(())
    });
    if status != OVB_OK {
        return std::ptr::null();
    }
    as_ptr(&STATE.lock().current_device)
}

/// Run inference in place over `len` bytes of RGBA pixels at `data`.
///
/// # Safety
/// `data` must point to `len` writable bytes that stay valid for the call.
#[no_mangle]
pub unsafe extern "C" fn ovb_perform_inference(data: *mut u8, len: usize) -> c_int {
    if data.is_null() {
        return OVB_INVALID_ARGUMENT;
    }
    let pixels = std::slice::from_raw_parts_mut(data, len);
    guarded(|state| bridge_mut(state)?.run(pixels))
}

/// Description of the last error, or an empty string
#[no_mangle]
pub extern "C" fn ovb_last_error() -> *const c_char {
    as_ptr(&STATE.lock().last_error)
}

/// Drop the bridge and release the runtime
#[no_mangle]
pub extern "C" fn ovb_shutdown() {
    let _ = catch_unwind(|| {
        let mut state = STATE.lock();
        state.bridge = None;
        state.devices = None;
        state.current_device = None;
    });
}
