//! FFI bindings for Audio Switcher.
//!
//! This crate provides C ABI functions for a native front end (menu bar or
//! tray). All functions use panic::catch_unwind to prevent Rust panics from
//! unwinding across the FFI boundary.

use audio_switcher::{
    platform, AudioDevice, AudioError, AudioService, AudioSystem, DeviceEvent, DeviceId,
    Direction, PersistedSelection, SelectionStore, ServiceConfig, StoreError,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::ffi::{c_char, c_void, CStr, CString};
use std::panic;
use std::path::PathBuf;
use std::ptr;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Error Handling
// ============================================================================

/// Error codes returned by FFI functions.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0,
    InvalidHandle = -1,
    InvalidArgument = -2,
    DeviceNotFound = -3,
    AudioSystemError = -4,
    JsonError = -5,
    StoreError = -6,
    SubscriptionFailed = -7,
    ServiceStopped = -8,
    Unsupported = -9,
    Panic = -99,
}

impl From<&AudioError> for ErrorCode {
    fn from(err: &AudioError) -> Self {
        match err {
            AudioError::DeviceNotFound { .. } => ErrorCode::DeviceNotFound,
            AudioError::SubscriptionFailed(_) | AudioError::AlreadySubscribed(_) => {
                ErrorCode::SubscriptionFailed
            }
            AudioError::Store(StoreError::Parse { .. }) => ErrorCode::JsonError,
            AudioError::Store(_) => ErrorCode::StoreError,
            AudioError::ServiceStopped => ErrorCode::ServiceStopped,
            AudioError::Unsupported => ErrorCode::Unsupported,
            _ => ErrorCode::AudioSystemError,
        }
    }
}

/// Failure carried out of a call body: the code plus a message for
/// audio_switcher_last_error_message().
type FfiError = (ErrorCode, String);

fn audio_failure(err: AudioError) -> FfiError {
    (ErrorCode::from(&err), err.to_string())
}

/// Thread-local storage for the last error.
thread_local! {
    static LAST_ERROR: RefCell<Option<FfiError>> = const { RefCell::new(None) };
}

fn set_last_error(code: ErrorCode, message: impl Into<String>) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = Some((code, message.into()));
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

// ============================================================================
// Data Types for JSON Serialization
// ============================================================================

/// Configuration for engine creation. Every field is optional.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Log filter used when RUST_LOG is not set
    #[serde(default)]
    pub log_level: Option<String>,

    /// Correct both directions once right after startup
    #[serde(default)]
    pub reconcile_on_start: bool,

    /// JSON file for the persisted selection; the platform store when absent
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    /// Queue change signals for audio_switcher_poll_event(). Off by default:
    /// the queue is unbounded and only drained by polling.
    #[serde(default)]
    pub poll_events: bool,
}

/// A device row for the selectable list.
#[derive(Debug, Serialize, Deserialize)]
pub struct AudioDeviceDto {
    pub id: u32,
    pub name: String,
    pub direction: Direction,
    pub is_default: bool,
}

impl From<AudioDevice> for AudioDeviceDto {
    fn from(device: AudioDevice) -> Self {
        Self {
            id: device.id.raw(),
            name: device.name,
            direction: device.direction,
            is_default: device.is_current_default,
        }
    }
}

/// Response containing a list of devices.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceListResponse {
    pub devices: Vec<AudioDeviceDto>,
}

/// Persisted choice for one direction, as shown in the About panel.
#[derive(Debug, Serialize, Deserialize)]
pub struct SelectionResponse {
    pub direction: Direction,
    pub target_device_id: Option<u32>,
    pub correction_count: u64,
}

impl SelectionResponse {
    fn new(direction: Direction, selection: PersistedSelection) -> Self {
        Self {
            direction,
            target_device_id: selection.target.map(DeviceId::raw),
            correction_count: selection.correction_count,
        }
    }
}

// ============================================================================
// Engine Handle Type
// ============================================================================

/// Opaque handle to the engine. Actually points to an Engine struct.
pub type AudioSwitcherHandle = *mut c_void;

/// Event codes returned by audio_switcher_poll_event().
pub const EVENT_NONE: i32 = 0;
pub const EVENT_DEVICES_CHANGED: i32 = 1;
pub const EVENT_INPUT_DEFAULT_CHANGED: i32 = 2;
pub const EVENT_OUTPUT_DEFAULT_CHANGED: i32 = 3;

/// Internal engine state: the running service plus, when polling is
/// enabled, the front end's view of its signal fan-out.
struct Engine {
    service: AudioService,
    events: Option<Mutex<Receiver<DeviceEvent>>>,
}

impl Engine {
    fn start(
        system: Arc<dyn AudioSystem>,
        store: Box<dyn SelectionStore>,
        config: &EngineConfig,
    ) -> Result<Self, AudioError> {
        let service = AudioService::start(
            system,
            store,
            ServiceConfig {
                reconcile_on_start: config.reconcile_on_start,
            },
        )?;
        let events = if config.poll_events {
            Some(Mutex::new(service.events()?))
        } else {
            None
        };
        Ok(Self { service, events })
    }

    fn into_handle(self) -> AudioSwitcherHandle {
        Box::into_raw(Box::new(self)) as AudioSwitcherHandle
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Allocate a C string from a Rust string. Caller must free with audio_switcher_free_string.
fn alloc_c_string(s: &str) -> *mut c_char {
    // Interior nul bytes cannot cross the boundary; drop them.
    let cleaned: Vec<u8> = s.bytes().filter(|&b| b != 0).collect();
    CString::new(cleaned).map_or(ptr::null_mut(), CString::into_raw)
}

/// Parse a C string to a Rust string slice.
unsafe fn parse_c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

/// Borrow the engine behind a handle.
unsafe fn engine<'a>(handle: AudioSwitcherHandle) -> Result<&'a Engine, FfiError> {
    (handle as *const Engine)
        .as_ref()
        .ok_or((ErrorCode::InvalidHandle, "Null engine handle".to_string()))
}

fn parse_direction(direction: u32) -> Result<Direction, FfiError> {
    match direction {
        0 => Ok(Direction::Input),
        1 => Ok(Direction::Output),
        other => Err((
            ErrorCode::InvalidArgument,
            format!("Invalid direction {other} (0 = input, 1 = output)"),
        )),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, FfiError> {
    serde_json::to_string(value).map_err(|e| (ErrorCode::JsonError, e.to_string()))
}

fn init_logging(level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or("info")));
    // A host that creates several engines keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Unwrap a string-returning call body, recording any failure.
fn string_result(
    result: std::thread::Result<Result<String, FfiError>>,
    context: &str,
) -> *mut c_char {
    match result {
        Ok(Ok(json)) => alloc_c_string(&json),
        Ok(Err((code, message))) => {
            set_last_error(code, message);
            ptr::null_mut()
        }
        Err(_) => {
            set_last_error(ErrorCode::Panic, format!("Panic during {context}"));
            ptr::null_mut()
        }
    }
}

/// Unwrap a status-returning call body, recording any failure.
fn status_result(result: std::thread::Result<Result<(), FfiError>>, context: &str) -> i32 {
    match result {
        Ok(Ok(())) => ErrorCode::Success as i32,
        Ok(Err((code, message))) => {
            set_last_error(code, message);
            code as i32
        }
        Err(_) => {
            set_last_error(ErrorCode::Panic, format!("Panic during {context}"));
            ErrorCode::Panic as i32
        }
    }
}

// ============================================================================
// FFI Functions - Lifecycle
// ============================================================================

/// Create a new engine: opens the selection store, starts the audio
/// service and registers the change listeners.
///
/// # Arguments
/// * `config_json` - JSON configuration string (can be null for defaults)
///
/// # Returns
/// Handle to the engine, or null on failure. Check audio_switcher_last_error_code() on failure.
///
/// # Safety
/// The returned handle must be freed with audio_switcher_destroy().
#[no_mangle]
pub extern "C" fn audio_switcher_create(config_json: *const c_char) -> AudioSwitcherHandle {
    clear_last_error();

    let result = panic::catch_unwind(|| -> Result<AudioSwitcherHandle, FfiError> {
        let config = match unsafe { parse_c_str(config_json) } {
            Some(json) => serde_json::from_str::<EngineConfig>(json)
                .map_err(|e| (ErrorCode::JsonError, format!("Invalid engine config: {e}")))?,
            None if config_json.is_null() => EngineConfig::default(),
            None => {
                return Err((
                    ErrorCode::InvalidArgument,
                    "Engine config is not valid UTF-8".to_string(),
                ))
            }
        };

        init_logging(config.log_level.as_deref());

        let system = platform::native_audio_system().map_err(audio_failure)?;
        let store = platform::selection_store(config.store_path.clone())
            .map_err(|e| audio_failure(AudioError::from(e)))?;
        let engine = Engine::start(system, store, &config).map_err(audio_failure)?;

        info!(version = env!("CARGO_PKG_VERSION"), "Engine created");
        Ok(engine.into_handle())
    });

    match result {
        Ok(Ok(handle)) => handle,
        Ok(Err((code, message))) => {
            warn!(error = %message, "Engine creation failed");
            set_last_error(code, message);
            ptr::null_mut()
        }
        Err(_) => {
            set_last_error(ErrorCode::Panic, "Panic during engine creation");
            ptr::null_mut()
        }
    }
}

/// Destroy an engine instance. Listeners are unregistered before this returns.
///
/// # Safety
/// The handle must have been created by audio_switcher_create() and must not be used after this call.
#[no_mangle]
pub extern "C" fn audio_switcher_destroy(handle: AudioSwitcherHandle) {
    if handle.is_null() {
        return;
    }

    let _ = panic::catch_unwind(|| {
        let engine = unsafe { *Box::from_raw(handle as *mut Engine) };
        if let Err(e) = engine.service.stop() {
            warn!(error = %e, "Engine teardown incomplete");
        }
    });
}

// ============================================================================
// FFI Functions - Device Operations
// ============================================================================

/// Get all devices with their direction and default state.
///
/// # Returns
/// JSON string containing the device list. Caller must free with audio_switcher_free_string().
/// Returns null on failure.
#[no_mangle]
pub extern "C" fn audio_switcher_get_devices(handle: AudioSwitcherHandle) -> *mut c_char {
    clear_last_error();

    let result = panic::catch_unwind(|| {
        let engine = unsafe { engine(handle)? };
        let response = DeviceListResponse {
            devices: engine
                .service
                .list_devices()
                .into_iter()
                .map(Into::into)
                .collect(),
        };
        to_json(&response)
    });

    string_result(result, "device enumeration")
}

/// Get the current system default for a direction.
///
/// # Arguments
/// * `direction` - 0 = Input, 1 = Output
/// * `out_device_id` - Receives the device id, or 0 when there is no default
///
/// # Returns
/// 0 on success, negative error code on failure.
#[no_mangle]
pub extern "C" fn audio_switcher_get_default(
    handle: AudioSwitcherHandle,
    direction: u32,
    out_device_id: *mut u32,
) -> i32 {
    clear_last_error();

    let result = panic::catch_unwind(|| -> Result<(), FfiError> {
        let engine = unsafe { engine(handle)? };
        let direction = parse_direction(direction)?;
        if out_device_id.is_null() {
            return Err((ErrorCode::InvalidArgument, "Null output pointer".to_string()));
        }

        let current = engine
            .service
            .current_default(direction)
            .map_err(audio_failure)?;
        unsafe {
            *out_device_id = current.map_or(0, DeviceId::raw);
        }
        Ok(())
    });

    status_result(result, "get default device")
}

/// Make a device the system default and remember it as the user's choice.
///
/// Nothing is persisted when the system rejects the device.
///
/// # Arguments
/// * `device_id` - Device id from audio_switcher_get_devices()
/// * `direction` - 0 = Input, 1 = Output
///
/// # Returns
/// 0 on success, negative error code on failure.
#[no_mangle]
pub extern "C" fn audio_switcher_select_device(
    handle: AudioSwitcherHandle,
    device_id: u32,
    direction: u32,
) -> i32 {
    clear_last_error();

    let result = panic::catch_unwind(|| {
        let engine = unsafe { engine(handle)? };
        let direction = parse_direction(direction)?;
        let id = DeviceId::from_raw(device_id).ok_or((
            ErrorCode::InvalidArgument,
            "Device id 0 does not name a device".to_string(),
        ))?;

        engine
            .service
            .select_device(id, direction)
            .map_err(audio_failure)
    });

    status_result(result, "select device")
}

/// Get the persisted target and correction count for a direction.
///
/// # Returns
/// JSON string. Caller must free with audio_switcher_free_string().
/// Returns null on failure.
#[no_mangle]
pub extern "C" fn audio_switcher_get_selection(
    handle: AudioSwitcherHandle,
    direction: u32,
) -> *mut c_char {
    clear_last_error();

    let result = panic::catch_unwind(|| {
        let engine = unsafe { engine(handle)? };
        let direction = parse_direction(direction)?;
        let selection = engine
            .service
            .selection(direction)
            .map_err(audio_failure)?;
        to_json(&SelectionResponse::new(direction, selection))
    });

    string_result(result, "get selection")
}

/// Take the next pending change signal without blocking.
///
/// Signals are delivered after the engine has reconciled them, so a front
/// end can rebuild its device list straight away.
///
/// Requires `"poll_events": true` in the create config.
///
/// # Returns
/// One of the EVENT_* codes (EVENT_NONE when nothing is pending), or a
/// negative error code.
#[no_mangle]
pub extern "C" fn audio_switcher_poll_event(handle: AudioSwitcherHandle) -> i32 {
    clear_last_error();

    let result = panic::catch_unwind(|| -> Result<i32, FfiError> {
        let engine = unsafe { engine(handle)? };
        let events = engine.events.as_ref().ok_or((
            ErrorCode::InvalidArgument,
            "Event polling was not enabled at create".to_string(),
        ))?;
        let event = events.lock().try_recv();
        match event {
            Ok(DeviceEvent::DevicesChanged) => Ok(EVENT_DEVICES_CHANGED),
            Ok(DeviceEvent::InputDefaultChanged) => Ok(EVENT_INPUT_DEFAULT_CHANGED),
            Ok(DeviceEvent::OutputDefaultChanged) => Ok(EVENT_OUTPUT_DEFAULT_CHANGED),
            Err(TryRecvError::Empty) => Ok(EVENT_NONE),
            Err(TryRecvError::Disconnected) => Err(audio_failure(AudioError::ServiceStopped)),
        }
    });

    match result {
        Ok(Ok(event)) => event,
        Ok(Err((code, message))) => {
            set_last_error(code, message);
            code as i32
        }
        Err(_) => {
            set_last_error(ErrorCode::Panic, "Panic during poll event");
            ErrorCode::Panic as i32
        }
    }
}

// ============================================================================
// FFI Functions - Memory Management
// ============================================================================

/// Free a string allocated by this library.
///
/// # Safety
/// The pointer must have been returned by one of the audio_switcher_* functions.
/// Do not call this on strings from other sources.
#[no_mangle]
pub extern "C" fn audio_switcher_free_string(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }

    let _ = panic::catch_unwind(|| unsafe {
        let _ = CString::from_raw(ptr);
    });
}

// ============================================================================
// FFI Functions - Error Handling
// ============================================================================

/// Get the last error code.
///
/// # Returns
/// The error code from the last failed operation, or 0 if no error.
#[no_mangle]
pub extern "C" fn audio_switcher_last_error_code() -> i32 {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|(code, _)| *code as i32)
            .unwrap_or(0)
    })
}

/// Get the last error message.
///
/// # Returns
/// Error message string. Caller must free with audio_switcher_free_string().
/// Returns null if no error.
#[no_mangle]
pub extern "C" fn audio_switcher_last_error_message() -> *mut c_char {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|(_, msg)| alloc_c_string(msg))
            .unwrap_or(ptr::null_mut())
    })
}

// ============================================================================
// FFI Functions - Utility
// ============================================================================

/// Get the library version.
///
/// # Returns
/// Version string. Caller must free with audio_switcher_free_string().
#[no_mangle]
pub extern "C" fn audio_switcher_version() -> *mut c_char {
    alloc_c_string(env!("CARGO_PKG_VERSION"))
}

// ============================================================================
// Tests
// ============================================================================
