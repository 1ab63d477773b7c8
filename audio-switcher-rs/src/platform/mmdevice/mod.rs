//! Windows backend on the MMDevice API.
//!
//! Render and capture endpoints are exposed as [`AudioSystem`] devices.
//! Endpoint id strings are hashed to stable [`DeviceId`]s so a persisted
//! target keeps pointing at the same endpoint across restarts.

mod notifications;
mod policy;

use crate::audio::{
    AudioError, AudioSystem, DeviceId, Direction, ListenerCallback, PropertyTopic, StreamSide,
};
use notifications::NotificationClient;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::Arc;
use tracing::debug;
use windows::core::{Interface, GUID, HRESULT, PCWSTR, PWSTR};
use windows::Win32::Media::Audio::{
    eAll, eCapture, eConsole, eRender, EDataFlow, IAudioClient, IMMDevice, IMMDeviceEnumerator,
    IMMEndpoint, IMMNotificationClient, MMDeviceEnumerator, DEVICE_STATE_ACTIVE, WAVEFORMATEX,
};
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoTaskMemFree, CoUninitialize, CLSCTX_ALL,
    COINIT_MULTITHREADED, STGM,
};
use windows::Win32::UI::Shell::PropertiesSystem::PROPERTYKEY;

// Property key for device friendly name
const PKEY_DEVICE_FRIENDLY_NAME: PROPERTYKEY = PROPERTYKEY {
    fmtid: GUID::from_u128(0xa45c254e_df1c_4efd_8020_67d146a850e0),
    pid: 14,
};

// HRESULT_FROM_WIN32(ERROR_NOT_FOUND): no default endpoint for the flow
const E_NOTFOUND: HRESULT = HRESULT(0x8007_0490_u32 as i32);

/// Listener slots shared with the notification client, one per topic.
pub(crate) type ListenerTable = Mutex<[Option<ListenerCallback>; 3]>;

/// COM initialization guard that uninitializes COM on drop.
///
/// A thread already initialized in another apartment keeps its apartment;
/// the guard then does nothing on drop.
pub struct ComGuard {
    initialized: bool,
}

impl ComGuard {
    pub fn new() -> Self {
        let initialized = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED).is_ok() };
        Self { initialized }
    }
}

impl Default for ComGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        if self.initialized {
            unsafe {
                CoUninitialize();
            }
        }
    }
}

/// Memory handed out by COM, freed with `CoTaskMemFree` on every exit path.
struct CoTaskMem(*mut c_void);

impl CoTaskMem {
    fn as_ptr<T>(&self) -> *const T {
        self.0 as *const T
    }
}

impl Drop for CoTaskMem {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { CoTaskMemFree(Some(self.0 as *const c_void)) };
        }
    }
}

/// Live notification registration. MMDevice objects are free-threaded.
struct Registration {
    enumerator: IMMDeviceEnumerator,
    client: IMMNotificationClient,
}

unsafe impl Send for Registration {}

/// [`AudioSystem`] backed by the Windows MMDevice API.
pub struct WindowsAudioSystem {
    /// Endpoint id strings (NUL-terminated UTF-16) by hashed device id
    endpoints: Mutex<HashMap<DeviceId, Vec<u16>>>,
    listeners: Arc<ListenerTable>,
    registration: Mutex<Option<Registration>>,
}

impl WindowsAudioSystem {
    /// Create the backend and check that the MMDevice API is reachable.
    pub fn new() -> Result<Self, AudioError> {
        let _com = ComGuard::new();
        Self::enumerator()?;

        Ok(Self {
            endpoints: Mutex::new(HashMap::new()),
            listeners: Arc::new(Mutex::new(Default::default())),
            registration: Mutex::new(None),
        })
    }

    fn enumerator() -> Result<IMMDeviceEnumerator, AudioError> {
        unsafe {
            CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                .map_err(|e| AudioError::EnumerationFailed(e.to_string()))
        }
    }

    fn flow(direction: Direction) -> EDataFlow {
        match direction {
            Direction::Input => eCapture,
            Direction::Output => eRender,
        }
    }

    /// Endpoint id string of a device, refreshing the table once if needed.
    fn endpoint_id(&self, id: DeviceId) -> Result<Vec<u16>, AudioError> {
        if let Some(wide) = self.endpoints.lock().get(&id) {
            return Ok(wide.clone());
        }
        self.device_ids()?;
        self.endpoints
            .lock()
            .get(&id)
            .cloned()
            .ok_or(AudioError::DeviceNotFound { device_id: id })
    }

    fn device(&self, id: DeviceId) -> Result<IMMDevice, AudioError> {
        let wide = self.endpoint_id(id)?;
        unsafe {
            Self::enumerator()?
                .GetDevice(PCWSTR(wide.as_ptr()))
                .map_err(|_| AudioError::DeviceNotFound { device_id: id })
        }
    }

    fn data_flow(device: &IMMDevice) -> windows::core::Result<EDataFlow> {
        unsafe { device.cast::<IMMEndpoint>()?.GetDataFlow() }
    }

    fn query_failed(id: DeviceId, property: &'static str) -> impl Fn(windows::core::Error) -> AudioError {
        move |e| AudioError::DeviceQueryFailed {
            device_id: id,
            property,
            reason: e.to_string(),
        }
    }

    fn ensure_registered(&self) -> Result<(), AudioError> {
        let mut registration = self.registration.lock();
        if registration.is_some() {
            return Ok(());
        }

        let enumerator = Self::enumerator()
            .map_err(|e| AudioError::SubscriptionFailed(e.to_string()))?;
        let client: IMMNotificationClient = NotificationClient::new(self.listeners.clone()).into();
        unsafe {
            enumerator
                .RegisterEndpointNotificationCallback(&client)
                .map_err(|e| AudioError::SubscriptionFailed(e.to_string()))?;
        }

        debug!("Endpoint notification client registered");
        *registration = Some(Registration { enumerator, client });
        Ok(())
    }

    fn release_registration(&self) -> Result<(), AudioError> {
        if let Some(Registration { enumerator, client }) = self.registration.lock().take() {
            unsafe {
                enumerator
                    .UnregisterEndpointNotificationCallback(&client)
                    .map_err(AudioError::WindowsError)?;
            }
            debug!("Endpoint notification client unregistered");
        }
        Ok(())
    }
}

/// Stable 32-bit key for an endpoint id string (FNV-1a). Never zero.
pub fn endpoint_key(endpoint_id: &str) -> DeviceId {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in endpoint_id.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    DeviceId(hash.max(1))
}

fn pwstr_to_string(id: PWSTR) -> Result<String, AudioError> {
    let _owned = CoTaskMem(id.0 as *mut c_void);
    unsafe { id.to_string() }.map_err(|e| AudioError::EnumerationFailed(e.to_string()))
}

impl AudioSystem for WindowsAudioSystem {
    fn device_ids(&self) -> Result<Vec<DeviceId>, AudioError> {
        let _com = ComGuard::new();
        let mut table = HashMap::new();

        unsafe {
            let collection = Self::enumerator()?
                .EnumAudioEndpoints(eAll, DEVICE_STATE_ACTIVE)
                .map_err(|e| AudioError::EnumerationFailed(e.to_string()))?;
            let count = collection
                .GetCount()
                .map_err(|e| AudioError::EnumerationFailed(e.to_string()))?;

            let mut ids = Vec::with_capacity(count as usize);
            for i in 0..count {
                let Ok(device) = collection.Item(i) else {
                    continue;
                };
                let Ok(raw) = device.GetId() else {
                    continue;
                };
                let Ok(endpoint) = pwstr_to_string(raw) else {
                    continue;
                };

                let id = endpoint_key(&endpoint);
                table.insert(
                    id,
                    endpoint.encode_utf16().chain(std::iter::once(0)).collect(),
                );
                ids.push(id);
            }

            *self.endpoints.lock() = table;
            Ok(ids)
        }
    }

    fn device_name(&self, id: DeviceId) -> Result<String, AudioError> {
        let _com = ComGuard::new();
        let device = self.device(id)?;

        unsafe {
            let store = device
                .OpenPropertyStore(STGM(0)) // STGM_READ = 0
                .map_err(Self::query_failed(id, "name"))?;
            let prop = store
                .GetValue(&PKEY_DEVICE_FRIENDLY_NAME)
                .map_err(Self::query_failed(id, "name"))?;

            let name = prop.to_string();
            if name.is_empty() {
                Ok("Unknown".to_string())
            } else {
                Ok(name)
            }
        }
    }

    fn channel_count(&self, id: DeviceId, side: StreamSide) -> Result<u32, AudioError> {
        let _com = ComGuard::new();
        let device = self.device(id)?;

        let flow = Self::data_flow(&device).map_err(Self::query_failed(id, "data flow"))?;
        let wanted = match side {
            StreamSide::Input => eCapture,
            StreamSide::Output => eRender,
        };
        if flow != wanted {
            return Ok(0);
        }

        unsafe {
            let client: IAudioClient = device
                .Activate(CLSCTX_ALL, None)
                .map_err(Self::query_failed(id, "stream configuration"))?;
            let format = CoTaskMem(
                client
                    .GetMixFormat()
                    .map_err(Self::query_failed(id, "stream configuration"))? as *mut c_void,
            );
            if format.0.is_null() {
                return Ok(0);
            }

            let format: WAVEFORMATEX = std::ptr::read_unaligned(format.as_ptr());
            Ok(u32::from(format.nChannels))
        }
    }

    fn default_device(&self, direction: Direction) -> Result<Option<DeviceId>, AudioError> {
        let _com = ComGuard::new();
        let failed = |e: windows::core::Error| AudioError::GetDefaultFailed {
            direction,
            reason: e.to_string(),
        };

        unsafe {
            let device = match Self::enumerator()?
                .GetDefaultAudioEndpoint(Self::flow(direction), eConsole)
            {
                Ok(d) => d,
                Err(e) if e.code() == E_NOTFOUND => return Ok(None),
                Err(e) => return Err(failed(e)),
            };

            let raw = device.GetId().map_err(failed)?;
            let endpoint = pwstr_to_string(raw)?;
            Ok(Some(endpoint_key(&endpoint)))
        }
    }

    fn set_default_device(&self, direction: Direction, id: DeviceId) -> Result<(), AudioError> {
        let _com = ComGuard::new();
        let failed = |reason: String| AudioError::SetDefaultFailed {
            direction,
            device_id: id,
            reason,
        };

        let wide = self.endpoint_id(id).map_err(|e| failed(e.to_string()))?;
        let device = self.device(id).map_err(|e| failed(e.to_string()))?;

        unsafe {
            let state = device.GetState().map_err(|e| failed(e.to_string()))?;
            if state != DEVICE_STATE_ACTIVE {
                return Err(failed("device is not connected".to_string()));
            }
        }
        let flow = Self::data_flow(&device).map_err(|e| failed(e.to_string()))?;
        if flow != Self::flow(direction) {
            return Err(failed(format!("endpoint is not an {direction} device")));
        }

        policy::set_default_endpoint(&wide).map_err(|e| failed(e.to_string()))
    }

    fn add_listener(
        &self,
        topic: PropertyTopic,
        callback: ListenerCallback,
    ) -> Result<(), AudioError> {
        let _com = ComGuard::new();
        {
            let mut listeners = self.listeners.lock();
            let slot = &mut listeners[topic.index()];
            if slot.is_some() {
                return Err(AudioError::AlreadySubscribed(topic.name()));
            }
            *slot = Some(callback);
        }

        if let Err(e) = self.ensure_registered() {
            self.listeners.lock()[topic.index()] = None;
            return Err(e);
        }
        Ok(())
    }

    fn remove_listener(&self, topic: PropertyTopic) -> Result<(), AudioError> {
        let _com = ComGuard::new();
        let now_empty = {
            let mut listeners = self.listeners.lock();
            listeners[topic.index()] = None;
            listeners.iter().all(Option::is_none)
        };

        if now_empty {
            self.release_registration()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_key_is_stable_and_nonzero() {
        let id = "{0.0.0.00000000}.{5e3c1a2b-1111-2222-3333-444455556666}";
        assert_eq!(endpoint_key(id), endpoint_key(id));
        assert_ne!(endpoint_key(id).raw(), 0);
        assert_ne!(endpoint_key(id), endpoint_key("{0.0.1.00000000}.{other}"));
    }

    #[test]
    fn test_endpoint_key_matches_fnv1a() {
        // FNV-1a("a") = 0xe40c292c
        assert_eq!(endpoint_key("a"), DeviceId(0xe40c_292c));
    }
}
