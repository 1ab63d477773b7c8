//! Windows Registry selection store.
//!
//! Persists the four selection slots as DWORD values under
//! `HKEY_CURRENT_USER\Software\AudioSwitcher`.

use crate::audio::Direction;
use crate::store::{slot_names, PersistedSelection, SelectionStore, StoreError};
use windows::core::PCWSTR;
use windows::Win32::Foundation::ERROR_FILE_NOT_FOUND;
use windows::Win32::System::Registry::{
    RegCloseKey, RegCreateKeyExW, RegOpenKeyExW, RegQueryValueExW, RegSetValueExW, HKEY,
    HKEY_CURRENT_USER, KEY_READ, KEY_WRITE, REG_CREATE_KEY_DISPOSITION, REG_DWORD,
    REG_OPTION_NON_VOLATILE,
};

/// Registry-based selection store.
pub struct RegistryStore {
    app_key_path: Vec<u16>,
}

impl RegistryStore {
    const APP_KEY: &'static str = r"Software\AudioSwitcher";

    /// Create a new RegistryStore instance.
    pub fn new() -> Self {
        Self {
            app_key_path: Self::to_wide(Self::APP_KEY),
        }
    }

    fn to_wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    /// Read a DWORD slot. A missing key or value reads as 0.
    fn read_dword(&self, name: &str) -> Result<u32, StoreError> {
        unsafe {
            let mut hkey = HKEY::default();
            let result = RegOpenKeyExW(
                HKEY_CURRENT_USER,
                PCWSTR::from_raw(self.app_key_path.as_ptr()),
                0,
                KEY_READ,
                &mut hkey,
            );

            if result.is_err() {
                return Ok(0);
            }

            let value_name = Self::to_wide(name);
            let mut data: u32 = 0;
            let mut data_size = std::mem::size_of::<u32>() as u32;

            let result = RegQueryValueExW(
                hkey,
                PCWSTR::from_raw(value_name.as_ptr()),
                None,
                None,
                Some(&mut data as *mut u32 as *mut u8),
                Some(&mut data_size),
            );

            let _ = RegCloseKey(hkey);

            if result.is_ok() {
                Ok(data)
            } else if result == ERROR_FILE_NOT_FOUND {
                Ok(0)
            } else {
                Err(StoreError::ReadFailed {
                    key: name.to_string(),
                })
            }
        }
    }

    fn write_dword(&self, name: &str, data: u32) -> Result<(), StoreError> {
        unsafe {
            let mut hkey = HKEY::default();
            let mut disposition = REG_CREATE_KEY_DISPOSITION::default();

            let result = RegCreateKeyExW(
                HKEY_CURRENT_USER,
                PCWSTR::from_raw(self.app_key_path.as_ptr()),
                0,
                PCWSTR::null(),
                REG_OPTION_NON_VOLATILE,
                KEY_WRITE,
                None,
                &mut hkey,
                Some(&mut disposition),
            );

            if result.is_err() {
                return Err(StoreError::WriteFailed {
                    key: name.to_string(),
                });
            }

            let value_name = Self::to_wide(name);
            let result = RegSetValueExW(
                hkey,
                PCWSTR::from_raw(value_name.as_ptr()),
                0,
                REG_DWORD,
                Some(std::slice::from_raw_parts(
                    &data as *const u32 as *const u8,
                    std::mem::size_of::<u32>(),
                )),
            );

            let _ = RegCloseKey(hkey);

            if result.is_err() {
                Err(StoreError::WriteFailed {
                    key: name.to_string(),
                })
            } else {
                Ok(())
            }
        }
    }
}

impl Default for RegistryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionStore for RegistryStore {
    fn load(&self, direction: Direction) -> Result<PersistedSelection, StoreError> {
        let (id_slot, count_slot) = slot_names(direction);
        let id = self.read_dword(id_slot)?;
        let count = self.read_dword(count_slot)?;
        Ok(PersistedSelection::from_slots(id, u64::from(count)))
    }

    fn save(
        &mut self,
        direction: Direction,
        selection: &PersistedSelection,
    ) -> Result<(), StoreError> {
        let (id_slot, count_slot) = slot_names(direction);
        let (id, count) = selection.to_slots();
        self.write_dword(id_slot, id)?;
        self.write_dword(count_slot, u32::try_from(count).unwrap_or(u32::MAX))
    }
}
