//! Platform backends.
//!
//! Windows gets a native audio system on the MMDevice API and a registry
//! store. Elsewhere there is no native audio system; the selection store
//! falls back to a JSON file.

#[cfg(windows)]
pub mod mmdevice;
#[cfg(windows)]
pub mod registry;

use crate::audio::{AudioError, AudioSystem};
use crate::store::{FileStore, SelectionStore, StoreError};
use std::path::PathBuf;
use std::sync::Arc;

#[cfg(windows)]
pub use mmdevice::{ComGuard, WindowsAudioSystem};
#[cfg(windows)]
pub use registry::RegistryStore;

/// The audio subsystem of the running OS.
pub fn native_audio_system() -> Result<Arc<dyn AudioSystem>, AudioError> {
    #[cfg(windows)]
    {
        Ok(Arc::new(WindowsAudioSystem::new()?))
    }
    #[cfg(not(windows))]
    {
        Err(AudioError::Unsupported)
    }
}

/// Selection store: the JSON file at `path` if given, else the platform
/// default (registry on Windows, config-dir file elsewhere).
pub fn selection_store(path: Option<PathBuf>) -> Result<Box<dyn SelectionStore>, StoreError> {
    if let Some(path) = path {
        return Ok(Box::new(FileStore::open(path)?));
    }

    #[cfg(windows)]
    {
        Ok(Box::new(RegistryStore::new()))
    }
    #[cfg(not(windows))]
    {
        Ok(Box::new(FileStore::open(FileStore::default_path()?)?))
    }
}
