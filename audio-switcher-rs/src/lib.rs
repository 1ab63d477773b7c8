//! Audio Switcher - Library
//!
//! Keeps the user's chosen default audio input and output devices in place.
//!
//! ## Features
//!
//! - Enumerate audio devices with their direction and default state
//! - Read and set the system default device per direction
//! - Listen for device hot-plug and default-change notifications
//! - Detect when something else overrides the chosen default and switch it
//!   back, counting each correction
//! - Persist the choice across restarts (registry on Windows, JSON file
//!   elsewhere)

pub mod audio;
pub mod platform;
pub mod service;
pub mod store;

pub use audio::{
    AudioDevice, AudioError, AudioSystem, DeviceEnumerator, DeviceEvent, DeviceId, Direction,
    MockAudioSystem, ReconcileOutcome,
};
pub use service::{AudioService, ServiceConfig};
pub use store::{FileStore, MemoryStore, PersistedSelection, SelectionStore, StoreError};
