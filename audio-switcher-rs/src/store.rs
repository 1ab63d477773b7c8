//! Persisted device selection.
//!
//! One record per direction: the user's target device and how many times an
//! external override had to be corrected. Stored as four named integer
//! slots so every backend (file, registry) shares the same layout.

use crate::audio::{DeviceId, Direction};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Slot names, shared by every store backend.
pub const INPUT_DEVICE_ID: &str = "InputDeviceID";
pub const INPUT_DEVICE_COUNT: &str = "InputDeviceCount";
pub const OUTPUT_DEVICE_ID: &str = "OutputDeviceID";
pub const OUTPUT_DEVICE_COUNT: &str = "OutputDeviceCount";

/// Slot names `(target id, correction count)` for a direction.
pub fn slot_names(direction: Direction) -> (&'static str, &'static str) {
    match direction {
        Direction::Input => (INPUT_DEVICE_ID, INPUT_DEVICE_COUNT),
        Direction::Output => (OUTPUT_DEVICE_ID, OUTPUT_DEVICE_COUNT),
    }
}

/// The persisted choice for one direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSelection {
    /// Device the user wants as default, `None` for no preference
    pub target: Option<DeviceId>,

    /// Number of external overrides corrected back to `target`
    pub correction_count: u64,
}

impl PersistedSelection {
    /// Build from raw slot values; a zero id means no preference.
    pub fn from_slots(device_id: u32, count: u64) -> Self {
        Self {
            target: DeviceId::from_raw(device_id),
            correction_count: count,
        }
    }

    /// Raw slot values `(device id, count)`.
    pub fn to_slots(&self) -> (u32, u64) {
        (self.target.map_or(0, DeviceId::raw), self.correction_count)
    }
}

/// Selection store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid selection file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No configuration directory available")]
    NoConfigDir,

    #[error("Failed to read preference: {key}")]
    ReadFailed { key: String },

    #[error("Failed to write preference: {key}")]
    WriteFailed { key: String },
}

/// Durable key/value store holding one [`PersistedSelection`] per direction.
pub trait SelectionStore: Send {
    fn load(&self, direction: Direction) -> Result<PersistedSelection, StoreError>;

    fn save(
        &mut self,
        direction: Direction,
        selection: &PersistedSelection,
    ) -> Result<(), StoreError>;
}

/// Process-local store. Clones share the same slots.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slots: Arc<Mutex<SlotsDocument>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with the given records.
    pub fn with_selections(input: PersistedSelection, output: PersistedSelection) -> Self {
        let mut doc = SlotsDocument::default();
        doc.set(Direction::Input, &input);
        doc.set(Direction::Output, &output);
        Self {
            slots: Arc::new(Mutex::new(doc)),
        }
    }

    /// Read a record directly, bypassing any service.
    pub fn get(&self, direction: Direction) -> PersistedSelection {
        self.slots.lock().get(direction)
    }
}

impl SelectionStore for MemoryStore {
    fn load(&self, direction: Direction) -> Result<PersistedSelection, StoreError> {
        Ok(self.get(direction))
    }

    fn save(
        &mut self,
        direction: Direction,
        selection: &PersistedSelection,
    ) -> Result<(), StoreError> {
        self.slots.lock().set(direction, selection);
        Ok(())
    }
}

/// JSON file store, one small document holding the four slots.
///
/// Every load reads the file and every save rewrites it, so a second
/// process (a CLI selection next to a running service) sees current values.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    const APP_DIR: &'static str = "audio-switcher";
    const FILE_NAME: &'static str = "selection.json";

    /// Default location under the user's configuration directory.
    pub fn default_path() -> Result<PathBuf, StoreError> {
        dirs::config_dir()
            .map(|dir| dir.join(Self::APP_DIR).join(Self::FILE_NAME))
            .ok_or(StoreError::NoConfigDir)
    }

    /// Open the store at `path`, validating any existing file. A missing
    /// file reads as all-zero slots.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self { path: path.into() };
        store.read()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<SlotsDocument, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str(&text).map_err(|source| StoreError::Parse {
                path: self.path.clone(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SlotsDocument::default()),
            Err(source) => Err(StoreError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn write(&self, slots: &SlotsDocument) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let text = serde_json::to_string_pretty(slots).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;

        // Write-then-rename so a crash never leaves a truncated file behind.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

impl SelectionStore for FileStore {
    fn load(&self, direction: Direction) -> Result<PersistedSelection, StoreError> {
        Ok(self.read()?.get(direction))
    }

    fn save(
        &mut self,
        direction: Direction,
        selection: &PersistedSelection,
    ) -> Result<(), StoreError> {
        let mut slots = self.read()?;
        slots.set(direction, selection);
        self.write(&slots)
    }
}

/// On-disk layout of the four slots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct SlotsDocument {
    #[serde(rename = "InputDeviceID", default)]
    input_device_id: u32,
    #[serde(rename = "InputDeviceCount", default)]
    input_device_count: u64,
    #[serde(rename = "OutputDeviceID", default)]
    output_device_id: u32,
    #[serde(rename = "OutputDeviceCount", default)]
    output_device_count: u64,
}

impl SlotsDocument {
    fn get(&self, direction: Direction) -> PersistedSelection {
        match direction {
            Direction::Input => {
                PersistedSelection::from_slots(self.input_device_id, self.input_device_count)
            }
            Direction::Output => {
                PersistedSelection::from_slots(self.output_device_id, self.output_device_count)
            }
        }
    }

    fn set(&mut self, direction: Direction, selection: &PersistedSelection) {
        let (id, count) = selection.to_slots();
        match direction {
            Direction::Input => {
                self.input_device_id = id;
                self.input_device_count = count;
            }
            Direction::Output => {
                self.output_device_id = id;
                self.output_device_count = count;
            }
        }
    }
}
