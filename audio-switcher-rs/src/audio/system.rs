//! The seam between the core and the operating system's audio subsystem.
//!
//! Backends translate their native failure signaling into [`AudioError`]
//! and their "no device" sentinels into `None` at this boundary.

use super::device::{AudioError, DeviceId, Direction, StreamSide};
use std::sync::Arc;

/// Hardware property-change topics a listener can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyTopic {
    /// The set of connected devices changed
    Devices,
    DefaultInput,
    DefaultOutput,
}

impl PropertyTopic {
    pub const ALL: [PropertyTopic; 3] = [
        PropertyTopic::Devices,
        PropertyTopic::DefaultInput,
        PropertyTopic::DefaultOutput,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PropertyTopic::Devices => "device list",
            PropertyTopic::DefaultInput => "default input",
            PropertyTopic::DefaultOutput => "default output",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            PropertyTopic::Devices => 0,
            PropertyTopic::DefaultInput => 1,
            PropertyTopic::DefaultOutput => 2,
        }
    }
}

/// Zero-payload change callback. Runs on a thread owned by the backend.
pub type ListenerCallback = Arc<dyn Fn() + Send + Sync>;

/// Operations the core consumes from the OS audio subsystem.
///
/// Every call is synchronous and may block briefly. None of them may be
/// invoked from inside a [`ListenerCallback`].
pub trait AudioSystem: Send + Sync {
    /// Ids of every hardware device currently known to the subsystem.
    fn device_ids(&self) -> Result<Vec<DeviceId>, AudioError>;

    fn device_name(&self, id: DeviceId) -> Result<String, AudioError>;

    /// Total channel count across all streams on one side of a device.
    fn channel_count(&self, id: DeviceId, side: StreamSide) -> Result<u32, AudioError>;

    /// Current system default for a direction, `None` if there is none.
    fn default_device(&self, direction: Direction) -> Result<Option<DeviceId>, AudioError>;

    fn set_default_device(&self, direction: Direction, id: DeviceId) -> Result<(), AudioError>;

    /// Register the callback for a topic. Fails with
    /// [`AudioError::AlreadySubscribed`] if the topic already has one.
    fn add_listener(&self, topic: PropertyTopic, callback: ListenerCallback)
        -> Result<(), AudioError>;

    /// Remove the callback for a topic. Removing an absent listener is a no-op.
    fn remove_listener(&self, topic: PropertyTopic) -> Result<(), AudioError>;
}

