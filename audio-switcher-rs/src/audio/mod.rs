//! Audio device management core.
//!
//! Device enumeration, default-device access, change-listener subscription
//! and reconciliation of the live default against the persisted choice.

pub mod accessor;
pub mod device;
pub mod enumerator;
pub mod mock;
pub mod notifications;
pub mod reconciler;
pub mod system;

pub use accessor::DefaultDeviceAccessor;
pub use device::{
    AudioDevice, AudioError, DeviceEvent, DeviceId, Direction, ParseDirectionError, StreamSide,
};
pub use enumerator::DeviceEnumerator;
pub use mock::MockAudioSystem;
pub use notifications::{EventPoster, ListenerSubscription};
pub use reconciler::{ReconcileOutcome, Reconciler, ReconcilerState};
pub use system::{AudioSystem, ListenerCallback, PropertyTopic};
