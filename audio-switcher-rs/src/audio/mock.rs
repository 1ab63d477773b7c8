//! In-memory audio subsystem for testing without hardware.

use super::device::{AudioError, DeviceId, Direction, StreamSide};
use super::system::{AudioSystem, ListenerCallback, PropertyTopic};
use parking_lot::Mutex;
use std::collections::HashSet;

/// A scriptable stand-in for the OS audio subsystem.
///
/// Devices, defaults and failures are set up by the test; listener
/// callbacks are invoked with [`MockAudioSystem::fire`] the way the OS would
/// invoke them from its own thread.
///
/// # Example
///
/// ```
/// use audio_switcher::audio::{DeviceEnumerator, Direction, MockAudioSystem};
///
/// let system = MockAudioSystem::new()
///     .with_device(1, "Built-in Microphone", 2, 0)
///     .with_device(2, "Built-in Speakers", 0, 2);
/// system.set_system_default(Direction::Output, Some(2));
///
/// let devices = DeviceEnumerator::new(&system).list_devices();
/// assert_eq!(devices.len(), 2);
/// ```
#[derive(Default)]
pub struct MockAudioSystem {
    state: Mutex<MockState>,
    listeners: Mutex<[Option<ListenerCallback>; 3]>,
}

#[derive(Default)]
struct MockState {
    devices: Vec<MockDevice>,
    default_input: Option<DeviceId>,
    default_output: Option<DeviceId>,
    failing_names: HashSet<DeviceId>,
    failing_channels: HashSet<DeviceId>,
    fail_enumeration: bool,
    fail_get_default: bool,
    fail_set_default: bool,
    echo_default_changes: bool,
    failing_topic: Option<PropertyTopic>,
    failing_removal: Option<PropertyTopic>,
    set_default_calls: Vec<(Direction, DeviceId)>,
    registrations: usize,
}

struct MockDevice {
    id: DeviceId,
    name: String,
    input_channels: u32,
    output_channels: u32,
}

impl MockAudioSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`MockAudioSystem::add_device`].
    pub fn with_device(self, id: u32, name: &str, input_channels: u32, output_channels: u32) -> Self {
        self.add_device(id, name, input_channels, output_channels);
        self
    }

    /// Connect a device. Does not raise any listener.
    pub fn add_device(&self, id: u32, name: &str, input_channels: u32, output_channels: u32) {
        self.state.lock().devices.push(MockDevice {
            id: DeviceId(id),
            name: name.to_string(),
            input_channels,
            output_channels,
        });
    }

    /// Disconnect a device. A default pointing at it is cleared, as the OS
    /// would fall back to nothing until it picks a new one.
    pub fn remove_device(&self, id: u32) {
        let id = DeviceId(id);
        let mut state = self.state.lock();
        state.devices.retain(|d| d.id != id);
        if state.default_input == Some(id) {
            state.default_input = None;
        }
        if state.default_output == Some(id) {
            state.default_output = None;
        }
    }

    /// Change the system default behind the core's back, without a signal.
    pub fn set_system_default(&self, direction: Direction, id: Option<u32>) {
        let id = id.map(DeviceId);
        let mut state = self.state.lock();
        match direction {
            Direction::Input => state.default_input = id,
            Direction::Output => state.default_output = id,
        }
    }

    pub fn system_default(&self, direction: Direction) -> Option<DeviceId> {
        let state = self.state.lock();
        match direction {
            Direction::Input => state.default_input,
            Direction::Output => state.default_output,
        }
    }

    pub fn fail_device_name(&self, id: u32) {
        self.state.lock().failing_names.insert(DeviceId(id));
    }

    pub fn fail_channel_count(&self, id: u32) {
        self.state.lock().failing_channels.insert(DeviceId(id));
    }

    pub fn fail_enumeration(&self, fail: bool) {
        self.state.lock().fail_enumeration = fail;
    }

    pub fn fail_get_default(&self, fail: bool) {
        self.state.lock().fail_get_default = fail;
    }

    pub fn fail_set_default(&self, fail: bool) {
        self.state.lock().fail_set_default = fail;
    }

    /// Raise the default-changed listener after every successful
    /// `set_default_device`, as the OS does.
    pub fn echo_default_changes(&self, echo: bool) {
        self.state.lock().echo_default_changes = echo;
    }

    /// Make registration for one topic fail.
    pub fn fail_listener(&self, topic: PropertyTopic) {
        self.state.lock().failing_topic = Some(topic);
    }

    /// Make removal for one topic fail; its listener stays registered.
    pub fn fail_remove_listener(&self, topic: PropertyTopic) {
        self.state.lock().failing_removal = Some(topic);
    }

    /// Every `set_default_device` call received, successful or not.
    pub fn set_default_calls(&self) -> Vec<(Direction, DeviceId)> {
        self.state.lock().set_default_calls.clone()
    }

    pub fn clear_set_default_calls(&self) {
        self.state.lock().set_default_calls.clear();
    }

    /// Number of topics with a registered listener right now.
    pub fn active_listeners(&self) -> usize {
        self.listeners.lock().iter().filter(|l| l.is_some()).count()
    }

    /// Number of successful `add_listener` calls over the mock's lifetime.
    pub fn total_registrations(&self) -> usize {
        self.state.lock().registrations
    }

    /// Invoke the listener for a topic, as the OS would from its own thread.
    /// Returns `false` if nothing is registered.
    pub fn fire(&self, topic: PropertyTopic) -> bool {
        let callback = self.listeners.lock()[topic.index()].clone();
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Emulate another actor moving the default: change it and raise the
    /// matching default-changed listener.
    pub fn override_default(&self, direction: Direction, id: u32) {
        self.set_system_default(direction, Some(id));
        self.fire(Self::default_topic(direction));
    }

    fn default_topic(direction: Direction) -> PropertyTopic {
        match direction {
            Direction::Input => PropertyTopic::DefaultInput,
            Direction::Output => PropertyTopic::DefaultOutput,
        }
    }
}

impl AudioSystem for MockAudioSystem {
    fn device_ids(&self) -> Result<Vec<DeviceId>, AudioError> {
        let state = self.state.lock();
        if state.fail_enumeration {
            return Err(AudioError::EnumerationFailed("device list unavailable".to_string()));
        }
        Ok(state.devices.iter().map(|d| d.id).collect())
    }

    fn device_name(&self, id: DeviceId) -> Result<String, AudioError> {
        let state = self.state.lock();
        if state.failing_names.contains(&id) {
            return Err(AudioError::DeviceQueryFailed {
                device_id: id,
                property: "name",
                reason: "property unavailable".to_string(),
            });
        }
        state
            .devices
            .iter()
            .find(|d| d.id == id)
            .map(|d| d.name.clone())
            .ok_or(AudioError::DeviceNotFound { device_id: id })
    }

    fn channel_count(&self, id: DeviceId, side: StreamSide) -> Result<u32, AudioError> {
        let state = self.state.lock();
        if state.failing_channels.contains(&id) {
            return Err(AudioError::DeviceQueryFailed {
                device_id: id,
                property: "stream configuration",
                reason: "property unavailable".to_string(),
            });
        }
        let device = state
            .devices
            .iter()
            .find(|d| d.id == id)
            .ok_or(AudioError::DeviceNotFound { device_id: id })?;
        Ok(match side {
            StreamSide::Input => device.input_channels,
            StreamSide::Output => device.output_channels,
        })
    }

    fn default_device(&self, direction: Direction) -> Result<Option<DeviceId>, AudioError> {
        let state = self.state.lock();
        if state.fail_get_default {
            return Err(AudioError::GetDefaultFailed {
                direction,
                reason: "property unavailable".to_string(),
            });
        }
        Ok(match direction {
            Direction::Input => state.default_input,
            Direction::Output => state.default_output,
        })
    }

    fn set_default_device(&self, direction: Direction, id: DeviceId) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        state.set_default_calls.push((direction, id));

        if state.fail_set_default {
            return Err(AudioError::SetDefaultFailed {
                direction,
                device_id: id,
                reason: "rejected by subsystem".to_string(),
            });
        }
        if !state.devices.iter().any(|d| d.id == id) {
            return Err(AudioError::SetDefaultFailed {
                direction,
                device_id: id,
                reason: "device is not connected".to_string(),
            });
        }

        match direction {
            Direction::Input => state.default_input = Some(id),
            Direction::Output => state.default_output = Some(id),
        }

        let echo = state.echo_default_changes;
        drop(state);
        if echo {
            self.fire(Self::default_topic(direction));
        }
        Ok(())
    }

    fn add_listener(
        &self,
        topic: PropertyTopic,
        callback: ListenerCallback,
    ) -> Result<(), AudioError> {
        if self.state.lock().failing_topic == Some(topic) {
            return Err(AudioError::SubscriptionFailed(format!(
                "{} listener rejected",
                topic.name()
            )));
        }

        let mut listeners = self.listeners.lock();
        let slot = &mut listeners[topic.index()];
        if slot.is_some() {
            return Err(AudioError::AlreadySubscribed(topic.name()));
        }
        *slot = Some(callback);
        drop(listeners);

        self.state.lock().registrations += 1;
        Ok(())
    }

    fn remove_listener(&self, topic: PropertyTopic) -> Result<(), AudioError> {
        if self.state.lock().failing_removal == Some(topic) {
            return Err(AudioError::SubscriptionFailed(format!(
                "{} listener could not be removed",
                topic.name()
            )));
        }
        self.listeners.lock()[topic.index()] = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_set_then_get_round_trip() {
        let system = MockAudioSystem::new()
            .with_device(1, "Mic", 1, 0)
            .with_device(2, "Speakers", 0, 2);

        system.set_default_device(Direction::Output, DeviceId(2)).unwrap();
        assert_eq!(
            system.default_device(Direction::Output).unwrap(),
            Some(DeviceId(2))
        );
        assert_eq!(system.default_device(Direction::Input).unwrap(), None);
    }

    #[test]
    fn test_set_default_rejects_disconnected_device() {
        let system = MockAudioSystem::new().with_device(1, "Mic", 1, 0);
        assert!(system.set_default_device(Direction::Input, DeviceId(99)).is_err());
        assert_eq!(system.set_default_calls().len(), 1);
    }

    #[test]
    fn test_double_registration_is_rejected() {
        let system = MockAudioSystem::new();
        let noop: ListenerCallback = Arc::new(|| {});

        system.add_listener(PropertyTopic::Devices, noop.clone()).unwrap();
        let err = system.add_listener(PropertyTopic::Devices, noop).unwrap_err();
        assert!(matches!(err, AudioError::AlreadySubscribed(_)));
        assert_eq!(system.active_listeners(), 1);
    }

    #[test]
    fn test_fire_invokes_registered_callback() {
        let system = MockAudioSystem::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        system
            .add_listener(
                PropertyTopic::DefaultInput,
                Arc::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        assert!(system.fire(PropertyTopic::DefaultInput));
        assert!(!system.fire(PropertyTopic::DefaultOutput));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
