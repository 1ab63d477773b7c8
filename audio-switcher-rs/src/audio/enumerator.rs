//! Device enumeration.
//!
//! Builds a fresh snapshot of every device the subsystem reports, with its
//! name, direction and whether it is the current default for that direction.

use super::device::{AudioDevice, AudioError, DeviceId, Direction, StreamSide};
use super::system::AudioSystem;
use tracing::{debug, warn};

/// Device enumerator over an [`AudioSystem`].
pub struct DeviceEnumerator<'a> {
    system: &'a dyn AudioSystem,
}

impl<'a> DeviceEnumerator<'a> {
    pub fn new(system: &'a dyn AudioSystem) -> Self {
        Self { system }
    }

    /// Get all devices as a single synchronous snapshot.
    ///
    /// A device whose name, stream configuration or default lookup fails is
    /// left out; the rest are still returned. If the device list itself
    /// cannot be read the result is empty.
    pub fn list_devices(&self) -> Vec<AudioDevice> {
        let ids = match self.system.device_ids() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Device list query failed");
                return Vec::new();
            }
        };

        let mut defaults = DefaultsSnapshot::default();
        let mut devices = Vec::with_capacity(ids.len());

        for id in ids {
            match self.describe(id, &mut defaults) {
                Ok(device) => devices.push(device),
                Err(e) => debug!(device_id = %id, error = %e, "Dropping device from enumeration"),
            }
        }

        devices
    }

    /// Devices of one direction, in enumeration order.
    pub fn list_devices_for(&self, direction: Direction) -> Vec<AudioDevice> {
        self.list_devices()
            .into_iter()
            .filter(|d| d.direction == direction)
            .collect()
    }

    fn describe(
        &self,
        id: DeviceId,
        defaults: &mut DefaultsSnapshot,
    ) -> Result<AudioDevice, AudioError> {
        let name = self.system.device_name(id)?;
        let output_channels = self.system.channel_count(id, StreamSide::Output)?;
        let direction = Direction::classify(output_channels);
        let current_default = defaults.get(self.system, direction)?;

        Ok(AudioDevice {
            id,
            direction,
            name,
            is_current_default: current_default == Some(id),
        })
    }
}

/// Per-call cache of the default lookups so every device in one snapshot is
/// compared against the same default.
#[derive(Default)]
struct DefaultsSnapshot {
    input: Option<Option<DeviceId>>,
    output: Option<Option<DeviceId>>,
}

impl DefaultsSnapshot {
    fn get(
        &mut self,
        system: &dyn AudioSystem,
        direction: Direction,
    ) -> Result<Option<DeviceId>, AudioError> {
        let slot = match direction {
            Direction::Input => &mut self.input,
            Direction::Output => &mut self.output,
        };

        if let Some(cached) = slot {
            return Ok(*cached);
        }

        let current = system.default_device(direction)?;
        *slot = Some(current);
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::MockAudioSystem;

    fn five_devices() -> MockAudioSystem {
        let system = MockAudioSystem::new()
            .with_device(1, "Built-in Microphone", 2, 0)
            .with_device(2, "Built-in Speakers", 0, 2)
            .with_device(3, "USB Headset Mic", 1, 0)
            .with_device(4, "USB Headset", 0, 2)
            .with_device(5, "HDMI Display", 0, 8);
        system.set_system_default(Direction::Input, Some(1));
        system.set_system_default(Direction::Output, Some(4));
        system
    }

    #[test]
    fn test_list_devices_classifies_and_marks_defaults() {
        let system = five_devices();
        let devices = DeviceEnumerator::new(&system).list_devices();

        assert_eq!(devices.len(), 5);
        let mic = devices.iter().find(|d| d.id == DeviceId(1)).unwrap();
        assert_eq!(mic.direction, Direction::Input);
        assert_eq!(mic.name, "Built-in Microphone");
        assert!(mic.is_current_default);

        let headset = devices.iter().find(|d| d.id == DeviceId(4)).unwrap();
        assert_eq!(headset.direction, Direction::Output);
        assert!(headset.is_current_default);

        let speakers = devices.iter().find(|d| d.id == DeviceId(2)).unwrap();
        assert!(!speakers.is_current_default);
    }

    #[test]
    fn test_at_most_one_default_per_direction() {
        let system = five_devices();
        let devices = DeviceEnumerator::new(&system).list_devices();

        for direction in Direction::ALL {
            let defaults = devices
                .iter()
                .filter(|d| d.direction == direction && d.is_current_default)
                .count();
            assert_eq!(defaults, 1, "{direction} should have exactly one default");
        }
    }

    #[test]
    fn test_no_default_marks_nothing() {
        let system = five_devices();
        system.set_system_default(Direction::Output, None);

        let outputs = DeviceEnumerator::new(&system).list_devices_for(Direction::Output);
        assert_eq!(outputs.len(), 3);
        assert!(outputs.iter().all(|d| !d.is_current_default));
    }

    #[test]
    fn test_failed_name_query_drops_only_that_device() {
        let system = five_devices();
        system.fail_device_name(3);

        let devices = DeviceEnumerator::new(&system).list_devices();
        let ids: Vec<u32> = devices.iter().map(|d| d.id.raw()).collect();
        assert_eq!(ids, vec![1, 2, 4, 5]);
    }

    #[test]
    fn test_failed_channel_query_drops_only_that_device() {
        let system = five_devices();
        system.fail_channel_count(5);

        let devices = DeviceEnumerator::new(&system).list_devices();
        assert_eq!(devices.len(), 4);
        assert!(devices.iter().all(|d| d.id != DeviceId(5)));
    }

    #[test]
    fn test_failed_device_list_returns_empty() {
        let system = five_devices();
        system.fail_enumeration(true);

        assert!(DeviceEnumerator::new(&system).list_devices().is_empty());
    }

    #[test]
    fn test_silent_device_is_classified_as_input() {
        // No channels on either side: the output-channel rule files it
        // under Input. Kept as observed behavior pending clarification.
        let system = MockAudioSystem::new().with_device(10, "Virtual Null Device", 0, 0);

        let devices = DeviceEnumerator::new(&system).list_devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].direction, Direction::Input);
    }
}
