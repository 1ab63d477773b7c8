//! Reading and writing the system-wide default device per direction.

use super::device::{AudioError, DeviceId, Direction};
use super::system::AudioSystem;
use tracing::{debug, warn};

/// Default device accessor over an [`AudioSystem`].
///
/// Writes are a single best-effort call. Failures are returned to the
/// caller and never retried here.
pub struct DefaultDeviceAccessor<'a> {
    system: &'a dyn AudioSystem,
}

impl<'a> DefaultDeviceAccessor<'a> {
    pub fn new(system: &'a dyn AudioSystem) -> Self {
        Self { system }
    }

    /// Current default for `direction`, `None` if the system has none.
    pub fn get_default(&self, direction: Direction) -> Result<Option<DeviceId>, AudioError> {
        self.system.default_device(direction)
    }

    /// Make `id` the default for `direction`. The other direction is untouched.
    pub fn set_default(&self, direction: Direction, id: DeviceId) -> Result<(), AudioError> {
        match self.system.set_default_device(direction, id) {
            Ok(()) => {
                debug!(%direction, device_id = %id, "Default device set");
                Ok(())
            }
            Err(e) => {
                warn!(%direction, device_id = %id, error = %e, "Setting default device failed");
                Err(e)
            }
        }
    }
}
