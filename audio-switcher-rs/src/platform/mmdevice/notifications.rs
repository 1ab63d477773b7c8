//! Endpoint change notifications using IMMNotificationClient.
//!
//! Maps endpoint callbacks onto the three property topics and invokes the
//! registered listener. Runs on an MMDevice API worker thread.

use super::ListenerTable;
use crate::audio::PropertyTopic;
use std::sync::Arc;
use windows::core::{implement, PCWSTR};
use windows::Win32::Media::Audio::{
    eCapture, eConsole, eRender, EDataFlow, ERole, IMMNotificationClient,
    IMMNotificationClient_Impl, DEVICE_STATE,
};
use windows::Win32::UI::Shell::PropertiesSystem::PROPERTYKEY;
// Re-export windows_core so the implement macro can find it
#[allow(unused_imports)]
use windows_core;

/// Notification client forwarding to the listener table.
#[implement(IMMNotificationClient)]
pub struct NotificationClient {
    listeners: Arc<ListenerTable>,
}

impl NotificationClient {
    pub fn new(listeners: Arc<ListenerTable>) -> Self {
        Self { listeners }
    }

    fn notify(&self, topic: PropertyTopic) {
        // Clone out so the callback never runs under the table lock.
        let callback = self.listeners.lock()[topic.index()].clone();
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl IMMNotificationClient_Impl for NotificationClient_Impl {
    fn OnDeviceStateChanged(
        &self,
        _pwstrdeviceid: &PCWSTR,
        _dwnewstate: DEVICE_STATE,
    ) -> windows::core::Result<()> {
        self.notify(PropertyTopic::Devices);
        Ok(())
    }

    fn OnDeviceAdded(&self, _pwstrdeviceid: &PCWSTR) -> windows::core::Result<()> {
        self.notify(PropertyTopic::Devices);
        Ok(())
    }

    fn OnDeviceRemoved(&self, _pwstrdeviceid: &PCWSTR) -> windows::core::Result<()> {
        self.notify(PropertyTopic::Devices);
        Ok(())
    }

    fn OnDefaultDeviceChanged(
        &self,
        flow: EDataFlow,
        role: ERole,
        _pwstrdefaultdeviceid: &PCWSTR,
    ) -> windows::core::Result<()> {
        // Defaults are read and written for the Console role only
        if role != eConsole {
            return Ok(());
        }

        if flow == eCapture {
            self.notify(PropertyTopic::DefaultInput);
        } else if flow == eRender {
            self.notify(PropertyTopic::DefaultOutput);
        }
        Ok(())
    }

    fn OnPropertyValueChanged(
        &self,
        _pwstrdeviceid: &PCWSTR,
        _key: &PROPERTYKEY,
    ) -> windows::core::Result<()> {
        Ok(())
    }
}

