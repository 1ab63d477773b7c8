//! Audio device data models.
//!
//! Defines the identifiers, direction classification, device snapshots,
//! change signals and error types shared by the whole crate.

use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Opaque hardware device identifier.
///
/// Unique and stable while the device stays connected. The raw value `0`
/// never names a device; persisted selections use it for "no preference".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// Translate a raw persisted slot value into an optional id.
    pub fn from_raw(raw: u32) -> Option<Self> {
        (raw != 0).then_some(Self(raw))
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of a device, as far as default-device selection is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Input, Direction::Output];

    /// Classify a device from its output-side channel count.
    ///
    /// Any output channel makes it an output device. Everything else,
    /// including a device with no channels on either side, is an input.
    pub fn classify(output_channels: u32) -> Self {
        if output_channels > 0 {
            Direction::Output
        } else {
            Direction::Input
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }

    /// The change signal the OS raises when this direction's default moves.
    pub fn default_changed_event(&self) -> DeviceEvent {
        match self {
            Direction::Input => DeviceEvent::InputDefaultChanged,
            Direction::Output => DeviceEvent::OutputDefaultChanged,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a [`Direction`] from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid direction '{0}' (expected input or output)")]
pub struct ParseDirectionError(pub String);

impl FromStr for Direction {
    type Err = ParseDirectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "input" | "in" => Ok(Direction::Input),
            "output" | "out" => Ok(Direction::Output),
            _ => Err(ParseDirectionError(s.to_string())),
        }
    }
}

/// Stream side queried for a device's channel configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamSide {
    Input,
    Output,
}

/// A device as seen by a single enumeration pass.
///
/// Snapshots are built fresh on every call and never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDevice {
    pub id: DeviceId,

    pub direction: Direction,

    /// Human-readable device name
    pub name: String,

    /// Whether the OS currently routes this device's direction through it
    pub is_current_default: bool,
}

/// Application-level change signals. They carry no payload; consumers
/// re-query live state to find out what changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceEvent {
    /// A device was connected, disconnected or changed state
    DevicesChanged,

    /// The system default input device changed
    InputDefaultChanged,

    /// The system default output device changed
    OutputDefaultChanged,
}

impl DeviceEvent {
    /// Directions whose persisted choice must be re-checked after this signal.
    pub fn affected_directions(&self) -> &'static [Direction] {
        match self {
            DeviceEvent::DevicesChanged => &Direction::ALL,
            DeviceEvent::InputDefaultChanged => &[Direction::Input],
            DeviceEvent::OutputDefaultChanged => &[Direction::Output],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeviceEvent::DevicesChanged => "DevicesChanged",
            DeviceEvent::InputDefaultChanged => "InputDefaultChanged",
            DeviceEvent::OutputDefaultChanged => "OutputDefaultChanged",
        }
    }
}

/// Audio service error types.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Device not found: {device_id}")]
    DeviceNotFound { device_id: DeviceId },

    #[error("Failed to enumerate devices: {0}")]
    EnumerationFailed(String),

    #[error("Failed to query {property} of device {device_id}: {reason}")]
    DeviceQueryFailed {
        device_id: DeviceId,
        property: &'static str,
        reason: String,
    },

    #[error("Failed to read default {direction} device: {reason}")]
    GetDefaultFailed { direction: Direction, reason: String },

    #[error("Failed to set default {direction} device to {device_id}: {reason}")]
    SetDefaultFailed {
        direction: Direction,
        device_id: DeviceId,
        reason: String,
    },

    #[error("Failed to register change listeners: {0}")]
    SubscriptionFailed(String),

    #[error("A listener is already registered for {0}")]
    AlreadySubscribed(&'static str),

    #[error("Selection store error: {0}")]
    Store(#[from] StoreError),

    #[error("Audio service is not running")]
    ServiceStopped,

    #[error("Failed to start dispatcher thread: {0}")]
    DispatcherFailed(#[source] std::io::Error),

    #[error("No audio backend is available on this platform")]
    Unsupported,

    #[cfg(windows)]
    #[error("COM initialization failed: {0}")]
    ComInitFailed(#[source] windows::core::Error),

    #[cfg(windows)]
    #[error("Windows API error: {0}")]
    WindowsError(#[source] windows::core::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_output_channels() {
        assert_eq!(Direction::classify(2), Direction::Output);
        assert_eq!(Direction::classify(1), Direction::Output);
        assert_eq!(Direction::classify(0), Direction::Input);
    }

    #[test]
    fn test_zero_id_is_no_preference() {
        assert_eq!(DeviceId::from_raw(0), None);
        assert_eq!(DeviceId::from_raw(7), Some(DeviceId(7)));
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("Input".parse::<Direction>().unwrap(), Direction::Input);
        assert_eq!("out".parse::<Direction>().unwrap(), Direction::Output);
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn test_affected_directions() {
        assert_eq!(
            DeviceEvent::InputDefaultChanged.affected_directions(),
            &[Direction::Input]
        );
        assert_eq!(
            DeviceEvent::OutputDefaultChanged.affected_directions(),
            &[Direction::Output]
        );
        assert_eq!(DeviceEvent::DevicesChanged.affected_directions().len(), 2);
    }

    #[test]
    fn test_error_display() {
        let err = AudioError::SetDefaultFailed {
            direction: Direction::Output,
            device_id: DeviceId(9),
            reason: "stale id".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to set default output device to 9: stale id"
        );
    }
}
