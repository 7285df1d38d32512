//! Physical input devices
//!
//! Discovery and tracking of joystick devices. The [`DeviceRegistry`] owns the
//! slot table; JoyPads only ever hold a shared [`DeviceHandle`]. Reading from a
//! device is delegated to a [`DeviceBackend`] so the engine can run against
//! real evdev nodes or against in-memory devices.

pub mod backend;
pub mod evdev_backend;
pub mod hotplug;
pub mod registry;
pub mod virtual_backend;

use crate::joypad::calibration::AxisCalibration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

pub use backend::DeviceBackend;
pub use evdev_backend::EvdevBackend;
pub use hotplug::HotplugEvent;
pub use registry::DeviceRegistry;
pub use virtual_backend::VirtualBackend;

/// One raw event as read from a device, already mapped to per-device indices
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawEvent {
    Button { index: u16, pressed: bool },
    Axis { index: u16, value: i32 },
    Hat { index: u16, position: HatPosition },
}

/// Hat switch position, each component in `-1..=1`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HatPosition {
    pub x: i8,
    pub y: i8,
}

impl HatPosition {
    pub const CENTERED: HatPosition = HatPosition { x: 0, y: 0 };

    pub fn new(x: i8, y: i8) -> Self {
        Self {
            x: x.signum(),
            y: y.signum(),
        }
    }

    pub fn contains(&self, direction: HatDirection) -> bool {
        match direction {
            HatDirection::Up => self.y < 0,
            HatDirection::Down => self.y > 0,
            HatDirection::Left => self.x < 0,
            HatDirection::Right => self.x > 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HatDirection {
    Up,
    Down,
    Left,
    Right,
}

impl HatDirection {
    pub const ALL: [HatDirection; 4] = [
        HatDirection::Up,
        HatDirection::Down,
        HatDirection::Left,
        HatDirection::Right,
    ];
}

/// Slot-independent identity used to match devices to layout entries
///
/// Formed from the device name and its ordinal among devices with the same
/// name, e.g. `Logitech Dual Action#0`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceKey(String);

impl DeviceKey {
    pub fn new(name: &str, ordinal: usize) -> Self {
        Self(format!("{}#{}", name, ordinal))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DeviceKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a backend knows about a device node
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceInfo {
    pub path: PathBuf,
    pub name: String,
    pub buttons: u16,
    pub axes: u16,
    pub hats: u16,
    /// One entry per axis; missing entries use the full signed 16 bit range
    pub calibration: Vec<AxisCalibration>,
}

impl DeviceInfo {
    /// Device with default calibration on every axis
    pub fn new(path: impl Into<PathBuf>, name: &str, buttons: u16, axes: u16, hats: u16) -> Self {
        Self {
            path: path.into(),
            name: name.to_string(),
            buttons,
            axes,
            hats,
            calibration: vec![AxisCalibration::default(); axes as usize],
        }
    }
}

/// Shared, non-owning view of a device in the registry's slot table
#[derive(Debug)]
pub struct DeviceHandle {
    slot: usize,
    key: DeviceKey,
    info: DeviceInfo,
    available: AtomicBool,
}

impl DeviceHandle {
    pub(crate) fn new(slot: usize, key: DeviceKey, info: DeviceInfo) -> Self {
        Self {
            slot,
            key,
            info,
            available: AtomicBool::new(true),
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn key(&self) -> &DeviceKey {
        &self.key
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn path(&self) -> &std::path::Path {
        &self.info.path
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// `false` once the device disappeared or the slot table was rebuilt
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub(crate) fn invalidate(&self) {
        self.available.store(false, Ordering::Release);
    }
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Device directory {path} unreadable: {source}")]
    DirectoryUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Device I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hat_directions() {
        let up_left = HatPosition::new(-1, -1);
        assert!(up_left.contains(HatDirection::Up));
        assert!(up_left.contains(HatDirection::Left));
        assert!(!up_left.contains(HatDirection::Down));
        assert!(!HatPosition::CENTERED.contains(HatDirection::Right));
    }

    #[test]
    fn handle_invalidation() {
        let handle = DeviceHandle::new(
            0,
            DeviceKey::new("pad", 0),
            DeviceInfo::new("/dev/input/event3", "pad", 4, 2, 0),
        );
        assert!(handle.is_available());
        handle.invalidate();
        assert!(!handle.is_available());
        assert_eq!(handle.key().as_str(), "pad#0");
    }
}
