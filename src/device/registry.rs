//! Slot table of known devices

use super::{DeviceBackend, DeviceError, DeviceHandle, DeviceInfo, DeviceKey};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tracks the available devices and hands out [`DeviceHandle`]s
///
/// Slots are assigned in first-seen order. A removed device leaves a hole in
/// the table until the next [`scan`](DeviceRegistry::scan), which always
/// rebuilds the table from scratch.
pub struct DeviceRegistry {
    backend: Arc<dyn DeviceBackend>,
    device_dir: PathBuf,
    slots: Vec<Option<Arc<DeviceHandle>>>,
}

impl DeviceRegistry {
    pub fn new(backend: Arc<dyn DeviceBackend>, device_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            device_dir: device_dir.into(),
            slots: Vec::new(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn DeviceBackend> {
        &self.backend
    }

    pub fn device_dir(&self) -> &Path {
        &self.device_dir
    }

    /// Rebuilds the whole slot table
    ///
    /// Every previously issued handle is invalidated. If the directory cannot
    /// be read the table ends up empty and the error is returned.
    pub fn scan(&mut self) -> Result<Vec<Arc<DeviceHandle>>, DeviceError> {
        for handle in self.slots.drain(..).flatten() {
            handle.invalidate();
        }

        let found = match self.backend.enumerate(&self.device_dir) {
            Ok(found) => found,
            Err(e) => {
                warn!("Device scan of {} failed: {}", self.device_dir.display(), e);
                return Err(e);
            }
        };

        for info in found {
            self.insert(info);
        }
        info!("Device scan complete: {} device(s)", self.slots.len());
        Ok(self.devices())
    }

    /// Push notification for a new node; `Ok(None)` if it is not a joystick
    /// or already known
    pub fn device_arrived(&mut self, path: &Path) -> Result<Option<Arc<DeviceHandle>>, DeviceError> {
        if self.find_by_path(path).is_some() {
            debug!("Device {} already registered", path.display());
            return Ok(None);
        }
        match self.backend.probe(path)? {
            Some(info) => {
                let handle = self.insert(info);
                info!(
                    "Device arrived: {} in slot {} ({})",
                    handle.name(),
                    handle.slot(),
                    handle.key()
                );
                Ok(Some(handle))
            }
            None => Ok(None),
        }
    }

    /// Push notification for a vanished node; the slot stays empty
    pub fn device_removed(&mut self, path: &Path) -> Option<Arc<DeviceHandle>> {
        let slot = self.find_by_path(path)?;
        self.mark_unavailable(slot)
    }

    pub fn mark_unavailable(&mut self, slot: usize) -> Option<Arc<DeviceHandle>> {
        let handle = self.slots.get_mut(slot)?.take()?;
        handle.invalidate();
        info!("Device removed: {} from slot {}", handle.name(), slot);
        Some(handle)
    }

    /// Currently available devices in slot order
    pub fn devices(&self) -> Vec<Arc<DeviceHandle>> {
        self.slots.iter().flatten().cloned().collect()
    }

    pub fn get(&self, slot: usize) -> Option<&Arc<DeviceHandle>> {
        self.slots.get(slot)?.as_ref()
    }

    fn find_by_path(&self, path: &Path) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|h| h.path() == path))
    }

    /// Smallest ordinal of `name` no live device holds, so a re-plugged device
    /// never takes the key of one that is still connected
    fn free_ordinal(&self, name: &str) -> usize {
        let taken: HashSet<&DeviceKey> = self
            .slots
            .iter()
            .flatten()
            .filter(|h| h.name() == name)
            .map(|h| h.key())
            .collect();
        (0..)
            .find(|ordinal| !taken.contains(&DeviceKey::new(name, *ordinal)))
            .unwrap_or_default()
    }

    fn insert(&mut self, info: DeviceInfo) -> Arc<DeviceHandle> {
        let ordinal = self.free_ordinal(&info.name);
        let slot = self.slots.len();
        let handle = Arc::new(DeviceHandle::new(slot, DeviceKey::new(&info.name, ordinal), info));
        self.slots.push(Some(handle.clone()));
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::VirtualBackend;

    fn registry() -> (VirtualBackend, DeviceRegistry) {
        let backend = VirtualBackend::new();
        let registry = DeviceRegistry::new(Arc::new(backend.clone()), "/dev/input");
        (backend, registry)
    }

    #[test]
    fn scan_assigns_slots_and_keys() {
        let (backend, mut registry) = registry();
        backend.plug(DeviceInfo::new("/dev/input/event1", "Gamepad", 10, 4, 1));
        backend.plug(DeviceInfo::new("/dev/input/event2", "Gamepad", 10, 4, 1));
        backend.plug(DeviceInfo::new("/dev/input/event3", "Wheel", 12, 3, 0));

        let devices = registry.scan().unwrap();
        let keys: Vec<_> = devices.iter().map(|d| d.key().to_string()).collect();
        assert_eq!(keys, vec!["Gamepad#0", "Gamepad#1", "Wheel#0"]);
        assert_eq!(devices[2].slot(), 2);
    }

    #[test]
    fn removed_slot_is_not_reused() {
        let (backend, mut registry) = registry();
        backend.plug(DeviceInfo::new("/dev/input/event1", "A", 2, 2, 0));
        backend.plug(DeviceInfo::new("/dev/input/event2", "B", 2, 2, 0));
        registry.scan().unwrap();

        let removed = registry
            .device_removed(Path::new("/dev/input/event1"))
            .unwrap();
        assert!(!removed.is_available());
        assert!(registry.get(0).is_none());

        backend.plug(DeviceInfo::new("/dev/input/event4", "C", 2, 2, 0));
        let arrived = registry
            .device_arrived(Path::new("/dev/input/event4"))
            .unwrap()
            .unwrap();
        assert_eq!(arrived.slot(), 2);
        assert_eq!(registry.devices().len(), 2);
    }

    #[test]
    fn replugged_device_takes_the_free_ordinal() {
        let (backend, mut registry) = registry();
        backend.plug(DeviceInfo::new("/dev/input/event1", "Gamepad", 10, 4, 1));
        backend.plug(DeviceInfo::new("/dev/input/event2", "Gamepad", 10, 4, 1));
        registry.scan().unwrap();

        registry.device_removed(Path::new("/dev/input/event1"));
        let back = registry
            .device_arrived(Path::new("/dev/input/event1"))
            .unwrap()
            .unwrap();
        assert_eq!(back.slot(), 2);

        let keys: Vec<_> = registry.devices().iter().map(|d| d.key().to_string()).collect();
        assert_eq!(keys, vec!["Gamepad#1", "Gamepad#0"]);

        backend.plug(DeviceInfo::new("/dev/input/event3", "Gamepad", 10, 4, 1));
        let third = registry
            .device_arrived(Path::new("/dev/input/event3"))
            .unwrap()
            .unwrap();
        assert_eq!(third.key(), &DeviceKey::new("Gamepad", 2));
    }

    #[test]
    fn rescan_invalidates_previous_handles() {
        let (backend, mut registry) = registry();
        backend.plug(DeviceInfo::new("/dev/input/event1", "A", 2, 2, 0));
        let first = registry.scan().unwrap();
        let second = registry.scan().unwrap();
        assert!(!first[0].is_available());
        assert!(second[0].is_available());
    }

    #[test]
    fn unreadable_directory_empties_table() {
        let (backend, mut registry) = registry();
        backend.plug(DeviceInfo::new("/dev/input/event1", "A", 2, 2, 0));
        let before = registry.scan().unwrap();

        backend.set_unreadable(true);
        assert!(matches!(
            registry.scan(),
            Err(DeviceError::DirectoryUnreadable { .. })
        ));
        assert!(registry.devices().is_empty());
        assert!(!before[0].is_available());
    }

    #[test]
    fn non_joystick_arrival_is_ignored() {
        let (_backend, mut registry) = registry();
        let result = registry
            .device_arrived(Path::new("/dev/input/event9"))
            .unwrap();
        assert!(result.is_none());
    }
}
