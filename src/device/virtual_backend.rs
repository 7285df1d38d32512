//! In-memory devices
//!
//! Devices can be plugged, unplugged and fed raw events. Used by the test
//! suites and handy for exercising layouts without hardware.

use super::{DeviceBackend, DeviceError, DeviceInfo, RawEvent};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Default)]
struct VirtualState {
    devices: BTreeMap<PathBuf, DeviceInfo>,
    feeds: BTreeMap<PathBuf, mpsc::Sender<RawEvent>>,
    unreadable: bool,
}

#[derive(Clone, Debug, Default)]
pub struct VirtualBackend {
    state: Arc<Mutex<VirtualState>>,
}

impl VirtualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VirtualState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn plug(&self, info: DeviceInfo) {
        debug!("Plugging virtual device {} at {}", info.name, info.path.display());
        self.lock().devices.insert(info.path.clone(), info);
    }

    /// Removes the device and ends its event stream
    pub fn unplug(&self, path: impl AsRef<Path>) {
        let mut state = self.lock();
        state.devices.remove(path.as_ref());
        state.feeds.remove(path.as_ref());
    }

    /// Makes the next enumerations fail as if the directory were unreadable
    pub fn set_unreadable(&self, unreadable: bool) {
        self.lock().unreadable = unreadable;
    }

    /// Delivers a raw event to the open stream of `path`
    ///
    /// Returns `false` if nobody is reading the device.
    pub async fn feed(&self, path: impl AsRef<Path>, event: RawEvent) -> bool {
        let sender = self.lock().feeds.get(path.as_ref()).cloned();
        match sender {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }
}

impl DeviceBackend for VirtualBackend {
    fn enumerate(&self, dir: &Path) -> Result<Vec<DeviceInfo>, DeviceError> {
        let state = self.lock();
        if state.unreadable {
            return Err(DeviceError::DirectoryUnreadable {
                path: dir.to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            });
        }
        Ok(state.devices.values().cloned().collect())
    }

    fn probe(&self, path: &Path) -> Result<Option<DeviceInfo>, DeviceError> {
        Ok(self.lock().devices.get(path).cloned())
    }

    fn open(
        &self,
        info: &DeviceInfo,
        buffer: usize,
    ) -> Result<mpsc::Receiver<RawEvent>, DeviceError> {
        let mut state = self.lock();
        if !state.devices.contains_key(&info.path) {
            return Err(DeviceError::DeviceUnavailable(info.path.display().to_string()));
        }
        let (tx, rx) = mpsc::channel(buffer);
        state.feeds.insert(info.path.clone(), tx);
        Ok(rx)
    }
}
