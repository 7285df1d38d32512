use super::{DeviceError, DeviceInfo, RawEvent};
use std::path::Path;
use tokio::sync::mpsc;

/// Source of device metadata and raw event streams
///
/// The stream returned by [`DeviceBackend::open`] ends (the receiver yields
/// `None`) when the device goes away or a read fails.
pub trait DeviceBackend: Send + Sync + 'static {
    /// Joystick devices found in `dir`, in a stable order
    fn enumerate(&self, dir: &Path) -> Result<Vec<DeviceInfo>, DeviceError>;

    /// Inspects a single node; `Ok(None)` if it is not a joystick
    fn probe(&self, path: &Path) -> Result<Option<DeviceInfo>, DeviceError>;

    /// Starts reading the device; events are delivered in arrival order
    fn open(&self, info: &DeviceInfo, buffer: usize)
        -> Result<mpsc::Receiver<RawEvent>, DeviceError>;
}
