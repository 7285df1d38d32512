//! Linux evdev device backend
//!
//! Scans `event*` nodes, keeps the ones exposing joystick or gamepad buttons
//! and translates kernel codes into per-device button/axis/hat indices.

use super::{DeviceBackend, DeviceError, DeviceInfo, HatPosition, RawEvent};
use crate::joypad::calibration::AxisCalibration;
use evdev::{Device, InputEvent, InputEventKind};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const BTN_MISC: u16 = 0x100;
const BTN_JOYSTICK: u16 = 0x120;
const BTN_DIGI: u16 = 0x140;
const BTN_TRIGGER_HAPPY: u16 = 0x2c0;
const BTN_TRIGGER_HAPPY_END: u16 = 0x2e8;
const ABS_HAT0X: u16 = 0x10;
const ABS_HAT3Y: u16 = 0x17;

#[derive(Debug, Default)]
pub struct EvdevBackend;

impl EvdevBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Kernel code to device index tables for one device
#[derive(Debug, Default)]
struct CodeMap {
    buttons: HashMap<u16, u16>,
    axes: HashMap<u16, u16>,
    hats: u16,
}

impl CodeMap {
    fn from_device(device: &Device) -> Self {
        let mut map = CodeMap::default();

        if let Some(keys) = device.supported_keys() {
            let mut codes: Vec<u16> = keys
                .iter()
                .map(|k| k.code())
                .filter(|c| *c >= BTN_MISC)
                .collect();
            codes.sort_unstable();
            for (index, code) in codes.into_iter().enumerate() {
                map.buttons.insert(code, index as u16);
            }
        }

        if let Some(abs) = device.supported_absolute_axes() {
            let mut codes: Vec<u16> = abs.iter().map(|a| a.0).collect();
            codes.sort_unstable();
            let mut next_axis = 0u16;
            for code in codes {
                if (ABS_HAT0X..=ABS_HAT3Y).contains(&code) {
                    map.hats = map.hats.max((code - ABS_HAT0X) / 2 + 1);
                } else {
                    map.axes.insert(code, next_axis);
                    next_axis += 1;
                }
            }
        }

        map
    }
}

fn is_joystick(device: &Device) -> bool {
    device.supported_keys().is_some_and(|keys| {
        keys.iter().any(|k| {
            let code = k.code();
            (BTN_JOYSTICK..BTN_DIGI).contains(&code)
                || (BTN_TRIGGER_HAPPY..BTN_TRIGGER_HAPPY_END).contains(&code)
        })
    })
}

fn describe(path: &Path, device: &Device) -> DeviceInfo {
    let codes = CodeMap::from_device(device);
    let name = device.name().unwrap_or("Unknown joystick").to_string();

    let mut calibration = vec![AxisCalibration::default(); codes.axes.len()];
    match device.get_abs_state() {
        Ok(state) => {
            for (code, index) in &codes.axes {
                if let Some(abs) = state.get(*code as usize) {
                    calibration[*index as usize] =
                        AxisCalibration::from_range(abs.minimum, abs.maximum, abs.flat);
                }
            }
        }
        Err(e) => warn!("No absinfo for {}: {}", path.display(), e),
    }

    DeviceInfo {
        path: path.to_path_buf(),
        name,
        buttons: codes.buttons.len() as u16,
        axes: codes.axes.len() as u16,
        hats: codes.hats,
        calibration,
    }
}

/// Numeric suffix of an `eventN` node name
fn event_number(path: &Path) -> Option<u32> {
    path.file_name()?
        .to_str()?
        .strip_prefix("event")?
        .parse()
        .ok()
}

impl DeviceBackend for EvdevBackend {
    fn enumerate(&self, dir: &Path) -> Result<Vec<DeviceInfo>, DeviceError> {
        let entries = std::fs::read_dir(dir).map_err(|e| DeviceError::DirectoryUnreadable {
            path: dir.to_path_buf(),
            source: e,
        })?;

        let mut nodes: Vec<(u32, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter_map(|path| event_number(&path).map(|n| (n, path)))
            .collect();
        nodes.sort();

        let mut found = Vec::new();
        for (_, path) in nodes {
            match self.probe(&path) {
                Ok(Some(info)) => found.push(info),
                Ok(None) => {}
                Err(e) => debug!("Skipping {}: {}", path.display(), e),
            }
        }
        info!("Found {} joystick device(s) in {}", found.len(), dir.display());
        Ok(found)
    }

    fn probe(&self, path: &Path) -> Result<Option<DeviceInfo>, DeviceError> {
        let device = Device::open(path)?;
        if !is_joystick(&device) {
            return Ok(None);
        }
        let info = describe(path, &device);
        debug!(
            "Joystick {} at {}: {} buttons, {} axes, {} hats",
            info.name,
            path.display(),
            info.buttons,
            info.axes,
            info.hats
        );
        Ok(Some(info))
    }

    fn open(
        &self,
        info: &DeviceInfo,
        buffer: usize,
    ) -> Result<mpsc::Receiver<RawEvent>, DeviceError> {
        let device = Device::open(&info.path)?;
        let codes = CodeMap::from_device(&device);
        let mut stream = device.into_event_stream()?;
        let (tx, rx) = mpsc::channel(buffer);
        let path = info.path.clone();

        tokio::spawn(async move {
            let mut hats = vec![HatPosition::CENTERED; codes.hats as usize];
            loop {
                tokio::select! {
                    _ = tx.closed() => {
                        debug!("Reader for {} no longer needed", path.display());
                        break;
                    }
                    next = stream.next_event() => {
                        let event = match next {
                            Ok(event) => event,
                            Err(e) => {
                                info!("Device {} stopped: {}", path.display(), e);
                                break;
                            }
                        };
                        if let Some(raw) = convert_event(&codes, &mut hats, event) {
                            if tx.send(raw).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

fn convert_event(codes: &CodeMap, hats: &mut [HatPosition], event: InputEvent) -> Option<RawEvent> {
    match event.kind() {
        InputEventKind::Key(key) => {
            let index = *codes.buttons.get(&key.code())?;
            match event.value() {
                0 => Some(RawEvent::Button {
                    index,
                    pressed: false,
                }),
                1 => Some(RawEvent::Button {
                    index,
                    pressed: true,
                }),
                // autorepeat
                _ => None,
            }
        }
        InputEventKind::AbsAxis(axis) => {
            let code = axis.0;
            if (ABS_HAT0X..=ABS_HAT3Y).contains(&code) {
                let index = (code - ABS_HAT0X) / 2;
                let hat = hats.get_mut(index as usize)?;
                let component = event.value().signum() as i8;
                if (code - ABS_HAT0X) % 2 == 0 {
                    hat.x = component;
                } else {
                    hat.y = component;
                }
                Some(RawEvent::Hat {
                    index,
                    position: *hat,
                })
            } else {
                let index = *codes.axes.get(&code)?;
                Some(RawEvent::Axis {
                    index,
                    value: event.value(),
                })
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evdev::EventType;

    fn codes() -> CodeMap {
        let mut codes = CodeMap::default();
        codes.buttons.insert(0x130, 0);
        codes.buttons.insert(0x131, 1);
        codes.axes.insert(0x00, 0);
        codes.axes.insert(0x01, 1);
        codes.hats = 1;
        codes
    }

    #[test]
    fn event_node_numbers() {
        assert_eq!(event_number(Path::new("/dev/input/event12")), Some(12));
        assert_eq!(event_number(Path::new("/dev/input/js0")), None);
        assert_eq!(event_number(Path::new("/dev/input/mouse1")), None);
    }

    #[test]
    fn converts_buttons_and_skips_repeat() {
        let codes = codes();
        let mut hats = vec![HatPosition::CENTERED];
        let press = InputEvent::new(EventType::KEY, 0x131, 1);
        assert_eq!(
            convert_event(&codes, &mut hats, press),
            Some(RawEvent::Button {
                index: 1,
                pressed: true
            })
        );
        let repeat = InputEvent::new(EventType::KEY, 0x131, 2);
        assert_eq!(convert_event(&codes, &mut hats, repeat), None);
        let unknown = InputEvent::new(EventType::KEY, 0x1e, 1);
        assert_eq!(convert_event(&codes, &mut hats, unknown), None);
    }

    #[test]
    fn hat_components_accumulate() {
        let codes = codes();
        let mut hats = vec![HatPosition::CENTERED];
        convert_event(&codes, &mut hats, InputEvent::new(EventType::ABSOLUTE, 0x10, -1));
        let raw = convert_event(&codes, &mut hats, InputEvent::new(EventType::ABSOLUTE, 0x11, 1));
        assert_eq!(
            raw,
            Some(RawEvent::Hat {
                index: 0,
                position: HatPosition::new(-1, 1)
            })
        );
    }

    #[test]
    fn axis_values_pass_through() {
        let codes = codes();
        let mut hats: Vec<HatPosition> = Vec::new();
        let raw = convert_event(&codes, &mut hats, InputEvent::new(EventType::ABSOLUTE, 0x01, -1200));
        assert_eq!(
            raw,
            Some(RawEvent::Axis {
                index: 1,
                value: -1200
            })
        );
    }
}
