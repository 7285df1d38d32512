//! Layouts - named, persisted sets of per-device mappings
//!
//! [`Layout`] is the in-memory model, [`store::LayoutStore`] maps it to one
//! TOML file per layout and [`manager::LayoutManager`] drives loading,
//! switching and saving against the live JoyPads.

pub mod error;
pub mod manager;
pub mod store;

use crate::device::DeviceKey;
use crate::mapping::{Binding, BindingConflict, Mapping};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub use error::LayoutError;
pub use manager::LayoutManager;
pub use store::LayoutStore;

/// Layout-level options
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Save unsaved edits before another layout is loaded
    #[serde(default)]
    pub save_on_switch: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Layout {
    pub name: String,
    pub settings: LayoutSettings,
    pub devices: BTreeMap<DeviceKey, Arc<Mapping>>,
}

/// A device entry whose mapping had duplicate bindings
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceConflict {
    pub device: DeviceKey,
    pub conflict: BindingConflict,
}

#[derive(Debug)]
pub struct LoadedLayout {
    pub layout: Layout,
    pub conflicts: Vec<DeviceConflict>,
}

/// On-disk shape of a layout file
#[derive(Debug, Serialize, Deserialize)]
struct LayoutFile {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    saved_at: Option<DateTime<Local>>,
    #[serde(default)]
    settings: LayoutSettings,
    #[serde(default)]
    devices: BTreeMap<String, DeviceMapping>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DeviceMapping {
    #[serde(default)]
    bindings: Vec<Binding>,
}

impl Layout {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn mapping_for(&self, key: &DeviceKey) -> Option<Arc<Mapping>> {
        self.devices.get(key).cloned()
    }

    /// `None` removes the device entry
    pub fn set_mapping(&mut self, key: DeviceKey, mapping: Option<Mapping>) {
        match mapping {
            Some(mapping) => {
                self.devices.insert(key, Arc::new(mapping));
            }
            None => {
                self.devices.remove(&key);
            }
        }
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        let file = LayoutFile {
            name: self.name.clone(),
            saved_at: Some(Local::now()),
            settings: self.settings.clone(),
            devices: self
                .devices
                .iter()
                .map(|(key, mapping)| {
                    (
                        key.to_string(),
                        DeviceMapping {
                            bindings: mapping.bindings().to_vec(),
                        },
                    )
                })
                .collect(),
        };
        toml::to_string_pretty(&file)
    }

    /// Parses a layout file; `source` names it in error messages
    ///
    /// Duplicate bindings are resolved last-wins and reported, invalid
    /// bindings fail the whole layout.
    pub fn from_toml(source: &str, text: &str) -> Result<LoadedLayout, LayoutError> {
        let parse_error = |message: String| LayoutError::Parse {
            name: source.to_string(),
            message,
        };
        let file: LayoutFile = toml::from_str(text).map_err(|e| parse_error(e.to_string()))?;

        let mut devices = BTreeMap::new();
        let mut conflicts = Vec::new();
        for (key, entry) in file.devices {
            let key = DeviceKey::from(key);
            let (mapping, found) = Mapping::from_bindings(entry.bindings)
                .map_err(|e| parse_error(format!("device '{}': {}", key, e)))?;
            conflicts.extend(found.into_iter().map(|conflict| DeviceConflict {
                device: key.clone(),
                conflict,
            }));
            devices.insert(key, Arc::new(mapping));
        }

        Ok(LoadedLayout {
            layout: Layout {
                name: file.name,
                settings: file.settings,
                devices,
            },
            conflicts,
        })
    }
}

/// Change notifications for front ends
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LayoutEvent {
    LayoutListChanged,
    CurrentLayoutChanged(Option<String>),
    DeviceListChanged,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LayoutState {
    NoLayout,
    LayoutLoaded { name: String, dirty: bool },
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoadReport {
    pub name: String,
    /// Pads that received a mapping from the layout
    pub applied: usize,
    pub conflicts: Vec<DeviceConflict>,
}
