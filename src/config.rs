//! Runtime configuration and persisted user preferences.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const APP_NAME: &str = "joypad-mapper";
pub const DEFAULT_DEVICE_DIR: &str = "/dev/input";
const CONFIG_DIR: &str = ".config/joypad-mapper";
const LOCK_FILE: &str = "joypad-mapper.pid";

/// Settings for the translation engine
///
/// Built once at startup from the command line and handed to the components
/// that need them. None of these are persisted.
#[derive(Clone, Debug)]
pub struct EngineSettings {
    /// Directory scanned for device nodes
    pub device_dir: PathBuf,

    /// Root of layout storage, the last-used pointer and preferences
    pub settings_dir: PathBuf,

    /// Single-instance marker
    pub instance_lock: PathBuf,

    /// Repeat interval for analog mouse motion while a stick is held still.
    ///
    /// `0` disables repeating; motion is then only emitted per sample.
    pub motion_interval_ms: u64,

    /// Capacity of the raw event channel between a device reader and its JoyPad
    pub event_buffer: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            device_dir: PathBuf::from(DEFAULT_DEVICE_DIR),
            settings_dir: default_settings_dir(),
            instance_lock: default_lock_path(),
            motion_interval_ms: 20, // ~50 updates per second
            event_buffer: 256,
        }
    }
}

pub fn default_settings_dir() -> PathBuf {
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(CONFIG_DIR);
    path
}

pub fn default_lock_path() -> PathBuf {
    let mut path = dirs::runtime_dir().unwrap_or_else(std::env::temp_dir);
    path.push(LOCK_FILE);
    path
}

/// Boolean preferences a front end can toggle through `LayoutManager::set_setting`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Preference {
    ShowMenuBar,
    ShowToolBar,
    UseThemeTrayIcon,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub show_menu_bar: bool,
    pub show_tool_bar: bool,
    pub use_theme_tray_icon: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            show_menu_bar: true,
            show_tool_bar: true,
            use_theme_tray_icon: false,
        }
    }
}

impl Preferences {
    pub fn get(&self, pref: Preference) -> bool {
        match pref {
            Preference::ShowMenuBar => self.show_menu_bar,
            Preference::ShowToolBar => self.show_tool_bar,
            Preference::UseThemeTrayIcon => self.use_theme_tray_icon,
        }
    }

    /// Returns `true` when the value actually changed
    pub fn set(&mut self, pref: Preference, value: bool) -> bool {
        let slot = match pref {
            Preference::ShowMenuBar => &mut self.show_menu_bar,
            Preference::ShowToolBar => &mut self.show_tool_bar,
            Preference::UseThemeTrayIcon => &mut self.use_theme_tray_icon,
        };
        let changed = *slot != value;
        *slot = value;
        changed
    }
}
