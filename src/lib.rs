//! Joystick to keyboard and mouse translation engine
//!
//! Joystick devices are read through a [`device::DeviceBackend`], translated by
//! one [`joypad::JoyPad`] per device according to the [`mapping::Mapping`] of
//! the active layout, and injected into the host through a shared
//! [`output::OutputInjector`]. The [`layout::LayoutManager`] owns the pads and
//! the layout lifecycle; a [`daemon::Daemon`] drives it from remote-control
//! signals and hot-plug events.

pub mod config;
pub mod control;
pub mod daemon;
pub mod device;
pub mod joypad;
pub mod layout;
pub mod mapping;
pub mod output;
