//! Binding tables
//!
//! A [`Mapping`] is the table of `LogicalInput -> OutputAction` rules for one
//! device. Layouts hold one per device identity key.

pub mod error;
pub mod table;
pub mod types;

pub use error::MappingError;
pub use table::{BindingConflict, Mapping};
pub use types::{
    Binding, BindingParams, DigitalOutput, InputSlot, LogicalInput, OutputAction, KEY_CODES,
    MOUSE_BUTTON_CODES,
};
