//! Error definitions for the mapping module

use super::types::InputSlot;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MappingError {
    /// Source and target cannot be combined, or a parameter is out of range
    #[error("Invalid binding for {slot}: {reason}")]
    InvalidBinding { slot: InputSlot, reason: String },
}
