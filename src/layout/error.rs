use crate::device::DeviceError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("Layout '{0}' not found")]
    NotFound(String),

    #[error("Layout '{name}' is malformed: {message}")]
    Parse { name: String, message: String },

    #[error("Failed to read {path}: {source}")]
    StorageRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    StorageWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Layout '{0}' already exists")]
    AlreadyExists(String),

    #[error("Invalid layout name '{0}'")]
    InvalidName(String),

    #[error("No layout is loaded")]
    NoCurrentLayout,

    #[error("Device scan failed: {0}")]
    Device(#[from] DeviceError),
}
