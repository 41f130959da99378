//! # Plume Core Storage Errors
//!
//! Defines [`StorageSystemError`], raised while reading or writing the host
//! configuration and the persisted plugin state (descriptor cache and
//! active plugin list).
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageSystemError {
    #[error("I/O error during operation '{operation}' on path '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization to '{format}' failed: {message}")]
    SerializationError { format: String, message: String },

    #[error("Deserialization from '{format}' failed: {message}")]
    DeserializationError { format: String, message: String },

    #[error("Unsupported configuration format: {0}")]
    UnsupportedConfigFormat(String),

    #[error("Invalid path provided: '{}': {reason}", .path.display())]
    InvalidPath { path: PathBuf, reason: String },
}

// Helper for creating Io errors, ensuring path is always included.
impl StorageSystemError {
    pub fn io(source: std::io::Error, operation: impl Into<String>, path: PathBuf) -> Self {
        StorageSystemError::Io {
            source,
            operation: operation.into(),
            path,
        }
    }
}
