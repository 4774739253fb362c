//! Error types for mmqueue
//!
//! Provides a unified error type for all storage operations.
//!
//! Queue outcomes that are expected under contention (duplicate UUID on push,
//! lock of a missing or already locked message) are NOT errors: they surface
//! as `Ok(false)` / `Ok(None)` from the operations themselves.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using QueueError
pub type Result<T> = std::result::Result<T, QueueError>;

/// Unified error type for mmqueue operations
#[derive(Debug, Error)]
pub enum QueueError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to map page file {path:?}: {source}")]
    PageMap {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // -------------------------------------------------------------------------
    // Segment Errors
    // -------------------------------------------------------------------------
    #[error("Segment corruption detected: {0}")]
    Corruption(String),

    #[error("Codec error: {0}")]
    Codec(String),

    // -------------------------------------------------------------------------
    // Queue Errors
    // -------------------------------------------------------------------------
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Transaction log is closed")]
    Closed,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for QueueError {
    fn from(e: bincode::Error) -> Self {
        QueueError::Codec(e.to_string())
    }
}
