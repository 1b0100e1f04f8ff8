//! Error types for the imgpipe loading pipeline

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for pipeline operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error during file operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration rejected at construction
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation not valid for the current pipeline state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Decoder output does not fit the configured item size
    #[error("Size mismatch: configured item size {configured} bytes, decoder produces {actual} bytes")]
    SizeMismatch {
        /// Item size derived from the loader configuration
        configured: usize,
        /// Bytes the decoder actually writes per item
        actual: usize,
    },

    /// Buffer allocation failed
    #[error("Buffer allocation failed: requested {requested} bytes")]
    AllocationFailed {
        /// Requested allocation size in bytes
        requested: usize,
    },

    /// Image decode failure
    #[error("Decode error: {0}")]
    Decode(String),

    /// Malformed or truncated macrobatch archive
    #[error("Corrupt archive {path}: {reason}")]
    CorruptArchive {
        /// Archive file that failed to parse
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// A record exceeds the configured per-record size cap
    #[error("Record {path} is {len} bytes, exceeds maximum {max}")]
    RecordTooLarge {
        /// File holding the oversized record
        path: PathBuf,
        /// Actual record size in bytes
        len: usize,
        /// Configured maximum in bytes
        max: usize,
    },

    /// The background worker exited or panicked
    #[error("Worker thread is gone")]
    WorkerGone,

    /// Reset did not complete within the allowed window
    #[error("Reset timed out waiting for the worker")]
    ResetTimedOut,
}
