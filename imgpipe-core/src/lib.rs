//! Core traits, data structures, and abstractions for the imgpipe loading pipeline
//!
//! This crate provides the foundational components of the minibatch loading
//! pipeline: the shared error type, the instrumented buffer pool, the loader
//! configuration, minibatch slots, the device abstraction, and the reader and
//! decoder traits the backend crates implement.

#![warn(missing_docs)]

pub mod buffer;
pub mod config;
pub mod decode;
pub mod device;
pub mod error;
pub mod reader;
pub mod slot;

// Re-export key types for convenience
pub use buffer::{Buffer, BufferPool, PoolStats};
pub use config::LoaderConfig;
pub use decode::RecordDecoder;
pub use device::{open_device, Device, DeviceKind, DeviceParams};
pub use error::{Error, Result};
pub use reader::{Record, RecordReader};
pub use slot::{MinibatchSlot, SlotState};
