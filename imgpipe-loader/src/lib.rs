//! Asynchronous minibatch loader
//!
//! A background thread reads encoded records, decodes and augments them, and
//! commits fixed-size minibatches into a small ring of reusable slots; the
//! consumer blocks only when it outruns the prefetch. [`Loader`] is the
//! typed handle; the [`api`] module wraps it in an integer-status surface
//! for callers that cannot consume `Result`.

#![warn(missing_docs)]

pub mod api;
mod loader;
mod worker;

pub use loader::{Loader, Minibatch};

// Re-export what callers need to assemble a pipeline by hand
pub use imgpipe_core::{
    Device, DeviceKind, DeviceParams, Error, LoaderConfig, PoolStats, RecordDecoder, RecordReader,
    Result,
};
pub use imgpipe_readers::{FileListReader, MacrobatchReader, MacrobatchWriter};
pub use imgpipe_transforms::{AugmentationParams, CropMode, ImageDecoder};
