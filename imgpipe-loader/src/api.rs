//! Integer-status boundary
//!
//! A flat surface for callers that cannot consume `Result`: `start` collapses
//! every construction failure to `None`, and `next`/`reset`/`stop` collapse
//! theirs to integer statuses. The full error is logged at the boundary
//! before it is erased, so the integer is a signal, not the diagnosis.
//!
//! Status codes: 0 success, -1 failure. `reset` additionally distinguishes
//! 1 (source I/O), 2 (corrupt archive), and 3 (oversized record) so callers
//! can tell a transient storage fault from a damaged dataset.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::error;

use imgpipe_core::{DeviceParams, Error, LoaderConfig, RecordDecoder, RecordReader, Result};
use imgpipe_readers::{FileListReader, MacrobatchReader};
use imgpipe_transforms::{AugmentationParams, ImageDecoder};

use crate::loader::Loader;

fn default_max_record_size() -> usize {
    // largest encoded image a file-list source will load whole
    64 * 1024 * 1024
}

/// Where records come from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Archive prefix when `macrobatch` is set, listing file otherwise
    pub path: PathBuf,

    /// Read macrobatch archives instead of a file listing
    pub macrobatch: bool,

    /// Index of the first archive in the set
    #[serde(default)]
    pub macro_start: usize,

    /// Records per epoch; 0 means every record the source holds
    #[serde(default)]
    pub num_data: usize,

    /// Shuffle file-list order each epoch
    #[serde(default)]
    pub shuffle: bool,

    /// Per-record size cap for file-list sources
    #[serde(default = "default_max_record_size")]
    pub max_record_size: usize,
}

/// Everything `start` needs, deserializable from one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartConfig {
    /// Pipeline shape
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Augmentation policy
    #[serde(default)]
    pub augment: AugmentationParams,

    /// Where minibatch memory lives
    #[serde(default)]
    pub device: DeviceParams,

    /// Record source
    pub source: SourceConfig,
}

/// Start a pipeline, or `None` if anything about the configuration, the
/// source, or the device is unusable.
pub fn start(config: &StartConfig) -> Option<Box<Loader>> {
    match try_start(config) {
        Ok(loader) => Some(Box::new(loader)),
        Err(err) => {
            error!(error = %err, "loader start failed");
            None
        }
    }
}

fn try_start(config: &StartConfig) -> Result<Loader> {
    let label_stride = config.loader.label_stride();
    let source = &config.source;
    let reader: Box<dyn RecordReader> = if source.macrobatch {
        Box::new(MacrobatchReader::new(
            &source.path,
            source.macro_start,
            source.num_data,
            label_stride,
        )?)
    } else {
        Box::new(FileListReader::new(
            &source.path,
            source.num_data,
            source.max_record_size,
            label_stride,
            source.shuffle,
            config.loader.seed,
        )?)
    };
    let decoder: Box<dyn RecordDecoder> = Box::new(ImageDecoder::new(
        config.loader.inner_size,
        config.loader.rgb,
        config.augment.clone(),
        config.loader.seed,
    )?);
    Loader::start(config.loader.clone(), reader, decoder, &config.device)
}

/// Advance to the next minibatch, readable through [`Loader::current`].
/// Returns 0, or -1 when the fill failed or the pipeline is gone.
pub fn next(loader: &mut Loader) -> i32 {
    match loader.next() {
        Ok(_) => 0,
        Err(err) => {
            error!(error = %err, "next minibatch failed");
            -1
        }
    }
}

/// Rewind to the start of the current epoch. Returns 0, a positive source
/// status, or -1 for pipeline faults.
pub fn reset(loader: &mut Loader) -> i32 {
    match loader.reset() {
        Ok(()) => 0,
        Err(err) => {
            error!(error = %err, "reset failed");
            reset_status(&err)
        }
    }
}

fn reset_status(err: &Error) -> i32 {
    match err {
        Error::Io(_) => 1,
        Error::CorruptArchive { .. } => 2,
        Error::RecordTooLarge { .. } => 3,
        _ => -1,
    }
}

/// Tear the pipeline down. Returns 0, or -1 when the fill thread panicked.
pub fn stop(loader: Box<Loader>) -> i32 {
    match loader.stop() {
        Ok(()) => 0,
        Err(err) => {
            error!(error = %err, "stop failed");
            -1
        }
    }
}
