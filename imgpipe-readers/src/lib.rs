//! Reader backends for the imgpipe loading pipeline
//!
//! Two on-disk layouts are supported: pre-packed macrobatch archives read
//! sequentially, and a listing of individual image files read one file per
//! record. Both implement the core [`RecordReader`](imgpipe_core::RecordReader)
//! contract: batched pulls, epoch wraparound, all-or-nothing batches.

mod file_list;
mod macrobatch;

pub use file_list::FileListReader;
pub use macrobatch::{MacrobatchReader, MacrobatchWriter};

// Re-export core types readers are used with
pub use imgpipe_core::{Record, RecordReader};
