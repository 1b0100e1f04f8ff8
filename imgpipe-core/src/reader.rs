//! Reader trait: sequential, batched supply of raw encoded records

use crate::error::Result;

/// One raw record: encoded image bytes plus verbatim label bytes
#[derive(Debug, Clone)]
pub struct Record {
    /// Encoded image bytes, exactly as stored
    pub bytes: Vec<u8>,

    /// Label bytes, copied untouched into the minibatch
    pub label: Vec<u8>,
}

/// Sequential, batched supplier of raw records with epoch wraparound
///
/// `next_batch` returns fewer records than requested only at an epoch
/// boundary. The reader rewinds itself at that boundary (reshuffling when
/// shuffle is enabled) and increments its epoch counter, so the following
/// call starts the new epoch. A batch is all-or-nothing: on error the cursor
/// is unchanged and the same position can be retried.
pub trait RecordReader: Send {
    /// Pull up to `max_records` records in epoch order
    fn next_batch(&mut self, max_records: usize) -> Result<Vec<Record>>;

    /// Rewind to the start of the current epoch, reshuffling if enabled
    fn reset(&mut self) -> Result<()>;

    /// Records exposed per epoch
    fn num_records(&self) -> usize;

    /// Completed passes over the data
    fn epoch(&self) -> u64;
}
