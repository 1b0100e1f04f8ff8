//! Decoder trait: one raw record to fixed-size pixel output

use crate::error::Result;

/// Decodes one raw record into a fixed-size pixel layout inside a slot
///
/// Implementations own the pipeline-wide random generator their augmentation
/// policy draws from, advancing it once per image; `decode_into` therefore
/// takes `&mut self` even though the output region is the only visible
/// mutation.
pub trait RecordDecoder: Send {
    /// Bytes one decoded item occupies; the loader verifies this matches
    /// the configured item size before starting
    fn output_size(&self) -> usize;

    /// Decode `raw`, apply the augmentation policy, and write exactly
    /// [`output_size`](Self::output_size) bytes into `dest`
    fn decode_into(&mut self, raw: &[u8], dest: &mut [u8]) -> Result<()>;
}
