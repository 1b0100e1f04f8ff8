//! Image decoding and stochastic augmentation
//!
//! [`AugmentationParams`] holds the pipeline-wide policy knobs;
//! [`ImageDecoder`] draws independent per-image choices from them and turns
//! one encoded record into fixed-size planar pixel output.

mod augment;
mod decoder;

pub use augment::{AugmentPlan, AugmentationParams, CropMode, CropRect};
pub use decoder::ImageDecoder;

// Re-export the trait decoders are used through
pub use imgpipe_core::RecordDecoder;
