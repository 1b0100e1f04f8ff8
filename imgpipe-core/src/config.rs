//! Loader configuration
//!
//! The configuration is immutable for the loader's lifetime; every derived
//! quantity (channel count, item size, label stride) is computed here so the
//! rest of the pipeline never re-derives it inconsistently.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Pipeline-wide configuration, fixed at `start`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Output image edge length; every decoded item is inner_size x inner_size
    pub inner_size: u32,

    /// Color output (3 channels) or grayscale (1 channel)
    pub rgb: bool,

    /// Bytes per label value
    pub label_size: usize,

    /// Label values per record
    pub num_labels: usize,

    /// Records per minibatch
    pub minibatch_size: usize,

    /// Minibatch slots the worker may fill ahead of the consumer
    pub pipeline_depth: usize,

    /// Seed for the pipeline-wide augmentation generator
    pub seed: Option<u64>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            inner_size: 224,
            rgb: true,
            label_size: 4,
            num_labels: 1,
            minibatch_size: 128,
            pipeline_depth: 2,
            seed: None,
        }
    }
}

impl LoaderConfig {
    /// Channel count derived from the color flag
    pub fn channels(&self) -> usize {
        if self.rgb {
            3
        } else {
            1
        }
    }

    /// Bytes one decoded item occupies in a slot
    pub fn item_max_size(&self) -> usize {
        self.channels() * (self.inner_size as usize).pow(2)
    }

    /// Label bytes per record
    pub fn label_stride(&self) -> usize {
        self.label_size * self.num_labels
    }

    /// Reject configurations the pipeline cannot run with. Violations are
    /// construction failures, never runtime failures.
    pub fn validate(&self) -> Result<()> {
        if self.inner_size == 0 {
            return Err(Error::InvalidConfig("inner_size must be nonzero".into()));
        }
        if self.minibatch_size == 0 {
            return Err(Error::InvalidConfig("minibatch_size must be nonzero".into()));
        }
        if self.label_size == 0 || self.num_labels == 0 {
            return Err(Error::InvalidConfig(
                "label_size and num_labels must be nonzero".into(),
            ));
        }
        if self.pipeline_depth < 2 {
            return Err(Error::InvalidConfig(format!(
                "pipeline_depth must be at least 2 for double buffering, got {}",
                self.pipeline_depth
            )));
        }
        Ok(())
    }
}
