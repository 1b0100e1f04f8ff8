//! Image decoding with stochastic augmentation
//!
//! Output layout is planar channel-major u8: plane 0 first, one
//! `inner_size^2` plane per channel, 3 planes for RGB or 1 for grayscale.

use image::imageops::FilterType;
use image::DynamicImage;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::trace;

use imgpipe_core::decode::RecordDecoder;
use imgpipe_core::error::{Error, Result};

use crate::augment::{AugmentPlan, AugmentationParams};

/// Decodes one encoded record into augmented planar pixels
///
/// The decoder owns the pipeline-wide random generator; it is seeded once
/// and advanced per image, never reseeded per item, so successive images
/// and successive epochs draw independent augmentations.
pub struct ImageDecoder {
    params: AugmentationParams,
    inner_size: u32,
    rgb: bool,
    rng: StdRng,
}

impl ImageDecoder {
    /// Build a decoder for `inner_size` x `inner_size` output
    pub fn new(
        inner_size: u32,
        rgb: bool,
        params: AugmentationParams,
        seed: Option<u64>,
    ) -> Result<Self> {
        if inner_size == 0 {
            return Err(Error::InvalidConfig("inner_size must be nonzero".into()));
        }
        params.validate()?;
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            params,
            inner_size,
            rgb,
            rng,
        })
    }

    /// Channel count of the output
    pub fn channels(&self) -> usize {
        if self.rgb {
            3
        } else {
            1
        }
    }

    fn write_planar(&self, img: &DynamicImage, plan: &AugmentPlan, dest: &mut [u8]) {
        let plane = (self.inner_size as usize).pow(2);
        if self.rgb {
            let rgb = img.to_rgb8();
            for (i, pixel) in rgb.pixels().enumerate() {
                for c in 0..3 {
                    dest[c * plane + i] = apply_contrast(pixel[c], plan.contrast_pct);
                }
            }
        } else {
            let gray = img.to_luma8();
            for (i, pixel) in gray.pixels().enumerate() {
                dest[i] = apply_contrast(pixel[0], plan.contrast_pct);
            }
        }
    }
}

/// Multiplicative contrast: percent scaling with saturation at 255. The
/// widened multiply saturates for any percent validation accepts.
fn apply_contrast(value: u8, pct: u32) -> u8 {
    ((value as u64 * pct as u64) / 100).min(255) as u8
}

impl RecordDecoder for ImageDecoder {
    fn output_size(&self) -> usize {
        self.channels() * (self.inner_size as usize).pow(2)
    }

    fn decode_into(&mut self, raw: &[u8], dest: &mut [u8]) -> Result<()> {
        if dest.len() != self.output_size() {
            return Err(Error::SizeMismatch {
                configured: dest.len(),
                actual: self.output_size(),
            });
        }
        let img = image::load_from_memory(raw).map_err(|e| Error::Decode(e.to_string()))?;
        let plan = self
            .params
            .plan(&mut self.rng, img.width(), img.height());

        let cropped = img.crop_imm(plan.crop.x, plan.crop.y, plan.crop.width, plan.crop.height);
        let mut resized = cropped.resize_exact(self.inner_size, self.inner_size, FilterType::Triangle);
        if plan.flip {
            resized = resized.fliph();
        }
        self.write_planar(&resized, &plan, dest);
        trace!(?plan, "record decoded");
        Ok(())
    }
}
