//! Per-image augmentation policy
//!
//! The parameters are pipeline-wide and immutable; each image draws its own
//! choices from them through [`AugmentationParams::plan`]. Units:
//! `aspect_ratio` is the crop's width/height ratio (1.0 = square);
//! `scale_min` is the minimum fraction of the source area a random crop
//! covers, in (0, 1]; contrast is an integer percent where 100 leaves
//! pixels untouched. Rotation bounds are accepted for forward compatibility
//! but never applied.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use imgpipe_core::error::{Error, Result};

/// Crop placement policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CropMode {
    /// Deterministic centered crop; the same source dimensions always
    /// produce the same region
    Center,
    /// Crop origin and area drawn per image
    Random,
}

/// Pipeline-wide augmentation knobs, immutable after construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AugmentationParams {
    /// How crops are placed
    pub crop_mode: CropMode,

    /// Flip horizontally with probability 0.5 per image
    pub flip: bool,

    /// Crop width / height ratio; 1.0 is square
    pub aspect_ratio: f32,

    /// Minimum fraction of the source area a random crop covers, in (0, 1]
    pub scale_min: f32,

    /// Lower contrast bound, percent, inclusive
    pub contrast_min: u32,

    /// Upper contrast bound, percent, inclusive
    pub contrast_max: u32,

    /// Accepted for forward compatibility; rotation is not applied
    pub rotate_min: i32,

    /// Accepted for forward compatibility; rotation is not applied
    pub rotate_max: i32,
}

impl Default for AugmentationParams {
    fn default() -> Self {
        Self {
            crop_mode: CropMode::Center,
            flip: false,
            aspect_ratio: 1.0,
            scale_min: 1.0,
            contrast_min: 100,
            contrast_max: 100,
            rotate_min: 0,
            rotate_max: 0,
        }
    }
}

/// A crop region in source-image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    /// Left edge
    pub x: u32,
    /// Top edge
    pub y: u32,
    /// Region width
    pub width: u32,
    /// Region height
    pub height: u32,
}

/// The choices drawn for a single image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AugmentPlan {
    /// Region to cut from the source
    pub crop: CropRect,
    /// Mirror horizontally after the resize
    pub flip: bool,
    /// Contrast percent to apply to every pixel
    pub contrast_pct: u32,
}

impl AugmentationParams {
    /// Reject parameter sets the decoder cannot honor
    pub fn validate(&self) -> Result<()> {
        if !self.aspect_ratio.is_finite() || self.aspect_ratio <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "aspect_ratio must be a positive finite ratio, got {}",
                self.aspect_ratio
            )));
        }
        if !self.scale_min.is_finite() || self.scale_min <= 0.0 || self.scale_min > 1.0 {
            return Err(Error::InvalidConfig(format!(
                "scale_min must be an area fraction in (0, 1], got {}",
                self.scale_min
            )));
        }
        if self.contrast_min == 0 || self.contrast_min > self.contrast_max {
            return Err(Error::InvalidConfig(format!(
                "contrast range [{}, {}] is empty or starts at zero",
                self.contrast_min, self.contrast_max
            )));
        }
        if self.rotate_min != 0 || self.rotate_max != 0 {
            warn!(
                rotate_min = self.rotate_min,
                rotate_max = self.rotate_max,
                "rotation parameters are accepted but not applied"
            );
        }
        Ok(())
    }

    /// Largest crop at the configured aspect ratio that fits the source
    fn max_crop_dims(&self, src_w: u32, src_h: u32) -> (u32, u32) {
        let height = (src_h as f32).min(src_w as f32 / self.aspect_ratio);
        let width = height * self.aspect_ratio;
        (
            (width.floor() as u32).clamp(1, src_w),
            (height.floor() as u32).clamp(1, src_h),
        )
    }

    /// The deterministic centered crop for a source of the given size
    pub fn center_crop(&self, src_w: u32, src_h: u32) -> CropRect {
        let (width, height) = self.max_crop_dims(src_w, src_h);
        CropRect {
            x: (src_w - width) / 2,
            y: (src_h - height) / 2,
            width,
            height,
        }
    }

    fn random_crop<R: Rng>(&self, rng: &mut R, src_w: u32, src_h: u32) -> CropRect {
        let (max_w, max_h) = self.max_crop_dims(src_w, src_h);

        // area fraction uniform over [scale_min, 1.0]; dimensions derive
        // from it at the configured aspect ratio, clamped to the source
        let fraction = rng.gen_range(self.scale_min..=1.0_f32);
        let target_area = fraction * src_w as f32 * src_h as f32;
        let height = (target_area / self.aspect_ratio).sqrt();
        let width = height * self.aspect_ratio;
        let scale = (max_w as f32 / width)
            .min(max_h as f32 / height)
            .min(1.0);
        let width = ((width * scale).floor() as u32).clamp(1, max_w);
        let height = ((height * scale).floor() as u32).clamp(1, max_h);

        CropRect {
            x: rng.gen_range(0..=src_w - width),
            y: rng.gen_range(0..=src_h - height),
            width,
            height,
        }
    }

    /// Draw one image's augmentation choices, advancing `rng` once per image
    pub fn plan<R: Rng>(&self, rng: &mut R, src_w: u32, src_h: u32) -> AugmentPlan {
        let crop = match self.crop_mode {
            CropMode::Center => self.center_crop(src_w, src_h),
            CropMode::Random => self.random_crop(rng, src_w, src_h),
        };
        let flip = self.flip && rng.gen_bool(0.5);
        let contrast_pct = rng.gen_range(self.contrast_min..=self.contrast_max);
        AugmentPlan {
            crop,
            flip,
            contrast_pct,
        }
    }
}
