// ============================================================
// Layer 4 — Image Preprocessor
// ============================================================
// Decodes face crops and prepares their pixels for the encoder.
//
// Steps, in the order the dataset applies them:
//   1. Decode and convert to 8-bit grayscale
//   2. Resize to the model's input size if needed
//   3. (training only) photometric distortion:
//        brightness  x + δ          δ ~ U(-32/255, 32/255)
//        contrast    (x - μ)·f + μ  f ~ U(0.5, 1.5)
//        noise       x + n          n ~ N(0, 0.1)
//   4. Per-image standardisation:
//        (x - μ) / max(σ, 1/√N)
//
// Pixels stay on the 0–255 scale until standardisation, and
// the distortion parameters are absolute values on that scale.
//
// Reference: image crate documentation
//            rand / rand_distr crate documentation

use anyhow::{Context, Result};
use image::imageops::FilterType;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::path::Path;

/// Decode `path` as grayscale and return `size × size` pixels in [0, 255],
/// row-major.
pub fn load_grayscale(path: &Path, size: u32) -> Result<Vec<f32>> {
    let img = image::open(path)
        .with_context(|| format!("Cannot decode image '{}'", path.display()))?
        .to_luma8();

    let img = if img.width() != size || img.height() != size {
        tracing::debug!(
            "Resizing '{}' from {}x{} to {}x{}",
            path.display(), img.width(), img.height(), size, size
        );
        image::imageops::resize(&img, size, size, FilterType::Triangle)
    } else {
        img
    };

    Ok(img.pixels().map(|p| p.0[0] as f32).collect())
}

/// Standardise in place to zero mean and unit variance. The deviation is
/// floored at `1/√N` so flat images do not blow up.
pub fn standardize(pixels: &mut [f32]) {
    if pixels.is_empty() {
        return;
    }
    let n    = pixels.len() as f32;
    let mean = pixels.iter().sum::<f32>() / n;
    let var  = pixels.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
    let std  = var.sqrt().max(1.0 / n.sqrt());
    for v in pixels.iter_mut() {
        *v = (*v - mean) / std;
    }
}

/// Random photometric distortion applied to training images.
#[derive(Debug, Clone)]
pub struct ColorDistortion {
    pub max_brightness_delta: f32,
    pub contrast_lower:       f32,
    pub contrast_upper:       f32,
    pub noise_stddev:         f32,
}

impl Default for ColorDistortion {
    fn default() -> Self {
        Self {
            max_brightness_delta: 32.0 / 255.0,
            contrast_lower:       0.5,
            contrast_upper:       1.5,
            noise_stddev:         0.1,
        }
    }
}

impl ColorDistortion {
    pub fn apply<R: Rng>(&self, pixels: &mut [f32], rng: &mut R) {
        if pixels.is_empty() {
            return;
        }

        if self.max_brightness_delta > 0.0 {
            let delta = rng.gen_range(-self.max_brightness_delta..=self.max_brightness_delta);
            pixels.iter_mut().for_each(|v| *v += delta);
        }

        if self.contrast_upper > self.contrast_lower {
            let factor = rng.gen_range(self.contrast_lower..=self.contrast_upper);
            let mean   = pixels.iter().sum::<f32>() / pixels.len() as f32;
            pixels.iter_mut().for_each(|v| *v = (*v - mean) * factor + mean);
        }

        if self.noise_stddev > 0.0 {
            // stddev is positive, so construction cannot fail
            if let Ok(normal) = Normal::new(0.0f32, self.noise_stddev) {
                pixels.iter_mut().for_each(|v| *v += normal.sample(rng));
            }
        }
    }
}
