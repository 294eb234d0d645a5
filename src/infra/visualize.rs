// ============================================================
// Layer 6 — Heatmap Montages
// ============================================================
// Renders a batch of landmark maps as one grayscale PNG.
// Each sample's 68 channels are collapsed by taking the
// per-pixel maximum, and the samples are tiled row-major
// on a ceil(√n)-wide grid separated by a 1-pixel gray gap.

use anyhow::{bail, Context, Result};
use image::{GrayImage, Luma};
use std::{fs, path::Path};

const GAP: u32 = 1;
const BACKGROUND: Luma<u8> = Luma([128]);

/// Write `samples` landmark-map stacks of shape [channels, size, size],
/// stored back to back in `maps`, as a montage at `path`.
pub fn write_heatmap_montage(
    maps:     &[f32],
    samples:  usize,
    channels: usize,
    size:     usize,
    path:     impl AsRef<Path>,
) -> Result<()> {
    let path  = path.as_ref();
    let plane = size * size;
    if samples == 0 || channels == 0 || size == 0 {
        bail!("nothing to render into '{}'", path.display());
    }
    if maps.len() != samples * channels * plane {
        bail!(
            "expected {} map values for {} samples, got {}",
            samples * channels * plane,
            samples,
            maps.len()
        );
    }

    let cols = (samples as f64).sqrt().ceil() as usize;
    let rows = samples.div_ceil(cols);
    let tile = size as u32;
    let mut img = GrayImage::from_pixel(
        cols as u32 * (tile + GAP) - GAP,
        rows as u32 * (tile + GAP) - GAP,
        BACKGROUND,
    );

    for (i, stack) in maps.chunks(channels * plane).enumerate() {
        let x0 = (i % cols) as u32 * (tile + GAP);
        let y0 = (i / cols) as u32 * (tile + GAP);
        for p in 0..plane {
            let value = (0..channels)
                .map(|c| stack[c * plane + p])
                .fold(f32::MIN, f32::max);
            let pixel = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
            img.put_pixel(x0 + (p % size) as u32, y0 + (p / size) as u32, Luma([pixel]));
        }
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    img.save(path)
        .with_context(|| format!("Cannot write montage '{}'", path.display()))?;
    tracing::debug!("Wrote {}-sample montage to '{}'", samples, path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_montage_layout_and_channel_max() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.png");

        // 3 samples of 2 channels, 2×2 each
        let mut maps = vec![0.0f32; 3 * 2 * 4];
        maps[4 + 3] = 1.0;     // sample 0, channel 1, pixel (1,1)
        maps[8] = 0.2;         // sample 1, channel 0, pixel (0,0)
        write_heatmap_montage(&maps, 3, 2, 2, &path).unwrap();

        let img = image::open(&path).unwrap().to_luma8();
        // 2 columns, 2 rows, 1-pixel gap
        assert_eq!(img.dimensions(), (5, 5));
        assert_eq!(img.get_pixel(1, 1)[0], 255);
        assert_eq!(img.get_pixel(3, 0)[0], 51);
        assert_eq!(img.get_pixel(2, 0)[0], 128);
        assert_eq!(img.get_pixel(0, 0)[0], 0);
        // empty fourth slot stays background
        assert_eq!(img.get_pixel(4, 4)[0], 128);
    }

    #[test]
    fn test_rejects_wrong_length() {
        let dir = tempfile::tempdir().unwrap();
        assert!(write_heatmap_montage(&[0.0; 7], 1, 2, 2, dir.path().join("x.png")).is_err());
    }
}
