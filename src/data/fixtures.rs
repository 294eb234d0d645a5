// Synthetic on-disk faces for tests that run the whole pipeline.

use image::{GrayImage, Luma};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{fmt::Write as _, fs, path::{Path, PathBuf}};

use crate::domain::landmarks::{LEFT_EYE_OUTER, NUM_LANDMARKS, RIGHT_EYE_OUTER};

/// Write `count` small PNG faces and an annotation list naming them.
/// Returns the list's path. Image paths in the list are relative to `dir`.
pub fn write_synthetic_faces(dir: &Path, count: usize, size: u32) -> PathBuf {
    let mut rng  = StdRng::seed_from_u64(7);
    let mut list = String::from("# synthetic faces\n");

    for i in 0..count {
        let name = format!("face_{i:03}.png");
        let img  = GrayImage::from_fn(size, size, |x, y| Luma([((x * 13 + y * 7 + i as u32 * 31) % 256) as u8]));
        img.save(dir.join(&name)).unwrap();

        list.push_str(&name);
        for k in 0..NUM_LANDMARKS {
            let (x, y) = match k {
                LEFT_EYE_OUTER  => (0.3, 0.4),
                RIGHT_EYE_OUTER => (0.7, 0.4),
                _ => (rng.gen_range(0.2..0.8f32), rng.gen_range(0.2..0.8f32)),
            };
            write!(list, " {x:.4} {y:.4}").unwrap();
        }
        list.push('\n');
    }

    let path = dir.join("list.txt");
    fs::write(&path, list).unwrap();
    path
}
