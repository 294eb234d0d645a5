// ============================================================
// Layer 4 — Face Batcher
// ============================================================
// Implements Burn's Batcher trait to stack a Vec<FaceSample>
// into device tensors.
//
// How batching works here:
//   Input:  N FaceSamples with S×S images
//   Output: FaceBatch with
//             images    [N, 1, S, S]
//             heatmaps  [N, 68, H, H]   (if the samples carry them)
//             landmarks [N, 136]
//
// All samples of one dataset share the same sizes, so we can
// concatenate the flat buffers and reshape once.
//
// Reference: Burn Book §4 (Batcher)

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::TensorData,
};

use crate::data::dataset::FaceSample;
use crate::domain::landmarks::{NUM_COORDS, NUM_LANDMARKS};

// ─── FaceBatch ────────────────────────────────────────────────────────────────
/// A batch of faces ready for the model forward pass.
#[derive(Debug, Clone)]
pub struct FaceBatch<B: Backend> {
    /// Standardised grayscale images — shape: [batch, 1, S, S]
    pub images: Tensor<B, 4>,

    /// Binary landmark maps — shape: [batch, 68, H, H]
    pub heatmaps: Option<Tensor<B, 4>>,

    /// Ground-truth coordinates — shape: [batch, 136]
    pub landmarks: Tensor<B, 2>,

    /// Source image of each row, for per-sample reports
    pub image_paths: Vec<String>,
}

// ─── FaceBatcher ──────────────────────────────────────────────────────────────
/// Holds the target device so tensors are created on the correct GPU/CPU.
#[derive(Clone, Debug)]
pub struct FaceBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> FaceBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<FaceSample, FaceBatch<B>> for FaceBatcher<B> {
    fn batch(&self, items: Vec<FaceSample>) -> FaceBatch<B> {
        let n = items.len();

        // images are square, so the side is the root of the pixel count
        let pixels = items.first().map_or(0, |s| s.image.len());
        let side   = (pixels as f64).sqrt().round() as usize;

        let image_flat: Vec<f32> = items.iter().flat_map(|s| s.image.iter().copied()).collect();
        let images = Tensor::<B, 4>::from_data(
            TensorData::new(image_flat, [n, 1, side, side]),
            &self.device,
        );

        let heatmaps = if items.iter().all(|s| s.heatmaps.is_some()) && n > 0 {
            let plane = items[0].heatmaps.as_ref().map_or(0, |m| m.len()) / NUM_LANDMARKS;
            let size  = (plane as f64).sqrt().round() as usize;
            let flat: Vec<f32> = items
                .iter()
                .flat_map(|s| s.heatmaps.iter().flatten().copied())
                .collect();
            Some(Tensor::<B, 4>::from_data(
                TensorData::new(flat, [n, NUM_LANDMARKS, size, size]),
                &self.device,
            ))
        } else {
            None
        };

        let lm_flat: Vec<f32> = items.iter().flat_map(|s| s.landmarks.iter().copied()).collect();
        let landmarks = Tensor::<B, 2>::from_data(
            TensorData::new(lm_flat, [n, NUM_COORDS]),
            &self.device,
        );

        FaceBatch {
            images,
            heatmaps,
            landmarks,
            image_paths: items.into_iter().map(|s| s.image_path).collect(),
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn sample(value: f32, with_maps: bool) -> FaceSample {
        FaceSample {
            image:      vec![value; 8 * 8],
            heatmaps:   with_maps.then(|| vec![value; NUM_LANDMARKS * 4 * 4]),
            landmarks:  vec![value; NUM_COORDS],
            image_path: format!("{value}.png"),
        }
    }

    #[test]
    fn test_batch_shapes() {
        let batcher = FaceBatcher::<TestBackend>::new(Default::default());
        let batch   = batcher.batch(vec![sample(0.0, true), sample(1.0, true), sample(2.0, true)]);

        assert_eq!(batch.images.dims(), [3, 1, 8, 8]);
        assert_eq!(batch.heatmaps.as_ref().unwrap().dims(), [3, NUM_LANDMARKS, 4, 4]);
        assert_eq!(batch.landmarks.dims(), [3, NUM_COORDS]);
        assert_eq!(batch.image_paths.len(), 3);
    }

    #[test]
    fn test_rows_keep_sample_order() {
        let batcher = FaceBatcher::<TestBackend>::new(Default::default());
        let batch   = batcher.batch(vec![sample(0.0, false), sample(1.0, false)]);

        let second: Vec<f32> = batch
            .landmarks
            .slice([1..2, 0..NUM_COORDS])
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert!(second.iter().all(|&v| v == 1.0));
        assert_eq!(batch.image_paths, vec!["0.png".to_string(), "1.png".to_string()]);
    }

    #[test]
    fn test_heatmaps_absent_when_samples_lack_them() {
        let batcher = FaceBatcher::<TestBackend>::new(Default::default());
        let batch   = batcher.batch(vec![sample(0.0, false)]);
        assert!(batch.heatmaps.is_none());
    }
}
