// ============================================================
// Layer 5 — Inferencer
// ============================================================
use anyhow::{anyhow, Result};
use burn::prelude::*;

use crate::application::train_use_case::{ModelKind, TrainConfig};
use crate::data::batcher::FaceBatch;
use crate::data::heatmap::decode_peaks;
use crate::domain::error_metrics::normalized_mean_error;
use crate::domain::landmarks::{LandmarkSet, NUM_COORDS};
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::align::LandmarkAligner;
use crate::ml::loss::{align_cost, vae_cost};
use crate::ml::vae::HeatmapVae;
use crate::ml::{default_device, Device, InnerBackend};

/// A trained model of either kind.
#[derive(Debug)]
pub enum LandmarkModel<B: Backend> {
    /// Landmarks are read off the predicted heatmaps
    Vae(HeatmapVae<B>),
    /// Landmarks are regressed directly
    Aligner {
        model:        LandmarkAligner<B>,
        weight_decay: f64,
    },
}

/// Landmarks for every row of a batch, plus the batch cost when the batch
/// carries the targets the cost needs.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub landmarks: Vec<LandmarkSet>,
    pub cost:      Option<f64>,
}

impl<B: Backend> LandmarkModel<B> {
    /// Build an untrained model with the architecture `cfg` describes.
    pub fn from_config(cfg: &TrainConfig, device: &B::Device) -> Result<Self> {
        Ok(match cfg.kind {
            ModelKind::Vae => LandmarkModel::Vae(cfg.vae.init(device)?),
            ModelKind::Align => LandmarkModel::Aligner {
                model:        cfg.align.init_aligner(&cfg.vae, device)?,
                weight_decay: cfg.align.weight_decay,
            },
        })
    }

    pub fn predict(&self, batch: &FaceBatch<B>) -> Result<Prediction> {
        match self {
            LandmarkModel::Vae(model) => {
                let out  = model.forward(batch.images.clone());
                let cost = batch
                    .heatmaps
                    .clone()
                    .map(|target| vae_cost(&out, target).into_scalar().elem::<f64>());

                let [n, k, h, _] = out.heatmaps.dims();
                let maps  = tensor_values(out.heatmaps)?;
                let plane = k * h * h;
                let landmarks = (0..n)
                    .map(|i| decode_peaks(&maps[i * plane..(i + 1) * plane], k, h))
                    .collect();
                Ok(Prediction { landmarks, cost })
            }
            LandmarkModel::Aligner { model, weight_decay } => {
                let (_, align) = model.forward(batch.images.clone());
                let cost = align_cost(&align, batch.landmarks.clone(), model.head.l2_penalty(), *weight_decay)
                    .into_scalar()
                    .elem::<f64>();

                let landmarks = tensor_values(align.landmarks)?
                    .chunks(NUM_COORDS)
                    .map(LandmarkSet::from_flat)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Prediction { landmarks, cost: Some(cost) })
            }
        }
    }

    /// Predicted landmark maps — shape: [batch, 68, H, H]
    pub fn reconstruct(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            LandmarkModel::Vae(model)            => model.forward(images).heatmaps,
            LandmarkModel::Aligner { model, .. } => model.backbone.forward(images).heatmaps,
        }
    }
}

/// Normalised mean error of every row, `None` where the ground truth has
/// no usable interocular distance.
pub fn batch_errors<B: Backend>(batch: &FaceBatch<B>, prediction: &Prediction) -> Result<Vec<Option<f32>>> {
    let gt = tensor_values(batch.landmarks.clone())?;
    gt.chunks(NUM_COORDS)
        .zip(&prediction.landmarks)
        .map(|(coords, pred)| Ok(normalized_mean_error(&LandmarkSet::from_flat(coords)?, pred)))
        .collect()
}

/// Copy a tensor to the host as f32 values.
pub fn tensor_values<B: Backend, const D: usize>(t: Tensor<B, D>) -> Result<Vec<f32>> {
    t.into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("cannot read tensor data: {e:?}"))
}

/// A trained model on the inference backend.
pub struct Predictor {
    model:  LandmarkModel<InnerBackend>,
    config: TrainConfig,
    device: Device,
}

impl Predictor {
    /// Rebuild the model saved in `checkpoint_dir` and load its latest weights.
    pub fn from_checkpoint(checkpoint_dir: &str) -> Result<Self> {
        let device = default_device();
        let ckpt   = CheckpointManager::new(checkpoint_dir);
        let config = ckpt.load_config()?;

        let model = match LandmarkModel::<InnerBackend>::from_config(&config, &device)? {
            LandmarkModel::Vae(m) => LandmarkModel::Vae(ckpt.load_model(m, &device)?),
            LandmarkModel::Aligner { model, weight_decay } => LandmarkModel::Aligner {
                model: ckpt.load_model(model, &device)?,
                weight_decay,
            },
        };
        tracing::info!("Loaded {:?} model from '{}'", config.kind, checkpoint_dir);

        Ok(Self { model, config, device })
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn predict(&self, batch: &FaceBatch<InnerBackend>) -> Result<Prediction> {
        self.model.predict(batch)
    }

    pub fn reconstruct(&self, images: Tensor<InnerBackend, 4>) -> Tensor<InnerBackend, 4> {
        self.model.reconstruct(images)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    use crate::domain::landmarks::{NUM_LANDMARKS, Point, LEFT_EYE_OUTER, RIGHT_EYE_OUTER};

    type TestBackend = NdArray<f32>;

    fn batch_with(coords: Vec<f32>) -> FaceBatch<TestBackend> {
        let device = Default::default();
        FaceBatch {
            images:      Tensor::zeros([1, 1, 16, 16], &device),
            heatmaps:    None,
            landmarks:   Tensor::from_data(TensorData::new(coords, [1, NUM_COORDS]), &device),
            image_paths: vec!["a.png".into()],
        }
    }

    #[test]
    fn test_batch_errors_against_ground_truth() {
        let mut gt = LandmarkSet::from_flat(&[0.5; NUM_COORDS]).unwrap();
        gt.points[LEFT_EYE_OUTER]  = Point::new(0.25, 0.5);
        gt.points[RIGHT_EYE_OUTER] = Point::new(0.75, 0.5);

        let batch = batch_with(gt.to_flat());
        let exact = Prediction { landmarks: vec![gt.clone()], cost: None };
        assert_eq!(batch_errors(&batch, &exact).unwrap(), vec![Some(0.0)]);

        let degenerate = batch_with(vec![0.5; NUM_COORDS]);
        assert_eq!(batch_errors(&degenerate, &exact).unwrap(), vec![None]);
    }

    #[test]
    fn test_vae_prediction_decodes_one_set_per_row() {
        let device = Default::default();
        let cfg = TrainConfig {
            vae: crate::ml::vae::HeatmapVaeConfig::new()
                .with_input_size(16)
                .with_n_filters(vec![4])
                .with_filter_sizes(vec![3])
                .with_n_hidden(0)
                .with_n_code(4),
            ..TrainConfig::default()
        };
        let model = LandmarkModel::<TestBackend>::from_config(&cfg, &device).unwrap();

        let mut batch = batch_with(vec![0.5; NUM_COORDS]);
        batch.heatmaps = Some(Tensor::zeros([1, NUM_LANDMARKS, 8, 8], &device));

        let pred = model.predict(&batch).unwrap();
        assert_eq!(pred.landmarks.len(), 1);
        assert_eq!(pred.landmarks[0].len(), NUM_LANDMARKS);
        assert!(pred.cost.unwrap().is_finite());
    }
}
