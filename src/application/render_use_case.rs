// ============================================================
// Layer 2 — Render Use Case
// ============================================================
// Writes landmark-map montages for the first N records of a
// list: the rasterized ground truth, and the model's own maps
// when a checkpoint is given. Handy for checking the heatmap
// radius and what a VAE has learned.

use anyhow::{bail, Result};
use burn::data::{dataloader::batcher::Batcher, dataset::Dataset};
use std::path::{Path, PathBuf};

use crate::data::{
    batcher::FaceBatcher,
    dataset::{FaceDataset, FaceSample, HeatmapSpec, SampleOptions},
    heatmap::DEFAULT_RADIUS,
    loader::AnnotationListLoader,
    preprocessor::load_grayscale,
};
use crate::domain::traits::RecordSource;
use crate::infra::visualize::write_heatmap_montage;
use crate::ml::inferencer::{tensor_values, Predictor};
use crate::ml::vae::HeatmapVaeConfig;
use crate::ml::{default_device, InnerBackend};

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub lists:          Vec<String>,
    pub image_root:     Option<String>,
    /// Trained model whose maps are rendered next to the ground truth
    pub checkpoint_dir: Option<String>,
    pub count:          usize,
    pub out_dir:        String,
    /// Model input side; ignored when a checkpoint supplies it
    pub input_size:     usize,
    /// Disc radius; ignored when a checkpoint supplies it
    pub radius:         usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            lists:          vec!["data/test.txt".to_string()],
            image_root:     None,
            checkpoint_dir: None,
            count:          16,
            out_dir:        "renders".to_string(),
            input_size:     128,
            radius:         DEFAULT_RADIUS,
        }
    }
}

pub struct RenderUseCase {
    config: RenderConfig,
}

impl RenderUseCase {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    /// Returns the paths of the montages written.
    pub fn execute(&self) -> Result<Vec<PathBuf>> {
        let cfg = &self.config;
        if cfg.count == 0 {
            bail!("nothing to render: count is 0");
        }

        let predictor = cfg
            .checkpoint_dir
            .as_deref()
            .map(Predictor::from_checkpoint)
            .transpose()?;

        // geometry of the checkpoint wins over the flags
        let (input_size, spec) = match &predictor {
            Some(p) => {
                let train = p.config();
                (train.vae.input_size, HeatmapSpec { size: train.vae.heatmap_size(), radius: train.heatmap_radius })
            }
            None => {
                let vae = HeatmapVaeConfig::new().with_input_size(cfg.input_size);
                (cfg.input_size, HeatmapSpec { size: vae.heatmap_size(), radius: cfg.radius })
            }
        };

        let mut records = AnnotationListLoader::new(&cfg.lists)
            .with_image_root(cfg.image_root.clone())
            .load_all()?;
        records.truncate(cfg.count);

        let options = SampleOptions { input_size, heatmaps: Some(spec), distortion: None };
        let dataset = FaceDataset::new(records, options);
        let samples: Vec<FaceSample> = (0..dataset.len()).filter_map(|i| dataset.get(i)).collect();
        if samples.is_empty() {
            bail!("none of the first {} images could be loaded", cfg.count);
        }
        tracing::info!("Rendering {} faces into '{}'", samples.len(), cfg.out_dir);

        let out_dir = Path::new(&cfg.out_dir);
        let n       = samples.len();
        let mut written = Vec::new();

        let truth: Vec<f32> = samples.iter().flat_map(|s| s.heatmaps.iter().flatten().copied()).collect();
        let truth_path = out_dir.join("ground_truth.png");
        write_heatmap_montage(&truth, n, truth.len() / (n * spec.size * spec.size), spec.size, &truth_path)?;
        written.push(truth_path);

        let faces: Vec<f32> = samples
            .iter()
            .map(|s| load_grayscale(Path::new(&s.image_path), input_size as u32))
            .collect::<Result<Vec<_>>>()?
            .concat()
            .into_iter()
            .map(|v| v / 255.0)
            .collect();
        let faces_path = out_dir.join("faces.png");
        write_heatmap_montage(&faces, n, 1, input_size, &faces_path)?;
        written.push(faces_path);

        if let Some(predictor) = &predictor {
            let batch = FaceBatcher::<InnerBackend>::new(default_device()).batch(samples);
            let maps  = predictor.reconstruct(batch.images);
            let [n, k, h, _] = maps.dims();
            let recon_path = out_dir.join("reconstruction.png");
            write_heatmap_montage(&tensor_values(maps)?, n, k, h, &recon_path)?;
            written.push(recon_path);
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fixtures::write_synthetic_faces;

    #[test]
    fn test_renders_ground_truth_without_checkpoint() {
        let dir  = tempfile::tempdir().unwrap();
        let list = write_synthetic_faces(dir.path(), 5, 20);
        let out  = dir.path().join("renders");

        let written = RenderUseCase::new(RenderConfig {
            lists:      vec![list.to_string_lossy().into_owned()],
            image_root: Some(dir.path().to_string_lossy().into_owned()),
            count:      4,
            out_dir:    out.to_string_lossy().into_owned(),
            input_size: 16,
            ..RenderConfig::default()
        })
        .execute()
        .unwrap();

        assert_eq!(written.len(), 2);
        let truth = image::open(out.join("ground_truth.png")).unwrap().to_luma8();
        // 4 maps of 8×8 on a 2×2 grid
        assert_eq!(truth.dimensions(), (17, 17));
        assert!(truth.pixels().any(|p| p[0] == 255));

        // grey levels survive: a gradient face must not saturate to white
        let faces = image::open(out.join("faces.png")).unwrap().to_luma8();
        let white = faces.pixels().filter(|p| p[0] == 255).count();
        assert!(white < 4 * 16 * 16 / 4);
    }

    #[test]
    fn test_zero_count_is_rejected() {
        let cfg = RenderConfig { count: 0, ..RenderConfig::default() };
        assert!(RenderUseCase::new(cfg).execute().is_err());
    }
}
