// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates a training run in order:
//
//   Step 1: Load annotation records    (Layer 4 - data)
//   Step 2: Split train/validation     (Layer 4 - data)
//   Step 3: Adopt the backbone config  (Layer 6 - infra, align only)
//   Step 4: Build datasets             (Layer 4 - data)
//   Step 5: Save config                (Layer 6 - infra)
//   Step 6: Run training loop          (Layer 5 - ml)
//
// Reference: Rust Book §13 (Iterators and Closures)
//            Burn Book §5 (Training)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::{
    dataset::{FaceDataset, HeatmapSpec, SampleOptions},
    heatmap::DEFAULT_RADIUS,
    loader::AnnotationListLoader,
    preprocessor::ColorDistortion,
    splitter::split_train_val,
};
use crate::domain::traits::RecordSource;
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::{
    align::AlignHeadConfig,
    schedule::LearningRateSchedule,
    trainer::{run_align_training, run_vae_training},
    vae::HeatmapVaeConfig,
};

/// Which network a run trains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Heatmap (variational) autoencoder
    Vae,
    /// Cascaded alignment network on a VAE backbone
    Align,
}

// ─── Training Configuration ──────────────────────────────────────────────────
// All hyperparameters for a training run.
// Saved next to the weights so evaluation and fine-tuning can
// rebuild the exact architecture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub kind:             ModelKind,
    /// Annotation list files, one record per line
    pub train_lists:      Vec<String>,
    /// Prefix for relative image paths in the lists
    pub image_root:       Option<String>,
    pub checkpoint_dir:   String,
    pub batch_size:       usize,
    pub epochs:           usize,
    /// Stop early once this many optimiser steps have run
    pub max_steps:        Option<usize>,
    pub schedule:         LearningRateSchedule,
    pub vae:              HeatmapVaeConfig,
    pub align:            AlignHeadConfig,
    pub heatmap_radius:   usize,
    /// Photometric distortion of training images
    pub augment:          bool,
    /// Fraction of the records held out for validation
    pub val_fraction:     f64,
    pub seed:             u64,
    pub num_workers:      usize,
    pub log_every:        usize,
    pub sample_every:     usize,
    pub save_every:       usize,
    /// Weight files kept on disk, 0 keeps all
    pub keep_checkpoints: usize,
    /// Trained VAE checkpoint loaded into the aligner's backbone
    pub backbone_dir:     Option<String>,
    pub freeze_backbone:  bool,
    /// Continue from the latest checkpoint in `checkpoint_dir`
    pub resume:           bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            kind:             ModelKind::Vae,
            train_lists:      vec!["data/train.txt".to_string()],
            image_root:       None,
            checkpoint_dir:   "checkpoints".to_string(),
            batch_size:       64,
            epochs:           100,
            max_steps:        None,
            schedule:         LearningRateSchedule::Constant { lr: 1e-4 },
            vae:              HeatmapVaeConfig::new(),
            align:            AlignHeadConfig::new(),
            heatmap_radius:   DEFAULT_RADIUS,
            augment:          true,
            val_fraction:     0.1,
            seed:             42,
            num_workers:      1,
            log_every:        100,
            sample_every:     1000,
            save_every:       5000,
            keep_checkpoints: 5,
            backbone_dir:     None,
            freeze_backbone:  false,
            resume:           false,
        }
    }
}

impl TrainConfig {
    /// Defaults for an alignment run.
    pub fn align_default() -> Self {
        Self {
            kind:     ModelKind::Align,
            schedule: LearningRateSchedule::ExponentialDecay {
                initial:       6e-4,
                decay_samples: 192_000,
                decay_rate:    0.95,
                staircase:     true,
            },
            ..Self::default()
        }
    }

    /// How records become samples for this run. Only the VAE needs
    /// rasterized landmark maps; only training images are distorted.
    pub fn sample_options(&self, training: bool) -> SampleOptions {
        SampleOptions {
            input_size: self.vae.input_size,
            heatmaps:   (self.kind == ModelKind::Vae).then(|| HeatmapSpec {
                size:   self.vae.heatmap_size(),
                radius: self.heatmap_radius,
            }),
            distortion: (training && self.augment).then(ColorDistortion::default),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be positive");
        }
        if !(0.0..1.0).contains(&self.val_fraction) {
            bail!("val_fraction must be in [0, 1), got {}", self.val_fraction);
        }
        if self.train_lists.is_empty() {
            bail!("no annotation lists given");
        }
        self.vae.validate()?;
        if self.kind == ModelKind::Align {
            self.align.validate(&self.vae)?;
        }
        Ok(())
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
// Owns the config and runs the full training pipeline.
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    /// Create a new TrainUseCase with the given configuration
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline end to end
    pub fn execute(&self) -> Result<()> {
        let mut cfg = self.config.clone();

        // ── Step 1: Load annotation records ───────────────────────────────────
        tracing::info!("Loading annotations from {:?}", cfg.train_lists);
        let loader  = AnnotationListLoader::new(&cfg.train_lists).with_image_root(cfg.image_root.clone());
        let records = loader.load_all()?;
        if records.is_empty() {
            bail!("no annotation records found in {:?}", cfg.train_lists);
        }
        tracing::info!("Loaded {} records", records.len());

        // ── Step 2: Train / validation split ──────────────────────────────────
        let (train_records, val_records) = split_train_val(records, 1.0 - cfg.val_fraction, cfg.seed);
        tracing::info!(
            "Split: {} train, {} validation",
            train_records.len(),
            val_records.len()
        );

        // ── Step 3: Backbone hyper-parameters come from its checkpoint ────────
        if let Some(dir) = &cfg.backbone_dir {
            let backbone_cfg = CheckpointManager::new(dir)
                .load_config()
                .with_context(|| format!("Cannot read the backbone config in '{dir}'"))?;
            if backbone_cfg.kind != ModelKind::Vae {
                bail!("'{dir}' does not hold a VAE checkpoint");
            }
            tracing::info!("Using backbone architecture from '{}'", dir);
            cfg.vae = backbone_cfg.vae;
        }
        cfg.validate()?;

        // ── Step 4: Build Burn datasets ───────────────────────────────────────
        let train_dataset = FaceDataset::new(train_records, cfg.sample_options(true));
        let val_dataset   = (!val_records.is_empty())
            .then(|| FaceDataset::new(val_records, cfg.sample_options(false)));
        if train_dataset.records().is_empty() {
            bail!("none of the training images could be found");
        }

        // ── Step 5: Save config for evaluation ────────────────────────────────
        let ckpt_manager = CheckpointManager::new(&cfg.checkpoint_dir);
        ckpt_manager.save_config(&cfg)?;

        // ── Step 6: Run training loop (Layer 5) ───────────────────────────────
        match cfg.kind {
            ModelKind::Vae   => run_vae_training(&cfg, train_dataset, val_dataset, ckpt_manager),
            ModelKind::Align => run_align_training(&cfg, train_dataset, val_dataset, ckpt_manager),
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vae_samples_carry_heatmaps() {
        let cfg  = TrainConfig::default();
        let opts = cfg.sample_options(true);
        assert_eq!(opts.heatmaps, Some(HeatmapSpec { size: 64, radius: DEFAULT_RADIUS }));
        assert!(opts.distortion.is_some());
        assert!(cfg.sample_options(false).distortion.is_none());
    }

    #[test]
    fn test_align_samples_skip_heatmaps() {
        let cfg = TrainConfig::align_default();
        assert!(cfg.sample_options(true).heatmaps.is_none());
        assert_eq!(cfg.schedule.learning_rate(0, 64), 6e-4);
    }

    #[test]
    fn test_validate_rejects_bad_fraction() {
        let cfg = TrainConfig { val_fraction: 1.0, ..TrainConfig::default() };
        assert!(cfg.validate().is_err());
        assert!(TrainConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_json_round_trip() {
        let json = serde_json::to_string(&TrainConfig::align_default()).unwrap();
        assert!(json.contains("\"kind\":\"align\""));
        let back: TrainConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, ModelKind::Align);
        assert_eq!(back.align.stage_channels, vec![48, 64, 96, 128]);
    }

    #[test]
    fn test_execute_fails_without_records() {
        let dir  = tempfile::tempdir().unwrap();
        let list = dir.path().join("empty.txt");
        std::fs::write(&list, "# nothing\n").unwrap();

        let cfg = TrainConfig {
            train_lists:    vec![list.to_string_lossy().into_owned()],
            checkpoint_dir: dir.path().join("ckpt").to_string_lossy().into_owned(),
            ..TrainConfig::default()
        };
        assert!(TrainUseCase::new(cfg).execute().is_err());
    }
}
