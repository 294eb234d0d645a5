// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Train + validation loop using Burn's DataLoader and Adam,
// shared by the heatmap VAE and the alignment network.
//
// Backends:
//   - Training uses TrainBackend (Autodiff<InnerBackend>)
//   - model.valid() returns the model on InnerBackend with
//     dropout off and batch norm on its running statistics
//   - Validation batches are built on InnerBackend too
//
// The step counter is global: it survives `--resume` and is
// what the learning rate schedule, logging, sampling and
// checkpoint intervals are measured in.
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam

use anyhow::{bail, Context, Result};
use burn::{
    data::{
        dataloader::{batcher::Batcher, DataLoaderBuilder},
        dataset::Dataset,
    },
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
};
use std::path::Path;

use crate::application::train_use_case::TrainConfig;
use crate::data::{
    batcher::{FaceBatch, FaceBatcher},
    dataset::{FaceDataset, FaceSample},
};
use crate::domain::landmarks::{LandmarkSet, NUM_COORDS};
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::{EpochMetrics, MetricsLogger},
    visualize::write_heatmap_montage,
};
use crate::ml::align::LandmarkAligner;
use crate::ml::inferencer::{batch_errors, tensor_values, LandmarkModel, Prediction};
use crate::ml::loss::{align_cost, vae_cost};
use crate::ml::vae::HeatmapVae;
use crate::ml::{default_device, Device, InnerBackend, TrainBackend};

/// Faces in the fixed reconstruction probe
const PROBE_SIZE: usize = 16;

// ─── Trainable models ─────────────────────────────────────────────────────────
/// A network the shared loop knows how to train.
trait Trainable: AutodiffModule<TrainBackend> {
    /// Cost of one batch. With `with_nme`, also the batch mean landmark
    /// error, for models that regress landmarks directly.
    fn batch_cost(
        &self,
        cfg:      &TrainConfig,
        batch:    &FaceBatch<TrainBackend>,
        with_nme: bool,
    ) -> Result<(Tensor<TrainBackend, 1>, Option<f64>)>;

    /// Inference copy of the current weights.
    fn for_eval(&self, cfg: &TrainConfig) -> LandmarkModel<InnerBackend>;
}

impl Trainable for HeatmapVae<TrainBackend> {
    fn batch_cost(
        &self,
        _cfg:      &TrainConfig,
        batch:     &FaceBatch<TrainBackend>,
        _with_nme: bool,
    ) -> Result<(Tensor<TrainBackend, 1>, Option<f64>)> {
        let target = batch
            .heatmaps
            .clone()
            .context("VAE batches must carry landmark maps")?;
        let out = self.forward(batch.images.clone());
        Ok((vae_cost(&out, target), None))
    }

    fn for_eval(&self, _cfg: &TrainConfig) -> LandmarkModel<InnerBackend> {
        LandmarkModel::Vae(self.valid())
    }
}

impl Trainable for LandmarkAligner<TrainBackend> {
    fn batch_cost(
        &self,
        cfg:      &TrainConfig,
        batch:    &FaceBatch<TrainBackend>,
        with_nme: bool,
    ) -> Result<(Tensor<TrainBackend, 1>, Option<f64>)> {
        let (_, out) = self.forward(batch.images.clone());
        let cost = align_cost(
            &out,
            batch.landmarks.clone(),
            self.head.l2_penalty(),
            cfg.align.weight_decay,
        );

        let nme = if with_nme {
            let landmarks = tensor_values(out.landmarks)?
                .chunks(NUM_COORDS)
                .map(LandmarkSet::from_flat)
                .collect::<Result<Vec<_>, _>>()?;
            let errors = batch_errors(batch, &Prediction { landmarks, cost: None })?;
            mean_of(errors.into_iter().flatten())
        } else {
            None
        };
        Ok((cost, nme))
    }

    fn for_eval(&self, cfg: &TrainConfig) -> LandmarkModel<InnerBackend> {
        LandmarkModel::Aligner {
            model:        self.valid(),
            weight_decay: cfg.align.weight_decay,
        }
    }
}

// ─── Entry points ─────────────────────────────────────────────────────────────
pub fn run_vae_training(
    cfg:           &TrainConfig,
    train_dataset: FaceDataset,
    val_dataset:   Option<FaceDataset>,
    ckpt_manager:  CheckpointManager,
) -> Result<()> {
    let device = default_device();
    tracing::info!("Using device: {:?}", device);

    let mut model: HeatmapVae<TrainBackend> = cfg.vae.init(&device)?;
    let start_step = resume_step(cfg, &ckpt_manager)?;
    if let Some(step) = start_step {
        model = ckpt_manager.load_model_at::<TrainBackend, _>(model, step, &device)?;
    }
    tracing::info!(
        "VAE ready: filters={:?}, kernels={:?}, code={}, variational={}",
        cfg.vae.n_filters,
        cfg.vae.filter_sizes,
        cfg.vae.n_code,
        cfg.vae.variational,
    );

    let probe = if cfg.sample_every > 0 {
        probe_batch(cfg, &train_dataset, &device, &ckpt_manager.dir().join("samples"))?
    } else {
        None
    };

    train_loop(cfg, model, start_step.unwrap_or(0), train_dataset, val_dataset, probe, &ckpt_manager, &device)
}

pub fn run_align_training(
    cfg:           &TrainConfig,
    train_dataset: FaceDataset,
    val_dataset:   Option<FaceDataset>,
    ckpt_manager:  CheckpointManager,
) -> Result<()> {
    let device = default_device();
    tracing::info!("Using device: {:?}", device);

    let mut model: LandmarkAligner<TrainBackend> = cfg.align.init_aligner(&cfg.vae, &device)?;
    let start_step = resume_step(cfg, &ckpt_manager)?;

    match (start_step, &cfg.backbone_dir) {
        (Some(step), _) => {
            model = ckpt_manager.load_model_at::<TrainBackend, _>(model, step, &device)?;
        }
        (None, Some(dir)) => {
            tracing::info!("Loading backbone weights from '{}'", dir);
            model.backbone = CheckpointManager::new(dir).load_model::<TrainBackend, _>(model.backbone, &device)?;
        }
        (None, None) => tracing::warn!("Training the alignment network on an untrained backbone"),
    }

    if cfg.freeze_backbone {
        model.backbone = model.backbone.no_grad();
        tracing::info!("Backbone frozen; only the alignment head is optimised");
    }
    tracing::info!(
        "Aligner ready: stages={:?}, fc={:?}, deep_supervision={}",
        cfg.align.stage_channels,
        cfg.align.fc_hidden,
        cfg.align.deep_supervision,
    );

    train_loop(cfg, model, start_step.unwrap_or(0), train_dataset, val_dataset, None, &ckpt_manager, &device)
}

fn resume_step(cfg: &TrainConfig, ckpt_manager: &CheckpointManager) -> Result<Option<usize>> {
    if !cfg.resume {
        return Ok(None);
    }
    let step = ckpt_manager.latest_step()?;
    match step {
        Some(s) => tracing::info!("Resuming from step {}", s),
        None => tracing::warn!(
            "Nothing to resume in '{}'; starting from scratch",
            ckpt_manager.dir().display()
        ),
    }
    Ok(step)
}

// ─── Shared loop ──────────────────────────────────────────────────────────────
#[allow(clippy::too_many_arguments)]
fn train_loop<M: Trainable>(
    cfg:           &TrainConfig,
    mut model:     M,
    start_step:    usize,
    train_dataset: FaceDataset,
    val_dataset:   Option<FaceDataset>,
    probe:         Option<FaceBatch<InnerBackend>>,
    ckpt_manager:  &CheckpointManager,
    device:        &Device,
) -> Result<()> {
    // ── Adam optimiser ────────────────────────────────────────────────────────
    // m = β1*m + (1-β1)*g        (mean)
    // v = β2*v + (1-β2)*g²       (variance)
    // θ = θ - lr * m / (√v + ε)  (update)
    let optim_cfg = AdamConfig::new().with_epsilon(1e-8);
    let mut optim = optim_cfg.init();

    let metrics = MetricsLogger::new(ckpt_manager.dir())?;
    tracing::info!("Epoch metrics go to '{}'", metrics.csv_path().display());

    let batches_per_epoch = train_dataset.len().div_ceil(cfg.batch_size);

    // ── Training data loader (AutodiffBackend) ────────────────────────────────
    let train_batcher = FaceBatcher::<TrainBackend>::new(device.clone());
    let train_loader  = DataLoaderBuilder::new(train_batcher)
        .batch_size(cfg.batch_size)
        .shuffle(cfg.seed)
        .num_workers(cfg.num_workers.max(1))
        .build(train_dataset);

    // ── Validation data loader (InnerBackend — no autodiff overhead) ──────────
    let val_loader = val_dataset.map(|ds| {
        DataLoaderBuilder::new(FaceBatcher::<InnerBackend>::new(device.clone()))
            .batch_size(cfg.batch_size)
            .num_workers(cfg.num_workers.max(1))
            .build(ds)
    });

    let limit_reached = |step: usize| cfg.max_steps.is_some_and(|max| step >= max);
    let samples_dir   = ckpt_manager.dir().join("samples");

    let mut step       = start_step;
    let mut last_saved = (start_step > 0).then_some(start_step);
    let mut lr         = cfg.schedule.learning_rate(step, cfg.batch_size);

    // ── Epoch loop ────────────────────────────────────────────────────────────
    let first_epoch = epoch_of_step(start_step, batches_per_epoch);
    if first_epoch > cfg.epochs {
        tracing::info!("All {} epochs already ran by step {}", cfg.epochs, start_step);
    }
    for epoch in first_epoch..=cfg.epochs {
        if limit_reached(step) {
            tracing::info!("Reached max_steps={:?}", cfg.max_steps);
            break;
        }

        let mut cost_sum = 0.0f64;
        let mut batches  = 0usize;

        for batch in train_loader.iter() {
            lr = cfg.schedule.learning_rate(step, cfg.batch_size);
            let log_now = is_due(step + 1, cfg.log_every);

            let (cost, nme) = model.batch_cost(cfg, &batch, log_now)?;
            let cost_val: f64 = cost.clone().into_scalar().elem::<f64>();
            if !cost_val.is_finite() {
                bail!("training cost diverged to {} at step {}", cost_val, step);
            }
            cost_sum += cost_val;
            batches  += 1;

            // Backward pass + Adam update
            let grads = cost.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(lr, model, grads);
            step += 1;

            if log_now {
                match nme {
                    Some(nme) => tracing::info!("step {:>7} | cost={:.4} | nme={:.4} | lr={:.2e}", step, cost_val, nme, lr),
                    None      => tracing::info!("step {:>7} | cost={:.4} | lr={:.2e}", step, cost_val, lr),
                }
            }

            if let Some(probe) = &probe {
                if is_due(step, cfg.sample_every) {
                    write_reconstruction(&model.for_eval(cfg), probe, &samples_dir, step)?;
                }
            }

            if is_due(step, cfg.save_every) {
                ckpt_manager.save_model::<TrainBackend, _>(&model, step)?;
                ckpt_manager.prune(cfg.keep_checkpoints)?;
                last_saved = Some(step);
            }

            if limit_reached(step) {
                break;
            }
        }

        if batches == 0 {
            tracing::warn!("Epoch {} produced no training batches", epoch);
        }
        let train_cost = if batches > 0 { cost_sum / batches as f64 } else { f64::NAN };

        // ── Validation phase ──────────────────────────────────────────────────
        let (val_cost, val_nme) = match &val_loader {
            Some(loader) => validate(&model.for_eval(cfg), loader.iter())?,
            None         => (None, None),
        };

        println!(
            "Epoch {:>3}/{} | step={} | train_cost={:.4} | val_cost={} | val_nme={}",
            epoch,
            cfg.epochs,
            step,
            train_cost,
            val_cost.map_or("-".to_string(), |c| format!("{c:.4}")),
            val_nme.map_or("-".to_string(), |e| format!("{e:.4}")),
        );

        metrics.log(&EpochMetrics {
            epoch,
            step,
            lr,
            train_cost,
            val_cost,
            val_nme,
        })?;
    }

    // ── Final checkpoint ──────────────────────────────────────────────────────
    if step > 0 && last_saved != Some(step) {
        ckpt_manager.save_model::<TrainBackend, _>(&model, step)?;
        ckpt_manager.prune(cfg.keep_checkpoints)?;
    }

    tracing::info!("Training complete at step {}", step);
    Ok(())
}

/// Epoch (from 1) that the step after `step` belongs to.
fn epoch_of_step(step: usize, batches_per_epoch: usize) -> usize {
    step / batches_per_epoch.max(1) + 1
}

fn is_due(step: usize, every: usize) -> bool {
    every > 0 && step % every == 0
}

fn mean_of(values: impl IntoIterator<Item = f32>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0f64, 0usize), |(s, n), v| (s + v as f64, n + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Mean cost and mean NME over a validation pass.
fn validate(
    model:   &LandmarkModel<InnerBackend>,
    batches: impl Iterator<Item = FaceBatch<InnerBackend>>,
) -> Result<(Option<f64>, Option<f64>)> {
    let mut cost_sum     = 0.0f64;
    let mut cost_batches = 0usize;
    let mut errors       = Vec::new();

    for batch in batches {
        let prediction = model.predict(&batch)?;
        if let Some(cost) = prediction.cost {
            cost_sum     += cost;
            cost_batches += 1;
        }
        errors.extend(batch_errors(&batch, &prediction)?.into_iter().flatten());
    }

    let val_cost = (cost_batches > 0).then(|| cost_sum / cost_batches as f64);
    Ok((val_cost, mean_of(errors)))
}

// ─── Reconstruction probe ─────────────────────────────────────────────────────
/// Undistorted first faces of the training set, fixed for the whole run.
/// Their ground-truth maps are written once next to the reconstructions.
fn probe_batch(
    cfg:         &TrainConfig,
    train:       &FaceDataset,
    device:      &Device,
    samples_dir: &Path,
) -> Result<Option<FaceBatch<InnerBackend>>> {
    let records = train
        .records()
        .iter()
        .take(PROBE_SIZE.min(cfg.batch_size))
        .cloned()
        .collect();
    let probe_set = FaceDataset::new(records, cfg.sample_options(false));
    let samples: Vec<FaceSample> = (0..probe_set.len()).filter_map(|i| probe_set.get(i)).collect();
    if samples.is_empty() {
        tracing::warn!("No probe faces could be loaded; skipping reconstructions");
        return Ok(None);
    }

    let batch = FaceBatcher::<InnerBackend>::new(device.clone()).batch(samples);
    if let Some(maps) = &batch.heatmaps {
        let [n, k, h, _] = maps.dims();
        write_heatmap_montage(&tensor_values(maps.clone())?, n, k, h, samples_dir.join("ground_truth.png"))?;
    }
    Ok(Some(batch))
}

fn write_reconstruction(
    model:       &LandmarkModel<InnerBackend>,
    probe:       &FaceBatch<InnerBackend>,
    samples_dir: &Path,
    step:        usize,
) -> Result<()> {
    let maps = model.reconstruct(probe.images.clone());
    let [n, k, h, _] = maps.dims();
    let values = tensor_values(maps)?;

    let (min, max) = values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    tracing::info!(
        "step {:>7} | reconstruction min={:.4} max={:.4} mean={:.4}",
        step,
        min,
        max,
        mean_of(values.iter().copied()).unwrap_or(0.0),
    );

    write_heatmap_montage(&values, n, k, h, samples_dir.join(format!("recon_step_{step:08}.png")))
}
