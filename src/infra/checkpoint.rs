// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores model weights using Burn's CompactRecorder.
//
// What gets saved:
//   1. Model weights (model_step_N.mpk) — all learned parameters
//   2. latest_step.json                 — which step was last saved
//   3. train_config.json                — the full run config
//
// The config is what lets `eval`, `render` and alignment
// fine-tuning rebuild the exact architecture before loading
// the weights into it; loading fails if the shapes differ.
//
// File naming convention:
//   checkpoints/
//     model_step_20000.mpk   ← weights after step 20000
//     model_step_40000.mpk
//     latest_step.json       ← 40000
//     train_config.json      ← TrainConfig as JSON
//     metrics.csv            ← written by MetricsLogger
//
// Older weight files beyond `keep_checkpoints` are pruned.
//
// Reference: Burn Book §5 (Records and Checkpointing)
//            Rust Book §9 (Error Handling)

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::application::train_use_case::TrainConfig;

const WEIGHTS_PREFIX: &str = "model_step_";
const LATEST_FILE: &str = "latest_step.json";
const CONFIG_FILE: &str = "train_config.json";

/// Manages saving and loading of model checkpoints.
/// All files are stored in the configured directory.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Create a new CheckpointManager.
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        // a missing dir resurfaces as an error on the first save
        fs::create_dir_all(&dir).ok();
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn weights_path(&self, step: usize) -> PathBuf {
        self.dir.join(format!("{WEIGHTS_PREFIX}{step}"))
    }

    /// Save model weights for `step` and point latest_step.json at them.
    pub fn save_model<B: Backend, M: Module<B>>(&self, model: &M, step: usize) -> Result<()> {
        // the recorder adds the file extension
        let path = self.weights_path(step);

        CompactRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;

        let latest_path = self.dir.join(LATEST_FILE);
        fs::write(&latest_path, serde_json::to_string(&step)?)
            .with_context(|| format!("Failed to write '{}'", latest_path.display()))?;

        tracing::debug!("Saved checkpoint: step {}", step);
        Ok(())
    }

    /// Load the weights of the latest saved step into `model`.
    pub fn load_model<B: Backend, M: Module<B>>(&self, model: M, device: &B::Device) -> Result<M> {
        let step = self.latest_step()?.with_context(|| {
            format!(
                "No checkpoint in '{}'. Have you trained the model first?",
                self.dir.display()
            )
        })?;
        self.load_model_at(model, step, device)
    }

    /// Load the weights saved for `step` into `model`.
    pub fn load_model_at<B: Backend, M: Module<B>>(
        &self,
        model:  M,
        step:   usize,
        device: &B::Device,
    ) -> Result<M> {
        let path = self.weights_path(step);
        tracing::info!("Loading checkpoint from step {}", step);

        let record = CompactRecorder::new()
            .load(path.clone(), device)
            .with_context(|| {
                format!(
                    "Cannot load checkpoint '{}'; does the model config match the saved weights?",
                    path.display()
                )
            })?;

        Ok(model.load_record(record))
    }

    /// Latest saved step, or `None` if nothing has been saved yet.
    pub fn latest_step(&self) -> Result<Option<usize>> {
        let path = self.dir.join(LATEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let s = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        Ok(Some(serde_json::from_str::<usize>(s.trim())?))
    }

    /// Save the training configuration to JSON.
    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(cfg)?;

        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;

        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    /// Load the training configuration from JSON.
    pub fn load_config(&self) -> Result<TrainConfig> {
        let path = self.dir.join(CONFIG_FILE);

        let json = fs::read_to_string(&path).with_context(|| {
            format!(
                "Cannot read config from '{}'. Make sure you have trained into this directory.",
                path.display()
            )
        })?;

        serde_json::from_str(&json)
            .with_context(|| format!("Malformed config in '{}'", path.display()))
    }

    /// Steps that have weight files on disk, ascending.
    pub fn saved_steps(&self) -> Result<Vec<usize>> {
        let mut steps: Vec<usize> = fs::read_dir(&self.dir)
            .with_context(|| format!("Cannot list '{}'", self.dir.display()))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                let rest = name.strip_prefix(WEIGHTS_PREFIX)?;
                rest.split('.').next()?.parse::<usize>().ok()
            })
            .collect();
        steps.sort_unstable();
        steps.dedup();
        Ok(steps)
    }

    /// Delete all but the newest `keep` weight files. `keep = 0` keeps all.
    pub fn prune(&self, keep: usize) -> Result<()> {
        if keep == 0 {
            return Ok(());
        }
        let steps = self.saved_steps()?;
        if steps.len() <= keep {
            return Ok(());
        }

        let stale = &steps[..steps.len() - keep];
        for entry in fs::read_dir(&self.dir)?.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_stale = name
                .strip_prefix(WEIGHTS_PREFIX)
                .and_then(|rest| rest.split('.').next()?.parse::<usize>().ok())
                .is_some_and(|step| stale.contains(&step));
            if is_stale {
                fs::remove_file(entry.path())
                    .with_context(|| format!("Cannot remove '{}'", entry.path().display()))?;
                tracing::debug!("Pruned old checkpoint '{}'", name);
            }
        }
        Ok(())
    }
}
