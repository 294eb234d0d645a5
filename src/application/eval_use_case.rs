// ============================================================
// Layer 2 — Eval Use Case
// ============================================================
// Scores a trained checkpoint on annotated test lists:
//
//   Step 1: Rebuild the model from its checkpoint  (Layer 5 - ml)
//   Step 2: Load the test records, in list order   (Layer 4 - data)
//   Step 3: Predict landmarks batch by batch       (Layer 5 - ml)
//   Step 4: Summarise the normalised errors        (Layer 3 - domain)
//   Step 5: Write per-sample errors / JSON report  (Layer 6 - infra)
//
// Records are never shuffled or distorted here. The subset
// means (e.g. LFPW / HELEN / IBUG on 300-W) are consecutive
// slices of the list, so the order must survive loading.

use anyhow::{bail, Context, Result};
use burn::data::dataloader::DataLoaderBuilder;
use serde::Serialize;
use std::{fmt, fs};

use crate::application::train_use_case::ModelKind;
use crate::data::{batcher::FaceBatcher, dataset::FaceDataset, loader::AnnotationListLoader};
use crate::domain::error_metrics::{ErrorSummary, SubsetSpec};
use crate::domain::traits::RecordSource;
use crate::infra::metrics::write_sample_errors;
use crate::ml::inferencer::{batch_errors, Predictor};
use crate::ml::InnerBackend;

#[derive(Debug, Clone)]
pub struct EvalConfig {
    pub test_lists:     Vec<String>,
    pub image_root:     Option<String>,
    pub checkpoint_dir: String,
    pub batch_size:     usize,
    /// NME thresholds for the accuracy columns
    pub thresholds:     Vec<f32>,
    /// Upper limit of the CED curve integrated for the AUC
    pub auc_threshold:  f32,
    /// Consecutive named slices of the test lists; empty for none
    pub subsets:        Vec<SubsetSpec>,
    /// Per-sample `image,nme` CSV
    pub errors_out:     Option<String>,
    /// Full report as JSON
    pub report_out:     Option<String>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            test_lists:     vec!["data/test.txt".to_string()],
            image_root:     None,
            checkpoint_dir: "checkpoints".to_string(),
            batch_size:     64,
            thresholds:     vec![0.05, 0.08, 0.10],
            auc_threshold:  0.08,
            subsets:        SubsetSpec::default_300w(),
            errors_out:     None,
            report_out:     None,
        }
    }
}

/// Outcome of one evaluation run.
#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub kind:           ModelKind,
    pub checkpoint_dir: String,
    /// Mean batch cost, when the model's cost could be computed
    pub mean_cost:      Option<f64>,
    pub summary:        ErrorSummary,
}

impl fmt::Display for EvalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.summary;
        writeln!(f, "Model:      {:?} ({})", self.kind, self.checkpoint_dir)?;
        writeln!(f, "Samples:    {} ({} skipped: zero interocular distance)", s.samples, s.skipped)?;
        if let Some(cost) = self.mean_cost {
            writeln!(f, "Mean cost:  {cost:.4}")?;
        }
        match s.mean_error {
            Some(e) => writeln!(f, "Mean NME:   {e:.4}")?,
            None    => writeln!(f, "Mean NME:   -")?,
        }
        for acc in &s.accuracies {
            writeln!(f, "NME < {:.2}: {:.2}%", acc.threshold, acc.accuracy * 100.0)?;
        }
        writeln!(f, "AUC@{:.2}:   {:.4}", s.auc_threshold, s.auc)?;
        for subset in &s.subsets {
            match subset.mean {
                Some(m) => writeln!(f, "  {:<8} {:>5} samples, mean NME {:.4}", subset.name, subset.count, m)?,
                None    => writeln!(f, "  {:<8} {:>5} samples", subset.name, subset.count)?,
            }
        }
        Ok(())
    }
}

pub struct EvalUseCase {
    config: EvalConfig,
}

impl EvalUseCase {
    pub fn new(config: EvalConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<EvalReport> {
        let cfg = &self.config;
        if cfg.batch_size == 0 {
            bail!("batch_size must be positive");
        }

        // ── Step 1: Rebuild the trained model ─────────────────────────────────
        let predictor = Predictor::from_checkpoint(&cfg.checkpoint_dir)?;

        // ── Step 2: Test records, in order, undistorted ───────────────────────
        let records = AnnotationListLoader::new(&cfg.test_lists)
            .with_image_root(cfg.image_root.clone())
            .load_all()?;
        let total   = records.len();
        let dataset = FaceDataset::new(records, predictor.config().sample_options(false));
        if dataset.dropped() > 0 && !cfg.subsets.is_empty() {
            bail!(
                "{} test images are missing; subset boundaries would no longer line up",
                dataset.dropped()
            );
        }
        let expected = dataset.records().len();
        tracing::info!("Evaluating {} of {} records", expected, total);

        // ── Step 3: Predict ───────────────────────────────────────────────────
        // single-threaded loader: batches arrive in list order
        let loader = DataLoaderBuilder::new(FaceBatcher::<InnerBackend>::new(predictor.device().clone()))
            .batch_size(cfg.batch_size)
            .build(dataset);

        let mut rows: Vec<(String, Option<f32>)> = Vec::with_capacity(expected);
        let mut cost_sum     = 0.0f64;
        let mut cost_batches = 0usize;

        for batch in loader.iter() {
            let prediction = predictor.predict(&batch)?;
            if let Some(cost) = prediction.cost {
                cost_sum     += cost;
                cost_batches += 1;
            }
            let errors = batch_errors(&batch, &prediction)?;
            rows.extend(batch.image_paths.iter().cloned().zip(errors));
            tracing::debug!("Evaluated {}/{} samples", rows.len(), expected);
        }

        if rows.len() != expected {
            if !cfg.subsets.is_empty() {
                bail!(
                    "only {} of {} test images could be decoded; subset boundaries would no longer line up",
                    rows.len(),
                    expected
                );
            }
            tracing::warn!("Only {} of {} test images could be decoded", rows.len(), expected);
        }

        // ── Step 4: Summarise ─────────────────────────────────────────────────
        let errors: Vec<Option<f32>> = rows.iter().map(|(_, e)| *e).collect();
        let report = EvalReport {
            kind:           predictor.config().kind,
            checkpoint_dir: cfg.checkpoint_dir.clone(),
            mean_cost:      (cost_batches > 0).then(|| cost_sum / cost_batches as f64),
            summary:        ErrorSummary::from_samples(&errors, &cfg.thresholds, cfg.auc_threshold, &cfg.subsets),
        };

        // ── Step 5: Outputs ───────────────────────────────────────────────────
        if let Some(path) = &cfg.errors_out {
            write_sample_errors(path, &rows)?;
        }
        if let Some(path) = &cfg.report_out {
            let json = serde_json::to_string_pretty(&report)?;
            fs::write(path, json).with_context(|| format!("Cannot write report to '{path}'"))?;
            tracing::info!("Wrote evaluation report to '{}'", path);
        }

        Ok(report)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error_metrics::{SubsetMean, ThresholdAccuracy};

    #[test]
    fn test_default_thresholds() {
        let cfg = EvalConfig::default();
        assert_eq!(cfg.thresholds, vec![0.05, 0.08, 0.10]);
        assert_eq!(cfg.auc_threshold, 0.08);
        assert_eq!(cfg.subsets.len(), 3);
    }

    #[test]
    fn test_missing_checkpoint_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EvalConfig {
            checkpoint_dir: dir.path().to_string_lossy().into_owned(),
            ..EvalConfig::default()
        };
        assert!(EvalUseCase::new(cfg).execute().is_err());
    }

    #[test]
    fn test_report_display_lists_subsets() {
        let report = EvalReport {
            kind:           ModelKind::Vae,
            checkpoint_dir: "ckpt".into(),
            mean_cost:      Some(1.5),
            summary:        ErrorSummary {
                samples:       2,
                skipped:       0,
                mean_error:    Some(0.06),
                accuracies:    vec![ThresholdAccuracy { threshold: 0.08, accuracy: 0.5 }],
                auc_threshold: 0.08,
                auc:           0.3,
                subsets:       vec![SubsetMean { name: "lfpw".into(), count: 2, mean: Some(0.06) }],
            },
        };
        let text = report.to_string();
        assert!(text.contains("Mean NME:   0.0600"));
        assert!(text.contains("NME < 0.08: 50.00%"));
        assert!(text.contains("lfpw"));
    }
}
