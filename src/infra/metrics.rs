// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records training metrics to a CSV file after each epoch,
// and per-sample landmark errors after an evaluation run.
//
// Metrics recorded per epoch:
//   - epoch:      the epoch number (1, 2, 3, ...)
//   - step:       global optimiser step at the end of the epoch
//   - lr:         learning rate in effect at that step
//   - train_cost: average cost over the epoch's training batches
//   - val_cost:   average cost on the validation split
//   - val_nme:    mean normalised landmark error on validation
//
// Output file: <checkpoint_dir>/metrics.csv
//
// Example CSV output:
//   epoch,step,lr,train_cost,val_cost,val_nme
//   1,312,0.000100,5310.220000,5102.871000,0.412300
//   2,624,0.000100,2841.553000,2790.004000,0.187500
//
// Validation columns are left empty when the run has no
// validation split.
//
// Reference: Rust Book §9 (Error Handling)
//            Rust Book §12 (I/O and File Handling)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

const HEADER: &str = "epoch,step,lr,train_cost,val_cost,val_nme";

/// One row of metrics data for a single training epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// The epoch number (starts at 1)
    pub epoch: usize,

    pub step: usize,

    pub lr: f64,

    /// Average cost over all training batches of the epoch
    pub train_cost: f64,

    /// Average cost on the validation set.
    /// Should track train_cost — divergence indicates overfitting
    pub val_cost: Option<f64>,

    /// Mean normalised error on the validation set, in
    /// interocular distances
    pub val_nme: Option<f64>,
}

fn optional(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.6}")).unwrap_or_default()
}

/// Quote a CSV field when it holds a separator, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Logs epoch metrics to a CSV file for later analysis.
pub struct MetricsLogger {
    /// Full path to the CSV file
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Create a new MetricsLogger.
    /// Writes the CSV header if the file doesn't exist yet, so a
    /// resumed run keeps appending to the same log.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "{HEADER}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append one epoch's metrics as a new row in the CSV.
    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;

        writeln!(
            f,
            "{},{},{:.6},{:.6},{},{}",
            m.epoch,
            m.step,
            m.lr,
            m.train_cost,
            optional(m.val_cost),
            optional(m.val_nme),
        )?;

        tracing::debug!(
            "Logged epoch {} metrics: train_cost={:.4}, val_cost={:?}",
            m.epoch,
            m.train_cost,
            m.val_cost,
        );

        Ok(())
    }

    /// Return the path to the metrics CSV file
    pub fn csv_path(&self) -> &PathBuf {
        &self.csv_path
    }
}

/// Write one `image,nme` row per evaluated sample. Samples whose ground
/// truth has no interocular distance get an empty error column.
pub fn write_sample_errors(path: impl AsRef<Path>, rows: &[(String, Option<f32>)]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut f = fs::File::create(path)
        .with_context(|| format!("Cannot create '{}'", path.display()))?;
    writeln!(f, "image,nme")?;
    for (image, err) in rows {
        let err = err.map(|e| format!("{e:.6}")).unwrap_or_default();
        writeln!(f, "{},{err}", csv_field(image))?;
    }

    tracing::info!("Wrote {} per-sample errors to '{}'", rows.len(), path.display());
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(val_cost: Option<f64>) -> EpochMetrics {
        EpochMetrics {
            epoch:      2,
            step:       40,
            lr:         1e-4,
            train_cost: 2.5,
            val_cost,
            val_nme:    None,
        }
    }

    #[test]
    fn test_log_appends_rows_after_header() {
        let dir    = tempfile::tempdir().unwrap();
        let logger = MetricsLogger::new(dir.path()).unwrap();
        logger.log(&metrics(Some(2.0))).unwrap();
        logger.log(&metrics(None)).unwrap();

        let text  = fs::read_to_string(logger.csv_path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines[1], "2,40,0.000100,2.500000,2.000000,");
        assert_eq!(lines[2], "2,40,0.000100,2.500000,,");
    }

    #[test]
    fn test_reopening_keeps_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        MetricsLogger::new(dir.path()).unwrap().log(&metrics(None)).unwrap();
        let logger = MetricsLogger::new(dir.path()).unwrap();
        let text   = fs::read_to_string(logger.csv_path()).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn test_sample_errors_csv() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("errors.csv");
        write_sample_errors(&path, &[("a.png".into(), Some(0.05)), ("b.png".into(), None)]).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "image,nme\na.png,0.050000\nb.png,\n");
    }

    #[test]
    fn test_sample_errors_quotes_awkward_paths() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.csv");
        let rows = [
            ("faces/smith, j.png".to_string(), Some(0.1)),
            ("say \"cheese\".png".to_string(), None),
        ];
        write_sample_errors(&path, &rows).unwrap();

        let text  = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "\"faces/smith, j.png\",0.100000");
        assert_eq!(lines[2], "\"say \"\"cheese\"\".png\",");
    }
}
