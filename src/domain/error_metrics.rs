//! Landmark error metrics.
//!
//! All errors are normalised by the interocular distance of the ground
//! truth (outer eye corners, points 36 and 45), which makes them
//! independent of face size and image resolution.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::landmarks::LandmarkSet;

/// Number of integration steps used for the CED area.
const CED_STEPS: usize = 1000;

/// Mean point-to-point distance between `gt` and `pred`, divided by the
/// interocular distance of `gt`.
///
/// Returns `None` when the sets differ in size or the ground truth has a
/// degenerate (zero) interocular distance.
pub fn normalized_mean_error(gt: &LandmarkSet, pred: &LandmarkSet) -> Option<f32> {
    if gt.len() != pred.len() || gt.is_empty() {
        return None;
    }
    let norm = gt.interocular_distance()?;
    if norm <= f32::EPSILON {
        return None;
    }
    let total: f32 = gt
        .points
        .iter()
        .zip(&pred.points)
        .map(|(g, p)| g.distance(p))
        .sum();
    Some(total / gt.len() as f32 / norm)
}

/// Fraction of errors strictly below `threshold`.
pub fn threshold_accuracy(errors: &[f32], threshold: f32) -> f32 {
    if errors.is_empty() {
        return 0.0;
    }
    errors.iter().filter(|&&e| e < threshold).count() as f32 / errors.len() as f32
}

/// Area under the cumulative error distribution on `[0, max_threshold]`,
/// normalised so a perfect predictor scores 1.
pub fn ced_auc(errors: &[f32], max_threshold: f32) -> f32 {
    if errors.is_empty() || max_threshold <= 0.0 {
        return 0.0;
    }
    let mut sorted = errors.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n    = sorted.len() as f32;
    let step = max_threshold / CED_STEPS as f32;
    let ced  = |t: f32| sorted.partition_point(|&e| e <= t) as f32 / n;

    // trapezoidal rule
    let mut area = 0.0;
    let mut prev = ced(0.0);
    for i in 1..=CED_STEPS {
        let cur = ced(step * i as f32);
        area += 0.5 * (prev + cur) * step;
        prev = cur;
    }
    area / max_threshold
}

#[derive(Error, Debug, PartialEq)]
pub enum SubsetSpecError {
    #[error("subset spec '{0}' has an empty name")]
    EmptyName(String),

    #[error("subset spec '{0}' has an invalid length")]
    InvalidLength(String),
}

/// A named, consecutive slice of the evaluation set. `len = None` takes
/// everything that is left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsetSpec {
    pub name: String,
    pub len:  Option<usize>,
}

impl SubsetSpec {
    /// Parse `name:len` or a bare `name` (the remainder).
    pub fn parse(spec: &str) -> Result<Self, SubsetSpecError> {
        let (name, len) = match spec.split_once(':') {
            Some((name, len)) => {
                let len = len
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| SubsetSpecError::InvalidLength(spec.to_string()))?;
                (name.trim(), Some(len))
            }
            None => (spec.trim(), None),
        };
        if name.is_empty() {
            return Err(SubsetSpecError::EmptyName(spec.to_string()));
        }
        Ok(Self { name: name.to_string(), len })
    }

    /// The 300-W common/challenging split: LFPW, HELEN, then IBUG.
    pub fn default_300w() -> Vec<Self> {
        vec![
            Self { name: "lfpw".into(),  len: Some(224) },
            Self { name: "helen".into(), len: Some(330) },
            Self { name: "ibug".into(),  len: None },
        ]
    }
}

impl std::str::FromStr for SubsetSpec {
    type Err = SubsetSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsetMean {
    pub name:  String,
    pub count: usize,
    pub mean:  Option<f32>,
}

/// Mean error of each consecutive subset. Samples without an error (`None`)
/// still occupy their slot so subset boundaries stay aligned with the list.
pub fn subset_means(errors: &[Option<f32>], specs: &[SubsetSpec]) -> Vec<SubsetMean> {
    let mut start = 0;
    specs
        .iter()
        .map(|spec| {
            let end   = spec.len.map_or(errors.len(), |l| (start + l).min(errors.len()));
            let slice = &errors[start.min(end)..end];
            start = end;

            let valid: Vec<f32> = slice.iter().flatten().copied().collect();
            SubsetMean {
                name:  spec.name.clone(),
                count: valid.len(),
                mean:  mean(&valid),
            }
        })
        .collect()
}

fn mean(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f32>() / values.len() as f32)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdAccuracy {
    pub threshold: f32,
    pub accuracy:  f32,
}

/// Aggregate error report for one evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub samples:       usize,
    pub skipped:       usize,
    pub mean_error:    Option<f32>,
    pub accuracies:    Vec<ThresholdAccuracy>,
    pub auc_threshold: f32,
    pub auc:           f32,
    pub subsets:       Vec<SubsetMean>,
}

impl ErrorSummary {
    pub fn from_samples(
        errors:        &[Option<f32>],
        thresholds:    &[f32],
        auc_threshold: f32,
        subsets:       &[SubsetSpec],
    ) -> Self {
        let valid: Vec<f32> = errors.iter().flatten().copied().collect();
        Self {
            samples:    errors.len(),
            skipped:    errors.len() - valid.len(),
            mean_error: mean(&valid),
            accuracies: thresholds
                .iter()
                .map(|&t| ThresholdAccuracy { threshold: t, accuracy: threshold_accuracy(&valid, t) })
                .collect(),
            auc_threshold,
            auc:     ced_auc(&valid, auc_threshold),
            subsets: subset_means(errors, subsets),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::landmarks::{Point, LEFT_EYE_OUTER, NUM_COORDS, RIGHT_EYE_OUTER};

    fn face() -> LandmarkSet {
        let mut set = LandmarkSet::from_flat_68(&[0.5; NUM_COORDS]).unwrap();
        set.points[LEFT_EYE_OUTER]  = Point::new(0.3, 0.4);
        set.points[RIGHT_EYE_OUTER] = Point::new(0.7, 0.4);
        set
    }

    #[test]
    fn test_identical_sets_have_zero_error() {
        let gt = face();
        assert_eq!(normalized_mean_error(&gt, &gt), Some(0.0));
    }

    #[test]
    fn test_uniform_shift_is_normalised_by_interocular() {
        let gt   = face();
        let mut pred = gt.clone();
        for p in &mut pred.points {
            p.x += 0.04;
        }
        // every point off by 0.04, interocular 0.4 → 0.1
        let e = normalized_mean_error(&gt, &pred).unwrap();
        assert!((e - 0.1).abs() < 1e-5);
    }

    #[test]
    fn test_degenerate_ground_truth_is_skipped() {
        let gt = LandmarkSet::from_flat_68(&[0.5; NUM_COORDS]).unwrap();
        assert!(normalized_mean_error(&gt, &gt).is_none());
    }

    #[test]
    fn test_threshold_accuracy_is_strict() {
        let errors = [0.01, 0.05, 0.07, 0.2];
        assert_eq!(threshold_accuracy(&errors, 0.05), 0.25);
        assert_eq!(threshold_accuracy(&errors, 0.08), 0.75);
        assert_eq!(threshold_accuracy(&[], 0.08), 0.0);
    }

    #[test]
    fn test_ced_auc_bounds() {
        assert!((ced_auc(&[0.0, 0.0], 0.08) - 1.0).abs() < 1e-3);
        assert_eq!(ced_auc(&[0.5, 0.9], 0.08), 0.0);
        // half the samples perfect, half failed → half the area
        assert!((ced_auc(&[0.0, 1.0], 0.08) - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_subset_spec_parsing() {
        assert_eq!(
            SubsetSpec::parse("helen:330").unwrap(),
            SubsetSpec { name: "helen".into(), len: Some(330) }
        );
        assert_eq!(SubsetSpec::parse("ibug").unwrap().len, None);
        assert!(matches!(SubsetSpec::parse("x:abc"), Err(SubsetSpecError::InvalidLength(_))));
        assert!(matches!(SubsetSpec::parse(":3"), Err(SubsetSpecError::EmptyName(_))));
    }

    #[test]
    fn test_subset_means_keep_slots_for_skipped_samples() {
        let errors = [Some(0.1), None, Some(0.3), Some(0.5), Some(0.7)];
        let specs  = [
            SubsetSpec { name: "a".into(), len: Some(2) },
            SubsetSpec { name: "b".into(), len: None },
        ];
        let means = subset_means(&errors, &specs);
        assert_eq!(means[0].count, 1);
        assert!((means[0].mean.unwrap() - 0.1).abs() < 1e-6);
        assert_eq!(means[1].count, 3);
        assert!((means[1].mean.unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_summary_of_empty_run_has_no_nans() {
        let s = ErrorSummary::from_samples(&[], &[0.05], 0.08, &SubsetSpec::default_300w());
        assert_eq!(s.samples, 0);
        assert!(s.mean_error.is_none());
        assert_eq!(s.auc, 0.0);
        assert!(s.subsets.iter().all(|m| m.mean.is_none()));
    }
}
