// ============================================================
// Layer 4 — Face Dataset
// ============================================================
// Implements Burn's Dataset trait over annotation records.
//
// Images are decoded lazily in get(), so the DataLoader's
// worker thread does the decoding while the training loop
// runs the previous batch on the device.
//
// What a sample holds:
//   image      [1 × S × S]   standardised grayscale pixels
//   heatmaps   [68 × H × H]  landmark maps (only when asked for)
//   landmarks  [136]         ground-truth x/y pairs in [0, 1]
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

use anyhow::Result;
use burn::data::dataset::Dataset;

use crate::data::heatmap::rasterize_landmarks;
use crate::data::preprocessor::{load_grayscale, standardize, ColorDistortion};
use crate::domain::record::AnnotationRecord;

/// One decoded, ready-to-batch face.
#[derive(Debug, Clone)]
pub struct FaceSample {
    pub image:      Vec<f32>,
    pub heatmaps:   Option<Vec<f32>>,
    pub landmarks:  Vec<f32>,
    pub image_path: String,
}

/// Landmark map resolution and disc radius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeatmapSpec {
    pub size:   usize,
    pub radius: usize,
}

/// How records are turned into samples.
#[derive(Debug, Clone)]
pub struct SampleOptions {
    /// Side length of the square model input
    pub input_size: usize,
    /// Rasterize landmark maps (needed by the heatmap VAE)
    pub heatmaps:   Option<HeatmapSpec>,
    /// Photometric distortion, training only
    pub distortion: Option<ColorDistortion>,
}

pub struct FaceDataset {
    records: Vec<AnnotationRecord>,
    options: SampleOptions,
    dropped: usize,
}

impl FaceDataset {
    /// Build a dataset, dropping records whose image does not exist.
    pub fn new(records: Vec<AnnotationRecord>, options: SampleOptions) -> Self {
        let total = records.len();
        let records: Vec<AnnotationRecord> = records
            .into_iter()
            .filter(|r| {
                let ok = r.image_path.is_file();
                if !ok {
                    tracing::warn!("Skipping '{}': image not found", r.image_path.display());
                }
                ok
            })
            .collect();

        let dropped = total - records.len();
        if dropped > 0 {
            tracing::warn!("Dropped {} of {} records with missing images", dropped, total);
        }
        Self { records, options, dropped }
    }

    pub fn records(&self) -> &[AnnotationRecord] {
        &self.records
    }

    /// Number of records removed at construction.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Decode and preprocess one record.
    pub fn load_sample(&self, record: &AnnotationRecord) -> Result<FaceSample> {
        let mut image = load_grayscale(&record.image_path, self.options.input_size as u32)?;

        if let Some(distortion) = &self.options.distortion {
            distortion.apply(&mut image, &mut rand::thread_rng());
        }
        standardize(&mut image);

        let heatmaps = self
            .options
            .heatmaps
            .map(|spec| rasterize_landmarks(&record.landmarks, spec.size, spec.radius));

        Ok(FaceSample {
            image,
            heatmaps,
            landmarks:  record.landmarks.to_flat(),
            image_path: record.display_name(),
        })
    }
}

impl Dataset<FaceSample> for FaceDataset {
    fn get(&self, index: usize) -> Option<FaceSample> {
        let record = self.records.get(index)?;
        match self.load_sample(record) {
            Ok(sample) => Some(sample),
            Err(e) => {
                // a None here ends the pass for this worker
                tracing::warn!("Failed to load sample {}: {:#}", index, e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}
