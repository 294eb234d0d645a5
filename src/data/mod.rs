// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// This layer takes annotation lists all the way to device-ready
// tensor batches.
//
// The pipeline flows in this order:
//
//   annotation list (.txt)
//       │
//       ▼
//   AnnotationListLoader → parses "path x0 y0 ... x67 y67" lines
//       │
//       ▼
//   split_train_val      → optional validation holdout
//       │
//       ▼
//   FaceDataset          → Burn Dataset; decodes lazily:
//       │                    preprocessor (grayscale, distortion,
//       │                    standardisation) + heatmap rasterizer
//       ▼
//   FaceBatcher          → stacks samples into tensor batches
//       │
//       ▼
//   DataLoader           → one worker thread prefetches batches
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Parses annotation list files
pub mod loader;

/// Grayscale decoding, photometric distortion, standardisation
pub mod preprocessor;

/// Landmark coordinates ⇄ per-landmark occupancy maps
pub mod heatmap;

/// Implements Burn's Dataset trait for annotated faces
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;

/// Seeded shuffle and train/validation split
pub mod splitter;

#[cfg(test)]
pub mod fixtures;
