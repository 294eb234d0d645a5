// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Handles the cross-cutting concerns that don't belong in
// any specific business layer:
//
//   checkpoint.rs — Saving and loading model weights
//                   Uses Burn's CompactRecorder to
//                   serialise model parameters to disk.
//                   Also saves/loads TrainConfig as JSON
//                   so evaluation can rebuild the model.
//
//   metrics.rs    — Training metrics logging
//                   Epoch-level costs and validation error
//                   to CSV, plus per-sample evaluation errors.
//
//   visualize.rs  — Heatmap montages
//                   Ground-truth and reconstructed landmark
//                   maps tiled into one PNG.
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Checkpointing)

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;

/// Landmark map montages
pub mod visualize;
