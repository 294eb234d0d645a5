// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates all the other layers to accomplish
// a specific goal: training, evaluating or rendering.
//
// Rules for this layer:
//   - No ML math or model code here
//   - No printing here (that's Layer 1)
//   - No direct file parsing (that's Layer 4 and 6)
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// Training of the heatmap VAE and the alignment network
pub mod train_use_case;

// Scoring a checkpoint on annotated test lists
pub mod eval_use_case;

// Ground-truth and predicted landmark map montages
pub mod render_use_case;
