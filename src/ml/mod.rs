// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// This layer contains the Burn model code: network
// definitions, losses, the training loops and inference.
//
// What's in this layer:
//
//   vae.rs        — Heatmap (variational) autoencoder
//                   conv encoder, reparameterised bottleneck,
//                   transposed-conv decoder, landmark maps
//
//   align.rs      — Cascaded alignment head on top of the VAE
//                   conv/BN stages with intermediate supervision,
//                   fused fc regression to 136 coordinates
//
//   loss.rs       — Cross-entropy, KL, normalised landmark
//                   regression and L2 terms
//
//   schedule.rs   — Constant / exponentially decaying learning rate
//
//   trainer.rs    — The training loops
//                   forward, loss, backward, Adam step, periodic
//                   logging, reconstructions and checkpoints
//
//   inferencer.rs — Rebuilds a trained model from its checkpoint
//                   and turns batches into landmark predictions
//
// Backends:
//   training  → Autodiff<InnerBackend>
//   inference → InnerBackend
//   InnerBackend is NdArray (CPU) unless the `wgpu` feature is on.
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)

use burn::prelude::Backend;

/// Heatmap VAE / plain autoencoder
pub mod vae;

/// Cascaded landmark regression head
pub mod align;

/// Loss terms
pub mod loss;

/// Learning rate schedules
pub mod schedule;

/// Training loops with validation and checkpointing
pub mod trainer;

/// Inference engine — loads checkpoints and predicts landmarks
pub mod inferencer;

#[cfg(feature = "wgpu")]
pub type InnerBackend = burn::backend::Wgpu;
#[cfg(not(feature = "wgpu"))]
pub type InnerBackend = burn::backend::NdArray<f32>;

pub type TrainBackend = burn::backend::Autodiff<InnerBackend>;

pub type Device = <InnerBackend as Backend>::Device;

/// Default device of the compiled backend.
pub fn default_device() -> Device {
    Device::default()
}
