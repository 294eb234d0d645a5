// ============================================================
// Layer 5 — Loss Functions
// ============================================================
// Per-sample terms are returned as [N] tensors so callers can
// combine them before averaging over the batch.
//
// VAE cost (per sample):
//   xent = −Σ t·ln σ(x) + (1−t)·ln(1−σ(x))      over all maps
//   kl   = −½ Σ (1 + 2·ls − mu² − e^{2·ls})     over the code
//   cost = mean(xent + kl)
//
// Alignment cost (per sample):
//   sq   = Σ (p − t)²                           final + every stage
//   d²   = ‖t₃₆ − t₄₅‖²                         interocular distance
//   cost = mean(sq / d²) + wd · Σ ½‖W‖²         fusion fc weights
//
// The cross-entropy is evaluated from logits with log-sigmoid,
// which stays finite when the sigmoid saturates in f32.

use burn::{prelude::*, tensor::activation::log_sigmoid};

use crate::domain::landmarks::{LEFT_EYE_OUTER, RIGHT_EYE_OUTER};
use crate::ml::align::AlignOutput;
use crate::ml::vae::VaeOutput;

/// Smallest squared interocular distance used as a divisor.
const MIN_INTEROCULAR_SQ: f64 = 1e-12;

/// Binary cross-entropy summed over each sample's maps.
pub fn heatmap_cross_entropy<B: Backend>(logits: Tensor<B, 4>, target: Tensor<B, 4>) -> Tensor<B, 1> {
    let [n, _, _, _] = logits.dims();
    let log_p     = log_sigmoid(logits.clone());
    let log_not_p = log_sigmoid(logits.neg());
    let ll = target.clone() * log_p + target.neg().add_scalar(1.0) * log_not_p;
    ll.flatten::<2>(1, 3).sum_dim(1).reshape([n]).neg()
}

/// KL divergence of N(mu, e^{2·ls}) from N(0, 1), per sample.
pub fn kl_divergence<B: Backend>(mu: Tensor<B, 2>, log_sigma: Tensor<B, 2>) -> Tensor<B, 1> {
    let [n, _] = mu.dims();
    let two_ls = log_sigma.mul_scalar(2.0);
    let terms  = two_ls.clone().add_scalar(1.0) - mu.clone() * mu - two_ls.exp();
    terms.sum_dim(1).reshape([n]).mul_scalar(-0.5)
}

/// Reconstruction cross-entropy plus, for variational models, the KL term;
/// averaged over the batch.
pub fn vae_cost<B: Backend>(output: &VaeOutput<B>, target: Tensor<B, 4>) -> Tensor<B, 1> {
    let xent = heatmap_cross_entropy(output.logits.clone(), target);
    match &output.latent {
        Some(latent) => (xent + kl_divergence(latent.mu.clone(), latent.log_sigma.clone())).mean(),
        None         => xent.mean(),
    }
}

/// Σ (pred − target)² per sample.
pub fn landmark_sq_error<B: Backend>(pred: Tensor<B, 2>, target: Tensor<B, 2>) -> Tensor<B, 1> {
    let [n, _] = pred.dims();
    let diff = pred - target;
    (diff.clone() * diff).sum_dim(1).reshape([n])
}

/// Squared distance between the outer eye corners of `target`, per sample.
pub fn interocular_sq<B: Backend>(target: Tensor<B, 2>) -> Tensor<B, 1> {
    let [n, _] = target.dims();
    let left  = target.clone().slice([0..n, 2 * LEFT_EYE_OUTER..2 * LEFT_EYE_OUTER + 2]);
    let right = target.slice([0..n, 2 * RIGHT_EYE_OUTER..2 * RIGHT_EYE_OUTER + 2]);
    let d = left - right;
    (d.clone() * d).sum_dim(1).reshape([n]).clamp_min(MIN_INTEROCULAR_SQ)
}

/// ½‖W‖² of one weight matrix.
pub fn l2_penalty<B: Backend>(weight: Tensor<B, 2>) -> Tensor<B, 1> {
    (weight.clone() * weight).sum().mul_scalar(0.5)
}

/// Landmark regression cost of the alignment network: the final and the
/// intermediate predictions, normalised by the interocular distance, plus
/// weight decay on the fusion layers.
pub fn align_cost<B: Backend>(
    output:       &AlignOutput<B>,
    target:       Tensor<B, 2>,
    l2:           Tensor<B, 1>,
    weight_decay: f64,
) -> Tensor<B, 1> {
    let norm = interocular_sq(target.clone());

    let mut sq = landmark_sq_error(output.landmarks.clone(), target.clone());
    for stage in &output.stage_landmarks {
        sq = sq + landmark_sq_error(stage.clone(), target.clone());
    }

    (sq / norm).mean() + l2.mul_scalar(weight_decay)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    use crate::domain::landmarks::NUM_COORDS;

    type TestBackend = NdArray<f32>;

    fn scalar(t: Tensor<TestBackend, 1>) -> f32 {
        t.into_scalar()
    }

    #[test]
    fn test_kl_of_standard_normal_is_zero() {
        let device = Default::default();
        let mu = Tensor::<TestBackend, 2>::zeros([3, 5], &device);
        let ls = Tensor::<TestBackend, 2>::zeros([3, 5], &device);
        let kl = kl_divergence(mu, ls).into_data().to_vec::<f32>().unwrap();
        assert!(kl.iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn test_kl_grows_with_mean_offset() {
        let device = Default::default();
        let mu = Tensor::<TestBackend, 2>::ones([1, 4], &device);
        let ls = Tensor::<TestBackend, 2>::zeros([1, 4], &device);
        // ½ Σ mu² = 2
        assert!((scalar(kl_divergence(mu, ls)) - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_confident_correct_maps_have_near_zero_xent() {
        let device = Default::default();
        let target = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![1.0f32, 0.0, 0.0, 1.0], [1, 1, 2, 2]),
            &device,
        );
        let logits = target.clone().mul_scalar(40.0).sub_scalar(20.0);
        assert!(scalar(heatmap_cross_entropy(logits.clone(), target.clone())) < 1e-6);

        // flipped logits are heavily penalised, yet finite
        let wrong = scalar(heatmap_cross_entropy(logits.neg(), target));
        assert!(wrong.is_finite() && wrong > 70.0);
    }

    #[test]
    fn test_saturated_xent_is_not_clipped() {
        let device = Default::default();
        let target = Tensor::<TestBackend, 4>::zeros([1, 1, 1, 1], &device);
        let logits = Tensor::<TestBackend, 4>::full([1, 1, 1, 1], 100.0, &device);
        // −log σ(−100) = 100; a 1e-9 floor on σ would stop near 20.7
        let cost = scalar(heatmap_cross_entropy(logits, target));
        assert!((cost - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_interocular_normalisation() {
        let device = Default::default();
        let mut coords = vec![0.0f32; NUM_COORDS];
        coords[2 * LEFT_EYE_OUTER]  = 0.3;
        coords[2 * RIGHT_EYE_OUTER] = 0.7;
        let target = Tensor::<TestBackend, 2>::from_data(TensorData::new(coords, [1, NUM_COORDS]), &device);
        assert!((scalar(interocular_sq(target.clone())) - 0.16).abs() < 1e-6);

        let pred = target.clone().add_scalar(0.1);
        // 136 coords each off by 0.1 → 1.36
        assert!((scalar(landmark_sq_error(pred, target)) - 1.36).abs() < 1e-4);
    }

    #[test]
    fn test_l2_penalty_is_half_squared_norm() {
        let device = Default::default();
        let w = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![1.0f32, 2.0, 2.0, 0.0], [2, 2]),
            &device,
        );
        assert!((scalar(l2_penalty(w)) - 4.5).abs() < 1e-6);
    }
}
