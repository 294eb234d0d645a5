// ============================================================
// Layer 5 — Cascaded Alignment Network
// ============================================================
// Refines the VAE's landmark maps into direct coordinate
// regression.
//
//   features [N,F,H,H] ─┐
//                        ├─ concat → [N, F+68, H, H]
//   heatmaps [N,68,H,H] ─┘
//                │
//   stage i  (i = 1..n)
//     conv k3 s1 → BN → act → dropout
//     conv k3 s2 → BN → act → dropout       H → ⌈H/2⌉
//     └─ aux fc → 136      (every stage but the last, when
//                           deep supervision is on)
//                │
//   fusion: flatten(stage n−1) ‖ flatten(stage n)
//     fc → act → dropout   (× hidden layers)
//     fc → 136
//
// With the defaults (F = 100, H = 64) the stages produce
// 48@32, 64@16, 96@8 and 128@4 maps.
//
// Reference: Burn Book §3 (Building Blocks)

use anyhow::{bail, Result};
use burn::{
    module::Ignored,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
    },
    prelude::*,
};

use crate::domain::landmarks::{NUM_COORDS, NUM_LANDMARKS};
use crate::ml::loss::l2_penalty;
use crate::ml::vae::{conv_output_size, Activation, HeatmapVae, HeatmapVaeConfig, VaeOutput};

const KERNEL: usize = 3;
const PADDING: usize = 1;

#[derive(Config, Debug)]
pub struct AlignHeadConfig {
    /// Output channels of each stage
    #[config(default = "vec![48, 64, 96, 128]")]
    pub stage_channels: Vec<usize>,
    /// Drop probability of each stage
    #[config(default = "vec![0.1, 0.1, 0.2, 0.3]")]
    pub stage_dropout: Vec<f64>,
    /// Widths of the fusion fc layers
    #[config(default = "vec![256, 192]")]
    pub fc_hidden: Vec<usize>,
    #[config(default = 0.1)]
    pub fc_dropout: f64,
    /// Regress landmarks after every intermediate stage too
    #[config(default = true)]
    pub deep_supervision: bool,
    /// L2 weight on the fusion fc weights
    #[config(default = 0.0005)]
    pub weight_decay: f64,
}

impl AlignHeadConfig {
    pub fn validate(&self, backbone: &HeatmapVaeConfig) -> Result<()> {
        if self.stage_channels.len() < 2 {
            bail!("the alignment head needs at least two stages");
        }
        if self.stage_dropout.len() != self.stage_channels.len() {
            bail!(
                "stage_dropout has {} entries for {} stages",
                self.stage_dropout.len(),
                self.stage_channels.len()
            );
        }
        if self
            .stage_dropout
            .iter()
            .chain(std::iter::once(&self.fc_dropout))
            .any(|p| !(0.0..1.0).contains(p))
        {
            bail!("dropout probabilities must be in [0, 1)");
        }
        if self.stage_channels.contains(&0) || self.fc_hidden.contains(&0) {
            bail!("stage channels and fc widths must be positive");
        }

        let feature_size = backbone.encoder_sizes()?.get(1).copied().unwrap_or(0);
        if feature_size != backbone.heatmap_size() {
            bail!(
                "encoder features ({0}x{0}) and heatmaps ({1}x{1}) differ in size; \
                 use an odd first filter size",
                feature_size,
                backbone.heatmap_size()
            );
        }
        Ok(())
    }

    /// Side length after each stage, starting with the heatmap size.
    pub fn stage_sizes(&self, input_size: usize) -> Vec<usize> {
        let mut sizes = vec![input_size];
        for i in 0..self.stage_channels.len() {
            sizes.push(conv_output_size(sizes[i], KERNEL, 2, PADDING).unwrap_or(1));
        }
        sizes
    }

    pub fn init<B: Backend>(&self, backbone: &HeatmapVaeConfig, device: &B::Device) -> Result<AlignHead<B>> {
        self.validate(backbone)?;

        let input_size = backbone.heatmap_size();
        let sizes      = self.stage_sizes(input_size);
        let last       = self.stage_channels.len() - 1;

        let mut in_ch  = backbone.n_filters[0] + NUM_LANDMARKS;
        let mut stages = Vec::with_capacity(self.stage_channels.len());
        for (i, &ch) in self.stage_channels.iter().enumerate() {
            let flat = ch * sizes[i + 1] * sizes[i + 1];
            let aux  = (self.deep_supervision && i < last)
                .then(|| LinearConfig::new(flat, NUM_COORDS).init(device));

            stages.push(AlignStage {
                conv_a: Conv2dConfig::new([in_ch, ch], [KERNEL, KERNEL])
                    .with_padding(PaddingConfig2d::Explicit(PADDING, PADDING))
                    .init(device),
                norm_a: BatchNormConfig::new(ch).init(device),
                conv_b: Conv2dConfig::new([ch, ch], [KERNEL, KERNEL])
                    .with_stride([2, 2])
                    .with_padding(PaddingConfig2d::Explicit(PADDING, PADDING))
                    .init(device),
                norm_b:  BatchNormConfig::new(ch).init(device),
                dropout: DropoutConfig::new(self.stage_dropout[i]).init(),
                aux,
            });
            in_ch = ch;
        }

        let flat_of = |i: usize| self.stage_channels[i] * sizes[i + 1] * sizes[i + 1];
        let mut width  = flat_of(last - 1) + flat_of(last);
        let mut hidden = Vec::with_capacity(self.fc_hidden.len());
        for &h in &self.fc_hidden {
            hidden.push(LinearConfig::new(width, h).init(device));
            width = h;
        }

        Ok(AlignHead {
            stages,
            hidden,
            output:     LinearConfig::new(width, NUM_COORDS).init(device),
            dropout:    DropoutConfig::new(self.fc_dropout).init(),
            activation: Ignored(backbone.activation),
        })
    }

    /// Build a full aligner: a fresh backbone from `backbone` plus this head.
    pub fn init_aligner<B: Backend>(
        &self,
        backbone: &HeatmapVaeConfig,
        device:   &B::Device,
    ) -> Result<LandmarkAligner<B>> {
        Ok(LandmarkAligner {
            backbone: backbone.init(device)?,
            head:     self.init(backbone, device)?,
        })
    }
}

// ─── AlignStage ───────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct AlignStage<B: Backend> {
    pub conv_a:  Conv2d<B>,
    pub norm_a:  BatchNorm<B, 2>,
    pub conv_b:  Conv2d<B>,
    pub norm_b:  BatchNorm<B, 2>,
    pub dropout: Dropout,
    pub aux:     Option<Linear<B>>,
}

impl<B: Backend> AlignStage<B> {
    fn forward(&self, x: Tensor<B, 4>, act: Activation) -> Tensor<B, 4> {
        let x = self.dropout.forward(act.apply(self.norm_a.forward(self.conv_a.forward(x))));
        self.dropout.forward(act.apply(self.norm_b.forward(self.conv_b.forward(x))))
    }
}

// ─── AlignHead ────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct AlignHead<B: Backend> {
    pub stages:     Vec<AlignStage<B>>,
    pub hidden:     Vec<Linear<B>>,
    pub output:     Linear<B>,
    pub dropout:    Dropout,
    pub activation: Ignored<Activation>,
}

#[derive(Debug, Clone)]
pub struct AlignOutput<B: Backend> {
    /// Final prediction — shape: [batch, 136]
    pub landmarks:       Tensor<B, 2>,
    /// Intermediate predictions, one per supervised stage
    pub stage_landmarks: Vec<Tensor<B, 2>>,
}

impl<B: Backend> AlignHead<B> {
    pub fn forward(&self, features: Tensor<B, 4>, heatmaps: Tensor<B, 4>) -> AlignOutput<B> {
        let act = self.activation.0;
        let mut x = Tensor::cat(vec![features, heatmaps], 1);

        let mut stage_landmarks = Vec::new();
        let mut outputs         = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            x = stage.forward(x, act);
            if let Some(aux) = &stage.aux {
                stage_landmarks.push(aux.forward(x.clone().flatten::<2>(1, 3)));
            }
            outputs.push(x.clone());
        }

        // init guarantees at least two stages
        let n     = outputs.len();
        let fused = Tensor::cat(
            outputs[n - 2..]
                .iter()
                .map(|t| t.clone().flatten::<2>(1, 3))
                .collect(),
            1,
        );

        let mut h = fused;
        for fc in &self.hidden {
            h = self.dropout.forward(act.apply(fc.forward(h)));
        }

        AlignOutput { landmarks: self.output.forward(h), stage_landmarks }
    }

    /// Σ ½‖W‖² over the fusion hidden layers.
    pub fn l2_penalty(&self) -> Tensor<B, 1> {
        let device = self.output.weight.device();
        self.hidden
            .iter()
            .map(|fc| l2_penalty(fc.weight.val()))
            .fold(Tensor::zeros([1], &device), |acc, t| acc + t)
    }
}

// ─── LandmarkAligner ──────────────────────────────────────────────────────────
/// Heatmap VAE backbone followed by the alignment head.
#[derive(Module, Debug)]
pub struct LandmarkAligner<B: Backend> {
    pub backbone: HeatmapVae<B>,
    pub head:     AlignHead<B>,
}

impl<B: Backend> LandmarkAligner<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> (VaeOutput<B>, AlignOutput<B>) {
        let vae   = self.backbone.forward(images);
        let align = self.head.forward(vae.features.clone(), vae.heatmaps.clone());
        (vae, align)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn tiny_backbone() -> HeatmapVaeConfig {
        HeatmapVaeConfig::new()
            .with_input_size(16)
            .with_n_filters(vec![4, 4])
            .with_filter_sizes(vec![3, 3])
            .with_n_hidden(8)
            .with_n_code(4)
    }

    fn tiny_head() -> AlignHeadConfig {
        AlignHeadConfig::new()
            .with_stage_channels(vec![4, 6, 8])
            .with_stage_dropout(vec![0.0, 0.0, 0.0])
            .with_fc_hidden(vec![16])
    }

    #[test]
    fn test_default_stage_sizes() {
        assert_eq!(AlignHeadConfig::new().stage_sizes(64), vec![64, 32, 16, 8, 4]);
    }

    #[test]
    fn test_forward_shapes_and_aux_heads() {
        let device = Default::default();
        let model: LandmarkAligner<TestBackend> =
            tiny_head().init_aligner(&tiny_backbone(), &device).unwrap();

        let (vae, align) = model.forward(Tensor::zeros([2, 1, 16, 16], &device));
        assert_eq!(vae.heatmaps.dims(), [2, NUM_LANDMARKS, 8, 8]);
        assert_eq!(align.landmarks.dims(), [2, NUM_COORDS]);
        // three stages → two intermediate heads
        assert_eq!(align.stage_landmarks.len(), 2);
        assert!(align.stage_landmarks.iter().all(|t| t.dims() == [2, NUM_COORDS]));
    }

    #[test]
    fn test_no_aux_heads_without_deep_supervision() {
        let device = Default::default();
        let model: LandmarkAligner<TestBackend> = tiny_head()
            .with_deep_supervision(false)
            .init_aligner(&tiny_backbone(), &device)
            .unwrap();
        let (_, align) = model.forward(Tensor::zeros([1, 1, 16, 16], &device));
        assert!(align.stage_landmarks.is_empty());
    }

    #[test]
    fn test_single_stage_rejected() {
        let cfg = tiny_head().with_stage_channels(vec![4]).with_stage_dropout(vec![0.0]);
        assert!(cfg.validate(&tiny_backbone()).is_err());
    }

    #[test]
    fn test_even_first_kernel_with_odd_input_rejected() {
        let backbone = tiny_backbone().with_input_size(15).with_filter_sizes(vec![4, 3]);
        assert!(tiny_head().validate(&backbone).is_err());
    }

    #[test]
    fn test_l2_penalty_is_positive() {
        let device = Default::default();
        let head: AlignHead<TestBackend> = tiny_head().init(&tiny_backbone(), &device).unwrap();
        let l2: f32 = head.l2_penalty().into_scalar();
        assert!(l2 > 0.0);
    }
}
