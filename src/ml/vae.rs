// ============================================================
// Layer 5 — Heatmap VAE
// ============================================================
// Convolutional (variational) autoencoder that maps a
// grayscale face to one occupancy map per landmark.
//
//   image [N,1,S,S]
//     │  encoder: conv k×k stride 2 → act → dropout   (× L)
//     │           S → ⌈S/2⌉ → ... ; first output = "features"
//     ▼
//   bottleneck (variational only)
//     │  flatten → fc n_hidden → act
//     │  mu = fc(n_code)    log_sigma = ½·fc(n_code)
//     │  z  = mu + ε·exp(log_sigma)   (training)
//     │  z  = mu                      (inference)
//     │  fc n_hidden → act → fc flat → act → reshape
//     ▼
//   decoder: transposed conv stride 2 → act → dropout  (× L)
//     │  restores every encoder size exactly, ending with
//     │  the input channel count
//     ▼
//   final conv: 68 channels, k3 stride 2 → sigmoid
//     │
//     ▼
//   heatmaps [N,68,H,H]   with H = ⌈S/2⌉
//
// The plain autoencoder is the same network with
// `variational = false`: the decoder consumes the encoder
// output directly.
//
// Reference: Kingma & Welling (2014) Auto-Encoding Variational Bayes
//            Burn Book §3 (Building Blocks)

use anyhow::{bail, Result};
use burn::{
    module::Ignored,
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
    },
    prelude::*,
    tensor::{activation, Distribution},
};
use serde::{Deserialize, Serialize};

use crate::domain::landmarks::NUM_LANDMARKS;

// ─── Activation ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Tanh,
    Sigmoid,
}

impl Activation {
    pub fn apply<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Relu    => activation::relu(x),
            Activation::Tanh    => activation::tanh(x),
            Activation::Sigmoid => activation::sigmoid(x),
        }
    }
}

impl std::str::FromStr for Activation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "relu"    => Ok(Activation::Relu),
            "tanh"    => Ok(Activation::Tanh),
            "sigmoid" => Ok(Activation::Sigmoid),
            other     => Err(format!("unknown activation '{other}' (expected relu, tanh or sigmoid)")),
        }
    }
}

// ─── Layer geometry ───────────────────────────────────────────────────────────
const STRIDE: usize = 2;
const FINAL_KERNEL: usize = 3;

/// Padding that halves a map (rounding up) for a stride-2 conv of `kernel`.
pub fn half_padding(kernel: usize) -> usize {
    kernel.saturating_sub(1) / 2
}

/// Output side of a convolution, or `None` if the kernel does not fit.
pub fn conv_output_size(size: usize, kernel: usize, stride: usize, padding: usize) -> Option<usize> {
    let padded = size + 2 * padding;
    if padded < kernel || stride == 0 {
        return None;
    }
    Some((padded - kernel) / stride + 1)
}

/// Extra output padding a stride-2 transposed conv needs to grow `input`
/// back to exactly `target`.
pub fn transposed_output_padding(input: usize, target: usize, kernel: usize, padding: usize) -> Option<usize> {
    let base = ((input.checked_sub(1)?) * STRIDE + kernel).checked_sub(2 * padding)?;
    let extra = target.checked_sub(base)?;
    (extra < STRIDE).then_some(extra)
}

// ─── Config ───────────────────────────────────────────────────────────────────
// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
// internally — do NOT add them again or you get conflicting impls.
#[derive(Config, Debug)]
pub struct HeatmapVaeConfig {
    /// Side of the square grayscale input
    #[config(default = 128)]
    pub input_size: usize,
    #[config(default = 1)]
    pub input_channels: usize,
    /// Output channels of each encoder layer
    #[config(default = "vec![100, 100, 100]")]
    pub n_filters: Vec<usize>,
    /// Kernel size of each encoder layer
    #[config(default = "vec![3, 3, 3]")]
    pub filter_sizes: Vec<usize>,
    /// Width of the fully-connected layer around the code (0 = none)
    #[config(default = 250)]
    pub n_hidden: usize,
    /// Size of the latent code
    #[config(default = 100)]
    pub n_code: usize,
    #[config(default = true)]
    pub variational: bool,
    /// Drop probability after every activation (keep_prob = 1 - dropout)
    #[config(default = 0.2)]
    pub dropout: f64,
    #[config(default = "Activation::Relu")]
    pub activation: Activation,
}

impl HeatmapVaeConfig {
    /// Side length after each encoder layer, starting with the input.
    pub fn encoder_sizes(&self) -> Result<Vec<usize>> {
        let mut sizes = vec![self.input_size];
        for (i, &k) in self.filter_sizes.iter().enumerate() {
            let prev = sizes[i];
            match conv_output_size(prev, k, STRIDE, half_padding(k)) {
                Some(s) if s > 0 => sizes.push(s),
                _ => bail!("encoder layer {} (kernel {}) does not fit a {}x{} map", i, k, prev, prev),
            }
        }
        Ok(sizes)
    }

    /// Side of the predicted landmark maps.
    pub fn heatmap_size(&self) -> usize {
        conv_output_size(self.input_size, FINAL_KERNEL, STRIDE, half_padding(FINAL_KERNEL)).unwrap_or(0)
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_filters.is_empty() {
            bail!("n_filters must name at least one encoder layer");
        }
        if self.n_filters.len() != self.filter_sizes.len() {
            bail!(
                "n_filters has {} layers but filter_sizes has {}",
                self.n_filters.len(),
                self.filter_sizes.len()
            );
        }
        if self.filter_sizes.contains(&0) || self.n_filters.contains(&0) {
            bail!("filter sizes and filter counts must be positive");
        }
        if self.input_size == 0 || self.input_channels == 0 {
            bail!("input size and channels must be positive");
        }
        if !(0.0..1.0).contains(&self.dropout) {
            bail!("dropout must be in [0, 1), got {}", self.dropout);
        }
        if self.variational && self.n_code == 0 {
            bail!("a variational model needs n_code > 0");
        }

        let sizes = self.encoder_sizes()?;
        for (i, &k) in self.filter_sizes.iter().enumerate() {
            if transposed_output_padding(sizes[i + 1], sizes[i], k, half_padding(k)).is_none() {
                bail!("decoder layer for kernel {} cannot restore size {}", k, sizes[i]);
            }
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<HeatmapVae<B>> {
        self.validate()?;
        let sizes = self.encoder_sizes()?;

        let mut in_ch   = self.input_channels;
        let mut encoder = Vec::with_capacity(self.n_filters.len());
        for (&out_ch, &k) in self.n_filters.iter().zip(&self.filter_sizes) {
            let p = half_padding(k);
            encoder.push(
                Conv2dConfig::new([in_ch, out_ch], [k, k])
                    .with_stride([STRIDE, STRIDE])
                    .with_padding(PaddingConfig2d::Explicit(p, p))
                    .init(device),
            );
            in_ch = out_ch;
        }

        let last_size = sizes[sizes.len() - 1];
        let bottleneck = self
            .variational
            .then(|| self.build_bottleneck(in_ch, last_size, device));

        // mirror of the encoder; layer i restores sizes[i]
        let mut decoder = Vec::with_capacity(self.n_filters.len());
        for i in (0..self.n_filters.len()).rev() {
            let k      = self.filter_sizes[i];
            let p      = half_padding(k);
            let out_ch = if i == 0 { self.input_channels } else { self.n_filters[i - 1] };
            let pad_out = transposed_output_padding(sizes[i + 1], sizes[i], k, p).unwrap_or(0);
            decoder.push(
                ConvTranspose2dConfig::new([self.n_filters[i], out_ch], [k, k])
                    .with_stride([STRIDE, STRIDE])
                    .with_padding([p, p])
                    .with_padding_out([pad_out, pad_out])
                    .init(device),
            );
        }

        let fp = half_padding(FINAL_KERNEL);
        let final_conv = Conv2dConfig::new([self.input_channels, NUM_LANDMARKS], [FINAL_KERNEL, FINAL_KERNEL])
            .with_stride([STRIDE, STRIDE])
            .with_padding(PaddingConfig2d::Explicit(fp, fp))
            .init(device);

        Ok(HeatmapVae {
            encoder,
            bottleneck,
            decoder,
            final_conv,
            dropout:    DropoutConfig::new(self.dropout).init(),
            activation: Ignored(self.activation),
        })
    }

    fn build_bottleneck<B: Backend>(&self, channels: usize, size: usize, device: &B::Device) -> Bottleneck<B> {
        let flat = channels * size * size;
        let (hidden, expand_hidden, code_in) = if self.n_hidden > 0 {
            (
                Some(LinearConfig::new(flat, self.n_hidden).init(device)),
                Some(LinearConfig::new(self.n_code, self.n_hidden).init(device)),
                self.n_hidden,
            )
        } else {
            (None, None, flat)
        };
        let expand_in = if self.n_hidden > 0 { self.n_hidden } else { self.n_code };

        Bottleneck {
            hidden,
            mu:        LinearConfig::new(code_in, self.n_code).init(device),
            log_sigma: LinearConfig::new(code_in, self.n_code).init(device),
            expand_hidden,
            expand:    LinearConfig::new(expand_in, flat).init(device),
            channels,
            height: size,
            width:  size,
        }
    }
}

// ─── Bottleneck ───────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    pub hidden:        Option<Linear<B>>,
    pub mu:            Linear<B>,
    pub log_sigma:     Linear<B>,
    pub expand_hidden: Option<Linear<B>>,
    pub expand:        Linear<B>,
    pub channels:      usize,
    pub height:        usize,
    pub width:         usize,
}

/// Posterior parameters of the code.
#[derive(Debug, Clone)]
pub struct Latent<B: Backend> {
    pub mu:        Tensor<B, 2>,
    pub log_sigma: Tensor<B, 2>,
}

impl<B: Backend> Bottleneck<B> {
    fn forward(&self, x: Tensor<B, 4>, act: Activation, dropout: &Dropout) -> (Tensor<B, 4>, Latent<B>) {
        let [batch, c, h, w] = x.dims();
        let flat = x.reshape([batch, c * h * w]);

        let hidden = match &self.hidden {
            Some(fc) => dropout.forward(act.apply(fc.forward(flat))),
            None     => flat,
        };

        let mu        = self.mu.forward(hidden.clone());
        let log_sigma = self.log_sigma.forward(hidden).mul_scalar(0.5);

        // sample only when gradients are tracked, i.e. while training
        let z = if B::ad_enabled() {
            let eps = mu.random_like(Distribution::Normal(0.0, 1.0));
            mu.clone() + eps * log_sigma.clone().exp()
        } else {
            mu.clone()
        };

        let y = match &self.expand_hidden {
            Some(fc) => dropout.forward(act.apply(fc.forward(z))),
            None     => z,
        };
        let y = dropout.forward(act.apply(self.expand.forward(y)))
            .reshape([batch, self.channels, self.height, self.width]);

        (y, Latent { mu, log_sigma })
    }
}

// ─── HeatmapVae ───────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct HeatmapVae<B: Backend> {
    pub encoder:    Vec<Conv2d<B>>,
    pub bottleneck: Option<Bottleneck<B>>,
    pub decoder:    Vec<ConvTranspose2d<B>>,
    pub final_conv: Conv2d<B>,
    pub dropout:    Dropout,
    pub activation: Ignored<Activation>,
}

/// Everything a forward pass produces.
#[derive(Debug, Clone)]
pub struct VaeOutput<B: Backend> {
    /// First encoder activation, reused by the alignment head
    pub features: Tensor<B, 4>,
    /// Pre-sigmoid landmark maps
    pub logits:   Tensor<B, 4>,
    /// Landmark maps in (0, 1)
    pub heatmaps: Tensor<B, 4>,
    /// Present for variational models
    pub latent:   Option<Latent<B>>,
}

impl<B: Backend> HeatmapVae<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> VaeOutput<B> {
        let act = self.activation.0;

        let mut x = images;
        let mut features = None;
        for conv in &self.encoder {
            x = self.dropout.forward(act.apply(conv.forward(x)));
            if features.is_none() {
                features = Some(x.clone());
            }
        }
        // init guarantees at least one encoder layer
        let features = features.unwrap_or_else(|| x.clone());

        let (mut x, latent) = match &self.bottleneck {
            Some(b) => {
                let (y, latent) = b.forward(x, act, &self.dropout);
                (y, Some(latent))
            }
            None => (x, None),
        };

        for deconv in &self.decoder {
            x = self.dropout.forward(act.apply(deconv.forward(x)));
        }

        let logits   = self.final_conv.forward(x);
        let heatmaps = activation::sigmoid(logits.clone());

        VaeOutput { features, logits, heatmaps, latent }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = NdArray<f32>;

    fn tiny_config() -> HeatmapVaeConfig {
        HeatmapVaeConfig::new()
            .with_input_size(16)
            .with_n_filters(vec![4, 6])
            .with_filter_sizes(vec![3, 3])
            .with_n_hidden(8)
            .with_n_code(4)
    }

    #[test]
    fn test_default_geometry() {
        let cfg = HeatmapVaeConfig::new();
        assert_eq!(cfg.encoder_sizes().unwrap(), vec![128, 64, 32, 16]);
        assert_eq!(cfg.heatmap_size(), 64);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_transposed_padding_restores_odd_and_even_sizes() {
        // k3 p1: 16 → 32 needs one extra row, 8 → 15 needs none
        assert_eq!(transposed_output_padding(16, 32, 3, 1), Some(1));
        assert_eq!(transposed_output_padding(8, 15, 3, 1), Some(0));
        // k4 p1: exact doubling
        assert_eq!(transposed_output_padding(16, 32, 4, 1), Some(0));
        // unreachable target
        assert_eq!(transposed_output_padding(4, 20, 3, 1), None);
    }

    #[test]
    fn test_mismatched_layer_lists_rejected() {
        let cfg = HeatmapVaeConfig::new().with_filter_sizes(vec![3, 3]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_bad_dropout_rejected() {
        assert!(HeatmapVaeConfig::new().with_dropout(1.0).validate().is_err());
    }

    #[test]
    fn test_forward_shapes_odd_input() {
        let device = Default::default();
        let cfg    = tiny_config().with_input_size(15);
        let model: HeatmapVae<TestBackend> = cfg.init(&device).unwrap();

        let out = model.forward(Tensor::zeros([2, 1, 15, 15], &device));
        assert_eq!(out.features.dims(), [2, 4, 8, 8]);
        assert_eq!(out.heatmaps.dims(), [2, NUM_LANDMARKS, 8, 8]);
        assert_eq!(cfg.heatmap_size(), 8);
        assert_eq!(out.latent.unwrap().mu.dims(), [2, 4]);
    }

    #[test]
    fn test_inference_uses_posterior_mean() {
        let device = Default::default();
        let model: HeatmapVae<TestBackend> = tiny_config().init(&device).unwrap();

        let a = model.forward(Tensor::ones([1, 1, 16, 16], &device)).logits;
        let b = model.forward(Tensor::ones([1, 1, 16, 16], &device)).logits;
        let diff: f32 = (a - b).abs().sum().into_scalar();
        assert_eq!(diff, 0.0);
    }

    #[test]
    fn test_training_samples_the_code() {
        let device = Default::default();
        let model: HeatmapVae<Autodiff<TestBackend>> = tiny_config().with_dropout(0.0).init(&device).unwrap();

        // dropout is off, so only the sampled code can make two passes differ
        let a = model.forward(Tensor::ones([1, 1, 16, 16], &device)).logits;
        let b = model.forward(Tensor::ones([1, 1, 16, 16], &device)).logits;
        let diff: f32 = (a - b).abs().sum().into_scalar();
        assert!(diff > 0.0);
    }

    #[test]
    fn test_plain_autoencoder_has_no_latent() {
        let device = Default::default();
        let model: HeatmapVae<TestBackend> = tiny_config()
            .with_variational(false)
            .init(&device)
            .unwrap();
        let out = model.forward(Tensor::zeros([1, 1, 16, 16], &device));
        assert!(out.latent.is_none());
        assert_eq!(out.heatmaps.dims(), [1, NUM_LANDMARKS, 8, 8]);
    }
}
