// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the four subcommands and all their flags:
//
//   train-vae    — heatmap (variational) autoencoder
//   train-align  — cascaded alignment network on a VAE backbone
//   eval         — NME / accuracy / AUC of a checkpoint
//   render       — landmark-map montages
//
// Flags shared by both training commands live in
// CommonTrainArgs and the VAE architecture in VaeModelArgs,
// both flattened into the subcommands.
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand};

use crate::application::{
    eval_use_case::EvalConfig,
    render_use_case::RenderConfig,
    train_use_case::{ModelKind, TrainConfig},
};
use crate::data::heatmap::DEFAULT_RADIUS;
use crate::domain::error_metrics::SubsetSpec;
use crate::ml::{
    align::AlignHeadConfig,
    schedule::LearningRateSchedule,
    vae::{Activation, HeatmapVaeConfig},
};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train the heatmap VAE (or a plain autoencoder with --plain)
    TrainVae(TrainVaeArgs),

    /// Train the alignment network, optionally on a trained VAE backbone
    TrainAlign(TrainAlignArgs),

    /// Evaluate a checkpoint on annotated test lists
    Eval(EvalArgs),

    /// Write ground-truth (and predicted) landmark-map montages
    Render(RenderArgs),
}

// ─── Shared training flags ────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct CommonTrainArgs {
    /// Annotation lists, comma separated
    #[arg(long, value_delimiter = ',', default_value = "data/train.txt")]
    pub train_lists: Vec<String>,

    /// Directory that relative image paths are resolved against
    #[arg(long)]
    pub image_root: Option<String>,

    /// Directory for weights, config, metrics and samples
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,

    /// Passes over the training data
    #[arg(long, default_value_t = 100)]
    pub epochs: usize,

    /// Stop after this many optimiser steps
    #[arg(long)]
    pub max_steps: Option<usize>,

    /// Learning rate (initial rate for decaying schedules)
    #[arg(long)]
    pub lr: Option<f64>,

    /// Radius in pixels of each landmark disc
    #[arg(long, default_value_t = DEFAULT_RADIUS)]
    pub heatmap_radius: usize,

    /// Disable the photometric distortion of training images
    #[arg(long)]
    pub no_augment: bool,

    /// Fraction of records held out for validation
    #[arg(long, default_value_t = 0.1)]
    pub val_fraction: f64,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Data loader worker threads
    #[arg(long, default_value_t = 1)]
    pub num_workers: usize,

    #[arg(long, default_value_t = 100)]
    pub log_every: usize,

    /// Reconstruction montage interval in steps (VAE only, 0 = never)
    #[arg(long, default_value_t = 1000)]
    pub sample_every: usize,

    /// Checkpoint interval in steps (0 = only at the end)
    #[arg(long, default_value_t = 5000)]
    pub save_every: usize,

    /// Weight files kept on disk (0 = all)
    #[arg(long, default_value_t = 5)]
    pub keep_checkpoints: usize,

    /// Continue from the latest checkpoint in --checkpoint-dir
    #[arg(long)]
    pub resume: bool,
}

impl CommonTrainArgs {
    /// Copy the shared flags onto a config built from a kind's defaults.
    fn into_config(self, mut cfg: TrainConfig) -> TrainConfig {
        cfg.train_lists      = self.train_lists;
        cfg.image_root       = self.image_root;
        cfg.checkpoint_dir   = self.checkpoint_dir;
        cfg.batch_size       = self.batch_size;
        cfg.epochs           = self.epochs;
        cfg.max_steps        = self.max_steps;
        cfg.heatmap_radius   = self.heatmap_radius;
        cfg.augment          = !self.no_augment;
        cfg.val_fraction     = self.val_fraction;
        cfg.seed             = self.seed;
        cfg.num_workers      = self.num_workers;
        cfg.log_every        = self.log_every;
        cfg.sample_every     = self.sample_every;
        cfg.save_every       = self.save_every;
        cfg.keep_checkpoints = self.keep_checkpoints;
        cfg.resume           = self.resume;

        if let Some(lr) = self.lr {
            cfg.schedule = match cfg.schedule {
                LearningRateSchedule::Constant { .. } => LearningRateSchedule::Constant { lr },
                LearningRateSchedule::ExponentialDecay { decay_samples, decay_rate, staircase, .. } => {
                    LearningRateSchedule::ExponentialDecay { initial: lr, decay_samples, decay_rate, staircase }
                }
            };
        }
        cfg
    }
}

// ─── VAE architecture ─────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct VaeModelArgs {
    /// Side of the square grayscale input
    #[arg(long, default_value_t = 128)]
    pub input_size: usize,

    /// Output channels of each encoder layer
    #[arg(long, value_delimiter = ',', default_values_t = vec![100, 100, 100])]
    pub n_filters: Vec<usize>,

    /// Kernel size of each encoder layer
    #[arg(long, value_delimiter = ',', default_values_t = vec![3, 3, 3])]
    pub filter_sizes: Vec<usize>,

    /// Fully-connected layer around the code (0 = none)
    #[arg(long, default_value_t = 250)]
    pub n_hidden: usize,

    /// Latent code size
    #[arg(long, default_value_t = 100)]
    pub n_code: usize,

    /// Plain autoencoder: no sampling, no KL term
    #[arg(long)]
    pub plain: bool,

    /// Drop probability after each activation
    #[arg(long, default_value_t = 0.2)]
    pub dropout: f64,

    /// relu, tanh or sigmoid
    #[arg(long, default_value = "relu")]
    pub activation: Activation,
}

impl From<VaeModelArgs> for HeatmapVaeConfig {
    fn from(a: VaeModelArgs) -> Self {
        HeatmapVaeConfig::new()
            .with_input_size(a.input_size)
            .with_n_filters(a.n_filters)
            .with_filter_sizes(a.filter_sizes)
            .with_n_hidden(a.n_hidden)
            .with_n_code(a.n_code)
            .with_variational(!a.plain)
            .with_dropout(a.dropout)
            .with_activation(a.activation)
    }
}

// ─── train-vae ────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct TrainVaeArgs {
    #[command(flatten)]
    pub common: CommonTrainArgs,

    #[command(flatten)]
    pub model: VaeModelArgs,
}

impl From<TrainVaeArgs> for TrainConfig {
    fn from(a: TrainVaeArgs) -> Self {
        let cfg = TrainConfig { vae: a.model.into(), ..TrainConfig::default() };
        a.common.into_config(cfg)
    }
}

// ─── train-align ──────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct TrainAlignArgs {
    #[command(flatten)]
    pub common: CommonTrainArgs,

    /// Backbone architecture; replaced by the saved config with --backbone-dir
    #[command(flatten)]
    pub model: VaeModelArgs,

    /// Checkpoint directory of a trained VAE to start the backbone from
    #[arg(long)]
    pub backbone_dir: Option<String>,

    /// Optimise only the alignment head
    #[arg(long)]
    pub freeze_backbone: bool,

    /// Output channels of each alignment stage
    #[arg(long, value_delimiter = ',', default_values_t = vec![48, 64, 96, 128])]
    pub stage_channels: Vec<usize>,

    /// Drop probability of each alignment stage
    #[arg(long, value_delimiter = ',', default_values_t = vec![0.1, 0.1, 0.2, 0.3])]
    pub stage_dropout: Vec<f64>,

    /// Widths of the fusion fc layers
    #[arg(long, value_delimiter = ',', default_values_t = vec![256, 192])]
    pub fc_hidden: Vec<usize>,

    #[arg(long, default_value_t = 0.1)]
    pub fc_dropout: f64,

    /// Only supervise the final landmark prediction
    #[arg(long)]
    pub no_deep_supervision: bool,

    /// L2 weight on the fusion fc weights
    #[arg(long, default_value_t = 0.0005)]
    pub weight_decay: f64,

    /// Samples per decay period of the learning rate
    #[arg(long, default_value_t = 192_000)]
    pub lr_decay_samples: usize,

    #[arg(long, default_value_t = 0.95)]
    pub lr_decay_rate: f64,

    /// Decay continuously instead of in steps
    #[arg(long)]
    pub smooth_decay: bool,
}

impl From<TrainAlignArgs> for TrainConfig {
    fn from(a: TrainAlignArgs) -> Self {
        let cfg = TrainConfig {
            kind:            ModelKind::Align,
            vae:             a.model.into(),
            align:           AlignHeadConfig::new()
                .with_stage_channels(a.stage_channels)
                .with_stage_dropout(a.stage_dropout)
                .with_fc_hidden(a.fc_hidden)
                .with_fc_dropout(a.fc_dropout)
                .with_deep_supervision(!a.no_deep_supervision)
                .with_weight_decay(a.weight_decay),
            schedule:        LearningRateSchedule::ExponentialDecay {
                initial:       6e-4,
                decay_samples: a.lr_decay_samples,
                decay_rate:    a.lr_decay_rate,
                staircase:     !a.smooth_decay,
            },
            backbone_dir:    a.backbone_dir,
            freeze_backbone: a.freeze_backbone,
            ..TrainConfig::align_default()
        };
        a.common.into_config(cfg)
    }
}

// ─── eval ─────────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct EvalArgs {
    /// Annotation lists to evaluate on, comma separated, in subset order
    #[arg(long, value_delimiter = ',', default_value = "data/test.txt")]
    pub test_lists: Vec<String>,

    #[arg(long)]
    pub image_root: Option<String>,

    /// Directory the model was trained into
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,

    /// NME thresholds for the accuracy lines
    #[arg(long, value_delimiter = ',', default_values_t = vec![0.05, 0.08, 0.10])]
    pub thresholds: Vec<f32>,

    /// Upper NME limit of the CED area
    #[arg(long, default_value_t = 0.08)]
    pub auc_threshold: f32,

    /// Consecutive subsets as name:len, the last may omit len
    #[arg(long, value_delimiter = ',', default_value = "lfpw:224,helen:330,ibug")]
    pub subsets: Vec<SubsetSpec>,

    /// Report no subset means
    #[arg(long)]
    pub no_subsets: bool,

    /// Per-sample error CSV
    #[arg(long)]
    pub errors_out: Option<String>,

    /// JSON report
    #[arg(long)]
    pub report_out: Option<String>,
}

impl From<EvalArgs> for EvalConfig {
    fn from(a: EvalArgs) -> Self {
        EvalConfig {
            test_lists:     a.test_lists,
            image_root:     a.image_root,
            checkpoint_dir: a.checkpoint_dir,
            batch_size:     a.batch_size,
            thresholds:     a.thresholds,
            auc_threshold:  a.auc_threshold,
            subsets:        if a.no_subsets { Vec::new() } else { a.subsets },
            errors_out:     a.errors_out,
            report_out:     a.report_out,
        }
    }
}

// ─── render ───────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct RenderArgs {
    #[arg(long, value_delimiter = ',', default_value = "data/test.txt")]
    pub lists: Vec<String>,

    #[arg(long)]
    pub image_root: Option<String>,

    /// Also render this model's landmark maps
    #[arg(long)]
    pub checkpoint_dir: Option<String>,

    /// Number of faces from the start of the lists
    #[arg(long, default_value_t = 16)]
    pub count: usize,

    #[arg(long, default_value = "renders")]
    pub out_dir: String,

    /// Input side when no checkpoint is given
    #[arg(long, default_value_t = 128)]
    pub input_size: usize,

    /// Disc radius when no checkpoint is given
    #[arg(long, default_value_t = DEFAULT_RADIUS)]
    pub radius: usize,
}

impl From<RenderArgs> for RenderConfig {
    fn from(a: RenderArgs) -> Self {
        RenderConfig {
            lists:          a.lists,
            image_root:     a.image_root,
            checkpoint_dir: a.checkpoint_dir,
            count:          a.count,
            out_dir:        a.out_dir,
            input_size:     a.input_size,
            radius:         a.radius,
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    fn parse(args: &[&str]) -> Commands {
        Cli::try_parse_from(std::iter::once("landmark-vae").chain(args.iter().copied()))
            .unwrap()
            .command
    }

    #[test]
    fn test_train_vae_flags() {
        let Commands::TrainVae(args) = parse(&[
            "train-vae", "--train-lists", "a.txt,b.txt", "--n-filters", "8,16",
            "--filter-sizes", "5,3", "--plain", "--activation", "tanh", "--lr", "0.001",
        ]) else {
            panic!("expected train-vae");
        };
        let cfg: TrainConfig = args.into();
        assert_eq!(cfg.kind, ModelKind::Vae);
        assert_eq!(cfg.train_lists, vec!["a.txt", "b.txt"]);
        assert_eq!(cfg.vae.n_filters, vec![8, 16]);
        assert_eq!(cfg.vae.filter_sizes, vec![5, 3]);
        assert!(!cfg.vae.variational);
        assert_eq!(cfg.vae.activation, Activation::Tanh);
        assert_eq!(cfg.schedule, LearningRateSchedule::Constant { lr: 0.001 });
    }

    #[test]
    fn test_train_align_defaults() {
        let Commands::TrainAlign(args) = parse(&["train-align", "--backbone-dir", "vae", "--freeze-backbone"]) else {
            panic!("expected train-align");
        };
        let cfg: TrainConfig = args.into();
        assert_eq!(cfg.kind, ModelKind::Align);
        assert_eq!(cfg.backbone_dir.as_deref(), Some("vae"));
        assert!(cfg.freeze_backbone);
        assert_eq!(cfg.align.stage_channels, vec![48, 64, 96, 128]);
        assert_eq!(cfg.schedule.learning_rate(0, 64), 6e-4);
        assert_eq!(cfg.schedule.learning_rate(3000, 64), 6e-4 * 0.95);
    }

    #[test]
    fn test_eval_subsets() {
        let Commands::Eval(args) = parse(&["eval", "--subsets", "common:554,ibug"]) else {
            panic!("expected eval");
        };
        let cfg: EvalConfig = args.into();
        assert_eq!(cfg.subsets.len(), 2);
        assert_eq!(cfg.subsets[0].len, Some(554));
        assert_eq!(cfg.subsets[1].len, None);

        let Commands::Eval(args) = parse(&["eval", "--no-subsets"]) else {
            panic!("expected eval");
        };
        assert!(EvalConfig::from(args).subsets.is_empty());
    }

    #[test]
    fn test_bad_activation_is_rejected() {
        assert!(Cli::try_parse_from(["landmark-vae", "train-vae", "--activation", "gelu"]).is_err());
    }
}
