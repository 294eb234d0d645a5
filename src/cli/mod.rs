// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// Four commands are supported:
//   1. `train-vae`   — trains the heatmap (variational) autoencoder
//   2. `train-align` — trains the cascaded alignment network
//   3. `eval`        — scores a checkpoint on annotated test lists
//   4. `render`      — writes landmark-map montages
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, EvalArgs, RenderArgs};

use crate::application::train_use_case::{TrainConfig, TrainUseCase};

#[derive(Parser, Debug)]
#[command(
    name = "landmark-vae",
    version,
    about = "Train and evaluate heatmap VAEs and cascaded alignment networks for 68-point facial landmarks."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::TrainVae(args)   => run_train(args.into()),
            Commands::TrainAlign(args) => run_train(args.into()),
            Commands::Eval(args)       => run_eval(args),
            Commands::Render(args)     => run_render(args),
        }
    }
}

fn run_train(cfg: TrainConfig) -> Result<()> {
    tracing::info!("Starting {:?} training from {:?}", cfg.kind, cfg.train_lists);
    let checkpoint_dir = cfg.checkpoint_dir.clone();

    TrainUseCase::new(cfg).execute()?;

    println!("Training complete. Checkpoints in '{}'.", checkpoint_dir);
    Ok(())
}

fn run_eval(args: EvalArgs) -> Result<()> {
    use crate::application::eval_use_case::EvalUseCase;

    let report = EvalUseCase::new(args.into()).execute()?;
    println!("\n{report}");
    Ok(())
}

fn run_render(args: RenderArgs) -> Result<()> {
    use crate::application::render_use_case::RenderUseCase;

    for path in RenderUseCase::new(args.into()).execute()? {
        println!("Wrote {}", path.display());
    }
    Ok(())
}
