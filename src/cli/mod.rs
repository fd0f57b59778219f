// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction, parsed with clap.
// All work is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `train`  — trains a context encoder on image windows
//   2. `detect` — builds anomaly maps with the best checkpoint
//                 and scores them against the label images

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, DetectArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "inpaint-anomaly",
    version,
    about = "Train inpainting context encoders and turn their patch predictions into anomaly maps."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)  => run_train(args),
            Commands::Detect(args) => run_detect(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Starting training '{}' on '{}'", args.experiment_name, args.data_dir.display());
    TrainUseCase::new(args.into()).execute()?;
    println!("Training complete. Checkpoints saved.");
    Ok(())
}

fn run_detect(args: DetectArgs) -> Result<()> {
    use crate::application::detect_use_case::DetectUseCase;

    tracing::info!("Starting anomaly detection '{}' for '{}'", args.detection_name, args.experiment_name);
    let reports = DetectUseCase::new(args.into()).execute()?;
    for report in &reports {
        let defined = report.agreements.iter().filter(|(_, a)| a.value().is_some()).count();
        println!("{}: {} images scored, {} with a defined AUC", report.split, report.agreements.len(), defined);
    }
    Ok(())
}
