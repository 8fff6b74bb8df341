// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// Three commands are supported:
//   1. `train`    — trains a task model on text files
//   2. `predict`  — loads a checkpoint and predicts line by line
//   3. `transfer` — remaps a checkpoint onto new vocabularies
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

// Declare the commands submodule
pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, PredictArgs, TrainArgs, TransferArgs};

use crate::application::predict_use_case::PredictUseCase;
use crate::application::train_use_case::TrainUseCase;
use crate::application::transfer_use_case::TransferUseCase;

/// The main CLI struct — clap reads the fields and generates
/// argument parsing code automatically via the Parser derive macro.
#[derive(Parser, Debug)]
#[command(
    name = "seqlearn",
    version = "0.1.0",
    about = "Train, serve, and vocabulary-transfer sequence models on text files."
)]
pub struct Cli {
    /// The subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    /// This keeps the CLI layer thin — it only routes, never computes.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args) => Self::run_train(args),
            Commands::Predict(args) => Self::run_predict(args),
            Commands::Transfer(args) => Self::run_transfer(args),
        }
    }

    fn run_train(args: TrainArgs) -> Result<()> {
        TrainUseCase::new(args.into()).execute()
    }

    fn run_predict(args: PredictArgs) -> Result<()> {
        let use_case = PredictUseCase::new(args.checkpoint_dir);
        let predictions = use_case.execute(&args.input)?;
        for line in PredictUseCase::render(&predictions) {
            println!("{line}");
        }
        Ok(())
    }

    fn run_transfer(args: TransferArgs) -> Result<()> {
        TransferUseCase::new(
            args.source_dir,
            args.target_dir,
            args.source_vocabulary,
            args.target_vocabulary,
        )
        .execute()
    }
}
