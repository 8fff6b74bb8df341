// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the three subcommands: `train`, `predict`, and
// `transfer`, and all their configurable flags.
//
// clap's derive macros automatically generate:
//   - help text (--help)
//   - error messages for missing args
//   - type conversion (string → usize, f64, etc.)
//
// Reference: Rust Book §12 (Building a CLI Program)

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::application::train_use_case::TrainConfig;

/// The top-level subcommands available to the user
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a task model on text files
    Train(TrainArgs),

    /// Predict with a trained checkpoint (features only)
    Predict(PredictArgs),

    /// Move a trained checkpoint onto new vocabularies
    Transfer(TransferArgs),
}

/// All arguments for the `train` command.
/// Each field becomes a --flag on the command line.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Which task to train: seq2seq, language_model, tagger, classifier
    #[arg(long, default_value = "seq2seq")]
    pub task: String,

    /// Training feature file (one tokenized example per line)
    #[arg(long)]
    pub train_features: PathBuf,

    /// Training label file (required unless the task derives labels)
    #[arg(long)]
    pub train_labels: Option<PathBuf>,

    /// Pharaoh-format word alignments for guided attention (seq2seq)
    #[arg(long)]
    pub train_alignments: Option<PathBuf>,

    /// Evaluation feature file — enables the per-epoch EVAL pass
    #[arg(long)]
    pub eval_features: Option<PathBuf>,

    /// Evaluation label file
    #[arg(long)]
    pub eval_labels: Option<PathBuf>,

    /// Source-side vocabulary file (one token per line)
    #[arg(long)]
    pub source_vocabulary: Option<PathBuf>,

    /// Label-side vocabulary file (targets, tags, or classes)
    #[arg(long)]
    pub target_vocabulary: Option<PathBuf>,

    /// Directory for weights, config, history, and the export
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: PathBuf,

    /// Number of examples per batch
    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,

    /// Number of full passes through the training data
    #[arg(long, default_value_t = 10)]
    pub epochs: usize,

    /// Learning rate
    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,

    /// Optimizer: sgd or adam
    #[arg(long, default_value = "adam")]
    pub optimizer: String,

    /// Momentum (sgd only)
    #[arg(long, default_value_t = 0.9)]
    pub momentum: f64,

    /// Hidden dimension of the model
    #[arg(long, default_value_t = 64)]
    pub d_model: usize,

    /// Inner dimension of the feed-forward network
    #[arg(long, default_value_t = 256)]
    pub d_ff: usize,

    /// Maximum number of tokens greedy decoding may generate
    #[arg(long, default_value_t = 50)]
    pub max_decode_length: usize,

    /// Supervise decoder attention with alignments: ce or mse
    #[arg(long)]
    pub guided_alignment_type: Option<String>,

    /// Weight of the guided-alignment term
    #[arg(long, default_value_t = 1.0)]
    pub guided_alignment_weight: f64,

    /// Replace generated <unk> with the most-attended source token
    #[arg(long, default_value_t = false)]
    pub replace_unknown_target: bool,

    /// Weight path prefixes to exclude from training,
    /// e.g. --freeze-layer encoder/layers/0
    #[arg(long = "freeze-layer")]
    pub freeze_layers: Vec<String>,

    /// Shuffling seed — same seed, same batch order
    #[arg(long, default_value_t = 1)]
    pub seed: u64,
}

// The CLI boundary converts into the application-layer config, so the
// use cases never depend on clap.
impl From<TrainArgs> for TrainConfig {
    fn from(args: TrainArgs) -> Self {
        TrainConfig {
            task:                    args.task,
            train_features:          args.train_features,
            train_labels:            args.train_labels,
            train_alignments:        args.train_alignments,
            eval_features:           args.eval_features,
            eval_labels:             args.eval_labels,
            source_vocabulary:       args.source_vocabulary,
            target_vocabulary:       args.target_vocabulary,
            checkpoint_dir:          args.checkpoint_dir,
            batch_size:              args.batch_size,
            epochs:                  args.epochs,
            lr:                      args.lr,
            optimizer:               args.optimizer,
            momentum:                args.momentum,
            d_model:                 args.d_model,
            d_ff:                    args.d_ff,
            max_decode_length:       args.max_decode_length,
            guided_alignment_type:   args.guided_alignment_type,
            guided_alignment_weight: args.guided_alignment_weight,
            replace_unknown_target:  args.replace_unknown_target,
            freeze_layers:           args.freeze_layers,
            seed:                    args.seed,
        }
    }
}

/// Arguments for the `predict` command
#[derive(Args, Debug)]
pub struct PredictArgs {
    /// Checkpoint directory holding the exported model
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: PathBuf,

    /// Input feature file, one example per line
    #[arg(long)]
    pub input: PathBuf,
}

/// Arguments for the `transfer` command
#[derive(Args, Debug)]
pub struct TransferArgs {
    /// Checkpoint directory of the trained source model
    #[arg(long)]
    pub source_dir: PathBuf,

    /// Directory to write the transferred checkpoint into
    #[arg(long)]
    pub target_dir: PathBuf,

    /// New source-side vocabulary (defaults to the old one)
    #[arg(long)]
    pub source_vocabulary: Option<PathBuf>,

    /// New label-side vocabulary (defaults to the old one)
    #[arg(long)]
    pub target_vocabulary: Option<PathBuf>,
}
