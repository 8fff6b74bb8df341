// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates a full training run in order:
//
//   Step 1: Build the task model        (Layer 5 - ml)
//   Step 2: Initialize from config      (Layer 5 - ml)
//   Step 3: Create variables + slots    (Layer 5 - ml)
//   Step 4: Build datasets              (Layer 4 - data)
//   Step 5: Save config                 (Layer 6 - infra)
//   Step 6: Run the epoch loop          (Layer 5 - ml)
//   Step 7: Export the serving artifact (Layer 6 - infra)
//
// Reference: Burn Book §5 (Training)

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::application::TrainingBackend;
use crate::infra::checkpoint::CheckpointManager;
use crate::infra::metrics::MetricsLogger;
use crate::ml::model::{
    DataConfig, GuidedAlignment, ModelParams, SequenceModel, TaskModel, TaskType,
};
use crate::ml::optim::{Adam, Sgd, SlotOptimizer};
use crate::ml::trainer::{run_training, TrainOptions};

// ─── Training Configuration ──────────────────────────────────────────────────
// All knobs for one training run. Serializable so the run can be
// rebuilt (or transferred) from its checkpoint directory alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub task:                    String,
    pub train_features:          PathBuf,
    pub train_labels:            Option<PathBuf>,
    pub train_alignments:        Option<PathBuf>,
    pub eval_features:           Option<PathBuf>,
    pub eval_labels:             Option<PathBuf>,
    pub source_vocabulary:       Option<PathBuf>,
    pub target_vocabulary:       Option<PathBuf>,
    pub checkpoint_dir:          PathBuf,
    pub batch_size:              usize,
    pub epochs:                  usize,
    pub lr:                      f64,
    pub optimizer:               String,
    pub momentum:                f64,
    pub d_model:                 usize,
    pub d_ff:                    usize,
    pub max_decode_length:       usize,
    pub guided_alignment_type:   Option<String>,
    pub guided_alignment_weight: f64,
    pub replace_unknown_target:  bool,
    pub freeze_layers:           Vec<String>,
    pub seed:                    u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            task:                    "seq2seq".to_string(),
            train_features:          PathBuf::from("data/train.src"),
            train_labels:            None,
            train_alignments:        None,
            eval_features:           None,
            eval_labels:             None,
            source_vocabulary:       None,
            target_vocabulary:       None,
            checkpoint_dir:          PathBuf::from("checkpoints"),
            batch_size:              32,
            epochs:                  10,
            lr:                      1e-3,
            optimizer:               "adam".to_string(),
            momentum:                0.9,
            d_model:                 64,
            d_ff:                    256,
            max_decode_length:       50,
            guided_alignment_type:   None,
            guided_alignment_weight: 1.0,
            replace_unknown_target:  false,
            freeze_layers:           Vec::new(),
            seed:                    1,
        }
    }
}

impl TrainConfig {
    pub fn task_type(&self) -> Result<TaskType> {
        Ok(TaskType::from_str(&self.task)?)
    }

    pub fn data_config(&self) -> DataConfig {
        DataConfig {
            source_vocabulary: self.source_vocabulary.clone(),
            target_vocabulary: self.target_vocabulary.clone(),
        }
    }

    pub fn model_params(&self) -> Result<ModelParams> {
        let guided_alignment = self
            .guided_alignment_type
            .as_deref()
            .map(GuidedAlignment::from_str)
            .transpose()?;
        Ok(ModelParams {
            d_model: self.d_model,
            d_ff: self.d_ff,
            max_decode_length: self.max_decode_length,
            guided_alignment,
            guided_alignment_weight: self.guided_alignment_weight,
            replace_unknown_target: self.replace_unknown_target,
            freeze_layers: self.freeze_layers.clone(),
        })
    }

    pub fn build_optimizer(&self) -> Result<Box<dyn SlotOptimizer<TrainingBackend>>> {
        match self.optimizer.as_str() {
            "sgd" => Ok(Box::new(Sgd::new(self.momentum))),
            "adam" => Ok(Box::new(Adam::new())),
            other => anyhow::bail!("unknown optimizer '{other}' (expected 'sgd' or 'adam')"),
        }
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<()> {
        let cfg = &self.config;
        let device = Default::default();

        // ── Step 1 + 2: build and initialize the task model ──────────────────
        tracing::info!("Building '{}' model", cfg.task);
        let mut model = TaskModel::<TrainingBackend>::new(cfg.task_type()?);
        model
            .initialize(&cfg.data_config(), &cfg.model_params()?)
            .context("model initialization failed")?;

        // ── Step 3: materialize weights and optimizer slots ──────────────────
        let mut optimizer = cfg.build_optimizer()?;
        model.create_variables(&device, Some(optimizer.as_mut()))?;
        tracing::info!(
            "Created {} weights ({} trainable)",
            model.store().len(),
            model.store().trainable_names().len()
        );

        // ── Step 4: datasets through the task's inputter ─────────────────────
        let inputter = model.example_inputter();
        let train = inputter.make_training_dataset(
            &cfg.train_features,
            cfg.train_labels.as_deref(),
            cfg.train_alignments.as_deref(),
            cfg.batch_size,
            cfg.seed,
        )?;
        let eval = match &cfg.eval_features {
            Some(features) => Some(inputter.make_evaluation_dataset(
                features,
                cfg.eval_labels.as_deref(),
                cfg.batch_size,
            )?),
            None => None,
        };

        // ── Step 5: persist the run configuration ────────────────────────────
        let checkpoint = CheckpointManager::new(&cfg.checkpoint_dir);
        checkpoint.save_config(cfg)?;
        let metric_names: Vec<String> = model
            .metric_set()
            .values()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        let mut logger = MetricsLogger::create(
            &cfg.checkpoint_dir.join("history.csv"),
            metric_names,
        )?;

        // ── Step 6: the epoch loop ───────────────────────────────────────────
        let report = run_training(
            &mut model,
            optimizer.as_mut(),
            &train,
            eval.as_ref(),
            &TrainOptions {
                epochs: cfg.epochs,
                learning_rate: cfg.lr,
            },
            Some(&checkpoint),
            Some(&mut logger),
            &device,
        )?;
        tracing::info!("Training done, final loss {:.4}", report.final_train_loss);

        // ── Step 7: export the self-contained serving artifact ───────────────
        checkpoint.save_export(&model.serve_function()?)?;
        Ok(())
    }
}
