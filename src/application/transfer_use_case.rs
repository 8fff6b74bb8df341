// ============================================================
// Layer 2 — TransferUseCase
// ============================================================
// Continues a trained run on new vocabularies:
//
//   Step 1: Rebuild the source model from its checkpoint
//   Step 2: Build a target model with the new vocabulary files
//   Step 3: Transfer weights through the correspondence maps
//   Step 4: Save the target as a fresh checkpoint + export
//
// Optimizer slots only survive a transfer that happens inside a
// live training process; checkpoints persist weights alone, so a
// transfer from disk restarts with zeroed slots.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::application::train_use_case::TrainConfig;
use crate::application::TrainingBackend;
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::model::{SequenceModel, TaskModel};

pub struct TransferUseCase {
    source_dir: PathBuf,
    target_dir: PathBuf,
    source_vocabulary: Option<PathBuf>,
    target_vocabulary: Option<PathBuf>,
}

impl TransferUseCase {
    pub fn new(
        source_dir: impl Into<PathBuf>,
        target_dir: impl Into<PathBuf>,
        source_vocabulary: Option<PathBuf>,
        target_vocabulary: Option<PathBuf>,
    ) -> Self {
        Self {
            source_dir: source_dir.into(),
            target_dir: target_dir.into(),
            source_vocabulary,
            target_vocabulary,
        }
    }

    pub fn execute(&self) -> Result<()> {
        let device = Default::default();

        // ── Step 1: the trained source model ─────────────────────────────────
        let source_checkpoint = CheckpointManager::new(&self.source_dir);
        let source = source_checkpoint
            .load_export()
            .context("source checkpoint has no exported model")?
            .rebuild::<TrainingBackend>(&device)?;

        // ── Step 2: target model on the new vocabularies ─────────────────────
        let mut config: TrainConfig = source_checkpoint
            .load_config()
            .context("source checkpoint has no training configuration")?;
        if let Some(path) = &self.source_vocabulary {
            config.source_vocabulary = Some(path.clone());
        }
        if let Some(path) = &self.target_vocabulary {
            config.target_vocabulary = Some(path.clone());
        }
        config.checkpoint_dir = self.target_dir.clone();

        let mut target = TaskModel::<TrainingBackend>::new(config.task_type()?);
        target.initialize(&config.data_config(), &config.model_params()?)?;
        target.create_variables(&device, None)?;

        // ── Step 3: remap weights through the vocabulary change ──────────────
        source.transfer_weights(&mut target, None, None)?;

        // ── Step 4: the target becomes its own checkpoint ────────────────────
        let target_checkpoint = CheckpointManager::new(&self.target_dir);
        target_checkpoint.save_config(&config)?;
        target_checkpoint.save_weights(&target.store().export()?)?;
        target_checkpoint.save_export(&target.serve_function()?)?;
        tracing::info!(
            "Transferred checkpoint '{}' -> '{}'",
            self.source_dir.display(),
            self.target_dir.display()
        );
        Ok(())
    }
}
