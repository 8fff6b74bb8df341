// ============================================================
// Layer 2 — PredictUseCase
// ============================================================
// Loads the serving artifact from a checkpoint directory and
// answers each input line. Inference is features-only: no label
// files are read, or even accepted, on this path.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::application::TrainingBackend;
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::model::{PredictionValue, Predictions};

pub struct PredictUseCase {
    checkpoint_dir: PathBuf,
}

impl PredictUseCase {
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
        }
    }

    /// Run every line of `input` through the exported model.
    pub fn execute(&self, input: &PathBuf) -> Result<Predictions> {
        let device = Default::default();
        let export = CheckpointManager::new(&self.checkpoint_dir)
            .load_export()
            .context("no exported model in the checkpoint directory")?;

        let lines: Vec<String> = std::fs::read_to_string(input)
            .with_context(|| format!("cannot read input '{}'", input.display()))?
            .lines()
            .map(String::from)
            .collect();
        tracing::info!("Predicting {} lines", lines.len());

        Ok(export.call::<TrainingBackend>(&device, &lines)?)
    }

    /// One line of console output per example, from whichever heads the
    /// task produced.
    pub fn render(predictions: &Predictions) -> Vec<String> {
        if let Some(PredictionValue::Classes(classes)) = predictions.get("classes") {
            return classes.clone();
        }
        let sequences = match (predictions.get("tags"), predictions.get("tokens")) {
            (Some(PredictionValue::TokenSequences(s)), _) => s,
            (_, Some(PredictionValue::TokenSequences(s))) => s,
            _ => return Vec::new(),
        };
        sequences.iter().map(|s| s.join(" ")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_joins_token_sequences() {
        let mut predictions = Predictions::new();
        predictions.insert(
            "tokens".to_string(),
            PredictionValue::TokenSequences(vec![
                vec!["hello".to_string(), "world".to_string()],
                vec!["hi".to_string()],
            ]),
        );
        predictions.insert(
            "length".to_string(),
            PredictionValue::Lengths(vec![2, 1]),
        );
        assert_eq!(
            PredictUseCase::render(&predictions),
            vec!["hello world", "hi"]
        );
    }

    #[test]
    fn test_render_prefers_classes() {
        let mut predictions = Predictions::new();
        predictions.insert(
            "classes".to_string(),
            PredictionValue::Classes(vec!["positive".to_string()]),
        );
        assert_eq!(PredictUseCase::render(&predictions), vec!["positive"]);
    }
}
