// ============================================================
// Layer 5 — Serving
// ============================================================
// A ServingFunction is everything needed to answer inference
// requests with no dataset plumbing and no training state: a
// blueprint (task, hyperparameters, vocabularies as token
// lists) plus the exported weights. It is serializable, so an
// exported model is one JSON artifact.
//
// Requests run line by line: each input line becomes its own
// PREDICT batch, and the per-head predictions are concatenated
// in request order.

use std::collections::BTreeMap;

use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

use crate::data::dataset::Example;
use crate::data::loader::tokenize;
use crate::domain::error::{FrameworkError, Result};
use crate::domain::mode::Mode;
use crate::ml::model::{ModelParams, Predictions, PredictionValue, SequenceModel, TaskModel, TaskType};
use crate::ml::vars::WeightRecord;

/// Rebuild instructions for one trained model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBlueprint {
    pub task: TaskType,
    pub params: ModelParams,
    pub source_vocabulary: Option<Vec<String>>,
    pub target_vocabulary: Option<Vec<String>>,
}

/// A self-contained, serializable inference artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServingFunction {
    pub blueprint: ModelBlueprint,
    pub weights: BTreeMap<String, WeightRecord>,
}

impl ServingFunction {
    /// Rebuild the model this artifact captured.
    pub fn rebuild<B: AutodiffBackend>(&self, device: &B::Device) -> Result<TaskModel<B>> {
        let mut model = TaskModel::from_parts(
            self.blueprint.task,
            self.blueprint.params.clone(),
            self.blueprint.source_vocabulary.clone(),
            self.blueprint.target_vocabulary.clone(),
        )?;
        model.create_variables(device, None)?;
        model.store_mut().import(&self.weights)?;
        Ok(model)
    }

    /// Answer one batch of raw text lines.
    pub fn call<B: AutodiffBackend>(
        &self,
        device: &B::Device,
        lines: &[String],
    ) -> Result<Predictions> {
        let model = self.rebuild::<B>(device)?;
        let mut merged = Predictions::new();
        for line in lines {
            let examples = vec![Example::features_only(tokenize(line))];
            let (features, _) = model.prepare_batch(&examples, false, device)?;
            let (_, predictions) = model.forward(&features, None, Mode::Predict)?;
            merge_predictions(&mut merged, predictions)?;
        }
        Ok(merged)
    }
}

fn merge_predictions(into: &mut Predictions, from: Predictions) -> Result<()> {
    for (key, value) in from {
        match into.entry(key) {
            std::collections::btree_map::Entry::Vacant(e) => {
                e.insert(value);
            }
            std::collections::btree_map::Entry::Occupied(mut e) => {
                match (e.get_mut(), value) {
                    (
                        PredictionValue::TokenSequences(a),
                        PredictionValue::TokenSequences(b),
                    ) => a.extend(b),
                    (PredictionValue::Lengths(a), PredictionValue::Lengths(b)) => a.extend(b),
                    (PredictionValue::Scores(a), PredictionValue::Scores(b)) => a.extend(b),
                    (PredictionValue::Classes(a), PredictionValue::Classes(b)) => a.extend(b),
                    _ => {
                        return Err(FrameworkError::Data(
                            "prediction heads changed type across batches".to_string(),
                        ))
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::ModelParams;

    type TB = burn::backend::Autodiff<burn::backend::NdArray>;

    #[test]
    fn test_export_round_trips_through_json() {
        use crate::domain::vocabulary::{BOS_TOKEN, EOS_TOKEN, PAD_TOKEN, UNK_TOKEN};
        let device = Default::default();

        let mut words = vec![
            PAD_TOKEN.to_string(),
            BOS_TOKEN.to_string(),
            EOS_TOKEN.to_string(),
        ];
        words.extend(["good", "bad"].map(String::from));
        words.push(UNK_TOKEN.to_string());
        let mut model = TaskModel::<TB>::from_parts(
            TaskType::SequenceClassifier,
            ModelParams {
                d_model: 8,
                d_ff: 16,
                ..ModelParams::default()
            },
            Some(words),
            Some(vec!["pos".to_string(), "neg".to_string()]),
        )
        .unwrap();
        model.create_variables(&device, None).unwrap();

        let export = model.serve_function().unwrap();
        let json = serde_json::to_string(&export).unwrap();
        let restored: ServingFunction = serde_json::from_str(&json).unwrap();

        let lines = vec!["good good".to_string(), "bad".to_string()];
        let served = restored.call::<TB>(&device, &lines).unwrap();
        let Some(PredictionValue::Classes(classes)) = served.get("classes") else {
            panic!("missing classes head")
        };
        assert_eq!(classes.len(), 2);

        // the rebuilt model must agree with the live one
        let examples: Vec<Example> = lines
            .iter()
            .map(|l| Example::features_only(tokenize(l)))
            .collect();
        let mut direct = Vec::new();
        for example in examples {
            let (features, _) = model
                .prepare_batch(&[example], false, &device)
                .unwrap();
            let (_, predictions) = model.forward(&features, None, Mode::Predict).unwrap();
            let Some(PredictionValue::Classes(c)) = predictions.get("classes") else {
                panic!("missing classes head")
            };
            direct.extend(c.clone());
        }
        assert_eq!(*classes, direct);
    }

    #[test]
    fn test_merge_concatenates_heads() {
        let mut a = Predictions::new();
        a.insert(
            "length".to_string(),
            PredictionValue::Lengths(vec![2]),
        );
        let mut b = Predictions::new();
        b.insert(
            "length".to_string(),
            PredictionValue::Lengths(vec![3]),
        );
        merge_predictions(&mut a, b).unwrap();
        assert_eq!(
            a["length"],
            PredictionValue::Lengths(vec![2, 3])
        );
    }

    #[test]
    fn test_merge_rejects_type_changes() {
        let mut a = Predictions::new();
        a.insert("length".to_string(), PredictionValue::Lengths(vec![2]));
        let mut b = Predictions::new();
        b.insert("length".to_string(), PredictionValue::Scores(vec![0.5]));
        let err = merge_predictions(&mut a, b).unwrap_err();
        assert!(matches!(err, FrameworkError::Data(_)));
    }
}
