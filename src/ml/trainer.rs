// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Drives a TaskModel through its epochs: shuffled training
// batches, backward pass, optimizer step, then an optional
// evaluation pass with the task's metrics, a CSV history row,
// and a checkpoint per epoch.
//
// Reference: Burn Book §5 (Autodiff)

use burn::tensor::backend::AutodiffBackend;

use crate::data::dataset::BatchedDataset;
use crate::domain::error::Result;
use crate::domain::mode::Mode;
use crate::infra::checkpoint::CheckpointManager;
use crate::infra::metrics::{MetricSet, MetricsLogger};
use crate::ml::model::{Loss, SequenceModel, TaskModel};
use crate::ml::ops::float_vec;
use crate::ml::optim::SlotOptimizer;

pub struct TrainOptions {
    pub epochs: usize,
    pub learning_rate: f64,
}

pub struct TrainReport {
    pub final_train_loss: f64,
    pub final_eval_loss: Option<f64>,
}

/// Run the full training loop. Expects `create_variables` (and slot
/// initialization) to have happened already.
#[allow(clippy::too_many_arguments)]
pub fn run_training<B: AutodiffBackend>(
    model: &mut TaskModel<B>,
    optimizer: &mut dyn SlotOptimizer<B>,
    train: &BatchedDataset,
    eval: Option<&BatchedDataset>,
    options: &TrainOptions,
    checkpoint: Option<&CheckpointManager>,
    logger: Option<&mut MetricsLogger>,
    device: &B::Device,
) -> Result<TrainReport> {
    let mut logger = logger;
    let mut report = TrainReport {
        final_train_loss: f64::NAN,
        final_eval_loss: None,
    };

    for epoch in 0..options.epochs {
        let mut epoch_loss = 0.0;
        let mut batches = 0usize;
        for batch in train.epoch(epoch as u64) {
            let (features, labels) = model.prepare_batch(&batch, true, device)?;
            let labels = labels.ok_or_else(|| {
                crate::domain::error::FrameworkError::Data(
                    "training batches carry no labels".to_string(),
                )
            })?;
            let (outputs, _) = model.forward(&features, Some(&labels), Mode::Train)?;
            let loss = model.compute_loss(&outputs, &labels, true)?.scalar();
            epoch_loss += float_vec(loss.clone())?[0] as f64;
            batches += 1;

            let grads = loss.backward();
            optimizer.step(options.learning_rate, model.store_mut(), &grads)?;
        }
        let train_loss = epoch_loss / batches.max(1) as f64;
        report.final_train_loss = train_loss;

        let mut metrics = MetricSet::new();
        let eval_loss = match eval {
            Some(eval) => Some(run_evaluation(model, eval, &mut metrics, device)?),
            None => None,
        };
        report.final_eval_loss = eval_loss;

        match eval_loss {
            Some(el) => tracing::info!(
                "Epoch {}/{}: train loss {:.4}, eval loss {:.4}",
                epoch + 1,
                options.epochs,
                train_loss,
                el
            ),
            None => tracing::info!(
                "Epoch {}/{}: train loss {:.4}",
                epoch + 1,
                options.epochs,
                train_loss
            ),
        }
        for (name, value) in metrics.values() {
            tracing::info!("  {} = {:.4}", name, value);
        }

        if let Some(logger) = logger.as_deref_mut() {
            logger.log_epoch(epoch + 1, train_loss, eval_loss, &metrics)?;
        }
        if let Some(checkpoint) = checkpoint {
            checkpoint.save_weights(&model.store().export()?)?;
        }
    }
    Ok(report)
}

/// One evaluation pass: accumulated loss over the whole dataset plus
/// the task's metrics.
pub fn run_evaluation<B: AutodiffBackend>(
    model: &TaskModel<B>,
    eval: &BatchedDataset,
    metrics: &mut MetricSet,
    device: &B::Device,
) -> Result<f64> {
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for batch in eval.epoch(0) {
        let (features, labels) = model.prepare_batch(&batch, true, device)?;
        let labels = labels.ok_or_else(|| {
            crate::domain::error::FrameworkError::Data(
                "evaluation batches carry no labels".to_string(),
            )
        })?;
        let (outputs, predictions) = model.forward(&features, Some(&labels), Mode::Eval)?;
        match model.compute_loss(&outputs, &labels, false)? {
            Loss::Ratio {
                numerator: n,
                denominator: d,
            } => {
                numerator += float_vec(n)?[0] as f64;
                denominator += float_vec(d)?[0] as f64;
            }
            Loss::Scalar(s) => {
                numerator += float_vec(s)?[0] as f64 * batch.len() as f64;
                denominator += batch.len() as f64;
            }
        }
        model.update_metrics(metrics, &predictions, &labels)?;
    }
    Ok(numerator / denominator.max(1.0))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::Example;
    use crate::ml::model::{ModelParams, TaskType};
    use crate::ml::optim::Sgd;

    type TB = burn::backend::Autodiff<burn::backend::NdArray>;

    fn text_tokens(tokens: &[&str]) -> Vec<String> {
        use crate::domain::vocabulary::{BOS_TOKEN, EOS_TOKEN, PAD_TOKEN, UNK_TOKEN};
        let mut all = vec![
            PAD_TOKEN.to_string(),
            BOS_TOKEN.to_string(),
            EOS_TOKEN.to_string(),
        ];
        all.extend(tokens.iter().map(|s| s.to_string()));
        all.push(UNK_TOKEN.to_string());
        all
    }

    fn copy_task_examples() -> Vec<Example> {
        // a tiny copy task: target repeats the source
        ["a", "b", "a b", "b a"]
            .iter()
            .map(|s| {
                let tokens: Vec<String> = s.split(' ').map(String::from).collect();
                Example {
                    source: tokens.clone(),
                    target: Some(tokens),
                    alignment: None,
                }
            })
            .collect()
    }

    #[test]
    fn test_seq2seq_trains_and_predicts_end_to_end() {
        let device = Default::default();
        let mut model = TaskModel::<TB>::from_parts(
            TaskType::SequenceToSequence,
            ModelParams {
                d_model: 8,
                d_ff: 16,
                max_decode_length: 4,
                ..ModelParams::default()
            },
            Some(text_tokens(&["a", "b"])),
            Some(text_tokens(&["a", "b"])),
        )
        .unwrap();

        let mut optimizer = Sgd::<TB>::new(0.9);
        model
            .create_variables(&device, Some(&mut optimizer))
            .unwrap();

        let train = BatchedDataset::new(copy_task_examples(), 2, true, 7);
        let eval = BatchedDataset::new(copy_task_examples(), 2, false, 0);
        let report = run_training(
            &mut model,
            &mut optimizer,
            &train,
            Some(&eval),
            &TrainOptions {
                epochs: 3,
                learning_rate: 0.05,
            },
            None,
            None,
            &device,
        )
        .unwrap();
        assert!(report.final_train_loss.is_finite());
        assert!(report.final_eval_loss.unwrap().is_finite());

        // the trained model must still satisfy the PREDICT contract
        let examples = vec![Example::features_only(vec!["a".into()])];
        let (features, _) = model.prepare_batch(&examples, false, &device).unwrap();
        let (_, predictions) = model
            .forward(&features, None, crate::domain::mode::Mode::Predict)
            .unwrap();
        assert!(predictions.contains_key("tokens"));
        assert!(predictions.contains_key("length"));
        assert!(predictions.contains_key("log_probs"));
    }

    #[test]
    fn test_training_loss_decreases_on_a_toy_problem() {
        let device = Default::default();
        let mut model = TaskModel::<TB>::from_parts(
            TaskType::SequenceClassifier,
            ModelParams {
                d_model: 8,
                d_ff: 16,
                ..ModelParams::default()
            },
            Some(text_tokens(&["good", "bad"])),
            Some(vec!["pos".to_string(), "neg".to_string()]),
        )
        .unwrap();
        let mut optimizer = Sgd::<TB>::new(0.0);
        model
            .create_variables(&device, Some(&mut optimizer))
            .unwrap();

        let examples = vec![
            Example {
                source: vec!["good".into()],
                target: Some(vec!["pos".into()]),
                alignment: None,
            },
            Example {
                source: vec!["bad".into()],
                target: Some(vec!["neg".into()]),
                alignment: None,
            },
        ];
        let dataset = BatchedDataset::new(examples, 2, false, 0);

        let first = run_training(
            &mut model,
            &mut optimizer,
            &dataset,
            None,
            &TrainOptions {
                epochs: 1,
                learning_rate: 0.5,
            },
            None,
            None,
            &device,
        )
        .unwrap()
        .final_train_loss;

        let last = run_training(
            &mut model,
            &mut optimizer,
            &dataset,
            None,
            &TrainOptions {
                epochs: 20,
                learning_rate: 0.5,
            },
            None,
            None,
            &device,
        )
        .unwrap()
        .final_train_loss;
        assert!(last < first, "loss should drop: {first} -> {last}");
    }
}
