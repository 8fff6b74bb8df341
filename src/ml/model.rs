// ============================================================
// Layer 5 — The Model Contract
// ============================================================
// Every task variant implements SequenceModel and goes through
// the same lifecycle:
//
//   initialize        resolve vocabularies + hyperparameters,
//                     no tensors yet (a Configuration error here
//                     is fatal)
//   create_variables  materialize every weight from its declared
//                     shape, apply layer freezing, warm up
//                     optimizer slots
//   forward           features (+ labels outside PREDICT) →
//                     raw outputs + predictions per mode
//   compute_loss      outputs + labels → scalar or ratio loss
//   serve_function    a self-contained inference closure that
//                     captures everything needed to predict
//
// The trait also ships the vocabulary-transfer entry point as a
// default method: any two structurally-identical models of the
// same variant can exchange weights through their vocabularies'
// correspondence maps.
//
// Reference: Rust Book §10 (Traits), §17 (Trait Objects)

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::str::FromStr;

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

use crate::data::batcher::{FeatureBatch, LabelBatch};
use crate::data::dataset::Example;
use crate::data::inputter::ExampleInputter;
use crate::domain::error::{FrameworkError, Result};
use crate::domain::mode::Mode;
use crate::domain::vocabulary::{CorrespondenceMap, Vocabulary};
use crate::infra::metrics::MetricSet;
use crate::ml::classifier::SequenceClassifier;
use crate::ml::language_model::LanguageModel;
use crate::ml::optim::SlotOptimizer;
use crate::ml::seq2seq::SequenceToSequence;
use crate::ml::serving::ServingFunction;
use crate::ml::tagger::SequenceTagger;
use crate::ml::transfer::transfer_store;
use crate::ml::vars::{VariableStore, VocabRole};

// ─── Configuration ────────────────────────────────────────────────────────────

/// Where the vocabularies live. Which entries are required depends on
/// the task: seq2seq needs both, the others only the relevant side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataConfig {
    pub source_vocabulary: Option<PathBuf>,
    pub target_vocabulary: Option<PathBuf>,
}

/// Loss type for attention supervision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuidedAlignment {
    CrossEntropy,
    MeanSquaredError,
}

impl FromStr for GuidedAlignment {
    type Err = FrameworkError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ce" => Ok(GuidedAlignment::CrossEntropy),
            "mse" => Ok(GuidedAlignment::MeanSquaredError),
            other => Err(FrameworkError::Configuration(format!(
                "invalid guided alignment type '{other}' (expected 'ce' or 'mse')"
            ))),
        }
    }
}

/// Hyperparameters shared by all task variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParams {
    pub d_model: usize,
    pub d_ff: usize,
    pub max_decode_length: usize,
    pub guided_alignment: Option<GuidedAlignment>,
    pub guided_alignment_weight: f64,
    pub replace_unknown_target: bool,
    pub freeze_layers: Vec<String>,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            d_model: 32,
            d_ff: 64,
            max_decode_length: 50,
            guided_alignment: None,
            guided_alignment_weight: 1.0,
            replace_unknown_target: false,
            freeze_layers: Vec::new(),
        }
    }
}

// ─── Outputs, predictions, loss ───────────────────────────────────────────────

/// Raw model outputs, consumed by `compute_loss`.
#[derive(Debug, Clone)]
pub struct Outputs<B: Backend> {
    /// Per-position vocabulary logits [B, T, V] (seq2seq, LM, tagger).
    pub logits: Option<Tensor<B, 3>>,
    /// Per-example class logits [B, C] (classifier).
    pub class_logits: Option<Tensor<B, 2>>,
    /// Decoder attention over the source [B, T_tgt, T_src].
    pub attention: Option<Tensor<B, 3>>,
}

impl<B: Backend> Outputs<B> {
    pub fn empty() -> Self {
        Self {
            logits: None,
            class_logits: None,
            attention: None,
        }
    }
}

/// One named prediction head.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionValue {
    TokenSequences(Vec<Vec<String>>),
    Lengths(Vec<usize>),
    Scores(Vec<f32>),
    Classes(Vec<String>),
}

/// Heads by name, e.g. "tokens" / "length" / "log_probs".
pub type Predictions = BTreeMap<String, PredictionValue>;

/// A training loss: either a plain scalar or a numerator/denominator
/// pair for token-normalized objectives.
#[derive(Debug, Clone)]
pub enum Loss<B: Backend> {
    Scalar(Tensor<B, 1>),
    Ratio {
        numerator: Tensor<B, 1>,
        denominator: Tensor<B, 1>,
    },
}

impl<B: Backend> Loss<B> {
    /// Collapse to a single scalar for the backward pass.
    pub fn scalar(self) -> Tensor<B, 1> {
        match self {
            Loss::Scalar(t) => t,
            Loss::Ratio {
                numerator,
                denominator,
            } => numerator / denominator.clamp_min(1.0),
        }
    }
}

/// The four shipped task variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    SequenceToSequence,
    LanguageModel,
    SequenceTagger,
    SequenceClassifier,
}

impl FromStr for TaskType {
    type Err = FrameworkError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "seq2seq" => Ok(TaskType::SequenceToSequence),
            "language_model" => Ok(TaskType::LanguageModel),
            "tagger" => Ok(TaskType::SequenceTagger),
            "classifier" => Ok(TaskType::SequenceClassifier),
            other => Err(FrameworkError::Configuration(format!(
                "unknown task '{other}' (expected seq2seq, language_model, tagger, classifier)"
            ))),
        }
    }
}

// ─── The contract ─────────────────────────────────────────────────────────────

pub trait SequenceModel<B: AutodiffBackend> {
    /// Which variant this is (drives serving blueprints).
    fn task_type(&self) -> TaskType;

    /// Resolve vocabularies and hyperparameters. No tensors are created.
    fn initialize(&mut self, data: &DataConfig, params: &ModelParams) -> Result<()>;

    /// Materialize every weight from its declared shape, mark frozen
    /// paths, and zero the optimizer's slots. Callable before any data
    /// has been seen.
    fn create_variables(
        &mut self,
        device: &B::Device,
        optimizer: Option<&mut dyn SlotOptimizer<B>>,
    ) -> Result<()>;

    /// Run the model in the given mode. Labels are required exactly when
    /// `mode.requires_labels()`; predictions are populated exactly when
    /// `mode.produces_predictions()`.
    fn forward(
        &self,
        features: &FeatureBatch<B>,
        labels: Option<&LabelBatch<B>>,
        mode: Mode,
    ) -> Result<(Outputs<B>, Predictions)>;

    /// Outputs + labels → loss. `training` selects between the training
    /// objective and its evaluation counterpart where they differ.
    fn compute_loss(
        &self,
        outputs: &Outputs<B>,
        labels: &LabelBatch<B>,
        training: bool,
    ) -> Result<Loss<B>>;

    /// The task's evaluation metrics, empty by default.
    fn metric_set(&self) -> MetricSet {
        MetricSet::new()
    }

    /// Fold one batch of predictions into the running metrics.
    fn update_metrics(
        &self,
        _metrics: &mut MetricSet,
        _predictions: &Predictions,
        _labels: &LabelBatch<B>,
    ) -> Result<()> {
        Ok(())
    }

    fn store(&self) -> &VariableStore<B>;
    fn store_mut(&mut self) -> &mut VariableStore<B>;

    /// This model's vocabularies by role.
    fn vocabularies(&self) -> Vec<(VocabRole, &Vocabulary)>;

    /// The dataset-construction facade for this task.
    fn example_inputter(&self) -> ExampleInputter;

    /// Encode one batch of examples into device tensors.
    fn prepare_batch(
        &self,
        examples: &[Example],
        with_labels: bool,
        device: &B::Device,
    ) -> Result<(FeatureBatch<B>, Option<LabelBatch<B>>)>;

    /// A self-contained inference artifact: blueprint + weights,
    /// callable on raw text lines with no dataset plumbing.
    fn serve_function(&self) -> Result<ServingFunction>;

    /// Move this model's trained weights (and optionally optimizer
    /// slots) into `target`, which must differ only in its
    /// vocabularies. Correspondence maps are derived per vocabulary
    /// role; everything else is delegated to the transfer engine.
    fn transfer_weights(
        &self,
        target: &mut Self,
        optimizer: Option<&dyn SlotOptimizer<B>>,
        new_optimizer: Option<&mut dyn SlotOptimizer<B>>,
    ) -> Result<()>
    where
        Self: Sized,
    {
        let source_vocabs: HashMap<VocabRole, &Vocabulary> =
            self.vocabularies().into_iter().collect();
        let mut maps: HashMap<VocabRole, CorrespondenceMap> = HashMap::new();
        for (role, new_vocab) in target.vocabularies() {
            let old_vocab = source_vocabs.get(&role).ok_or_else(|| {
                FrameworkError::Configuration(format!(
                    "source model has no {role:?} vocabulary to transfer from"
                ))
            })?;
            maps.insert(role, new_vocab.correspondence_from(old_vocab));
        }
        tracing::info!(
            "Transferring {} weights across {} vocabulary role(s)",
            target.store().len(),
            maps.len()
        );
        transfer_store(
            self.store(),
            target.store_mut(),
            &maps,
            optimizer,
            new_optimizer,
        )
    }
}

// ─── Task dispatch ────────────────────────────────────────────────────────────

/// Runtime-selected task variant. All trait methods delegate.
pub enum TaskModel<B: AutodiffBackend> {
    SequenceToSequence(SequenceToSequence<B>),
    LanguageModel(LanguageModel<B>),
    SequenceTagger(SequenceTagger<B>),
    SequenceClassifier(SequenceClassifier<B>),
}

impl<B: AutodiffBackend> TaskModel<B> {
    pub fn new(task: TaskType) -> Self {
        match task {
            TaskType::SequenceToSequence => {
                TaskModel::SequenceToSequence(SequenceToSequence::new())
            }
            TaskType::LanguageModel => TaskModel::LanguageModel(LanguageModel::new()),
            TaskType::SequenceTagger => TaskModel::SequenceTagger(SequenceTagger::new()),
            TaskType::SequenceClassifier => {
                TaskModel::SequenceClassifier(SequenceClassifier::new())
            }
        }
    }

    /// Build an initialized (but variable-less) model from already
    /// resolved parts — the path serving blueprints take.
    pub fn from_parts(
        task: TaskType,
        params: ModelParams,
        source_tokens: Option<Vec<String>>,
        target_tokens: Option<Vec<String>>,
    ) -> Result<Self> {
        Ok(match task {
            TaskType::SequenceToSequence => TaskModel::SequenceToSequence(
                SequenceToSequence::from_parts(params, source_tokens, target_tokens)?,
            ),
            TaskType::LanguageModel => {
                TaskModel::LanguageModel(LanguageModel::from_parts(params, source_tokens)?)
            }
            TaskType::SequenceTagger => TaskModel::SequenceTagger(
                SequenceTagger::from_parts(params, source_tokens, target_tokens)?,
            ),
            TaskType::SequenceClassifier => TaskModel::SequenceClassifier(
                SequenceClassifier::from_parts(params, source_tokens, target_tokens)?,
            ),
        })
    }
}

macro_rules! delegate {
    ($self:expr, $inner:ident => $body:expr) => {
        match $self {
            TaskModel::SequenceToSequence($inner) => $body,
            TaskModel::LanguageModel($inner) => $body,
            TaskModel::SequenceTagger($inner) => $body,
            TaskModel::SequenceClassifier($inner) => $body,
        }
    };
}

impl<B: AutodiffBackend> SequenceModel<B> for TaskModel<B> {
    fn task_type(&self) -> TaskType {
        delegate!(self, m => m.task_type())
    }

    fn initialize(&mut self, data: &DataConfig, params: &ModelParams) -> Result<()> {
        delegate!(self, m => m.initialize(data, params))
    }

    fn create_variables(
        &mut self,
        device: &B::Device,
        optimizer: Option<&mut dyn SlotOptimizer<B>>,
    ) -> Result<()> {
        delegate!(self, m => m.create_variables(device, optimizer))
    }

    fn forward(
        &self,
        features: &FeatureBatch<B>,
        labels: Option<&LabelBatch<B>>,
        mode: Mode,
    ) -> Result<(Outputs<B>, Predictions)> {
        delegate!(self, m => m.forward(features, labels, mode))
    }

    fn compute_loss(
        &self,
        outputs: &Outputs<B>,
        labels: &LabelBatch<B>,
        training: bool,
    ) -> Result<Loss<B>> {
        delegate!(self, m => m.compute_loss(outputs, labels, training))
    }

    fn metric_set(&self) -> MetricSet {
        delegate!(self, m => m.metric_set())
    }

    fn update_metrics(
        &self,
        metrics: &mut MetricSet,
        predictions: &Predictions,
        labels: &LabelBatch<B>,
    ) -> Result<()> {
        delegate!(self, m => m.update_metrics(metrics, predictions, labels))
    }

    fn store(&self) -> &VariableStore<B> {
        delegate!(self, m => m.store())
    }

    fn store_mut(&mut self) -> &mut VariableStore<B> {
        delegate!(self, m => m.store_mut())
    }

    fn vocabularies(&self) -> Vec<(VocabRole, &Vocabulary)> {
        delegate!(self, m => m.vocabularies())
    }

    fn example_inputter(&self) -> ExampleInputter {
        delegate!(self, m => m.example_inputter())
    }

    fn prepare_batch(
        &self,
        examples: &[Example],
        with_labels: bool,
        device: &B::Device,
    ) -> Result<(FeatureBatch<B>, Option<LabelBatch<B>>)> {
        delegate!(self, m => m.prepare_batch(examples, with_labels, device))
    }

    fn serve_function(&self) -> Result<ServingFunction> {
        delegate!(self, m => m.serve_function())
    }

    fn transfer_weights(
        &self,
        target: &mut Self,
        optimizer: Option<&dyn SlotOptimizer<B>>,
        new_optimizer: Option<&mut dyn SlotOptimizer<B>>,
    ) -> Result<()> {
        match (self, target) {
            (TaskModel::SequenceToSequence(s), TaskModel::SequenceToSequence(t)) => {
                s.transfer_weights(t, optimizer, new_optimizer)
            }
            (TaskModel::LanguageModel(s), TaskModel::LanguageModel(t)) => {
                s.transfer_weights(t, optimizer, new_optimizer)
            }
            (TaskModel::SequenceTagger(s), TaskModel::SequenceTagger(t)) => {
                s.transfer_weights(t, optimizer, new_optimizer)
            }
            (TaskModel::SequenceClassifier(s), TaskModel::SequenceClassifier(t)) => {
                s.transfer_weights(t, optimizer, new_optimizer)
            }
            _ => Err(FrameworkError::ShapeMismatch(
                "cannot transfer weights between different task variants".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guided_alignment_parsing() {
        assert_eq!(
            "ce".parse::<GuidedAlignment>().unwrap(),
            GuidedAlignment::CrossEntropy
        );
        assert_eq!(
            "mse".parse::<GuidedAlignment>().unwrap(),
            GuidedAlignment::MeanSquaredError
        );
        let err = "kl".parse::<GuidedAlignment>().unwrap_err();
        assert!(matches!(err, FrameworkError::Configuration(_)));
    }

    #[test]
    fn test_task_type_parsing() {
        assert_eq!(
            "seq2seq".parse::<TaskType>().unwrap(),
            TaskType::SequenceToSequence
        );
        assert!("qa".parse::<TaskType>().is_err());
    }
}
