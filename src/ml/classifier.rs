// ============================================================
// Layer 5 — Sequence Classifier
// ============================================================
// One label per sequence: encoder, masked mean-pool over the
// real tokens, projection onto the class vocabulary. Class
// vocabularies are loaded verbatim (no reserved tokens).
//
// Prediction head: "classes". Metric: accuracy.

use burn::prelude::*;
use burn::tensor::activation::log_softmax;
use burn::tensor::backend::AutodiffBackend;

use crate::data::batcher::{FeatureBatch, LabelBatch, TextBatcher};
use crate::data::dataset::Example;
use crate::data::inputter::ExampleInputter;
use crate::domain::error::{FrameworkError, Result};
use crate::domain::mode::Mode;
use crate::domain::vocabulary::Vocabulary;
use crate::infra::metrics::MetricSet;
use crate::ml::encoder::SelfAttentionEncoder;
use crate::ml::model::{
    DataConfig, Loss, ModelParams, Outputs, PredictionValue, Predictions, SequenceModel,
    TaskType,
};
use crate::ml::ops::{embed, int_vec};
use crate::ml::optim::SlotOptimizer;
use crate::ml::serving::{ModelBlueprint, ServingFunction};
use crate::ml::vars::{VariableStore, VocabRole, WeightSpec};

pub struct SequenceClassifier<B: AutodiffBackend> {
    params: ModelParams,
    vocab: Option<Vocabulary>,
    classes: Option<Vocabulary>,
    store: VariableStore<B>,
}

impl<B: AutodiffBackend> Default for SequenceClassifier<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: AutodiffBackend> SequenceClassifier<B> {
    pub fn new() -> Self {
        Self {
            params: ModelParams::default(),
            vocab: None,
            classes: None,
            store: VariableStore::new(),
        }
    }

    pub fn from_parts(
        params: ModelParams,
        source_tokens: Option<Vec<String>>,
        class_tokens: Option<Vec<String>>,
    ) -> Result<Self> {
        let source_tokens =
            source_tokens.ok_or_else(|| FrameworkError::missing_config("source vocabulary"))?;
        let class_tokens =
            class_tokens.ok_or_else(|| FrameworkError::missing_config("class vocabulary"))?;
        Ok(Self {
            params,
            vocab: Some(Vocabulary::new(source_tokens)?),
            classes: Some(Vocabulary::new(class_tokens)?),
            store: VariableStore::new(),
        })
    }

    fn vocab(&self) -> Result<&Vocabulary> {
        self.vocab
            .as_ref()
            .ok_or_else(|| FrameworkError::missing_config("source vocabulary"))
    }

    fn classes(&self) -> Result<&Vocabulary> {
        self.classes
            .as_ref()
            .ok_or_else(|| FrameworkError::missing_config("class vocabulary"))
    }

    fn encoder(&self) -> SelfAttentionEncoder {
        SelfAttentionEncoder::new("encoder/layers/0", self.params.d_model, self.params.d_ff)
    }

    fn weight_specs(&self) -> Result<Vec<WeightSpec>> {
        let d = self.params.d_model;
        let mut specs = vec![WeightSpec::matrix(
            "features_inputter/embedding",
            self.vocab()?.len(),
            d,
        )
        .with_vocab_axis(VocabRole::Source, 0)];
        specs.extend(self.encoder().weight_specs());
        specs.push(
            WeightSpec::matrix("output_layer/kernel", d, self.classes()?.len())
                .with_vocab_axis(VocabRole::Target, 1),
        );
        specs.push(
            WeightSpec::vector("output_layer/bias", self.classes()?.len())
                .with_vocab_axis(VocabRole::Target, 0),
        );
        Ok(specs)
    }

    fn class_logits(&self, features: &FeatureBatch<B>) -> Result<Tensor<B, 2>> {
        let embedding = self.store.matrix("features_inputter/embedding")?;
        let x = embed(embedding, features.ids.clone());
        let encoded = self.encoder().forward(&self.store, x, &features.mask)?;

        // masked mean over the real tokens
        let [b, t, d] = encoded.dims();
        let mask = features.mask.clone().reshape([b, t, 1]).expand([b, t, d]);
        let summed = (encoded * mask).sum_dim(1).reshape([b, d]);
        let counts = features
            .mask
            .clone()
            .sum_dim(1)
            .clamp_min(1.0)
            .reshape([b, 1])
            .expand([b, d]);
        let pooled = summed / counts;

        let kernel = self.store.matrix("output_layer/kernel")?;
        let bias = self.store.vector("output_layer/bias")?;
        let c = self.classes()?.len();
        Ok(pooled.matmul(kernel) + bias.reshape([1, c]).expand([b, c]))
    }

    fn predict(&self, logits: &Tensor<B, 2>) -> Result<Predictions> {
        let classes = self.classes()?;
        let [b, _] = logits.dims();
        let picked = int_vec(logits.clone().argmax(1).reshape([b]))?;
        let mut out = Vec::with_capacity(b);
        for &id in &picked {
            out.push(
                classes
                    .token(id as usize)
                    .ok_or_else(|| {
                        FrameworkError::ShapeMismatch(format!(
                            "predicted id {id} is outside the class vocabulary"
                        ))
                    })?
                    .to_string(),
            );
        }
        let mut predictions = Predictions::new();
        predictions.insert("classes".to_string(), PredictionValue::Classes(out));
        Ok(predictions)
    }
}

impl<B: AutodiffBackend> SequenceModel<B> for SequenceClassifier<B> {
    fn task_type(&self) -> TaskType {
        TaskType::SequenceClassifier
    }

    fn initialize(&mut self, data: &DataConfig, params: &ModelParams) -> Result<()> {
        let source = data
            .source_vocabulary
            .as_ref()
            .ok_or_else(|| FrameworkError::missing_config("source_vocabulary"))?;
        let target = data
            .target_vocabulary
            .as_ref()
            .ok_or_else(|| FrameworkError::missing_config("target_vocabulary"))?;
        self.vocab = Some(Vocabulary::load(source, true)?);
        self.classes = Some(Vocabulary::load(target, false)?);
        self.params = params.clone();
        tracing::info!(
            "Initialized classifier: |vocab| = {}, |classes| = {}",
            self.vocab()?.len(),
            self.classes()?.len()
        );
        Ok(())
    }

    fn create_variables(
        &mut self,
        device: &B::Device,
        optimizer: Option<&mut dyn SlotOptimizer<B>>,
    ) -> Result<()> {
        self.store = VariableStore::create(&self.weight_specs()?, device)?;
        self.store.freeze_prefixes(&self.params.freeze_layers)?;
        if let Some(optimizer) = optimizer {
            optimizer.initialize_slots(&self.store)?;
        }
        Ok(())
    }

    fn forward(
        &self,
        features: &FeatureBatch<B>,
        labels: Option<&LabelBatch<B>>,
        mode: Mode,
    ) -> Result<(Outputs<B>, Predictions)> {
        if mode.requires_labels() && labels.is_none() {
            return Err(FrameworkError::Data(
                "training and evaluation require labels".to_string(),
            ));
        }
        let logits = self.class_logits(features)?;
        let predictions = if mode.produces_predictions() {
            self.predict(&logits)?
        } else {
            Predictions::new()
        };
        let mut outputs = Outputs::empty();
        outputs.class_logits = Some(logits);
        Ok((outputs, predictions))
    }

    fn compute_loss(
        &self,
        outputs: &Outputs<B>,
        labels: &LabelBatch<B>,
        _training: bool,
    ) -> Result<Loss<B>> {
        let logits = outputs
            .class_logits
            .clone()
            .ok_or_else(|| FrameworkError::Data("loss requires class logits".to_string()))?;
        let [b, _] = logits.dims();
        let picked = log_softmax(logits, 1)
            .gather(1, labels.input_ids.clone())
            .reshape([b]);
        Ok(Loss::Scalar((-picked).mean().reshape([1])))
    }

    fn metric_set(&self) -> MetricSet {
        let mut set = MetricSet::new();
        set.declare_ratio("accuracy");
        set
    }

    fn update_metrics(
        &self,
        metrics: &mut MetricSet,
        predictions: &Predictions,
        labels: &LabelBatch<B>,
    ) -> Result<()> {
        let Some(PredictionValue::Classes(predicted)) = predictions.get("classes") else {
            return Err(FrameworkError::Data(
                "classifier metrics require the 'classes' head".to_string(),
            ));
        };
        let mut hits = 0.0;
        for (pred, gold) in predicted.iter().zip(&labels.tokens) {
            if gold.first().is_some_and(|g| g == pred) {
                hits += 1.0;
            }
        }
        metrics.add_ratio("accuracy", hits, predicted.len() as f64);
        Ok(())
    }

    fn store(&self) -> &VariableStore<B> {
        &self.store
    }

    fn store_mut(&mut self) -> &mut VariableStore<B> {
        &mut self.store
    }

    fn vocabularies(&self) -> Vec<(VocabRole, &Vocabulary)> {
        let mut out = Vec::new();
        if let Some(v) = &self.vocab {
            out.push((VocabRole::Source, v));
        }
        if let Some(v) = &self.classes {
            out.push((VocabRole::Target, v));
        }
        out
    }

    fn example_inputter(&self) -> ExampleInputter {
        ExampleInputter::paired()
    }

    fn prepare_batch(
        &self,
        examples: &[Example],
        with_labels: bool,
        device: &B::Device,
    ) -> Result<(FeatureBatch<B>, Option<LabelBatch<B>>)> {
        let batcher = TextBatcher::<B>::new(device.clone());
        let features = batcher.features(examples, self.vocab()?)?;
        let labels = if with_labels {
            Some(batcher.class_labels(examples, self.classes()?)?)
        } else {
            None
        };
        Ok((features, labels))
    }

    fn serve_function(&self) -> Result<ServingFunction> {
        Ok(ServingFunction {
            blueprint: ModelBlueprint {
                task: self.task_type(),
                params: self.params.clone(),
                source_vocabulary: Some(self.vocab()?.tokens().to_vec()),
                target_vocabulary: Some(self.classes()?.tokens().to_vec()),
            },
            weights: self.store.export()?,
        })
    }
}
