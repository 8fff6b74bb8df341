// ============================================================
// Layer 5 — Sequence Tagger
// ============================================================
// One label per input token: encoder + per-position projection
// onto the tag vocabulary. Tag vocabularies carry no reserved
// tokens and no <unk> — an unseen tag in the data is an error,
// and every label sequence must match its feature sequence
// length exactly.
//
// Prediction heads: "tags", "length".
// Metrics: accuracy over all tokens, plus token-level
// precision / recall / f1 treating the "O" tag as negative.

use burn::prelude::*;
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
use crate::ml::ops::{add_bias, embed, int_vec, linear, masked_cross_entropy};
use crate::ml::optim::SlotOptimizer;
use crate::ml::serving::{ModelBlueprint, ServingFunction};
use crate::ml::vars::{VariableStore, VocabRole, WeightSpec};

const OUTSIDE_TAG: &str = "O";

pub struct SequenceTagger<B: AutodiffBackend> {
    params: ModelParams,
    vocab: Option<Vocabulary>,
    tags: Option<Vocabulary>,
    store: VariableStore<B>,
}

impl<B: AutodiffBackend> Default for SequenceTagger<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: AutodiffBackend> SequenceTagger<B> {
    pub fn new() -> Self {
        Self {
            params: ModelParams::default(),
            vocab: None,
            tags: None,
            store: VariableStore::new(),
        }
    }

    pub fn from_parts(
        params: ModelParams,
        source_tokens: Option<Vec<String>>,
        tag_tokens: Option<Vec<String>>,
    ) -> Result<Self> {
        let source_tokens =
            source_tokens.ok_or_else(|| FrameworkError::missing_config("source vocabulary"))?;
        let tag_tokens =
            tag_tokens.ok_or_else(|| FrameworkError::missing_config("tag vocabulary"))?;
        Ok(Self {
            params,
            vocab: Some(Vocabulary::new(source_tokens)?),
            tags: Some(Vocabulary::new(tag_tokens)?),
            store: VariableStore::new(),
        })
    }

    fn vocab(&self) -> Result<&Vocabulary> {
        self.vocab
            .as_ref()
            .ok_or_else(|| FrameworkError::missing_config("source vocabulary"))
    }

    fn tags(&self) -> Result<&Vocabulary> {
        self.tags
            .as_ref()
            .ok_or_else(|| FrameworkError::missing_config("tag vocabulary"))
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
            WeightSpec::matrix("output_layer/kernel", d, self.tags()?.len())
                .with_vocab_axis(VocabRole::Target, 1),
        );
        specs.push(
            WeightSpec::vector("output_layer/bias", self.tags()?.len())
                .with_vocab_axis(VocabRole::Target, 0),
        );
        Ok(specs)
    }

    fn logits(&self, features: &FeatureBatch<B>) -> Result<Tensor<B, 3>> {
        let embedding = self.store.matrix("features_inputter/embedding")?;
        let x = embed(embedding, features.ids.clone());
        let encoded = self.encoder().forward(&self.store, x, &features.mask)?;
        Ok(add_bias(
            linear(encoded, self.store.matrix("output_layer/kernel")?),
            self.store.vector("output_layer/bias")?,
        ))
    }

    fn predict(&self, logits: &Tensor<B, 3>, features: &FeatureBatch<B>) -> Result<Predictions> {
        let tags = self.tags()?;
        let [b, t, _] = logits.dims();
        let picked = int_vec(logits.clone().argmax(2).reshape([b, t]))?;
        let mut sequences = Vec::with_capacity(b);
        for (row, &len) in (0..b).zip(&features.lengths) {
            let mut out = Vec::with_capacity(len);
            for pos in 0..len {
                let id = picked[row * t + pos] as usize;
                out.push(
                    tags.token(id)
                        .ok_or_else(|| {
                            FrameworkError::ShapeMismatch(format!(
                                "predicted id {id} is outside the tag vocabulary"
                            ))
                        })?
                        .to_string(),
                );
            }
            sequences.push(out);
        }
        let mut predictions = Predictions::new();
        predictions.insert("tags".to_string(), PredictionValue::TokenSequences(sequences));
        predictions.insert(
            "length".to_string(),
            PredictionValue::Lengths(features.lengths.clone()),
        );
        Ok(predictions)
    }
}

impl<B: AutodiffBackend> SequenceModel<B> for SequenceTagger<B> {
    fn task_type(&self) -> TaskType {
        TaskType::SequenceTagger
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
        // tag files are used verbatim, no reserved tokens
        self.tags = Some(Vocabulary::load(target, false)?);
        self.params = params.clone();
        tracing::info!(
            "Initialized tagger: |vocab| = {}, |tags| = {}",
            self.vocab()?.len(),
            self.tags()?.len()
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
        let logits = self.logits(features)?;
        let predictions = if mode.produces_predictions() {
            self.predict(&logits, features)?
        } else {
            Predictions::new()
        };
        let mut outputs = Outputs::empty();
        outputs.logits = Some(logits);
        Ok((outputs, predictions))
    }

    fn compute_loss(
        &self,
        outputs: &Outputs<B>,
        labels: &LabelBatch<B>,
        _training: bool,
    ) -> Result<Loss<B>> {
        let logits = outputs
            .logits
            .clone()
            .ok_or_else(|| FrameworkError::Data("loss requires tag logits".to_string()))?;
        let (numerator, denominator) =
            masked_cross_entropy(logits, labels.output_ids.clone(), labels.mask.clone());
        Ok(Loss::Ratio {
            numerator,
            denominator,
        })
    }

    fn metric_set(&self) -> MetricSet {
        let mut set = MetricSet::new();
        set.declare_ratio("accuracy");
        set.declare_f1("f1");
        set
    }

    fn update_metrics(
        &self,
        metrics: &mut MetricSet,
        predictions: &Predictions,
        labels: &LabelBatch<B>,
    ) -> Result<()> {
        let Some(PredictionValue::TokenSequences(predicted)) = predictions.get("tags") else {
            return Err(FrameworkError::Data(
                "tagger metrics require the 'tags' head".to_string(),
            ));
        };
        let (mut hits, mut total) = (0.0, 0.0);
        let (mut tp, mut fp, mut fn_) = (0.0, 0.0, 0.0);
        for (pred_seq, gold_seq) in predicted.iter().zip(&labels.tokens) {
            for (pred, gold) in pred_seq.iter().zip(gold_seq) {
                total += 1.0;
                if pred == gold {
                    hits += 1.0;
                    if gold != OUTSIDE_TAG {
                        tp += 1.0;
                    }
                } else {
                    if pred != OUTSIDE_TAG {
                        fp += 1.0;
                    }
                    if gold != OUTSIDE_TAG {
                        fn_ += 1.0;
                    }
                }
            }
        }
        metrics.add_ratio("accuracy", hits, total);
        metrics.add_f1("f1", tp, fp, fn_);
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
        if let Some(v) = &self.tags {
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
            Some(batcher.tag_labels(examples, self.tags()?)?)
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
                target_vocabulary: Some(self.tags()?.tokens().to_vec()),
            },
            weights: self.store.export()?,
        })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::ops::float_vec;

    type TB = burn::backend::Autodiff<burn::backend::NdArray>;

    fn toy_model() -> SequenceTagger<TB> {
        use crate::domain::vocabulary::{BOS_TOKEN, EOS_TOKEN, PAD_TOKEN, UNK_TOKEN};
        let mut words = vec![
            PAD_TOKEN.to_string(),
            BOS_TOKEN.to_string(),
            EOS_TOKEN.to_string(),
        ];
        words.extend(["john", "lives", "here"].map(String::from));
        words.push(UNK_TOKEN.to_string());
        SequenceTagger::from_parts(
            ModelParams {
                d_model: 8,
                d_ff: 16,
                ..ModelParams::default()
            },
            Some(words),
            Some(vec!["O".to_string(), "B-PER".to_string()]),
        )
        .unwrap()
    }

    fn example(src: &[&str], tags: &[&str]) -> Example {
        Example {
            source: src.iter().map(|s| s.to_string()).collect(),
            target: Some(tags.iter().map(|s| s.to_string()).collect()),
            alignment: None,
        }
    }

    #[test]
    fn test_eval_produces_tags_and_loss() {
        let device = Default::default();
        let mut model = toy_model();
        model.create_variables(&device, None).unwrap();

        let examples = vec![example(&["john", "lives"], &["B-PER", "O"])];
        let (features, labels) = model.prepare_batch(&examples, true, &device).unwrap();
        let labels = labels.unwrap();

        let (outputs, predictions) =
            model.forward(&features, Some(&labels), Mode::Eval).unwrap();
        let PredictionValue::TokenSequences(tags) = &predictions["tags"] else {
            panic!("missing tags head")
        };
        assert_eq!(tags[0].len(), 2, "one tag per real token");

        let loss = model.compute_loss(&outputs, &labels, false).unwrap();
        assert!(float_vec(loss.scalar()).unwrap()[0].is_finite());
    }

    #[test]
    fn test_metrics_reduce_correctly() {
        let device = Default::default();
        let mut model = toy_model();
        model.create_variables(&device, None).unwrap();

        let examples = vec![example(&["john", "lives"], &["B-PER", "O"])];
        let (_, labels) = model.prepare_batch(&examples, true, &device).unwrap();
        let labels = labels.unwrap();

        // pretend the model got everything right
        let mut predictions = Predictions::new();
        predictions.insert(
            "tags".to_string(),
            PredictionValue::TokenSequences(vec![vec![
                "B-PER".to_string(),
                "O".to_string(),
            ]]),
        );
        let mut metrics = model.metric_set();
        model
            .update_metrics(&mut metrics, &predictions, &labels)
            .unwrap();
        assert!((metrics.value("accuracy").unwrap() - 1.0).abs() < 1e-9);
        assert!((metrics.value("f1").unwrap() - 1.0).abs() < 1e-9);
        assert!(metrics.value("precision").is_some());
        assert!(metrics.value("recall").is_some());
    }

    #[test]
    fn test_metric_names_match_reporting_convention() {
        let names: Vec<String> = toy_model()
            .metric_set()
            .values()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, ["accuracy", "precision", "recall", "f1"]);
    }
}
