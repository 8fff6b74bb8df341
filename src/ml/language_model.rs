// ============================================================
// Layer 5 — Language Model
// ============================================================
// Decoder-only task over a single vocabulary: the label sequence
// IS the feature sequence, shifted. No label files, no encoder,
// no cross-attention. Prediction continues each input prefix
// greedily until </s> or the length limit.
//
// The single vocabulary plays the Source role everywhere — both
// the embedding and the output projection remap through the
// same correspondence map on transfer.
//
// Prediction heads: "tokens", "length".

use burn::tensor::backend::AutodiffBackend;

use crate::data::batcher::{FeatureBatch, LabelBatch, TextBatcher};
use crate::data::dataset::Example;
use crate::data::inputter::ExampleInputter;
use crate::domain::error::{FrameworkError, Result};
use crate::domain::mode::Mode;
use crate::domain::vocabulary::Vocabulary;
use crate::ml::decoder::AttentionDecoder;
use crate::ml::model::{
    DataConfig, Loss, ModelParams, Outputs, PredictionValue, Predictions, SequenceModel,
    TaskType,
};
use crate::ml::ops::{embed, masked_cross_entropy};
use crate::ml::optim::SlotOptimizer;
use crate::ml::serving::{ModelBlueprint, ServingFunction};
use crate::ml::vars::{VariableStore, VocabRole, WeightSpec};

pub struct LanguageModel<B: AutodiffBackend> {
    params: ModelParams,
    vocab: Option<Vocabulary>,
    store: VariableStore<B>,
}

impl<B: AutodiffBackend> Default for LanguageModel<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: AutodiffBackend> LanguageModel<B> {
    pub fn new() -> Self {
        Self {
            params: ModelParams::default(),
            vocab: None,
            store: VariableStore::new(),
        }
    }

    pub fn from_parts(params: ModelParams, tokens: Option<Vec<String>>) -> Result<Self> {
        let tokens = tokens.ok_or_else(|| FrameworkError::missing_config("vocabulary"))?;
        Ok(Self {
            params,
            vocab: Some(Vocabulary::new(tokens)?),
            store: VariableStore::new(),
        })
    }

    fn vocab(&self) -> Result<&Vocabulary> {
        self.vocab
            .as_ref()
            .ok_or_else(|| FrameworkError::missing_config("vocabulary"))
    }

    fn decoder(&self) -> Result<AttentionDecoder> {
        Ok(AttentionDecoder::new(
            "decoder",
            self.params.d_model,
            self.params.d_ff,
            self.vocab()?.len(),
            VocabRole::Source,
            false,
        ))
    }

    fn weight_specs(&self) -> Result<Vec<WeightSpec>> {
        let mut specs = vec![WeightSpec::matrix(
            "features_inputter/embedding",
            self.vocab()?.len(),
            self.params.d_model,
        )
        .with_vocab_axis(VocabRole::Source, 0)];
        specs.extend(self.decoder()?.weight_specs());
        Ok(specs)
    }

    /// Continue each input prefix. All prefixes in one batch must share
    /// a length, since rows decode in lockstep (predict with batch size
    /// 1 for free-form inputs).
    fn predict(&self, features: &FeatureBatch<B>) -> Result<Predictions> {
        let vocab = self.vocab()?;
        let bos = vocab
            .bos_id()
            .ok_or_else(|| FrameworkError::missing_config("<s> in the vocabulary"))?;
        let eos = vocab
            .eos_id()
            .ok_or_else(|| FrameworkError::missing_config("</s> in the vocabulary"))?;

        let first = features.lengths.first().copied().unwrap_or(0);
        if features.lengths.iter().any(|&l| l != first) {
            return Err(FrameworkError::Data(
                "language model prediction needs equal-length prefixes in a batch; \
                 use batch size 1 for free-form inputs"
                    .to_string(),
            ));
        }

        let mut prefixes = Vec::with_capacity(features.tokens.len());
        for tokens in &features.tokens {
            let mut prefix = vec![bos];
            for token in tokens {
                prefix.push(vocab.lookup(token).ok_or_else(|| {
                    FrameworkError::Data(format!("token '{token}' has no id"))
                })?);
            }
            prefixes.push(prefix);
        }

        let embedding = self.store.matrix("features_inputter/embedding")?;
        let decoded = self.decoder()?.greedy_decode(
            &self.store,
            &embedding,
            &prefixes,
            None,
            eos,
            self.params.max_decode_length,
            &features.ids.device(),
        )?;

        let mut tokens_out = Vec::with_capacity(decoded.sequences.len());
        for sequence in &decoded.sequences {
            let mut tokens = Vec::with_capacity(sequence.len());
            for &id in sequence {
                tokens.push(
                    vocab
                        .token(id)
                        .ok_or_else(|| {
                            FrameworkError::ShapeMismatch(format!(
                                "decoded id {id} is outside the vocabulary"
                            ))
                        })?
                        .to_string(),
                );
            }
            tokens_out.push(tokens);
        }

        let mut predictions = Predictions::new();
        predictions.insert(
            "tokens".to_string(),
            PredictionValue::TokenSequences(tokens_out),
        );
        predictions.insert(
            "length".to_string(),
            PredictionValue::Lengths(decoded.lengths),
        );
        Ok(predictions)
    }
}

impl<B: AutodiffBackend> SequenceModel<B> for LanguageModel<B> {
    fn task_type(&self) -> TaskType {
        TaskType::LanguageModel
    }

    fn initialize(&mut self, data: &DataConfig, params: &ModelParams) -> Result<()> {
        let path = data
            .source_vocabulary
            .as_ref()
            .ok_or_else(|| FrameworkError::missing_config("source_vocabulary"))?;
        self.vocab = Some(Vocabulary::load(path, true)?);
        self.params = params.clone();
        tracing::info!("Initialized language model: |vocab| = {}", self.vocab()?.len());
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
        let mut outputs = Outputs::empty();
        if mode.requires_labels() {
            let labels = labels.ok_or_else(|| {
                FrameworkError::Data("training and evaluation require labels".to_string())
            })?;
            let embedding = self.store.matrix("features_inputter/embedding")?;
            let x = embed(embedding, labels.input_ids.clone());
            let (logits, _) = self.decoder()?.forward(&self.store, x, &labels.mask, None)?;
            outputs.logits = Some(logits);
        }

        let predictions = if mode.produces_predictions() {
            self.predict(features)?
        } else {
            Predictions::new()
        };
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
            .ok_or_else(|| FrameworkError::Data("loss requires decoder logits".to_string()))?;
        let (numerator, denominator) =
            masked_cross_entropy(logits, labels.output_ids.clone(), labels.mask.clone());
        Ok(Loss::Ratio {
            numerator,
            denominator,
        })
    }

    fn store(&self) -> &VariableStore<B> {
        &self.store
    }

    fn store_mut(&mut self) -> &mut VariableStore<B> {
        &mut self.store
    }

    fn vocabularies(&self) -> Vec<(VocabRole, &Vocabulary)> {
        self.vocab
            .as_ref()
            .map(|v| vec![(VocabRole::Source, v)])
            .unwrap_or_default()
    }

    fn example_inputter(&self) -> ExampleInputter {
        ExampleInputter::self_supervised()
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
            // labels derive from the features; no label file involved
            Some(batcher.lm_labels(examples, self.vocab()?)?)
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
                target_vocabulary: None,
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

    fn toy_model() -> LanguageModel<TB> {
        use crate::domain::vocabulary::{BOS_TOKEN, EOS_TOKEN, PAD_TOKEN, UNK_TOKEN};
        let mut tokens = vec![
            PAD_TOKEN.to_string(),
            BOS_TOKEN.to_string(),
            EOS_TOKEN.to_string(),
        ];
        tokens.extend(["a", "b", "c"].map(String::from));
        tokens.push(UNK_TOKEN.to_string());
        LanguageModel::from_parts(
            ModelParams {
                d_model: 8,
                d_ff: 16,
                max_decode_length: 3,
                ..ModelParams::default()
            },
            Some(tokens),
        )
        .unwrap()
    }

    #[test]
    fn test_labels_derive_from_features() {
        let device = Default::default();
        let mut model = toy_model();
        model.create_variables(&device, None).unwrap();

        let examples = vec![Example::features_only(vec!["a".into(), "b".into()])];
        let (features, labels) = model.prepare_batch(&examples, true, &device).unwrap();
        let labels = labels.unwrap();

        let (outputs, _) = model.forward(&features, Some(&labels), Mode::Train).unwrap();
        let loss = model.compute_loss(&outputs, &labels, true).unwrap();
        let value = float_vec(loss.scalar()).unwrap()[0];
        assert!(value.is_finite() && value > 0.0);
    }

    #[test]
    fn test_predict_continues_the_prefix() {
        let device = Default::default();
        let mut model = toy_model();
        model.create_variables(&device, None).unwrap();

        let examples = vec![Example::features_only(vec!["a".into()])];
        let (features, _) = model.prepare_batch(&examples, false, &device).unwrap();
        let (_, predictions) = model.forward(&features, None, Mode::Predict).unwrap();

        let PredictionValue::TokenSequences(tokens) = &predictions["tokens"] else {
            panic!("missing tokens head")
        };
        let PredictionValue::Lengths(lengths) = &predictions["length"] else {
            panic!("missing length head")
        };
        assert_eq!(tokens.len(), 1);
        assert!(lengths[0] >= 1 && lengths[0] <= 3);
        assert_eq!(tokens[0].len(), lengths[0]);
        assert!(!predictions.contains_key("log_probs"));
    }

    #[test]
    fn test_ragged_prediction_batch_is_data_error() {
        let device = Default::default();
        let mut model = toy_model();
        model.create_variables(&device, None).unwrap();

        let examples = vec![
            Example::features_only(vec!["a".into(), "b".into()]),
            Example::features_only(vec!["c".into()]),
        ];
        let (features, _) = model.prepare_batch(&examples, false, &device).unwrap();
        let err = model.forward(&features, None, Mode::Predict).unwrap_err();
        assert!(matches!(err, FrameworkError::Data(_)));
    }
}
