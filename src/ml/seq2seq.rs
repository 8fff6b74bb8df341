// ============================================================
// Layer 5 — Sequence-to-Sequence
// ============================================================
// Encoder–decoder task: source sentence in, target sentence
// out. Trains with teacher forcing on shifted targets, predicts
// with greedy decoding. Two extras beyond the base objective:
//
//   guided alignment    supervise the decoder's cross-attention
//                       with word alignments ("ce" or "mse")
//   unknown replacement replace generated <unk> tokens with the
//                       most-attended source token
//
// Prediction heads: "tokens", "length", "log_probs".

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use crate::data::batcher::{FeatureBatch, LabelBatch, TextBatcher};
use crate::data::dataset::Example;
use crate::data::inputter::ExampleInputter;
use crate::domain::error::{FrameworkError, Result};
use crate::domain::mode::Mode;
use crate::domain::vocabulary::Vocabulary;
use crate::ml::decoder::{AttentionDecoder, DecodeResult};
use crate::ml::encoder::SelfAttentionEncoder;
use crate::ml::model::{
    DataConfig, GuidedAlignment, Loss, ModelParams, Outputs, PredictionValue, Predictions,
    SequenceModel, TaskType,
};
use crate::ml::ops::{embed, masked_cross_entropy};
use crate::ml::optim::SlotOptimizer;
use crate::ml::serving::{ModelBlueprint, ServingFunction};
use crate::ml::vars::{VariableStore, VocabRole, WeightSpec};

pub struct SequenceToSequence<B: AutodiffBackend> {
    params: ModelParams,
    source_vocab: Option<Vocabulary>,
    target_vocab: Option<Vocabulary>,
    store: VariableStore<B>,
}

impl<B: AutodiffBackend> Default for SequenceToSequence<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: AutodiffBackend> SequenceToSequence<B> {
    pub fn new() -> Self {
        Self {
            params: ModelParams::default(),
            source_vocab: None,
            target_vocab: None,
            store: VariableStore::new(),
        }
    }

    pub fn from_parts(
        params: ModelParams,
        source_tokens: Option<Vec<String>>,
        target_tokens: Option<Vec<String>>,
    ) -> Result<Self> {
        let source_tokens = source_tokens
            .ok_or_else(|| FrameworkError::missing_config("source vocabulary"))?;
        let target_tokens = target_tokens
            .ok_or_else(|| FrameworkError::missing_config("target vocabulary"))?;
        Ok(Self {
            params,
            source_vocab: Some(Vocabulary::new(source_tokens)?),
            target_vocab: Some(Vocabulary::new(target_tokens)?),
            store: VariableStore::new(),
        })
    }

    fn source_vocab(&self) -> Result<&Vocabulary> {
        self.source_vocab
            .as_ref()
            .ok_or_else(|| FrameworkError::missing_config("source vocabulary"))
    }

    fn target_vocab(&self) -> Result<&Vocabulary> {
        self.target_vocab
            .as_ref()
            .ok_or_else(|| FrameworkError::missing_config("target vocabulary"))
    }

    fn encoder(&self) -> SelfAttentionEncoder {
        SelfAttentionEncoder::new("encoder/layers/0", self.params.d_model, self.params.d_ff)
    }

    fn decoder(&self) -> Result<AttentionDecoder> {
        Ok(AttentionDecoder::new(
            "decoder",
            self.params.d_model,
            self.params.d_ff,
            self.target_vocab()?.len(),
            VocabRole::Target,
            true,
        ))
    }

    fn weight_specs(&self) -> Result<Vec<WeightSpec>> {
        let mut specs = vec![
            WeightSpec::matrix(
                "features_inputter/embedding",
                self.source_vocab()?.len(),
                self.params.d_model,
            )
            .with_vocab_axis(VocabRole::Source, 0),
            WeightSpec::matrix(
                "labels_inputter/embedding",
                self.target_vocab()?.len(),
                self.params.d_model,
            )
            .with_vocab_axis(VocabRole::Target, 0),
        ];
        specs.extend(self.encoder().weight_specs());
        specs.extend(self.decoder()?.weight_specs());
        Ok(specs)
    }

    fn encode(&self, features: &FeatureBatch<B>) -> Result<Tensor<B, 3>> {
        let embedding = self.store.matrix("features_inputter/embedding")?;
        let x = embed(embedding, features.ids.clone());
        self.encoder().forward(&self.store, x, &features.mask)
    }

    fn predict(&self, features: &FeatureBatch<B>) -> Result<Predictions> {
        let vocab = self.target_vocab()?;
        let bos = vocab
            .bos_id()
            .ok_or_else(|| FrameworkError::missing_config("<s> in the target vocabulary"))?;
        let eos = vocab
            .eos_id()
            .ok_or_else(|| FrameworkError::missing_config("</s> in the target vocabulary"))?;

        let memory = self.encode(features)?;
        let embedding = self.store.matrix("labels_inputter/embedding")?;
        let prefixes = vec![vec![bos]; features.batch_size()];
        let decoded = self.decoder()?.greedy_decode(
            &self.store,
            &embedding,
            &prefixes,
            Some((&memory, &features.mask)),
            eos,
            self.params.max_decode_length,
            &features.ids.device(),
        )?;

        let tokens = self.output_tokens(&decoded, features, vocab)?;
        let mut predictions = Predictions::new();
        predictions.insert("tokens".to_string(), PredictionValue::TokenSequences(tokens));
        predictions.insert(
            "length".to_string(),
            PredictionValue::Lengths(decoded.lengths.clone()),
        );
        predictions.insert(
            "log_probs".to_string(),
            PredictionValue::Scores(decoded.log_probs.clone()),
        );
        Ok(predictions)
    }

    /// Ids → tokens, with <unk> replaced by the most-attended source
    /// token when configured.
    fn output_tokens(
        &self,
        decoded: &DecodeResult,
        features: &FeatureBatch<B>,
        vocab: &Vocabulary,
    ) -> Result<Vec<Vec<String>>> {
        let unk_id = vocab.unk_id();
        let mut out = Vec::with_capacity(decoded.sequences.len());
        for (b, sequence) in decoded.sequences.iter().enumerate() {
            let mut tokens = Vec::with_capacity(sequence.len());
            for (i, &id) in sequence.iter().enumerate() {
                let is_unk = Some(id) == unk_id;
                if is_unk && self.params.replace_unknown_target {
                    let replacement = decoded
                        .attention
                        .as_ref()
                        .and_then(|a| a.get(b))
                        .and_then(|steps| steps.get(i))
                        .and_then(|row| {
                            // restrict to the example's real source tokens
                            let len = features.lengths[b].min(row.len());
                            (0..len).max_by(|&x, &y| {
                                row[x].partial_cmp(&row[y]).unwrap_or(std::cmp::Ordering::Equal)
                            })
                        })
                        .and_then(|src_pos| features.tokens[b].get(src_pos).cloned());
                    if let Some(token) = replacement {
                        tokens.push(token);
                        continue;
                    }
                }
                tokens.push(
                    vocab
                        .token(id)
                        .ok_or_else(|| {
                            FrameworkError::ShapeMismatch(format!(
                                "decoded id {id} is outside the target vocabulary"
                            ))
                        })?
                        .to_string(),
                );
            }
            out.push(tokens);
        }
        Ok(out)
    }

    fn alignment_loss(
        &self,
        kind: GuidedAlignment,
        attention: &Tensor<B, 3>,
        alignment: &Tensor<B, 3>,
    ) -> Result<Tensor<B, 1>> {
        let att_dims = attention.dims();
        let ali_dims = alignment.dims();
        if att_dims != ali_dims {
            return Err(FrameworkError::ShapeMismatch(format!(
                "attention {att_dims:?} vs alignment {ali_dims:?}"
            )));
        }
        let [b, t_tgt, t_src] = att_dims;
        match kind {
            GuidedAlignment::CrossEntropy => {
                let total = alignment.clone().sum().clamp_min(1.0);
                let nll = -(alignment.clone() * (attention.clone() + 1e-9).log()).sum();
                Ok((nll / total).reshape([1]))
            }
            GuidedAlignment::MeanSquaredError => {
                // only rows with at least one supervised link count
                let row_mask = alignment
                    .clone()
                    .sum_dim(2)
                    .clamp(0.0, 1.0)
                    .expand([b, t_tgt, t_src]);
                let total = row_mask.clone().sum().clamp_min(1.0);
                let sq = (attention.clone() - alignment.clone()).powf_scalar(2.0);
                Ok(((sq * row_mask).sum() / total).reshape([1]))
            }
        }
    }
}

impl<B: AutodiffBackend> SequenceModel<B> for SequenceToSequence<B> {
    fn task_type(&self) -> TaskType {
        TaskType::SequenceToSequence
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
        self.source_vocab = Some(Vocabulary::load(source, true)?);
        self.target_vocab = Some(Vocabulary::load(target, true)?);
        self.params = params.clone();
        tracing::info!(
            "Initialized seq2seq: |source| = {}, |target| = {}",
            self.source_vocab()?.len(),
            self.target_vocab()?.len()
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
        let mut outputs = Outputs::empty();
        if mode.requires_labels() {
            let labels = labels.ok_or_else(|| {
                FrameworkError::Data("training and evaluation require labels".to_string())
            })?;
            let memory = self.encode(features)?;
            let embedding = self.store.matrix("labels_inputter/embedding")?;
            let x = embed(embedding, labels.input_ids.clone());
            let (logits, attention) = self.decoder()?.forward(
                &self.store,
                x,
                &labels.mask,
                Some((&memory, &features.mask)),
            )?;
            outputs.logits = Some(logits);
            outputs.attention = attention;
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
        training: bool,
    ) -> Result<Loss<B>> {
        let logits = outputs
            .logits
            .clone()
            .ok_or_else(|| FrameworkError::Data("loss requires decoder logits".to_string()))?;
        let (mut numerator, denominator) =
            masked_cross_entropy(logits, labels.output_ids.clone(), labels.mask.clone());

        if training {
            if let (Some(kind), Some(alignment)) =
                (self.params.guided_alignment, labels.alignment.as_ref())
            {
                let attention = outputs.attention.clone().ok_or_else(|| {
                    FrameworkError::Data(
                        "guided alignment requires decoder attention".to_string(),
                    )
                })?;
                let extra = self.alignment_loss(kind, &attention, alignment)?;
                numerator = numerator
                    + extra * self.params.guided_alignment_weight * denominator.clone();
            }
        }
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
        let mut out = Vec::new();
        if let Some(v) = &self.source_vocab {
            out.push((VocabRole::Source, v));
        }
        if let Some(v) = &self.target_vocab {
            out.push((VocabRole::Target, v));
        }
        out
    }

    fn example_inputter(&self) -> ExampleInputter {
        ExampleInputter::paired_with_alignments()
    }

    fn prepare_batch(
        &self,
        examples: &[Example],
        with_labels: bool,
        device: &B::Device,
    ) -> Result<(FeatureBatch<B>, Option<LabelBatch<B>>)> {
        let batcher = TextBatcher::<B>::new(device.clone());
        let features = batcher.features(examples, self.source_vocab()?)?;
        let labels = if with_labels {
            Some(batcher.seq2seq_labels(examples, self.target_vocab()?)?)
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
                source_vocabulary: Some(self.source_vocab()?.tokens().to_vec()),
                target_vocabulary: Some(self.target_vocab()?.tokens().to_vec()),
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

    pub(crate) fn text_tokens(tokens: &[&str]) -> Vec<String> {
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

    fn toy_model(freeze: Vec<String>) -> SequenceToSequence<TB> {
        let params = ModelParams {
            d_model: 8,
            d_ff: 16,
            max_decode_length: 4,
            freeze_layers: freeze,
            ..ModelParams::default()
        };
        SequenceToSequence::from_parts(
            params,
            Some(text_tokens(&["a", "b", "c"])),
            Some(text_tokens(&["x", "y"])),
        )
        .unwrap()
    }

    fn example(src: &[&str], tgt: &[&str]) -> Example {
        Example {
            source: src.iter().map(|s| s.to_string()).collect(),
            target: Some(tgt.iter().map(|s| s.to_string()).collect()),
            alignment: None,
        }
    }

    #[test]
    fn test_train_forward_and_loss() {
        let device = Default::default();
        let mut model = toy_model(Vec::new());
        model.create_variables(&device, None).unwrap();

        let examples = vec![example(&["a", "b"], &["x"]), example(&["c"], &["y", "x"])];
        let (features, labels) = model.prepare_batch(&examples, true, &device).unwrap();
        let labels = labels.unwrap();

        let (outputs, predictions) = model
            .forward(&features, Some(&labels), Mode::Train)
            .unwrap();
        assert!(outputs.logits.is_some());
        assert!(predictions.is_empty(), "TRAIN must not produce predictions");

        let loss = model.compute_loss(&outputs, &labels, true).unwrap();
        let value = float_vec(loss.scalar()).unwrap()[0];
        assert!(value.is_finite() && value > 0.0);
    }

    #[test]
    fn test_predict_heads() {
        let device = Default::default();
        let mut model = toy_model(Vec::new());
        model.create_variables(&device, None).unwrap();

        let examples = vec![
            Example::features_only(vec!["a".into(), "b".into()]),
            Example::features_only(vec!["c".into()]),
        ];
        let (features, labels) = model.prepare_batch(&examples, false, &device).unwrap();
        assert!(labels.is_none());

        let (_, predictions) = model.forward(&features, None, Mode::Predict).unwrap();
        let PredictionValue::TokenSequences(tokens) = &predictions["tokens"] else {
            panic!("missing tokens head")
        };
        let PredictionValue::Lengths(lengths) = &predictions["length"] else {
            panic!("missing length head")
        };
        let PredictionValue::Scores(log_probs) = &predictions["log_probs"] else {
            panic!("missing log_probs head")
        };
        assert_eq!(tokens.len(), 2);
        assert_eq!(lengths.len(), 2);
        assert_eq!(log_probs.len(), 2);
        for (seq, &len) in tokens.iter().zip(lengths) {
            assert_eq!(seq.len(), len);
            assert!(len >= 1);
            assert!(len <= 4, "decoding must respect the length limit");
        }
    }

    #[test]
    fn test_guided_alignment_changes_the_loss() {
        let device = Default::default();
        let mut with_ga = toy_model(Vec::new());
        with_ga.params.guided_alignment = Some(GuidedAlignment::CrossEntropy);
        with_ga.params.guided_alignment_weight = 2.0;
        with_ga.create_variables(&device, None).unwrap();

        let mut ex = example(&["a", "b"], &["x", "y"]);
        ex.alignment = Some(vec![(0, 0), (1, 1)]);
        let (features, labels) = with_ga.prepare_batch(&[ex], true, &device).unwrap();
        let labels = labels.unwrap();
        assert!(labels.alignment.is_some());

        let (outputs, _) = with_ga
            .forward(&features, Some(&labels), Mode::Train)
            .unwrap();
        let guided = float_vec(
            with_ga
                .compute_loss(&outputs, &labels, true)
                .unwrap()
                .scalar(),
        )
        .unwrap()[0];

        with_ga.params.guided_alignment = None;
        let plain = float_vec(
            with_ga
                .compute_loss(&outputs, &labels, true)
                .unwrap()
                .scalar(),
        )
        .unwrap()[0];
        assert!(guided > plain, "alignment supervision must add to the loss");
    }

    #[test]
    fn test_freeze_paths_resolve() {
        let device = Default::default();
        let mut model = toy_model(vec![
            "decoder/output_layer".to_string(),
            "encoder/layers/0".to_string(),
        ]);
        model.create_variables(&device, None).unwrap();
        let trainable = model.store().trainable_names();
        assert!(!trainable.iter().any(|n| n.starts_with("encoder/layers/0/")));
        assert!(!trainable.contains(&"decoder/output_layer/kernel".to_string()));
        assert!(trainable.contains(&"features_inputter/embedding".to_string()));
    }

    #[test]
    fn test_transfer_to_grown_target_vocabulary() {
        let device = Default::default();
        let mut source = toy_model(Vec::new());
        source.create_variables(&device, None).unwrap();

        // same source side, target side gains the token "z"
        let params = source.params.clone();
        let mut target = SequenceToSequence::<TB>::from_parts(
            params,
            Some(text_tokens(&["a", "b", "c"])),
            Some(text_tokens(&["x", "y", "z"])),
        )
        .unwrap();
        target.create_variables(&device, None).unwrap();
        source.transfer_weights(&mut target, None, None).unwrap();

        let d = 8usize;
        let old_vocab = source.target_vocab().unwrap();
        let new_vocab = target.target_vocab().unwrap();

        // embedding rows of shared tokens carry over
        let old_emb = source
            .store()
            .weight("labels_inputter/embedding")
            .unwrap()
            .to_flat_vec()
            .unwrap();
        let new_emb = target
            .store()
            .weight("labels_inputter/embedding")
            .unwrap()
            .to_flat_vec()
            .unwrap();
        for token in ["x", "y", "</s>"] {
            let old_id = old_vocab.id(token).unwrap();
            let new_id = new_vocab.id(token).unwrap();
            assert_eq!(
                old_emb[old_id * d..(old_id + 1) * d],
                new_emb[new_id * d..(new_id + 1) * d],
                "embedding row for '{token}' must carry over"
            );
        }

        // the transpose-aligned output kernel remaps columns
        let old_v = old_vocab.len();
        let new_v = new_vocab.len();
        let old_kernel = source
            .store()
            .weight("decoder/output_layer/kernel")
            .unwrap()
            .to_flat_vec()
            .unwrap();
        let new_kernel = target
            .store()
            .weight("decoder/output_layer/kernel")
            .unwrap()
            .to_flat_vec()
            .unwrap();
        let old_id = old_vocab.id("y").unwrap();
        let new_id = new_vocab.id("y").unwrap();
        for row in 0..d {
            assert_eq!(
                old_kernel[row * old_v + old_id],
                new_kernel[row * new_v + new_id],
                "output kernel column for 'y' must carry over"
            );
        }

        // unrelated weights copy wholesale
        assert_eq!(
            source
                .store()
                .weight("encoder/layers/0/attention/query")
                .unwrap()
                .to_flat_vec()
                .unwrap(),
            target
                .store()
                .weight("encoder/layers/0/attention/query")
                .unwrap()
                .to_flat_vec()
                .unwrap()
        );
    }

    #[test]
    fn test_unknown_freeze_path_fails_at_variable_creation() {
        let device = Default::default();
        let mut model = toy_model(vec!["decoder/no_such".to_string()]);
        let err = model.create_variables(&device, None).unwrap_err();
        assert!(matches!(err, FrameworkError::Configuration(_)));
    }
}
