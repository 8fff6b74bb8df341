// ============================================================
// Layer 4 — Batching
// ============================================================
// Turns a Vec<Example> into padded tensors on the target device.
//
//   FeatureBatch  ids [B,T] + float mask [B,T] + lengths
//   LabelBatch    shifted input/output id pairs for decoders,
//                 plus an optional dense alignment matrix
//                 [B, T_tgt, T_src] for guided attention
//
// Decoder label pairs follow the usual shift: input = <s> + t,
// output = t + </s>, so position i predicts token i from
// everything up to i.
//
// Reference: Burn Book §2 (Tensors)

use burn::prelude::*;

use crate::data::dataset::Example;
use crate::domain::error::{FrameworkError, Result};
use crate::domain::vocabulary::Vocabulary;

/// Padded feature tensors plus the original tokens (kept around for
/// unknown-token replacement at prediction time).
#[derive(Debug, Clone)]
pub struct FeatureBatch<B: Backend> {
    pub ids: Tensor<B, 2, Int>,
    pub mask: Tensor<B, 2>,
    pub lengths: Vec<usize>,
    pub tokens: Vec<Vec<String>>,
}

impl<B: Backend> FeatureBatch<B> {
    pub fn batch_size(&self) -> usize {
        self.lengths.len()
    }
}

/// Padded label tensors for loss computation.
#[derive(Debug, Clone)]
pub struct LabelBatch<B: Backend> {
    /// Decoder input ids (<s> + t), or the bare label ids for
    /// tagging/classification.
    pub input_ids: Tensor<B, 2, Int>,
    /// Expected output ids (t + </s>), aligned with `input_ids`.
    pub output_ids: Tensor<B, 2, Int>,
    pub mask: Tensor<B, 2>,
    pub lengths: Vec<usize>,
    pub tokens: Vec<Vec<String>>,
    /// Dense [B, T_tgt, T_src] alignment matrix, 1.0 on aligned pairs.
    pub alignment: Option<Tensor<B, 3>>,
}

/// Builds batches for one vocabulary on one device.
pub struct TextBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> TextBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    fn pad_to_tensor(
        &self,
        sequences: &[Vec<usize>],
        pad_id: usize,
    ) -> (Tensor<B, 2, Int>, Tensor<B, 2>) {
        let batch = sequences.len();
        let max_len = sequences.iter().map(Vec::len).max().unwrap_or(1).max(1);
        let mut ids = vec![pad_id as i32; batch * max_len];
        let mut mask = vec![0.0f32; batch * max_len];
        for (b, seq) in sequences.iter().enumerate() {
            for (t, &id) in seq.iter().enumerate() {
                ids[b * max_len + t] = id as i32;
                mask[b * max_len + t] = 1.0;
            }
        }
        let ids = Tensor::from_data(TensorData::new(ids, [batch, max_len]), &self.device);
        let mask = Tensor::from_data(TensorData::new(mask, [batch, max_len]), &self.device);
        (ids, mask)
    }

    fn encode(&self, tokens: &[String], vocab: &Vocabulary) -> Result<Vec<usize>> {
        tokens
            .iter()
            .map(|t| {
                vocab.lookup(t).ok_or_else(|| {
                    FrameworkError::Data(format!("token '{t}' is not in the label vocabulary"))
                })
            })
            .collect()
    }

    /// Encode and pad the feature side of a batch.
    pub fn features(
        &self,
        examples: &[Example],
        vocab: &Vocabulary,
    ) -> Result<FeatureBatch<B>> {
        let sequences: Vec<Vec<usize>> = examples
            .iter()
            .map(|e| self.encode(&e.source, vocab))
            .collect::<Result<_>>()?;
        let lengths = sequences.iter().map(Vec::len).collect();
        let (ids, mask) = self.pad_to_tensor(&sequences, vocab.pad_id().unwrap_or(0));
        Ok(FeatureBatch {
            ids,
            mask,
            lengths,
            tokens: examples.iter().map(|e| e.source.clone()).collect(),
        })
    }

    /// Shifted decoder labels from the examples' target side, with the
    /// dense alignment matrix when the examples carry alignments.
    pub fn seq2seq_labels(
        &self,
        examples: &[Example],
        vocab: &Vocabulary,
    ) -> Result<LabelBatch<B>> {
        let targets: Vec<&Vec<String>> = examples
            .iter()
            .map(|e| {
                e.target.as_ref().ok_or_else(|| {
                    FrameworkError::Data("example has no labels".to_string())
                })
            })
            .collect::<Result<_>>()?;
        self.shifted_labels(&targets, vocab, Some(examples))
    }

    /// Language-model labels: the feature sequence itself, shifted.
    pub fn lm_labels(&self, examples: &[Example], vocab: &Vocabulary) -> Result<LabelBatch<B>> {
        let targets: Vec<&Vec<String>> = examples.iter().map(|e| &e.source).collect();
        self.shifted_labels(&targets, vocab, None)
    }

    fn shifted_labels(
        &self,
        targets: &[&Vec<String>],
        vocab: &Vocabulary,
        aligned_examples: Option<&[Example]>,
    ) -> Result<LabelBatch<B>> {
        let bos = vocab
            .bos_id()
            .ok_or_else(|| FrameworkError::missing_config("<s> in the label vocabulary"))?;
        let eos = vocab
            .eos_id()
            .ok_or_else(|| FrameworkError::missing_config("</s> in the label vocabulary"))?;

        let mut inputs = Vec::with_capacity(targets.len());
        let mut outputs = Vec::with_capacity(targets.len());
        for tokens in targets {
            let ids = self.encode(tokens, vocab)?;
            let mut input = Vec::with_capacity(ids.len() + 1);
            input.push(bos);
            input.extend_from_slice(&ids);
            let mut output = ids;
            output.push(eos);
            inputs.push(input);
            outputs.push(output);
        }

        let lengths: Vec<usize> = inputs.iter().map(Vec::len).collect();
        let pad = vocab.pad_id().unwrap_or(0);
        let (input_ids, mask) = self.pad_to_tensor(&inputs, pad);
        let (output_ids, _) = self.pad_to_tensor(&outputs, pad);

        let alignment = match aligned_examples {
            Some(examples) if examples.iter().any(|e| e.alignment.is_some()) => {
                Some(self.dense_alignment(examples, *lengths.iter().max().unwrap_or(&1))?)
            }
            _ => None,
        };

        Ok(LabelBatch {
            input_ids,
            output_ids,
            mask,
            lengths,
            tokens: targets.iter().map(|t| (*t).clone()).collect(),
            alignment,
        })
    }

    fn dense_alignment(&self, examples: &[Example], t_tgt: usize) -> Result<Tensor<B, 3>> {
        let t_src = examples.iter().map(|e| e.source.len()).max().unwrap_or(1);
        let batch = examples.len();
        let mut values = vec![0.0f32; batch * t_tgt * t_src];
        for (b, example) in examples.iter().enumerate() {
            let Some(pairs) = &example.alignment else {
                continue;
            };
            for &(src, tgt) in pairs {
                if src >= example.source.len() || tgt >= t_tgt {
                    return Err(FrameworkError::Data(format!(
                        "alignment pair {src}-{tgt} out of range for example {b}"
                    )));
                }
                values[b * t_tgt * t_src + tgt * t_src + src] = 1.0;
            }
        }
        Ok(Tensor::from_data(
            TensorData::new(values, [batch, t_tgt, t_src]),
            &self.device,
        ))
    }

    /// Per-position tag labels. Every label sequence must be exactly as
    /// long as its feature sequence.
    pub fn tag_labels(&self, examples: &[Example], vocab: &Vocabulary) -> Result<LabelBatch<B>> {
        let mut sequences = Vec::with_capacity(examples.len());
        for (i, example) in examples.iter().enumerate() {
            let target = example.target.as_ref().ok_or_else(|| {
                FrameworkError::Data("example has no labels".to_string())
            })?;
            if target.len() != example.source.len() {
                return Err(FrameworkError::Data(format!(
                    "example {i}: {} tags for {} tokens — tag sequences must match their \
                     feature sequence length",
                    target.len(),
                    example.source.len()
                )));
            }
            sequences.push(self.encode(target, vocab)?);
        }
        let lengths: Vec<usize> = sequences.iter().map(Vec::len).collect();
        let (ids, mask) = self.pad_to_tensor(&sequences, 0);
        Ok(LabelBatch {
            input_ids: ids.clone(),
            output_ids: ids,
            mask,
            lengths,
            tokens: examples
                .iter()
                .map(|e| e.target.clone().unwrap_or_default())
                .collect(),
            alignment: None,
        })
    }

    /// One class label per example, as a [B, 1] id tensor.
    pub fn class_labels(&self, examples: &[Example], vocab: &Vocabulary) -> Result<LabelBatch<B>> {
        let mut sequences = Vec::with_capacity(examples.len());
        for (i, example) in examples.iter().enumerate() {
            let target = example.target.as_ref().ok_or_else(|| {
                FrameworkError::Data("example has no labels".to_string())
            })?;
            if target.len() != 1 {
                return Err(FrameworkError::Data(format!(
                    "example {i}: expected exactly one class label, got {}",
                    target.len()
                )));
            }
            sequences.push(self.encode(target, vocab)?);
        }
        let lengths: Vec<usize> = sequences.iter().map(Vec::len).collect();
        let (ids, mask) = self.pad_to_tensor(&sequences, 0);
        Ok(LabelBatch {
            input_ids: ids.clone(),
            output_ids: ids,
            mask,
            lengths,
            tokens: examples
                .iter()
                .map(|e| e.target.clone().unwrap_or_default())
                .collect(),
            alignment: None,
        })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::ops::int_vec;

    type TB = burn::backend::Autodiff<burn::backend::NdArray>;

    fn text_vocab(tokens: &[&str]) -> Vocabulary {
        use crate::domain::vocabulary::{BOS_TOKEN, EOS_TOKEN, PAD_TOKEN, UNK_TOKEN};
        let mut all = vec![
            PAD_TOKEN.to_string(),
            BOS_TOKEN.to_string(),
            EOS_TOKEN.to_string(),
        ];
        all.extend(tokens.iter().map(|s| s.to_string()));
        all.push(UNK_TOKEN.to_string());
        Vocabulary::new(all).unwrap()
    }

    fn example(src: &[&str], tgt: Option<&[&str]>) -> Example {
        Example {
            source: src.iter().map(|s| s.to_string()).collect(),
            target: tgt.map(|t| t.iter().map(|s| s.to_string()).collect()),
            alignment: None,
        }
    }

    #[test]
    fn test_features_pad_and_mask() {
        let vocab = text_vocab(&["a", "b", "c"]);
        let batcher = TextBatcher::<TB>::new(Default::default());
        let batch = batcher
            .features(
                &[example(&["a", "b", "c"], None), example(&["b"], None)],
                &vocab,
            )
            .unwrap();
        assert_eq!(batch.ids.dims(), [2, 3]);
        assert_eq!(batch.lengths, vec![3, 1]);
        let ids = int_vec(batch.ids).unwrap();
        // "a"=3, "b"=4, "c"=5, pad=0
        assert_eq!(ids, vec![3, 4, 5, 4, 0, 0]);
        let mask = crate::ml::ops::float_vec(batch.mask).unwrap();
        assert_eq!(mask, vec![1.0, 1.0, 1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_unknown_feature_maps_to_unk() {
        let vocab = text_vocab(&["a"]);
        let batcher = TextBatcher::<TB>::new(Default::default());
        let batch = batcher.features(&[example(&["zzz"], None)], &vocab).unwrap();
        let ids = int_vec(batch.ids).unwrap();
        assert_eq!(ids[0] as usize, vocab.unk_id().unwrap());
    }

    #[test]
    fn test_seq2seq_labels_are_shifted() {
        let vocab = text_vocab(&["x", "y"]);
        let batcher = TextBatcher::<TB>::new(Default::default());
        let batch = batcher
            .seq2seq_labels(&[example(&["a"], Some(&["x", "y"]))], &vocab)
            .unwrap();
        let input = int_vec(batch.input_ids).unwrap();
        let output = int_vec(batch.output_ids).unwrap();
        // input = <s> x y ; output = x y </s>
        assert_eq!(input, vec![1, 3, 4]);
        assert_eq!(output, vec![3, 4, 2]);
    }

    #[test]
    fn test_tag_length_mismatch_is_data_error() {
        let vocab = Vocabulary::new(vec!["O".into(), "B".into()]).unwrap();
        let batcher = TextBatcher::<TB>::new(Default::default());
        let err = batcher
            .tag_labels(&[example(&["a", "b", "c"], Some(&["O", "B"]))], &vocab)
            .unwrap_err();
        assert!(matches!(err, FrameworkError::Data(_)));
    }

    #[test]
    fn test_unknown_tag_is_data_error() {
        // label vocabularies carry no <unk>: unseen labels must fail
        let vocab = Vocabulary::new(vec!["O".into()]).unwrap();
        let batcher = TextBatcher::<TB>::new(Default::default());
        let err = batcher
            .tag_labels(&[example(&["a"], Some(&["B-LOC"]))], &vocab)
            .unwrap_err();
        assert!(matches!(err, FrameworkError::Data(_)));
    }

    #[test]
    fn test_dense_alignment_matrix() {
        let vocab = text_vocab(&["x", "y"]);
        let batcher = TextBatcher::<TB>::new(Default::default());
        let mut ex = example(&["a", "b"], Some(&["x", "y"]));
        ex.alignment = Some(vec![(0, 0), (1, 1)]);
        let batch = batcher.seq2seq_labels(&[ex], &vocab).unwrap();
        let align = batch.alignment.expect("alignment matrix");
        // target length includes the shift: T_tgt = 3, T_src = 2
        assert_eq!(align.dims(), [1, 3, 2]);
        let vals = crate::ml::ops::float_vec(align).unwrap();
        assert_eq!(vals[0], 1.0); // tgt 0 <- src 0
        assert_eq!(vals[3], 1.0); // tgt 1 <- src 1
        assert_eq!(vals[1], 0.0);
    }
}
