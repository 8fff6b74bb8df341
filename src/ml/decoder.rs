// ============================================================
// Layer 5 — Attention Decoder
// ============================================================
// A causal self-attention block with an optional cross-attention
// over encoder memory, followed by a feed-forward, a final norm,
// and the vocabulary projection. Used in two configurations:
//
//   with cross-attention     sequence-to-sequence decoding
//   without cross-attention  language modeling
//
// The output projection is transpose-aligned: its kernel has
// shape [d_model, vocab], so the vocabulary sits on axis 1 and
// the transfer engine must remap columns, not rows.
//
// Greedy decoding runs the full prefix through the decoder each
// step and extends with the argmax token. Every output sequence
// contains at least one token before </s>.

use burn::prelude::*;
use burn::tensor::activation::{gelu, log_softmax};

use crate::domain::error::{FrameworkError, Result};
use crate::ml::ops::{
    add_bias, attention, causal_bias, float_vec, layer_norm, linear, padding_bias,
};
use crate::ml::vars::{VariableStore, VocabRole, WeightInit, WeightSpec};

const NORM_EPS: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct AttentionDecoder {
    prefix: String,
    d_model: usize,
    d_ff: usize,
    vocab_size: usize,
    vocab_role: VocabRole,
    with_cross_attention: bool,
}

impl AttentionDecoder {
    pub fn new(
        prefix: impl Into<String>,
        d_model: usize,
        d_ff: usize,
        vocab_size: usize,
        vocab_role: VocabRole,
        with_cross_attention: bool,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            d_model,
            d_ff,
            vocab_size,
            vocab_role,
            with_cross_attention,
        }
    }

    pub fn weight_specs(&self) -> Vec<WeightSpec> {
        let p = &self.prefix;
        let d = self.d_model;
        let f = self.d_ff;
        let v = self.vocab_size;
        let mut specs = vec![
            WeightSpec::matrix(format!("{p}/self_attention/query"), d, d),
            WeightSpec::matrix(format!("{p}/self_attention/key"), d, d),
            WeightSpec::matrix(format!("{p}/self_attention/value"), d, d),
        ];
        if self.with_cross_attention {
            specs.push(WeightSpec::matrix(format!("{p}/attention/query"), d, d));
            specs.push(WeightSpec::matrix(format!("{p}/attention/key"), d, d));
            specs.push(WeightSpec::matrix(format!("{p}/attention/value"), d, d));
        }
        specs.extend([
            WeightSpec::matrix(format!("{p}/ffn/inner_kernel"), d, f),
            WeightSpec::vector(format!("{p}/ffn/inner_bias"), f),
            WeightSpec::matrix(format!("{p}/ffn/outer_kernel"), f, d),
            WeightSpec::vector(format!("{p}/ffn/outer_bias"), d),
            WeightSpec::vector(format!("{p}/norm/gamma"), d).with_init(WeightInit::Ones),
            WeightSpec::vector(format!("{p}/norm/beta"), d),
            WeightSpec::matrix(format!("{p}/output_layer/kernel"), d, v)
                .with_vocab_axis(self.vocab_role, 1),
            WeightSpec::vector(format!("{p}/output_layer/bias"), v)
                .with_vocab_axis(self.vocab_role, 0),
        ]);
        specs
    }

    /// Teacher-forced pass. `memory` is the encoded source plus its
    /// padding mask; required iff this decoder has cross-attention.
    ///
    /// Returns per-position vocabulary logits and, with cross-attention,
    /// the attention distribution over the source.
    pub fn forward<B: Backend>(
        &self,
        store: &VariableStore<B>,
        x: Tensor<B, 3>,
        target_mask: &Tensor<B, 2>,
        memory: Option<(&Tensor<B, 3>, &Tensor<B, 2>)>,
    ) -> Result<(Tensor<B, 3>, Option<Tensor<B, 3>>)> {
        if self.with_cross_attention != memory.is_some() {
            return Err(FrameworkError::Configuration(
                "decoder memory does not match its cross-attention configuration".to_string(),
            ));
        }
        let p = &self.prefix;
        let [b, t, _] = x.dims();
        let device = x.device();

        let self_bias = causal_bias::<B>(t, &device).expand([b, t, t])
            + padding_bias(target_mask.clone()).expand([b, t, t]);
        let q = linear(x.clone(), store.matrix(&format!("{p}/self_attention/query"))?);
        let k = linear(x.clone(), store.matrix(&format!("{p}/self_attention/key"))?);
        let v = linear(x.clone(), store.matrix(&format!("{p}/self_attention/value"))?);
        let (context, _) = attention(q, k, v, self_bias);
        let mut x = x + context;

        let mut cross_probs = None;
        if let Some((memory, memory_mask)) = memory {
            let [_, t_src, _] = memory.dims();
            let bias = padding_bias(memory_mask.clone()).expand([b, t, t_src]);
            let q = linear(x.clone(), store.matrix(&format!("{p}/attention/query"))?);
            let k = linear(memory.clone(), store.matrix(&format!("{p}/attention/key"))?);
            let v = linear(memory.clone(), store.matrix(&format!("{p}/attention/value"))?);
            let (context, probs) = attention(q, k, v, bias);
            x = x + context;
            cross_probs = Some(probs);
        }

        let normed = layer_norm(
            x.clone(),
            store.vector(&format!("{p}/norm/gamma"))?,
            store.vector(&format!("{p}/norm/beta"))?,
            NORM_EPS,
        );
        let inner = gelu(add_bias(
            linear(normed, store.matrix(&format!("{p}/ffn/inner_kernel"))?),
            store.vector(&format!("{p}/ffn/inner_bias"))?,
        ));
        let outer = add_bias(
            linear(inner, store.matrix(&format!("{p}/ffn/outer_kernel"))?),
            store.vector(&format!("{p}/ffn/outer_bias"))?,
        );
        let x = layer_norm(
            x + outer,
            store.vector(&format!("{p}/norm/gamma"))?,
            store.vector(&format!("{p}/norm/beta"))?,
            NORM_EPS,
        );

        let logits = add_bias(
            linear(x, store.matrix(&format!("{p}/output_layer/kernel"))?),
            store.vector(&format!("{p}/output_layer/bias"))?,
        );
        Ok((logits, cross_probs))
    }

    /// Greedily extend each prefix until </s> or the length limit.
    /// All prefixes must share one length (batch rows decode in step).
    #[allow(clippy::too_many_arguments)]
    pub fn greedy_decode<B: Backend>(
        &self,
        store: &VariableStore<B>,
        embedding: &Tensor<B, 2>,
        prefixes: &[Vec<usize>],
        memory: Option<(&Tensor<B, 3>, &Tensor<B, 2>)>,
        eos_id: usize,
        max_length: usize,
        device: &B::Device,
    ) -> Result<DecodeResult> {
        let batch = prefixes.len();
        let prefix_len = prefixes.first().map(Vec::len).unwrap_or(0);
        if prefix_len == 0 || prefixes.iter().any(|p| p.len() != prefix_len) {
            return Err(FrameworkError::Data(
                "decoding prefixes must be non-empty and share one length".to_string(),
            ));
        }

        let mut sequences: Vec<Vec<usize>> = prefixes.to_vec();
        let mut generated: Vec<Vec<usize>> = vec![Vec::new(); batch];
        let mut log_probs = vec![0.0f32; batch];
        let mut finished = vec![false; batch];

        for step in 0..max_length {
            let t = sequences[0].len();
            let ids: Vec<i32> = sequences
                .iter()
                .flat_map(|s| s.iter().map(|&i| i as i32))
                .collect();
            let ids = Tensor::<B, 1, Int>::from_data(
                TensorData::new(ids, [batch * t]),
                device,
            );
            let x = embedding.clone().select(0, ids).reshape([batch, t, self.d_model]);
            let mask = Tensor::ones([batch, t], device);
            let (logits, _) = self.forward(store, x, &mask, memory)?;
            let last = log_softmax(logits, 2)
                .slice([0..batch, (t - 1)..t, 0..self.vocab_size])
                .reshape([batch, self.vocab_size]);
            let rows = float_vec(last)?;

            for b in 0..batch {
                if finished[b] {
                    sequences[b].push(eos_id);
                    continue;
                }
                let row = &rows[b * self.vocab_size..(b + 1) * self.vocab_size];
                let mut best = 0usize;
                for (i, &p) in row.iter().enumerate() {
                    // never end on an empty output
                    if step == 0 && i == eos_id {
                        continue;
                    }
                    if best == eos_id && step == 0 {
                        best = i;
                    }
                    if p > row[best] {
                        best = i;
                    }
                }
                log_probs[b] += row[best];
                sequences[b].push(best);
                if best == eos_id {
                    finished[b] = true;
                } else {
                    generated[b].push(best);
                }
            }
            if finished.iter().all(|&f| f) {
                break;
            }
        }

        // One more pass over the final sequences for the attention that
        // produced each generated token.
        let attention = if self.with_cross_attention {
            let t = sequences[0].len();
            let ids: Vec<i32> = sequences
                .iter()
                .flat_map(|s| s.iter().map(|&i| i as i32))
                .collect();
            let ids =
                Tensor::<B, 1, Int>::from_data(TensorData::new(ids, [batch * t]), device);
            let x = embedding.clone().select(0, ids).reshape([batch, t, self.d_model]);
            let mask = Tensor::ones([batch, t], device);
            let (_, probs) = self.forward(store, x, &mask, memory)?;
            let probs = probs.ok_or_else(|| {
                FrameworkError::ShapeMismatch("cross-attention produced no weights".to_string())
            })?;
            let [_, _, t_src] = probs.dims();
            let flat = float_vec(probs)?;
            let mut per_example = Vec::with_capacity(batch);
            for b in 0..batch {
                let mut steps = Vec::with_capacity(generated[b].len());
                for i in 0..generated[b].len() {
                    // token i was produced at query position prefix_len - 1 + i
                    let q = prefix_len - 1 + i;
                    let start = b * t * t_src + q * t_src;
                    steps.push(flat[start..start + t_src].to_vec());
                }
                per_example.push(steps);
            }
            Some(per_example)
        } else {
            None
        };

        Ok(DecodeResult {
            lengths: generated.iter().map(Vec::len).collect(),
            sequences: generated,
            log_probs,
            attention,
        })
    }
}

/// Greedy decoding output. `sequences` holds generated ids only — no
/// prefix, no </s>.
#[derive(Debug, Clone)]
pub struct DecodeResult {
    pub sequences: Vec<Vec<usize>>,
    pub lengths: Vec<usize>,
    pub log_probs: Vec<f32>,
    /// Per example, per generated token: attention over source positions.
    pub attention: Option<Vec<Vec<Vec<f32>>>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    type TB = burn::backend::Autodiff<burn::backend::NdArray>;

    fn decoder(vocab: usize, cross: bool) -> AttentionDecoder {
        AttentionDecoder::new("decoder", 8, 16, vocab, VocabRole::Target, cross)
    }

    #[test]
    fn test_forward_shapes_without_memory() {
        let device = Default::default();
        let dec = decoder(10, false);
        let store = VariableStore::<TB>::create(&dec.weight_specs(), &device).unwrap();
        let x = Tensor::random([2, 4, 8], burn::tensor::Distribution::Default, &device);
        let mask = Tensor::ones([2, 4], &device);
        let (logits, probs) = dec.forward(&store, x, &mask, None).unwrap();
        assert_eq!(logits.dims(), [2, 4, 10]);
        assert!(probs.is_none());
    }

    #[test]
    fn test_memory_mismatch_is_configuration_error() {
        let device = Default::default();
        let dec = decoder(10, true);
        let store = VariableStore::<TB>::create(&dec.weight_specs(), &device).unwrap();
        let x = Tensor::random([1, 2, 8], burn::tensor::Distribution::Default, &device);
        let mask = Tensor::ones([1, 2], &device);
        let err = dec.forward(&store, x, &mask, None).unwrap_err();
        assert!(matches!(err, FrameworkError::Configuration(_)));
    }

    #[test]
    fn test_greedy_decode_emits_at_least_one_token() {
        let device = Default::default();
        let dec = decoder(6, false);
        let store = VariableStore::<TB>::create(&dec.weight_specs(), &device).unwrap();
        let embedding = Tensor::random([6, 8], burn::tensor::Distribution::Default, &device);
        let result = dec
            .greedy_decode(&store, &embedding, &[vec![1], vec![1]], None, 2, 5, &device)
            .unwrap();
        assert_eq!(result.sequences.len(), 2);
        for (seq, &len) in result.sequences.iter().zip(&result.lengths) {
            assert!(len >= 1, "every output must contain at least one token");
            assert_eq!(seq.len(), len);
            assert!(seq.iter().all(|&id| id != 2), "</s> must not appear");
            assert!(len <= 5);
        }
    }
}
