// ============================================================
// Layer 5 — Self-Attention Encoder
// ============================================================
// A single pre-norm self-attention block: attention over the
// padded inputs, then a position-wise feed-forward, each with a
// residual connection and layer norm. Stateless — weights come
// from the VariableStore under this encoder's name prefix, so
// freezing "encoder/layers/0" reaches every tensor here.

use burn::prelude::*;
use burn::tensor::activation::gelu;

use crate::domain::error::Result;
use crate::ml::ops::{add_bias, attention, layer_norm, linear, padding_bias};
use crate::ml::vars::{VariableStore, WeightInit, WeightSpec};

const NORM_EPS: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct SelfAttentionEncoder {
    prefix: String,
    d_model: usize,
    d_ff: usize,
}

impl SelfAttentionEncoder {
    pub fn new(prefix: impl Into<String>, d_model: usize, d_ff: usize) -> Self {
        Self {
            prefix: prefix.into(),
            d_model,
            d_ff,
        }
    }

    pub fn weight_specs(&self) -> Vec<WeightSpec> {
        let p = &self.prefix;
        let d = self.d_model;
        let f = self.d_ff;
        vec![
            WeightSpec::matrix(format!("{p}/attention/query"), d, d),
            WeightSpec::matrix(format!("{p}/attention/key"), d, d),
            WeightSpec::matrix(format!("{p}/attention/value"), d, d),
            WeightSpec::vector(format!("{p}/norm_attention/gamma"), d)
                .with_init(WeightInit::Ones),
            WeightSpec::vector(format!("{p}/norm_attention/beta"), d),
            WeightSpec::matrix(format!("{p}/ffn/inner_kernel"), d, f),
            WeightSpec::vector(format!("{p}/ffn/inner_bias"), f),
            WeightSpec::matrix(format!("{p}/ffn/outer_kernel"), f, d),
            WeightSpec::vector(format!("{p}/ffn/outer_bias"), d),
            WeightSpec::vector(format!("{p}/norm_ffn/gamma"), d).with_init(WeightInit::Ones),
            WeightSpec::vector(format!("{p}/norm_ffn/beta"), d),
        ]
    }

    /// Encode [B, T, d_model] embeddings under a [B, T] padding mask.
    pub fn forward<B: Backend>(
        &self,
        store: &VariableStore<B>,
        x: Tensor<B, 3>,
        mask: &Tensor<B, 2>,
    ) -> Result<Tensor<B, 3>> {
        let p = &self.prefix;
        let bias = padding_bias(mask.clone());

        let normed = layer_norm(
            x.clone(),
            store.vector(&format!("{p}/norm_attention/gamma"))?,
            store.vector(&format!("{p}/norm_attention/beta"))?,
            NORM_EPS,
        );
        let q = linear(normed.clone(), store.matrix(&format!("{p}/attention/query"))?);
        let k = linear(normed.clone(), store.matrix(&format!("{p}/attention/key"))?);
        let v = linear(normed, store.matrix(&format!("{p}/attention/value"))?);
        let [b, t, _] = q.dims();
        let (context, _) = attention(q, k, v, bias.expand([b, t, t]));
        let x = x + context;

        let normed = layer_norm(
            x.clone(),
            store.vector(&format!("{p}/norm_ffn/gamma"))?,
            store.vector(&format!("{p}/norm_ffn/beta"))?,
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
        Ok(x + outer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TB = burn::backend::Autodiff<burn::backend::NdArray>;

    #[test]
    fn test_encoder_preserves_shape() {
        let device = Default::default();
        let encoder = SelfAttentionEncoder::new("encoder/layers/0", 8, 16);
        let store = VariableStore::<TB>::create(&encoder.weight_specs(), &device).unwrap();
        let x = Tensor::random([2, 5, 8], burn::tensor::Distribution::Default, &device);
        let mask = Tensor::ones([2, 5], &device);
        let y = encoder.forward(&store, x, &mask).unwrap();
        assert_eq!(y.dims(), [2, 5, 8]);
    }

    #[test]
    fn test_all_specs_live_under_the_prefix() {
        let encoder = SelfAttentionEncoder::new("encoder/layers/0", 8, 16);
        for spec in encoder.weight_specs() {
            assert!(spec.name.starts_with("encoder/layers/0/"), "{}", spec.name);
        }
    }
}
