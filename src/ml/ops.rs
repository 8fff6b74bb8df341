// ============================================================
// Layer 5 — Tensor Operations
// ============================================================
// Shared primitives the encoder, decoder, and loss functions
// are assembled from. Everything here is a free function over
// plain Burn tensors: the weights come in as arguments, the
// VariableStore stays out of this module.
//
// Shape conventions:
//   activations   [batch, time, d_model]
//   padding mask  [batch, time]        1.0 = real token, 0.0 = pad
//   attention     [batch, t_query, t_key]
//
// Reference: Burn Book §2 (Tensors)

use burn::prelude::*;
use burn::tensor::activation::{log_softmax, softmax};

use crate::domain::error::{FrameworkError, Result};

/// Look up [batch, time] token ids in a [vocab, d_model] embedding matrix.
pub fn embed<B: Backend>(embedding: Tensor<B, 2>, ids: Tensor<B, 2, Int>) -> Tensor<B, 3> {
    let [b, t] = ids.dims();
    let [_, d] = embedding.dims();
    embedding.select(0, ids.reshape([b * t])).reshape([b, t, d])
}

/// Apply a [d_in, d_out] kernel to every time step of [batch, time, d_in].
pub fn linear<B: Backend>(x: Tensor<B, 3>, kernel: Tensor<B, 2>) -> Tensor<B, 3> {
    let [b, t, d_in] = x.dims();
    let [_, d_out] = kernel.dims();
    x.reshape([b * t, d_in]).matmul(kernel).reshape([b, t, d_out])
}

/// Add a [d] bias to every position of [batch, time, d].
pub fn add_bias<B: Backend>(x: Tensor<B, 3>, bias: Tensor<B, 1>) -> Tensor<B, 3> {
    let [b, t, d] = x.dims();
    x + bias.reshape([1, 1, d]).expand([b, t, d])
}

/// Layer normalization over the feature axis with learned scale and shift.
pub fn layer_norm<B: Backend>(
    x: Tensor<B, 3>,
    gamma: Tensor<B, 1>,
    beta: Tensor<B, 1>,
    eps: f64,
) -> Tensor<B, 3> {
    let [b, t, d] = x.dims();
    let mean = x.clone().mean_dim(2).expand([b, t, d]);
    let centered = x - mean;
    let var = centered.clone().powf_scalar(2.0).mean_dim(2).expand([b, t, d]);
    let normed = centered / (var + eps).sqrt();
    let normed = normed * gamma.reshape([1, 1, d]).expand([b, t, d]);
    add_bias(normed, beta)
}

/// Scaled dot-product attention. `bias` is added to the raw scores
/// before the softmax (large negative values mask positions out).
///
/// Returns the context vectors and the attention distribution.
pub fn attention<B: Backend>(
    query: Tensor<B, 3>,
    key: Tensor<B, 3>,
    value: Tensor<B, 3>,
    bias: Tensor<B, 3>,
) -> (Tensor<B, 3>, Tensor<B, 3>) {
    let [_, _, d] = query.dims();
    let scale = 1.0 / (d as f64).sqrt();
    let scores = query.matmul(key.swap_dims(1, 2)) * scale;
    let probs = softmax(scores + bias, 2);
    let context = probs.clone().matmul(value);
    (context, probs)
}

/// Turn a [batch, time] padding mask into an additive attention bias of
/// shape [batch, 1, time]: 0.0 on real tokens, -1e9 on padding.
pub fn padding_bias<B: Backend>(mask: Tensor<B, 2>) -> Tensor<B, 3> {
    let [b, t] = mask.dims();
    ((mask - 1.0) * 1.0e9).reshape([b, 1, t])
}

/// Additive bias of shape [1, t, t] forbidding attention to future
/// positions. Position i may attend to positions 0..=i.
pub fn causal_bias<B: Backend>(t: usize, device: &B::Device) -> Tensor<B, 3> {
    let mut values = vec![0.0f32; t * t];
    for i in 0..t {
        for j in (i + 1)..t {
            values[i * t + j] = -1.0e9;
        }
    }
    Tensor::from_data(TensorData::new(values, [1, t, t]), device)
}

/// Per-token negative log-likelihood, summed over real tokens.
///
/// Returns (numerator, denominator): the summed loss and the token
/// count, both rank-1 singletons so the caller can accumulate ratios
/// across batches before dividing.
pub fn masked_cross_entropy<B: Backend>(
    logits: Tensor<B, 3>,
    targets: Tensor<B, 2, Int>,
    mask: Tensor<B, 2>,
) -> (Tensor<B, 1>, Tensor<B, 1>) {
    let [b, t, _] = logits.dims();
    let log_probs = log_softmax(logits, 2);
    let picked = log_probs
        .gather(2, targets.reshape([b, t, 1]))
        .reshape([b, t]);
    let numerator = (-picked * mask.clone()).sum();
    let denominator = mask.sum();
    (numerator.reshape([1]), denominator.reshape([1]))
}

/// Read a float tensor back as a flat Vec<f32>.
pub fn float_vec<B: Backend, const D: usize>(t: Tensor<B, D>) -> Result<Vec<f32>> {
    t.into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| FrameworkError::ShapeMismatch(format!("cannot read tensor data: {e:?}")))
}

/// Read an int tensor back as a flat Vec<i64>.
pub fn int_vec<B: Backend, const D: usize>(t: Tensor<B, D, Int>) -> Result<Vec<i64>> {
    t.into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| FrameworkError::ShapeMismatch(format!("cannot read tensor data: {e:?}")))
}
