// ============================================================
// Layer 5 — Vocabulary Transfer Engine
// ============================================================
// Moves trained weights from a source model into a target model
// that differs only in its vocabularies. For every weight with a
// vocabulary axis, rows are re-indexed through a
// CorrespondenceMap (new id → old id): matched rows copy their
// trained values, absent rows keep the target's fresh
// initialization. Weights without a vocabulary axis are copied
// wholesale. Optimizer slots (momentum, Adam moments) ride along
// through the exact same remapping, so training resumes without
// a cold optimizer.
//
// The vocabulary axis may sit at position 0 (embeddings) or 1
// (transpose-aligned output kernels of shape [d_model, vocab]);
// axis 1 is handled by transposing, remapping rows, and
// transposing back.
//
// Any structural difference beyond the vocabularies — a missing
// weight, a rank change, a non-vocab dimension that moved — is
// a ShapeMismatch and aborts the transfer.

use std::collections::HashMap;

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use crate::domain::error::{FrameworkError, Result};
use crate::domain::vocabulary::CorrespondenceMap;
use crate::ml::optim::SlotOptimizer;
use crate::ml::vars::{VariableStore, VocabRole, WeightTensor};

/// Re-index the vocabulary axis of `source` into the geometry of
/// `target`, consuming `target` as the base for absent rows.
///
/// `map.len()` must equal the target's vocabulary dimension; the
/// non-vocabulary dimensions of both weights must agree.
pub fn remap_rows<B: Backend>(
    source: &WeightTensor<B>,
    target: WeightTensor<B>,
    map: &CorrespondenceMap,
    axis: usize,
) -> Result<WeightTensor<B>> {
    if source.rank() != target.rank() {
        return Err(FrameworkError::ShapeMismatch(format!(
            "rank mismatch in vocabulary remap: source {:?} vs target {:?}",
            source.shape(),
            target.shape()
        )));
    }
    if axis >= source.rank() {
        return Err(FrameworkError::ShapeMismatch(format!(
            "vocabulary axis {axis} out of range for rank {}",
            source.rank()
        )));
    }

    match (source, target) {
        (WeightTensor::Vector(src), WeightTensor::Vector(tgt)) => {
            let src_vals = vector_data(src)?;
            let mut tgt_vals = vector_data(&tgt)?;
            if tgt_vals.len() != map.len() {
                return Err(FrameworkError::ShapeMismatch(format!(
                    "target length {} != correspondence entries {}",
                    tgt_vals.len(),
                    map.len()
                )));
            }
            for (new_id, old_id) in map.iter().enumerate() {
                if let Some(old_id) = old_id {
                    if old_id >= src_vals.len() {
                        return Err(FrameworkError::ShapeMismatch(format!(
                            "correspondence points at old id {old_id} but source length is {}",
                            src_vals.len()
                        )));
                    }
                    tgt_vals[new_id] = src_vals[old_id];
                }
            }
            let n = tgt_vals.len();
            Ok(WeightTensor::Vector(Tensor::from_data(
                TensorData::new(tgt_vals, [n]),
                &src.device(),
            )))
        }
        (WeightTensor::Matrix(src), WeightTensor::Matrix(tgt)) => {
            // Normalize to rows-are-vocabulary, remap, undo.
            let (src, tgt) = if axis == 1 {
                (src.clone().swap_dims(0, 1), tgt.swap_dims(0, 1))
            } else {
                (src.clone(), tgt)
            };
            let [src_rows, src_cols] = src.dims();
            let [tgt_rows, tgt_cols] = tgt.dims();
            if src_cols != tgt_cols {
                return Err(FrameworkError::ShapeMismatch(format!(
                    "non-vocabulary dimension changed: {src_cols} vs {tgt_cols}"
                )));
            }
            if tgt_rows != map.len() {
                return Err(FrameworkError::ShapeMismatch(format!(
                    "target vocabulary dimension {tgt_rows} != correspondence entries {}",
                    map.len()
                )));
            }
            let src_vals = matrix_data(&src)?;
            let mut tgt_vals = matrix_data(&tgt)?;
            for (new_id, old_id) in map.iter().enumerate() {
                if let Some(old_id) = old_id {
                    if old_id >= src_rows {
                        return Err(FrameworkError::ShapeMismatch(format!(
                            "correspondence points at old id {old_id} but source has {src_rows} rows"
                        )));
                    }
                    let dst = new_id * tgt_cols;
                    let s = old_id * src_cols;
                    tgt_vals[dst..dst + tgt_cols].copy_from_slice(&src_vals[s..s + src_cols]);
                }
            }
            let remapped: Tensor<B, 2> = Tensor::from_data(
                TensorData::new(tgt_vals, [tgt_rows, tgt_cols]),
                &src.device(),
            );
            let remapped = if axis == 1 {
                remapped.swap_dims(0, 1)
            } else {
                remapped
            };
            Ok(WeightTensor::Matrix(remapped))
        }
        _ => unreachable!("rank equality checked above"),
    }
}

fn vector_data<B: Backend>(t: &Tensor<B, 1>) -> Result<Vec<f32>> {
    crate::ml::ops::float_vec(t.clone())
}

fn matrix_data<B: Backend>(t: &Tensor<B, 2>) -> Result<Vec<f32>> {
    crate::ml::ops::float_vec(t.clone())
}

/// Transfer every weight of `source` into `target`, remapping
/// vocabulary-indexed axes through the per-role correspondence maps.
///
/// When `optimizer` (the source model's) is given, its slots are
/// remapped the same way and written into `new_optimizer`; absent rows
/// keep the zeroed slot base.
pub fn transfer_store<B: AutodiffBackend>(
    source: &VariableStore<B>,
    target: &mut VariableStore<B>,
    maps: &HashMap<VocabRole, CorrespondenceMap>,
    optimizer: Option<&dyn SlotOptimizer<B>>,
    mut new_optimizer: Option<&mut dyn SlotOptimizer<B>>,
) -> Result<()> {
    for name in target.names() {
        let target_var = target.get(&name).cloned().ok_or_else(|| {
            FrameworkError::Configuration(format!("unknown weight '{name}'"))
        })?;
        let source_var = source.get(&name).ok_or_else(|| {
            FrameworkError::ShapeMismatch(format!(
                "source model has no weight named '{name}' — structures differ beyond vocabulary"
            ))
        })?;

        let transferred = match target_var.vocab_axis {
            Some(vocab_axis) => {
                let map = maps.get(&vocab_axis.role).ok_or_else(|| {
                    FrameworkError::Configuration(format!(
                        "no correspondence map for the {:?} vocabulary (weight '{name}')",
                        vocab_axis.role
                    ))
                })?;
                remap_rows(
                    &source_var.weight,
                    target_var.weight.clone().detach(),
                    map,
                    vocab_axis.axis,
                )?
            }
            None => {
                if source_var.weight.shape() != target_var.weight.shape() {
                    return Err(FrameworkError::ShapeMismatch(format!(
                        "weight '{name}' changed shape {:?} -> {:?} without a vocabulary axis",
                        source_var.weight.shape(),
                        target_var.weight.shape()
                    )));
                }
                source_var.weight.clone().detach()
            }
        };
        target.set_weight(&name, transferred.require_grad())?;
        tracing::debug!("Transferred weight '{}'", name);

        // Optimizer slots follow the weight through the same remap.
        if let (Some(old_opt), Some(new_opt)) = (optimizer, new_optimizer.as_deref_mut()) {
            if !target_var.trainable {
                continue;
            }
            for slot_name in old_opt.slot_names() {
                let Some(old_slot) = old_opt.slot(&name, &slot_name) else {
                    continue;
                };
                let base = new_opt
                    .slot(&name, &slot_name)
                    .unwrap_or_else(|| target_var.weight.clone().inner().zeros_like());
                let remapped = match target_var.vocab_axis {
                    Some(vocab_axis) => {
                        let map = &maps[&vocab_axis.role];
                        remap_rows(&old_slot, base, map, vocab_axis.axis)?
                    }
                    None => old_slot,
                };
                new_opt.set_slot(&name, &slot_name, remapped);
            }
        }
    }
    Ok(())
}
