// ============================================================
// Layer 5 — Variable Store
// ============================================================
// Every learnable weight of a model lives in a VariableStore,
// addressed by a structural path ("decoder/output_layer/kernel")
// instead of an opaque parameter id. That explicit naming is
// what the rest of the framework builds on:
//
//   - layer freezing marks weights by path prefix
//   - the optimizer keys its slots by weight name
//   - the transfer engine pairs source and target weights by
//     name and reads the vocabulary-axis metadata to know
//     which rows to remap
//
// Weights are rank-1 or rank-2 Burn tensors. A weight with a
// vocabulary axis records which vocabulary role (source-side
// or target-side) indexes that axis, and whether the axis sits
// at position 0 or 1 (transpose-aligned, e.g. an output kernel
// of shape [d_model, vocab]).
//
// Reference: Burn Book §2 (Tensors)

use std::collections::BTreeMap;

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Distribution;
use serde::{Deserialize, Serialize};

use crate::domain::error::{FrameworkError, Result};

// ─── Vocabulary-axis metadata ─────────────────────────────────────────────────

/// Which vocabulary indexes a weight axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VocabRole {
    /// The feature-side (encoder input) vocabulary.
    Source,
    /// The label-side vocabulary (decoder output, tags, classes).
    Target,
}

/// Marks one axis of a weight as vocabulary-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VocabAxis {
    pub role: VocabRole,
    /// 0 for embedding-like weights, 1 for transpose-aligned kernels.
    pub axis: usize,
}

// ─── Weight tensors ───────────────────────────────────────────────────────────

/// A learnable tensor. The framework only ever needs vectors (biases,
/// norm scales) and matrices (embeddings, kernels).
#[derive(Debug, Clone)]
pub enum WeightTensor<B: Backend> {
    Vector(Tensor<B, 1>),
    Matrix(Tensor<B, 2>),
}

impl<B: Backend> WeightTensor<B> {
    pub fn shape(&self) -> Vec<usize> {
        match self {
            WeightTensor::Vector(t) => t.dims().to_vec(),
            WeightTensor::Matrix(t) => t.dims().to_vec(),
        }
    }

    pub fn rank(&self) -> usize {
        match self {
            WeightTensor::Vector(_) => 1,
            WeightTensor::Matrix(_) => 2,
        }
    }

    pub fn device(&self) -> B::Device {
        match self {
            WeightTensor::Vector(t) => t.device(),
            WeightTensor::Matrix(t) => t.device(),
        }
    }

    pub fn to_data(&self) -> TensorData {
        match self {
            WeightTensor::Vector(t) => t.clone().into_data(),
            WeightTensor::Matrix(t) => t.clone().into_data(),
        }
    }

    /// Rebuild a weight from raw data; the data's rank decides the variant.
    pub fn from_data(data: TensorData, device: &B::Device) -> Result<Self> {
        match data.shape.len() {
            1 => Ok(WeightTensor::Vector(Tensor::from_data(data, device))),
            2 => Ok(WeightTensor::Matrix(Tensor::from_data(data, device))),
            r => Err(FrameworkError::ShapeMismatch(format!(
                "weights must be rank 1 or 2, got rank {r}"
            ))),
        }
    }

    pub fn zeros_like(&self) -> Self {
        match self {
            WeightTensor::Vector(t) => {
                WeightTensor::Vector(Tensor::zeros(t.dims(), &t.device()))
            }
            WeightTensor::Matrix(t) => {
                WeightTensor::Matrix(Tensor::zeros(t.dims(), &t.device()))
            }
        }
    }

    pub fn require_grad(self) -> Self {
        match self {
            WeightTensor::Vector(t) => WeightTensor::Vector(t.require_grad()),
            WeightTensor::Matrix(t) => WeightTensor::Matrix(t.require_grad()),
        }
    }

    pub fn detach(self) -> Self {
        match self {
            WeightTensor::Vector(t) => WeightTensor::Vector(t.detach()),
            WeightTensor::Matrix(t) => WeightTensor::Matrix(t.detach()),
        }
    }

    /// Flat f32 copy of the weight, row-major.
    pub fn to_flat_vec(&self) -> Result<Vec<f32>> {
        self.to_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| {
                FrameworkError::ShapeMismatch(format!("cannot read weight data: {e:?}"))
            })
    }

    // Elementwise arithmetic used by the optimizer. Rank mismatches are
    // reported as ShapeMismatch rather than silently broadcast.

    pub fn mul_scalar(self, s: f64) -> Self {
        match self {
            WeightTensor::Vector(t) => WeightTensor::Vector(t * s),
            WeightTensor::Matrix(t) => WeightTensor::Matrix(t * s),
        }
    }

    pub fn add_scalar(self, s: f64) -> Self {
        match self {
            WeightTensor::Vector(t) => WeightTensor::Vector(t + s),
            WeightTensor::Matrix(t) => WeightTensor::Matrix(t + s),
        }
    }

    pub fn sqrt(self) -> Self {
        match self {
            WeightTensor::Vector(t) => WeightTensor::Vector(t.sqrt()),
            WeightTensor::Matrix(t) => WeightTensor::Matrix(t.sqrt()),
        }
    }

    pub fn add(self, other: Self) -> Result<Self> {
        match (self, other) {
            (WeightTensor::Vector(a), WeightTensor::Vector(b)) => {
                Ok(WeightTensor::Vector(a + b))
            }
            (WeightTensor::Matrix(a), WeightTensor::Matrix(b)) => {
                Ok(WeightTensor::Matrix(a + b))
            }
            _ => Err(FrameworkError::ShapeMismatch(
                "rank mismatch in weight addition".to_string(),
            )),
        }
    }

    pub fn sub(self, other: Self) -> Result<Self> {
        match (self, other) {
            (WeightTensor::Vector(a), WeightTensor::Vector(b)) => {
                Ok(WeightTensor::Vector(a - b))
            }
            (WeightTensor::Matrix(a), WeightTensor::Matrix(b)) => {
                Ok(WeightTensor::Matrix(a - b))
            }
            _ => Err(FrameworkError::ShapeMismatch(
                "rank mismatch in weight subtraction".to_string(),
            )),
        }
    }

    pub fn mul(self, other: Self) -> Result<Self> {
        match (self, other) {
            (WeightTensor::Vector(a), WeightTensor::Vector(b)) => {
                Ok(WeightTensor::Vector(a * b))
            }
            (WeightTensor::Matrix(a), WeightTensor::Matrix(b)) => {
                Ok(WeightTensor::Matrix(a * b))
            }
            _ => Err(FrameworkError::ShapeMismatch(
                "rank mismatch in weight multiplication".to_string(),
            )),
        }
    }

    pub fn div(self, other: Self) -> Result<Self> {
        match (self, other) {
            (WeightTensor::Vector(a), WeightTensor::Vector(b)) => {
                Ok(WeightTensor::Vector(a / b))
            }
            (WeightTensor::Matrix(a), WeightTensor::Matrix(b)) => {
                Ok(WeightTensor::Matrix(a / b))
            }
            _ => Err(FrameworkError::ShapeMismatch(
                "rank mismatch in weight division".to_string(),
            )),
        }
    }
}

impl<B: AutodiffBackend> WeightTensor<B> {
    /// Fetch this weight's gradient from a backward pass, if it received one.
    pub fn grad(&self, grads: &B::Gradients) -> Option<WeightTensor<B::InnerBackend>> {
        match self {
            WeightTensor::Vector(t) => t.grad(grads).map(WeightTensor::Vector),
            WeightTensor::Matrix(t) => t.grad(grads).map(WeightTensor::Matrix),
        }
    }

    /// Drop the autodiff graph, keeping the values.
    pub fn inner(self) -> WeightTensor<B::InnerBackend> {
        match self {
            WeightTensor::Vector(t) => WeightTensor::Vector(t.inner()),
            WeightTensor::Matrix(t) => WeightTensor::Matrix(t.inner()),
        }
    }

    /// Lift plain values back onto the autodiff backend.
    pub fn from_inner(inner: WeightTensor<B::InnerBackend>) -> Self {
        match inner {
            WeightTensor::Vector(t) => WeightTensor::Vector(Tensor::from_inner(t)),
            WeightTensor::Matrix(t) => WeightTensor::Matrix(Tensor::from_inner(t)),
        }
    }
}

// ─── Weight specs ─────────────────────────────────────────────────────────────

/// Shape + initializer for a weight that does not exist yet.
#[derive(Debug, Clone)]
pub enum WeightShape {
    Vector(usize),
    Matrix(usize, usize),
}

/// How a fresh weight is filled before any training or transfer.
#[derive(Debug, Clone, Copy)]
pub enum WeightInit {
    /// Gaussian with the given standard deviation (kernels, embeddings).
    Normal(f64),
    /// All zeros (biases).
    Zeros,
    /// All ones (norm scales).
    Ones,
}

/// Declaration of one weight: components publish these so that
/// `create_variables` can materialize everything from shapes alone and
/// freeze paths can be validated before any tensor exists.
#[derive(Debug, Clone)]
pub struct WeightSpec {
    pub name: String,
    pub shape: WeightShape,
    pub init: WeightInit,
    pub vocab_axis: Option<VocabAxis>,
}

impl WeightSpec {
    pub fn matrix(name: impl Into<String>, rows: usize, cols: usize) -> Self {
        Self {
            name: name.into(),
            shape: WeightShape::Matrix(rows, cols),
            init: WeightInit::Normal(0.1),
            vocab_axis: None,
        }
    }

    pub fn vector(name: impl Into<String>, len: usize) -> Self {
        Self {
            name: name.into(),
            shape: WeightShape::Vector(len),
            init: WeightInit::Zeros,
            vocab_axis: None,
        }
    }

    pub fn with_init(mut self, init: WeightInit) -> Self {
        self.init = init;
        self
    }

    pub fn with_vocab_axis(mut self, role: VocabRole, axis: usize) -> Self {
        self.vocab_axis = Some(VocabAxis { role, axis });
        self
    }
}

// ─── Serialized form ──────────────────────────────────────────────────────────

/// On-disk / in-serving form of one weight: shape plus flat row-major values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightRecord {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

// ─── The store ────────────────────────────────────────────────────────────────

/// One weight plus its bookkeeping.
#[derive(Debug, Clone)]
pub struct Variable<B: Backend> {
    pub weight: WeightTensor<B>,
    pub vocab_axis: Option<VocabAxis>,
    pub trainable: bool,
}

/// All weights of one model, addressed by structural path.
/// BTreeMap keeps iteration order deterministic.
#[derive(Debug, Clone)]
pub struct VariableStore<B: Backend> {
    vars: BTreeMap<String, Variable<B>>,
}

impl<B: Backend> Default for VariableStore<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> VariableStore<B> {
    pub fn new() -> Self {
        Self {
            vars: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Materialize every declared weight. Purely shape-driven: no data has
    /// to flow through the model first.
    pub fn create(specs: &[WeightSpec], device: &B::Device) -> Result<Self> {
        let mut store = Self::new();
        for spec in specs {
            let weight = match (&spec.shape, spec.init) {
                (WeightShape::Matrix(r, c), WeightInit::Normal(std)) => WeightTensor::Matrix(
                    Tensor::random([*r, *c], Distribution::Normal(0.0, std), device),
                ),
                (WeightShape::Matrix(r, c), WeightInit::Zeros) => {
                    WeightTensor::Matrix(Tensor::zeros([*r, *c], device))
                }
                (WeightShape::Matrix(r, c), WeightInit::Ones) => {
                    WeightTensor::Matrix(Tensor::ones([*r, *c], device))
                }
                (WeightShape::Vector(n), WeightInit::Normal(std)) => WeightTensor::Vector(
                    Tensor::random([*n], Distribution::Normal(0.0, std), device),
                ),
                (WeightShape::Vector(n), WeightInit::Zeros) => {
                    WeightTensor::Vector(Tensor::zeros([*n], device))
                }
                (WeightShape::Vector(n), WeightInit::Ones) => {
                    WeightTensor::Vector(Tensor::ones([*n], device))
                }
            };
            if store
                .vars
                .insert(
                    spec.name.clone(),
                    Variable {
                        weight: weight.require_grad(),
                        vocab_axis: spec.vocab_axis,
                        trainable: true,
                    },
                )
                .is_some()
            {
                return Err(FrameworkError::Configuration(format!(
                    "duplicate weight name '{}'",
                    spec.name
                )));
            }
        }
        Ok(store)
    }

    pub fn get(&self, name: &str) -> Option<&Variable<B>> {
        self.vars.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.vars.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Variable<B>)> {
        self.vars.iter()
    }

    /// Clone the weight handle (cheap — Burn tensors are reference-counted).
    pub fn weight(&self, name: &str) -> Result<WeightTensor<B>> {
        self.vars
            .get(name)
            .map(|v| v.weight.clone())
            .ok_or_else(|| {
                FrameworkError::Configuration(format!("unknown weight '{name}'"))
            })
    }

    /// The weight as a rank-2 tensor, or ShapeMismatch.
    pub fn matrix(&self, name: &str) -> Result<Tensor<B, 2>> {
        match self.weight(name)? {
            WeightTensor::Matrix(t) => Ok(t),
            WeightTensor::Vector(_) => Err(FrameworkError::ShapeMismatch(format!(
                "weight '{name}' is rank 1, expected rank 2"
            ))),
        }
    }

    /// The weight as a rank-1 tensor, or ShapeMismatch.
    pub fn vector(&self, name: &str) -> Result<Tensor<B, 1>> {
        match self.weight(name)? {
            WeightTensor::Vector(t) => Ok(t),
            WeightTensor::Matrix(_) => Err(FrameworkError::ShapeMismatch(format!(
                "weight '{name}' is rank 2, expected rank 1"
            ))),
        }
    }

    /// Replace a weight's value in place. The shape must not change.
    pub fn set_weight(&mut self, name: &str, weight: WeightTensor<B>) -> Result<()> {
        let var = self.vars.get_mut(name).ok_or_else(|| {
            FrameworkError::Configuration(format!("unknown weight '{name}'"))
        })?;
        if var.weight.shape() != weight.shape() {
            return Err(FrameworkError::ShapeMismatch(format!(
                "cannot assign shape {:?} to weight '{name}' of shape {:?}",
                weight.shape(),
                var.weight.shape()
            )));
        }
        var.weight = weight;
        Ok(())
    }

    /// Names of all weights currently in the trainable set.
    pub fn trainable_names(&self) -> Vec<String> {
        self.vars
            .iter()
            .filter(|(_, v)| v.trainable)
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Mark every weight under the given path prefixes non-trainable.
    /// A prefix matching no weight is a Configuration error.
    pub fn freeze_prefixes(&mut self, prefixes: &[String]) -> Result<()> {
        for prefix in prefixes {
            let mut matched = false;
            for (name, var) in self.vars.iter_mut() {
                if name == prefix || name.starts_with(&format!("{prefix}/")) {
                    var.trainable = false;
                    matched = true;
                }
            }
            if !matched {
                return Err(FrameworkError::Configuration(format!(
                    "freeze path '{prefix}' does not name any model component"
                )));
            }
            tracing::debug!("Froze weights under '{}'", prefix);
        }
        Ok(())
    }

    /// Export every weight to its serialized form (checkpoints, serving).
    pub fn export(&self) -> Result<BTreeMap<String, WeightRecord>> {
        let mut records = BTreeMap::new();
        for (name, var) in &self.vars {
            records.insert(
                name.clone(),
                WeightRecord {
                    shape: var.weight.shape(),
                    values: var.weight.to_flat_vec()?,
                },
            );
        }
        Ok(records)
    }

    /// Load values into already-created weights. Every store weight must
    /// be present in the records with an identical shape.
    pub fn import(&mut self, records: &BTreeMap<String, WeightRecord>) -> Result<()> {
        for name in self.names() {
            let var = &self.vars[&name];
            let record = records.get(&name).ok_or_else(|| {
                FrameworkError::ShapeMismatch(format!(
                    "checkpoint has no weight named '{name}'"
                ))
            })?;
            if record.shape != var.weight.shape() {
                return Err(FrameworkError::ShapeMismatch(format!(
                    "weight '{name}': checkpoint shape {:?} != model shape {:?}",
                    record.shape,
                    var.weight.shape()
                )));
            }
            let device = var.weight.device();
            let data = TensorData::new(record.values.clone(), record.shape.clone());
            let weight = WeightTensor::from_data(data, &device)?.require_grad();
            self.set_weight(&name, weight)?;
        }
        Ok(())
    }
}
