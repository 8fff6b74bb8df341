// ============================================================
// Layer 5 — ML Layer
// ============================================================
// Everything tensor-shaped: the named variable store, the model
// contract and its four task variants, the optimizers, the
// vocabulary-transfer engine, the training loop, and serving.
//
// The organizing idea is name-addressable weights: every
// learnable tensor lives in a VariableStore under a structural
// path, which is what lets freezing, checkpointing, optimizer
// slots, and vocabulary transfer all speak the same language.
//
// Reference: Burn Book §2 (Tensors), §5 (Autodiff)

/// Named weights with vocabulary-axis metadata
pub mod vars;

/// Shared tensor primitives (attention, norms, masked CE)
pub mod ops;

/// SGD + Adam with enumerable, remappable slots
pub mod optim;

/// Weight + slot remapping across vocabulary changes
pub mod transfer;

/// Self-attention encoder block
pub mod encoder;

/// Causal decoder with optional cross-attention + greedy search
pub mod decoder;

/// The SequenceModel contract and TaskModel dispatch
pub mod model;

/// Encoder–decoder translation-style task
pub mod seq2seq;

/// Decoder-only language modeling
pub mod language_model;

/// Per-token tagging
pub mod tagger;

/// Whole-sequence classification
pub mod classifier;

/// Self-contained inference artifacts
pub mod serving;

/// The epoch loop: train, evaluate, log, checkpoint
pub mod trainer;
