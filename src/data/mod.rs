// ============================================================
// Layer 4 — Data Layer
// ============================================================
// Everything between text files on disk and padded tensors on
// the device. Modes draw a hard line through this layer:
// TRAIN/EVAL use materialized, restartable BatchedDatasets
// (TRAIN shuffled per epoch, EVAL in file order), PREDICT
// streams a lazy InferenceDataset that never sees labels.

/// Line reading and whitespace tokenization
pub mod loader;

/// Pharaoh-format word alignments for guided attention
pub mod alignment;

/// BatchedDataset (TRAIN/EVAL) and InferenceDataset (PREDICT)
pub mod dataset;

/// Per-task dataset construction facade
pub mod inputter;

/// Examples → padded id/mask tensors
pub mod batcher;
