// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates all the other layers to accomplish
// one goal: training a task model, predicting with a trained
// one, or transferring a run onto new vocabularies.
//
// Rules for this layer:
//   - No ML math or model code here
//   - No UI or printing here (that's Layer 1)
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// The training workflow
pub mod train_use_case;

// The inference workflow
pub mod predict_use_case;

// The vocabulary-transfer workflow
pub mod transfer_use_case;

/// The backend every use case runs on: CPU tensors with autodiff.
pub type TrainingBackend = burn::backend::Autodiff<burn::backend::NdArray>;
