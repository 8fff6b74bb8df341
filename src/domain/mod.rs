// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// The heart of the framework — pure Rust types with no tensor
// framework and no model code.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO model or training code
//   - Only the concepts every other layer talks about
//
// What lives here:
//   - Vocabulary + CorrespondenceMap (the input to the
//     transfer engine)
//   - Mode (TRAIN / EVAL / PREDICT)
//   - The error taxonomy
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

/// Token ↔ id mapping and new-vocab → old-vocab correspondence
pub mod vocabulary;

/// TRAIN / EVAL / PREDICT and what each requires
pub mod mode;

/// Configuration / Data / ShapeMismatch error taxonomy
pub mod error;
