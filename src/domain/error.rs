// ============================================================
// Layer 3 — Error Taxonomy
// ============================================================
// Three error classes cover every failure the framework can
// produce:
//
//   Configuration — bad initialization input (unresolvable
//                   vocabulary path, freeze path naming no
//                   component, invalid alignment-loss type).
//                   Fatal to initialization, never retried.
//
//   Data          — malformed input files or a dataset request
//                   that is impossible for the mode (EVAL
//                   without labels). Fatal to the call.
//
//   ShapeMismatch — a weight does not have the shape or the
//                   vocabulary axis the transfer engine
//                   expects, i.e. the architecture changed and
//                   not just the vocabulary. Transfer aborts;
//                   weights already processed stay mutated.
//
// All errors propagate to the caller. Retry/resume policy
// belongs to whoever drives the training loop, not here.
//
// Reference: Rust Book §9 (Error Handling)

use thiserror::Error;

/// Result alias used throughout the domain, data, and ml layers.
/// The application layer converts into `anyhow::Result` at its boundary.
pub type Result<T> = std::result::Result<T, FrameworkError>;

#[derive(Debug, Error)]
pub enum FrameworkError {
    /// Missing or invalid initialization parameters.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed input files or missing required dataset inputs for a mode.
    #[error("data error: {0}")]
    Data(String),

    /// A weight's shape or vocabulary axis does not match what the
    /// transfer engine or checkpoint loader expects.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
}

impl FrameworkError {
    /// Shorthand for the common "required config key is absent" case.
    pub fn missing_config(what: &str) -> Self {
        FrameworkError::Configuration(format!("missing required configuration: {what}"))
    }
}
