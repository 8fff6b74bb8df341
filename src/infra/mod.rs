// ============================================================
// Layer 2 — Infrastructure Layer
// ============================================================
// Disk-facing concerns: checkpoints and metrics. No model code,
// no tensor math beyond reading exported weight records.

/// Streaming evaluation metrics + CSV training history
pub mod metrics;

/// Weight + config persistence per run directory
pub mod checkpoint;
