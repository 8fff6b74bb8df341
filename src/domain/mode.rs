// ============================================================
// Layer 3 — Run Mode
// ============================================================
// One mode per pipeline: TRAIN and EVAL consume (features,
// labels) pairs, PREDICT consumes features alone. The mode
// decides which dataset constructor is legal and which model
// outputs are produced.

/// The three ways a model can be run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Shuffled batches, loss computed, gradients flow.
    Train,

    /// Deterministic batches, loss + metrics, no gradients.
    Eval,

    /// Features only — labels must never be required.
    Predict,
}

impl Mode {
    /// TRAIN and EVAL always need labels; PREDICT never does.
    pub fn requires_labels(self) -> bool {
        !matches!(self, Mode::Predict)
    }

    /// Predictions are populated in every non-TRAIN mode.
    pub fn produces_predictions(self) -> bool {
        !matches!(self, Mode::Train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_requirements() {
        assert!(Mode::Train.requires_labels());
        assert!(Mode::Eval.requires_labels());
        assert!(!Mode::Predict.requires_labels());
    }
}
