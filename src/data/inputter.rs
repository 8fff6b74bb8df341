// ============================================================
// Layer 4 — Example Inputter
// ============================================================
// The dataset-construction facade each task variant hands out.
// It knows three things about its task:
//
//   requires_labels               TRAIN/EVAL need a label file
//   derives_labels_from_features  language modeling: the label
//                                 sequence is the feature
//                                 sequence, no label file wanted
//   supports_alignments           seq2seq can take a Pharaoh
//                                 alignment file for guided
//                                 attention
//
// and enforces the mode contract: training/evaluation datasets
// fail fast on missing or misaligned inputs, inference datasets
// never look at labels at all.

use std::path::Path;

use crate::data::alignment::read_alignments;
use crate::data::dataset::{BatchedDataset, Example, InferenceDataset};
use crate::data::loader::read_token_lines;
use crate::domain::error::{FrameworkError, Result};

#[derive(Debug, Clone, Copy)]
pub struct ExampleInputter {
    pub requires_labels: bool,
    pub derives_labels_from_features: bool,
    pub supports_alignments: bool,
}

impl ExampleInputter {
    /// Feature + label files side by side (seq2seq, tagging, classification).
    pub fn paired() -> Self {
        Self {
            requires_labels: true,
            derives_labels_from_features: false,
            supports_alignments: false,
        }
    }

    /// Paired, plus optional word alignments (seq2seq).
    pub fn paired_with_alignments() -> Self {
        Self {
            supports_alignments: true,
            ..Self::paired()
        }
    }

    /// Single-file: labels are the features shifted (language modeling).
    pub fn self_supervised() -> Self {
        Self {
            requires_labels: false,
            derives_labels_from_features: true,
            supports_alignments: false,
        }
    }

    pub fn make_training_dataset(
        &self,
        features: &Path,
        labels: Option<&Path>,
        alignments: Option<&Path>,
        batch_size: usize,
        seed: u64,
    ) -> Result<BatchedDataset> {
        let examples = self.load_labeled(features, labels, alignments)?;
        tracing::info!("Training dataset: {} examples", examples.len());
        Ok(BatchedDataset::new(examples, batch_size, true, seed))
    }

    pub fn make_evaluation_dataset(
        &self,
        features: &Path,
        labels: Option<&Path>,
        batch_size: usize,
    ) -> Result<BatchedDataset> {
        let examples = self.load_labeled(features, labels, None)?;
        Ok(BatchedDataset::new(examples, batch_size, false, 0))
    }

    /// PREDICT: features only. Label inputs are not even accepted here.
    pub fn make_inference_dataset(
        &self,
        features: &Path,
        batch_size: usize,
    ) -> Result<InferenceDataset> {
        InferenceDataset::open(features, batch_size)
    }

    fn load_labeled(
        &self,
        features: &Path,
        labels: Option<&Path>,
        alignments: Option<&Path>,
    ) -> Result<Vec<Example>> {
        let feature_lines = read_token_lines(features)?;

        let label_lines = if self.derives_labels_from_features {
            if labels.is_some() {
                return Err(FrameworkError::Data(
                    "this task derives labels from features; a label file is not accepted"
                        .to_string(),
                ));
            }
            None
        } else {
            let path = labels.ok_or_else(|| {
                FrameworkError::Data(
                    "training and evaluation require a label file for this task".to_string(),
                )
            })?;
            let lines = read_token_lines(path)?;
            if lines.len() != feature_lines.len() {
                return Err(FrameworkError::Data(format!(
                    "feature/label line counts differ: {} vs {}",
                    feature_lines.len(),
                    lines.len()
                )));
            }
            Some(lines)
        };

        let alignment_lines = match alignments {
            Some(path) if self.supports_alignments => {
                let parsed = read_alignments(path)?;
                if parsed.len() != feature_lines.len() {
                    return Err(FrameworkError::Data(format!(
                        "feature/alignment line counts differ: {} vs {}",
                        feature_lines.len(),
                        parsed.len()
                    )));
                }
                Some(parsed)
            }
            Some(_) => {
                return Err(FrameworkError::Data(
                    "this task does not support alignment files".to_string(),
                ))
            }
            None => None,
        };

        Ok(feature_lines
            .into_iter()
            .enumerate()
            .map(|(i, source)| Example {
                source,
                target: label_lines.as_ref().map(|l| l[i].clone()),
                alignment: alignment_lines.as_ref().map(|a| a[i].clone()),
            })
            .collect())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_paired_training_requires_labels() {
        let dir = tempfile::tempdir().unwrap();
        let features = write(&dir, "src.txt", "a b\nc d\n");
        let err = ExampleInputter::paired()
            .make_training_dataset(&features, None, None, 2, 0)
            .unwrap_err();
        assert!(matches!(err, FrameworkError::Data(_)));
    }

    #[test]
    fn test_evaluation_without_labels_is_data_error() {
        let dir = tempfile::tempdir().unwrap();
        let features = write(&dir, "src.txt", "a b\n");
        let err = ExampleInputter::paired()
            .make_evaluation_dataset(&features, None, 2)
            .unwrap_err();
        assert!(matches!(err, FrameworkError::Data(_)));
    }

    #[test]
    fn test_line_count_mismatch_is_data_error() {
        let dir = tempfile::tempdir().unwrap();
        let features = write(&dir, "src.txt", "a b\nc d\n");
        let labels = write(&dir, "tgt.txt", "x\n");
        let err = ExampleInputter::paired()
            .make_training_dataset(&features, Some(&labels), None, 2, 0)
            .unwrap_err();
        assert!(matches!(err, FrameworkError::Data(_)));
    }

    #[test]
    fn test_self_supervised_rejects_label_file() {
        let dir = tempfile::tempdir().unwrap();
        let features = write(&dir, "mono.txt", "a b c\n");
        let labels = write(&dir, "tgt.txt", "x\n");
        let inputter = ExampleInputter::self_supervised();

        let err = inputter
            .make_training_dataset(&features, Some(&labels), None, 1, 0)
            .unwrap_err();
        assert!(matches!(err, FrameworkError::Data(_)));

        // and trains happily without one
        let ds = inputter
            .make_training_dataset(&features, None, None, 1, 0)
            .unwrap();
        assert_eq!(ds.len(), 1);
    }

    #[test]
    fn test_alignments_attach_to_examples() {
        let dir = tempfile::tempdir().unwrap();
        let features = write(&dir, "src.txt", "a b\nc d\n");
        let labels = write(&dir, "tgt.txt", "x y\nz w\n");
        let aligns = write(&dir, "align.txt", "0-0 1-1\n0-1\n");
        let ds = ExampleInputter::paired_with_alignments()
            .make_training_dataset(&features, Some(&labels), Some(&aligns), 2, 0)
            .unwrap();
        let batch: Vec<Example> = ds.epoch(0).next().unwrap();
        let with_align = batch.iter().filter(|e| e.alignment.is_some()).count();
        assert_eq!(with_align, 2);
    }

    #[test]
    fn test_inference_never_needs_labels() {
        let dir = tempfile::tempdir().unwrap();
        let features = write(&dir, "src.txt", "a b\nc d\n");
        let ds = ExampleInputter::paired()
            .make_inference_dataset(&features, 8)
            .unwrap();
        let batches: Vec<_> = ds.map(|b| b.unwrap()).collect();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }
}
