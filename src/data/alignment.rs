// ============================================================
// Layer 4 — Word Alignment Files
// ============================================================
// Pharaoh-format alignments: one line per example, each entry
// "i-j" linking source position i to target position j. Used by
// the guided-alignment loss to supervise the decoder's attention.

use std::path::Path;

use crate::domain::error::{FrameworkError, Result};

/// Source-position → target-position links for one example.
pub type AlignmentPairs = Vec<(usize, usize)>;

/// Parse one alignment line ("0-0 1-2 3-1").
pub fn parse_alignment_line(line: &str, line_no: usize) -> Result<AlignmentPairs> {
    let mut pairs = Vec::new();
    for entry in line.split_whitespace() {
        let (src, tgt) = entry.split_once('-').ok_or_else(|| {
            FrameworkError::Data(format!(
                "malformed alignment entry '{entry}' at line {line_no}"
            ))
        })?;
        let src = src.parse::<usize>().map_err(|_| {
            FrameworkError::Data(format!(
                "malformed alignment entry '{entry}' at line {line_no}"
            ))
        })?;
        let tgt = tgt.parse::<usize>().map_err(|_| {
            FrameworkError::Data(format!(
                "malformed alignment entry '{entry}' at line {line_no}"
            ))
        })?;
        pairs.push((src, tgt));
    }
    Ok(pairs)
}

/// Read a whole alignment file, one `AlignmentPairs` per example.
pub fn read_alignments(path: &Path) -> Result<Vec<AlignmentPairs>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        FrameworkError::Data(format!("cannot open '{}': {e}", path.display()))
    })?;
    content
        .lines()
        .enumerate()
        .map(|(i, line)| parse_alignment_line(line, i + 1))
        .collect()
}
