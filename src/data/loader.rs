// ============================================================
// Layer 4 — Text File Loading
// ============================================================
// Plain-text corpora: one example per line, tokens separated by
// whitespace. Tokenization itself happens upstream; this layer
// only splits what it is given.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::domain::error::{FrameworkError, Result};

/// Split a line on whitespace into owned tokens.
pub fn tokenize(line: &str) -> Vec<String> {
    line.split_whitespace().map(|t| t.to_string()).collect()
}

/// Read a whole file as per-line token sequences.
pub fn read_token_lines(path: &Path) -> Result<Vec<Vec<String>>> {
    let file = File::open(path).map_err(|e| {
        FrameworkError::Data(format!("cannot open '{}': {e}", path.display()))
    })?;
    let mut lines = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| {
            FrameworkError::Data(format!(
                "read error in '{}' at line {}: {e}",
                path.display(),
                i + 1
            ))
        })?;
        lines.push(tokenize(&line));
    }
    tracing::debug!("Loaded {} lines from {}", lines.len(), path.display());
    Ok(lines)
}

/// A lazily-read line source for inference: one buffered pass, no
/// shuffling, no materialization of the whole file.
pub struct LineSource {
    reader: BufReader<File>,
    path: String,
    line_no: usize,
}

impl LineSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            FrameworkError::Data(format!("cannot open '{}': {e}", path.display()))
        })?;
        Ok(Self {
            reader: BufReader::new(file),
            path: path.display().to_string(),
            line_no: 0,
        })
    }
}

impl Iterator for LineSource {
    type Item = Result<Vec<String>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => {
                self.line_no += 1;
                Some(Ok(tokenize(&line)))
            }
            Err(e) => Some(Err(FrameworkError::Data(format!(
                "read error in '{}' at line {}: {e}",
                self.path,
                self.line_no + 1
            )))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_collapses_whitespace() {
        assert_eq!(tokenize("  a  b\tc "), vec!["a", "b", "c"]);
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn test_read_token_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.txt");
        std::fs::write(&path, "hello world\nsecond line here\n").unwrap();
        let lines = read_token_lines(&path).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], vec!["second", "line", "here"]);
    }

    #[test]
    fn test_missing_file_is_data_error() {
        let err = read_token_lines(Path::new("/no/such/file.txt")).unwrap_err();
        assert!(matches!(err, FrameworkError::Data(_)));
    }
}
