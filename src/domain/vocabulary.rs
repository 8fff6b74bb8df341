// ============================================================
// Layer 3 — Vocabulary and Correspondence
// ============================================================
// A vocabulary is an ordered sequence of unique tokens where
// each token's id is its position: dense, 0-based, contiguous.
//
// Text vocabularies get three reserved tokens prepended
// (<blank> for padding, <s>, </s>) and <unk> appended last.
// Tag/class label vocabularies are loaded verbatim — no
// specials, no unknown token.
//
// The CorrespondenceMap is what makes vocabulary transfer
// possible: for each id in the NEW vocabulary it records the
// same token's id in the OLD vocabulary, or "absent" for brand
// new tokens. Built in O(|new| + |old|) through the old
// vocabulary's hash index — never by scanning.
//
// Reference: Rust Book §8 (HashMaps)

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::domain::error::{FrameworkError, Result};

/// Padding token, always id 0 in a specials-carrying vocabulary.
pub const PAD_TOKEN: &str = "<blank>";
/// Start-of-sequence token, id 1.
pub const BOS_TOKEN: &str = "<s>";
/// End-of-sequence token, id 2.
pub const EOS_TOKEN: &str = "</s>";
/// Unknown token, appended as the LAST id so that user token ids
/// stay stable when the vocabulary file grows.
pub const UNK_TOKEN: &str = "<unk>";

/// An ordered token list with a hash index for O(1) lookup.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    tokens: Vec<String>,
    index: HashMap<String, usize>,
}

impl Vocabulary {
    /// Build a vocabulary from an ordered token list.
    /// Duplicate tokens are a `Data` error — ids would be ambiguous.
    pub fn new(tokens: Vec<String>) -> Result<Self> {
        if tokens.is_empty() {
            return Err(FrameworkError::Data("vocabulary is empty".to_string()));
        }
        let mut index = HashMap::with_capacity(tokens.len());
        for (id, token) in tokens.iter().enumerate() {
            if index.insert(token.clone(), id).is_some() {
                return Err(FrameworkError::Data(format!(
                    "duplicate vocabulary token '{token}' at id {id}"
                )));
            }
        }
        Ok(Self { tokens, index })
    }

    /// Load a newline-delimited vocabulary file: line i (0-based) is the
    /// token with id i.
    ///
    /// With `with_specials`, the reserved tokens are added around the file
    /// content: [<blank>, <s>, </s>] + lines + [<unk>]. Label vocabularies
    /// (tags, classes) pass `false` and are used exactly as written.
    pub fn load(path: &Path, with_specials: bool) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            FrameworkError::Configuration(format!(
                "cannot read vocabulary file '{}': {e}",
                path.display()
            ))
        })?;

        let mut tokens: Vec<String> = Vec::new();
        if with_specials {
            tokens.push(PAD_TOKEN.to_string());
            tokens.push(BOS_TOKEN.to_string());
            tokens.push(EOS_TOKEN.to_string());
        }
        for line in content.lines() {
            let token = line.trim_end_matches(['\r', '\n']);
            if token.is_empty() {
                return Err(FrameworkError::Data(format!(
                    "empty line in vocabulary file '{}'",
                    path.display()
                )));
            }
            tokens.push(token.to_string());
        }
        if with_specials {
            tokens.push(UNK_TOKEN.to_string());
        }

        Self::new(tokens)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// The token with the given id, if in range.
    pub fn token(&self, id: usize) -> Option<&str> {
        self.tokens.get(id).map(|s| s.as_str())
    }

    /// Exact id lookup — `None` for out-of-vocabulary tokens.
    pub fn id(&self, token: &str) -> Option<usize> {
        self.index.get(token).copied()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.index.contains_key(token)
    }

    /// Id lookup that falls back to `<unk>` when the vocabulary carries one.
    pub fn lookup(&self, token: &str) -> Option<usize> {
        self.id(token).or_else(|| self.unk_id())
    }

    pub fn pad_id(&self) -> Option<usize> {
        self.id(PAD_TOKEN)
    }

    pub fn bos_id(&self) -> Option<usize> {
        self.id(BOS_TOKEN)
    }

    pub fn eos_id(&self) -> Option<usize> {
        self.id(EOS_TOKEN)
    }

    pub fn unk_id(&self) -> Option<usize> {
        self.id(UNK_TOKEN)
    }

    /// Compute the correspondence from an OLD vocabulary to this (NEW)
    /// vocabulary: entry i holds the old id of new token i, or `None`
    /// when the token did not exist before.
    ///
    /// O(|new|) lookups against the old hash index.
    pub fn correspondence_from(&self, old: &Vocabulary) -> CorrespondenceMap {
        CorrespondenceMap::new(self.tokens.iter().map(|t| old.id(t)).collect())
    }
}

/// new-id → old-id mapping between two vocabularies.
/// `None` marks a token absent from the old vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrespondenceMap(Vec<Option<usize>>);

impl CorrespondenceMap {
    pub fn new(entries: Vec<Option<usize>>) -> Self {
        Self(entries)
    }

    /// Number of entries = size of the new vocabulary.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Old id for new id `i`, or `None` when absent (either the token is
    /// new, or `i` is out of range).
    pub fn get(&self, i: usize) -> Option<usize> {
        self.0.get(i).copied().flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<usize>> + '_ {
        self.0.iter().copied()
    }

    /// True when every new id maps to itself — transfer degenerates to a
    /// full copy in that case.
    pub fn is_identity(&self) -> bool {
        self.0.iter().enumerate().all(|(i, m)| *m == Some(i))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vocab(tokens: &[&str]) -> Vocabulary {
        Vocabulary::new(tokens.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    #[test]
    fn test_dense_ids() {
        let v = vocab(&["a", "b", "c"]);
        assert_eq!(v.id("a"), Some(0));
        assert_eq!(v.id("c"), Some(2));
        assert_eq!(v.token(1), Some("b"));
        assert_eq!(v.id("z"), None);
    }

    #[test]
    fn test_duplicate_token_is_data_error() {
        let err = Vocabulary::new(vec!["a".into(), "a".into()]).unwrap_err();
        assert!(matches!(err, FrameworkError::Data(_)));
    }

    #[test]
    fn test_correspondence() {
        // old = [a b c d e], new = [c a e f]
        // expected: {0→2, 1→0, 2→4, 3→absent}
        let old = vocab(&["a", "b", "c", "d", "e"]);
        let new = vocab(&["c", "a", "e", "f"]);
        let map = new.correspondence_from(&old);
        assert_eq!(map.len(), 4);
        assert_eq!(map.get(0), Some(2));
        assert_eq!(map.get(1), Some(0));
        assert_eq!(map.get(2), Some(4));
        assert_eq!(map.get(3), None);
        assert!(!map.is_identity());
    }

    #[test]
    fn test_identity_correspondence() {
        let v = vocab(&["x", "y", "z"]);
        assert!(v.correspondence_from(&v).is_identity());
    }

    #[test]
    fn test_load_with_specials() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "hello").unwrap();
        writeln!(f, "world").unwrap();
        drop(f);

        let v = Vocabulary::load(&path, true).unwrap();
        assert_eq!(v.pad_id(), Some(0));
        assert_eq!(v.bos_id(), Some(1));
        assert_eq!(v.eos_id(), Some(2));
        assert_eq!(v.id("hello"), Some(3));
        assert_eq!(v.id("world"), Some(4));
        // <unk> is always the last id
        assert_eq!(v.unk_id(), Some(v.len() - 1));
        assert_eq!(v.lookup("never-seen"), v.unk_id());
    }

    #[test]
    fn test_load_without_specials() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tags.txt");
        std::fs::write(&path, "O\nB-LOC\nI-LOC\n").unwrap();

        let v = Vocabulary::load(&path, false).unwrap();
        assert_eq!(v.len(), 3);
        assert_eq!(v.id("O"), Some(0));
        assert_eq!(v.unk_id(), None);
        assert_eq!(v.lookup("B-PER"), None);
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let err = Vocabulary::load(Path::new("/no/such/vocab.txt"), true).unwrap_err();
        assert!(matches!(err, FrameworkError::Configuration(_)));
    }
}
