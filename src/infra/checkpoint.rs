// ============================================================
// Layer 2 — Checkpointing
// ============================================================
// A checkpoint is a directory holding the model weights
// (weights.json: name → shape + flat values) and the training
// configuration that produced them (train_config.json), so a
// run can be rebuilt or transferred from the directory alone.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::domain::error::{FrameworkError, Result};
use crate::ml::vars::WeightRecord;

const WEIGHTS_FILE: &str = "weights.json";
const CONFIG_FILE: &str = "train_config.json";
const EXPORT_FILE: &str = "export.json";

pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn exists(&self) -> bool {
        self.dir.join(WEIGHTS_FILE).is_file()
    }

    pub fn save_weights(&self, weights: &BTreeMap<String, WeightRecord>) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            FrameworkError::Configuration(format!(
                "cannot create checkpoint directory '{}': {e}",
                self.dir.display()
            ))
        })?;
        let path = self.dir.join(WEIGHTS_FILE);
        let json = serde_json::to_string(weights).map_err(|e| {
            FrameworkError::Configuration(format!("cannot serialize weights: {e}"))
        })?;
        fs::write(&path, json).map_err(|e| {
            FrameworkError::Configuration(format!(
                "cannot write '{}': {e}",
                path.display()
            ))
        })?;
        tracing::info!("Saved {} weights to {}", weights.len(), path.display());
        Ok(())
    }

    pub fn load_weights(&self) -> Result<BTreeMap<String, WeightRecord>> {
        let path = self.dir.join(WEIGHTS_FILE);
        let json = fs::read_to_string(&path).map_err(|e| {
            FrameworkError::Configuration(format!(
                "cannot read checkpoint '{}': {e}",
                path.display()
            ))
        })?;
        serde_json::from_str(&json).map_err(|e| {
            FrameworkError::Data(format!("malformed checkpoint '{}': {e}", path.display()))
        })
    }

    pub fn save_config<C: Serialize>(&self, config: &C) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            FrameworkError::Configuration(format!(
                "cannot create checkpoint directory '{}': {e}",
                self.dir.display()
            ))
        })?;
        let path = self.dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(config).map_err(|e| {
            FrameworkError::Configuration(format!("cannot serialize config: {e}"))
        })?;
        fs::write(&path, json).map_err(|e| {
            FrameworkError::Configuration(format!(
                "cannot write '{}': {e}",
                path.display()
            ))
        })
    }

    /// Persist the self-contained serving artifact next to the weights.
    pub fn save_export(&self, export: &crate::ml::serving::ServingFunction) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            FrameworkError::Configuration(format!(
                "cannot create checkpoint directory '{}': {e}",
                self.dir.display()
            ))
        })?;
        let path = self.dir.join(EXPORT_FILE);
        let json = serde_json::to_string(export).map_err(|e| {
            FrameworkError::Configuration(format!("cannot serialize export: {e}"))
        })?;
        fs::write(&path, json).map_err(|e| {
            FrameworkError::Configuration(format!(
                "cannot write '{}': {e}",
                path.display()
            ))
        })?;
        tracing::info!("Exported serving artifact to {}", path.display());
        Ok(())
    }

    pub fn load_export(&self) -> Result<crate::ml::serving::ServingFunction> {
        let path = self.dir.join(EXPORT_FILE);
        let json = fs::read_to_string(&path).map_err(|e| {
            FrameworkError::Configuration(format!(
                "cannot read export '{}': {e}",
                path.display()
            ))
        })?;
        serde_json::from_str(&json).map_err(|e| {
            FrameworkError::Data(format!("malformed export '{}': {e}", path.display()))
        })
    }

    pub fn load_config<C: DeserializeOwned>(&self) -> Result<C> {
        let path = self.dir.join(CONFIG_FILE);
        let json = fs::read_to_string(&path).map_err(|e| {
            FrameworkError::Configuration(format!(
                "cannot read config '{}': {e}",
                path.display()
            ))
        })?;
        serde_json::from_str(&json).map_err(|e| {
            FrameworkError::Data(format!("malformed config '{}': {e}", path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path().join("ckpt"));
        assert!(!manager.exists());

        let mut weights = BTreeMap::new();
        weights.insert(
            "embedding".to_string(),
            WeightRecord {
                shape: vec![2, 3],
                values: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            },
        );
        manager.save_weights(&weights).unwrap();
        assert!(manager.exists());

        let loaded = manager.load_weights().unwrap();
        assert_eq!(loaded["embedding"].shape, vec![2, 3]);
        assert_eq!(loaded["embedding"].values, weights["embedding"].values);
    }

    #[test]
    fn test_missing_checkpoint_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path().join("nope"));
        let err = manager.load_weights().unwrap_err();
        assert!(matches!(err, FrameworkError::Configuration(_)));
    }
}
