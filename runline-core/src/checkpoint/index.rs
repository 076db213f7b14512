//! Checkpoint index: directory scans and the `checkpoints.json` manifest.
//!
//! File names stay authoritative so run directories written before the
//! manifest existed still resume and branch. The manifest adds what names
//! cannot carry (metric, content hash, save time) for offline tooling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::naming::{self, CheckpointFile};
use crate::error::{Result, missing_or_io};
use crate::persistence;

/// Epochs present in a run directory according to the file-name rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointScan {
    pub epochs: BTreeSet<u64>,
}

impl CheckpointScan {
    /// Scan `dir`, collecting the epoch prefix of every entry that has one.
    pub fn scan(dir: &Path) -> Result<Self> {
        let mut epochs = BTreeSet::new();
        for entry in std::fs::read_dir(dir).map_err(|e| missing_or_io(e, dir))? {
            let entry = entry?;
            if let Some(epoch) = naming::entry_epoch(&entry.file_name().to_string_lossy()) {
                epochs.insert(epoch);
            }
        }
        Ok(Self { epochs })
    }

    pub fn latest(&self) -> Option<u64> {
        self.epochs.last().copied()
    }
}

/// Every file in `dir` belonging to `epoch`, sorted by name.
pub fn files_for_epoch(dir: &Path, epoch: u64) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| missing_or_io(e, dir))? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if naming::entry_epoch(&entry.file_name().to_string_lossy()) == Some(epoch) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// One saved epoch as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub model: String,
    pub state: String,
    pub test_top1: f64,
    pub model_sha256: String,
    pub saved_at: DateTime<Utc>,
}

/// Contents of `checkpoints.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub entries: BTreeMap<u64, ManifestEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_epoch: Option<u64>,
}

impl CheckpointManifest {
    pub fn path(dir: &Path) -> PathBuf {
        dir.join(naming::MANIFEST_FILE)
    }

    /// Load the manifest of `dir`, or an empty one for legacy directories.
    pub fn load(dir: &Path) -> Result<Self> {
        Ok(persistence::load_json_opt(&Self::path(dir))?.unwrap_or_default())
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        persistence::atomic_write_json(&Self::path(dir), self)
    }

    pub fn record(&mut self, epoch: u64, test_top1: f64, model: &[u8], is_best: bool) {
        self.entries.insert(
            epoch,
            ManifestEntry {
                model: CheckpointFile::model(epoch).file_name(),
                state: CheckpointFile::state(epoch).file_name(),
                test_top1,
                model_sha256: sha256_hex(model),
                saved_at: Utc::now(),
            },
        );
        if is_best {
            self.best_epoch = Some(epoch);
        }
    }

    pub fn latest(&self) -> Option<u64> {
        self.entries.keys().next_back().copied()
    }
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn test_scan_ignores_non_numeric_entries() {
        let dir = TempDir::new().unwrap();
        for name in [
            "3-model.bin",
            "3-state.json",
            "5-model.bin",
            "7-state.json",
            "best-model.bin",
            "log.csv",
            "run.toml",
        ] {
            touch(dir.path(), name);
        }

        let scan = CheckpointScan::scan(dir.path()).unwrap();
        assert_eq!(scan.epochs, BTreeSet::from([3, 5, 7]));
        assert_eq!(scan.latest(), Some(7));
    }

    #[test]
    fn test_scan_is_numeric_not_lexicographic() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "9-model.bin");
        touch(dir.path(), "10-model.bin");
        assert_eq!(CheckpointScan::scan(dir.path()).unwrap().latest(), Some(10));
    }

    #[test]
    fn test_files_for_epoch_exact_match() {
        let dir = TempDir::new().unwrap();
        for name in ["1-model.bin", "1-state.json", "10-model.bin", "11-state.json"] {
            touch(dir.path(), name);
        }
        let names: Vec<String> = files_for_epoch(dir.path(), 1)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["1-model.bin", "1-state.json"]);
    }

    #[test]
    fn test_interrupted_write_is_not_an_epoch() {
        let dir = TempDir::new().unwrap();
        for name in ["2-model.bin", "2-state.json", "3-model.bin.tmp", ".3-state.json.tmp"] {
            touch(dir.path(), name);
        }
        assert_eq!(CheckpointScan::scan(dir.path()).unwrap().latest(), Some(2));
        assert!(files_for_epoch(dir.path(), 3).unwrap().is_empty());
    }

    #[test]
    fn test_manifest_roundtrip_and_best() {
        let dir = TempDir::new().unwrap();
        let mut manifest = CheckpointManifest::load(dir.path()).unwrap();
        assert!(manifest.entries.is_empty());

        manifest.record(0, 0.4, b"weights-0", true);
        manifest.record(1, 0.3, b"weights-1", false);
        manifest.save(dir.path()).unwrap();

        let loaded = CheckpointManifest::load(dir.path()).unwrap();
        assert_eq!(loaded.best_epoch, Some(0));
        assert_eq!(loaded.latest(), Some(1));
        assert_eq!(loaded.entries[&1].model, "1-model.bin");
        assert_eq!(loaded.entries[&0].model_sha256, sha256_hex(b"weights-0"));
    }
}
