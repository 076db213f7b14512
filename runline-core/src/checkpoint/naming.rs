//! File and directory naming inside a lineage.
//!
//! Checkpoints are `<epoch>-model.bin` / `<epoch>-state.json`, with a single
//! overwritten `best-*` pair. Forks live in `<forkEpoch>-<forkIndex>/orig`.
//! The epoch of any entry is the leading decimal integer up to the first
//! `-`; entries without one are not checkpoints.

use std::fmt;

/// Leaf directory holding the artifacts of one lineage node.
pub const RUN_LEAF: &str = "orig";
/// Progress log file name.
pub const LOG_FILE: &str = "log.csv";
/// Checkpoint manifest file name.
pub const MANIFEST_FILE: &str = "checkpoints.json";

pub const MODEL_EXT: &str = "bin";
pub const STATE_EXT: &str = "json";

const BEST: &str = "best";
const TMP_SUFFIX: &str = ".tmp";

/// Which blob of a checkpoint pair a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobKind {
    Model,
    State,
}

impl BlobKind {
    fn stem(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::State => "state",
        }
    }

    fn ext(self) -> &'static str {
        match self {
            Self::Model => MODEL_EXT,
            Self::State => STATE_EXT,
        }
    }
}

/// Per-epoch pair or the overwritten best pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Epoch(u64),
    Best,
}

/// A parsed checkpoint file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CheckpointFile {
    pub slot: Slot,
    pub kind: BlobKind,
}

impl CheckpointFile {
    pub fn model(epoch: u64) -> Self {
        Self {
            slot: Slot::Epoch(epoch),
            kind: BlobKind::Model,
        }
    }

    pub fn state(epoch: u64) -> Self {
        Self {
            slot: Slot::Epoch(epoch),
            kind: BlobKind::State,
        }
    }

    pub fn best(kind: BlobKind) -> Self {
        Self {
            slot: Slot::Best,
            kind,
        }
    }

    /// Parse a full checkpoint file name such as `12-model.bin`.
    ///
    /// Accepts any extension, so a model saved in another format (say
    /// `12-model.pt`) still yields its epoch. Only the `<slot>-<kind>`
    /// shape is required; the state half is always `<epoch>-state.json`.
    pub fn parse(name: &str) -> Option<Self> {
        let (slot, rest) = name.split_once('-')?;
        let slot = if slot == BEST {
            Slot::Best
        } else {
            Slot::Epoch(parse_epoch_digits(slot)?)
        };
        let stem = rest.split('.').next()?;
        let kind = match stem {
            "model" => BlobKind::Model,
            "state" => BlobKind::State,
            _ => return None,
        };
        Some(Self { slot, kind })
    }

    pub fn epoch(&self) -> Option<u64> {
        match self.slot {
            Slot::Epoch(e) => Some(e),
            Slot::Best => None,
        }
    }

    /// The other half of the same checkpoint pair.
    pub fn sibling(&self, kind: BlobKind) -> Self {
        Self {
            slot: self.slot,
            kind,
        }
    }

    pub fn file_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CheckpointFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot {
            Slot::Epoch(e) => write!(f, "{e}-{}.{}", self.kind.stem(), self.kind.ext()),
            Slot::Best => write!(f, "{BEST}-{}.{}", self.kind.stem(), self.kind.ext()),
        }
    }
}

/// Epoch of any directory entry: leading integer up to the first `-`.
///
/// This is the legacy rule used to find the latest epoch of a run and the
/// files belonging to a fork epoch; it deliberately ignores what follows.
///
/// `*.tmp` leftovers of an interrupted write never count.
pub fn entry_epoch(name: &str) -> Option<u64> {
    if name.ends_with(TMP_SUFFIX) {
        return None;
    }
    let (prefix, _) = name.split_once('-')?;
    parse_epoch_digits(prefix)
}

fn parse_epoch_digits(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// A fork directory name, `<epoch>-<index>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct ForkName {
    pub epoch: u64,
    pub index: u32,
}

impl ForkName {
    pub fn parse(name: &str) -> Option<Self> {
        let (epoch, index) = name.split_once('-')?;
        let epoch = parse_epoch_digits(epoch)?;
        if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            epoch,
            index: index.parse().ok()?,
        })
    }
}

impl fmt::Display for ForkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.epoch, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_file_names() {
        assert_eq!(CheckpointFile::model(7).file_name(), "7-model.bin");
        assert_eq!(CheckpointFile::state(0).file_name(), "0-state.json");
        assert_eq!(
            CheckpointFile::best(BlobKind::State).file_name(),
            "best-state.json"
        );
    }

    #[test]
    fn test_parse_checkpoint_file() {
        assert_eq!(
            CheckpointFile::parse("12-model.bin"),
            Some(CheckpointFile::model(12))
        );
        assert_eq!(
            CheckpointFile::parse("12-state.pth.tar"),
            Some(CheckpointFile::state(12))
        );
        assert_eq!(
            CheckpointFile::parse("best-model.bin"),
            Some(CheckpointFile::best(BlobKind::Model))
        );
        assert_eq!(CheckpointFile::parse("log.csv"), None);
        assert_eq!(CheckpointFile::parse("12-optimizer.bin"), None);
        assert_eq!(CheckpointFile::parse("-model.bin"), None);
    }

    #[test]
    fn test_sibling_swaps_kind_and_extension() {
        let model = CheckpointFile::model(5);
        assert_eq!(model.sibling(BlobKind::State).file_name(), "5-state.json");
    }

    #[test]
    fn test_entry_epoch_legacy_rule() {
        assert_eq!(entry_epoch("7-model.bin"), Some(7));
        assert_eq!(entry_epoch("7-anything"), Some(7));
        assert_eq!(entry_epoch("best-model.bin"), None);
        assert_eq!(entry_epoch("run.toml"), None);
        assert_eq!(entry_epoch("checkpoints.json"), None);
        assert_eq!(entry_epoch("3-model.bin.tmp"), None);
        assert_eq!(entry_epoch("7"), None);
    }

    #[test]
    fn test_fork_name() {
        assert_eq!(
            ForkName::parse("5-12"),
            Some(ForkName {
                epoch: 5,
                index: 12
            })
        );
        assert_eq!(ForkName::parse("orig"), None);
        assert_eq!(ForkName::parse("5-"), None);
        assert_eq!(ForkName::parse("5-model.bin"), None);
        assert_eq!(ForkName { epoch: 3, index: 0 }.to_string(), "3-0");
    }
}
