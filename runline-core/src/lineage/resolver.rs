//! Resolve the run directory for an invocation.
//!
//! Pure apart from directory reads: nothing here creates or modifies files.
//! Directory creation belongs to the checkpointer and happens at most once.

use chrono::{Local, NaiveDateTime};
use std::path::{Path, PathBuf};
use tracing::info;

use super::{ResolvedRun, RunMode, RunRoot};
use crate::checkpoint::index::CheckpointScan;
use crate::checkpoint::naming::{CheckpointFile, ForkName, RUN_LEAF};
use crate::config::RunConfig;
use crate::error::{ArtifactError, ConfigError, LineageError, Result, missing_or_io};

/// Timestamp format of root run directories; sorts lexicographically by time.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Maps a configuration to the directory its run owns.
#[derive(Debug, Clone, Default)]
pub struct RunDirectoryResolver {
    now: Option<NaiveDateTime>,
}

impl RunDirectoryResolver {
    /// Resolver stamping fresh runs with the local wall clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver stamping fresh runs with a fixed time.
    pub fn at(now: NaiveDateTime) -> Self {
        Self { now: Some(now) }
    }

    pub fn resolve(&self, config: &RunConfig) -> Result<ResolvedRun> {
        let lineage = &config.lineage;
        if lineage.resume && lineage.branch {
            return Err(LineageError::ConfigurationConflict.into());
        }

        let (mode, dir) = if lineage.branch {
            self.resolve_branch(lineage.require_pretrained()?)?
        } else if lineage.resume {
            self.resolve_resume(lineage.require_pretrained()?)?
        } else {
            let stamp = self
                .now
                .unwrap_or_else(|| Local::now().naive_local())
                .format(TIMESTAMP_FORMAT)
                .to_string();
            let dir = lineage
                .checkpoint_root
                .join(&lineage.test_name)
                .join(stamp)
                .join(RUN_LEAF);
            (RunMode::Fresh, dir)
        };

        let root = if config.runtime.print_only {
            RunRoot::DryRun { planned: dir }
        } else {
            RunRoot::Dir(dir)
        };
        info!(
            mode = mode.name(),
            root = %root.planned().display(),
            dry_run = root.is_dry_run(),
            "Resolved run directory"
        );
        Ok(ResolvedRun { mode, root })
    }

    /// The run directory is the checkpoint's parent; only its latest epoch
    /// may be resumed.
    fn resolve_resume(&self, checkpoint: &Path) -> Result<(RunMode, PathBuf)> {
        let epoch = checkpoint_epoch(checkpoint)?;
        let run_dir = parent_dir(checkpoint);

        let latest = CheckpointScan::scan(&run_dir)?.latest();
        if latest != Some(epoch) {
            return Err(LineageError::ResumeEpochMismatch {
                requested: epoch,
                latest: latest.unwrap_or(epoch),
            }
            .into());
        }

        let mode = RunMode::Resume {
            checkpoint: checkpoint.to_path_buf(),
            epoch,
        };
        Ok((mode, run_dir))
    }

    /// Forks sit next to the source run's `orig`, named `<epoch>-<index>`
    /// with the index one past the highest existing fork of that epoch.
    fn resolve_branch(&self, checkpoint: &Path) -> Result<(RunMode, PathBuf)> {
        let fork_epoch = checkpoint_epoch(checkpoint)?;
        let source_dir = parent_dir(checkpoint);
        let lineage_parent = source_dir
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| ConfigError::Invalid {
                message: format!(
                    "branch checkpoint {} is not inside a run directory",
                    checkpoint.display()
                ),
            })?;

        let next_index = next_fork_index(lineage_parent, fork_epoch)?;
        let fork = ForkName {
            epoch: fork_epoch,
            index: next_index,
        };
        let dir = lineage_parent.join(fork.to_string()).join(RUN_LEAF);

        let mode = RunMode::Branch {
            checkpoint: checkpoint.to_path_buf(),
            source_dir,
            fork_epoch,
        };
        Ok((mode, dir))
    }
}

/// Epoch encoded in a checkpoint file name; the file must exist.
fn checkpoint_epoch(checkpoint: &Path) -> Result<u64> {
    let epoch = checkpoint
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(CheckpointFile::parse)
        .and_then(|f| f.epoch())
        .ok_or_else(|| LineageError::InvalidCheckpointName {
            path: checkpoint.to_path_buf(),
        })?;
    if !checkpoint.is_file() {
        return Err(ArtifactError::missing(checkpoint).into());
    }
    Ok(epoch)
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// One past the highest `<fork_epoch>-<index>` directory, or 0.
fn next_fork_index(lineage_parent: &Path, fork_epoch: u64) -> Result<u32> {
    let entries =
        std::fs::read_dir(lineage_parent).map_err(|e| missing_or_io(e, lineage_parent))?;
    let mut highest: Option<ForkName> = None;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(fork) = ForkName::parse(&entry.file_name().to_string_lossy()) else {
            continue;
        };
        if fork.epoch == fork_epoch && highest.is_none_or(|h| fork.index > h.index) {
            highest = Some(fork);
        }
    }
    match highest {
        None => Ok(0),
        Some(fork) => fork.index.checked_add(1).ok_or_else(|| {
            LineageError::InvalidCheckpointName {
                path: lineage_parent.join(fork.to_string()),
            }
            .into()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RunlineError;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn fixed_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(14, 5, 7)
            .unwrap()
    }

    fn run_dir_with_epochs(base: &Path, epochs: &[u64]) -> PathBuf {
        let dir = base.join("exp").join("2024-03-09-14-05-07").join(RUN_LEAF);
        std::fs::create_dir_all(&dir).unwrap();
        for e in epochs {
            std::fs::write(dir.join(CheckpointFile::model(*e).file_name()), b"m").unwrap();
            std::fs::write(dir.join(CheckpointFile::state(*e).file_name()), b"{}").unwrap();
        }
        std::fs::write(dir.join("log.csv"), b"").unwrap();
        dir
    }

    #[test]
    fn test_fresh_directory_layout() {
        let mut config = RunConfig::default();
        config.lineage.checkpoint_root = PathBuf::from("/ckpt");
        config.lineage.test_name = "vgg".into();

        let resolved = RunDirectoryResolver::at(fixed_time()).resolve(&config).unwrap();
        assert_eq!(resolved.mode, RunMode::Fresh);
        assert_eq!(
            resolved.root,
            RunRoot::Dir(PathBuf::from("/ckpt/vgg/2024-03-09-14-05-07/orig"))
        );
    }

    #[test]
    fn test_conflict_checked_before_anything() {
        let mut config = RunConfig::default();
        config.lineage.resume = true;
        config.lineage.branch = true;
        config.runtime.print_only = true;

        let err = RunDirectoryResolver::new().resolve(&config).unwrap_err();
        assert!(matches!(
            err,
            RunlineError::Lineage(LineageError::ConfigurationConflict)
        ));
    }

    #[test]
    fn test_dry_run_reports_planned_dir() {
        let mut config = RunConfig::default();
        config.runtime.print_only = true;
        let resolved = RunDirectoryResolver::at(fixed_time()).resolve(&config).unwrap();
        assert!(resolved.root.is_dry_run());
        assert_eq!(resolved.root.dir(), None);
        assert!(resolved.root.planned().ends_with("2024-03-09-14-05-07/orig"));
    }

    #[test]
    fn test_resume_from_latest() {
        let tmp = TempDir::new().unwrap();
        let dir = run_dir_with_epochs(tmp.path(), &[3, 5, 7]);
        let mut config = RunConfig::default();
        config.lineage.resume = true;
        config.lineage.pretrained = Some(dir.join("7-model.bin"));

        let resolved = RunDirectoryResolver::new().resolve(&config).unwrap();
        assert_eq!(resolved.root, RunRoot::Dir(dir.clone()));
        assert_eq!(
            resolved.mode,
            RunMode::Resume {
                checkpoint: dir.join("7-model.bin"),
                epoch: 7
            }
        );
    }

    #[test]
    fn test_resume_from_earlier_epoch_rejected() {
        let tmp = TempDir::new().unwrap();
        let dir = run_dir_with_epochs(tmp.path(), &[3, 5, 7]);
        let mut config = RunConfig::default();
        config.lineage.resume = true;
        config.lineage.pretrained = Some(dir.join("5-model.bin"));

        let err = RunDirectoryResolver::new().resolve(&config).unwrap_err();
        assert!(matches!(
            err,
            RunlineError::Lineage(LineageError::ResumeEpochMismatch {
                requested: 5,
                latest: 7
            })
        ));
    }

    #[test]
    fn test_resume_from_best_rejected() {
        let tmp = TempDir::new().unwrap();
        let dir = run_dir_with_epochs(tmp.path(), &[0]);
        std::fs::write(dir.join("best-model.bin"), b"m").unwrap();
        let mut config = RunConfig::default();
        config.lineage.resume = true;
        config.lineage.pretrained = Some(dir.join("best-model.bin"));

        let err = RunDirectoryResolver::new().resolve(&config).unwrap_err();
        assert!(matches!(
            err,
            RunlineError::Lineage(LineageError::InvalidCheckpointName { .. })
        ));
    }

    #[test]
    fn test_resume_missing_checkpoint() {
        let tmp = TempDir::new().unwrap();
        let dir = run_dir_with_epochs(tmp.path(), &[1]);
        let mut config = RunConfig::default();
        config.lineage.resume = true;
        config.lineage.pretrained = Some(dir.join("4-model.bin"));

        let err = RunDirectoryResolver::new().resolve(&config).unwrap_err();
        assert!(matches!(
            err,
            RunlineError::Artifact(ArtifactError::Missing { .. })
        ));
    }

    #[test]
    fn test_branch_picks_next_fork_index() {
        let tmp = TempDir::new().unwrap();
        let dir = run_dir_with_epochs(tmp.path(), &[4, 5, 6]);
        let parent = dir.parent().unwrap().to_path_buf();
        std::fs::create_dir_all(parent.join("5-0").join(RUN_LEAF)).unwrap();
        std::fs::create_dir_all(parent.join("5-3").join(RUN_LEAF)).unwrap();
        std::fs::create_dir_all(parent.join("4-7").join(RUN_LEAF)).unwrap();

        let mut config = RunConfig::default();
        config.lineage.branch = true;
        config.lineage.pretrained = Some(dir.join("5-model.bin"));

        let resolved = RunDirectoryResolver::new().resolve(&config).unwrap();
        assert_eq!(resolved.root, RunRoot::Dir(parent.join("5-4").join(RUN_LEAF)));
        assert_eq!(
            resolved.mode,
            RunMode::Branch {
                checkpoint: dir.join("5-model.bin"),
                source_dir: dir.clone(),
                fork_epoch: 5
            }
        );
    }

    #[test]
    fn test_branch_fork_index_exhausted() {
        let tmp = TempDir::new().unwrap();
        let dir = run_dir_with_epochs(tmp.path(), &[2]);
        let parent = dir.parent().unwrap();
        std::fs::create_dir_all(parent.join(format!("2-{}", u32::MAX))).unwrap();

        let mut config = RunConfig::default();
        config.lineage.branch = true;
        config.lineage.pretrained = Some(dir.join("2-model.bin"));

        let err = RunDirectoryResolver::new().resolve(&config).unwrap_err();
        assert!(matches!(
            err,
            RunlineError::Lineage(LineageError::InvalidCheckpointName { .. })
        ));
    }

    #[test]
    fn test_branch_first_fork_is_zero() {
        let tmp = TempDir::new().unwrap();
        let dir = run_dir_with_epochs(tmp.path(), &[2, 3]);
        let mut config = RunConfig::default();
        config.lineage.branch = true;
        config.lineage.pretrained = Some(dir.join("2-model.bin"));

        let resolved = RunDirectoryResolver::new().resolve(&config).unwrap();
        assert!(resolved.root.planned().ends_with("2-0/orig"));
    }
}
