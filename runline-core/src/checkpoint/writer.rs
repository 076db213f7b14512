//! Per-epoch checkpoint writer.
//!
//! Owns the run directory for the process lifetime. The directory is created
//! lazily on the first save (fresh runs) or by the state restorer (branches);
//! a resumed run adopts its existing directory. Precondition: no other
//! process writes into the same run directory.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::index::{CheckpointManifest, files_for_epoch};
use super::naming::{BlobKind, CheckpointFile};
use crate::config::RunConfig;
use crate::error::{ArtifactError, Result, missing_or_io};
use crate::lineage::{ResolvedRun, RunMode};
use crate::persistence;
use crate::progress::{ForkedLog, ProgressEntry, ProgressLog};
use crate::state::{RunSnapshot, RunState};

/// Whether the run directory exists and its log is usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryState {
    Uninitialized,
    Ready { log: ProgressLog },
}

/// Files written by one [`Checkpointer::save`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedCheckpoint {
    pub epoch: u64,
    pub model_path: PathBuf,
    pub state_path: PathBuf,
    /// The `best-*` pair was overwritten with this epoch.
    pub is_best: bool,
}

pub struct Checkpointer {
    run: ResolvedRun,
    config_file: Option<PathBuf>,
    directory: DirectoryState,
    provenance_copied: bool,
}

impl Checkpointer {
    /// `config_file` is copied into the run directory on the first save.
    pub fn new(run: ResolvedRun, config_file: Option<PathBuf>) -> Self {
        let directory = match (&run.mode, run.root.dir()) {
            (RunMode::Resume { .. }, Some(dir)) => DirectoryState::Ready {
                log: ProgressLog::at(dir),
            },
            _ => DirectoryState::Uninitialized,
        };
        Self {
            run,
            config_file,
            directory,
            provenance_copied: false,
        }
    }

    pub fn run(&self) -> &ResolvedRun {
        &self.run
    }

    /// Directory this checkpointer writes into; `None` on a dry run.
    pub fn root(&self) -> Option<&Path> {
        self.run.root.dir()
    }

    pub fn directory(&self) -> &DirectoryState {
        &self.directory
    }

    pub fn log(&self) -> Option<&ProgressLog> {
        match &self.directory {
            DirectoryState::Ready { log } => Some(log),
            DirectoryState::Uninitialized => None,
        }
    }

    /// Create the branch directory, fork the source log, and copy every
    /// file of the fork epoch from the source run.
    ///
    /// The source log and file list are read before anything is created; a
    /// failure after the directory exists removes it again so the fork
    /// index stays free.
    pub(crate) fn begin_branch(&mut self, source_dir: &Path, fork_epoch: u64) -> Result<()> {
        let Some(root) = self.root().map(Path::to_path_buf) else {
            return Ok(());
        };
        self.ensure_uninitialized(&root)?;

        let forked = ForkedLog::read(source_dir, fork_epoch)?;
        let files = files_for_epoch(source_dir, fork_epoch)?;

        create_run_dir(&root)?;
        let log = match populate_branch(&root, &forked, &files) {
            Ok(log) => log,
            Err(e) => {
                remove_run_dir(&root);
                return Err(e);
            }
        };
        self.directory = DirectoryState::Ready { log };
        info!(
            source = %source_dir.display(),
            root = %root.display(),
            fork_epoch,
            "Materialized branch directory"
        );
        Ok(())
    }

    /// Persist the epoch recorded in `state`.
    ///
    /// Appends the log row, writes `<epoch>-model` and `<epoch>-state`, and
    /// overwrites the `best-*` pair when the epoch's test top-1 ties or beats
    /// the best so far. Returns `Ok(None)` without writing anything on a dry
    /// run.
    pub fn save(
        &mut self,
        config: &RunConfig,
        state: &mut RunState,
        model: &[u8],
    ) -> Result<Option<SavedCheckpoint>> {
        let Some(root) = self.root().map(Path::to_path_buf) else {
            debug!(epoch = state.curr_epoch, "Dry run, skipping checkpoint save");
            return Ok(None);
        };
        let log = self.ensure_ready(&root)?;
        self.copy_provenance(&root)?;

        let epoch = state.curr_epoch;
        log.append(&ProgressEntry::from_state(state))?;

        let is_best = state.promote_if_best();
        let snapshot = RunSnapshot::capture(config, state);

        let model_path = root.join(CheckpointFile::model(epoch).file_name());
        let state_path = root.join(CheckpointFile::state(epoch).file_name());
        persistence::atomic_write(&model_path, model)?;
        persistence::atomic_write_json(&state_path, &snapshot)?;

        if is_best {
            persistence::atomic_write(
                &root.join(CheckpointFile::best(BlobKind::Model).file_name()),
                model,
            )?;
            persistence::atomic_write_json(
                &root.join(CheckpointFile::best(BlobKind::State).file_name()),
                &snapshot,
            )?;
            info!(epoch, test_top1 = state.best_top1, "New best checkpoint");
        }

        let mut manifest = CheckpointManifest::load(&root)?;
        manifest.record(epoch, state.metrics.test.top1, model, is_best);
        manifest.save(&root)?;

        info!(epoch, root = %root.display(), "Saved checkpoint");
        Ok(Some(SavedCheckpoint {
            epoch,
            model_path,
            state_path,
            is_best,
        }))
    }

    /// Log handle for the run, creating a fresh run's directory on first use.
    fn ensure_ready(&mut self, root: &Path) -> Result<ProgressLog> {
        if let DirectoryState::Ready { log } = &self.directory {
            return Ok(log.clone());
        }
        match self.run.mode {
            RunMode::Fresh => {
                create_run_dir(root)?;
                let log = ProgressLog::create(root)?;
                info!(root = %root.display(), "Created run directory");
                self.directory = DirectoryState::Ready { log: log.clone() };
                Ok(log)
            }
            RunMode::Resume { .. } => {
                let log = ProgressLog::at(root);
                self.directory = DirectoryState::Ready { log: log.clone() };
                Ok(log)
            }
            RunMode::Branch { .. } => Err(ArtifactError::BranchNotForked {
                root: root.to_path_buf(),
            }
            .into()),
        }
    }

    fn ensure_uninitialized(&self, root: &Path) -> Result<()> {
        match self.directory {
            DirectoryState::Uninitialized => Ok(()),
            DirectoryState::Ready { .. } => Err(ArtifactError::AlreadyMaterialized {
                root: root.to_path_buf(),
            }
            .into()),
        }
    }

    fn copy_provenance(&mut self, root: &Path) -> Result<()> {
        if self.provenance_copied {
            return Ok(());
        }
        if let Some(config_file) = &self.config_file {
            let name = config_file
                .file_name()
                .ok_or_else(|| ArtifactError::missing(config_file))?;
            let dest = root.join(name);
            // Resuming with the run's own copy as the config: copying onto
            // itself would truncate it.
            if !same_file(config_file, &dest) {
                std::fs::copy(config_file, &dest).map_err(|e| missing_or_io(e, config_file))?;
                debug!(config = %config_file.display(), "Copied config file into run directory");
            }
        }
        self.provenance_copied = true;
        Ok(())
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn populate_branch(root: &Path, forked: &ForkedLog, files: &[PathBuf]) -> Result<ProgressLog> {
    let log = forked.write(root)?;
    for file in files {
        if let Some(name) = file.file_name() {
            std::fs::copy(file, root.join(name)).map_err(|e| missing_or_io(e, file))?;
            debug!(file = %file.display(), "Copied fork-epoch checkpoint file");
        }
    }
    Ok(log)
}

/// Undo a partially materialized branch: `root` and, when it is left
/// empty, its `<epoch>-<index>` parent.
fn remove_run_dir(root: &Path) {
    if let Err(e) = std::fs::remove_dir_all(root) {
        warn!(root = %root.display(), error = %e, "Failed to remove incomplete run directory");
        return;
    }
    if let Some(parent) = root.parent() {
        // Only succeeds once the fork directory is empty.
        let _ = std::fs::remove_dir(parent);
    }
}

/// Create `root`, failing if it already exists so two runs never share one.
fn create_run_dir(root: &Path) -> Result<()> {
    if let Some(parent) = root.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::create_dir(root)?;
    Ok(())
}
