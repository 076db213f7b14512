//! State restoration: reconcile a freshly loaded configuration with a
//! persisted run before training starts.
//!
//! | mode     | config used                          | start epoch       |
//! |----------|--------------------------------------|-------------------|
//! | resume   | persisted, minus the override set    | persisted + 1     |
//! | branch   | live                                 | fork epoch + 1    |
//! | evaluate | live                                 | 0                 |
//! | fresh    | live                                 | 0                 |

use std::path::{Path, PathBuf};

use tracing::info;

use crate::checkpoint::Checkpointer;
use crate::checkpoint::naming::{BlobKind, CheckpointFile};
use crate::config::RunConfig;
use crate::error::{LineageError, Result};
use crate::lineage::RunMode;
use crate::persistence;
use crate::state::{RunSnapshot, RunState};

/// Configuration and state the training loop starts from.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub config: RunConfig,
    pub state: RunState,
    /// Model weights the training or inference loop should load, if any.
    pub model_checkpoint: Option<PathBuf>,
}

pub struct StateRestorer;

impl StateRestorer {
    pub fn reconcile(config: RunConfig, checkpointer: &mut Checkpointer) -> Result<Reconciled> {
        match checkpointer.run().mode.clone() {
            RunMode::Resume { checkpoint, epoch } => Self::resume(config, &checkpoint, epoch),
            RunMode::Branch {
                checkpoint,
                source_dir,
                fork_epoch,
            } => Self::branch(config, checkpointer, &checkpoint, &source_dir, fork_epoch),
            RunMode::Fresh if config.lineage.evaluate => {
                let state = RunState::new(&config, 0);
                let model_checkpoint = config.lineage.pretrained.clone();
                Ok(Reconciled {
                    config,
                    state,
                    model_checkpoint,
                })
            }
            RunMode::Fresh => {
                let state = RunState::new(&config, 0);
                Ok(Reconciled {
                    config,
                    state,
                    model_checkpoint: None,
                })
            }
        }
    }

    /// The persisted run wins except for what describes this invocation:
    /// checkpoint path, devices, worker count, and the dry-run flag.
    fn resume(live: RunConfig, checkpoint: &Path, epoch: u64) -> Result<Reconciled> {
        let snapshot = load_state_sibling(checkpoint, epoch)?;

        let mut config = snapshot.config;
        config.lineage.pretrained = live.lineage.pretrained;
        config.lineage.resume = true;
        config.lineage.branch = false;
        config.runtime = live.runtime;

        let mut state = snapshot.state;
        state.start_epoch = next_epoch(state.curr_epoch, checkpoint)?;
        info!(
            checkpoint = %checkpoint.display(),
            start_epoch = state.start_epoch,
            "Restored run state for resume"
        );
        Ok(Reconciled {
            config,
            state,
            model_checkpoint: Some(checkpoint.to_path_buf()),
        })
    }

    /// Only the fork epoch is taken from the persisted run; the live
    /// configuration governs the new lineage node.
    fn branch(
        config: RunConfig,
        checkpointer: &mut Checkpointer,
        checkpoint: &Path,
        source_dir: &Path,
        fork_epoch: u64,
    ) -> Result<Reconciled> {
        let snapshot = load_state_sibling(checkpoint, fork_epoch)?;
        let fork_epoch = snapshot.state.curr_epoch;

        checkpointer.begin_branch(source_dir, fork_epoch)?;
        let model_checkpoint = match checkpointer.root() {
            Some(root) => root.join(CheckpointFile::model(fork_epoch).file_name()),
            None => checkpoint.to_path_buf(),
        };

        let state = RunState::new(&config, next_epoch(fork_epoch, checkpoint)?);
        info!(
            source = %source_dir.display(),
            fork_epoch,
            start_epoch = state.start_epoch,
            "Prepared branch state"
        );
        Ok(Reconciled {
            config,
            state,
            model_checkpoint: Some(model_checkpoint),
        })
    }
}

/// First epoch after `epoch`; the last representable epoch has none.
fn next_epoch(epoch: u64, checkpoint: &Path) -> Result<u64> {
    epoch.checked_add(1).ok_or_else(|| {
        LineageError::InvalidCheckpointName {
            path: checkpoint.to_path_buf(),
        }
        .into()
    })
}

/// Load `<epoch>-state.json` next to `checkpoint` and check it belongs to
/// the epoch the file name claims. The state blob is always JSON, whatever
/// format the model file uses.
fn load_state_sibling(checkpoint: &Path, epoch: u64) -> Result<RunSnapshot> {
    let state_name = CheckpointFile::model(epoch)
        .sibling(BlobKind::State)
        .file_name();
    let path = match checkpoint.parent() {
        Some(dir) => dir.join(state_name),
        None => PathBuf::from(state_name),
    };
    let snapshot: RunSnapshot = persistence::load_json(&path)?;
    if snapshot.state.curr_epoch != epoch {
        return Err(LineageError::StateEpochMismatch {
            path,
            recorded: snapshot.state.curr_epoch,
            named: epoch,
        }
        .into());
    }
    Ok(snapshot)
}
