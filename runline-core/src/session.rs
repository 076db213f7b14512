//! One invocation's run: resolve, reconcile, then checkpoint each epoch.
//!
//! ```no_run
//! use runline_core::{load_config, RunSession};
//! use runline_core::state::EpochMetrics;
//! # fn main() -> runline_core::Result<()> {
//! let path = std::path::Path::new("run.toml");
//! let config = load_config(path, None)?;
//! let mut session = RunSession::start(config, Some(path.to_path_buf()))?;
//! for epoch in session.epochs() {
//!     let weights = vec![0u8; 16];
//!     session.checkpoint(epoch, 0.1, EpochMetrics::default(), &weights)?;
//! }
//! # Ok(())
//! # }
//! ```

use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::checkpoint::{Checkpointer, SavedCheckpoint};
use crate::config::RunConfig;
use crate::error::Result;
use crate::lineage::{ResolvedRun, RunDirectoryResolver};
use crate::restore::StateRestorer;
use crate::state::{EpochMetrics, RunState};

pub struct RunSession {
    config: RunConfig,
    state: RunState,
    model_checkpoint: Option<PathBuf>,
    checkpointer: Checkpointer,
}

impl RunSession {
    pub fn start(config: RunConfig, config_file: Option<PathBuf>) -> Result<Self> {
        Self::start_with(&RunDirectoryResolver::new(), config, config_file)
    }

    pub fn start_with(
        resolver: &RunDirectoryResolver,
        config: RunConfig,
        config_file: Option<PathBuf>,
    ) -> Result<Self> {
        let run = resolver.resolve(&config)?;
        let mut checkpointer = Checkpointer::new(run, config_file);
        let reconciled = StateRestorer::reconcile(config, &mut checkpointer)?;
        Ok(Self {
            config: reconciled.config,
            state: reconciled.state,
            model_checkpoint: reconciled.model_checkpoint,
            checkpointer,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn run(&self) -> &ResolvedRun {
        self.checkpointer.run()
    }

    /// Model weights to load before the first epoch, if any.
    pub fn model_checkpoint(&self) -> Option<&Path> {
        self.model_checkpoint.as_deref()
    }

    /// Epochs left to train: `start_epoch..total_epochs`.
    pub fn epochs(&self) -> Range<u64> {
        self.state.start_epoch..self.config.hyperparameters.total_epochs
    }

    pub fn checkpoint(
        &mut self,
        epoch: u64,
        lr: f64,
        metrics: EpochMetrics,
        model: &[u8],
    ) -> Result<Option<SavedCheckpoint>> {
        self.state.record_epoch(epoch, lr, metrics);
        self.checkpointer.save(&self.config, &mut self.state, model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lineage::RunMode;
    use crate::state::SplitMetrics;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn resolver(second: u32) -> RunDirectoryResolver {
        RunDirectoryResolver::at(
            NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(12, 0, second)
                .unwrap(),
        )
    }

    fn metrics(top1: f64) -> EpochMetrics {
        EpochMetrics {
            test: SplitMetrics {
                loss: 1.0 - top1,
                top1,
                top5: 1.0,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_fresh_then_resume_continues_same_log() {
        let tmp = TempDir::new().unwrap();
        let mut config = RunConfig::default();
        config.lineage.checkpoint_root = tmp.path().to_path_buf();
        config.lineage.test_name = "cifar".into();
        config.hyperparameters.total_epochs = 3;

        let mut session = RunSession::start_with(&resolver(0), config.clone(), None).unwrap();
        assert_eq!(session.epochs(), 0..3);
        for epoch in 0..2 {
            session.checkpoint(epoch, 0.1, metrics(0.5), b"w").unwrap();
        }
        let root = session.run().root.dir().unwrap().to_path_buf();

        let mut resume = config;
        resume.lineage.resume = true;
        resume.lineage.pretrained = Some(root.join("1-model.bin"));
        let mut resumed = RunSession::start_with(&resolver(1), resume, None).unwrap();
        assert!(matches!(resumed.run().mode, RunMode::Resume { epoch: 1, .. }));
        assert_eq!(resumed.epochs(), 2..3);
        assert_eq!(resumed.model_checkpoint(), Some(root.join("1-model.bin").as_path()));
        resumed.checkpoint(2, 0.1, metrics(0.6), b"w").unwrap();

        let log = resumed.checkpointer.log().unwrap();
        let epochs: Vec<u64> = log.entries().unwrap().iter().map(|e| e.epoch).collect();
        assert_eq!(epochs, vec![0, 1, 2]);
    }
}
