//! Mutable run state: epoch counters, metrics, best-so-far.
//!
//! Kept apart from [`RunConfig`] so the only writers are the state restorer
//! and the per-epoch checkpoint save.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RunConfig;

/// Loss and accuracy for one data split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitMetrics {
    pub loss: f64,
    pub top1: f64,
    pub top5: f64,
}

impl Default for SplitMetrics {
    fn default() -> Self {
        Self {
            loss: 0.0,
            top1: 1.0,
            top5: 1.0,
        }
    }
}

/// Per-epoch metrics across train/test/validation splits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub train: SplitMetrics,
    pub test: SplitMetrics,
    pub val: SplitMetrics,
}

/// Dynamic state of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// First epoch this invocation will train.
    pub start_epoch: u64,
    /// Epoch the metrics below belong to.
    pub curr_epoch: u64,
    pub lr: f64,
    pub metrics: EpochMetrics,
    /// Highest test top-1 seen so far in this lineage node.
    pub best_top1: f64,
}

impl RunState {
    /// Fresh state for a run that starts at `start_epoch`.
    pub fn new(config: &RunConfig, start_epoch: u64) -> Self {
        Self {
            start_epoch,
            curr_epoch: start_epoch,
            lr: config.hyperparameters.learning_rate,
            metrics: EpochMetrics::default(),
            best_top1: 0.0,
        }
    }

    /// Record the outcome of `epoch` before it is checkpointed.
    pub fn record_epoch(&mut self, epoch: u64, lr: f64, metrics: EpochMetrics) {
        self.curr_epoch = epoch;
        self.lr = lr;
        self.metrics = metrics;
    }

    /// Promote the current epoch to best if its test top-1 ties or beats the
    /// best so far. Ties go to the most recent epoch.
    pub fn promote_if_best(&mut self) -> bool {
        if self.metrics.test.top1 >= self.best_top1 {
            self.best_top1 = self.metrics.test.top1;
            true
        } else {
            false
        }
    }
}

/// The full state blob written as `<epoch>-state.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub config: RunConfig,
    pub state: RunState,
    pub saved_at: DateTime<Utc>,
}

impl RunSnapshot {
    pub fn capture(config: &RunConfig, state: &RunState) -> Self {
        Self {
            config: config.clone(),
            state: state.clone(),
            saved_at: Utc::now(),
        }
    }
}
