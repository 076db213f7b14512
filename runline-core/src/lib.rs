//! # Runline Core
//!
//! Run-lineage management for resumable training jobs.
//! Decides which directory an invocation owns (fresh, resume, or branch),
//! keeps the per-run progress log, writes per-epoch and best checkpoints,
//! and reconciles persisted state with a freshly loaded configuration.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod lineage;
pub mod persistence;
pub mod progress;
pub mod restore;
pub mod session;
pub mod state;

// Re-export commonly used types at the crate root.
pub use checkpoint::{CheckpointManifest, CheckpointScan, Checkpointer, SavedCheckpoint};
pub use config::{RunConfig, load_config};
pub use error::{Result, RunlineError};
pub use lineage::{LineageTree, ResolvedRun, RunDirectoryResolver, RunMode, RunRoot};
pub use progress::{ProgressEntry, ProgressLog};
pub use restore::{Reconciled, StateRestorer};
pub use session::RunSession;
pub use state::{EpochMetrics, RunSnapshot, RunState, SplitMetrics};
