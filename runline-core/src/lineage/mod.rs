//! Run lineage: which directory an invocation owns and how runs relate.
//!
//! A root run lives at `<checkpoint_root>/<test_name>/<timestamp>/orig`.
//! Resuming continues the same directory. Branching from epoch `E` of a run
//! creates `<E>-<index>/orig` next to that run's `orig`.

pub mod resolver;
pub mod tree;

pub use resolver::RunDirectoryResolver;
pub use tree::{LineageNode, LineageTree};

use std::path::{Path, PathBuf};

/// The lineage operation an invocation performs. Exactly one applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// New root run under a fresh timestamp directory.
    Fresh,
    /// Continue the run that wrote `checkpoint`, which holds its last epoch.
    Resume { checkpoint: PathBuf, epoch: u64 },
    /// Fork a new lineage node from `checkpoint`, written by the run in
    /// `source_dir` at `fork_epoch`.
    Branch {
        checkpoint: PathBuf,
        source_dir: PathBuf,
        fork_epoch: u64,
    },
}

impl RunMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Resume { .. } => "resume",
            Self::Branch { .. } => "branch",
        }
    }

    pub fn checkpoint(&self) -> Option<&Path> {
        match self {
            Self::Fresh => None,
            Self::Resume { checkpoint, .. } | Self::Branch { checkpoint, .. } => Some(checkpoint),
        }
    }
}

/// Where this invocation's artifacts go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunRoot {
    /// Dry run: nothing is written. `planned` is where a real run would go.
    DryRun { planned: PathBuf },
    Dir(PathBuf),
}

impl RunRoot {
    /// The directory to write into, `None` for a dry run.
    pub fn dir(&self) -> Option<&Path> {
        match self {
            Self::DryRun { .. } => None,
            Self::Dir(p) => Some(p),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self, Self::DryRun { .. })
    }

    pub fn planned(&self) -> &Path {
        match self {
            Self::DryRun { planned } | Self::Dir(planned) => planned,
        }
    }
}

/// Output of [`RunDirectoryResolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRun {
    pub mode: RunMode,
    pub root: RunRoot,
}
