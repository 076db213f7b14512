//! Read-only discovery of the tree of runs under a timestamp directory.

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::checkpoint::index::CheckpointScan;
use crate::checkpoint::naming::{ForkName, RUN_LEAF};
use crate::error::{ArtifactError, Result};

/// One run (lineage node) and the branches taken from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineageNode {
    /// The node's `orig` directory.
    pub dir: PathBuf,
    /// `None` for the root run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fork: Option<ForkName>,
    pub latest_epoch: Option<u64>,
    pub children: Vec<LineageNode>,
}

impl LineageNode {
    /// Number of runs in this subtree, including this one.
    pub fn run_count(&self) -> usize {
        1 + self.children.iter().map(LineageNode::run_count).sum::<usize>()
    }

    /// Depth-first search by `orig` directory.
    pub fn find(&self, dir: &Path) -> Option<&LineageNode> {
        if self.dir == dir {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(dir))
    }
}

/// All runs descending from one root run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineageTree {
    pub root: LineageNode,
}

impl LineageTree {
    /// Discover the lineage rooted at `base/orig`, where `base` is a
    /// `<checkpoint_root>/<test_name>/<timestamp>` directory.
    pub fn discover(base: &Path) -> Result<Self> {
        let root_leaf = base.join(RUN_LEAF);
        if !root_leaf.is_dir() {
            return Err(ArtifactError::missing(root_leaf).into());
        }

        let mut fork_dirs = Vec::new();
        for entry in WalkDir::new(base).min_depth(2).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_dir() || entry.file_name() != RUN_LEAF {
                continue;
            }
            let Some(node_dir) = entry.path().parent() else {
                continue;
            };
            if fork_name(node_dir).is_some() {
                fork_dirs.push(node_dir.to_path_buf());
            }
        }

        Ok(Self {
            root: build_node(base, None, &fork_dirs)?,
        })
    }

    pub fn run_count(&self) -> usize {
        self.root.run_count()
    }
}

fn fork_name(dir: &Path) -> Option<ForkName> {
    ForkName::parse(dir.file_name()?.to_str()?)
}

fn build_node(
    node_dir: &Path,
    fork: Option<ForkName>,
    fork_dirs: &[PathBuf],
) -> Result<LineageNode> {
    let dir = node_dir.join(RUN_LEAF);
    let latest_epoch = CheckpointScan::scan(&dir)?.latest();

    let mut children = Vec::new();
    for child in fork_dirs.iter().filter(|d| d.parent() == Some(node_dir)) {
        children.push(build_node(child, fork_name(child), fork_dirs)?);
    }
    children.sort_by_key(|c| c.fork);

    Ok(LineageNode {
        dir,
        fork,
        latest_epoch,
        children,
    })
}
