//! Checkpoint persistence: naming, directory index, and the per-epoch writer.

pub mod index;
pub mod naming;
pub mod writer;

pub use index::{CheckpointManifest, CheckpointScan, ManifestEntry};
pub use naming::{BlobKind, CheckpointFile, ForkName, Slot};
pub use writer::{Checkpointer, DirectoryState, SavedCheckpoint};
