//! Persistence helpers: atomic JSON writes and JSON loads.
//!
//! Every JSON artifact in a run directory (state blobs, the checkpoint
//! manifest) goes through here so a crash mid-write never leaves a torn file.

use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Result, missing_or_io};

/// Atomically write JSON data to a file.
///
/// Serializes `data` to pretty-printed JSON, writes it to a `.tmp` sibling,
/// then renames over the target path.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    atomic_write(path, json.as_bytes())?;
    Ok(())
}

/// Atomically write raw bytes to a file.
///
/// The parent directory must already exist; run directories are created
/// exactly once by the checkpointer, never implicitly here.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    let tmp = tmp_path(path)?;
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Hidden `.<name>.tmp` sibling of `path`. Carries no epoch prefix, so a
/// write interrupted mid-way is never mistaken for a checkpoint.
pub(crate) fn tmp_path(path: &Path) -> io::Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no file name in {}", path.display()),
        )
    })?;
    let mut tmp_name = std::ffi::OsString::from(".");
    tmp_name.push(name);
    tmp_name.push(".tmp");
    Ok(path.with_file_name(tmp_name))
}

/// Load and deserialize JSON that must exist.
///
/// A missing file is an [`ArtifactError::Missing`](crate::error::ArtifactError::Missing);
/// undecodable contents surface as a serialization error.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read_to_string(path).map_err(|e| missing_or_io(e, path))?;
    Ok(serde_json::from_str(&data)?)
}

/// Load JSON if the file exists.
pub fn load_json_opt<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    load_json(path).map(Some)
}
