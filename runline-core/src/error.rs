//! Error types for the runline core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering lineage resolution, on-disk artifacts, and configuration.
//! Nothing here is retried: every variant is an operator or programming error.

use std::path::PathBuf;

/// Top-level error type for the runline core library.
#[derive(Debug, thiserror::Error)]
pub enum RunlineError {
    #[error("Lineage error: {0}")]
    Lineage(#[from] LineageError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from resolving which run directory an invocation owns.
#[derive(Debug, thiserror::Error)]
pub enum LineageError {
    #[error("Cannot branch and resume at the same time; check the config file")]
    ConfigurationConflict,

    #[error(
        "Resume epoch ({requested}) is not the last epoch run ({latest}); use branch instead of resume to continue from there"
    )]
    ResumeEpochMismatch { requested: u64, latest: u64 },

    #[error("Checkpoint file name has no epoch prefix: {path}")]
    InvalidCheckpointName { path: PathBuf },

    #[error("Persisted state at {path} records epoch {recorded}, file name says {named}")]
    StateEpochMismatch {
        path: PathBuf,
        recorded: u64,
        named: u64,
    },
}

/// Errors from the files a run directory is expected to contain.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Required artifact missing: {path}")]
    Missing { path: PathBuf },

    #[error("Log {path} has {rows} data rows, cannot fork at epoch {fork_epoch}")]
    LogTooShort {
        path: PathBuf,
        rows: u64,
        fork_epoch: u64,
    },

    #[error("Malformed row {line} in {path}: {reason}")]
    MalformedLogRow {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Branch directory {root} was never forked; reconcile state before saving")]
    BranchNotForked { root: PathBuf },

    #[error("Run directory already materialized: {root}")]
    AlreadyMaterialized { root: PathBuf },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

impl ArtifactError {
    pub fn missing(path: impl Into<PathBuf>) -> Self {
        Self::Missing { path: path.into() }
    }
}

/// Map a `NotFound` I/O error on `path` to [`ArtifactError::Missing`], keep
/// everything else as a plain I/O error.
pub(crate) fn missing_or_io(err: std::io::Error, path: &std::path::Path) -> RunlineError {
    if err.kind() == std::io::ErrorKind::NotFound {
        ArtifactError::missing(path).into()
    } else {
        RunlineError::Io(err)
    }
}

/// A type alias for results using the top-level `RunlineError`.
pub type Result<T> = std::result::Result<T, RunlineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_conflict() {
        let err = RunlineError::Lineage(LineageError::ConfigurationConflict);
        assert_eq!(
            err.to_string(),
            "Lineage error: Cannot branch and resume at the same time; check the config file"
        );
    }

    #[test]
    fn test_error_display_resume_mismatch_names_both_epochs() {
        let err = LineageError::ResumeEpochMismatch {
            requested: 5,
            latest: 7,
        };
        let msg = err.to_string();
        assert!(msg.contains("(5)"));
        assert!(msg.contains("(7)"));
    }

    #[test]
    fn test_error_display_missing_artifact() {
        let err = RunlineError::Artifact(ArtifactError::missing("/runs/a/orig/log.csv"));
        assert_eq!(
            err.to_string(),
            "Artifact error: Required artifact missing: /runs/a/orig/log.csv"
        );
    }

    #[test]
    fn test_missing_or_io_maps_not_found() {
        let path = std::path::Path::new("/nope");
        let err = missing_or_io(std::io::Error::from(std::io::ErrorKind::NotFound), path);
        assert!(matches!(
            err,
            RunlineError::Artifact(ArtifactError::Missing { .. })
        ));

        let err = missing_or_io(
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            path,
        );
        assert!(matches!(err, RunlineError::Io(_)));
    }

    #[test]
    fn test_error_from_config() {
        let err: RunlineError = ConfigError::MissingField {
            field: "lineage.pretrained".into(),
        }
        .into();
        assert!(matches!(err, RunlineError::Config(_)));
        assert_eq!(
            err.to_string(),
            "Configuration error: Missing required field: lineage.pretrained"
        );
    }
}
