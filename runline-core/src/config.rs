//! Configuration system for runline.
//!
//! Uses `figment` for layered configuration: defaults -> config file ->
//! environment -> explicit overrides. A run is described by one TOML file
//! with `[hyperparameters]`, `[runtime]` and `[lineage]` tables; the same
//! file is copied into the run directory on the first checkpoint save.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Complete configuration for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub hyperparameters: Hyperparameters,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub lineage: LineageConfig,
}

/// Static training hyperparameters. Never mutated once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub dataset: String,
    pub dataset_location: PathBuf,
    pub architecture: String,
    pub depth: u32,
    pub cardinality: u32,
    pub widen_factor: u32,
    pub growth_rate: u32,
    pub compression_rate: u32,
    pub total_epochs: u64,
    pub train_batch: usize,
    pub test_batch: usize,
    pub learning_rate: f64,
    pub dropout_ratio: f64,
    pub gamma: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    #[serde(default)]
    pub momentum_schedule: Vec<f64>,
    #[serde(default)]
    pub lr_schedule: Vec<f64>,
    pub train_val_split: f64,
    pub manual_seed: u64,
    #[serde(default)]
    pub sub_classes: Vec<String>,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            dataset: "cifar10".to_string(),
            dataset_location: PathBuf::from("data"),
            architecture: "alexnet".to_string(),
            depth: 0,
            cardinality: 0,
            widen_factor: 0,
            growth_rate: 0,
            compression_rate: 0,
            total_epochs: 30,
            train_batch: 128,
            test_batch: 100,
            learning_rate: 0.1,
            dropout_ratio: 0.5,
            gamma: 0.1,
            momentum: 0.9,
            weight_decay: 5e-4,
            momentum_schedule: Vec::new(),
            lr_schedule: Vec::new(),
            train_val_split: 0.8,
            manual_seed: 42,
            sub_classes: Vec::new(),
        }
    }
}

/// Settings that belong to the current invocation rather than the run's
/// history. These survive a resume even though everything else is replaced
/// by the persisted configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Comma-separated device ids, e.g. `"0,1"`.
    pub gpu_id: String,
    /// Data loading worker count.
    pub workers: usize,
    /// Dry run: resolve and validate, never write to the filesystem.
    pub print_only: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            gpu_id: "0".to_string(),
            workers: 4,
            print_only: false,
        }
    }
}

impl RuntimeConfig {
    /// Parse `gpu_id` into numeric device ids.
    pub fn gpu_list(&self) -> Result<Vec<u32>, ConfigError> {
        self.gpu_id
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u32>().map_err(|_| ConfigError::Invalid {
                    message: format!("gpu_id entry '{s}' is not a device number"),
                })
            })
            .collect()
    }
}

/// Where runs live and which lineage operation this invocation performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageConfig {
    /// Root under which `<test_name>/<timestamp>/orig` directories are created.
    pub checkpoint_root: PathBuf,
    pub test_name: String,
    pub resume: bool,
    pub branch: bool,
    pub evaluate: bool,
    /// Checkpoint file to resume or branch from (`<epoch>-model.bin`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pretrained: Option<PathBuf>,
}

impl Default for LineageConfig {
    fn default() -> Self {
        Self {
            checkpoint_root: PathBuf::from("checkpoints"),
            test_name: "default".to_string(),
            resume: false,
            branch: false,
            evaluate: false,
            pretrained: None,
        }
    }
}

impl LineageConfig {
    /// The checkpoint path, required when resuming or branching.
    pub fn require_pretrained(&self) -> Result<&Path, ConfigError> {
        self.pretrained
            .as_deref()
            .ok_or_else(|| ConfigError::MissingField {
                field: "lineage.pretrained".to_string(),
            })
    }
}

impl RunConfig {
    /// Check value-level constraints that `serde` cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lineage.test_name.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "lineage.test_name".to_string(),
            });
        }
        if self.lineage.test_name.contains(['/', '\\']) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "lineage.test_name '{}' must be a single path component",
                    self.lineage.test_name
                ),
            });
        }
        if self.hyperparameters.learning_rate <= 0.0 {
            return Err(ConfigError::Invalid {
                message: "hyperparameters.learning_rate must be > 0".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.hyperparameters.train_val_split) {
            return Err(ConfigError::Invalid {
                message: "hyperparameters.train_val_split must be within [0, 1]".to_string(),
            });
        }
        self.runtime.gpu_list()?;
        if self.lineage.resume || self.lineage.branch {
            self.lineage.require_pretrained()?;
        }
        Ok(())
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (`RUNLINE_RUNTIME__GPU_ID`, `RUNLINE_LINEAGE__RESUME`, ...)
/// 3. The config file
/// 4. Built-in defaults
pub fn load_config(
    path: &Path,
    overrides: Option<&RunConfig>,
) -> Result<RunConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let mut figment = Figment::from(Serialized::defaults(RunConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("RUNLINE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: RunConfig = figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}

/// Render the default configuration as TOML, for scaffolding new runs.
pub fn default_config_toml() -> Result<String, ConfigError> {
    toml::to_string_pretty(&RunConfig::default()).map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("run.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_load_config_merges_file_over_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[hyperparameters]
learning_rate = 0.01
total_epochs = 90

[runtime]
gpu_id = "1,2"

[lineage]
checkpoint_root = "/tmp/ckpt"
test_name = "resnet-sweep"
"#,
        );

        let config = load_config(&path, None).unwrap();
        assert_eq!(config.hyperparameters.learning_rate, 0.01);
        assert_eq!(config.hyperparameters.total_epochs, 90);
        assert_eq!(config.hyperparameters.architecture, "alexnet");
        assert_eq!(config.runtime.gpu_list().unwrap(), vec![1, 2]);
        assert_eq!(config.runtime.workers, 4);
        assert_eq!(config.lineage.test_name, "resnet-sweep");
        assert!(!config.lineage.resume);
    }

    #[test]
    fn test_load_config_overrides_win() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[lineage]\ntest_name = \"a\"\n");

        let mut overrides = RunConfig::default();
        overrides.lineage.test_name = "b".into();
        overrides.runtime.print_only = true;

        let config = load_config(&path, Some(&overrides)).unwrap();
        assert_eq!(config.lineage.test_name, "b");
        assert!(config.runtime.print_only);
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/run.toml"), None).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_load_config_bad_type_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[runtime]\nworkers = \"many\"\n");
        let err = load_config(&path, None).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_resume_requires_pretrained() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[lineage]\nresume = true\n");
        let err = load_config(&path, None).unwrap_err();
        assert!(
            matches!(err, ConfigError::MissingField { ref field } if field == "lineage.pretrained")
        );
    }

    #[test]
    fn test_gpu_list_rejects_garbage() {
        let runtime = RuntimeConfig {
            gpu_id: "0,cuda".into(),
            ..Default::default()
        };
        assert!(runtime.gpu_list().is_err());
    }

    #[test]
    fn test_validate_rejects_nested_test_name() {
        let mut config = RunConfig::default();
        config.lineage.test_name = "a/b".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_default_config_toml_roundtrips() {
        let rendered = default_config_toml().unwrap();
        let parsed: RunConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, RunConfig::default());
    }
}
