//! Configuration for experiment runs.
//!
//! Two layers live here:
//! - [`ExperimentConfig`]: the per-experiment file (YAML or JSON) naming the
//!   dataset, the executable and the evaluators.
//! - [`Settings`]: process-wide locations. Environment variables take
//!   precedence over built-in defaults; CLI flags override both.

use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

/// Describe an evaluator to run after execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EvaluatorConfig {
    /// Identifier of this evaluator entry (also tried as a lookup key).
    #[serde(default)]
    pub id: String,

    /// Name used for lookup and as the metric key prefix.
    #[serde(default)]
    pub name: String,

    /// Evaluator input name -> row field name.
    #[serde(default)]
    pub data_mapping: BTreeMap<String, String>,
}

impl EvaluatorConfig {
    /// Create an evaluator entry without field remapping.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            data_mapping: BTreeMap::new(),
        }
    }

    /// Add a field mapping (`evaluator_input` reads from `row_field`).
    pub fn with_mapping(mut self, evaluator_input: &str, row_field: &str) -> Self {
        self.data_mapping
            .insert(evaluator_input.to_string(), row_field.to_string());
        self
    }

    /// The name used for display and flow lookup: `name`, or `id` when unnamed.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Dataset specific options used when loading rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DatasetOptions {
    /// Record field copied into each row's `expected_output`.
    #[serde(default)]
    pub expected_output_field: Option<String>,
}

/// Which dataset should be loaded for an experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub config: DatasetOptions,
}

/// Supported execution backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutableType {
    Module,
    #[default]
    #[serde(other)]
    Unknown,
}

/// The executable section of an experiment file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExecutableConfig {
    /// Backend type; a missing `type` means `unknown`.
    #[serde(rename = "type", default)]
    pub kind: ExecutableType,

    /// Module location (catalog prefix, script file, or directory).
    #[serde(default)]
    pub path: String,

    /// Callable to invoke inside the module.
    #[serde(default)]
    pub processor: String,

    /// Extra keyword arguments passed on every call.
    #[serde(default)]
    pub config: BTreeMap<String, Value>,

    /// Additional directories for the script interpreter's module search path.
    #[serde(default)]
    pub python_path: Vec<String>,
}

impl ExecutableConfig {
    /// Short human-readable descriptor.
    pub fn run_descriptor(&self) -> String {
        match self.kind {
            ExecutableType::Module => {
                format!("Module(path={}, processor={})", self.path, self.processor)
            }
            ExecutableType::Unknown => "Executable(type=unknown)".to_string(),
        }
    }
}

/// Top-level configuration for an experiment run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub dataset: DatasetConfig,

    #[serde(default)]
    pub executable: ExecutableConfig,

    #[serde(default, alias = "evaluation")]
    pub evaluators: Vec<EvaluatorConfig>,

    #[serde(default)]
    pub local_mode: bool,

    /// Directory where results are stored, organised by dataset name and version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
}

impl ExperimentConfig {
    /// Load an experiment file. `.json` files are parsed as JSON, anything else as YAML.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(HarnessError::ConfigNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|e| HarnessError::io(path, e))?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let config: ExperimentConfig = if is_json {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content).map_err(|e| {
                HarnessError::InvalidConfig(format!("Failed to parse {}: {}", path.display(), e))
            })?
        };

        tracing::info!(
            dataset = %config.dataset.name,
            version = %config.dataset.version,
            evaluators = config.evaluators.len(),
            "Loaded experiment configuration from {}",
            path.display()
        );
        Ok(config)
    }

    /// Check the fields every run depends on.
    pub fn validate(&self) -> Result<()> {
        if self.dataset.name.trim().is_empty() {
            return Err(HarnessError::InvalidConfig(
                "dataset.name is required".to_string(),
            ));
        }
        if self.dataset.version.trim().is_empty() {
            return Err(HarnessError::InvalidConfig(
                "dataset.version is required".to_string(),
            ));
        }
        for (index, evaluator) in self.evaluators.iter().enumerate() {
            if evaluator.name.trim().is_empty() && evaluator.id.trim().is_empty() {
                return Err(HarnessError::InvalidConfig(format!(
                    "evaluator #{} needs a name or an id",
                    index + 1
                )));
            }
        }
        Ok(())
    }

    /// One-line description used in logs.
    pub fn describe(&self) -> String {
        format!(
            "Experiment(dataset={}:{}, exec={})",
            self.dataset.name,
            self.dataset.version,
            self.executable.run_descriptor()
        )
    }

    /// Root directory for artifacts: the configured `output_path`, else the settings default.
    pub fn artifact_root(&self, settings: &Settings) -> PathBuf {
        self.output_path
            .clone()
            .unwrap_or_else(|| settings.artifact_root.clone())
    }
}

/// Process-wide locations and tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Root containing `<name>/<version>/*.jsonl` datasets.
    pub dataset_root: PathBuf,

    /// Root under which run directories are created.
    pub artifact_root: PathBuf,

    /// Directories scanned for flow evaluators.
    pub evaluator_dirs: Vec<PathBuf>,

    /// Interpreter used for script-backed executables and flow evaluators.
    pub python: String,
}

impl Settings {
    /// Load settings from environment variables over built-in defaults.
    ///
    /// Priority (highest to lowest):
    /// 1. `EXP_CLI_DATASET_ROOT`, `EXP_CLI_ARTIFACT_ROOT`, `EXP_CLI_EVALUATOR_PATH`, `EXP_CLI_PYTHON`
    /// 2. Per-user data directory (`.../experiment-harness/{datasets,experiments}`)
    pub fn load() -> Self {
        let data_dir = Self::default_data_dir();
        let mut settings = Self::with_roots(data_dir.join("datasets"), data_dir.join("experiments"));

        if let Ok(root) = env::var("EXP_CLI_DATASET_ROOT") {
            settings.dataset_root = PathBuf::from(root);
        }

        if let Ok(root) = env::var("EXP_CLI_ARTIFACT_ROOT") {
            settings.artifact_root = PathBuf::from(root);
        }

        if let Some(extra) = env::var_os("EXP_CLI_EVALUATOR_PATH") {
            settings.evaluator_dirs.extend(env::split_paths(&extra));
        }

        if let Ok(python) = env::var("EXP_CLI_PYTHON") {
            if !python.trim().is_empty() {
                settings.python = python;
            }
        }

        settings
    }

    /// Build settings with explicit roots (useful for testing).
    pub fn with_roots(dataset_root: impl Into<PathBuf>, artifact_root: impl Into<PathBuf>) -> Self {
        Self {
            dataset_root: dataset_root.into(),
            artifact_root: artifact_root.into(),
            evaluator_dirs: Self::default_evaluator_dirs(),
            python: "python3".to_string(),
        }
    }

    /// The conventional flow evaluator locations relative to the working directory.
    pub fn default_evaluator_dirs() -> Vec<PathBuf> {
        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        vec![cwd.join("evaluators"), cwd.join("custom_evaluators")]
    }

    fn default_data_dir() -> PathBuf {
        directories::ProjectDirs::from("", "", "experiment-harness")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("data"))
    }
}
