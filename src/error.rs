//! Error types for the experiment harness.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom error.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Errors that can occur while preparing or running an experiment.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Error reading or writing files.
    #[error("I/O error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error during serialization/deserialization.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The experiment configuration file does not exist.
    #[error("Configuration file not found at '{0}'")]
    ConfigNotFound(PathBuf),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The requested dataset version is not present under the dataset root.
    #[error("Dataset '{name}' version '{version}' not found at '{path}'")]
    DatasetNotFound {
        name: String,
        version: String,
        path: PathBuf,
    },

    /// A dataset line could not be turned into a row.
    #[error("Malformed dataset record in '{path}' at line {line}: {message}")]
    MalformedRecord {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// The executable section does not resolve to anything runnable.
    #[error("Unsupported executable: {0}")]
    UnsupportedExecutable(String),
}

impl HarnessError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(err: serde_json::Error) -> Self {
        HarnessError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for HarnessError {
    fn from(err: serde_yaml::Error) -> Self {
        HarnessError::Serialization(err.to_string())
    }
}

/// Structural failure of a single evaluator's batch run.
///
/// These never abort a run; the evaluation service records them in the
/// errors artifact and moves on to the next evaluator.
#[derive(Error, Debug, Clone)]
pub enum EvaluatorError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Evaluator panicked: {0}")]
    Panic(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EvaluatorError {
    /// Stable identifier for the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            EvaluatorError::MissingField(_) => "missing_field",
            EvaluatorError::InvalidInput(_) => "invalid_input",
            EvaluatorError::Panic(_) => "panic",
            EvaluatorError::Internal(_) => "internal",
        }
    }
}

/// Errors raised while discovering, loading or invoking flow evaluators.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Manifest not found at '{0}'")]
    ManifestNotFound(PathBuf),

    #[error("Invalid manifest '{path}': {message}")]
    InvalidManifest { path: PathBuf, message: String },

    #[error("Invalid entry format: '{0}'. Expected 'module:ClassName'")]
    InvalidEntry(String),

    #[error("Module file not found for '{module}' in '{dir}'")]
    ModuleNotFound { module: String, dir: PathBuf },

    #[error("No loader available for entry '{0}'")]
    UnsupportedEntry(String),

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Script exited with status {status}: {stderr}")]
    ScriptFailed { status: i32, stderr: String },

    #[error("Invalid script output: {0}")]
    InvalidOutput(String),
}

impl FlowError {
    /// Stable identifier for the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            FlowError::ManifestNotFound(_) => "manifest_not_found",
            FlowError::InvalidManifest { .. } => "invalid_manifest",
            FlowError::InvalidEntry(_) => "invalid_entry",
            FlowError::ModuleNotFound { .. } => "module_not_found",
            FlowError::UnsupportedEntry(_) => "unsupported_entry",
            FlowError::MissingInput(_) => "missing_input",
            FlowError::Spawn { .. } => "spawn",
            FlowError::ScriptFailed { .. } => "script_failed",
            FlowError::InvalidOutput(_) => "invalid_output",
        }
    }
}

/// Failure while producing the output for a single row.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Missing input field: {0}")]
    MissingInput(String),

    #[error("Processor failed: {0}")]
    Processor(String),

    #[error(transparent)]
    Script(#[from] FlowError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_carries_path() {
        let err = HarnessError::io(
            "/tmp/missing.jsonl",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        let message = err.to_string();
        assert!(message.contains("/tmp/missing.jsonl"));
        assert!(message.contains("gone"));
    }

    #[test]
    fn test_error_kinds_are_stable() {
        assert_eq!(EvaluatorError::Panic("boom".into()).kind(), "panic");
        assert_eq!(
            FlowError::InvalidEntry("no_colon".into()).kind(),
            "invalid_entry"
        );
    }
}
