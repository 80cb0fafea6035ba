//! The `flow.flex.yaml` manifest describing a flow evaluator directory.

use crate::error::FlowError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Manifest file expected at the root of every flow evaluator directory.
pub const FLOW_MANIFEST_FILENAME: &str = "flow.flex.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowManifest {
    /// Declared inputs of the flow, keyed by input name.
    pub inputs: BTreeMap<String, Value>,

    /// `module:ClassName`.
    pub entry: String,

    /// Environment variables set while the flow runs.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl FlowManifest {
    /// Load the manifest from a flow evaluator directory.
    pub fn from_directory(dir: &Path) -> Result<Self, FlowError> {
        let path = dir.join(FLOW_MANIFEST_FILENAME);
        Self::from_file(&path)
    }

    /// Load and validate a manifest file.
    pub fn from_file(path: &Path) -> Result<Self, FlowError> {
        if !path.is_file() {
            return Err(FlowError::ManifestNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|e| FlowError::InvalidManifest {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&content, path)
    }

    /// Parse manifest text. `origin` is only used in error messages.
    pub fn parse(content: &str, origin: &Path) -> Result<Self, FlowError> {
        let manifest: FlowManifest =
            serde_yaml::from_str(content).map_err(|e| FlowError::InvalidManifest {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?;
        manifest.entry_point()?;
        Ok(manifest)
    }

    /// Split `entry` into `(module, class)`.
    pub fn entry_point(&self) -> Result<(&str, &str), FlowError> {
        match self.entry.split_once(':') {
            Some((module, class)) if !module.trim().is_empty() && !class.trim().is_empty() => {
                Ok((module.trim(), class.trim()))
            }
            _ => Err(FlowError::InvalidEntry(self.entry.clone())),
        }
    }

    /// The entry module's source file inside `dir`; it must exist.
    pub fn module_file(&self, dir: &Path) -> Result<PathBuf, FlowError> {
        let (module, _) = self.entry_point()?;
        let candidate = dir.join(format!("{}.py", module));
        if candidate.is_file() {
            Ok(candidate)
        } else {
            Err(FlowError::ModuleNotFound {
                module: module.to_string(),
                dir: dir.to_path_buf(),
            })
        }
    }
}
