//! Discovery and loading of flow evaluator directories.

use super::callable::{FlowCallable, FlowEntryCatalog, ScriptFlow};
use super::manifest::{FLOW_MANIFEST_FILENAME, FlowManifest};
use super::wrapper::FlowEvaluatorWrapper;
use crate::config::{EvaluatorConfig, Settings};
use crate::error::FlowError;
use crate::eval::metric::Evaluator;
use crate::eval::registry::EvaluatorFactory;
use crate::script::{CallStyle, ScriptRunner};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// A flow directory that has been parsed and bound to a callable.
#[derive(Clone)]
pub struct LoadedFlow {
    pub dir: PathBuf,
    pub manifest: Arc<FlowManifest>,
    pub callable: Arc<dyn FlowCallable>,
}

/// Finds flow evaluators in immediate sub-directories of the search
/// directories. A directory qualifies when it holds a `flow.flex.yaml`; its
/// name (case-insensitive) is the evaluator name.
pub struct DirectoryFlowLoader {
    search_dirs: Vec<PathBuf>,
    catalog: FlowEntryCatalog,
    interpreter: String,
    cache: Mutex<HashMap<String, LoadedFlow>>,
}

impl DirectoryFlowLoader {
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        Self {
            search_dirs,
            catalog: FlowEntryCatalog::with_builtins(),
            interpreter: "python3".to_string(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Loader over the settings' evaluator directories and interpreter.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.evaluator_dirs.clone()).with_interpreter(&settings.python)
    }

    pub fn with_catalog(mut self, catalog: FlowEntryCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_interpreter(mut self, interpreter: &str) -> Self {
        self.interpreter = interpreter.to_string();
        self
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    /// Every flow directory under the search directories, sorted per search directory.
    pub fn discover(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        for root in &self.search_dirs {
            if !root.is_dir() {
                continue;
            }
            let mut dirs: Vec<PathBuf> = WalkDir::new(root)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_dir())
                .map(|e| e.into_path())
                .filter(|dir| dir.join(FLOW_MANIFEST_FILENAME).is_file())
                .collect();
            dirs.sort();
            found.extend(dirs);
        }
        found
    }

    /// Parse the manifest in `dir` and bind its entry to a callable: a native
    /// catalog entry when one matches, otherwise the Python class in the module file.
    pub fn load(&self, dir: &Path) -> Result<LoadedFlow, FlowError> {
        let manifest = FlowManifest::from_directory(dir)?;
        let (module, class) = manifest.entry_point()?;
        let module_file = manifest.module_file(dir)?;

        let entry = format!("{}:{}", module, class);
        let callable: Arc<dyn FlowCallable> = match self.catalog.instantiate(&entry) {
            Some(native) => native,
            None => {
                let source = std::fs::read_to_string(&module_file).map_err(|e| {
                    FlowError::InvalidManifest {
                        path: module_file.clone(),
                        message: e.to_string(),
                    }
                })?;
                if !defines(&source, class) {
                    return Err(FlowError::UnsupportedEntry(entry));
                }
                let runner = ScriptRunner::new(&self.interpreter, module_file, class, CallStyle::Call)
                    .with_environment(manifest.environment.clone());
                Arc::new(ScriptFlow::new(runner))
            }
        };

        tracing::debug!("Loaded flow evaluator '{}' from {}", entry, dir.display());
        Ok(LoadedFlow {
            dir: dir.to_path_buf(),
            manifest: Arc::new(manifest),
            callable,
        })
    }

    /// Find a flow evaluator by directory name, loading and caching it on first use.
    pub fn find(&self, name: &str) -> Option<LoadedFlow> {
        let key = name.to_lowercase();
        if let Some(hit) = self.cache.lock().get(&key) {
            return Some(hit.clone());
        }

        for dir in self.discover() {
            let matches = dir
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase() == key)
                .unwrap_or(false);
            if !matches {
                continue;
            }
            match self.load(&dir) {
                Ok(flow) => {
                    self.cache.lock().insert(key, flow.clone());
                    return Some(flow);
                }
                Err(e) => {
                    tracing::warn!("Failed to load flow evaluator at {:?}: {}", dir, e);
                }
            }
        }
        None
    }
}

/// Whether Python source defines a top-level class or function called `name`.
fn defines(source: &str, name: &str) -> bool {
    source.lines().any(|line| {
        ["class ", "def "].iter().any(|keyword| {
            line.strip_prefix(keyword)
                .map(|rest| {
                    rest.strip_prefix(name)
                        .map(|tail| tail.starts_with(['(', ':']))
                        .unwrap_or(false)
                })
                .unwrap_or(false)
        })
    })
}

impl EvaluatorFactory for DirectoryFlowLoader {
    fn create(&self, config: &EvaluatorConfig) -> Option<Box<dyn Evaluator>> {
        let name = config.display_name();
        if name.is_empty() {
            return None;
        }
        let flow = self.find(name)?;
        Some(Box::new(FlowEvaluatorWrapper::new(
            config.clone(),
            flow.manifest,
            flow.callable,
        )))
    }

    fn available(&self) -> Vec<String> {
        self.discover()
            .iter()
            .filter_map(|dir| dir.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect()
    }
}
