//! Row-level flow callables and the catalog of native entries.

use crate::error::FlowError;
use crate::eval::equivalence;
use crate::model::Record;
use crate::script::ScriptRunner;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A flow evaluator's native calling convention: keyword arguments in, a
/// mapping or scalar out.
pub trait FlowCallable: Send + Sync {
    fn call(&self, kwargs: &Record) -> Result<Value, FlowError>;
}

/// Builds a callable for a manifest entry.
pub type FlowConstructor = Arc<dyn Fn() -> Arc<dyn FlowCallable> + Send + Sync>;

/// Native implementations keyed by manifest entry (`module:ClassName`).
#[derive(Clone, Default)]
pub struct FlowEntryCatalog {
    entries: HashMap<String, FlowConstructor>,
}

impl FlowEntryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with `equivalent:EquivalentEvaluator` registered.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register("equivalent:EquivalentEvaluator", || Arc::new(EquivalenceFlow));
        catalog
    }

    pub fn register<F>(&mut self, entry: &str, constructor: F)
    where
        F: Fn() -> Arc<dyn FlowCallable> + Send + Sync + 'static,
    {
        self.entries.insert(entry.to_string(), Arc::new(constructor));
    }

    /// Instantiate the native callable for `entry`, if any.
    pub fn instantiate(&self, entry: &str) -> Option<Arc<dyn FlowCallable>> {
        self.entries.get(entry).map(|constructor| constructor())
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries.contains_key(entry)
    }
}

impl fmt::Debug for FlowEntryCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<&String> = self.entries.keys().collect();
        entries.sort();
        f.debug_struct("FlowEntryCatalog")
            .field("entries", &entries)
            .finish()
    }
}

/// Scores `response` against `ground_truth` with the equivalence scorer.
#[derive(Debug, Clone, Copy, Default)]
pub struct EquivalenceFlow;

impl FlowCallable for EquivalenceFlow {
    fn call(&self, kwargs: &Record) -> Result<Value, FlowError> {
        let response = kwargs
            .get("response")
            .ok_or_else(|| FlowError::MissingInput("response".to_string()))?;
        let ground_truth = kwargs
            .get("ground_truth")
            .ok_or_else(|| FlowError::MissingInput("ground_truth".to_string()))?;
        let result = equivalence::score(response, ground_truth);
        serde_json::to_value(result).map_err(|e| FlowError::InvalidOutput(e.to_string()))
    }
}

/// A flow implemented by a Python class, invoked through [`ScriptRunner`].
#[derive(Debug, Clone)]
pub struct ScriptFlow {
    runner: ScriptRunner,
}

impl ScriptFlow {
    pub fn new(runner: ScriptRunner) -> Self {
        Self { runner }
    }
}

impl FlowCallable for ScriptFlow {
    fn call(&self, kwargs: &Record) -> Result<Value, FlowError> {
        self.runner.invoke(kwargs)
    }
}
