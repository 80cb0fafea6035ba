//! Evaluator lookup.
//!
//! Two strategies sit behind the [`EvaluatorFactory`] trait:
//! - [`EvaluatorRegistry`]: constructors registered by lowercase name during bootstrap.
//! - the directory flow loader ([`crate::eval::flow::DirectoryFlowLoader`]).
//!
//! [`EvaluatorResolver`] composes them. When an evaluator entry carries a
//! `data_mapping`, flow evaluators are tried first since field remapping is
//! how flow evaluators are wired; otherwise the registry goes first.

use crate::config::EvaluatorConfig;
use crate::eval::metric::Evaluator;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builds an evaluator instance from its configuration entry.
pub type EvaluatorConstructor = Arc<dyn Fn(&EvaluatorConfig) -> Box<dyn Evaluator> + Send + Sync>;

/// Something that can turn an evaluator entry into an instance.
pub trait EvaluatorFactory: Send + Sync {
    /// Build the evaluator, or `None` when this factory does not know it.
    fn create(&self, config: &EvaluatorConfig) -> Option<Box<dyn Evaluator>>;

    /// Names this factory can resolve.
    fn available(&self) -> Vec<String>;
}

/// Name-indexed evaluator constructors.
#[derive(Clone, Default)]
pub struct EvaluatorRegistry {
    constructors: HashMap<String, EvaluatorConstructor>,
}

impl EvaluatorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in evaluators.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::eval::builtin::register_builtins(&mut registry);
        registry
    }

    /// Register a constructor under `name` (case-insensitive). A later
    /// registration under the same name replaces the earlier one.
    pub fn register<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn(&EvaluatorConfig) -> Box<dyn Evaluator> + Send + Sync + 'static,
    {
        let key = name.to_lowercase();
        if self.constructors.contains_key(&key) {
            tracing::warn!("Replacing evaluator registered as '{}'", key);
        } else {
            tracing::debug!("Registered evaluator '{}'", key);
        }
        self.constructors.insert(key, Arc::new(constructor));
    }

    /// Look up a constructor by name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&EvaluatorConstructor> {
        self.constructors.get(&name.to_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

impl EvaluatorFactory for EvaluatorRegistry {
    /// Tries `config.name`, then `config.id`; empty keys are skipped.
    fn create(&self, config: &EvaluatorConfig) -> Option<Box<dyn Evaluator>> {
        [config.name.as_str(), config.id.as_str()]
            .into_iter()
            .filter(|key| !key.is_empty())
            .find_map(|key| self.get(key))
            .map(|constructor| constructor(config))
    }

    fn available(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for EvaluatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluatorRegistry")
            .field("names", &self.available())
            .finish()
    }
}

/// Resolves evaluator entries against the registry and, optionally, flow evaluators.
pub struct EvaluatorResolver {
    registry: Box<dyn EvaluatorFactory>,
    flows: Option<Box<dyn EvaluatorFactory>>,
}

impl EvaluatorResolver {
    /// Resolve against `registry` only.
    pub fn new(registry: impl EvaluatorFactory + 'static) -> Self {
        Self {
            registry: Box::new(registry),
            flows: None,
        }
    }

    /// Add a flow evaluator factory.
    pub fn with_flows(mut self, flows: impl EvaluatorFactory + 'static) -> Self {
        self.flows = Some(Box::new(flows));
        self
    }

    /// Resolve one entry. Returns `None` when no strategy knows it.
    pub fn resolve(&self, config: &EvaluatorConfig) -> Option<Box<dyn Evaluator>> {
        let registry = Some(self.registry.as_ref());
        let flows = self.flows.as_deref();

        let order = if config.data_mapping.is_empty() {
            [("registry", registry), ("flow", flows)]
        } else {
            [("flow", flows), ("registry", registry)]
        };

        for (strategy, factory) in order {
            let Some(factory) = factory else { continue };
            if let Some(evaluator) = factory.create(config) {
                tracing::debug!(
                    evaluator = config.display_name(),
                    strategy,
                    "Resolved evaluator"
                );
                return Some(evaluator);
            }
        }

        None
    }

    /// Registry names followed by flow evaluator names.
    pub fn available(&self) -> Vec<String> {
        let mut names = self.registry.available();
        if let Some(flows) = &self.flows {
            names.extend(flows.available());
        }
        names
    }
}

impl fmt::Debug for EvaluatorResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluatorResolver")
            .field("available", &self.available())
            .finish()
    }
}
