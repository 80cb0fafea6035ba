//! Evaluation subsystem.
//!
//! This module provides:
//! - The evaluator contract ([`Evaluator`], [`EvaluatorOutput`], [`MetricValue`])
//! - A loose equivalence scorer for arbitrary JSON values
//! - Built-in heuristic evaluators
//! - Evaluator resolution from a name registry and from evaluator directories
//! - Metric sanitization and the local evaluation service

pub mod builtin;
pub mod equivalence;
pub mod flow;
pub mod metric;
pub mod registry;
pub mod sanitize;
pub mod service;

pub use equivalence::{EquivalenceScore, Normalized};
pub use flow::{DirectoryFlowLoader, FlowCallable, FlowEntryCatalog, FlowEvaluatorWrapper};
pub use metric::{Evaluator, EvaluatorOutput, MetricMap, MetricValue};
pub use registry::{EvaluatorFactory, EvaluatorRegistry, EvaluatorResolver};
pub use sanitize::{Coerced, coerce};
pub use service::{EvaluationReport, EvaluatorFailure, LocalEvaluationService};
