//! Experiment harness: run a processor over dataset rows and score the results.
//!
//! # Overview
//!
//! A run is described by an experiment file naming a dataset version, an
//! executable and a list of evaluators:
//! 1. Rows are loaded from `<dataset_root>/<name>/<version>/*.jsonl`
//! 2. The executable produces a `data_output` for every row (failures stay on the row)
//! 3. Each evaluator scores the batch; its metrics are sanitized to finite
//!    numbers and attached to the rows
//! 4. Rows, the per-evaluator summary and any side reports are written under
//!    `<artifact_root>/<name>/<version>/<experiment_id>/`
//!
//! # Quick Start
//!
//! ```no_run
//! use experiment_harness::{Orchestrator, Settings};
//! use std::path::Path;
//!
//! fn main() -> anyhow::Result<()> {
//!     let orchestrator = Orchestrator::new(Settings::load());
//!     let experiment_id = orchestrator.run(Path::new("experiment.yaml"))?;
//!     println!("finished {}", experiment_id);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Equivalence scorer**: graded similarity between a response and its ground truth
//! - **Evaluators**: built-in batch evaluators plus flow evaluators discovered on disk
//! - **Resolver**: maps an evaluator config to an instance from either source
//! - **Sanitizer**: turns arbitrary metric values into finite numbers with diagnostics
//! - **LocalEvaluationService**: runs evaluators in isolation and merges their metrics

pub mod config;
pub mod dataset;
pub mod error;
pub mod eval;
pub mod executable;
pub mod model;
pub mod orchestrator;
pub mod persistence;
pub mod script;

// Re-export commonly used types
pub use config::{EvaluatorConfig, ExperimentConfig, Settings};
pub use dataset::{Dataset, DatasetStore};
pub use error::{EvaluatorError, HarnessError, Result};
pub use eval::{Evaluator, EvaluatorOutput, EvaluatorResolver, LocalEvaluationService, MetricValue};
pub use model::{EvaluationResult, Row};
pub use orchestrator::{Orchestrator, RunOutcome};
