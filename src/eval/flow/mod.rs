//! Directory-discovered flow evaluators.
//!
//! A flow evaluator lives in its own directory:
//!
//! ```text
//! evaluators/
//!   equivalent/
//!     flow.flex.yaml      # inputs, entry: "equivalent:EquivalentEvaluator", environment
//!     equivalent.py
//! ```
//!
//! Flows are called once per row with keyword arguments; [`FlowEvaluatorWrapper`]
//! turns that into the batch evaluator contract.

pub mod callable;
pub mod loader;
pub mod manifest;
pub mod wrapper;

pub use callable::{EquivalenceFlow, FlowCallable, FlowEntryCatalog, ScriptFlow};
pub use loader::{DirectoryFlowLoader, LoadedFlow};
pub use manifest::{FLOW_MANIFEST_FILENAME, FlowManifest};
pub use wrapper::FlowEvaluatorWrapper;
