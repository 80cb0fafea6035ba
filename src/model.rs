//! Rows and the results attached to them.
//!
//! A [`Row`] is created once per dataset record, receives its `data_output`
//! (or an error) from the execution step, then accumulates
//! `evaluation_results` and `metadata` during evaluation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Field map used for row inputs, metadata and keyword arguments.
pub type Record = serde_json::Map<String, Value>;

/// Metadata key under which non-coercible metric values are preserved.
pub const NON_NUMERIC_METRICS_KEY: &str = "non_numeric_metrics";

/// Metadata key under which per-row evaluator failure messages are kept.
pub const EVALUATION_ERRORS_KEY: &str = "evaluation_errors";

/// A structured error encountered while producing a row's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub message: String,
    #[serde(default)]
    pub code: i32,
}

/// One sanitized metric attached to a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// `"<evaluator_name>:<metric_name>"`.
    pub metric_name: String,
    /// Always finite.
    pub metric_value: f64,
    #[serde(default)]
    pub metadata: Record,
}

/// A single piece of input data alongside outputs and evaluation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Row {
    pub id: String,

    #[serde(default)]
    pub data_input: Record,

    #[serde(default)]
    pub expected_output: Option<Value>,

    #[serde(default)]
    pub data_output: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RowError>,

    #[serde(default)]
    pub evaluation_results: BTreeMap<String, EvaluationResult>,

    #[serde(default)]
    pub metadata: Record,
}

impl Row {
    /// Create a row with the given input fields.
    pub fn new(id: impl Into<String>, data_input: Record) -> Self {
        Self {
            id: id.into(),
            data_input,
            ..Default::default()
        }
    }

    /// Set the ground truth.
    pub fn with_expected(mut self, expected: Value) -> Self {
        self.expected_output = Some(expected);
        self
    }

    /// Set the produced output.
    pub fn with_output(mut self, output: Value) -> Self {
        self.data_output = Some(output);
        self
    }

    /// The produced output, treating an explicit JSON `null` as absent.
    pub fn output(&self) -> Option<&Value> {
        self.data_output.as_ref().filter(|v| !v.is_null())
    }

    /// The ground truth, treating an explicit JSON `null` as absent.
    pub fn expected(&self) -> Option<&Value> {
        self.expected_output.as_ref().filter(|v| !v.is_null())
    }

    /// Attach a result under `key`. Returns `false` (and keeps the existing
    /// entry) when the key is already taken.
    pub fn attach_result(&mut self, key: String, result: EvaluationResult) -> bool {
        match self.evaluation_results.entry(key) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(result);
                true
            }
        }
    }

    /// Preserve an original metric value under
    /// `metadata.non_numeric_metrics[evaluator][metric]`.
    pub fn record_non_numeric(&mut self, evaluator: &str, metric: &str, original: Value) {
        let store = self
            .metadata
            .entry(NON_NUMERIC_METRICS_KEY)
            .or_insert_with(|| Value::Object(Record::new()));
        if !store.is_object() {
            *store = Value::Object(Record::new());
        }
        if let Value::Object(by_evaluator) = store {
            let metrics = by_evaluator
                .entry(evaluator)
                .or_insert_with(|| Value::Object(Record::new()));
            if !metrics.is_object() {
                *metrics = Value::Object(Record::new());
            }
            if let Value::Object(metrics) = metrics {
                metrics.insert(metric.to_string(), original);
            }
        }
    }

    /// Look up a preserved original value.
    pub fn non_numeric_metric(&self, evaluator: &str, metric: &str) -> Option<&Value> {
        self.metadata
            .get(NON_NUMERIC_METRICS_KEY)?
            .get(evaluator)?
            .get(metric)
    }

    /// Record why `evaluator` could not score this row, under
    /// `metadata.evaluation_errors[evaluator]`.
    pub fn record_evaluation_error(&mut self, evaluator: &str, message: impl Into<String>) {
        let store = self
            .metadata
            .entry(EVALUATION_ERRORS_KEY)
            .or_insert_with(|| Value::Object(Record::new()));
        if !store.is_object() {
            *store = Value::Object(Record::new());
        }
        if let Value::Object(by_evaluator) = store {
            by_evaluator.insert(evaluator.to_string(), Value::String(message.into()));
        }
    }

    /// Drop everything a previous pass of `evaluator` left on this row: its
    /// `<evaluator>:*` results and its side-channel entries. Returns the
    /// number of results removed.
    pub fn clear_evaluator(&mut self, evaluator: &str) -> usize {
        let prefix = format!("{}:", evaluator);
        let before = self.evaluation_results.len();
        self.evaluation_results.retain(|key, _| !key.starts_with(&prefix));

        for key in [NON_NUMERIC_METRICS_KEY, EVALUATION_ERRORS_KEY] {
            let now_empty = match self.metadata.get_mut(key) {
                Some(Value::Object(by_evaluator)) => {
                    by_evaluator.remove(evaluator);
                    by_evaluator.is_empty()
                }
                _ => false,
            };
            if now_empty {
                self.metadata.remove(key);
            }
        }

        before - self.evaluation_results.len()
    }
}

/// Render a value as plain text: strings as-is, everything else as compact JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Truthiness of a value: null, false, zero, and empty strings/collections are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

/// Text of a row's output for heuristic evaluators; falsy outputs become empty.
pub fn output_text(row: &Row) -> String {
    match row.output() {
        Some(value) if is_truthy(value) => value_text(value),
        _ => String::new(),
    }
}
