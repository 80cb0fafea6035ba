//! Adapts a row-by-row flow callable to the batch [`Evaluator`] contract.

use super::callable::FlowCallable;
use super::manifest::FlowManifest;
use crate::config::EvaluatorConfig;
use crate::error::{EvaluatorError, FlowError};
use crate::eval::metric::{Evaluator, EvaluatorOutput, MetricMap, MetricValue};
use crate::metrics;
use crate::model::{Record, Row};
use crate::script::non_finite_value;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;

pub struct FlowEvaluatorWrapper {
    config: EvaluatorConfig,
    manifest: Arc<FlowManifest>,
    callable: Arc<dyn FlowCallable>,
}

impl FlowEvaluatorWrapper {
    pub fn new(
        config: EvaluatorConfig,
        manifest: Arc<FlowManifest>,
        callable: Arc<dyn FlowCallable>,
    ) -> Self {
        Self {
            config,
            manifest,
            callable,
        }
    }

    pub fn manifest(&self) -> &FlowManifest {
        &self.manifest
    }

    /// Keyword arguments for one row.
    ///
    /// `response` and `ground_truth` come first, then every `data_input`
    /// field. Each `data_mapping` entry then points a flow input at one of
    /// `data_output`, `expected_output`, `response`, `ground_truth` or an
    /// input field; mappings to unknown fields are ignored.
    pub fn build_inputs(&self, row: &Row) -> Record {
        let output = row.data_output.clone().unwrap_or(Value::Null);
        let expected = row.expected_output.clone().unwrap_or(Value::Null);

        let mut kwargs = Record::new();
        kwargs.insert("response".to_string(), output.clone());
        kwargs.insert("ground_truth".to_string(), expected.clone());
        for (key, value) in &row.data_input {
            kwargs.insert(key.clone(), value.clone());
        }

        if !self.config.data_mapping.is_empty() {
            let mut available = Record::new();
            available.insert("data_output".to_string(), output.clone());
            available.insert("expected_output".to_string(), expected.clone());
            available.insert("response".to_string(), output);
            available.insert("ground_truth".to_string(), expected);
            for (key, value) in &row.data_input {
                available.insert(key.clone(), value.clone());
            }

            for (flow_key, row_key) in &self.config.data_mapping {
                if let Some(value) = available.get(row_key) {
                    kwargs.insert(flow_key.clone(), value.clone());
                }
            }
        }

        kwargs
    }

    /// Invoke the flow for one row and keep its numeric fields.
    pub fn evaluate_row(&self, row: &Row) -> Result<MetricMap, FlowError> {
        let kwargs = self.build_inputs(row);
        let result = self.callable.call(&kwargs)?;
        Ok(numeric_fields(result))
    }
}

/// Numbers and booleans become metrics; other fields are descriptive and dropped.
/// A missing `score` is filled from the first numeric field. Scalars become `score`.
/// Non-finite markers from the script bridge come back as NaN or infinities.
fn numeric_fields(result: Value) -> MetricMap {
    if let Some(x) = non_finite_value(&result) {
        return metrics! { "score" => x };
    }
    let fields = match result {
        Value::Object(fields) => fields,
        Value::Number(n) => return metrics! { "score" => n.as_f64().unwrap_or(0.0) },
        Value::Bool(b) => return metrics! { "score" => if b { 1.0 } else { 0.0 } },
        _ => return metrics! { "score" => 0.0 },
    };

    let mut metrics = MetricMap::new();
    for (key, value) in fields {
        let numeric = match value {
            Value::Number(n) => n.as_f64(),
            Value::Bool(b) => Some(if b { 1.0 } else { 0.0 }),
            ref other => non_finite_value(other),
        };
        if let Some(x) = numeric {
            metrics.insert(key, MetricValue::Numeric(x));
        }
    }

    if !metrics.contains_key("score") {
        if let Some(first) = metrics.values().next().cloned() {
            metrics.insert("score".to_string(), first);
        }
    }
    metrics
}

impl Evaluator for FlowEvaluatorWrapper {
    fn name(&self) -> &str {
        self.config.display_name()
    }

    fn evaluate(&self, rows: &[Row]) -> Result<EvaluatorOutput, EvaluatorError> {
        let mut output = EvaluatorOutput::new(self.name());
        let mut totals: IndexMap<String, f64> = IndexMap::new();

        for row in rows {
            let row_metrics = match self.evaluate_row(row) {
                Ok(metrics) => metrics,
                Err(e) => {
                    tracing::warn!(
                        evaluator = self.name(),
                        row = %row.id,
                        kind = e.kind(),
                        "Flow evaluator failed on row: {}",
                        e
                    );
                    output.record_row_error(&row.id, format!("Flow evaluator failed: {}", e));
                    metrics! { "error" => 1.0, "score" => 0.0 }
                }
            };

            for (key, value) in &row_metrics {
                if let Some(x) = value.as_numeric() {
                    *totals.entry(key.clone()).or_insert(0.0) += x;
                }
            }
            output.insert_row(&row.id, row_metrics);
        }

        let count = rows.len() as f64;
        for (key, total) in totals {
            output.summary.insert(key, MetricValue::Numeric(total / count));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::flow::callable::EquivalenceFlow;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::path::Path;

    fn manifest() -> Arc<FlowManifest> {
        Arc::new(
            FlowManifest::parse(
                "inputs: {response: {}, ground_truth: {}}\nentry: equivalent:EquivalentEvaluator\n",
                Path::new("flow.flex.yaml"),
            )
            .unwrap(),
        )
    }

    struct Scripted(fn(&Record) -> Result<Value, FlowError>);

    impl FlowCallable for Scripted {
        fn call(&self, kwargs: &Record) -> Result<Value, FlowError> {
            (self.0)(kwargs)
        }
    }

    fn row(id: &str, output: Value, expected: Value) -> Row {
        let mut input = Record::new();
        input.insert("question".into(), json!("q"));
        input.insert("alt_answer".into(), json!("alt"));
        Row::new(id, input).with_output(output).with_expected(expected)
    }

    #[test]
    fn test_build_inputs_with_mapping() {
        let config = EvaluatorConfig::new("f", "flow")
            .with_mapping("ground_truth", "alt_answer")
            .with_mapping("prediction", "data_output")
            .with_mapping("ignored", "no_such_field");
        let wrapper = FlowEvaluatorWrapper::new(config, manifest(), Arc::new(EquivalenceFlow));
        let kwargs = wrapper.build_inputs(&row("r", json!("out"), json!("truth")));

        assert_eq!(kwargs["response"], json!("out"));
        assert_eq!(kwargs["ground_truth"], json!("alt"));
        assert_eq!(kwargs["prediction"], json!("out"));
        assert_eq!(kwargs["question"], json!("q"));
        assert!(!kwargs.contains_key("ignored"));
    }

    #[test]
    fn test_numeric_fields() {
        let metrics = numeric_fields(json!({"exact": true, "similarity": 0.5, "notes": "x"}));
        assert_eq!(metrics["exact"].as_numeric(), Some(1.0));
        assert!(!metrics.contains_key("notes"));
        // first numeric field becomes the score
        assert_eq!(metrics["score"].as_numeric(), Some(1.0));

        assert_eq!(numeric_fields(json!(0.25))["score"].as_numeric(), Some(0.25));
        assert_eq!(numeric_fields(json!("text"))["score"].as_numeric(), Some(0.0));
        assert!(numeric_fields(json!({"notes": "only text"})).is_empty());
    }

    #[test]
    fn test_non_finite_markers_become_metrics() {
        let metrics = numeric_fields(json!({"score": {"__non_finite__": "NaN"}, "other": 0.5}));
        assert!(metrics["score"].as_numeric().unwrap().is_nan());
        assert_eq!(metrics["other"].as_numeric(), Some(0.5));

        let scalar = numeric_fields(json!({"__non_finite__": "Infinity"}));
        assert_eq!(scalar["score"].as_numeric(), Some(f64::INFINITY));

        let unrelated = numeric_fields(json!({"detail": {"nested": 1}, "ok": 1}));
        assert!(!unrelated.contains_key("detail"));
    }

    #[test]
    fn test_evaluate_averages_and_isolates_failures() {
        let flaky = Scripted(|kwargs| {
            if kwargs["response"] == json!("boom") {
                Err(FlowError::InvalidOutput("exploded".into()))
            } else {
                Ok(json!({"score": 1.0, "notes": "fine"}))
            }
        });
        let wrapper = FlowEvaluatorWrapper::new(
            EvaluatorConfig::new("f", "flaky"),
            manifest(),
            Arc::new(flaky),
        );
        let rows = vec![row("ok", json!("fine"), json!("x")), row("bad", json!("boom"), json!("x"))];
        let output = wrapper.evaluate(&rows).unwrap();

        assert_eq!(output.name, "flaky");
        assert_eq!(output.per_row["bad"]["error"].as_numeric(), Some(1.0));
        assert_eq!(output.per_row["bad"]["score"].as_numeric(), Some(0.0));
        assert!(!output.per_row["bad"].contains_key("evaluation_error"));
        assert!(output.row_errors["bad"].contains("exploded"));
        assert!(!output.row_errors.contains_key("ok"));
        assert_eq!(output.summary["score"].as_numeric(), Some(0.5));
        assert_eq!(output.summary["error"].as_numeric(), Some(0.5));
        assert!(!output.summary.contains_key("evaluation_error"));
    }

    #[test]
    fn test_equivalence_flow_end_to_end() {
        let wrapper = FlowEvaluatorWrapper::new(
            EvaluatorConfig {
                id: "eq".into(),
                name: "equivalent".into(),
                data_mapping: BTreeMap::new(),
            },
            manifest(),
            Arc::new(EquivalenceFlow),
        );
        let rows = vec![
            row("a", json!({"value": 1}), json!({"value": 1})),
            row("b", json!(90), json!(100)),
        ];
        let output = wrapper.evaluate(&rows).unwrap();
        assert_eq!(output.per_row["a"]["score"].as_numeric(), Some(1.0));
        assert_eq!(output.per_row["a"]["exact"].as_numeric(), Some(1.0));
        assert_eq!(output.per_row["b"]["score"].as_numeric(), Some(0.9));
        let mean = output.summary["score"].as_numeric().unwrap();
        assert!((mean - 0.95).abs() < 1e-9);
    }
}
