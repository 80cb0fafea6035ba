//! Local evaluation: resolve, run, sanitize, attach.
//!
//! [`LocalEvaluationService::evaluate`] never fails. Unknown evaluators are
//! skipped, an evaluator that errors or panics contributes an empty summary,
//! and every metric lands on the rows as a finite number. Values that needed
//! a lossy conversion are kept in the [`NonNumericLog`] and in each row's
//! `metadata.non_numeric_metrics`.

use super::flow::DirectoryFlowLoader;
use super::metric::{Evaluator, EvaluatorOutput};
use super::registry::{EvaluatorRegistry, EvaluatorResolver};
use super::sanitize::{SanitizedMetric, sanitize_metrics};
use crate::config::{EvaluatorConfig, Settings};
use crate::error::EvaluatorError;
use crate::model::{EvaluationResult, Record, Row};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Evaluator name -> metric name -> value.
pub type SummaryTable = IndexMap<String, IndexMap<String, f64>>;

/// An evaluator whose batch run failed outright.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluatorFailure {
    pub evaluator: String,
    pub error_type: String,
    pub message: String,
}

/// Original value of a metric that needed a lossy conversion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NonNumericEntry {
    pub value: Value,
    pub diagnostic: String,
}

type MetricEntries = IndexMap<String, NonNumericEntry>;

/// Every diagnostic raised during sanitization.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NonNumericLog {
    /// Evaluator -> metric -> entry.
    pub summary: IndexMap<String, MetricEntries>,
    /// Row id -> evaluator -> metric -> entry.
    pub rows: IndexMap<String, IndexMap<String, MetricEntries>>,
}

impl NonNumericLog {
    pub fn is_empty(&self) -> bool {
        self.summary.is_empty() && self.rows.is_empty()
    }
}

/// Everything one evaluation pass produced besides the mutated rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub summary: SummaryTable,
    pub failures: Vec<EvaluatorFailure>,
    /// Display names of evaluator entries nothing could resolve.
    pub unresolved: Vec<String>,
    pub non_numeric: NonNumericLog,
}

impl EvaluationReport {
    /// True when an evaluator failed or could not be resolved.
    pub fn has_errors(&self) -> bool {
        !self.failures.is_empty() || !self.unresolved.is_empty()
    }

    /// Document for the errors artifact.
    pub fn errors_json(&self) -> Value {
        json!({
            "failures": self.failures,
            "unresolved": self.unresolved,
        })
    }
}

pub struct LocalEvaluationService {
    resolver: EvaluatorResolver,
}

impl LocalEvaluationService {
    pub fn new(resolver: EvaluatorResolver) -> Self {
        Self { resolver }
    }

    /// Built-in evaluators plus flow evaluators from the settings' directories.
    pub fn from_settings(settings: &Settings) -> Self {
        let resolver = EvaluatorResolver::new(EvaluatorRegistry::with_builtins())
            .with_flows(DirectoryFlowLoader::from_settings(settings));
        Self::new(resolver)
    }

    pub fn resolver(&self) -> &EvaluatorResolver {
        &self.resolver
    }

    /// Run every configured evaluator, in order, over `rows`.
    ///
    /// Only `evaluation_results` and `metadata` of the rows are touched. Results
    /// an evaluator left on the rows in an earlier pass are replaced.
    pub fn evaluate(&self, rows: &mut [Row], configs: &[EvaluatorConfig]) -> EvaluationReport {
        let mut report = EvaluationReport::default();
        let mut seen = HashSet::new();

        for config in configs {
            let Some(evaluator) = self.resolver.resolve(config) else {
                tracing::warn!(
                    "Evaluator '{}' could not be resolved; skipping",
                    config.display_name()
                );
                report.unresolved.push(config.display_name().to_string());
                continue;
            };

            let name = evaluator.name().to_string();
            if !seen.insert(name.clone()) {
                tracing::warn!("Evaluator name '{}' already used in this run; skipping", name);
                continue;
            }

            let stale: usize = rows.iter_mut().map(|row| row.clear_evaluator(&name)).sum();
            if stale > 0 {
                tracing::info!(evaluator = %name, stale, "Replacing results from an earlier evaluation");
            }

            tracing::info!(evaluator = %name, rows = rows.len(), "Running evaluator");
            match run_guarded(evaluator.as_ref(), rows) {
                Ok(output) => apply_output(&name, &output, rows, &mut report),
                Err(e) => {
                    tracing::error!(
                        evaluator = %name,
                        kind = e.kind(),
                        "Evaluator failed: {}",
                        e
                    );
                    report.failures.push(EvaluatorFailure {
                        evaluator: name.clone(),
                        error_type: e.kind().to_string(),
                        message: e.to_string(),
                    });
                    report.summary.insert(name, IndexMap::new());
                }
            }
        }

        report
    }
}

/// Run an evaluator, turning a panic into [`EvaluatorError::Panic`].
pub fn run_guarded(evaluator: &dyn Evaluator, rows: &[Row]) -> Result<EvaluatorOutput, EvaluatorError> {
    match catch_unwind(AssertUnwindSafe(|| evaluator.evaluate(rows))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            Err(EvaluatorError::Panic(message))
        }
    }
}

fn apply_output(name: &str, output: &EvaluatorOutput, rows: &mut [Row], report: &mut EvaluationReport) {
    let mut summary = IndexMap::new();
    for metric in sanitize_metrics(&output.summary, &format!("{} summary", name)) {
        if let Some(diagnostic) = &metric.diagnostic {
            report
                .non_numeric
                .summary
                .entry(name.to_string())
                .or_default()
                .insert(
                    metric.metric.clone(),
                    NonNumericEntry {
                        value: metric.original.to_json(),
                        diagnostic: diagnostic.clone(),
                    },
                );
        }
        summary.insert(metric.metric, metric.value);
    }
    report.summary.insert(name.to_string(), summary);

    for row in rows.iter_mut() {
        if let Some(message) = output.row_errors.get(&row.id) {
            row.record_evaluation_error(name, message.as_str());
        }
        let Some(metrics) = output.per_row.get(&row.id) else {
            continue;
        };
        for metric in sanitize_metrics(metrics, &format!("{} row {}", name, row.id)) {
            attach_metric(name, metric, row, report);
        }
    }

    let known: HashSet<&str> = rows.iter().map(|r| r.id.as_str()).collect();
    let stray = output.per_row.keys().filter(|id| !known.contains(id.as_str())).count();
    if stray > 0 {
        tracing::debug!(evaluator = name, stray, "Ignoring per-row metrics for unknown row ids");
    }
}

fn attach_metric(name: &str, metric: SanitizedMetric, row: &mut Row, report: &mut EvaluationReport) {
    let key = format!("{}:{}", name, metric.metric);

    let mut metadata = Record::new();
    metadata.insert("evaluator".to_string(), Value::String(name.to_string()));
    if let Some(diagnostic) = &metric.diagnostic {
        metadata.insert("diagnostic".to_string(), Value::String(diagnostic.clone()));

        let original = metric.original.to_json();
        row.record_non_numeric(name, &metric.metric, original.clone());
        report
            .non_numeric
            .rows
            .entry(row.id.clone())
            .or_default()
            .entry(name.to_string())
            .or_default()
            .insert(
                metric.metric.clone(),
                NonNumericEntry {
                    value: original,
                    diagnostic: diagnostic.clone(),
                },
            );
    }

    let result = EvaluationResult {
        metric_name: key.clone(),
        metric_value: metric.value,
        metadata,
    };
    if !row.attach_result(key.clone(), result) {
        tracing::warn!(row = %row.id, "Metric '{}' already attached; keeping the first value", key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::MetricValue;
    use crate::metrics;
    use serde_json::json;

    struct Fixed {
        name: &'static str,
        row_metrics: fn() -> crate::eval::MetricMap,
    }

    impl Evaluator for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn evaluate(&self, rows: &[Row]) -> Result<EvaluatorOutput, EvaluatorError> {
            let mut output = EvaluatorOutput::new(self.name).with_summary("rows", rows.len());
            for row in rows {
                output.insert_row(&row.id, (self.row_metrics)());
            }
            Ok(output)
        }
    }

    struct Failing;

    impl Evaluator for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn evaluate(&self, _rows: &[Row]) -> Result<EvaluatorOutput, EvaluatorError> {
            Err(EvaluatorError::InvalidInput("no usable rows".into()))
        }
    }

    struct Panicking;

    impl Evaluator for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn evaluate(&self, _rows: &[Row]) -> Result<EvaluatorOutput, EvaluatorError> {
            panic!("evaluator blew up")
        }
    }

    fn service() -> LocalEvaluationService {
        let mut registry = EvaluatorRegistry::with_builtins();
        registry.register("failing", |_| Box::new(Failing));
        registry.register("panicking", |_| Box::new(Panicking));
        registry.register("judge", |_| {
            Box::new(Fixed {
                name: "judge",
                row_metrics: || {
                    metrics! {
                        "score" => f64::INFINITY,
                        "category" => "good",
                        "flag" => true,
                    }
                },
            })
        });
        LocalEvaluationService::new(EvaluatorResolver::new(registry))
    }

    fn scenario_rows() -> Vec<Row> {
        vec![
            Row::new("r1", Record::new())
                .with_expected(json!({"value": 1}))
                .with_output(json!({"value": 1})),
            Row::new("r2", Record::new())
                .with_expected(json!({"value": 4}))
                .with_output(json!({"value": 3})),
        ]
    }

    #[test]
    fn test_equivalence_scenario() {
        let mut rows = scenario_rows();
        let report = service().evaluate(&mut rows, &[EvaluatorConfig::new("eq", "equivalent")]);

        assert_eq!(rows[0].evaluation_results["equivalent:match"].metric_value, 1.0);
        assert_eq!(rows[1].evaluation_results["equivalent:match"].metric_value, 0.0);
        assert_eq!(report.summary["equivalent"]["accuracy"], 0.5);
        assert!(!report.has_errors());
        assert!(report.non_numeric.is_empty());

        let result = &rows[0].evaluation_results["equivalent:score"];
        assert_eq!(result.metric_name, "equivalent:score");
        assert_eq!(result.metadata["evaluator"], json!("equivalent"));
        assert!(!result.metadata.contains_key("diagnostic"));
    }

    #[test]
    fn test_non_numeric_routing() {
        let mut rows = scenario_rows();
        let report = service().evaluate(&mut rows, &[EvaluatorConfig::new("j", "judge")]);
        let row = &rows[0];

        let score = &row.evaluation_results["judge:score"];
        assert_eq!(score.metric_value, 0.0);
        assert!(score.metadata.contains_key("diagnostic"));
        assert_eq!(row.non_numeric_metric("judge", "score"), Some(&json!("Infinity")));

        assert_eq!(row.evaluation_results["judge:category"].metric_value, 0.0);
        assert_eq!(row.non_numeric_metric("judge", "category"), Some(&json!("good")));

        assert_eq!(row.evaluation_results["judge:flag"].metric_value, 1.0);
        assert_eq!(row.non_numeric_metric("judge", "flag"), Some(&json!(true)));

        let logged = &report.non_numeric.rows["r1"]["judge"]["category"];
        assert_eq!(logged.value, json!("good"));
        assert!(logged.diagnostic.contains("unparseable"));
        assert_eq!(report.summary["judge"]["rows"], 2.0);

        for row in &rows {
            for result in row.evaluation_results.values() {
                assert!(result.metric_value.is_finite());
            }
        }
    }

    #[test]
    fn test_failing_evaluators_are_isolated() {
        let mut rows = scenario_rows();
        let configs = vec![
            EvaluatorConfig::new("a", "failing"),
            EvaluatorConfig::new("b", "panicking"),
            EvaluatorConfig::new("c", "equivalent"),
        ];
        let report = service().evaluate(&mut rows, &configs);

        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].error_type, "invalid_input");
        assert_eq!(report.failures[1].error_type, "panic");
        assert!(report.failures[1].message.contains("evaluator blew up"));
        assert!(report.summary["failing"].is_empty());
        assert!(report.summary["panicking"].is_empty());

        assert_eq!(report.summary["equivalent"]["accuracy"], 0.5);
        assert_eq!(rows[0].evaluation_results.len(), 2);
        assert!(report.has_errors());
        assert_eq!(report.errors_json()["failures"][0]["evaluator"], json!("failing"));
    }

    #[test]
    fn test_unresolved_and_duplicate_names() {
        let mut rows = scenario_rows();
        let configs = vec![
            EvaluatorConfig::new("x", "does_not_exist"),
            EvaluatorConfig::new("eq1", "equivalent"),
            EvaluatorConfig::new("eq2", "equivalent"),
        ];
        let report = service().evaluate(&mut rows, &configs);

        assert_eq!(report.unresolved, vec!["does_not_exist".to_string()]);
        assert_eq!(report.summary.len(), 1);
        assert!(report.failures.is_empty());
        assert!(report.has_errors());
    }

    #[test]
    fn test_evaluation_leaves_outputs_untouched() {
        let mut rows = scenario_rows();
        let before: Vec<_> = rows
            .iter()
            .map(|r| (r.data_output.clone(), r.expected_output.clone(), r.data_input.clone()))
            .collect();
        let configs = vec![
            EvaluatorConfig::new("eq", "equivalent"),
            EvaluatorConfig::new("len", "response_length"),
            EvaluatorConfig::new("j", "judge"),
        ];
        service().evaluate(&mut rows, &configs);

        let after: Vec<_> = rows
            .iter()
            .map(|r| (r.data_output.clone(), r.expected_output.clone(), r.data_input.clone()))
            .collect();
        assert_eq!(before, after);
        assert!(rows[0].evaluation_results.contains_key("response_length:length"));
    }

    #[test]
    fn test_reevaluation_replaces_earlier_results() {
        let mut rows = scenario_rows();
        let configs = [EvaluatorConfig::new("eq", "equivalent"), EvaluatorConfig::new("j", "judge")];
        service().evaluate(&mut rows, &configs);

        // Simulate an artifact written before the outputs were corrected.
        rows[1].data_output = Some(json!({"value": 4}));
        let mut reloaded: Vec<Row> = rows
            .iter()
            .map(|row| serde_json::from_str(&serde_json::to_string(row).unwrap()).unwrap())
            .collect();

        let report = service().evaluate(&mut reloaded, &configs[..1]);
        assert_eq!(report.summary["equivalent"]["accuracy"], 1.0);
        assert_eq!(reloaded[1].evaluation_results["equivalent:match"].metric_value, 1.0);
        // Results of evaluators that were not re-run survive.
        assert!(reloaded[1].evaluation_results.contains_key("judge:score"));
        assert!(reloaded[1].non_numeric_metric("judge", "score").is_some());
    }

    struct PartlyFailing;

    impl Evaluator for PartlyFailing {
        fn name(&self) -> &str {
            "partly"
        }

        fn evaluate(&self, rows: &[Row]) -> Result<EvaluatorOutput, EvaluatorError> {
            let mut output = EvaluatorOutput::new("partly");
            for row in rows {
                if row.id == "r2" {
                    output.record_row_error(&row.id, "could not score r2");
                    output.insert_row(&row.id, metrics! { "error" => 1.0, "score" => 0.0 });
                } else {
                    output.insert_row(&row.id, metrics! { "score" => 1.0 });
                }
            }
            Ok(output)
        }
    }

    #[test]
    fn test_row_errors_go_to_metadata() {
        let mut registry = EvaluatorRegistry::new();
        registry.register("partly", |_| Box::new(PartlyFailing));
        let service = LocalEvaluationService::new(EvaluatorResolver::new(registry));
        let mut rows = scenario_rows();
        let report = service.evaluate(&mut rows, &[EvaluatorConfig::new("p", "partly")]);

        let keys: Vec<&str> = rows[1].evaluation_results.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["partly:error", "partly:score"]);
        assert_eq!(
            rows[1].metadata[crate::model::EVALUATION_ERRORS_KEY]["partly"],
            json!("could not score r2")
        );
        assert!(!rows[0].metadata.contains_key(crate::model::EVALUATION_ERRORS_KEY));
        assert!(report.non_numeric.is_empty());
    }

    struct SummaryOnly;

    impl Evaluator for SummaryOnly {
        fn name(&self) -> &str {
            "labeler"
        }

        fn evaluate(&self, _rows: &[Row]) -> Result<EvaluatorOutput, EvaluatorError> {
            Ok(EvaluatorOutput::new("labeler")
                .with_summary("mean", 0.5)
                .with_summary("label", "high")
                .with_summary("missing", MetricValue::null()))
        }
    }

    #[test]
    fn test_summary_diagnostics_are_logged() {
        let mut registry = EvaluatorRegistry::new();
        registry.register("labeler", |_| Box::new(SummaryOnly));
        let service = LocalEvaluationService::new(EvaluatorResolver::new(registry));
        let mut rows = scenario_rows();
        let report = service.evaluate(&mut rows, &[EvaluatorConfig::new("l", "labeler")]);

        let summary = &report.summary["labeler"];
        assert_eq!(summary["mean"], 0.5);
        assert_eq!(summary["label"], 0.0);
        assert_eq!(summary["missing"], 0.0);

        let logged = &report.non_numeric.summary["labeler"];
        assert_eq!(logged["label"].value, json!("high"));
        assert_eq!(logged["missing"].value, Value::Null);
        assert!(!logged.contains_key("mean"));
        assert!(report.non_numeric.rows.is_empty());
        assert!(rows[0].evaluation_results.is_empty());
    }
}
