//! Persistence layer for run artifacts.
//!
//! Every run writes into `<artifact_root>/<dataset>/<version>/<experiment_id>/`.
//! JSON documents are pretty-printed; row sets are JSON Lines.

use crate::config::{EvaluatorConfig, ExperimentConfig};
use crate::error::{HarnessError, Result};
use crate::dataset::ensure_unique_ids;
use crate::eval::EvaluationReport;
use crate::model::Row;
use serde::Serialize;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const EXECUTION_ROWS_FILENAME: &str = "data.jsonl";
pub const EXECUTION_CONFIG_JSON: &str = "config.json";
pub const EXECUTION_CONFIG_YAML: &str = "config.yaml";

pub const EVALUATED_ROWS_FILENAME: &str = "rows.jsonl";
pub const EXPERIMENT_CONFIG_FILENAME: &str = "experiment_config.json";
pub const EVALUATORS_FILENAME: &str = "evaluators.json";
pub const SUMMARY_FILENAME: &str = "local_metrics_summary.json";
pub const ERRORS_FILENAME: &str = "evaluation_errors.json";
pub const NON_NUMERIC_FILENAME: &str = "non_numeric_metrics.json";

/// Directory for one run.
pub fn run_dir(root: &Path, dataset: &str, version: &str, experiment_id: &str) -> PathBuf {
    root.join(dataset).join(version).join(experiment_id)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| HarnessError::io(parent, e))?;
        }
    }
    Ok(())
}

/// Write a value as pretty JSON, creating the parent directory if needed.
pub fn write_json_pretty<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let data = serde_json::to_string_pretty(value)?;
    fs::write(path, data).map_err(|e| HarnessError::io(path, e))
}

pub fn write_yaml<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let data = serde_yaml::to_string(value)?;
    fs::write(path, data).map_err(|e| HarnessError::io(path, e))
}

/// Write one compact JSON document per line.
pub fn write_jsonl<T: Serialize>(items: &[T], path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let file = fs::File::create(path).map_err(|e| HarnessError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    for item in items {
        serde_json::to_writer(&mut writer, item)?;
        writer.write_all(b"\n").map_err(|e| HarnessError::io(path, e))?;
    }
    writer.flush().map_err(|e| HarnessError::io(path, e))
}

/// Read rows back from a JSON Lines artifact. Blank lines are skipped and
/// repeated ids are made unique.
pub fn load_rows(path: &Path) -> Result<Vec<Row>> {
    let content = fs::read_to_string(path).map_err(|e| HarnessError::io(path, e))?;
    let mut rows = content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str::<Row>(line).map_err(|e| HarnessError::MalformedRecord {
                path: path.to_path_buf(),
                line: index + 1,
                message: e.to_string(),
            })
        })
        .collect::<Result<Vec<Row>>>()?;
    ensure_unique_ids(&mut rows);
    Ok(rows)
}

/// Artifacts of the execution stage: rows plus the config as JSON and YAML.
pub fn persist_execution(dir: &Path, rows: &[Row], config: &ExperimentConfig) -> Result<()> {
    write_jsonl(rows, &dir.join(EXECUTION_ROWS_FILENAME))?;
    write_json_pretty(config, &dir.join(EXECUTION_CONFIG_JSON))?;
    write_yaml(config, &dir.join(EXECUTION_CONFIG_YAML))?;
    tracing::info!("Saved {} executed rows to {}", rows.len(), dir.display());
    Ok(())
}

/// Artifacts of the evaluation stage. The errors and non-numeric files are
/// written only when there is something to report.
pub fn persist_evaluation(
    dir: &Path,
    rows: &[Row],
    config: Option<&ExperimentConfig>,
    evaluators: &[EvaluatorConfig],
    report: &EvaluationReport,
) -> Result<()> {
    write_jsonl(rows, &dir.join(EVALUATED_ROWS_FILENAME))?;
    if let Some(config) = config {
        write_json_pretty(config, &dir.join(EXPERIMENT_CONFIG_FILENAME))?;
    }
    write_json_pretty(evaluators, &dir.join(EVALUATORS_FILENAME))?;
    write_json_pretty(&report.summary, &dir.join(SUMMARY_FILENAME))?;

    if report.has_errors() {
        write_json_pretty(&report.errors_json(), &dir.join(ERRORS_FILENAME))?;
        tracing::warn!(
            "Evaluation errors recorded in {}",
            dir.join(ERRORS_FILENAME).display()
        );
    }
    if !report.non_numeric.is_empty() {
        write_json_pretty(&report.non_numeric, &dir.join(NON_NUMERIC_FILENAME))?;
        tracing::info!(
            "Non-numeric metric values recorded in {}",
            dir.join(NON_NUMERIC_FILENAME).display()
        );
    }

    tracing::info!("Saved evaluation results to {}", dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::EvaluatorFailure;
    use crate::model::Record;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    fn sample_config() -> ExperimentConfig {
        serde_yaml::from_str(
            "dataset: {name: math, version: v1}\nexecutable: {type: module, path: builtin.math, processor: run}\n",
        )
        .unwrap()
    }

    fn rows() -> Vec<Row> {
        vec![
            Row::new("a", Record::new()).with_output(json!("1")),
            Row::new("b", Record::new()).with_expected(json!(2)),
        ]
    }

    #[test]
    fn test_run_dir_layout() {
        assert_eq!(
            run_dir(Path::new("/out"), "math", "v1", "exp123"),
            PathBuf::from("/out/math/v1/exp123")
        );
    }

    #[test]
    fn test_execution_artifacts_round_trip() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("nested").join("run");
        persist_execution(&dir, &rows(), &sample_config()).unwrap();

        let loaded = load_rows(&dir.join(EXECUTION_ROWS_FILENAME)).unwrap();
        assert_eq!(loaded, rows());

        let yaml = fs::read_to_string(dir.join(EXECUTION_CONFIG_YAML)).unwrap();
        let reparsed: ExperimentConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(reparsed, sample_config());
        assert!(dir.join(EXECUTION_CONFIG_JSON).is_file());
    }

    #[test]
    fn test_side_artifacts_only_when_needed() {
        let tmp = TempDir::new().unwrap();
        let evaluators = vec![EvaluatorConfig::new("eq", "equivalent")];

        let clean = tmp.path().join("clean");
        persist_evaluation(&clean, &rows(), None, &evaluators, &EvaluationReport::default()).unwrap();
        assert!(clean.join(SUMMARY_FILENAME).is_file());
        assert!(clean.join(EVALUATORS_FILENAME).is_file());
        assert!(!clean.join(EXPERIMENT_CONFIG_FILENAME).exists());
        assert!(!clean.join(ERRORS_FILENAME).exists());
        assert!(!clean.join(NON_NUMERIC_FILENAME).exists());

        let mut report = EvaluationReport::default();
        report.failures.push(EvaluatorFailure {
            evaluator: "broken".into(),
            error_type: "panic".into(),
            message: "boom".into(),
        });
        let dirty = tmp.path().join("dirty");
        persist_evaluation(&dirty, &rows(), Some(&sample_config()), &evaluators, &report).unwrap();

        let errors: Value =
            serde_json::from_str(&fs::read_to_string(dirty.join(ERRORS_FILENAME)).unwrap()).unwrap();
        assert_eq!(errors["failures"][0]["evaluator"], json!("broken"));
        assert!(dirty.join(EXPERIMENT_CONFIG_FILENAME).is_file());
        assert!(!dirty.join(NON_NUMERIC_FILENAME).exists());
    }

    #[test]
    fn test_reevaluating_an_artifact_keeps_rows_and_summary_in_step() {
        use crate::eval::{EvaluatorRegistry, EvaluatorResolver, LocalEvaluationService};

        let tmp = TempDir::new().unwrap();
        let service = LocalEvaluationService::new(EvaluatorResolver::new(EvaluatorRegistry::with_builtins()));
        let evaluators = vec![EvaluatorConfig::new("eq", "equivalent")];

        let mut rows = vec![
            Row::new("a", Record::new()).with_output(json!("x")).with_expected(json!("x")),
            Row::new("b", Record::new()).with_output(json!("y")).with_expected(json!("z")),
        ];
        let first = tmp.path().join("first");
        let report = service.evaluate(&mut rows, &evaluators);
        persist_evaluation(&first, &rows, None, &evaluators, &report).unwrap();

        let mut reloaded = load_rows(&first.join(EVALUATED_ROWS_FILENAME)).unwrap();
        reloaded[1].expected_output = Some(json!("y"));
        let second = tmp.path().join("second");
        let report = service.evaluate(&mut reloaded, &evaluators);
        persist_evaluation(&second, &reloaded, None, &evaluators, &report).unwrap();

        let rows = load_rows(&second.join(EVALUATED_ROWS_FILENAME)).unwrap();
        let summary: Value =
            serde_json::from_str(&fs::read_to_string(second.join(SUMMARY_FILENAME)).unwrap()).unwrap();
        let mean = rows
            .iter()
            .map(|r| r.evaluation_results["equivalent:match"].metric_value)
            .sum::<f64>()
            / rows.len() as f64;
        assert_eq!(summary["equivalent"]["accuracy"], json!(1.0));
        assert_eq!(mean, 1.0);
    }

    #[test]
    fn test_load_rows_makes_ids_unique() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rows.jsonl");
        fs::write(&path, "{\"id\": \"a\"}\n{\"id\": \"a\"}\n").unwrap();
        let rows = load_rows(&path).unwrap();
        assert_eq!(rows[0].id, "a");
        assert_eq!(rows[1].id, "a_1");
    }

    #[test]
    fn test_load_rows_reports_bad_line() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rows.jsonl");
        fs::write(&path, "{\"id\": \"a\"}\n\nnot json\n").unwrap();
        match load_rows(&path).unwrap_err() {
            HarnessError::MalformedRecord { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {other}"),
        }
    }
}
