//! End-to-end experiment runs: config, dataset, execution, evaluation, artifacts.

use crate::config::{ExperimentConfig, Settings};
use crate::dataset::{Dataset, DatasetStore};
use crate::error::Result;
use crate::eval::LocalEvaluationService;
use crate::executable::{ExecutionStats, ProcessorCatalog, execute_rows, resolve_executable};
use crate::persistence::{persist_evaluation, persist_execution, run_dir};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Attempts made to load a dataset before giving up.
pub const DATASET_LOAD_ATTEMPTS: u32 = 3;

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub experiment_id: String,
    pub run_dir: PathBuf,
    pub rows: usize,
    pub execution: ExecutionStats,
    /// False when evaluation artifacts could not be written.
    pub evaluated: bool,
}

/// Drives experiment runs against local storage.
pub struct Orchestrator {
    settings: Settings,
    store: DatasetStore,
    service: LocalEvaluationService,
    processors: ProcessorCatalog,
    retry_delay: Duration,
}

impl Orchestrator {
    pub fn new(settings: Settings) -> Self {
        Self {
            store: DatasetStore::new(&settings.dataset_root),
            service: LocalEvaluationService::from_settings(&settings),
            processors: ProcessorCatalog::with_builtins(),
            retry_delay: Duration::from_secs(1),
            settings,
        }
    }

    pub fn with_service(mut self, service: LocalEvaluationService) -> Self {
        self.service = service;
        self
    }

    pub fn with_processors(mut self, processors: ProcessorCatalog) -> Self {
        self.processors = processors;
        self
    }

    /// Initial delay between dataset load attempts; doubles after each failure.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn service(&self) -> &LocalEvaluationService {
        &self.service
    }

    /// Load the experiment file at `path` and run it. Returns the experiment id.
    pub fn run(&self, path: &Path) -> Result<String> {
        let config = ExperimentConfig::load(path)?;
        Ok(self.run_config(&config, None)?.experiment_id)
    }

    /// Validate `config`, resolve its executable and load its dataset without
    /// executing anything. Returns the number of rows a run would process.
    pub fn dry_run(&self, config: &ExperimentConfig, max_rows: Option<usize>) -> Result<usize> {
        config.validate()?;
        let executable = resolve_executable(&config.executable, &self.processors, &self.settings.python)?;
        let dataset = self.load_dataset(config)?;
        let rows = max_rows.map_or(dataset.len(), |limit| dataset.len().min(limit));
        tracing::info!("Dry run: {} rows would be executed with {}", rows, executable.describe());
        Ok(rows)
    }

    /// Run an already parsed experiment, optionally on the first `max_rows` rows.
    pub fn run_config(&self, config: &ExperimentConfig, max_rows: Option<usize>) -> Result<RunOutcome> {
        config.validate()?;
        if !config.local_mode {
            tracing::warn!("Remote execution is not available; running locally");
        }

        let executable = resolve_executable(&config.executable, &self.processors, &self.settings.python)?;

        let mut dataset = self.load_dataset(config)?;
        if let Some(limit) = max_rows {
            dataset = dataset.take(limit);
        }

        let experiment_id = new_experiment_id();
        let dir = run_dir(
            &config.artifact_root(&self.settings),
            &config.dataset.name,
            &config.dataset.version,
            &experiment_id,
        );
        tracing::info!("Starting {} as {}", config.describe(), experiment_id);

        let mut rows = dataset.rows;
        let execution = execute_rows(executable.as_ref(), &mut rows);
        persist_execution(&dir, &rows, config)?;

        let report = self.service.evaluate(&mut rows, &config.evaluators);
        let evaluated = match persist_evaluation(&dir, &rows, Some(config), &config.evaluators, &report) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to save evaluation results for {}: {}", experiment_id, e);
                false
            }
        };

        for (evaluator, metrics) in &report.summary {
            for (metric, value) in metrics {
                tracing::info!("{}:{} = {:.4}", evaluator, metric, value);
            }
        }
        tracing::info!("Experiment {} finished, results in {}", experiment_id, dir.display());

        Ok(RunOutcome {
            experiment_id,
            run_dir: dir,
            rows: rows.len(),
            execution,
            evaluated,
        })
    }

    fn load_dataset(&self, config: &ExperimentConfig) -> Result<Dataset> {
        let expected = config.dataset.config.expected_output_field.as_deref();
        let mut delay = self.retry_delay;
        let mut attempt = 1;
        loop {
            match self.store.load(&config.dataset.name, &config.dataset.version, expected) {
                Ok(dataset) => return Ok(dataset),
                Err(e) if attempt < DATASET_LOAD_ATTEMPTS => {
                    tracing::warn!(
                        "Dataset load attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt,
                        DATASET_LOAD_ATTEMPTS,
                        e,
                        delay
                    );
                    thread::sleep(delay);
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// `exp` followed by 12 hex characters.
pub fn new_experiment_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("exp{}", &hex[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;
    use crate::persistence::{
        ERRORS_FILENAME, EVALUATED_ROWS_FILENAME, EXECUTION_ROWS_FILENAME, SUMMARY_FILENAME, load_rows,
    };
    use serde_json::{Value, json};
    use std::fs;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
dataset:
  name: math
  version: v1
  config:
    expected_output_field: answer
executable:
  type: module
  path: builtin.math
  processor: run
evaluators:
  - id: eq
    name: equivalent
  - id: ghost
    name: no_such_evaluator
local_mode: true
"#;

    fn setup() -> (TempDir, Orchestrator) {
        let tmp = TempDir::new().unwrap();
        let data = tmp.path().join("datasets").join("math").join("v1");
        fs::create_dir_all(&data).unwrap();
        fs::write(
            data.join("questions.jsonl"),
            concat!(
                "{\"id\": \"q1\", \"question\": \"What is 2 + 3?\", \"answer\": 5}\n",
                "{\"id\": \"q2\", \"question\": \"What is 6 * 7?\", \"answer\": \"42\"}\n",
                "{\"id\": \"q3\", \"question\": \"What is 1 / 0?\", \"answer\": 0}\n",
            ),
        )
        .unwrap();

        let mut settings = Settings::with_roots(tmp.path().join("datasets"), tmp.path().join("out"));
        settings.evaluator_dirs = vec![tmp.path().join("evaluators")];
        let orchestrator = Orchestrator::new(settings).with_retry_delay(Duration::ZERO);
        (tmp, orchestrator)
    }

    #[test]
    fn test_end_to_end_run() {
        let (tmp, orchestrator) = setup();
        let config_path = tmp.path().join("experiment.yaml");
        fs::write(&config_path, CONFIG).unwrap();

        let id = orchestrator.run(&config_path).unwrap();
        assert!(id.starts_with("exp"));
        assert_eq!(id.len(), 15);

        let dir = tmp.path().join("out").join("math").join("v1").join(&id);
        let executed = load_rows(&dir.join(EXECUTION_ROWS_FILENAME)).unwrap();
        assert_eq!(executed[0].data_output, Some(json!("5")));
        assert_eq!(executed[2].error.as_ref().unwrap().code, 500);

        let rows = load_rows(&dir.join(EVALUATED_ROWS_FILENAME)).unwrap();
        assert_eq!(rows[0].evaluation_results["equivalent:match"].metric_value, 1.0);
        assert_eq!(rows[1].evaluation_results["equivalent:match"].metric_value, 1.0);
        assert_eq!(rows[2].evaluation_results["equivalent:match"].metric_value, 0.0);

        let summary: Value =
            serde_json::from_str(&fs::read_to_string(dir.join(SUMMARY_FILENAME)).unwrap()).unwrap();
        let accuracy = summary["equivalent"]["accuracy"].as_f64().unwrap();
        assert!((accuracy - 2.0 / 3.0).abs() < 1e-9);

        let errors: Value =
            serde_json::from_str(&fs::read_to_string(dir.join(ERRORS_FILENAME)).unwrap()).unwrap();
        assert_eq!(errors["unresolved"], json!(["no_such_evaluator"]));
    }

    #[test]
    fn test_max_rows_and_missing_dataset() {
        let (_tmp, orchestrator) = setup();
        let mut config: ExperimentConfig = serde_yaml::from_str(CONFIG).unwrap();

        assert_eq!(orchestrator.dry_run(&config, Some(2)).unwrap(), 2);
        assert_eq!(orchestrator.dry_run(&config, None).unwrap(), 3);

        let outcome = orchestrator.run_config(&config, Some(2)).unwrap();
        assert_eq!(outcome.rows, 2);
        assert_eq!(outcome.execution, ExecutionStats { succeeded: 2, failed: 0 });
        assert!(outcome.evaluated);

        config.dataset.version = "v9".into();
        assert!(matches!(
            orchestrator.run_config(&config, None),
            Err(HarnessError::DatasetNotFound { .. })
        ));
    }

    #[test]
    fn test_unsupported_executable_fails_before_loading() {
        let (_tmp, orchestrator) = setup();
        let mut config: ExperimentConfig = serde_yaml::from_str(CONFIG).unwrap();
        config.executable.path = "builtin.unknown".into();
        config.executable.processor = "nothing".into();
        assert!(matches!(
            orchestrator.run_config(&config, None),
            Err(HarnessError::UnsupportedExecutable(_))
        ));
    }

    #[test]
    fn test_experiment_ids_are_unique() {
        let a = new_experiment_id();
        let b = new_experiment_id();
        assert_ne!(a, b);
        assert!(a[3..].chars().all(|c| c.is_ascii_hexdigit()));
    }
}
