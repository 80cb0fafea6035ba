//! Row execution: turn each row's input fields into a `data_output`.
//!
//! A `module` executable resolves, in order, to
//! 1. a native processor registered as `"<path>:<processor>"`,
//! 2. a Python file (`path`, `path.py`, or `path/<processor>.py` for a
//!    directory) whose `processor` attribute is invoked through the script bridge.

use crate::config::{ExecutableConfig, ExecutableType};
use crate::error::{ExecutionError, HarnessError, Result};
use crate::model::{Record, Row, RowError, value_text};
use crate::script::{CallStyle, ScriptRunner, markers_to_text};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Error code stored on rows whose execution failed.
pub const EXECUTION_ERROR_CODE: i32 = 500;

/// Produces the output for one row.
pub trait Executable: Send + Sync {
    fn execute(&self, inputs: &Record) -> std::result::Result<Value, ExecutionError>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

pub type Processor = Arc<dyn Fn(&Record) -> std::result::Result<Value, ExecutionError> + Send + Sync>;

/// Native processors keyed by `"<path>:<processor>"`.
#[derive(Clone, Default)]
pub struct ProcessorCatalog {
    processors: HashMap<String, Processor>,
}

impl ProcessorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with `builtin.echo:run`, `builtin.math:run` and `builtin.summarizer:run`.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register("builtin.echo:run", echo);
        catalog.register("builtin.math:run", math);
        catalog.register("builtin.summarizer:run", summarize);
        catalog
    }

    pub fn register<F>(&mut self, key: &str, processor: F)
    where
        F: Fn(&Record) -> std::result::Result<Value, ExecutionError> + Send + Sync + 'static,
    {
        self.processors.insert(key.to_string(), Arc::new(processor));
    }

    pub fn get(&self, path: &str, processor: &str) -> Option<Processor> {
        self.processors.get(&format!("{}:{}", path, processor)).cloned()
    }
}

impl fmt::Debug for ProcessorCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.processors.keys().collect();
        keys.sort();
        f.debug_struct("ProcessorCatalog").field("processors", &keys).finish()
    }
}

/// Merge configured default arguments under the row's own fields.
fn with_defaults(defaults: &Record, inputs: &Record) -> Record {
    let mut kwargs = defaults.clone();
    for (key, value) in inputs {
        kwargs.insert(key.clone(), value.clone());
    }
    kwargs
}

struct NativeExecutable {
    key: String,
    processor: Processor,
    defaults: Record,
}

impl Executable for NativeExecutable {
    fn execute(&self, inputs: &Record) -> std::result::Result<Value, ExecutionError> {
        (self.processor)(&with_defaults(&self.defaults, inputs))
    }

    fn describe(&self) -> String {
        format!("native processor {}", self.key)
    }
}

struct ScriptExecutable {
    runner: ScriptRunner,
    defaults: Record,
}

impl Executable for ScriptExecutable {
    fn execute(&self, inputs: &Record) -> std::result::Result<Value, ExecutionError> {
        let output = self.runner.invoke(&with_defaults(&self.defaults, inputs))?;
        Ok(markers_to_text(output))
    }

    fn describe(&self) -> String {
        format!(
            "script {}::{}",
            self.runner.module_file().display(),
            self.runner.target()
        )
    }
}

/// Locate the Python file for a module path, relative paths resolved against `base`.
pub fn locate_module_file(path: &str, processor: &str, base: &Path) -> Option<PathBuf> {
    let raw = PathBuf::from(path);
    let raw = if raw.is_absolute() { raw } else { base.join(raw) };
    let with_ext = PathBuf::from(format!("{}.py", raw.display()));

    let candidate = if raw.exists() {
        raw
    } else if with_ext.exists() {
        with_ext
    } else {
        return None;
    };

    if candidate.is_dir() {
        let inner = candidate.join(format!("{}.py", processor));
        inner.is_file().then_some(inner)
    } else {
        Some(candidate)
    }
}

/// Build the executable described by `config`.
pub fn resolve_executable(
    config: &ExecutableConfig,
    catalog: &ProcessorCatalog,
    interpreter: &str,
) -> Result<Box<dyn Executable>> {
    if config.kind != ExecutableType::Module {
        return Err(HarnessError::UnsupportedExecutable(format!(
            "unsupported executable type in {}",
            config.run_descriptor()
        )));
    }
    if config.processor.trim().is_empty() {
        return Err(HarnessError::UnsupportedExecutable(
            "executable.processor is required".to_string(),
        ));
    }

    let defaults: Record = config
        .config
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    if let Some(processor) = catalog.get(&config.path, &config.processor) {
        return Ok(Box::new(NativeExecutable {
            key: format!("{}:{}", config.path, config.processor),
            processor,
            defaults,
        }));
    }

    let base = std::env::current_dir().map_err(|e| HarnessError::io(".", e))?;
    let module_file = locate_module_file(&config.path, &config.processor, &base).ok_or_else(|| {
        HarnessError::UnsupportedExecutable(format!(
            "executable module not found: {}",
            config.run_descriptor()
        ))
    })?;

    let runner = ScriptRunner::new(interpreter, module_file, &config.processor, CallStyle::Run)
        .with_python_path(config.python_path.iter().map(PathBuf::from).collect());
    Ok(Box::new(ScriptExecutable { runner, defaults }))
}

/// Outcome counts of an execution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    pub succeeded: usize,
    pub failed: usize,
}

/// Execute every row in place. Failures are recorded on the row, never returned.
pub fn execute_rows(executable: &dyn Executable, rows: &mut [Row]) -> ExecutionStats {
    let total = rows.len();
    let step = (total / 10).max(1);
    let mut stats = ExecutionStats::default();
    tracing::info!("Executing {} rows with {}", total, executable.describe());

    for (index, row) in rows.iter_mut().enumerate() {
        match executable.execute(&row.data_input) {
            Ok(output) => {
                row.data_output = Some(output);
                row.error = None;
                stats.succeeded += 1;
            }
            Err(e) => {
                tracing::warn!(row = %row.id, "Row execution failed: {}", e);
                row.data_output = None;
                row.error = Some(RowError {
                    message: format!("Execution failed: {}", e),
                    code: EXECUTION_ERROR_CODE,
                });
                stats.failed += 1;
            }
        }

        let done = index + 1;
        if done % step == 0 || done == total {
            tracing::info!(
                "Progress: {}/{} rows ({:.1}%), {} succeeded, {} failed",
                done,
                total,
                done as f64 * 100.0 / total as f64,
                stats.succeeded,
                stats.failed
            );
        }
    }

    if stats.failed > 0 && stats.failed == total {
        tracing::error!("All {} rows failed execution", total);
    } else if stats.failed * 2 > total {
        tracing::warn!("More than half of the rows failed execution");
    }
    stats
}

fn echo(inputs: &Record) -> std::result::Result<Value, ExecutionError> {
    let text = inputs
        .get("input")
        .map(value_text)
        .unwrap_or_else(|| "No input provided".to_string());
    Ok(Value::String(format!("Echo: {}", text)))
}

/// Answers `What is <a> <op> <b>?` for integer operands and `+ - * /`.
fn math(inputs: &Record) -> std::result::Result<Value, ExecutionError> {
    let question = inputs
        .get("question")
        .map(value_text)
        .unwrap_or_else(|| "No question provided".to_string());

    let expression = question.replace("What is ", "").replace('?', "");
    for op in ['+', '*', '-', '/'] {
        if !question.contains(op) {
            continue;
        }
        let separator = format!(" {} ", op);
        let parts: Vec<&str> = expression.split(separator.as_str()).collect();
        if let [lhs, rhs] = parts.as_slice() {
            if let (Ok(a), Ok(b)) = (lhs.trim().parse::<i64>(), rhs.trim().parse::<i64>()) {
                let overflow = || ExecutionError::Processor(format!("integer overflow in '{}'", question));
                let answer = match op {
                    '+' => a.checked_add(b).ok_or_else(overflow)?.to_string(),
                    '*' => a.checked_mul(b).ok_or_else(overflow)?.to_string(),
                    '-' => a.checked_sub(b).ok_or_else(overflow)?.to_string(),
                    _ => {
                        if b == 0 {
                            return Err(ExecutionError::Processor("division by zero".to_string()));
                        }
                        let quotient = a as f64 / b as f64;
                        if quotient.fract() == 0.0 {
                            (quotient as i64).to_string()
                        } else {
                            quotient.to_string()
                        }
                    }
                };
                return Ok(Value::String(answer));
            }
        }
        break;
    }
    Ok(Value::String(format!("Cannot compute: {}", question)))
}

/// First two sentences of `input`.
fn summarize(inputs: &Record) -> std::result::Result<Value, ExecutionError> {
    let text = inputs
        .get("input")
        .map(value_text)
        .ok_or_else(|| ExecutionError::MissingInput("input".to_string()))?;

    let sentences: Vec<&str> = text
        .split('.')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if sentences.is_empty() {
        return Ok(Value::String("Unable to generate summary.".to_string()));
    }

    let mut summary = sentences[..sentences.len().min(2)].join(". ");
    if !summary.ends_with('.') {
        summary.push('.');
    }
    Ok(Value::String(summary))
}
