//! Subprocess bridge to Python callables.
//!
//! A [`ScriptRunner`] names a module file and an attribute inside it. Each
//! [`ScriptRunner::invoke`] spawns the interpreter with a small driver
//! program, feeds the keyword arguments as JSON on stdin and reads the JSON
//! result from the last line of stdout. Keyword arguments the target does not
//! accept are dropped by the driver unless it takes `**kwargs`.

use crate::error::FlowError;
use crate::model::Record;
use serde_json::Value;
use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread;

const DRIVER: &str = r#"
import importlib.util, inspect, json, math, sys

def _encode(value):
    if isinstance(value, float) and not math.isfinite(value):
        text = "NaN" if value != value else ("Infinity" if value > 0 else "-Infinity")
        return {"__non_finite__": text}
    if isinstance(value, dict):
        return {str(k): _encode(v) for k, v in value.items()}
    if isinstance(value, (list, tuple)):
        return [_encode(v) for v in value]
    return value

def _bind(fn, kwargs):
    try:
        params = inspect.signature(fn).parameters
    except (TypeError, ValueError):
        return kwargs
    if any(p.kind is inspect.Parameter.VAR_KEYWORD for p in params.values()):
        return kwargs
    return {k: v for k, v in kwargs.items() if k in params}

path, target, style = sys.argv[1:4]
spec = importlib.util.spec_from_file_location("harness_target", path)
module = importlib.util.module_from_spec(spec)
spec.loader.exec_module(module)
obj = getattr(module, target)
if inspect.isclass(obj):
    obj = obj()
    if style == "run":
        obj = obj.run
payload = json.load(sys.stdin)
result = obj(**_bind(obj, payload))
sys.stdout.write("\n" + json.dumps(_encode(result), default=str, allow_nan=False) + "\n")
"#;

/// Key of the object the driver emits in place of NaN and the infinities.
pub const NON_FINITE_MARKER: &str = "__non_finite__";

/// Longest stderr excerpt kept in [`FlowError::ScriptFailed`].
const STDERR_EXCERPT_CHARS: usize = 2000;

/// How the target attribute is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStyle {
    /// Call the function, or instantiate the class and call the instance.
    Call,
    /// Call the function, or instantiate the class and call its `run` method.
    Run,
}

impl CallStyle {
    fn as_arg(self) -> &'static str {
        match self {
            CallStyle::Call => "call",
            CallStyle::Run => "run",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScriptRunner {
    interpreter: String,
    module_file: PathBuf,
    target: String,
    style: CallStyle,
    environment: BTreeMap<String, String>,
    python_path: Vec<PathBuf>,
}

impl ScriptRunner {
    pub fn new(
        interpreter: impl Into<String>,
        module_file: impl Into<PathBuf>,
        target: impl Into<String>,
        style: CallStyle,
    ) -> Self {
        Self {
            interpreter: interpreter.into(),
            module_file: module_file.into(),
            target: target.into(),
            style,
            environment: BTreeMap::new(),
            python_path: Vec::new(),
        }
    }

    /// Extra environment variables for the child process.
    pub fn with_environment(mut self, environment: BTreeMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    /// Directories prepended to `PYTHONPATH`, after the module's own directory.
    pub fn with_python_path(mut self, dirs: Vec<PathBuf>) -> Self {
        self.python_path = dirs;
        self
    }

    pub fn module_file(&self) -> &Path {
        &self.module_file
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    fn python_path_var(&self) -> Option<OsString> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        if let Some(parent) = self.module_file.parent() {
            dirs.push(parent.to_path_buf());
        }
        dirs.extend(self.python_path.iter().cloned());
        if let Some(existing) = env::var_os("PYTHONPATH") {
            dirs.extend(env::split_paths(&existing));
        }
        env::join_paths(dirs).ok()
    }

    /// Run the target once with `kwargs`.
    pub fn invoke(&self, kwargs: &Record) -> Result<Value, FlowError> {
        let payload = serde_json::to_vec(kwargs)
            .map_err(|e| FlowError::InvalidOutput(format!("cannot encode arguments: {}", e)))?;

        let mut command = Command::new(&self.interpreter);
        command
            .arg("-c")
            .arg(DRIVER)
            .arg(&self.module_file)
            .arg(&self.target)
            .arg(self.style.as_arg())
            .envs(&self.environment)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(python_path) = self.python_path_var() {
            command.env("PYTHONPATH", python_path);
        }

        let output = run_with_input(command, payload).map_err(|source| FlowError::Spawn {
            program: self.interpreter.clone(),
            source,
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FlowError::ScriptFailed {
                status: output.status.code().unwrap_or(-1),
                stderr: stderr_excerpt(&stderr),
            });
        }

        parse_result(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Spawn `command`, feed `payload` on stdin from a writer thread and collect
/// its output. Stdout and stderr are drained while stdin is still being written.
fn run_with_input(mut command: Command, payload: Vec<u8>) -> std::io::Result<Output> {
    let mut child = command.spawn()?;
    let writer = child.stdin.take().map(|mut stdin| {
        thread::spawn(move || {
            // A child that exits early closes the pipe; its exit status tells the story.
            if let Err(e) = stdin.write_all(&payload) {
                tracing::debug!("Writing script arguments failed: {}", e);
            }
        })
    });

    let output = child.wait_with_output()?;
    if let Some(writer) = writer {
        if writer.join().is_err() {
            tracing::debug!("Script argument writer panicked");
        }
    }
    Ok(output)
}

/// The float a driver marker object stands for, if `value` is one.
pub fn non_finite_value(value: &Value) -> Option<f64> {
    let fields = value.as_object()?;
    if fields.len() != 1 {
        return None;
    }
    match fields.get(NON_FINITE_MARKER)?.as_str()? {
        "NaN" => Some(f64::NAN),
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        _ => None,
    }
}

/// Replace driver markers with the strings `"NaN"`, `"Infinity"` and `"-Infinity"`.
pub fn markers_to_text(value: Value) -> Value {
    if let Some(x) = non_finite_value(&value) {
        return crate::eval::metric::number_to_json(x);
    }
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(markers_to_text).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k, markers_to_text(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Parse the JSON document on the last non-empty stdout line.
pub fn parse_result(stdout: &str) -> Result<Value, FlowError> {
    let line = stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| FlowError::InvalidOutput("script produced no output".to_string()))?;
    serde_json::from_str(line.trim())
        .map_err(|e| FlowError::InvalidOutput(format!("{}: {}", e, line.trim())))
}

fn stderr_excerpt(stderr: &str) -> String {
    let trimmed = stderr.trim();
    let count = trimmed.chars().count();
    if count <= STDERR_EXCERPT_CHARS {
        trimmed.to_string()
    } else {
        trimmed.chars().skip(count - STDERR_EXCERPT_CHARS).collect()
    }
}
