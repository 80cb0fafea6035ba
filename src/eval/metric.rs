//! The evaluator contract: what an evaluator consumes and what it hands back.

use crate::error::EvaluatorError;
use crate::model::Row;
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

/// A metric as reported by an evaluator.
///
/// Evaluators are free to report anything; numbers go in [`MetricValue::Numeric`]
/// (including NaN and infinities), everything else is carried verbatim in
/// [`MetricValue::Raw`] until the sanitizer decides what it becomes.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Numeric(f64),
    Raw(Value),
}

/// Metric name -> value, in the order the evaluator produced them.
pub type MetricMap = IndexMap<String, MetricValue>;

impl MetricValue {
    /// A JSON `null` metric.
    pub fn null() -> Self {
        MetricValue::Raw(Value::Null)
    }

    /// The numeric payload when this is a plain number.
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            MetricValue::Numeric(x) => Some(*x),
            MetricValue::Raw(Value::Number(n)) => n.as_f64(),
            MetricValue::Raw(_) => None,
        }
    }

    /// JSON rendering. Non-finite numbers become the strings `"NaN"`,
    /// `"Infinity"` and `"-Infinity"` since JSON cannot carry them.
    pub fn to_json(&self) -> Value {
        match self {
            MetricValue::Numeric(x) => number_to_json(*x),
            MetricValue::Raw(value) => value.clone(),
        }
    }

    /// Short type name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            MetricValue::Numeric(_) => "float",
            MetricValue::Raw(Value::Null) => "null",
            MetricValue::Raw(Value::Bool(_)) => "bool",
            MetricValue::Raw(Value::Number(_)) => "number",
            MetricValue::Raw(Value::String(_)) => "string",
            MetricValue::Raw(Value::Array(_)) => "array",
            MetricValue::Raw(Value::Object(_)) => "object",
        }
    }
}

/// JSON rendering of a float that may be non-finite.
pub fn number_to_json(x: f64) -> Value {
    if x.is_nan() {
        Value::String("NaN".to_string())
    } else if x.is_infinite() {
        let text = if x > 0.0 { "Infinity" } else { "-Infinity" };
        Value::String(text.to_string())
    } else {
        serde_json::Number::from_f64(x)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

impl Serialize for MetricValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<f64> for MetricValue {
    fn from(x: f64) -> Self {
        MetricValue::Numeric(x)
    }
}

impl From<f32> for MetricValue {
    fn from(x: f32) -> Self {
        MetricValue::Numeric(x as f64)
    }
}

impl From<i64> for MetricValue {
    fn from(x: i64) -> Self {
        MetricValue::Numeric(x as f64)
    }
}

impl From<i32> for MetricValue {
    fn from(x: i32) -> Self {
        MetricValue::Numeric(x as f64)
    }
}

impl From<usize> for MetricValue {
    fn from(x: usize) -> Self {
        MetricValue::Numeric(x as f64)
    }
}

impl From<bool> for MetricValue {
    fn from(b: bool) -> Self {
        MetricValue::Raw(Value::Bool(b))
    }
}

impl From<&str> for MetricValue {
    fn from(s: &str) -> Self {
        MetricValue::Raw(Value::String(s.to_string()))
    }
}

impl From<String> for MetricValue {
    fn from(s: String) -> Self {
        MetricValue::Raw(Value::String(s))
    }
}

impl From<Value> for MetricValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Number(n) => match n.as_f64() {
                Some(x) => MetricValue::Numeric(x),
                None => MetricValue::Raw(Value::Number(n)),
            },
            other => MetricValue::Raw(other),
        }
    }
}

/// Aggregated result produced by one evaluator over a batch of rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluatorOutput {
    pub name: String,
    pub summary: MetricMap,
    /// Row id -> that row's metrics.
    pub per_row: IndexMap<String, MetricMap>,
    /// Row id -> why scoring that row failed. Kept out of the metrics.
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub row_errors: IndexMap<String, String>,
}

impl EvaluatorOutput {
    /// Create an empty output for the named evaluator.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            summary: MetricMap::new(),
            per_row: IndexMap::new(),
            row_errors: IndexMap::new(),
        }
    }

    /// Set a summary metric.
    pub fn with_summary(mut self, metric: &str, value: impl Into<MetricValue>) -> Self {
        self.summary.insert(metric.to_string(), value.into());
        self
    }

    /// Record the metrics of one row.
    pub fn insert_row(&mut self, row_id: impl Into<String>, metrics: MetricMap) {
        self.per_row.insert(row_id.into(), metrics);
    }

    /// Note that scoring a row failed.
    pub fn record_row_error(&mut self, row_id: impl Into<String>, message: impl Into<String>) {
        self.row_errors.insert(row_id.into(), message.into());
    }
}

/// A batch scoring unit.
///
/// Implementations must not mutate the rows and must be deterministic for the
/// same input sequence.
pub trait Evaluator: Send + Sync {
    /// Name used as the metric key prefix.
    fn name(&self) -> &str;

    /// Score every row and summarise.
    fn evaluate(&self, rows: &[Row]) -> Result<EvaluatorOutput, EvaluatorError>;
}

/// Build a [`MetricMap`] from `(name, value)` pairs.
#[macro_export]
macro_rules! metrics {
    ($($name:expr => $value:expr),* $(,)?) => {{
        let mut map = $crate::eval::MetricMap::new();
        $( map.insert(($name).to_string(), $crate::eval::MetricValue::from($value)); )*
        map
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_value_splits_numbers() {
        assert_eq!(MetricValue::from(json!(3)), MetricValue::Numeric(3.0));
        assert_eq!(MetricValue::from(json!("x")), MetricValue::Raw(json!("x")));
        assert_eq!(MetricValue::from(true), MetricValue::Raw(json!(true)));
        assert_eq!(MetricValue::null().type_name(), "null");
    }

    #[test]
    fn test_non_finite_serialization() {
        assert_eq!(MetricValue::from(f64::NAN).to_json(), json!("NaN"));
        assert_eq!(MetricValue::from(f64::INFINITY).to_json(), json!("Infinity"));
        assert_eq!(
            MetricValue::from(f64::NEG_INFINITY).to_json(),
            json!("-Infinity")
        );
        let text = serde_json::to_string(&MetricValue::from(0.25)).unwrap();
        assert_eq!(text, "0.25");
    }

    #[test]
    fn test_metrics_macro_keeps_order() {
        let map = metrics! { "b" => 1.0, "a" => "text", "c" => true };
        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
        assert_eq!(map["a"], MetricValue::from("text"));
    }
}
