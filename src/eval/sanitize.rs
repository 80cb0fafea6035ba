//! Numeric coercion of evaluator metrics.
//!
//! Every [`MetricValue`] has a defined finite `f64` outcome. Anything other
//! than a plain finite number comes back with a diagnostic so the caller can
//! keep the original value in the non-numeric side channel.
//!
//! | input                      | value          | diagnostic |
//! |----------------------------|----------------|------------|
//! | finite number              | unchanged      | no         |
//! | null                       | 0.0            | yes        |
//! | bool                       | 1.0 / 0.0      | yes        |
//! | NaN / ±Infinity            | 0.0            | yes        |
//! | numeric string (finite)    | parsed         | yes        |
//! | blank or other string      | 0.0            | yes        |
//! | array / object             | 0.0            | yes        |

use super::metric::{MetricMap, MetricValue};
use serde_json::Value;

/// Result of coercing one metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Coerced {
    /// Always finite.
    pub value: f64,
    pub diagnostic: Option<String>,
}

impl Coerced {
    fn clean(value: f64) -> Self {
        Self {
            value,
            diagnostic: None,
        }
    }

    fn noted(value: f64, diagnostic: String) -> Self {
        Self {
            value,
            diagnostic: Some(diagnostic),
        }
    }
}

/// Coerce a metric to a finite float. Never fails.
pub fn coerce(value: &MetricValue, context: &str) -> Coerced {
    match value {
        MetricValue::Numeric(x) => coerce_number(*x, context),
        MetricValue::Raw(raw) => coerce_raw(raw, context),
    }
}

fn coerce_number(x: f64, context: &str) -> Coerced {
    if x.is_finite() {
        Coerced::clean(x)
    } else {
        Coerced::noted(
            0.0,
            format!("{}: non-finite value {} replaced with 0.0", context, x),
        )
    }
}

fn coerce_raw(raw: &Value, context: &str) -> Coerced {
    match raw {
        Value::Null => Coerced::noted(0.0, format!("{}: null value replaced with 0.0", context)),
        Value::Bool(b) => {
            let value = if *b { 1.0 } else { 0.0 };
            Coerced::noted(
                value,
                format!("{}: boolean {} converted to {:.1}", context, b, value),
            )
        }
        Value::Number(n) => match n.as_f64() {
            Some(x) => coerce_number(x, context),
            None => Coerced::noted(
                0.0,
                format!("{}: number {} is not representable as f64", context, n),
            ),
        },
        Value::String(s) => coerce_string(s, context),
        other => {
            let kind = if other.is_array() { "array" } else { "object" };
            Coerced::noted(
                0.0,
                format!(
                    "{}: cannot convert {} value {} to a number; using 0.0",
                    context, kind, other
                ),
            )
        }
    }
}

fn coerce_string(s: &str, context: &str) -> Coerced {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Coerced::noted(0.0, format!("{}: empty string replaced with 0.0", context));
    }

    match trimmed.parse::<f64>() {
        Ok(x) if x.is_finite() => Coerced::noted(
            x,
            format!("{}: numeric string {:?} parsed as {}", context, s, x),
        ),
        Ok(_) => Coerced::noted(
            0.0,
            format!("{}: string {:?} parses to a non-finite value; using 0.0", context, s),
        ),
        Err(_) => Coerced::noted(
            0.0,
            format!("{}: unparseable string {:?} replaced with 0.0", context, s),
        ),
    }
}

/// One metric after coercion, with its original value kept alongside.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedMetric {
    pub metric: String,
    pub value: f64,
    pub original: MetricValue,
    pub diagnostic: Option<String>,
}

/// Coerce every metric of a map, preserving order.
///
/// `context` names the origin (for example `"equivalent row r1"`) and prefixes
/// each diagnostic together with the metric name.
pub fn sanitize_metrics(metrics: &MetricMap, context: &str) -> Vec<SanitizedMetric> {
    metrics
        .iter()
        .map(|(metric, original)| {
            let Coerced { value, diagnostic } = coerce(original, &format!("{} {}", context, metric));
            if let Some(note) = &diagnostic {
                tracing::debug!("{}", note);
            }
            SanitizedMetric {
                metric: metric.clone(),
                value,
                original: original.clone(),
                diagnostic,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_clean_numbers_are_silent() {
        for x in [0.0, -3.25, 1e300, 42.0] {
            assert_eq!(coerce(&MetricValue::Numeric(x), "ctx"), Coerced::clean(x));
        }
        assert_eq!(coerce(&MetricValue::Raw(json!(7)), "ctx"), Coerced::clean(7.0));
    }

    #[test]
    fn test_null_and_bool() {
        let null = coerce(&MetricValue::null(), "judge score");
        assert_eq!(null.value, 0.0);
        assert!(null.diagnostic.unwrap().starts_with("judge score"));

        let flag = coerce(&MetricValue::from(true), "ctx");
        assert_eq!(flag.value, 1.0);
        assert!(flag.diagnostic.unwrap().contains("boolean"));
        assert_eq!(coerce(&MetricValue::from(false), "ctx").value, 0.0);
    }

    #[test]
    fn test_non_finite_numbers_are_zeroed() {
        for x in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let result = coerce(&MetricValue::Numeric(x), "ctx");
            assert_eq!(result.value, 0.0);
            assert!(result.diagnostic.unwrap().contains("non-finite"));
        }
    }

    #[test]
    fn test_strings() {
        let parsed = coerce(&MetricValue::from(" 0.5 "), "ctx");
        assert_eq!(parsed.value, 0.5);
        assert!(parsed.diagnostic.is_some());

        let blank = coerce(&MetricValue::from("   "), "ctx");
        assert_eq!(blank.value, 0.0);
        assert!(blank.diagnostic.unwrap().contains("empty"));

        let word = coerce(&MetricValue::from("good"), "ctx");
        assert_eq!(word.value, 0.0);
        assert!(word.diagnostic.unwrap().contains("unparseable"));

        let inf = coerce(&MetricValue::from("inf"), "ctx");
        assert_eq!(inf.value, 0.0);
        assert!(inf.diagnostic.is_some());
    }

    #[test]
    fn test_collections_report_type_and_value() {
        let result = coerce(&MetricValue::Raw(json!([1, 2])), "ctx");
        assert_eq!(result.value, 0.0);
        let note = result.diagnostic.unwrap();
        assert!(note.contains("array"));
        assert!(note.contains("[1,2]"));

        let result = coerce(&MetricValue::Raw(json!({"a": 1})), "ctx");
        assert!(result.diagnostic.unwrap().contains("object"));
    }

    #[test]
    fn test_sanitize_metrics_keeps_order_and_originals() {
        let map = metrics! {
            "score" => f64::INFINITY,
            "category" => "good",
            "flag" => true,
            "clean" => 0.75,
        };
        let sanitized = sanitize_metrics(&map, "judge row r1");
        let names: Vec<&str> = sanitized.iter().map(|m| m.metric.as_str()).collect();
        assert_eq!(names, vec!["score", "category", "flag", "clean"]);

        assert_eq!(sanitized[0].value, 0.0);
        assert!(sanitized[0].diagnostic.as_deref().unwrap().starts_with("judge row r1 score"));
        assert_eq!(sanitized[1].original, MetricValue::from("good"));
        assert_eq!(sanitized[2].value, 1.0);
        assert!(sanitized[3].diagnostic.is_none());
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            any::<f64>().prop_map(|x| serde_json::Number::from_f64(x)
                .map(Value::Number)
                .unwrap_or(Value::Null)),
            ".*".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn test_coerce_is_total_and_finite(value in arb_json()) {
            let result = coerce(&MetricValue::Raw(value), "ctx");
            prop_assert!(result.value.is_finite());
        }

        #[test]
        fn test_coerce_any_float_is_finite(x in any::<f64>()) {
            let result = coerce(&MetricValue::Numeric(x), "ctx");
            prop_assert!(result.value.is_finite());
            if x.is_finite() {
                prop_assert_eq!(result, Coerced::clean(x));
            }
        }
    }
}
