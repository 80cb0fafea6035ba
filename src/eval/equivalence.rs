//! Loose equivalence scoring between a response and a ground truth.
//!
//! Both values are first normalized (strings trimmed and lower-cased, numbers
//! widened to `f64`, objects turned into key-sorted pairs), then compared by
//! an ordered fallback chain:
//!
//! 1. normalized equality,
//! 2. numeric closeness (relative error, absolute error when the truth is 0),
//! 3. Jaccard similarity when both sides are collections,
//! 4. equality of the plain string forms,
//! 5. whitespace-token Jaccard overlap.
//!
//! Scoring never fails: any pair of values ends up in one of the branches and
//! yields a score in `[0, 1]`.

use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Canonical comparable form of a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Null,
    /// Booleans are kept apart from numbers: `true` never equals `1.0`.
    Bool(bool),
    Number(f64),
    Text(String),
    Seq(Vec<Normalized>),
    /// Key/value pair of a normalized object.
    Tuple(Vec<Normalized>),
}

impl Normalized {
    /// Normalize a JSON value recursively.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Normalized::Null,
            Value::Bool(b) => Normalized::Bool(*b),
            Value::Number(n) => n
                .as_f64()
                .map(Normalized::Number)
                .unwrap_or_else(|| Normalized::Text(n.to_string())),
            Value::String(s) => Normalized::Text(s.trim().to_lowercase()),
            Value::Array(items) => Normalized::Seq(items.iter().map(Self::from_value).collect()),
            Value::Object(fields) => {
                let mut pairs: Vec<(&String, &Value)> = fields.iter().collect();
                pairs.sort_by(|a, b| a.0.cmp(b.0));
                Normalized::Seq(
                    pairs
                        .into_iter()
                        .map(|(k, v)| {
                            Normalized::Tuple(vec![
                                Normalized::Text(k.clone()),
                                Self::from_value(v),
                            ])
                        })
                        .collect(),
                )
            }
        }
    }

    /// Normalize an unordered collection: duplicates collapse and elements are sorted.
    pub fn from_set(values: &[Value]) -> Self {
        let mut unique: Vec<Normalized> = Vec::new();
        let mut seen = BTreeSet::new();
        for value in values {
            let normalized = Self::from_value(value);
            if seen.insert(normalized.repr()) {
                unique.push(normalized);
            }
        }
        unique.sort_by(natural_order);
        Normalized::Seq(unique)
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Normalized::Number(x) => Some(*x),
            _ => None,
        }
    }

    fn elements(&self) -> Option<&[Normalized]> {
        match self {
            Normalized::Seq(items) | Normalized::Tuple(items) => Some(items),
            _ => None,
        }
    }

    fn type_label(&self) -> &'static str {
        match self {
            Normalized::Null => "null",
            Normalized::Bool(_) => "bool",
            Normalized::Number(_) => "number",
            Normalized::Text(_) => "str",
            Normalized::Seq(_) => "list",
            Normalized::Tuple(_) => "tuple",
        }
    }

    /// Quoted textual form, used for nested elements and set membership.
    pub fn repr(&self) -> String {
        match self {
            Normalized::Null => "None".to_string(),
            Normalized::Bool(true) => "True".to_string(),
            Normalized::Bool(false) => "False".to_string(),
            Normalized::Number(x) => float_repr(*x),
            Normalized::Text(s) => format!("'{}'", s),
            Normalized::Seq(items) => {
                let inner: Vec<String> = items.iter().map(Self::repr).collect();
                format!("[{}]", inner.join(", "))
            }
            Normalized::Tuple(items) => {
                let inner: Vec<String> = items.iter().map(Self::repr).collect();
                if inner.len() == 1 {
                    format!("({},)", inner[0])
                } else {
                    format!("({})", inner.join(", "))
                }
            }
        }
    }

    /// JSON rendering for diagnostics.
    pub fn to_json(&self) -> Value {
        match self {
            Normalized::Null => Value::Null,
            Normalized::Bool(b) => Value::Bool(*b),
            Normalized::Number(x) => crate::eval::metric::number_to_json(*x),
            Normalized::Text(s) => Value::String(s.clone()),
            Normalized::Seq(items) | Normalized::Tuple(items) => {
                Value::Array(items.iter().map(Self::to_json).collect())
            }
        }
    }
}

impl fmt::Display for Normalized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Normalized::Text(s) => f.write_str(s),
            other => f.write_str(&other.repr()),
        }
    }
}

fn float_repr(x: f64) -> String {
    if x.is_nan() {
        "nan".to_string()
    } else if x.is_infinite() {
        if x > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        format!("{:?}", x)
    }
}

fn natural_order(a: &Normalized, b: &Normalized) -> Ordering {
    match (a, b) {
        (Normalized::Number(x), Normalized::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Normalized::Text(x), Normalized::Text(y)) => x.cmp(y),
        _ => a.repr().cmp(&b.repr()),
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// Outcome of comparing a response against a ground truth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquivalenceScore {
    /// Similarity in `[0, 1]`.
    pub score: f64,
    /// Strict equality after normalization.
    pub exact: bool,
    pub response_normalized: Value,
    pub ground_truth_normalized: Value,
    /// Which comparison path produced the score.
    pub notes: String,
}

/// Score two arbitrary JSON values.
pub fn score(response: &Value, ground_truth: &Value) -> EquivalenceScore {
    score_normalized(
        Normalized::from_value(response),
        Normalized::from_value(ground_truth),
    )
}

/// Score two already-normalized values.
pub fn score_normalized(response: Normalized, ground_truth: Normalized) -> EquivalenceScore {
    if response == ground_truth {
        return EquivalenceScore {
            score: 1.0,
            exact: true,
            notes: format!("Normalized values equal (type {}).", response.type_label()),
            response_normalized: response.to_json(),
            ground_truth_normalized: ground_truth.to_json(),
        };
    }

    if let (Some(r), Some(g)) = (response.as_number(), ground_truth.as_number()) {
        return score_numeric(r, g);
    }

    if let (Some(r), Some(g)) = (response.elements(), ground_truth.elements()) {
        return score_collections(r, g);
    }

    let r_str = response.to_string().trim().to_lowercase();
    let g_str = ground_truth.to_string().trim().to_lowercase();
    if r_str == g_str {
        return EquivalenceScore {
            score: 1.0,
            exact: true,
            response_normalized: Value::String(r_str),
            ground_truth_normalized: Value::String(g_str),
            notes: "String forms match after normalization.".to_string(),
        };
    }

    let r_tokens: BTreeSet<&str> = r_str.split_whitespace().collect();
    let g_tokens: BTreeSet<&str> = g_str.split_whitespace().collect();
    let token_score = if r_tokens.is_empty() || g_tokens.is_empty() {
        0.0
    } else {
        let inter = r_tokens.intersection(&g_tokens).count();
        let union = r_tokens.union(&g_tokens).count();
        inter as f64 / union as f64
    };

    EquivalenceScore {
        score: round4(token_score),
        exact: false,
        response_normalized: response.to_json(),
        ground_truth_normalized: ground_truth.to_json(),
        notes: "Fallback token overlap scoring.".to_string(),
    }
}

/// Numeric closeness: relative error against the truth, or absolute error
/// capped at 1 when the truth is zero. NaN on either side scores 0.
pub fn score_numeric(r: f64, g: f64) -> EquivalenceScore {
    if r.is_nan() || g.is_nan() {
        return EquivalenceScore {
            score: 0.0,
            exact: false,
            response_normalized: crate::eval::metric::number_to_json(r),
            ground_truth_normalized: crate::eval::metric::number_to_json(g),
            notes: "NaN encountered; score 0.".to_string(),
        };
    }

    let score = if g == 0.0 {
        let diff = (r - g).abs();
        if diff == 0.0 {
            1.0
        } else {
            (1.0 - diff.min(1.0)).max(0.0)
        }
    } else {
        let rel_err = (r - g).abs() / g.abs();
        // NaN (inf/inf) falls out of f64::max as 0.0
        (1.0 - rel_err).max(0.0)
    };

    EquivalenceScore {
        score: round4(score),
        exact: r == g,
        response_normalized: crate::eval::metric::number_to_json(r),
        ground_truth_normalized: crate::eval::metric::number_to_json(g),
        notes: "Numeric relative/absolute error scoring.".to_string(),
    }
}

fn score_collections(response: &[Normalized], ground_truth: &[Normalized]) -> EquivalenceScore {
    let r_set = unique_elements(response);
    let g_set = unique_elements(ground_truth);
    let r_json = Value::Array(r_set.values().cloned().collect());
    let g_json = Value::Array(g_set.values().cloned().collect());

    if r_set.is_empty() && g_set.is_empty() {
        return EquivalenceScore {
            score: 1.0,
            exact: true,
            response_normalized: r_json,
            ground_truth_normalized: g_json,
            notes: "Both empty collections.".to_string(),
        };
    }

    let inter = r_set.keys().filter(|k| g_set.contains_key(*k)).count();
    let union = r_set.len() + g_set.len() - inter;
    let score = round4(inter as f64 / union as f64);

    EquivalenceScore {
        score,
        exact: score == 1.0,
        response_normalized: r_json,
        ground_truth_normalized: g_json,
        notes: "Jaccard similarity over collection elements.".to_string(),
    }
}

fn unique_elements(items: &[Normalized]) -> BTreeMap<String, Value> {
    items
        .iter()
        .map(|item| (item.repr(), item.to_json()))
        .collect()
}
