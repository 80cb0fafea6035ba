//! Binary output/ground-truth match.

use crate::config::EvaluatorConfig;
use crate::error::EvaluatorError;
use crate::eval::metric::{Evaluator, EvaluatorOutput};
use crate::metrics;
use crate::model::{Row, value_text};
use serde_json::Value;

/// Compares `data_output` with `expected_output` after trimming and lower-casing
/// their text forms. Two absent values match; one absent value does not.
#[derive(Debug, Clone)]
pub struct EquivalentEvaluator {
    name: String,
}

impl EquivalentEvaluator {
    pub fn new(config: &EvaluatorConfig) -> Self {
        Self {
            name: config.display_name().to_string(),
        }
    }

    fn row_match(row: &Row) -> f64 {
        match (row.expected(), row.output()) {
            (None, None) => 1.0,
            (None, _) | (_, None) => 0.0,
            (Some(expected), Some(actual)) => {
                if normalize(expected) == normalize(actual) {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

fn normalize(value: &Value) -> String {
    value_text(value).trim().to_lowercase()
}

impl Evaluator for EquivalentEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, rows: &[Row]) -> Result<EvaluatorOutput, EvaluatorError> {
        let mut output = EvaluatorOutput::new(&self.name);
        let mut total_matches = 0.0;

        for row in rows {
            let matched = Self::row_match(row);
            total_matches += matched;
            output.insert_row(&row.id, metrics! { "match" => matched, "score" => matched });
        }

        let accuracy = if rows.is_empty() {
            0.0
        } else {
            total_matches / rows.len() as f64
        };
        tracing::debug!(accuracy, rows = rows.len(), "equivalent summary");

        Ok(output
            .with_summary("accuracy", accuracy)
            .with_summary("match_rate", accuracy))
    }
}
