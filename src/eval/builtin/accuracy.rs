//! Exact match with a leading-number fallback for arithmetic answers.

use crate::config::EvaluatorConfig;
use crate::error::EvaluatorError;
use crate::eval::metric::{Evaluator, EvaluatorOutput};
use crate::metrics;
use crate::model::{Row, is_truthy, output_text, value_text};
use regex::Regex;
use std::sync::LazyLock;

static NUMBER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+\.?\d*").expect("number pattern is valid"));

/// Reads the expected answer from `data_input.expected`, falling back to the
/// row's `expected_output`. Per-row results also carry the compared texts.
#[derive(Debug, Clone)]
pub struct AccuracyCheckerEvaluator {
    name: String,
}

impl AccuracyCheckerEvaluator {
    pub fn new(config: &EvaluatorConfig) -> Self {
        Self {
            name: config.display_name().to_string(),
        }
    }

    fn expected_text(row: &Row) -> String {
        row.data_input
            .get("expected")
            .or_else(|| row.expected())
            .filter(|v| is_truthy(v))
            .map(value_text)
            .unwrap_or_default()
            .trim()
            .to_string()
    }
}

/// All numbers appearing in `text`, in order.
pub fn extract_numbers(text: &str) -> Vec<f64> {
    NUMBER_PATTERN
        .find_iter(text)
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .collect()
}

/// Case-insensitive exact match, or equal first numbers when both texts contain one.
pub fn is_correct(output: &str, expected: &str) -> bool {
    if output.to_lowercase() == expected.to_lowercase() {
        return true;
    }
    if expected.is_empty() {
        return false;
    }
    match (extract_numbers(output).first(), extract_numbers(expected).first()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

impl Evaluator for AccuracyCheckerEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, rows: &[Row]) -> Result<EvaluatorOutput, EvaluatorError> {
        let mut output = EvaluatorOutput::new(&self.name);
        let mut correct = 0usize;

        for row in rows {
            let produced = output_text(row).trim().to_string();
            let expected = Self::expected_text(row);
            let hit = is_correct(&produced, &expected);
            if hit {
                correct += 1;
            }
            output.insert_row(
                &row.id,
                metrics! {
                    "exact_match" => if hit { 1.0 } else { 0.0 },
                    "output" => produced,
                    "expected" => expected,
                },
            );
        }

        let total = rows.len();
        let accuracy = if total > 0 {
            correct as f64 / total as f64
        } else {
            0.0
        };

        Ok(output
            .with_summary("accuracy", accuracy)
            .with_summary("correct_count", correct)
            .with_summary("total_count", total))
    }
}
