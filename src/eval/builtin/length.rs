//! Response length statistics.

use crate::config::EvaluatorConfig;
use crate::error::EvaluatorError;
use crate::eval::metric::{Evaluator, EvaluatorOutput};
use crate::metrics;
use crate::model::{Row, output_text};

/// Longest response that still gets full marks.
const FULL_SCORE_MAX_CHARS: usize = 500;

/// Characters past [`FULL_SCORE_MAX_CHARS`] over which the score decays to its floor.
const DECAY_SPAN_CHARS: f64 = 1000.0;

const MIN_LONG_SCORE: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct ResponseLengthEvaluator {
    name: String,
}

impl ResponseLengthEvaluator {
    pub fn new(config: &EvaluatorConfig) -> Self {
        Self {
            name: config.display_name().to_string(),
        }
    }
}

/// Score a response length: 0 when empty, 1 up to 500 characters, then a
/// linear decay floored at 0.1.
pub fn length_score(length: usize) -> f64 {
    if length == 0 {
        0.0
    } else if length <= FULL_SCORE_MAX_CHARS {
        1.0
    } else {
        let over = (length - FULL_SCORE_MAX_CHARS) as f64;
        (1.0 - over / DECAY_SPAN_CHARS).max(MIN_LONG_SCORE)
    }
}

fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        0.0
    } else if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

impl Evaluator for ResponseLengthEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, rows: &[Row]) -> Result<EvaluatorOutput, EvaluatorError> {
        let mut output = EvaluatorOutput::new(&self.name);
        let mut lengths = Vec::with_capacity(rows.len());
        let mut scores = Vec::with_capacity(rows.len());

        for row in rows {
            let length = output_text(row).chars().count();
            let score = length_score(length);
            lengths.push(length as f64);
            scores.push(score);
            output.insert_row(&row.id, metrics! { "length" => length, "length_score" => score });
        }

        let mut sorted = lengths.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));

        Ok(output
            .with_summary("average_length", mean(&lengths))
            .with_summary("median_length", median(&sorted))
            .with_summary("min_length", sorted.first().copied().unwrap_or(0.0))
            .with_summary("max_length", sorted.last().copied().unwrap_or(0.0))
            .with_summary("average_length_score", mean(&scores)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Record;
    use serde_json::json;

    #[test]
    fn test_length_score_bands() {
        assert_eq!(length_score(0), 0.0);
        assert_eq!(length_score(1), 1.0);
        assert_eq!(length_score(500), 1.0);
        assert!((length_score(1000) - 0.5).abs() < 1e-9);
        assert_eq!(length_score(5000), 0.1);
    }

    #[test]
    fn test_summary_statistics() {
        let rows = vec![
            Row::new("a", Record::new()).with_output(json!("abcd")),
            Row::new("b", Record::new()).with_output(json!("ab")),
            Row::new("c", Record::new()),
            Row::new("d", Record::new()).with_output(json!("abcdef")),
        ];
        let evaluator = ResponseLengthEvaluator::new(&EvaluatorConfig::new("len", "response_length"));
        let output = evaluator.evaluate(&rows).unwrap();

        assert_eq!(output.per_row["c"]["length"].as_numeric(), Some(0.0));
        assert_eq!(output.per_row["c"]["length_score"].as_numeric(), Some(0.0));
        assert_eq!(output.summary["average_length"].as_numeric(), Some(3.0));
        assert_eq!(output.summary["median_length"].as_numeric(), Some(3.0));
        assert_eq!(output.summary["min_length"].as_numeric(), Some(0.0));
        assert_eq!(output.summary["max_length"].as_numeric(), Some(6.0));
        assert_eq!(output.summary["average_length_score"].as_numeric(), Some(0.75));
    }

    #[test]
    fn test_empty_batch_is_all_zero() {
        let evaluator = ResponseLengthEvaluator::new(&EvaluatorConfig::new("len", ""));
        let output = evaluator.evaluate(&[]).unwrap();
        for value in output.summary.values() {
            assert_eq!(value.as_numeric(), Some(0.0));
        }
    }
}
