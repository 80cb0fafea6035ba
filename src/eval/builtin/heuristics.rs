//! Keyword and structure heuristics: quality, coherence and sentiment.
//!
//! Each evaluator derives a handful of indicators from the output text and
//! combines them as a weighted sum in `[0, 1]`.

use crate::config::EvaluatorConfig;
use crate::error::EvaluatorError;
use crate::eval::metric::{Evaluator, EvaluatorOutput};
use crate::metrics;
use crate::model::{Row, output_text};
use regex::Regex;
use std::sync::LazyLock;

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+").expect("sentence pattern is valid"));

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("digit pattern is valid"));

static LOGICAL_FLOW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(first|then|next|finally|therefore|because|since)\b")
        .expect("connective pattern is valid")
});

static LOWERCASE_AFTER_STOP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]\s*[a-z]").expect("tone pattern is valid"));

const COHERENCE_POSITIVE: [&str; 6] = ["correct", "accurate", "good", "right", "proper", "valid"];
const COHERENCE_NEGATIVE: [&str; 6] = ["wrong", "incorrect", "error", "bad", "invalid", "false"];

const SENTIMENT_POSITIVE: [&str; 7] = ["good", "great", "excellent", "helpful", "correct", "yes", "right"];
const SENTIMENT_NEGATIVE: [&str; 7] = ["bad", "wrong", "error", "incorrect", "no", "fail", "cannot"];

fn count_present(text: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|k| text.contains(*k)).count()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn sample_stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

fn flag(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

/// Rewards length, sentence structure, numbers and a capitalized opening.
#[derive(Debug, Clone)]
pub struct QualityEvaluator {
    name: String,
}

impl QualityEvaluator {
    pub fn new(config: &EvaluatorConfig) -> Self {
        Self {
            name: config.display_name().to_string(),
        }
    }
}

impl Evaluator for QualityEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, rows: &[Row]) -> Result<EvaluatorOutput, EvaluatorError> {
        let mut output = EvaluatorOutput::new(&self.name);
        let mut scores = Vec::with_capacity(rows.len());

        for row in rows {
            let text = output_text(row);
            let word_count = text.split_whitespace().count();
            let sentence_count = SENTENCE_END.find_iter(&text).count();
            let has_numbers = DIGITS.is_match(&text);
            let capitalized = text.chars().next().is_some_and(char::is_uppercase);

            let score = (word_count as f64 / 10.0).min(1.0) * 0.3
                + (sentence_count as f64 / 3.0).min(1.0) * 0.2
                + if has_numbers { 0.2 } else { 0.0 }
                + if capitalized { 0.3 } else { 0.0 };
            scores.push(score);

            output.insert_row(
                &row.id,
                metrics! {
                    "quality_score" => score,
                    "word_count" => word_count,
                    "sentence_count" => sentence_count,
                    "has_numbers" => flag(has_numbers),
                    "proper_capitalization" => flag(capitalized),
                },
            );
        }

        let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Ok(output
            .with_summary("average_quality", mean(&scores))
            .with_summary("min_quality", if scores.is_empty() { 0.0 } else { min })
            .with_summary("max_quality", if scores.is_empty() { 0.0 } else { max })
            .with_summary("quality_std", sample_stdev(&scores)))
    }
}

/// Rewards positive wording, logical connectives and consistent sentence capitalization.
#[derive(Debug, Clone)]
pub struct CoherenceEvaluator {
    name: String,
}

impl CoherenceEvaluator {
    pub fn new(config: &EvaluatorConfig) -> Self {
        Self {
            name: config.display_name().to_string(),
        }
    }
}

impl Evaluator for CoherenceEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, rows: &[Row]) -> Result<EvaluatorOutput, EvaluatorError> {
        let mut output = EvaluatorOutput::new(&self.name);
        let mut scores = Vec::with_capacity(rows.len());

        for row in rows {
            let text = output_text(row);
            let lower = text.to_lowercase();
            let positive = count_present(&lower, &COHERENCE_POSITIVE);
            let negative = count_present(&lower, &COHERENCE_NEGATIVE);
            let logical_flow = LOGICAL_FLOW.is_match(&lower);
            let consistent_tone = !LOWERCASE_AFTER_STOP.is_match(&text);

            let score = (if positive > negative { 0.3 } else { 0.1 })
                + if logical_flow { 0.3 } else { 0.0 }
                + if consistent_tone { 0.4 } else { 0.2 };
            scores.push(score);

            output.insert_row(
                &row.id,
                metrics! {
                    "coherence_score" => score,
                    "positive_indicators" => positive,
                    "negative_indicators" => negative,
                    "has_logical_flow" => flag(logical_flow),
                    "consistent_tone" => flag(consistent_tone),
                },
            );
        }

        let coherent = scores.iter().filter(|s| **s > 0.5).count();
        Ok(output
            .with_summary("average_coherence", mean(&scores))
            .with_summary("coherent_responses", coherent)
            .with_summary("total_responses", scores.len()))
    }
}

/// Keyword sentiment. Rows carry a textual `sentiment` label next to the score.
#[derive(Debug, Clone)]
pub struct SentimentEvaluator {
    name: String,
}

impl SentimentEvaluator {
    pub fn new(config: &EvaluatorConfig) -> Self {
        Self {
            name: config.display_name().to_string(),
        }
    }
}

impl Evaluator for SentimentEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, rows: &[Row]) -> Result<EvaluatorOutput, EvaluatorError> {
        let mut output = EvaluatorOutput::new(&self.name);
        let mut scores = Vec::with_capacity(rows.len());
        let (mut positive_rows, mut negative_rows, mut neutral_rows) = (0usize, 0usize, 0usize);

        for row in rows {
            let lower = output_text(row).to_lowercase();
            let pos = count_present(&lower, &SENTIMENT_POSITIVE);
            let neg = count_present(&lower, &SENTIMENT_NEGATIVE);

            let (label, score) = if pos > neg {
                positive_rows += 1;
                ("positive", (pos as f64 / 3.0).min(1.0))
            } else if neg > pos {
                negative_rows += 1;
                ("negative", (1.0 - neg as f64 / 3.0).max(0.0))
            } else {
                neutral_rows += 1;
                ("neutral", 0.5)
            };
            scores.push(score);

            output.insert_row(
                &row.id,
                metrics! {
                    "sentiment" => label,
                    "sentiment_score" => score,
                    "positive_words" => pos,
                    "negative_words" => neg,
                },
            );
        }

        let ratio = |count: usize| {
            if rows.is_empty() {
                0.0
            } else {
                count as f64 / rows.len() as f64
            }
        };
        Ok(output
            .with_summary("average_sentiment_score", mean(&scores))
            .with_summary("positive_ratio", ratio(positive_rows))
            .with_summary("negative_ratio", ratio(negative_rows))
            .with_summary("neutral_ratio", ratio(neutral_rows)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::MetricValue;
    use crate::model::Record;
    use serde_json::json;

    fn rows(outputs: &[&str]) -> Vec<Row> {
        outputs
            .iter()
            .enumerate()
            .map(|(i, text)| Row::new(format!("r{i}"), Record::new()).with_output(json!(text)))
            .collect()
    }

    fn config(name: &str) -> EvaluatorConfig {
        EvaluatorConfig::new(name, name)
    }

    #[test]
    fn test_quality_full_marks() {
        let text = "The total is 42. It was computed twice. Both runs agree on it!";
        let output = QualityEvaluator::new(&config("advanced_quality"))
            .evaluate(&rows(&[text]))
            .unwrap();
        let row = &output.per_row["r0"];
        assert_eq!(row["has_numbers"].as_numeric(), Some(1.0));
        assert_eq!(row["sentence_count"].as_numeric(), Some(3.0));
        assert!((row["quality_score"].as_numeric().unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(output.summary["quality_std"].as_numeric(), Some(0.0));
    }

    #[test]
    fn test_quality_summary_spread() {
        let output = QualityEvaluator::new(&config("q"))
            .evaluate(&rows(&["", "Hello"]))
            .unwrap();
        // "" scores 0; "Hello" scores 0.03 + 0.3
        let min = output.summary["min_quality"].as_numeric().unwrap();
        let max = output.summary["max_quality"].as_numeric().unwrap();
        assert_eq!(min, 0.0);
        assert!((max - 0.33).abs() < 1e-9);
        assert!(output.summary["quality_std"].as_numeric().unwrap() > 0.0);
    }

    #[test]
    fn test_coherence_indicators() {
        let output = CoherenceEvaluator::new(&config("advanced_coherence"))
            .evaluate(&rows(&[
                "First check the input. Then the result is correct.",
                "wrong. bad output",
            ]))
            .unwrap();

        let good = &output.per_row["r0"];
        assert_eq!(good["has_logical_flow"].as_numeric(), Some(1.0));
        assert_eq!(good["consistent_tone"].as_numeric(), Some(1.0));
        assert!((good["coherence_score"].as_numeric().unwrap() - 1.0).abs() < 1e-9);

        let bad = &output.per_row["r1"];
        assert_eq!(bad["consistent_tone"].as_numeric(), Some(0.0));
        assert!((bad["coherence_score"].as_numeric().unwrap() - 0.3).abs() < 1e-9);

        assert_eq!(output.summary["coherent_responses"].as_numeric(), Some(1.0));
        assert_eq!(output.summary["total_responses"].as_numeric(), Some(2.0));
    }

    #[test]
    fn test_sentiment_labels_are_text() {
        let output = SentimentEvaluator::new(&config("sentiment_evaluator"))
            .evaluate(&rows(&["great and helpful", "this is wrong", "plain"]))
            .unwrap();
        assert_eq!(output.per_row["r0"]["sentiment"], MetricValue::from("positive"));
        assert_eq!(output.per_row["r1"]["sentiment"], MetricValue::from("negative"));
        assert_eq!(output.per_row["r2"]["sentiment_score"].as_numeric(), Some(0.5));
        let third = 1.0 / 3.0;
        assert!((output.summary["neutral_ratio"].as_numeric().unwrap() - third).abs() < 1e-9);
    }
}
