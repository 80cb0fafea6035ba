//! Evaluators that ship with the harness.
//!
//! | name                  | per-row metrics                                |
//! |-----------------------|------------------------------------------------|
//! | `equivalent`          | `match`, `score`                               |
//! | `response_length`     | `length`, `length_score`                       |
//! | `accuracy_checker`    | `exact_match`, `output`, `expected`            |
//! | `advanced_quality`    | `quality_score` plus its indicators            |
//! | `advanced_coherence`  | `coherence_score` plus its indicators          |
//! | `sentiment_evaluator` | `sentiment`, `sentiment_score`, word counts    |

mod accuracy;
mod equivalent;
mod heuristics;
mod length;

pub use accuracy::{AccuracyCheckerEvaluator, extract_numbers, is_correct};
pub use equivalent::EquivalentEvaluator;
pub use heuristics::{CoherenceEvaluator, QualityEvaluator, SentimentEvaluator};
pub use length::{ResponseLengthEvaluator, length_score};

use super::registry::EvaluatorRegistry;

/// Register every built-in evaluator under its conventional name.
pub fn register_builtins(registry: &mut EvaluatorRegistry) {
    registry.register("equivalent", |config| Box::new(EquivalentEvaluator::new(config)));
    registry.register("response_length", |config| {
        Box::new(ResponseLengthEvaluator::new(config))
    });
    registry.register("accuracy_checker", |config| {
        Box::new(AccuracyCheckerEvaluator::new(config))
    });
    registry.register("advanced_quality", |config| Box::new(QualityEvaluator::new(config)));
    registry.register("advanced_coherence", |config| {
        Box::new(CoherenceEvaluator::new(config))
    });
    registry.register("sentiment_evaluator", |config| {
        Box::new(SentimentEvaluator::new(config))
    });
}
