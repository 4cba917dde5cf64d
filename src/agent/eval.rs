//! Evaluators scored against a run's final answer.
//!
//! Evaluators run after the final response and before the run completes.
//! Each produces one `Eval` event. A failing evaluator is logged and skipped;
//! it never changes how the run ends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Score produced by an [`Evaluator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalOutcome {
    /// Score in `0.0..=1.0`
    pub score: f64,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl EvalOutcome {
    pub fn pass(score: f64) -> Self {
        Self {
            score,
            passed: true,
            detail: None,
        }
    }

    pub fn fail(score: f64) -> Self {
        Self {
            score,
            passed: false,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: &str) -> Self {
        self.detail = Some(detail.to_string());
        self
    }
}

#[async_trait]
pub trait Evaluator: Send + Sync {
    fn name(&self) -> &str;

    async fn evaluate(&self, input: &str, output: &str) -> Result<EvalOutcome>;
}

/// Passes when the answer contains every expected phrase (case-insensitive).
/// The score is the fraction of phrases found.
///
/// # Example
/// ```rust
/// use agentrun::agent::{ContainsEvaluator, Evaluator};
///
/// # tokio_test::block_on(async {
/// let eval = ContainsEvaluator::new(&["ada"]);
/// let outcome = eval.evaluate("get expert1 name", "Expert1 is Ada Lovelace").await.unwrap();
/// assert!(outcome.passed);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct ContainsEvaluator {
    expected: Vec<String>,
}

impl ContainsEvaluator {
    pub fn new(expected: &[&str]) -> Self {
        Self {
            expected: expected.iter().map(|s| s.to_lowercase()).collect(),
        }
    }
}

#[async_trait]
impl Evaluator for ContainsEvaluator {
    fn name(&self) -> &str {
        "contains"
    }

    async fn evaluate(&self, _input: &str, output: &str) -> Result<EvalOutcome> {
        if self.expected.is_empty() {
            return Ok(EvalOutcome::pass(1.0));
        }
        let haystack = output.to_lowercase();
        let missing: Vec<&str> = self
            .expected
            .iter()
            .filter(|e| !haystack.contains(e.as_str()))
            .map(String::as_str)
            .collect();
        let found = self.expected.len() - missing.len();
        let score = found as f64 / self.expected.len() as f64;

        Ok(if missing.is_empty() {
            EvalOutcome::pass(score)
        } else {
            EvalOutcome::fail(score).with_detail(&format!("missing: {}", missing.join(", ")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_contains_partial_score() {
        let eval = ContainsEvaluator::new(&["Ada", "Grace"]);
        let outcome = eval.evaluate("q", "only ada here").await.unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.score, 0.5);
        assert_eq!(outcome.detail.as_deref(), Some("missing: grace"));
    }

    #[tokio::test]
    async fn test_contains_empty_expectation_passes() {
        let outcome = ContainsEvaluator::new(&[]).evaluate("q", "").await.unwrap();
        assert!(outcome.passed);
        assert_eq!(outcome.score, 1.0);
    }
}
