//! Answer quality scoring through an LLM judge.
//!
//! The aggregator calls the judge once per `(TestCase, answer)` pair and
//! reduces the successful scores to dataset-level means. Judge failures are
//! recorded per case and never contribute a value to any mean.

use crate::dataset::TestCase;
use crate::error::ErrorKind;
use crate::judge::{Judge, JudgeError};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Rubric scores for one generated answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationScores {
    /// Factual agreement with the reference answer (1-5).
    pub correctness: u8,
    /// Coverage of the reference's key points (1-5).
    pub completeness: u8,
    /// How directly the answer addresses the question (1-5).
    pub relevance: u8,
    /// Clarity and structure (1-5).
    pub coherence: u8,
    /// Judge's explanation.
    pub reasoning: String,
    /// Mean of the four criteria.
    pub overall_score: f64,
}

impl GenerationScores {
    /// Build scores; `overall_score` is always derived from the four criteria.
    pub fn new(
        correctness: u8,
        completeness: u8,
        relevance: u8,
        coherence: u8,
        reasoning: impl Into<String>,
    ) -> Self {
        let overall_score =
            (correctness as f64 + completeness as f64 + relevance as f64 + coherence as f64) / 4.0;
        Self {
            correctness,
            completeness,
            relevance,
            coherence,
            reasoning: reasoning.into(),
            overall_score,
        }
    }
}

/// Result of judging one answer: scores, or the reason there are none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JudgeOutcome {
    Scored(GenerationScores),
    Failed { kind: ErrorKind, message: String },
}

impl JudgeOutcome {
    pub fn scores(&self) -> Option<&GenerationScores> {
        match self {
            JudgeOutcome::Scored(scores) => Some(scores),
            JudgeOutcome::Failed { .. } => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            JudgeOutcome::Scored(_) => None,
            JudgeOutcome::Failed { kind, .. } => Some(*kind),
        }
    }
}

impl From<JudgeError> for JudgeOutcome {
    fn from(err: JudgeError) -> Self {
        JudgeOutcome::Failed {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Judge outcome tagged with its test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCase {
    pub test_case_id: String,
    pub outcome: JudgeOutcome,
}

/// A case the judge could not score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeFailure {
    pub test_case_id: String,
    pub kind: ErrorKind,
}

/// Dataset-level generation quality.
///
/// Means are `None` when no case was scored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationSummary {
    pub scored_cases: usize,
    pub failed_cases: usize,
    pub judge_success_rate: Option<f64>,
    pub mean_correctness: Option<f64>,
    pub mean_completeness: Option<f64>,
    pub mean_relevance: Option<f64>,
    pub mean_coherence: Option<f64>,
    pub mean_overall_score: Option<f64>,
    pub failures: Vec<JudgeFailure>,
}

/// Drives the judge over answered cases and reduces the results.
pub struct GenerationMetricsAggregator {
    judge: Arc<dyn Judge>,
    concurrency: usize,
    max_attempts: u32,
    backoff: Duration,
}

impl GenerationMetricsAggregator {
    /// One judge call at a time, no retries.
    pub fn new(judge: Arc<dyn Judge>) -> Self {
        Self {
            judge,
            concurrency: 1,
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Maximum judge calls in flight during [`score_all`](Self::score_all).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Retry an unreachable judge up to `max_attempts` times in total,
    /// sleeping `backoff * 2^attempt` between attempts.
    pub fn with_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff = backoff;
        self
    }

    pub fn judge_name(&self) -> String {
        self.judge.name()
    }

    /// Score a single answer. Parse failures are never retried.
    pub async fn score_one(
        &self,
        question: &str,
        expected_answer: &str,
        generated_answer: &str,
    ) -> JudgeOutcome {
        let mut attempt: u32 = 0;
        loop {
            match self
                .judge
                .score(question, expected_answer, generated_answer)
                .await
            {
                Ok(scores) => return JudgeOutcome::Scored(scores),
                Err(JudgeError::Unavailable(msg)) if attempt + 1 < self.max_attempts => {
                    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                    let delay = self.backoff.saturating_mul(factor);
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "judge unavailable, retrying: {}",
                        msg
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return err.into(),
            }
        }
    }

    /// Score every pair, keeping input order.
    pub async fn score_all(&self, pairs: &[(&TestCase, &str)]) -> Vec<ScoredCase> {
        let semaphore = Semaphore::new(self.concurrency);
        let semaphore = &semaphore;

        let tasks = pairs.iter().map(|(case, answer)| async move {
            let _permit = semaphore.acquire().await.ok();
            debug!(test_case = %case.id, "scoring answer");
            ScoredCase {
                test_case_id: case.id.clone(),
                outcome: self
                    .score_one(&case.question, &case.expected_answer, answer)
                    .await,
            }
        });

        join_all(tasks).await
    }

    /// Reduce judge outcomes to means over the scored cases.
    pub fn summarize<'a, I>(outcomes: I) -> GenerationSummary
    where
        I: IntoIterator<Item = (&'a str, &'a JudgeOutcome)>,
    {
        let mut scored: Vec<&GenerationScores> = Vec::new();
        let mut failures = Vec::new();

        for (test_case_id, outcome) in outcomes {
            match outcome {
                JudgeOutcome::Scored(scores) => scored.push(scores),
                JudgeOutcome::Failed { kind, .. } => failures.push(JudgeFailure {
                    test_case_id: test_case_id.to_string(),
                    kind: *kind,
                }),
            }
        }

        let total = scored.len() + failures.len();

        GenerationSummary {
            scored_cases: scored.len(),
            failed_cases: failures.len(),
            judge_success_rate: if total == 0 {
                None
            } else {
                Some(scored.len() as f64 / total as f64)
            },
            mean_correctness: mean_of(&scored, |s| s.correctness as f64),
            mean_completeness: mean_of(&scored, |s| s.completeness as f64),
            mean_relevance: mean_of(&scored, |s| s.relevance as f64),
            mean_coherence: mean_of(&scored, |s| s.coherence as f64),
            mean_overall_score: mean_of(&scored, |s| s.overall_score),
            failures,
        }
    }
}

fn mean_of(scored: &[&GenerationScores], f: impl Fn(&GenerationScores) -> f64) -> Option<f64> {
    if scored.is_empty() {
        return None;
    }
    Some(scored.iter().map(|s| f(*s)).sum::<f64>() / scored.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Judge that replays a script of responses, one per call.
    struct ScriptedJudge {
        script: Mutex<Vec<std::result::Result<GenerationScores, JudgeError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedJudge {
        fn new(mut script: Vec<std::result::Result<GenerationScores, JudgeError>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Judge for ScriptedJudge {
        fn name(&self) -> String {
            "scripted".to_string()
        }

        async fn score(
            &self,
            _question: &str,
            _expected_answer: &str,
            _generated_answer: &str,
        ) -> std::result::Result<GenerationScores, JudgeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(JudgeError::Unavailable("script exhausted".to_string())))
        }
    }

    /// Judge that scores by answer length, so results are order-checkable.
    struct LengthJudge;

    #[async_trait]
    impl Judge for LengthJudge {
        fn name(&self) -> String {
            "length".to_string()
        }

        async fn score(
            &self,
            _question: &str,
            _expected_answer: &str,
            generated_answer: &str,
        ) -> std::result::Result<GenerationScores, JudgeError> {
            let n = generated_answer.len().clamp(1, 5) as u8;
            tokio::time::sleep(Duration::from_millis(10 * (6 - n as u64))).await;
            Ok(GenerationScores::new(n, n, n, n, "by length"))
        }
    }

    fn case(id: &str) -> TestCase {
        TestCase {
            id: id.to_string(),
            question: "q".to_string(),
            expected_answer: "a".to_string(),
            expected_pages: vec![],
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn test_overall_score_is_mean_of_criteria() {
        let scores = GenerationScores::new(5, 4, 3, 4, "ok");
        assert!((scores.overall_score - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let scored = serde_json::to_value(JudgeOutcome::Scored(GenerationScores::new(
            5, 5, 5, 5, "fine",
        )))
        .unwrap();
        assert_eq!(scored["status"], "scored");
        assert_eq!(scored["correctness"], 5);

        let failed = serde_json::to_value(JudgeOutcome::Failed {
            kind: ErrorKind::JudgeParseError,
            message: "missing coherence".to_string(),
        })
        .unwrap();
        assert_eq!(failed["status"], "failed");
        assert_eq!(failed["kind"], "judge_parse_error");
    }

    #[test]
    fn test_summary_means_over_successes_only() {
        let a = JudgeOutcome::Scored(GenerationScores::new(5, 5, 5, 5, ""));
        let b = JudgeOutcome::Scored(GenerationScores::new(3, 1, 3, 1, ""));
        let c = JudgeOutcome::Failed {
            kind: ErrorKind::JudgeParseError,
            message: "bad".to_string(),
        };

        let summary =
            GenerationMetricsAggregator::summarize([("a", &a), ("b", &b), ("c", &c)]);

        assert_eq!(summary.scored_cases, 2);
        assert_eq!(summary.failed_cases, 1);
        assert_eq!(summary.mean_correctness, Some(4.0));
        assert_eq!(summary.mean_completeness, Some(3.0));
        assert_eq!(summary.mean_overall_score, Some(3.5));
        assert_eq!(
            summary.failures,
            vec![JudgeFailure {
                test_case_id: "c".to_string(),
                kind: ErrorKind::JudgeParseError
            }]
        );
    }

    #[test]
    fn test_summary_all_failed_is_undefined_not_zero() {
        let failed = JudgeOutcome::Failed {
            kind: ErrorKind::JudgeUnavailable,
            message: "down".to_string(),
        };
        let summary = GenerationMetricsAggregator::summarize([("x", &failed), ("y", &failed)]);

        assert_eq!(summary.scored_cases, 0);
        assert_eq!(summary.judge_success_rate, Some(0.0));
        assert_eq!(summary.mean_correctness, None);
        assert_eq!(summary.mean_overall_score, None);

        let json = serde_json::to_value(&summary).unwrap();
        assert!(json["mean_coherence"].is_null());
    }

    #[tokio::test]
    async fn test_retries_only_unavailable() {
        let judge = Arc::new(ScriptedJudge::new(vec![
            Err(JudgeError::Unavailable("connection refused".to_string())),
            Err(JudgeError::Unavailable("connection refused".to_string())),
            Ok(GenerationScores::new(4, 4, 4, 4, "ok")),
        ]));
        let aggregator =
            GenerationMetricsAggregator::new(judge.clone()).with_retry(3, Duration::ZERO);

        let outcome = aggregator.score_one("q", "a", "b").await;
        assert!(outcome.scores().is_some());
        assert_eq!(judge.calls.load(Ordering::SeqCst), 3);

        let judge = Arc::new(ScriptedJudge::new(vec![Err(JudgeError::Parse(
            "missing field `coherence`".to_string(),
        ))]));
        let aggregator =
            GenerationMetricsAggregator::new(judge.clone()).with_retry(3, Duration::ZERO);

        let outcome = aggregator.score_one("q", "a", "b").await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::JudgeParseError));
        assert_eq!(judge.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let judge = Arc::new(ScriptedJudge::new(vec![]));
        let aggregator =
            GenerationMetricsAggregator::new(judge.clone()).with_retry(2, Duration::ZERO);

        let outcome = aggregator.score_one("q", "a", "b").await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::JudgeUnavailable));
        assert_eq!(judge.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_score_all_keeps_input_order() {
        let aggregator = GenerationMetricsAggregator::new(Arc::new(LengthJudge)).with_concurrency(4);
        let cases = [case("one"), case("two"), case("three"), case("four")];
        let pairs: Vec<(&TestCase, &str)> = vec![
            (&cases[0], "a"),
            (&cases[1], "abcde"),
            (&cases[2], "abc"),
            (&cases[3], "ab"),
        ];

        let scored = aggregator.score_all(&pairs).await;

        let ids: Vec<&str> = scored.iter().map(|s| s.test_case_id.as_str()).collect();
        assert_eq!(ids, vec!["one", "two", "three", "four"]);
        let correctness: Vec<u8> = scored
            .iter()
            .map(|s| s.outcome.scores().unwrap().correctness)
            .collect();
        assert_eq!(correctness, vec![1, 5, 3, 2]);
    }
}
