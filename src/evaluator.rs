//! Evaluation runner: drives every test case through the RAG pipeline and the
//! judge, then reduces the outcomes into an [`EvaluationReport`].
//!
//! Each case moves through `Pending -> Retrieving -> Generating -> Scoring ->
//! Done`, or stops in `Failed` at whichever step went wrong. A failed case is
//! recorded and the run carries on.
//!
//! The optional per-case time budget is charged only while the pipeline
//! works on the case. Waiting for a case slot or a generation slot is free.

use crate::config::Config;
use crate::dataset::{PageRef, TestCase, TestDataset};
use crate::error::{ErrorKind, EvalError, Result};
use crate::judge::Judge;
use crate::metrics::{
    GenerationMetricsAggregator, JudgeOutcome, RetrievalMetrics, RetrievalMetricsAggregator,
    calculate_retrieval_metrics,
};
use crate::pipeline::{
    Generator, PageImage, PageStore, RetrievedPage, Retriever, expand_with_overlap,
};
use crate::report::{EvaluationReport, RunSettings};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::error::Elapsed;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

/// Where a case is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStage {
    Pending,
    Retrieving,
    Generating,
    Scoring,
    Done,
    Failed,
}

/// A case that went through the whole pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_case_id: String,
    pub question: String,
    pub expected_answer: String,
    pub generated_answer: String,
    pub expected_pages: Vec<PageRef>,
    /// Pages returned by the retriever, best first.
    pub retrieved_pages: Vec<RetrievedPage>,
    /// Pages whose images were handed to the generator.
    pub expanded_pages: Vec<PageRef>,
    pub retrieval_metrics: RetrievalMetrics,
    pub generation_scores: JudgeOutcome,
    /// Duration of the generation call alone.
    pub latency_ms: f64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl TestResult {
    pub fn has_expected_pages(&self) -> bool {
        !self.expected_pages.is_empty()
    }
}

/// A case that stopped before producing an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedCase {
    pub test_case_id: String,
    pub question: String,
    pub expected_answer: String,
    /// Step that failed.
    pub stage: CaseStage,
    pub error_kind: ErrorKind,
    pub message: String,
    /// Empty unless retrieval succeeded.
    pub retrieved_pages: Vec<RetrievedPage>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Exactly one of these is produced per test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaseOutcome {
    Completed(TestResult),
    Failed(FailedCase),
}

impl CaseOutcome {
    pub fn test_case_id(&self) -> &str {
        match self {
            CaseOutcome::Completed(result) => &result.test_case_id,
            CaseOutcome::Failed(failed) => &failed.test_case_id,
        }
    }

    pub fn completed(&self) -> Option<&TestResult> {
        match self {
            CaseOutcome::Completed(result) => Some(result),
            CaseOutcome::Failed(_) => None,
        }
    }

    pub fn failed(&self) -> Option<&FailedCase> {
        match self {
            CaseOutcome::Completed(_) => None,
            CaseOutcome::Failed(failed) => Some(failed),
        }
    }
}

/// Runs a dataset against the pipeline and the judge.
pub struct Evaluator {
    config: Config,
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
    pages: Arc<dyn PageStore>,
    scorer: GenerationMetricsAggregator,
    generation_slots: Semaphore,
}

impl Evaluator {
    pub fn new(
        config: Config,
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
        pages: Arc<dyn PageStore>,
        judge: Arc<dyn Judge>,
    ) -> Self {
        let scorer = GenerationMetricsAggregator::new(judge).with_retry(
            config.judge.max_retries,
            Duration::from_millis(config.evaluation.retry_backoff_ms),
        );
        let generation_slots = Semaphore::new(config.evaluation.max_concurrent_generations.max(1));

        Self {
            config,
            retriever,
            generator,
            pages,
            scorer,
            generation_slots,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Evaluate every case and build the report.
    ///
    /// Fails only if the dataset itself is invalid; individual case failures
    /// are part of the report.
    pub async fn run(&self, dataset: &TestDataset) -> Result<EvaluationReport> {
        dataset.validate()?;

        let started = Instant::now();
        let total = dataset.len();
        let finished = AtomicUsize::new(0);
        let semaphore = Semaphore::new(self.config.evaluation.concurrency.max(1));
        let (finished, semaphore) = (&finished, &semaphore);

        info!(
            dataset = %dataset.dataset_name,
            cases = total,
            judge = %self.scorer.judge_name(),
            "starting evaluation"
        );

        let tasks = dataset.test_cases.iter().enumerate().map(|(index, case)| async move {
            debug!(test_case = %case.id, stage = ?CaseStage::Pending, "waiting for a slot");
            let _permit = semaphore.acquire().await.ok();
            let outcome = self.evaluate_case(case).await;

            if self.config.evaluation.save_intermediate {
                if let Err(e) = self.save_intermediate(index, &outcome) {
                    warn!(test_case = %case.id, "could not save intermediate result: {}", e);
                }
            }

            let done = finished.fetch_add(1, Ordering::SeqCst) + 1;
            info!("[{}/{}] {} {}", done, total, case.id, status_label(&outcome));
            outcome
        });

        let outcomes = join_all(tasks).await;

        Ok(assemble_report(
            &dataset.dataset_name,
            RunSettings::from_config(&self.config, self.scorer.judge_name()),
            outcomes,
            started.elapsed(),
        ))
    }

    /// Run one case through retrieval, generation and scoring.
    pub async fn evaluate_case(&self, case: &TestCase) -> CaseOutcome {
        let rag = &self.config.rag;
        let mut budget = CaseBudget::new(self.config.evaluation.case_timeout());

        debug!(test_case = %case.id, stage = ?CaseStage::Retrieving, "retrieving pages");
        let retrieved = match budget
            .spend(self.retriever.retrieve(&case.question, rag.top_k))
            .await
        {
            Ok(Ok(pages)) => pages,
            Ok(Err(e)) => {
                return fail(case, CaseStage::Retrieving, ErrorKind::RetrievalError, e, Vec::new());
            }
            Err(_) => {
                return fail(
                    case,
                    CaseStage::Retrieving,
                    ErrorKind::TimeoutError,
                    deadline_message(&self.config),
                    Vec::new(),
                );
            }
        };

        let retrieved_refs: Vec<PageRef> = retrieved.iter().map(RetrievedPage::page).collect();
        let expanded_pages = expand_with_overlap(
            &retrieved_refs,
            rag.pages_before,
            rag.pages_after,
            self.pages.as_ref(),
        );

        debug!(
            test_case = %case.id,
            stage = ?CaseStage::Generating,
            pages = expanded_pages.len(),
            "loading page images"
        );
        let images = match budget.spend(self.load_images(case, &expanded_pages)).await {
            Ok(images) => images,
            Err(_) => {
                return fail(
                    case,
                    CaseStage::Generating,
                    ErrorKind::TimeoutError,
                    deadline_message(&self.config),
                    retrieved,
                );
            }
        };

        let slot = self.generation_slots.acquire().await.ok();
        debug!(
            test_case = %case.id,
            stage = ?CaseStage::Generating,
            images = images.len(),
            "generating answer"
        );
        let started = Instant::now();
        let generated_answer = match budget
            .spend(self.generator.generate(&case.question, &images))
            .await
        {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                return fail(case, CaseStage::Generating, ErrorKind::GenerationError, e, retrieved);
            }
            Err(_) => {
                return fail(
                    case,
                    CaseStage::Generating,
                    ErrorKind::TimeoutError,
                    deadline_message(&self.config),
                    retrieved,
                );
            }
        };
        let latency = started.elapsed();
        drop(slot);

        let k = rag.top_k.min(retrieved_refs.len());
        let retrieval_metrics = calculate_retrieval_metrics(&case.expected_pages, &retrieved_refs, k);

        debug!(test_case = %case.id, stage = ?CaseStage::Scoring, "judging answer");
        let generation_scores = self
            .scorer
            .score_one(&case.question, &case.expected_answer, &generated_answer)
            .await;
        if let JudgeOutcome::Failed { kind, message } = &generation_scores {
            warn!(test_case = %case.id, %kind, "answer not scored: {}", message);
        }

        debug!(test_case = %case.id, stage = ?CaseStage::Done, "case finished");
        CaseOutcome::Completed(TestResult {
            test_case_id: case.id.clone(),
            question: case.question.clone(),
            expected_answer: case.expected_answer.clone(),
            generated_answer,
            expected_pages: case.expected_pages.clone(),
            retrieved_pages: retrieved,
            expanded_pages,
            retrieval_metrics,
            generation_scores,
            latency_ms: latency.as_secs_f64() * 1000.0,
            metadata: case.metadata.clone(),
        })
    }

    /// Load the images of `pages`; unreadable pages are skipped.
    async fn load_images(&self, case: &TestCase, pages: &[PageRef]) -> Vec<PageImage> {
        join_all(pages.iter().map(|page| self.pages.load(*page)))
            .await
            .into_iter()
            .filter_map(|loaded| match loaded {
                Ok(image) => Some(image),
                Err(e) => {
                    warn!(test_case = %case.id, "skipping page image: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Write one outcome to `<output_dir>/cases/<index>_<id>.json`.
    fn save_intermediate(&self, index: usize, outcome: &CaseOutcome) -> Result<PathBuf> {
        let dir = self.config.evaluation.output_dir.join("cases");
        fs::create_dir_all(&dir).map_err(|e| EvalError::io(&dir, e))?;

        let path = intermediate_path(&dir, index, outcome.test_case_id());
        let content = serde_json::to_string_pretty(outcome)
            .map_err(|e| EvalError::Serialization(e.to_string()))?;
        fs::write(&path, content).map_err(|e| EvalError::io(&path, e))?;
        Ok(path)
    }
}

/// Re-judge the answers of an existing report and rebuild its aggregates.
///
/// Failed cases stay failed; retrieval results are kept as they are.
pub async fn rescore_report(
    report: &EvaluationReport,
    scorer: &GenerationMetricsAggregator,
) -> EvaluationReport {
    let completed: Vec<(usize, TestCase, &str)> = report
        .results
        .iter()
        .enumerate()
        .filter_map(|(idx, outcome)| {
            let result = outcome.completed()?;
            let case = TestCase {
                id: result.test_case_id.clone(),
                question: result.question.clone(),
                expected_answer: result.expected_answer.clone(),
                expected_pages: result.expected_pages.clone(),
                metadata: result.metadata.clone(),
            };
            Some((idx, case, result.generated_answer.as_str()))
        })
        .collect();

    let pairs: Vec<(&TestCase, &str)> = completed.iter().map(|(_, case, answer)| (case, *answer)).collect();
    let scored = scorer.score_all(&pairs).await;

    let mut outcomes = report.results.clone();
    for ((idx, _, _), scored_case) in completed.iter().zip(scored) {
        if let CaseOutcome::Completed(result) = &mut outcomes[*idx] {
            result.generation_scores = scored_case.outcome;
        }
    }

    let mut settings = report.evaluation_config.clone();
    settings.judge = scorer.judge_name();

    assemble_report(
        &report.dataset_name,
        settings,
        outcomes,
        Duration::from_secs_f64(report.total_time_secs.max(0.0)),
    )
}

/// Reduce per-case outcomes into the final report.
///
/// Failed cases count towards `error_counts` only; judge failures keep the
/// case in the retrieval means but out of the generation means.
pub fn assemble_report(
    dataset_name: &str,
    settings: RunSettings,
    outcomes: Vec<CaseOutcome>,
    total_time: Duration,
) -> EvaluationReport {
    let mut retrieval = RetrievalMetricsAggregator::new();
    let mut error_counts: BTreeMap<ErrorKind, usize> = BTreeMap::new();
    let mut latencies = Vec::new();

    for outcome in &outcomes {
        match outcome {
            CaseOutcome::Completed(result) => {
                retrieval.add(result.has_expected_pages(), result.retrieval_metrics);
                latencies.push(result.latency_ms);
                if let Some(kind) = result.generation_scores.error_kind() {
                    *error_counts.entry(kind).or_insert(0) += 1;
                }
            }
            CaseOutcome::Failed(failed) => {
                *error_counts.entry(failed.error_kind).or_insert(0) += 1;
            }
        }
    }

    let generation = GenerationMetricsAggregator::summarize(outcomes.iter().filter_map(|o| {
        o.completed()
            .map(|r| (r.test_case_id.as_str(), &r.generation_scores))
    }));

    let mean_latency_ms = if latencies.is_empty() {
        None
    } else {
        Some(latencies.iter().sum::<f64>() / latencies.len() as f64)
    };

    EvaluationReport::new(
        dataset_name,
        settings,
        retrieval.summary(),
        generation,
        mean_latency_ms,
        total_time,
        error_counts,
        outcomes,
    )
}

/// Time the pipeline may still spend on one case.
struct CaseBudget {
    remaining: Option<Duration>,
}

impl CaseBudget {
    fn new(limit: Option<Duration>) -> Self {
        Self { remaining: limit }
    }

    /// Run `future` against what is left and deduct the time it took.
    async fn spend<F: Future>(&mut self, future: F) -> std::result::Result<F::Output, Elapsed> {
        let Some(remaining) = self.remaining else {
            return Ok(future.await);
        };

        let started = Instant::now();
        let output = timeout(remaining, future).await;
        self.remaining = Some(remaining.saturating_sub(started.elapsed()));
        output
    }
}

fn fail(
    case: &TestCase,
    stage: CaseStage,
    error_kind: ErrorKind,
    cause: impl ToString,
    retrieved_pages: Vec<RetrievedPage>,
) -> CaseOutcome {
    let message = cause.to_string();
    warn!(test_case = %case.id, ?stage, %error_kind, "case failed: {}", message);

    CaseOutcome::Failed(FailedCase {
        test_case_id: case.id.clone(),
        question: case.question.clone(),
        expected_answer: case.expected_answer.clone(),
        stage,
        error_kind,
        message,
        retrieved_pages,
        metadata: case.metadata.clone(),
    })
}

fn deadline_message(config: &Config) -> String {
    format!(
        "case exceeded its {}s budget",
        config.evaluation.case_timeout_secs.unwrap_or_default()
    )
}

fn status_label(outcome: &CaseOutcome) -> String {
    match outcome {
        CaseOutcome::Completed(result) => match &result.generation_scores {
            JudgeOutcome::Scored(scores) => format!("ok (overall {:.2})", scores.overall_score),
            JudgeOutcome::Failed { kind, .. } => format!("ok (unscored: {})", kind),
        },
        CaseOutcome::Failed(failed) => format!("FAILED ({})", failed.error_kind),
    }
}

/// Test case ids are free-form; keep file names portable. The dataset index
/// keeps ids that clean up to the same name apart.
fn intermediate_path(dir: &Path, index: usize, test_case_id: &str) -> PathBuf {
    let name: String = test_case_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    dir.join(format!("{:04}_{}.json", index, name))
}
