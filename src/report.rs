//! Evaluation report and its Markdown, JSON and CSV renderings.
//!
//! Rendering never recomputes anything: every number comes from the
//! [`EvaluationReport`] as assembled at the end of a run. Undefined
//! aggregates are `null` in JSON, `n/a` in Markdown and empty in CSV.

use crate::config::{Config, JudgeType};
use crate::error::{ErrorKind, EvalError, Result};
use crate::evaluator::CaseOutcome;
use crate::metrics::{GenerationScores, GenerationSummary, JudgeOutcome, RetrievalSummary, round4};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings a run was made with, kept for reproducibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    pub judge_type: JudgeType,
    /// Judge backend and model, e.g. `hosted:gpt-4o`.
    pub judge: String,
    pub generator_model: String,
    pub top_k: usize,
    pub pages_before: u32,
    pub pages_after: u32,
    pub concurrency: usize,
    pub case_timeout_secs: Option<u64>,
}

impl RunSettings {
    pub fn from_config(config: &Config, judge: String) -> Self {
        Self {
            judge_type: config.judge.judge_type,
            judge,
            generator_model: config.rag.generator.model.clone(),
            top_k: config.rag.top_k,
            pages_before: config.rag.pages_before,
            pages_after: config.rag.pages_after,
            concurrency: config.evaluation.concurrency,
            case_timeout_secs: config.evaluation.case_timeout_secs,
        }
    }
}

/// Everything known about one evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub dataset_name: String,
    pub timestamp: DateTime<Utc>,
    pub evaluation_config: RunSettings,
    pub total_test_cases: usize,
    pub completed_cases: usize,
    pub failed_cases: usize,
    pub retrieval: RetrievalSummary,
    pub generation: GenerationSummary,
    /// Mean generation latency over completed cases.
    pub mean_latency_ms: Option<f64>,
    pub total_time_secs: f64,
    /// Case failures plus judge failures, by kind.
    pub error_counts: BTreeMap<ErrorKind, usize>,
    /// One entry per test case, in dataset order.
    pub results: Vec<CaseOutcome>,
}

impl EvaluationReport {
    /// Build a report from reduced aggregates; aggregates are rounded to 4 places.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dataset_name: &str,
        evaluation_config: RunSettings,
        retrieval: RetrievalSummary,
        generation: GenerationSummary,
        mean_latency_ms: Option<f64>,
        total_time: Duration,
        error_counts: BTreeMap<ErrorKind, usize>,
        results: Vec<CaseOutcome>,
    ) -> Self {
        let completed_cases = results.iter().filter(|o| o.completed().is_some()).count();

        let mut report = Self {
            dataset_name: dataset_name.to_string(),
            timestamp: Utc::now(),
            evaluation_config,
            total_test_cases: results.len(),
            completed_cases,
            failed_cases: results.len() - completed_cases,
            retrieval,
            generation,
            mean_latency_ms,
            total_time_secs: total_time.as_secs_f64(),
            error_counts,
            results,
        };
        report.round_aggregates();
        report
    }

    fn round_aggregates(&mut self) {
        let round = |value: &mut Option<f64>| *value = value.map(round4);

        let r = &mut self.retrieval;
        for value in [
            &mut r.hit_rate,
            &mut r.mean_recall_at_k,
            &mut r.mean_precision_at_k,
            &mut r.mrr,
            &mut r.retrieval_coverage,
        ] {
            round(value);
        }

        let g = &mut self.generation;
        for value in [
            &mut g.judge_success_rate,
            &mut g.mean_correctness,
            &mut g.mean_completeness,
            &mut g.mean_relevance,
            &mut g.mean_coherence,
            &mut g.mean_overall_score,
        ] {
            round(value);
        }

        round(&mut self.mean_latency_ms);
        self.total_time_secs = round4(self.total_time_secs);
    }

    /// Load a report previously written as JSON.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;
        serde_json::from_str(&content)
            .map_err(|e| EvalError::Report(format!("malformed report {}: {}", path.display(), e)))
    }

    /// Print summary to stdout.
    pub fn print_summary(&self) {
        println!("\n========== Evaluation Results ==========");
        println!("Dataset:    {}", self.dataset_name);
        println!("Judge:      {}", self.evaluation_config.judge);
        println!(
            "Cases:      {} total, {} completed, {} failed",
            self.total_test_cases, self.completed_cases, self.failed_cases
        );
        println!("----------------------------------------");
        println!("Retrieval (top_k = {})", self.evaluation_config.top_k);
        println!("  Hit rate:        {}", fmt_opt(self.retrieval.hit_rate));
        println!("  Recall@k:        {}", fmt_opt(self.retrieval.mean_recall_at_k));
        println!("  Precision@k:     {}", fmt_opt(self.retrieval.mean_precision_at_k));
        println!("  MRR:             {}", fmt_opt(self.retrieval.mrr));
        println!("  Coverage:        {}", fmt_opt(self.retrieval.retrieval_coverage));
        println!("----------------------------------------");
        println!(
            "Generation ({} scored, {} unscored)",
            self.generation.scored_cases, self.generation.failed_cases
        );
        println!("  Correctness:     {}", fmt_opt(self.generation.mean_correctness));
        println!("  Completeness:    {}", fmt_opt(self.generation.mean_completeness));
        println!("  Relevance:       {}", fmt_opt(self.generation.mean_relevance));
        println!("  Coherence:       {}", fmt_opt(self.generation.mean_coherence));
        println!("  Overall:         {}", fmt_opt(self.generation.mean_overall_score));
        println!("----------------------------------------");
        println!("Mean latency:      {} ms", fmt_opt(self.mean_latency_ms));
        println!("Total time:        {:.1}s", self.total_time_secs);
        if !self.error_counts.is_empty() {
            println!("Errors:");
            for (kind, count) in &self.error_counts {
                println!("  {:<26} {}", kind.as_str(), count);
            }
        }
        println!("========================================\n");
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.4}", v))
        .unwrap_or_else(|| "n/a".to_string())
}

/// Markdown table cell: no line breaks, pipes escaped.
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\r', '\n'], " ")
}

/// Renders an [`EvaluationReport`] in the supported output formats.
pub struct ReportGenerator<'a> {
    report: &'a EvaluationReport,
}

impl<'a> ReportGenerator<'a> {
    pub fn new(report: &'a EvaluationReport) -> Self {
        Self { report }
    }

    /// Full report as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self.report)
            .map_err(|e| EvalError::Serialization(e.to_string()))
    }

    /// Human-readable report: aggregates, a per-case table and per-case detail.
    pub fn to_markdown(&self) -> String {
        let r = self.report;
        let mut md = String::new();

        // Writing into a String cannot fail.
        let _ = writeln!(md, "# Evaluation Report: {}\n", r.dataset_name);
        let _ = writeln!(
            md,
            "**Generated:** {}  ",
            r.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        );
        let _ = writeln!(md, "**Judge:** {}  ", r.evaluation_config.judge);
        let _ = writeln!(md, "**Generator:** {}  ", r.evaluation_config.generator_model);
        let _ = writeln!(
            md,
            "**Retrieval:** top_k = {}, window = -{}/+{}  ",
            r.evaluation_config.top_k,
            r.evaluation_config.pages_before,
            r.evaluation_config.pages_after
        );
        let _ = writeln!(
            md,
            "**Test Cases:** {} ({} completed, {} failed)  ",
            r.total_test_cases, r.completed_cases, r.failed_cases
        );
        let _ = writeln!(md, "**Total Time:** {:.1}s\n", r.total_time_secs);

        md.push_str("## Retrieval Metrics\n\n| Metric | Value |\n|--------|-------|\n");
        for (name, value) in [
            ("Hit Rate", r.retrieval.hit_rate),
            ("Recall@k", r.retrieval.mean_recall_at_k),
            ("Precision@k", r.retrieval.mean_precision_at_k),
            ("MRR", r.retrieval.mrr),
            ("Coverage", r.retrieval.retrieval_coverage),
        ] {
            let _ = writeln!(md, "| {} | {} |", name, fmt_opt(value));
        }
        let _ = writeln!(
            md,
            "\nComputed over {} of {} completed cases with expected pages.\n",
            r.retrieval.graded_cases, r.retrieval.measured_cases
        );

        md.push_str("## Generation Metrics\n\n| Metric | Value |\n|--------|-------|\n");
        for (name, value) in [
            ("Correctness", r.generation.mean_correctness),
            ("Completeness", r.generation.mean_completeness),
            ("Relevance", r.generation.mean_relevance),
            ("Coherence", r.generation.mean_coherence),
            ("Overall Score", r.generation.mean_overall_score),
            ("Judge Success Rate", r.generation.judge_success_rate),
            ("Mean Latency (ms)", r.mean_latency_ms),
        ] {
            let _ = writeln!(md, "| {} | {} |", name, fmt_opt(value));
        }
        md.push('\n');

        if !r.error_counts.is_empty() {
            md.push_str("## Errors\n\n| Kind | Count |\n|------|-------|\n");
            for (kind, count) in &r.error_counts {
                let _ = writeln!(md, "| {} | {} |", kind, count);
            }
            md.push('\n');
        }

        md.push_str("## Results Summary\n\n");
        md.push_str("| Test Case | Status | Hit | RR | Overall | Correctness | Completeness | Latency (ms) |\n");
        md.push_str("|-----------|--------|-----|----|---------|-------------|--------------|--------------|\n");
        for outcome in &r.results {
            let _ = match outcome {
                CaseOutcome::Completed(result) => {
                    let scores = result.generation_scores.scores();
                    writeln!(
                        md,
                        "| {} | {} | {} | {:.4} | {} | {} | {} | {:.1} |",
                        cell(&result.test_case_id),
                        status_text(outcome),
                        if result.retrieval_metrics.hit { "yes" } else { "no" },
                        result.retrieval_metrics.reciprocal_rank,
                        scores.map_or("n/a".to_string(), |s| format!("{:.2}", s.overall_score)),
                        scores.map_or("n/a".to_string(), |s| s.correctness.to_string()),
                        scores.map_or("n/a".to_string(), |s| s.completeness.to_string()),
                        result.latency_ms
                    )
                }
                CaseOutcome::Failed(failed) => writeln!(
                    md,
                    "| {} | {} | n/a | n/a | n/a | n/a | n/a | n/a |",
                    cell(&failed.test_case_id),
                    status_text(outcome)
                ),
            };
        }

        md.push_str("\n## Detailed Results\n\n");
        for outcome in &r.results {
            let _ = writeln!(md, "### {}\n", outcome.test_case_id());
            let _ = writeln!(md, "**Status:** {}\n", status_text(outcome));
            match outcome {
                CaseOutcome::Completed(result) => {
                    let _ = writeln!(md, "**Question:** {}\n", result.question);
                    let _ = writeln!(md, "**Expected Answer:** {}\n", result.expected_answer);
                    let _ = writeln!(md, "**Generated Answer:** {}\n", result.generated_answer);
                    let retrieved: Vec<String> = result
                        .retrieved_pages
                        .iter()
                        .map(|p| format!("{} ({:.3})", p.page(), p.score))
                        .collect();
                    let _ = writeln!(md, "**Retrieved Pages:** {}\n", join_or_none(&retrieved));
                    match &result.generation_scores {
                        JudgeOutcome::Scored(scores) => {
                            let _ = writeln!(
                                md,
                                "**Scores:** correctness {}, completeness {}, relevance {}, coherence {} (overall {:.2})\n",
                                scores.correctness,
                                scores.completeness,
                                scores.relevance,
                                scores.coherence,
                                scores.overall_score
                            );
                            let _ = writeln!(md, "**Reasoning:** {}\n", scores.reasoning);
                        }
                        JudgeOutcome::Failed { kind, message } => {
                            let _ = writeln!(md, "**Reasoning:** n/a ({}: {})\n", kind, message);
                        }
                    }
                }
                CaseOutcome::Failed(failed) => {
                    let _ = writeln!(md, "**Question:** {}\n", failed.question);
                    let _ = writeln!(md, "**Expected Answer:** {}\n", failed.expected_answer);
                    let _ = writeln!(md, "**Error:** {}\n", failed.message);
                }
            }
            md.push_str("---\n\n");
        }

        md
    }

    /// One row per case with scalar metric columns.
    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        let csv_err = |e: csv::Error| EvalError::Report(format!("CSV error: {}", e));

        writer
            .write_record([
                "test_case_id",
                "status",
                "error_kind",
                "question",
                "hit",
                "recall_at_k",
                "precision_at_k",
                "reciprocal_rank",
                "latency_ms",
                "correctness",
                "completeness",
                "relevance",
                "coherence",
                "overall_score",
            ])
            .map_err(csv_err)?;

        for outcome in &self.report.results {
            let row = match outcome {
                CaseOutcome::Completed(result) => {
                    let m = &result.retrieval_metrics;
                    let scores = result.generation_scores.scores();
                    vec![
                        result.test_case_id.clone(),
                        "completed".to_string(),
                        result
                            .generation_scores
                            .error_kind()
                            .map(|k| k.to_string())
                            .unwrap_or_default(),
                        truncate(&result.question, 100),
                        m.hit.to_string(),
                        format!("{:.4}", m.recall_at_k),
                        format!("{:.4}", m.precision_at_k),
                        format!("{:.4}", m.reciprocal_rank),
                        format!("{:.1}", result.latency_ms),
                        score_field(scores, |s| s.correctness.to_string()),
                        score_field(scores, |s| s.completeness.to_string()),
                        score_field(scores, |s| s.relevance.to_string()),
                        score_field(scores, |s| s.coherence.to_string()),
                        score_field(scores, |s| format!("{:.2}", s.overall_score)),
                    ]
                }
                CaseOutcome::Failed(failed) => {
                    let mut row = vec![
                        failed.test_case_id.clone(),
                        "failed".to_string(),
                        failed.error_kind.to_string(),
                        truncate(&failed.question, 100),
                    ];
                    row.resize(14, String::new());
                    row
                }
            };
            writer.write_record(&row).map_err(csv_err)?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| EvalError::Report(format!("CSV error: {}", e)))?;
        String::from_utf8(bytes).map_err(|e| EvalError::Report(e.to_string()))
    }

    /// Write `report.json`, `report.md` and `metrics.csv` into `dir`.
    pub fn save_all(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir).map_err(|e| EvalError::io(dir, e))?;

        let outputs = [
            ("report.json", self.to_json()?),
            ("report.md", self.to_markdown()),
            ("metrics.csv", self.to_csv()?),
        ];

        let mut written = Vec::with_capacity(outputs.len());
        for (name, content) in outputs {
            let path = dir.join(name);
            fs::write(&path, content).map_err(|e| EvalError::io(&path, e))?;
            written.push(path);
        }
        Ok(written)
    }
}

fn status_text(outcome: &CaseOutcome) -> String {
    match outcome {
        CaseOutcome::Completed(result) => match result.generation_scores.error_kind() {
            None => "completed".to_string(),
            Some(kind) => format!("completed, unscored ({})", kind),
        },
        CaseOutcome::Failed(failed) => format!("failed ({})", failed.error_kind),
    }
}

fn score_field(
    scores: Option<&GenerationScores>,
    field: impl Fn(&GenerationScores) -> String,
) -> String {
    scores.map(field).unwrap_or_default()
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
