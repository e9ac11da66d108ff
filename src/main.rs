//! RAG Eval CLI
//!
//! Runs an evaluation dataset against the RAG pipeline and writes reports.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rag_eval::{
    config::{Config, JudgeType},
    dataset::TestDataset,
    evaluator::{Evaluator, rescore_report},
    judge::build_judge,
    metrics::GenerationMetricsAggregator,
    pipeline::{HttpRetriever, ImageDirectory, VisionChatGenerator},
    report::{EvaluationReport, ReportGenerator},
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// RAG Eval - LLM-as-judge evaluation for a multimodal RAG pipeline
#[derive(Parser)]
#[command(name = "rag-eval")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a YAML config file (default: platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a dataset and write report.md, report.json and metrics.csv
    Run {
        /// Path to the test dataset (JSON)
        #[arg(short, long)]
        dataset: PathBuf,

        /// Directory for report artifacts
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Evaluate only the first N cases
        #[arg(long)]
        max_cases: Option<usize>,

        /// Number of cases evaluated in parallel
        #[arg(long)]
        concurrency: Option<usize>,

        /// Number of pages to retrieve per question
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Judge backend: local (Ollama) or hosted (OpenAI-compatible)
        #[arg(long)]
        judge_type: Option<JudgeType>,

        /// Judge model name
        #[arg(long)]
        judge_model: Option<String>,
    },

    /// Check a dataset file without running anything
    Validate {
        /// Path to the test dataset (JSON)
        dataset: PathBuf,
    },

    /// Re-judge the answers in an existing report.json
    Rescore {
        /// Path to a previously written report.json
        #[arg(short, long)]
        report: PathBuf,

        /// Directory for the new artifacts (default: next to the report)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Number of judge calls in parallel
        #[arg(long, default_value_t = 1)]
        concurrency: usize,

        /// Judge backend: local (Ollama) or hosted (OpenAI-compatible)
        #[arg(long)]
        judge_type: Option<JudgeType>,

        /// Judge model name
        #[arg(long)]
        judge_model: Option<String>,
    },

    /// Send one sample answer to the configured judge
    TestJudge,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rag_eval=info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Run {
            dataset,
            output_dir,
            max_cases,
            concurrency,
            top_k,
            judge_type,
            judge_model,
        } => {
            let mut config = load_config(config_path)?;
            apply_judge_overrides(&mut config, judge_type, judge_model);
            if let Some(dir) = output_dir {
                config.evaluation.output_dir = dir;
            }
            if let Some(n) = concurrency {
                config.evaluation.concurrency = n;
            }
            if let Some(k) = top_k {
                config.rag.top_k = k;
            }
            cmd_run(config, &dataset, max_cases).await
        }
        Commands::Validate { dataset } => cmd_validate(&dataset),
        Commands::Rescore {
            report,
            output_dir,
            concurrency,
            judge_type,
            judge_model,
        } => {
            let mut config = load_config(config_path)?;
            apply_judge_overrides(&mut config, judge_type, judge_model);
            cmd_rescore(config, &report, output_dir, concurrency).await
        }
        Commands::TestJudge => cmd_test_judge(load_config(config_path)?).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    Config::load(path).context("Failed to load configuration")
}

fn apply_judge_overrides(
    config: &mut Config,
    judge_type: Option<JudgeType>,
    judge_model: Option<String>,
) {
    if let Some(judge_type) = judge_type {
        config.judge.judge_type = judge_type;
    }
    if let Some(model) = judge_model {
        config.judge.model = model;
    }
}

async fn cmd_run(config: Config, dataset_path: &Path, max_cases: Option<usize>) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    let mut dataset = TestDataset::load_json(dataset_path).context("Failed to load dataset")?;
    if let Some(n) = max_cases {
        dataset = dataset.take(n);
    }

    println!("Evaluating dataset: {} ({} cases)", dataset.dataset_name, dataset.len());
    println!("  Retriever:  {} (top_k = {})", config.rag.retriever_url, config.rag.top_k);
    println!("  Generator:  {}", config.rag.generator.model);
    println!(
        "  Judge:      {} / {}",
        config.judge.judge_type,
        config.judge.effective_model()
    );
    println!();

    let pages = ImageDirectory::scan(&config.rag.page_images_dir)
        .context("Failed to scan page images")?;
    let retriever = HttpRetriever::new(&config.rag.retriever_url, config.rag.retriever_timeout())
        .context("Failed to create retriever client")?;
    let generator = VisionChatGenerator::new(config.rag.generator.clone())
        .context("Failed to create generator client")?;
    let judge = build_judge(&config.judge).context("Failed to create judge")?;

    let output_dir = config.evaluation.output_dir.clone();
    let evaluator = Evaluator::new(
        config,
        Arc::new(retriever),
        Arc::new(generator),
        Arc::new(pages),
        judge,
    );

    let report = evaluator.run(&dataset).await.context("Evaluation failed")?;

    let written = ReportGenerator::new(&report)
        .save_all(&output_dir)
        .context("Failed to write reports")?;

    report.print_summary();
    for path in written {
        println!("Wrote {}", path.display());
    }

    Ok(())
}

fn cmd_validate(dataset_path: &Path) -> Result<()> {
    let dataset = TestDataset::load_json(dataset_path).context("Dataset is invalid")?;

    let with_pages = dataset
        .test_cases
        .iter()
        .filter(|c| !c.expected_pages.is_empty())
        .count();
    let documents: BTreeSet<u32> = dataset
        .test_cases
        .iter()
        .flat_map(|c| c.expected_pages.iter().map(|p| p.doc_id))
        .collect();

    println!("Dataset OK: {}", dataset_path.display());
    println!("{}", "─".repeat(40));
    println!("  Name:              {}", dataset.dataset_name);
    println!("  Version:           {}", dataset.version);
    if !dataset.description.is_empty() {
        println!("  Description:       {}", dataset.description);
    }
    println!("  Test cases:        {}", dataset.len());
    println!("  With page labels:  {}", with_pages);
    println!("  Documents cited:   {}", documents.len());

    Ok(())
}

async fn cmd_rescore(
    config: Config,
    report_path: &Path,
    output_dir: Option<PathBuf>,
    concurrency: usize,
) -> Result<()> {
    config.validate_judge().context("Invalid judge configuration")?;

    let report = EvaluationReport::load_json(report_path).context("Failed to load report")?;
    let judge = build_judge(&config.judge).context("Failed to create judge")?;
    let scorer = GenerationMetricsAggregator::new(judge)
        .with_concurrency(concurrency)
        .with_retry(
            config.judge.max_retries,
            Duration::from_millis(config.evaluation.retry_backoff_ms),
        );

    println!(
        "Rescoring {} completed cases from {} with {}",
        report.completed_cases,
        report_path.display(),
        scorer.judge_name()
    );

    let start = Instant::now();
    let rescored = rescore_report(&report, &scorer).await;
    println!("Rescored in {:.2?}", start.elapsed());

    let output_dir = output_dir.unwrap_or_else(|| {
        report_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    });
    let written = ReportGenerator::new(&rescored)
        .save_all(&output_dir)
        .context("Failed to write reports")?;

    rescored.print_summary();
    for path in written {
        println!("Wrote {}", path.display());
    }

    Ok(())
}

async fn cmd_test_judge(config: Config) -> Result<()> {
    println!("Testing judge connection...\n");

    println!("Configuration:");
    println!("  Type:      {}", config.judge.judge_type);
    println!("  Endpoint:  {}", config.judge.effective_api_base());
    println!("  Model:     {}", config.judge.effective_model());
    if config.judge.judge_type == JudgeType::Hosted {
        let key: String = config.judge.api_key.chars().take(8).collect();
        println!("  API Key:   {}...", key);
    }
    println!();

    if let Err(e) = config.validate_judge() {
        println!("Configuration error: {}", e);
        return Ok(());
    }

    let judge = build_judge(&config.judge).context("Failed to create judge")?;

    println!("Sending sample answer...");
    match judge
        .score(
            "What colour is the power LED when the device is charging?",
            "The power LED is amber while charging.",
            "It turns amber during charging.",
        )
        .await
    {
        Ok(scores) => {
            println!("Judge responded:");
            println!(
                "  correctness {}, completeness {}, relevance {}, coherence {} (overall {:.2})",
                scores.correctness,
                scores.completeness,
                scores.relevance,
                scores.coherence,
                scores.overall_score
            );
            println!("  Reasoning: {}", scores.reasoning);
        }
        Err(e) => {
            println!("Judge failed ({}): {}", e.kind(), e);
        }
    }

    Ok(())
}
