//! RAG Eval - LLM-as-judge evaluation harness for a multimodal RAG pipeline.
//!
//! The pipeline under test answers questions about PDF manuals: a visual
//! retriever picks the most relevant page images and a vision-language model
//! answers from them. This crate runs a dataset of question / reference answer
//! / expected page triples through that pipeline, measures retrieval quality
//! (Hit Rate, Recall@k, Precision@k, MRR), has an LLM judge grade every answer
//! on a four-criterion rubric, and writes Markdown, JSON and CSV reports.
//!
//! # Quick Start
//!
//! ```no_run
//! use rag_eval::{
//!     config::Config,
//!     dataset::TestDataset,
//!     evaluator::Evaluator,
//!     judge::build_judge,
//!     pipeline::{HttpRetriever, ImageDirectory, VisionChatGenerator},
//!     report::ReportGenerator,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     config.validate()?;
//!
//!     let dataset = TestDataset::load_json(Path::new("test_cases.json"))?;
//!
//!     let evaluator = Evaluator::new(
//!         config.clone(),
//!         Arc::new(HttpRetriever::new(
//!             &config.rag.retriever_url,
//!             config.rag.retriever_timeout(),
//!         )?),
//!         Arc::new(VisionChatGenerator::new(config.rag.generator.clone())?),
//!         Arc::new(ImageDirectory::scan(&config.rag.page_images_dir)?),
//!         build_judge(&config.judge)?,
//!     );
//!
//!     let report = evaluator.run(&dataset).await?;
//!     ReportGenerator::new(&report).save_all(&config.evaluation.output_dir)?;
//!     report.print_summary();
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **TestDataset**: validated test cases loaded from JSON
//! - **metrics**: retrieval metrics and judge-score aggregation
//! - **Judge**: rubric scoring via Ollama or an OpenAI-compatible API
//! - **pipeline**: retriever, generator and page image capabilities
//! - **Evaluator**: per-case orchestration with bounded concurrency
//! - **ReportGenerator**: Markdown, JSON and CSV output

pub mod config;
pub mod dataset;
pub mod error;
pub mod evaluator;
pub mod judge;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod report;

// Re-export commonly used types
pub use config::Config;
pub use dataset::{PageRef, TestCase, TestDataset};
pub use error::{ErrorKind, EvalError, Result};
pub use evaluator::{CaseOutcome, Evaluator};
pub use judge::{Judge, JudgeError};
pub use report::{EvaluationReport, ReportGenerator};
