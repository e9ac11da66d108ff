//! LLM-as-judge scoring of generated answers.
//!
//! A judge receives the question, the reference answer and the generated
//! answer, asks its backend to rate the answer on four 1-5 criteria, and
//! parses the ratings out of the model's reply. Two backends exist:
//! a local Ollama server and a hosted OpenAI-compatible API.
//!
//! Judges never retry. Callers decide whether an [`JudgeError::Unavailable`]
//! is worth another attempt.

mod hosted;
mod local;

pub use hosted::HostedJudge;
pub use local::OllamaJudge;

use crate::config::{JudgeConfig, JudgeType};
use crate::error::{ErrorKind, Result};
use crate::metrics::GenerationScores;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Why a judge produced no scores.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JudgeError {
    /// Backend unreachable, timed out, or answered with an error status.
    #[error("judge unavailable: {0}")]
    Unavailable(String),

    /// Backend answered but the ratings could not be read.
    #[error("could not parse judge output: {0}")]
    Parse(String),
}

impl JudgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JudgeError::Unavailable(_) => ErrorKind::JudgeUnavailable,
            JudgeError::Parse(_) => ErrorKind::JudgeParseError,
        }
    }
}

/// Scores a generated answer against a reference answer.
///
/// Implementations are shared across concurrently evaluated cases.
#[async_trait]
pub trait Judge: Send + Sync {
    /// Backend and model, for logs and report metadata.
    fn name(&self) -> String;

    async fn score(
        &self,
        question: &str,
        expected_answer: &str,
        generated_answer: &str,
    ) -> std::result::Result<GenerationScores, JudgeError>;
}

/// Build the judge selected by the configuration.
pub fn build_judge(config: &JudgeConfig) -> Result<Arc<dyn Judge>> {
    let judge: Arc<dyn Judge> = match config.judge_type {
        JudgeType::Local => Arc::new(OllamaJudge::new(config)?),
        JudgeType::Hosted => Arc::new(HostedJudge::new(config)?),
    };
    Ok(judge)
}

/// Pull a JSON object out of a model reply.
///
/// Accepts bare JSON, a fenced ```json block, a plain ``` block, or falls back
/// to the span from the first `{` to the last `}`.
pub fn extract_json(response: &str) -> &str {
    let response = response.trim();

    if let Some(rest) = response.strip_prefix("```json") {
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim();
        }
    }

    if let Some(rest) = response.strip_prefix("```") {
        if let Some(end) = rest.rfind("```") {
            let body = &rest[..end];
            let start = body.find('\n').map(|n| n + 1).unwrap_or(0);
            return body[start..].trim();
        }
    }

    if let (Some(start), Some(end)) = (response.find('{'), response.rfind('}')) {
        if end > start {
            return &response[start..=end];
        }
    }

    response
}

const CRITERIA: [&str; 4] = ["correctness", "completeness", "relevance", "coherence"];

/// Parse the judge's reply into scores.
///
/// Each criterion must be an integer in 1..=5 and `reasoning` must be a
/// string. Anything else is a [`JudgeError::Parse`]; no field is defaulted.
/// A judge-supplied `overall_score` is ignored.
pub fn parse_scores(raw: &str) -> std::result::Result<GenerationScores, JudgeError> {
    let value: Value = serde_json::from_str(extract_json(raw)).map_err(|e| {
        JudgeError::Parse(format!("reply is not a JSON object ({}): {}", e, preview(raw)))
    })?;
    let object = value
        .as_object()
        .ok_or_else(|| JudgeError::Parse(format!("reply is not a JSON object: {}", preview(raw))))?;

    let mut ratings = [0u8; 4];
    for (slot, field) in ratings.iter_mut().zip(CRITERIA) {
        let value = object
            .get(field)
            .ok_or_else(|| JudgeError::Parse(format!("missing field `{}`", field)))?;
        *slot = rating(field, value)?;
    }

    let reasoning = match object.get("reasoning") {
        Some(Value::String(text)) => text.clone(),
        Some(other) => {
            return Err(JudgeError::Parse(format!(
                "`reasoning` must be a string, got {}",
                other
            )));
        }
        None => return Err(JudgeError::Parse("missing field `reasoning`".to_string())),
    };

    let [correctness, completeness, relevance, coherence] = ratings;
    Ok(GenerationScores::new(
        correctness,
        completeness,
        relevance,
        coherence,
        reasoning,
    ))
}

fn rating(field: &str, value: &Value) -> std::result::Result<u8, JudgeError> {
    // 4.0 is accepted as 4; 4.5 is not.
    let integer = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        _ => None,
    };

    match integer {
        Some(n @ 1..=5) => Ok(n as u8),
        Some(n) => Err(JudgeError::Parse(format!(
            "`{}` out of range 1-5: {}",
            field, n
        ))),
        None => Err(JudgeError::Parse(format!(
            "`{}` must be an integer, got {}",
            field, value
        ))),
    }
}

fn preview(raw: &str) -> String {
    let mut text: String = raw.chars().take(200).collect();
    if raw.chars().count() > 200 {
        text.push_str("...");
    }
    text
}
