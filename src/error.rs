//! Error types for the evaluation harness.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom error.
pub type Result<T> = std::result::Result<T, EvalError>;

/// Errors that can occur while loading, running or reporting an evaluation.
#[derive(Error, Debug)]
pub enum EvalError {
    /// Error reading or writing files.
    #[error("I/O error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error during serialization/deserialization.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The dataset file is malformed or violates an invariant.
    #[error("Invalid dataset: {0}")]
    DatasetValidation(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// LLM API returned a non-success status.
    #[error("LLM API error: {0}")]
    LlmApi(String),

    /// LLM response envelope could not be parsed.
    #[error("Failed to parse LLM response: {0}")]
    LlmParse(String),

    /// HTTP request error (connection refused, timeout, ...).
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Retrieval service error.
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// Page image lookup error.
    #[error("Page image error: {0}")]
    PageImage(String),

    /// Report rendering error.
    #[error("Report error: {0}")]
    Report(String),
}

impl EvalError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<reqwest::Error> for EvalError {
    fn from(err: reqwest::Error) -> Self {
        EvalError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for EvalError {
    fn from(err: serde_json::Error) -> Self {
        EvalError::LlmParse(err.to_string())
    }
}

/// Failure categories recorded per test case and in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RetrievalError,
    GenerationError,
    JudgeUnavailable,
    JudgeParseError,
    TimeoutError,
    DatasetValidationError,
}

impl ErrorKind {
    /// The snake_case name used in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RetrievalError => "retrieval_error",
            ErrorKind::GenerationError => "generation_error",
            ErrorKind::JudgeUnavailable => "judge_unavailable",
            ErrorKind::JudgeParseError => "judge_parse_error",
            ErrorKind::TimeoutError => "timeout_error",
            ErrorKind::DatasetValidationError => "dataset_validation_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::JudgeParseError).unwrap();
        assert_eq!(json, "\"judge_parse_error\"");

        let kind: ErrorKind = serde_json::from_str("\"timeout_error\"").unwrap();
        assert_eq!(kind, ErrorKind::TimeoutError);
    }

    #[test]
    fn test_error_kind_display_matches_serde() {
        for kind in [
            ErrorKind::RetrievalError,
            ErrorKind::GenerationError,
            ErrorKind::JudgeUnavailable,
            ErrorKind::JudgeParseError,
            ErrorKind::TimeoutError,
            ErrorKind::DatasetValidationError,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind));
        }
    }

    #[test]
    fn test_io_error_keeps_path() {
        let err = EvalError::io(
            "/tmp/missing.json",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("/tmp/missing.json"));
    }
}
