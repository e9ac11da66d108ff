//! Test dataset loading and validation.
//!
//! Expected format:
//! ```json
//! {
//!   "dataset_name": "manuals",
//!   "test_cases": [
//!     {
//!       "id": "tc_001",
//!       "question": "How do I reset the password?",
//!       "expected_answer": "Open Settings > Security and click Reset.",
//!       "expected_pages": [{"doc_id": 0, "page_num": 5}],
//!       "metadata": {"source": "IT_help_desk.pdf"}
//!     }
//!   ]
//! }
//! ```

use crate::error::{EvalError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::warn;

/// A single page of an indexed document. Page numbers are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageRef {
    pub doc_id: u32,
    pub page_num: u32,
}

impl PageRef {
    pub fn new(doc_id: u32, page_num: u32) -> Self {
        Self { doc_id, page_num }
    }
}

impl fmt::Display for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc {} p.{}", self.doc_id, self.page_num)
    }
}

/// A single evaluation test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    /// Unique identifier within the dataset.
    pub id: String,
    /// The question to ask the RAG pipeline.
    pub question: String,
    /// Reference answer.
    pub expected_answer: String,
    /// Pages that jointly ground the answer (may be empty).
    #[serde(default)]
    pub expected_pages: Vec<PageRef>,
    /// Free-form metadata, e.g. the source filename.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// A collection of test cases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestDataset {
    /// Dataset name.
    #[serde(default = "default_dataset_name")]
    pub dataset_name: String,
    /// Dataset format version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Optional description.
    #[serde(default)]
    pub description: String,
    /// Test cases in evaluation order.
    pub test_cases: Vec<TestCase>,
}

fn default_dataset_name() -> String {
    "Unnamed".to_string()
}

fn default_version() -> String {
    "1.0".to_string()
}

impl TestDataset {
    /// Create a new empty dataset.
    pub fn new(name: &str) -> Self {
        Self {
            dataset_name: name.to_string(),
            version: default_version(),
            description: String::new(),
            test_cases: Vec::new(),
        }
    }

    /// Add a test case to the dataset.
    pub fn add_case(&mut self, case: TestCase) {
        self.test_cases.push(case);
    }

    /// Number of test cases in the dataset.
    pub fn len(&self) -> usize {
        self.test_cases.len()
    }

    /// Check if dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.test_cases.is_empty()
    }

    /// Get a subset of cases (for quick runs).
    pub fn take(&self, n: usize) -> Self {
        Self {
            test_cases: self.test_cases.iter().take(n).cloned().collect(),
            ..self.clone()
        }
    }

    /// Load from a JSON file and validate it.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;
        Self::from_json_str(&content)
    }

    /// Parse and validate a dataset from JSON text.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let mut dataset: TestDataset = serde_json::from_str(content)
            .map_err(|e| EvalError::DatasetValidation(format!("malformed dataset JSON: {}", e)))?;
        dataset.dedup_expected_pages();
        dataset.validate()?;
        Ok(dataset)
    }

    /// Save to a JSON file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| EvalError::Serialization(e.to_string()))?;
        fs::write(path, content).map_err(|e| EvalError::io(path, e))
    }

    /// Check dataset invariants: at least one case, ids non-empty and unique,
    /// questions and reference answers non-empty.
    pub fn validate(&self) -> Result<()> {
        if self.test_cases.is_empty() {
            return Err(EvalError::DatasetValidation(
                "dataset contains no test cases".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for (idx, case) in self.test_cases.iter().enumerate() {
            if case.id.trim().is_empty() {
                return Err(EvalError::DatasetValidation(format!(
                    "test case #{} has an empty id",
                    idx + 1
                )));
            }
            if !seen.insert(case.id.as_str()) {
                return Err(EvalError::DatasetValidation(format!(
                    "duplicate test case id '{}'",
                    case.id
                )));
            }
            if case.question.trim().is_empty() {
                return Err(EvalError::DatasetValidation(format!(
                    "test case '{}' has an empty question",
                    case.id
                )));
            }
            if case.expected_answer.trim().is_empty() {
                return Err(EvalError::DatasetValidation(format!(
                    "test case '{}' has an empty expected answer",
                    case.id
                )));
            }
            if let Some(page) = case.expected_pages.iter().find(|p| p.page_num == 0) {
                return Err(EvalError::DatasetValidation(format!(
                    "test case '{}' expects page 0 of doc {}; page numbers start at 1",
                    case.id, page.doc_id
                )));
            }
        }

        Ok(())
    }

    /// Expected pages are a set; collapse repeats, keeping first occurrence.
    fn dedup_expected_pages(&mut self) {
        for case in &mut self.test_cases {
            let before = case.expected_pages.len();
            let mut seen = HashSet::new();
            case.expected_pages.retain(|p| seen.insert(*p));
            if case.expected_pages.len() != before {
                warn!(
                    test_case = %case.id,
                    "dropped {} duplicate expected page(s)",
                    before - case.expected_pages.len()
                );
            }
        }
    }
}
