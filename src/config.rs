//! Configuration for the evaluation harness.
//!
//! Supports both environment variables and YAML config file.
//! Environment variables take precedence over config file values.

use crate::error::{EvalError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default Ollama server for the local judge backend.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default base URL for the hosted judge backend.
pub const DEFAULT_HOSTED_URL: &str = "https://api.openai.com";

/// OpenAI-compatible chat endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL for the API (e.g., "http://localhost:8000")
    pub api_base: String,

    /// API key for authentication (may be empty for local servers)
    pub api_key: String,

    /// Model name (e.g., "Qwen/Qwen3-VL-4B-Instruct")
    pub model: String,

    /// Maximum tokens for response
    pub max_tokens: u32,

    /// Temperature for generation
    pub temperature: f32,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            api_key: String::new(),
            model: "Qwen/Qwen3-VL-4B-Instruct".to_string(),
            max_tokens: 200,
            temperature: 0.0,
            timeout_secs: 120,
        }
    }
}

impl LlmConfig {
    /// Request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Which judge backend scores generated answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JudgeType {
    /// Locally hosted model served by Ollama.
    #[serde(alias = "ollama", alias = "local-model")]
    Local,
    /// Hosted OpenAI-compatible API.
    #[default]
    #[serde(alias = "openai", alias = "hosted-api")]
    Hosted,
}

impl FromStr for JudgeType {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" | "local-model" | "ollama" => Ok(JudgeType::Local),
            "hosted" | "hosted-api" | "openai" => Ok(JudgeType::Hosted),
            other => Err(EvalError::Config(format!(
                "Unknown judge type '{}'. Expected 'local' or 'hosted'.",
                other
            ))),
        }
    }
}

impl fmt::Display for JudgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JudgeType::Local => f.write_str("local"),
            JudgeType::Hosted => f.write_str("hosted"),
        }
    }
}

/// LLM judge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    /// Backend selector.
    pub judge_type: JudgeType,

    /// Model name; empty means the backend's default.
    pub model: String,

    /// Backend endpoint; empty means the backend's default.
    pub api_base: String,

    /// API key (hosted backend only).
    pub api_key: String,

    /// Sampling temperature.
    pub temperature: f32,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,

    /// Attempts per case when the judge is unreachable.
    pub max_retries: u32,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            judge_type: JudgeType::default(),
            model: String::new(),
            api_base: String::new(),
            api_key: String::new(),
            temperature: 0.0,
            timeout_secs: 60,
            max_retries: 3,
        }
    }
}

impl JudgeConfig {
    /// Model name, falling back to the backend default.
    pub fn effective_model(&self) -> &str {
        if !self.model.is_empty() {
            return &self.model;
        }
        match self.judge_type {
            JudgeType::Local => "llama3.1:8b",
            JudgeType::Hosted => "gpt-4o",
        }
    }

    /// Endpoint, falling back to the backend default.
    pub fn effective_api_base(&self) -> &str {
        if !self.api_base.is_empty() {
            return &self.api_base;
        }
        match self.judge_type {
            JudgeType::Local => DEFAULT_OLLAMA_URL,
            JudgeType::Hosted => DEFAULT_HOSTED_URL,
        }
    }

    /// Request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Chat endpoint settings for the hosted backend.
    pub fn llm_config(&self) -> LlmConfig {
        LlmConfig {
            api_base: self.effective_api_base().to_string(),
            api_key: self.api_key.clone(),
            model: self.effective_model().to_string(),
            max_tokens: 1024,
            temperature: self.temperature,
            timeout_secs: self.timeout_secs,
        }
    }
}

/// RAG pipeline configuration (retrieval, page expansion, generation).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Base URL of the page retrieval service.
    pub retriever_url: String,

    /// Retrieval request timeout in seconds.
    pub retriever_timeout_secs: u64,

    /// Directory holding pre-rendered page images (`<doc_id>/page_<n>.png`).
    pub page_images_dir: PathBuf,

    /// Number of pages to retrieve per question.
    pub top_k: usize,

    /// Pages to include before each retrieved page.
    pub pages_before: u32,

    /// Pages to include after each retrieved page.
    pub pages_after: u32,

    /// Vision-language generation endpoint.
    pub generator: LlmConfig,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            retriever_url: String::new(),
            retriever_timeout_secs: 30,
            page_images_dir: PathBuf::from("data/pages"),
            top_k: 1,
            pages_before: 1,
            pages_after: 1,
            generator: LlmConfig::default(),
        }
    }
}

impl RagConfig {
    /// Retrieval timeout as a [`Duration`].
    pub fn retriever_timeout(&self) -> Duration {
        Duration::from_secs(self.retriever_timeout_secs)
    }
}

/// Evaluation run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Maximum number of test cases in flight.
    pub concurrency: usize,

    /// Maximum concurrent calls into the generation model.
    pub max_concurrent_generations: usize,

    /// Per-case budget for retrieval plus generation.
    pub case_timeout_secs: Option<u64>,

    /// Base delay for judge retries; doubled on every attempt.
    pub retry_backoff_ms: u64,

    /// Directory for report artifacts.
    pub output_dir: PathBuf,

    /// Write each finished case to `<output_dir>/cases/<index>_<id>.json`.
    pub save_intermediate: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_concurrent_generations: 1,
            case_timeout_secs: None,
            retry_backoff_ms: 1000,
            output_dir: PathBuf::from("evaluation_results"),
            save_intermediate: true,
        }
    }
}

impl EvaluationConfig {
    /// Per-case timeout, if configured.
    pub fn case_timeout(&self) -> Option<Duration> {
        self.case_timeout_secs.map(Duration::from_secs)
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Judge settings
    pub judge: JudgeConfig,
    /// RAG pipeline settings
    pub rag: RagConfig,
    /// Run settings
    pub evaluation: EvaluationConfig,
}

impl Config {
    /// Load configuration from an optional explicit file and environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (JUDGE_TYPE, JUDGE_MODEL, RAG_TOP_K, ...)
    /// 2. Config file (`path`, else ~/.config/rag-eval/config.yaml)
    /// 3. Default values
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::config_file_path() {
                Some(default_path) if default_path.exists() => {
                    Self::load_from_file(&default_path)?
                }
                _ => Config::default(),
            },
        };

        config.apply_env_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;

        serde_yaml::from_str(&content)
            .map_err(|e| EvalError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Get the default config file path.
    pub fn config_file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "rag-eval")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(judge_type) = lookup("JUDGE_TYPE") {
            self.judge.judge_type = judge_type.parse()?;
        }
        if let Some(model) = lookup("JUDGE_MODEL") {
            self.judge.model = model;
        }
        if let Some(api_base) = lookup("JUDGE_API_BASE") {
            self.judge.api_base = api_base;
        }
        if let Some(api_key) = lookup("JUDGE_API_KEY") {
            self.judge.api_key = api_key;
        }

        match self.judge.judge_type {
            JudgeType::Local => {
                if let Some(host) = lookup("OLLAMA_HOST") {
                    self.judge.api_base = host;
                }
            }
            JudgeType::Hosted => {
                if self.judge.api_key.is_empty() {
                    if let Some(api_key) = lookup("OPENAI_API_KEY") {
                        self.judge.api_key = api_key;
                    }
                }
            }
        }

        if let Some(url) = lookup("RAG_RETRIEVER_URL") {
            self.rag.retriever_url = url;
        }
        if let Some(dir) = lookup("RAG_PAGE_IMAGES_DIR") {
            self.rag.page_images_dir = PathBuf::from(dir);
        }
        if let Some(top_k) = lookup("RAG_TOP_K") {
            self.rag.top_k = parse_number("RAG_TOP_K", &top_k)?;
        }
        if let Some(before) = lookup("RAG_PAGES_BEFORE") {
            self.rag.pages_before = parse_number("RAG_PAGES_BEFORE", &before)?;
        }
        if let Some(after) = lookup("RAG_PAGES_AFTER") {
            self.rag.pages_after = parse_number("RAG_PAGES_AFTER", &after)?;
        }

        if let Some(api_base) = lookup("GENERATOR_API_BASE") {
            self.rag.generator.api_base = api_base;
        }
        if let Some(api_key) = lookup("GENERATOR_API_KEY") {
            self.rag.generator.api_key = api_key;
        }
        if let Some(model) = lookup("GENERATOR_MODEL") {
            self.rag.generator.model = model;
        }

        if let Some(concurrency) = lookup("EVAL_CONCURRENCY") {
            self.evaluation.concurrency = parse_number("EVAL_CONCURRENCY", &concurrency)?;
        }
        if let Some(dir) = lookup("EVAL_OUTPUT_DIR") {
            self.evaluation.output_dir = PathBuf::from(dir);
        }

        Ok(())
    }

    /// Validate the judge section (enough for rescoring).
    pub fn validate_judge(&self) -> Result<()> {
        if self.judge.judge_type == JudgeType::Hosted && self.judge.api_key.is_empty() {
            return Err(EvalError::Config(
                "Hosted judge requires an API key. Set JUDGE_API_KEY or OPENAI_API_KEY, or add judge.api_key to the config file.".to_string(),
            ));
        }
        if self.judge.timeout_secs == 0 {
            return Err(EvalError::Config(
                "judge.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.judge.max_retries == 0 {
            return Err(EvalError::Config(
                "judge.max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate that everything a full run needs is present.
    pub fn validate(&self) -> Result<()> {
        self.validate_judge()?;

        if self.rag.retriever_url.is_empty() {
            return Err(EvalError::Config(
                "Retriever URL is required. Set RAG_RETRIEVER_URL or add rag.retriever_url to the config file.".to_string(),
            ));
        }
        if self.rag.generator.api_base.is_empty() {
            return Err(EvalError::Config(
                "Generator API base URL is required. Set GENERATOR_API_BASE or add rag.generator.api_base to the config file.".to_string(),
            ));
        }
        if self.rag.generator.model.is_empty() {
            return Err(EvalError::Config(
                "Generator model is required. Set GENERATOR_MODEL or add rag.generator.model to the config file.".to_string(),
            ));
        }
        if self.rag.top_k == 0 {
            return Err(EvalError::Config("rag.top_k must be at least 1".to_string()));
        }
        if self.evaluation.concurrency == 0 || self.evaluation.max_concurrent_generations == 0 {
            return Err(EvalError::Config(
                "evaluation.concurrency and evaluation.max_concurrent_generations must be at least 1"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| EvalError::Config(format!("{} must be a non-negative integer, got '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn runnable_config() -> Config {
        let mut config = Config::default();
        config.judge.api_key = "sk-test".to_string();
        config.rag.retriever_url = "http://localhost:8001".to_string();
        config.rag.generator.api_base = "http://localhost:8000".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.judge.judge_type, JudgeType::Hosted);
        assert_eq!(config.judge.effective_model(), "gpt-4o");
        assert_eq!(config.judge.timeout_secs, 60);
        assert_eq!(config.judge.max_retries, 3);
        assert_eq!(config.rag.top_k, 1);
        assert_eq!(config.rag.pages_before, 1);
        assert_eq!(config.rag.pages_after, 1);
        assert_eq!(config.rag.generator.max_tokens, 200);
        assert_eq!(config.evaluation.concurrency, 1);
        assert!(config.evaluation.save_intermediate);
        assert_eq!(
            config.evaluation.output_dir,
            PathBuf::from("evaluation_results")
        );
    }

    #[test]
    fn test_local_judge_defaults() {
        let judge = JudgeConfig {
            judge_type: JudgeType::Local,
            ..Default::default()
        };
        assert_eq!(judge.effective_model(), "llama3.1:8b");
        assert_eq!(judge.effective_api_base(), DEFAULT_OLLAMA_URL);
    }

    #[test]
    fn test_judge_type_parsing() {
        assert_eq!("ollama".parse::<JudgeType>().unwrap(), JudgeType::Local);
        assert_eq!("Local".parse::<JudgeType>().unwrap(), JudgeType::Local);
        assert_eq!("openai".parse::<JudgeType>().unwrap(), JudgeType::Hosted);
        assert_eq!("hosted-api".parse::<JudgeType>().unwrap(), JudgeType::Hosted);
        assert!("vertex".parse::<JudgeType>().is_err());
    }

    #[test]
    fn test_validate_fails_without_required_fields() {
        let config = Config::default();
        assert!(config.validate().is_err());
        assert!(runnable_config().validate().is_ok());
    }

    #[test]
    fn test_local_judge_needs_no_api_key() {
        let mut config = Config::default();
        config.judge.judge_type = JudgeType::Local;
        assert!(config.validate_judge().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_top_k() {
        let mut config = runnable_config();
        config.rag.top_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_overrides(lookup_from(&[
                ("JUDGE_TYPE", "ollama"),
                ("OLLAMA_HOST", "http://gpu-box:11434"),
                ("RAG_TOP_K", "3"),
                ("RAG_PAGES_BEFORE", "0"),
                ("EVAL_OUTPUT_DIR", "out"),
            ]))
            .unwrap();

        assert_eq!(config.judge.judge_type, JudgeType::Local);
        assert_eq!(config.judge.effective_api_base(), "http://gpu-box:11434");
        assert_eq!(config.rag.top_k, 3);
        assert_eq!(config.rag.pages_before, 0);
        assert_eq!(config.rag.pages_after, 1);
        assert_eq!(config.evaluation.output_dir, PathBuf::from("out"));
    }

    #[test]
    fn test_openai_key_fallback_for_hosted_judge() {
        let mut config = Config::default();
        config
            .apply_env_overrides(lookup_from(&[("OPENAI_API_KEY", "sk-fallback")]))
            .unwrap();
        assert_eq!(config.judge.api_key, "sk-fallback");

        let mut config = Config::default();
        config
            .apply_env_overrides(lookup_from(&[
                ("JUDGE_API_KEY", "sk-explicit"),
                ("OPENAI_API_KEY", "sk-fallback"),
            ]))
            .unwrap();
        assert_eq!(config.judge.api_key, "sk-explicit");
    }

    #[test]
    fn test_bad_numeric_override_is_rejected() {
        let mut config = Config::default();
        let result = config.apply_env_overrides(lookup_from(&[("RAG_TOP_K", "many")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_partial_yaml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
judge:
  judge_type: ollama
  model: qwen2.5:14b
rag:
  retriever_url: http://localhost:8001
  top_k: 3
  generator:
    api_base: http://localhost:8000
evaluation:
  concurrency: 2
  case_timeout_secs: 90
"#,
        )
        .unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.judge.judge_type, JudgeType::Local);
        assert_eq!(config.judge.effective_model(), "qwen2.5:14b");
        assert_eq!(config.judge.timeout_secs, 60);
        assert_eq!(config.rag.top_k, 3);
        assert_eq!(config.rag.pages_after, 1);
        assert_eq!(config.rag.generator.api_base, "http://localhost:8000");
        assert_eq!(config.rag.generator.max_tokens, 200);
        assert_eq!(config.evaluation.concurrency, 2);
        assert_eq!(
            config.evaluation.case_timeout(),
            Some(Duration::from_secs(90))
        );
    }

    #[test]
    fn test_load_from_missing_file() {
        let result = Config::load_from_file(Path::new("/nonexistent/rag-eval.yaml"));
        assert!(matches!(result, Err(EvalError::Io { .. })));
    }
}
