//! Judge backed by a local Ollama server (`/api/generate`).

use super::{Judge, JudgeError, parse_scores};
use crate::config::JudgeConfig;
use crate::error::{EvalError, Result};
use crate::llm::Prompts;
use crate::metrics::GenerationScores;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    format: &'a str,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Judge running on a locally hosted model.
pub struct OllamaJudge {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OllamaJudge {
    pub fn new(config: &JudgeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| EvalError::Http(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.effective_api_base().trim_end_matches('/').to_string(),
            model: config.effective_model().to_string(),
            temperature: config.temperature,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }
}

#[async_trait]
impl Judge for OllamaJudge {
    fn name(&self) -> String {
        format!("ollama:{}", self.model)
    }

    async fn score(
        &self,
        question: &str,
        expected_answer: &str,
        generated_answer: &str,
    ) -> std::result::Result<GenerationScores, JudgeError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt: Prompts::fill(
                Prompts::generation_judge(),
                &[
                    ("question", question),
                    ("expected_answer", expected_answer),
                    ("generated_answer", generated_answer),
                ],
            ),
            stream: false,
            format: "json",
            options: GenerateOptions {
                temperature: self.temperature,
            },
        };

        let endpoint = self.endpoint();
        debug!(model = %self.model, %endpoint, "calling local judge");

        let response = self
            .client
            .post(&endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| JudgeError::Unavailable(format!("{}: {}", endpoint, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JudgeError::Unavailable(format!(
                "Ollama returned {}: {}",
                status, body
            )));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| JudgeError::Unavailable(format!("malformed Ollama response: {}", e)))?;

        parse_scores(&body.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JudgeType;
    use crate::error::ErrorKind;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn judge_for(base: &str) -> OllamaJudge {
        OllamaJudge::new(&JudgeConfig {
            judge_type: JudgeType::Local,
            api_base: base.to_string(),
            timeout_secs: 5,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_scores_from_generate_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({"model": "llama3.1:8b", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "llama3.1:8b",
                "response": "{\"correctness\": 4, \"completeness\": 3, \"relevance\": 5, \"coherence\": 4, \"reasoning\": \"Mostly right.\"}",
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let judge = judge_for(&server.uri());
        let scores = judge
            .score("How do I reset?", "Press reset.", "Hold the reset button.")
            .await
            .unwrap();

        assert_eq!(scores.correctness, 4);
        assert_eq!(scores.completeness, 3);
        assert_eq!(scores.reasoning, "Mostly right.");
        assert!((scores.overall_score - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
            .mount(&server)
            .await;

        let err = judge_for(&server.uri()).score("q", "a", "b").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::JudgeUnavailable);
        assert!(err.to_string().contains("model not loaded"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_unavailable() {
        let err = judge_for("http://127.0.0.1:9").score("q", "a", "b").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::JudgeUnavailable);
    }

    #[tokio::test]
    async fn test_prose_reply_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "The answer looks fine to me."
            })))
            .mount(&server)
            .await;

        let err = judge_for(&server.uri()).score("q", "a", "b").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::JudgeParseError);
    }
}
