//! HTTP-backed retrieval and generation services.

use super::{Generator, PageImage, RetrievedPage, Retriever};
use crate::config::LlmConfig;
use crate::error::{EvalError, Result};
use crate::llm::{LlmClient, Message, Prompts};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    top_k: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<RetrievedPage>,
}

/// Client for a page retrieval service exposing `POST /search`.
///
/// Request: `{"query": ..., "top_k": ...}`.
/// Response: `{"results": [{"doc_id", "page_num", "score"}, ...]}`.
pub struct HttpRetriever {
    client: Client,
    base_url: String,
}

impl HttpRetriever {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EvalError::Http(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/search", self.base_url)
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedPage>> {
        let response = self
            .client
            .post(self.endpoint())
            .json(&SearchRequest { query, top_k })
            .send()
            .await
            .map_err(|e| EvalError::Retrieval(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EvalError::Retrieval(format!(
                "search returned {}: {}",
                status, body
            )));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| EvalError::Retrieval(format!("malformed search response: {}", e)))?;

        let mut results = body.results;
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(top_k);

        debug!(count = results.len(), "retrieved pages");
        Ok(results)
    }
}

/// Vision-language answer generation over an OpenAI-compatible chat API.
pub struct VisionChatGenerator {
    client: LlmClient,
}

impl VisionChatGenerator {
    pub fn new(config: LlmConfig) -> Result<Self> {
        Ok(Self {
            client: LlmClient::new(config)?,
        })
    }
}

#[async_trait]
impl Generator for VisionChatGenerator {
    async fn generate(&self, question: &str, pages: &[PageImage]) -> Result<String> {
        let text = Prompts::fill(Prompts::page_answer(), &[("question", question)]);
        let images = pages.iter().map(PageImage::to_data_url).collect();

        let response = self
            .client
            .chat(vec![Message::user_with_images(text, images)])
            .await?;
        debug!(
            model = %self.client.model(),
            finish_reason = response.finish_reason.as_deref().unwrap_or("unknown"),
            total_tokens = response.usage.as_ref().map(|u| u.total_tokens),
            "generated answer"
        );

        Ok(response.content.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::PageRef;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    #[tokio::test]
    async fn test_retriever_orders_and_truncates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_partial_json(json!({"query": "reset password", "top_k": 2})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {"doc_id": 0, "page_num": 7, "score": 0.5},
                    {"doc_id": 0, "page_num": 5, "score": 0.9},
                    {"doc_id": 1, "page_num": 2, "score": 0.1}
                ]
            })))
            .mount(&server)
            .await;

        let retriever = HttpRetriever::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let results = retriever.retrieve("reset password", 2).await.unwrap();

        assert_eq!(
            results,
            vec![RetrievedPage::new(0, 5, 0.9), RetrievedPage::new(0, 7, 0.5)]
        );
    }

    #[tokio::test]
    async fn test_retriever_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(503).set_body_string("index not loaded"))
            .mount(&server)
            .await;

        let retriever = HttpRetriever::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let err = retriever.retrieve("q", 1).await.unwrap_err();
        assert!(matches!(err, EvalError::Retrieval(msg) if msg.contains("index not loaded")));
    }

    #[tokio::test]
    async fn test_retriever_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"results": []}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let retriever = HttpRetriever::new(&server.uri(), Duration::from_millis(100)).unwrap();
        assert!(matches!(
            retriever.retrieve("q", 1).await,
            Err(EvalError::Retrieval(_))
        ));
    }

    #[tokio::test]
    async fn test_generator_sends_images_then_question() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(|req: &Request| {
                let body: serde_json::Value = match serde_json::from_slice(&req.body) {
                    Ok(v) => v,
                    Err(_) => return false,
                };
                let parts = &body["messages"][0]["content"];
                parts[0]["image_url"]["url"] == "data:image/png;base64,YWJj"
                    && parts[1]["text"]
                        .as_str()
                        .is_some_and(|t| t.contains("Where is the reset button?"))
            })
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "  On the back panel.  "}}]
            })))
            .mount(&server)
            .await;

        let generator = VisionChatGenerator::new(LlmConfig {
            api_base: server.uri(),
            model: "vlm".to_string(),
            timeout_secs: 5,
            ..Default::default()
        })
        .unwrap();

        let pages = [PageImage {
            page: PageRef::new(0, 1),
            media_type: "image/png".to_string(),
            data: b"abc".to_vec(),
        }];
        let answer = generator
            .generate("Where is the reset button?", &pages)
            .await
            .unwrap();

        assert_eq!(answer, "On the back panel.");
    }
}
