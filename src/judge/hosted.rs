//! Judge backed by a hosted OpenAI-compatible chat API.

use super::{Judge, JudgeError, parse_scores};
use crate::config::JudgeConfig;
use crate::error::Result;
use crate::llm::{LlmClient, Message, Prompts};
use crate::metrics::GenerationScores;
use async_trait::async_trait;
use tracing::debug;

/// Judge running on a hosted model such as `gpt-4o`.
pub struct HostedJudge {
    client: LlmClient,
}

impl HostedJudge {
    pub fn new(config: &JudgeConfig) -> Result<Self> {
        Ok(Self {
            client: LlmClient::new(config.llm_config())?,
        })
    }
}

#[async_trait]
impl Judge for HostedJudge {
    fn name(&self) -> String {
        format!("hosted:{}", self.client.model())
    }

    async fn score(
        &self,
        question: &str,
        expected_answer: &str,
        generated_answer: &str,
    ) -> std::result::Result<GenerationScores, JudgeError> {
        let prompt = Prompts::fill(
            Prompts::generation_judge(),
            &[
                ("question", question),
                ("expected_answer", expected_answer),
                ("generated_answer", generated_answer),
            ],
        );

        debug!(model = %self.client.model(), "calling hosted judge");

        // Any failure to obtain a reply, including a malformed envelope,
        // means the service did not deliver ratings.
        let response = self
            .client
            .chat(vec![Message::system(Prompts::system_judge()), Message::user(prompt)])
            .await
            .map_err(|e| JudgeError::Unavailable(e.to_string()))?;

        parse_scores(&response.content)
    }
}
