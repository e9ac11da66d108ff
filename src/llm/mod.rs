//! LLM integration module.
//!
//! Provides an OpenAI-compatible client for chat completions and
//! the prompts used for judging and page-grounded answering.

mod client;
mod prompts;

pub use client::{ContentPart, ImageUrl, LlmClient, LlmResponse, Message, MessageContent, Role};
pub use prompts::Prompts;
