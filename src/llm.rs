//! Generative backend client.

use crate::config::LlmConfig;
use crate::error::GenerationError;

use anyhow::Context as _;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Narrow interface to the generative backend.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Produce a reply for the assembled prompt.
    ///
    /// Any fault surfaces as `GenerationError`; the text of internal errors
    /// must never reach a user-visible reply.
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<CompletionMessage<'a>>,
}

#[derive(Serialize)]
struct CompletionMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionChoiceMessage,
}

#[derive(Deserialize)]
struct CompletionChoiceMessage {
    content: Option<String>,
}

/// REST responder speaking the chat-completions wire format.
pub struct RestResponder {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl RestResponder {
    pub fn new(config: &LlmConfig) -> crate::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .with_context(|| "failed to build generation HTTP client")?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Responder for RestResponder {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let url = format!("{}/chat/completions", self.api_base);
        let request = CompletionRequest {
            model: &self.model,
            messages: vec![CompletionMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|error| GenerationError::RequestFailed(error.to_string()))?;

        if !response.status().is_success() {
            return Err(GenerationError::RequestFailed(format!(
                "backend returned {}",
                response.status()
            )));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|error| GenerationError::RequestFailed(error.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(GenerationError::EmptyResponse)
    }
}
