use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ReplyGenerator;
use crate::config::AssistantConfig;
use crate::error::ApiError;

const SYSTEM_PROMPT: &str = "You are a helpful technical support assistant. \
Answer the customer's question about their ticket concisely in plain text. \
If you cannot resolve the problem, tell them a support engineer will follow up.";

/// [`ReplyGenerator`] backed by an OpenAI-compatible chat-completions API.
pub struct ChatCompletionsGenerator {
    url: String,
    api_key: Option<String>,
    model: String,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    /// Lets the provider attribute usage per ticket.
    user: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionsGenerator {
    pub fn new(config: &AssistantConfig) -> Self {
        Self {
            url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ReplyGenerator for ChatCompletionsGenerator {
    async fn generate_reply(&self, ticket_id: &str, prompt: &str) -> Result<String, ApiError> {
        let body = CompletionRequest {
            model: &self.model,
            messages: [
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user", content: prompt },
            ],
            user: ticket_id,
        };

        let mut request = self.http.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        tracing::debug!(%ticket_id, model = %self.model, "requesting assistant reply");
        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            tracing::error!(%status, %ticket_id, "assistant backend error");
            return Err(ApiError::upstream("Assistant backend returned an error"));
        }

        let parsed: CompletionResponse = resp.json().await.map_err(|e| {
            tracing::error!(?e, "assistant response parse failed");
            ApiError::upstream("Failed to parse assistant response")
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| ApiError::upstream("Assistant returned an empty reply"))
    }
}
