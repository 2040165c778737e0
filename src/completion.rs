//! Chat Completion Client
//!
//! OpenAI-compatible `/v1/chat/completions` client. Builds the request from
//! assembled conversation turns and extracts the first choice's content.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::history::Turn;

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Completion backend seam; the session talks to this so tests can stub
/// the network out.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, turns: &[Turn]) -> Result<String>;
}

/// Chat completion API client
#[derive(Clone)]
pub struct CompletionClient {
    client: Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
    max_tokens: Option<usize>,
}

/// Message on the wire
#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// API request
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
}

/// API response
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
}

impl CompletionClient {
    pub fn new(api_base: Option<&str>, api_key: Option<&str>, model: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_base: api_base.unwrap_or(DEFAULT_API_BASE).to_string(),
            api_key: api_key.map(|s| s.to_string()),
            model: model.to_string(),
            max_tokens: None,
        }
    }

    /// Create from config
    pub fn from_config(config: &crate::config::Config) -> Self {
        let mut client = Self::new(
            Some(&config.api_base),
            config.api_key.as_deref(),
            &config.model,
        );
        client.max_tokens = config.max_tokens;
        client
    }

    /// Check if an API key is configured
    pub fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn request(&self, turns: &[Turn]) -> Result<String> {
        let messages: Vec<ChatMessage> = turns
            .iter()
            .map(|t| ChatMessage {
                role: t.role.as_str().to_string(),
                content: t.content.clone(),
            })
            .collect();

        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
        };

        debug!(
            "Calling completion API: model={}, turns={}",
            self.model,
            turns.len()
        );

        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY not set - completion unavailable"))?;

        let url = format!("{}/chat/completions", self.api_base);
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            anyhow::bail!("Completion API error {}: {}", status, text);
        }

        let result: ChatResponse = response.json().await?;

        if let Some(usage) = &result.usage {
            info!(
                "Completion response: model={}, in={}, out={}",
                self.model, usage.prompt_tokens, usage.completion_tokens
            );
        }

        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("Completion response contained no choices"))
    }
}

#[async_trait]
impl CompletionBackend for CompletionClient {
    async fn complete(&self, turns: &[Turn]) -> Result<String> {
        self.request(turns).await
    }
}
