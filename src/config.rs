//! Configuration management

use anyhow::Result;
use std::path::PathBuf;

use crate::history::DEFAULT_CAPACITY;

/// Bot configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// OpenAI-compatible API key (completion falls back to the apology
    /// string when unset)
    pub api_key: Option<String>,

    /// API base URL for completion and embeddings
    pub api_base: String,

    /// Chat completion model
    pub model: String,

    /// Embedding model
    pub embedding_model: String,

    /// Telegram bot token
    pub bot_token: Option<String>,

    /// Restrict handling to one chat (all chats when unset)
    pub target_chat_id: Option<i64>,

    /// SQLite database path for the message log
    pub db_path: PathBuf,

    /// Rolling history window size
    pub history_capacity: usize,

    /// Similar past messages recalled per turn (0 disables retrieval)
    pub recall_top_k: usize,

    /// System instruction seeding the history buffer
    pub system_prompt: Option<String>,

    /// Max response tokens (API default when unset)
    pub max_tokens: Option<usize>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").ok();

        let api_base = std::env::var("OPENAI_API_BASE")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        let model = std::env::var("CHATRELAY_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let embedding_model = std::env::var("EMBEDDING_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string());

        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN").ok();

        let target_chat_id = std::env::var("TARGET_CHAT_ID")
            .ok()
            .and_then(|v| v.parse().ok());

        let db_path = std::env::var("CHATRELAY_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_local_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("chatrelay")
                    .join("messages.db")
            });

        let history_capacity = std::env::var("CHATRELAY_HISTORY_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_CAPACITY);

        let recall_top_k = std::env::var("CHATRELAY_RECALL_TOP_K")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);

        let system_prompt = std::env::var("CHATRELAY_SYSTEM_PROMPT").ok();

        let max_tokens = std::env::var("CHATRELAY_MAX_TOKENS")
            .ok()
            .and_then(|v| v.parse().ok());

        Ok(Self {
            api_key,
            api_base,
            model,
            embedding_model,
            bot_token,
            target_chat_id,
            db_path,
            history_capacity,
            recall_top_k,
            system_prompt,
            max_tokens,
        })
    }
}
