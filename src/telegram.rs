//! Telegram gateway
//!
//! Long-polling adapter mapping Telegram messages into the `ChatSession`
//! and relaying replies. Connection, gateway, and event dispatch belong to
//! teloxide; this module only does the wiring.
//!
//! Uses explicit Dispatcher pattern for reliable message polling.

use anyhow::Result;
use std::sync::Arc;
use teloxide::{
    dispatching::{Dispatcher, UpdateFilterExt},
    dptree,
    error_handlers::LoggingErrorHandler,
    prelude::*,
};
use tokio::sync::Mutex;

use crate::completion::CompletionClient;
use crate::config::Config;
use crate::embeddings::{EmbeddingClient, EmbeddingConfig};
use crate::history::{HistoryBuffer, Role, Turn};
use crate::session::{ChatSession, IncomingMessage};
use crate::store::MessageLog;

/// Gateway startup failures
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("TELEGRAM_BOT_TOKEN is not set")]
    MissingToken,

    #[error("Bot authentication failed: {0}")]
    AuthenticationFailed(String),
}

/// Shared state handed to the dispatcher
struct GatewayData {
    session: Mutex<ChatSession>,
    bot_user_id: u64,
}

/// Run the Telegram bot until the dispatcher stops
pub async fn run_bot(config: Config) -> Result<()> {
    let token = config
        .bot_token
        .clone()
        .ok_or(GatewayError::MissingToken)?;

    let log = MessageLog::open(&config.db_path)?;
    tracing::info!("Message log: {} entries", log.count()?);

    // Probe the embedding endpoint once; retrieval degrades to
    // history-only context when it is down.
    let embeddings = {
        let client = EmbeddingClient::new(EmbeddingConfig {
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            model: config.embedding_model.clone(),
            ..EmbeddingConfig::default()
        })?;
        if client.check_availability().await {
            tracing::info!("Embedding service available - retrieval augmentation enabled");
            Some(Arc::new(client))
        } else {
            tracing::warn!("Embedding service unavailable - retrieval augmentation disabled");
            None
        }
    };

    let completion = Arc::new(CompletionClient::from_config(&config));
    if !completion.is_available() {
        tracing::warn!("OPENAI_API_KEY not set - every reply will be the fallback message");
    }

    let mut history = HistoryBuffer::new(config.history_capacity);
    if let Some(prompt) = &config.system_prompt {
        history.push(Turn::system(prompt));
    }

    // Rehydrate the window from the persisted log for continuity across
    // restarts. Stored system turns are skipped; the seed above wins.
    for logged in log.recent(config.history_capacity)? {
        if let Ok(role) = logged.role.parse::<Role>() {
            if role != Role::System {
                history.push(Turn {
                    role,
                    content: logged.content,
                });
            }
        }
    }

    let session = ChatSession::new(
        history,
        log,
        embeddings,
        completion,
        config.target_chat_id,
        config.recall_top_k,
    );

    // Re-embed anything logged during a previous embedding outage
    match session.backfill_embeddings(100).await {
        Ok(0) => {}
        Ok(n) => tracing::info!("Backfilled {} embeddings on startup", n),
        Err(e) => tracing::warn!("Embedding backfill failed: {}", e),
    }

    let bot = Bot::new(token);

    tracing::info!("Verifying bot token...");
    let me = bot
        .get_me()
        .await
        .map_err(|e| GatewayError::AuthenticationFailed(e.to_string()))?;
    tracing::info!(
        "Bot authenticated: @{} (ID: {})",
        me.username.as_deref().unwrap_or("unknown"),
        me.id
    );

    // Delete any existing webhook to ensure polling works
    if let Err(e) = bot.delete_webhook().await {
        tracing::warn!("Failed to delete webhook: {} (continuing anyway)", e);
    }

    let data = Arc::new(GatewayData {
        session: Mutex::new(session),
        bot_user_id: me.id.0,
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(message_handler));

    tracing::info!("Starting dispatcher with long polling...");
    match config.target_chat_id {
        Some(chat) => tracing::info!("Listening on chat {}", chat),
        None => tracing::info!("Listening on all chats"),
    }

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![data])
        .default_handler(|upd| async move {
            tracing::debug!("Unhandled update: {:?}", upd);
        })
        .error_handler(LoggingErrorHandler::with_custom_text(
            "Error in message handler",
        ))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    tracing::warn!("Dispatcher stopped");
    Ok(())
}

/// Message handler endpoint for the dispatcher
async fn message_handler(bot: Bot, msg: Message, data: Arc<GatewayData>) -> ResponseResult<()> {
    let text = match msg.text() {
        Some(text) => text,
        None => return Ok(()),
    };

    let sender_id = msg.from.as_ref().map(|u| u.id.0).unwrap_or(0);
    let incoming = IncomingMessage {
        sender_id: sender_id as i64,
        chat_id: msg.chat.id.0,
        from_self: sender_id == data.bot_user_id,
        content: text.to_string(),
    };

    if !incoming.from_self && !incoming.content.trim().is_empty() {
        let _ = bot
            .send_chat_action(msg.chat.id, teloxide::types::ChatAction::Typing)
            .await;
    }

    let reply = {
        let mut session = data.session.lock().await;
        session.handle_message(&incoming).await
    };

    match reply {
        Ok(Some(reply)) => {
            bot.send_message(msg.chat.id, reply).await?;
        }
        Ok(None) => {}
        Err(e) => tracing::error!("Message handling failed: {:#}", e),
    }

    Ok(())
}
