//! Chat Session
//!
//! The explicitly constructed session object owning the history buffer,
//! message log, and API clients. One `handle_message` call per incoming
//! message; the gateway serializes calls behind an async mutex.

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::completion::CompletionBackend;
use crate::embeddings::EmbeddingClient;
use crate::history::{HistoryBuffer, Role, Turn};
use crate::store::MessageLog;

/// Fixed reply substituted for any completion failure
pub const FALLBACK_REPLY: &str = "Sorry, I can't answer that right now.";

/// Fallback apologies are logged for the record but never embedded or
/// recalled; an outage must not fill the similarity index with them.
fn recall_eligible(content: &str) -> bool {
    content != FALLBACK_REPLY
}

/// Platform-agnostic incoming message
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Sender identifier (platform-specific numeric id)
    pub sender_id: i64,
    /// Chat/conversation identifier
    pub chat_id: i64,
    /// Was this sent by the bot's own account?
    pub from_self: bool,
    /// Message body
    pub content: String,
}

impl IncomingMessage {
    pub fn text(sender_id: i64, chat_id: i64, content: &str) -> Self {
        Self {
            sender_id,
            chat_id,
            from_self: false,
            content: content.to_string(),
        }
    }
}

/// Per-bot conversation session
pub struct ChatSession {
    history: HistoryBuffer,
    log: MessageLog,
    embeddings: Option<Arc<EmbeddingClient>>,
    completion: Arc<dyn CompletionBackend>,
    target_chat: Option<i64>,
    recall_top_k: usize,
}

impl ChatSession {
    pub fn new(
        history: HistoryBuffer,
        log: MessageLog,
        embeddings: Option<Arc<EmbeddingClient>>,
        completion: Arc<dyn CompletionBackend>,
        target_chat: Option<i64>,
        recall_top_k: usize,
    ) -> Self {
        Self {
            history,
            log,
            embeddings,
            completion,
            target_chat,
            recall_top_k,
        }
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    /// Process one incoming message, returning the reply to relay (or
    /// `None` when the message is skipped).
    ///
    /// Own-account and empty messages are never forwarded to the
    /// completion call; a failed completion collapses to the fixed
    /// fallback reply.
    pub async fn handle_message(&mut self, msg: &IncomingMessage) -> Result<Option<String>> {
        if msg.from_self {
            debug!("Ignoring own message in chat {}", msg.chat_id);
            return Ok(None);
        }
        if msg.content.trim().is_empty() {
            debug!("Ignoring empty message in chat {}", msg.chat_id);
            return Ok(None);
        }
        if let Some(target) = self.target_chat {
            if msg.chat_id != target {
                debug!("Ignoring message outside target chat: {}", msg.chat_id);
                return Ok(None);
            }
        }

        if msg.content.trim() == "/reset" {
            let cleared = self.reset()?;
            return Ok(Some(format!(
                "Conversation cleared: {} logged messages removed.",
                cleared
            )));
        }

        // Embed once; the vector serves both recall and storage. The
        // current message is not yet in the log, so it cannot recall
        // itself.
        let embedding = self.embed_text(&msg.content).await;

        let recalled = match &embedding {
            Some(vec) => self.recall(vec)?,
            None => vec![],
        };

        self.history.push(Turn::user(&msg.content));
        let context = self.history.assemble(&recalled);

        let reply = match self.completion.complete(&context).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Completion request failed: {:#}", e);
                FALLBACK_REPLY.to_string()
            }
        };

        self.history.push(Turn::assistant(&reply));

        self.persist(Role::User, &msg.content, embedding.as_deref());
        let reply_embedding = if recall_eligible(&reply) {
            self.embed_text(&reply).await
        } else {
            None
        };
        self.persist(Role::Assistant, &reply, reply_embedding.as_deref());

        Ok(Some(reply))
    }

    /// Drop the rolling window (keeping the persona seed) and wipe the
    /// persisted log
    pub fn reset(&mut self) -> Result<usize> {
        self.history.reset();
        self.log.clear()
    }

    /// Recall candidates for the query vector, fallback apologies excluded
    fn recall(&self, query: &[f32]) -> Result<Vec<String>> {
        if self.recall_top_k == 0 {
            return Ok(vec![]);
        }

        // Over-fetch so filtered rows don't shrink the result set
        let hits = self.log.search_similar(query, self.recall_top_k * 3)?;
        Ok(hits
            .into_iter()
            .filter(|hit| recall_eligible(&hit.message.content))
            .map(|hit| hit.message.content)
            .take(self.recall_top_k)
            .collect())
    }

    /// Best-effort embedding; logs and degrades to `None` on failure
    async fn embed_text(&mut self, text: &str) -> Option<Vec<f32>> {
        let client = self.embeddings.as_ref()?;
        if !client.is_available() {
            return None;
        }
        match client.embed(text).await {
            Ok(vec) => Some(vec),
            Err(e) => {
                warn!("Embedding failed, logging without vector: {:#}", e);
                None
            }
        }
    }

    /// Best-effort persistence; a failed write never loses the reply
    fn persist(&self, role: Role, content: &str, embedding: Option<&[f32]>) {
        if let Err(e) = self.log.append(role.as_str(), content, embedding) {
            warn!("Failed to log {} turn: {:#}", role, e);
        }
    }

    /// Re-embed turns logged while the embedding service was down
    pub async fn backfill_embeddings(&self, batch_size: usize) -> Result<usize> {
        let client = match &self.embeddings {
            Some(c) if c.is_available() => c,
            _ => return Ok(0),
        };

        let pending = self.log.unembedded(batch_size)?;
        let mut embedded = 0;
        for (id, content) in pending {
            if !recall_eligible(&content) {
                continue;
            }
            match client.embed_uncached(&content).await {
                Ok(vec) => {
                    self.log.set_embedding(id, &vec)?;
                    embedded += 1;
                }
                Err(e) => warn!("Failed to backfill embedding for #{}: {:#}", id, e),
            }
        }

        Ok(embedded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StubBackend {
        reply: Option<String>,
        calls: std::sync::Mutex<Vec<Vec<Turn>>>,
    }

    impl StubBackend {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Some(reply.to_string()),
                calls: std::sync::Mutex::new(vec![]),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: None,
                calls: std::sync::Mutex::new(vec![]),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CompletionBackend for StubBackend {
        async fn complete(&self, turns: &[Turn]) -> Result<String> {
            self.calls.lock().unwrap().push(turns.to_vec());
            match &self.reply {
                Some(reply) => Ok(reply.clone()),
                None => anyhow::bail!("simulated API outage"),
            }
        }
    }

    fn session(backend: Arc<StubBackend>) -> ChatSession {
        let mut history = HistoryBuffer::new(10);
        history.push(Turn::system("You are a test bot."));
        ChatSession::new(
            history,
            MessageLog::open_in_memory().unwrap(),
            None,
            backend,
            None,
            0,
        )
    }

    #[tokio::test]
    async fn test_reply_round_trip() {
        let backend = StubBackend::replying("Hello back!");
        let mut session = session(backend.clone());

        let reply = session
            .handle_message(&IncomingMessage::text(1, 100, "Hello bot"))
            .await
            .unwrap();

        assert_eq!(reply.as_deref(), Some("Hello back!"));
        assert_eq!(backend.call_count(), 1);

        // Both turns land in history and in the log
        let roles: Vec<Role> = session.history().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(session.log().count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_own_message_is_never_processed() {
        let backend = StubBackend::replying("should not happen");
        let mut session = session(backend.clone());

        let mut msg = IncomingMessage::text(1, 100, "talking to myself");
        msg.from_self = true;

        let reply = session.handle_message(&msg).await.unwrap();
        assert!(reply.is_none());
        assert_eq!(backend.call_count(), 0);
        assert_eq!(session.log().count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_message_is_never_forwarded() {
        let backend = StubBackend::replying("should not happen");
        let mut session = session(backend.clone());

        for body in ["", "   ", "\n\t"] {
            let reply = session
                .handle_message(&IncomingMessage::text(1, 100, body))
                .await
                .unwrap();
            assert!(reply.is_none());
        }
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_wrong_chat_is_ignored() {
        let backend = StubBackend::replying("should not happen");
        let mut session = ChatSession::new(
            HistoryBuffer::new(10),
            MessageLog::open_in_memory().unwrap(),
            None,
            backend.clone(),
            Some(100),
            0,
        );

        let reply = session
            .handle_message(&IncomingMessage::text(1, 999, "wrong room"))
            .await
            .unwrap();
        assert!(reply.is_none());
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_completion_failure_yields_fallback() {
        let backend = StubBackend::failing();
        let mut session = session(backend);

        let reply = session
            .handle_message(&IncomingMessage::text(1, 100, "trigger an error"))
            .await
            .unwrap();

        assert_eq!(reply.as_deref(), Some(FALLBACK_REPLY));

        // The fallback is recorded like any other assistant turn
        let last = session.history().iter().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, FALLBACK_REPLY);
        assert_eq!(session.log().count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_history_stays_bounded_across_turns() {
        let backend = StubBackend::replying("ack");
        let mut history = HistoryBuffer::new(5);
        history.push(Turn::system("persona"));
        let mut session = ChatSession::new(
            history,
            MessageLog::open_in_memory().unwrap(),
            None,
            backend,
            None,
            0,
        );

        for i in 0..20 {
            session
                .handle_message(&IncomingMessage::text(1, 100, &format!("message {}", i)))
                .await
                .unwrap();
            assert!(session.history().len() <= 5);
        }

        // System turn survives all eviction
        assert_eq!(session.history().iter().next().unwrap().role, Role::System);
        // The log is append-only and keeps everything
        assert_eq!(session.log().count().unwrap(), 40);
    }

    #[tokio::test]
    async fn test_reset_command_clears_window_and_log() {
        let backend = StubBackend::replying("ack");
        let mut session = session(backend.clone());

        session
            .handle_message(&IncomingMessage::text(1, 100, "hello"))
            .await
            .unwrap();
        assert_eq!(session.log().count().unwrap(), 2);

        let reply = session
            .handle_message(&IncomingMessage::text(1, 100, "/reset"))
            .await
            .unwrap()
            .unwrap();
        assert!(reply.contains("2 logged messages"));

        // The command never reaches the completion backend
        assert_eq!(backend.call_count(), 1);
        // Only the persona seed survives; the log is empty
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history().iter().next().unwrap().role, Role::System);
        assert_eq!(session.log().count().unwrap(), 0);
    }

    #[test]
    fn test_fallback_reply_is_not_recall_eligible() {
        assert!(!recall_eligible(FALLBACK_REPLY));
        assert!(recall_eligible("an ordinary reply"));
    }

    #[tokio::test]
    async fn test_fallback_rows_are_never_recalled() {
        let log = MessageLog::open_in_memory().unwrap();
        log.append("assistant", FALLBACK_REPLY, Some(&[1.0, 0.0]))
            .unwrap();
        log.append("user", "the weather", Some(&[0.9, 0.1])).unwrap();

        let session = ChatSession::new(
            HistoryBuffer::new(10),
            log,
            None,
            StubBackend::replying("ack"),
            None,
            2,
        );

        // The fallback row is the closest match but must be filtered out
        let recalled = session.recall(&[1.0, 0.0]).unwrap();
        assert_eq!(recalled, vec!["the weather".to_string()]);
    }

    #[tokio::test]
    async fn test_completion_sees_full_context() {
        let backend = StubBackend::replying("ack");
        let mut session = session(backend.clone());

        session
            .handle_message(&IncomingMessage::text(1, 100, "first"))
            .await
            .unwrap();
        session
            .handle_message(&IncomingMessage::text(1, 100, "second"))
            .await
            .unwrap();

        let calls = backend.calls.lock().unwrap();
        let second_call = &calls[1];
        // system + first exchange + current user turn
        assert_eq!(second_call.len(), 4);
        assert_eq!(second_call[0].role, Role::System);
        assert_eq!(second_call[1].content, "first");
        assert_eq!(second_call[2].content, "ack");
        assert_eq!(second_call[3].content, "second");
    }
}
