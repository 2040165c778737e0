//! chatrelay
//!
//! Retrieval-augmented chat relay bot: listens on one messaging channel,
//! forwards user text to an OpenAI-compatible completion API, and relays
//! the reply back.
//!
//! # Architecture
//!
//! ```text
//! Telegram ──► Gateway ──► ChatSession ──► Completion API
//!              (teloxide)      │
//!                              ├── HistoryBuffer (bounded, FIFO eviction)
//!                              ├── MessageLog    (SQLite, append-only)
//!                              └── Embeddings    (recall of similar turns)
//! ```
//!
//! The history buffer is the core: a fixed-capacity window of role-tagged
//! turns, augmented before each completion call with semantically similar
//! past messages from the persisted log.

pub mod completion;
pub mod config;
pub mod embeddings;
pub mod history;
pub mod session;
pub mod store;
pub mod telegram;

pub use completion::{CompletionBackend, CompletionClient};
pub use config::Config;
pub use embeddings::{embedding_from_bytes, embedding_to_bytes, EmbeddingClient, EmbeddingConfig};
pub use history::{HistoryBuffer, Role, Turn, DEFAULT_CAPACITY};
pub use session::{ChatSession, IncomingMessage, FALLBACK_REPLY};
pub use store::{LoggedMessage, MessageLog, SimilarMessage};
