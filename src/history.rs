//! Conversation History Buffer
//!
//! Fixed-capacity rolling window of role-tagged turns sent to the
//! completion API as context. System turns (the persona seed) are pinned;
//! once the window is full, the oldest non-system turn is evicted.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// Default rolling window size
pub const DEFAULT_CAPACITY: usize = 50;

/// Role of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(()),
        }
    }
}

/// One role-tagged message unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Fixed-capacity ordered sequence of turns
///
/// Eviction is strictly FIFO among non-system turns; system turns never
/// leave the window. Order of surviving turns is preserved.
pub struct HistoryBuffer {
    turns: VecDeque<Turn>,
    capacity: usize,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Create a buffer pre-loaded with the persona seed conversation
    pub fn with_seed(capacity: usize, seed: impl IntoIterator<Item = Turn>) -> Self {
        let mut buffer = Self::new(capacity);
        for turn in seed {
            buffer.push(turn);
        }
        buffer
    }

    /// Append a turn, evicting the oldest non-system turn when over capacity
    pub fn push(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.capacity {
            match self.turns.iter().position(|t| t.role != Role::System) {
                Some(pos) => {
                    self.turns.remove(pos);
                }
                // Window is entirely system turns; nothing is evictable.
                None => break,
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all non-system turns, keeping the persona seed intact
    pub fn reset(&mut self) {
        self.turns.retain(|t| t.role == Role::System);
    }

    /// Assemble the prompt context, optionally augmented with recalled
    /// past messages.
    ///
    /// The recall block is injected as a system turn after the pinned
    /// system turns and ahead of the live history, so the model sees it
    /// as background rather than as part of the dialogue.
    pub fn assemble(&self, recalled: &[String]) -> Vec<Turn> {
        let mut context: Vec<Turn> = Vec::with_capacity(self.turns.len() + 1);

        if recalled.is_empty() {
            context.extend(self.turns.iter().cloned());
            return context;
        }

        let mut block = String::from("Related messages from earlier conversations:\n");
        for text in recalled {
            block.push_str("- ");
            block.push_str(text);
            block.push('\n');
        }

        let split = self
            .turns
            .iter()
            .position(|t| t.role != Role::System)
            .unwrap_or(self.turns.len());

        context.extend(self.turns.iter().take(split).cloned());
        context.push(Turn::system(block.trim_end()));
        context.extend(self.turns.iter().skip(split).cloned());
        context
    }
}
