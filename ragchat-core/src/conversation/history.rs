//! Conversation history snapshots

use serde::{Deserialize, Serialize};

use crate::llm::{Message, MessageRole};

/// One completed exchange: the user's input and the assistant's answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub user: String,
    pub assistant: String,
}

impl Exchange {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }

    /// Convert to LLM messages
    pub fn to_messages(&self) -> [Message; 2] {
        [
            Message::user(self.user.clone()),
            Message::assistant(self.assistant.clone()),
        ]
    }
}

/// Immutable snapshot of a conversation.
///
/// Only completed exchanges are stored, so an answer that is still being
/// produced can never leak into a request built from a snapshot. Extending
/// the conversation yields a new snapshot and leaves the old one intact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationHistory {
    system_prompt: String,
    exchanges: Vec<Exchange>,
}

impl ConversationHistory {
    /// Start a conversation with only the system prompt
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            exchanges: Vec::new(),
        }
    }

    /// New snapshot with one more completed exchange appended
    pub fn with_exchange(&self, user: impl Into<String>, assistant: impl Into<String>) -> Self {
        let mut exchanges = Vec::with_capacity(self.exchanges.len() + 1);
        exchanges.extend_from_slice(&self.exchanges);
        exchanges.push(Exchange::new(user, assistant));

        Self {
            system_prompt: self.system_prompt.clone(),
            exchanges,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    /// Prior turns in chronological order, without the system message
    pub fn past_turns(&self) -> Vec<Message> {
        self.exchanges.iter().flat_map(Exchange::to_messages).collect()
    }

    /// Full message list: system message first, then every past turn
    pub fn to_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.len());
        messages.push(Message::new(MessageRole::System, self.system_prompt.clone()));
        messages.extend(self.past_turns());
        messages
    }

    /// Message count including the system message
    pub fn len(&self) -> usize {
        1 + 2 * self.exchanges.len()
    }

    /// Number of completed exchanges
    pub fn turn_count(&self) -> usize {
        self.exchanges.len()
    }

    /// True when no exchange has completed yet
    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    /// Answer of the most recent exchange
    pub fn last_answer(&self) -> Option<&str> {
        self.exchanges.last().map(|e| e.assistant.as_str())
    }
}
