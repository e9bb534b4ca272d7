//! Token estimation
//!
//! The budget builder only needs an estimate that grows with content. Exact
//! tokenization is left to whichever `TokenCounter` the caller plugs in.

use crate::llm::{Message, ToolDeclaration};

/// Tokens charged per message for role and separators
const MESSAGE_OVERHEAD: usize = 4;

/// Tokens charged once per request for reply priming
const REPLY_PRIMING: usize = 3;

/// Known context windows, by model name
const MODEL_TOKEN_LIMITS: &[(&str, usize)] = &[
    ("gpt-35-turbo", 4_000),
    ("gpt-3.5-turbo", 4_000),
    ("gpt-35-turbo-16k", 16_000),
    ("gpt-3.5-turbo-16k", 16_000),
    ("gpt-4", 8_100),
    ("gpt-4-32k", 32_000),
    ("gpt-4v", 128_000),
    ("gpt-4o", 128_000),
    ("gpt-4o-mini", 128_000),
];

/// Context window for a model name.
///
/// Exact names win; otherwise the longest known prefix is used, so dated
/// snapshots like `gpt-4o-2024-05-13` resolve to their family.
pub fn model_token_limit(model: &str) -> Option<usize> {
    let model = model.trim().to_ascii_lowercase();

    if let Some((_, limit)) = MODEL_TOKEN_LIMITS.iter().find(|(name, _)| *name == model) {
        return Some(*limit);
    }

    MODEL_TOKEN_LIMITS
        .iter()
        .filter(|(name, _)| model.starts_with(name))
        .max_by_key(|(name, _)| name.len())
        .map(|(_, limit)| *limit)
}

/// Token counting interface used by the budget builder
pub trait TokenCounter: Send + Sync {
    /// Count tokens in a piece of text for the given model
    fn count_text(&self, model: &str, text: &str) -> usize;

    /// Estimate the cost of a full request.
    ///
    /// Tool schemas are counted as if they were part of the system prompt.
    fn count_messages(&self, model: &str, messages: &[Message], tools: &[ToolDeclaration]) -> usize {
        let message_tokens: usize = messages
            .iter()
            .map(|m| MESSAGE_OVERHEAD + self.count_text(model, &m.content))
            .sum();

        let tool_tokens: usize = tools
            .iter()
            .map(|t| self.count_text(model, &t.to_function_json().to_string()))
            .sum();

        message_tokens + tool_tokens + REPLY_PRIMING
    }
}

/// Character-ratio estimator.
///
/// Roughly four characters per token for English prose; good enough to keep
/// requests under a context window with some headroom.
#[derive(Debug, Clone)]
pub struct HeuristicTokenCounter {
    chars_per_token: f32,
}

impl HeuristicTokenCounter {
    pub fn new() -> Self {
        Self {
            chars_per_token: 4.0,
        }
    }

    pub fn with_chars_per_token(mut self, ratio: f32) -> Self {
        self.chars_per_token = if ratio > 0.0 { ratio } else { 4.0 };
        self
    }
}

impl Default for HeuristicTokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter for HeuristicTokenCounter {
    fn count_text(&self, _model: &str, text: &str) -> usize {
        (text.chars().count() as f32 / self.chars_per_token).ceil() as usize
    }
}
