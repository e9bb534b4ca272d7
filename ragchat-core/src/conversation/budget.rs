//! Token-budgeted message assembly
//!
//! Builds `[system, ...history suffix..., new user turn]` under a ceiling.
//! The system message and the new user turn are mandatory; history is
//! admitted newest-first and admission stops at the first message that
//! would overflow, so the kept history is always a contiguous suffix. A kept
//! suffix never opens with an assistant reply whose question was dropped.

use std::sync::Arc;

use crate::error::{RagError, Result};
use crate::llm::{HeuristicTokenCounter, Message, MessageRole, TokenCounter, ToolDeclaration};

/// Messages ready to send, with the accounting that produced them
#[derive(Debug, Clone)]
pub struct BudgetedMessages {
    /// `[system, ...kept history..., new user turn]`
    pub messages: Vec<Message>,

    /// Estimated cost of `messages` plus tool schemas
    pub estimated_tokens: usize,

    /// History messages kept
    pub history_included: usize,

    /// Oldest history messages left out
    pub history_dropped: usize,
}

/// Assembles message lists that fit a model's context window
#[derive(Clone)]
pub struct MessageBudgetBuilder {
    counter: Arc<dyn TokenCounter>,
    model: String,
}

impl std::fmt::Debug for MessageBudgetBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBudgetBuilder")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl MessageBudgetBuilder {
    pub fn new(counter: Arc<dyn TokenCounter>, model: impl Into<String>) -> Self {
        Self {
            counter,
            model: model.into(),
        }
    }

    /// Builder using the character-ratio estimator
    pub fn heuristic(model: impl Into<String>) -> Self {
        Self::new(Arc::new(HeuristicTokenCounter::new()), model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Assemble messages whose estimated cost stays within `max_tokens`.
    ///
    /// # Errors
    ///
    /// Returns `BudgetExceeded` if the system prompt, tools and new user
    /// content alone do not fit.
    pub fn build(
        &self,
        system_prompt: &str,
        history: &[Message],
        new_user_content: &str,
        tools: &[ToolDeclaration],
        max_tokens: usize,
    ) -> Result<BudgetedMessages> {
        let system = Message::system(system_prompt);
        let user = Message::user(new_user_content);

        let base = self
            .counter
            .count_messages(&self.model, &[system.clone(), user.clone()], tools);
        if base > max_tokens {
            return Err(RagError::BudgetExceeded {
                required: base,
                limit: max_tokens,
            });
        }

        // Adding one message costs exactly its own count_messages delta,
        // which keeps the running total equal to a full recount.
        let mut total = base;
        let mut kept = 0;
        for message in history.iter().rev() {
            let cost = self.message_cost(message);
            if total + cost > max_tokens {
                break;
            }
            total += cost;
            kept += 1;
        }

        while kept > 0 && history[history.len() - kept].role == MessageRole::Assistant {
            total -= self.message_cost(&history[history.len() - kept]);
            kept -= 1;
        }

        let start = history.len() - kept;
        let mut messages = Vec::with_capacity(kept + 2);
        messages.push(system);
        messages.extend_from_slice(&history[start..]);
        messages.push(user);

        if start > 0 {
            tracing::debug!(
                model = %self.model,
                dropped = start,
                kept,
                estimated_tokens = total,
                max_tokens,
                "Dropped oldest history to fit token budget"
            );
        }

        Ok(BudgetedMessages {
            messages,
            estimated_tokens: total,
            history_included: kept,
            history_dropped: start,
        })
    }

    fn message_cost(&self, message: &Message) -> usize {
        let with = self
            .counter
            .count_messages(&self.model, std::slice::from_ref(message), &[]);
        let without = self.counter.count_messages(&self.model, &[], &[]);
        with - without
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts one token per whitespace-separated word
    struct WordCounter;

    impl TokenCounter for WordCounter {
        fn count_text(&self, _model: &str, text: &str) -> usize {
            text.split_whitespace().count()
        }
    }

    fn builder() -> MessageBudgetBuilder {
        MessageBudgetBuilder::new(Arc::new(WordCounter), "gpt-35-turbo")
    }

    fn history(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("question number {}", i))
                } else {
                    Message::assistant(format!("answer number {}", i))
                }
            })
            .collect()
    }

    fn full_cost(b: &MessageBudgetBuilder, messages: &[Message], tools: &[ToolDeclaration]) -> usize {
        WordCounter.count_messages(b.model(), messages, tools)
    }

    #[test]
    fn test_everything_fits() {
        let b = builder();
        let result = b.build("sys", &history(4), "new question", &[], 10_000).unwrap();

        assert_eq!(result.messages.len(), 6);
        assert_eq!(result.messages[0].role, MessageRole::System);
        assert_eq!(result.messages[5].content, "new question");
        assert_eq!(result.history_included, 4);
        assert_eq!(result.history_dropped, 0);
        assert_eq!(result.estimated_tokens, full_cost(&b, &result.messages, &[]));
    }

    #[test]
    fn test_oldest_history_dropped_first() {
        let b = builder();
        let past = history(6);

        // base: 2 messages (1 + 2 words) = 2*4 + 3 + 3 = 14; each history message costs 4 + 3 = 7
        let result = b.build("sys", &past, "new question", &[], 14 + 7 * 4).unwrap();

        assert_eq!(result.history_included, 4);
        assert_eq!(result.history_dropped, 2);
        assert_eq!(&result.messages[1..5], &past[2..]);
        assert_eq!(result.estimated_tokens, 14 + 7 * 4);
    }

    #[test]
    fn test_base_alone_exceeds_budget() {
        let b = builder();
        let err = b
            .build("a long system prompt here", &[], "and a question", &[], 5)
            .unwrap_err();

        match err {
            RagError::BudgetExceeded { required, limit } => {
                assert!(required > limit);
                assert_eq!(limit, 5);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_tools_consume_budget() {
        let b = builder();
        let tool = ToolDeclaration::new(
            "search_sources",
            "Retrieve sources",
            serde_json::json!({"type": "object", "properties": {}}),
        );
        let past = history(6);

        // base 13 without the tool, 15 with it; 41 leaves room for four messages only without
        let without = b.build("sys", &past, "q", &[], 41).unwrap();
        let with = b.build("sys", &past, "q", std::slice::from_ref(&tool), 41).unwrap();

        assert_eq!(without.history_included, 4);
        assert_eq!(with.history_included, 2);
        assert_eq!(
            with.estimated_tokens,
            full_cost(&b, &with.messages, std::slice::from_ref(&tool))
        );
    }

    #[test]
    fn test_admission_stops_at_first_overflow() {
        let b = builder();
        let past = vec![
            Message::user("short"),
            Message::assistant("a very long answer that will not fit in the remaining budget"),
            Message::user("short"),
        ];

        // base = 14, newest "short" costs 5, long answer costs 16
        let result = b.build("sys", &past, "new question", &[], 14 + 5 + 10).unwrap();

        assert_eq!(result.history_included, 1);
        assert_eq!(result.messages.len(), 3);
    }

    #[test]
    fn test_answer_without_its_question_is_dropped() {
        let b = builder();
        let past = history(4);

        // Room for three messages; the oldest of them would be an orphaned answer
        let result = b.build("sys", &past, "new question", &[], 14 + 7 * 3).unwrap();

        assert_eq!(result.history_included, 2);
        assert_eq!(result.history_dropped, 2);
        assert_eq!(result.messages[1].role, MessageRole::User);
        assert_eq!(&result.messages[1..3], &past[2..]);
        assert_eq!(result.estimated_tokens, full_cost(&b, &result.messages, &[]));
    }

    #[test]
    fn test_kept_history_is_monotonic_in_budget() {
        let b = builder();
        let past = history(10);

        let mut previous = 0;
        for limit in 14..120 {
            let result = b.build("sys", &past, "new question", &[], limit).unwrap();
            assert!(result.history_included >= previous);
            assert!(result.estimated_tokens <= limit);
            previous = result.history_included;
        }
        assert_eq!(previous, 10);
    }

    #[test]
    fn test_heuristic_builder() {
        let b = MessageBudgetBuilder::heuristic("gpt-4");
        let result = b.build("sys", &history(2), "hi", &[], 1_000).unwrap();
        assert_eq!(result.messages.len(), 4);
    }
}
