//! Conversation state and message assembly
//!
//! # Example
//!
//! ```rust,ignore
//! use ragchat_core::conversation::{ConversationHistory, MessageBudgetBuilder};
//!
//! let history = ConversationHistory::new("You are helpful")
//!     .with_exchange("Does my plan cover eye exams?", "Yes, once a year.");
//!
//! let builder = MessageBudgetBuilder::heuristic("gpt-35-turbo");
//! let built = builder.build(history.system_prompt(), &history.past_turns(), "And glasses?", &[], 3_000)?;
//! ```

mod budget;
mod history;

pub use budget::{BudgetedMessages, MessageBudgetBuilder};
pub use history::{ConversationHistory, Exchange};
