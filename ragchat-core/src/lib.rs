//! # ragchat - retrieval-augmented chat over Azure OpenAI and Azure AI Search
//!
//! Each turn of a conversation runs a fixed pipeline:
//! - Generate an optimized search query from the conversation and the new question
//! - Retrieve a bounded set of documents for that query
//! - Compose an answer grounded on the documents' highlight snippets
//! - Extend the conversation history with the question and answer
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ragchat_core::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = RagConfig::load(None)?;
//!
//!     let provider = Arc::new(AzureOpenAIProvider::from_config(&config.openai, &config.http)?);
//!     let search = Arc::new(AzureSearchClient::from_config(&config.search, &config.http)?);
//!
//!     let chat = ConversationLoop::from_config(
//!         &config,
//!         provider,
//!         search,
//!         Arc::new(HeuristicTokenCounter::new()),
//!     )?;
//!
//!     let transcript = chat.run(&mut StdConsole::stdio()).await?;
//!     println!("{} turns", transcript.turns.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! External services sit behind traits so the pipeline can run offline:
//! - **`CompletionProvider`**: chat completions (`AzureOpenAIProvider`)
//! - **`SearchService`**: index search pages (`AzureSearchClient`)
//! - **`TokenCounter`**: token estimates for budgeting (`HeuristicTokenCounter`)
//! - **`Console`**: line-based input and output (`StdConsole`)
//!
//! The `eval` module provides scripted implementations of all four.

pub mod config;
pub mod console;
pub mod conversation;
pub mod error;
pub mod eval;
pub mod llm;
pub mod pipeline;
pub mod retrieval;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{
        ChatConfig, HttpConfig, OpenAIConfig, RagConfig, RetrievalFailurePolicy, SearchConfig,
    };
    pub use crate::console::{Console, StdConsole};
    pub use crate::conversation::{BudgetedMessages, ConversationHistory, MessageBudgetBuilder};
    pub use crate::error::{RagError, Result};
    pub use crate::llm::providers::AzureOpenAIProvider;
    pub use crate::llm::{
        CompletionProvider, CompletionRequest, CompletionResponse, GenerationSettings,
        HeuristicTokenCounter, Message, MessageRole, RetryPolicy, TokenCounter, ToolDeclaration,
        ToolInvocation,
    };
    pub use crate::pipeline::{
        ConversationEnd, ConversationLoop, ConversationTranscript, DirectChat,
        GroundedAnswerComposer, QueryExtractor, QueryOutcome, TurnRecord,
    };
    pub use crate::retrieval::{AzureSearchClient, RetrievedDocument, Retriever, SearchService};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}
