//! Direct chat over the service-side search integration
//!
//! No query refinement and no trimming: the whole history is resent every
//! turn and the completion service queries the index itself through an
//! `azure_search` data source.

use serde_json::{Value, json};
use std::sync::Arc;

use crate::config::{RagConfig, SearchConfig};
use crate::console::Console;
use crate::conversation::ConversationHistory;
use crate::error::{RagError, Result};
use crate::llm::{CompletionProvider, CompletionRequest, GenerationSettings, Message};
use crate::pipeline::controller::{
    ConversationEnd, ConversationTranscript, FAREWELL, RESPONSE_PREFIX, read_question,
};

/// Printed when a direct chat starts
pub const WELCOME: &str = "Welcome to the Contoso help chatbot!";

/// Request extension attaching the search index as a data source
pub fn data_sources(search: &SearchConfig) -> Value {
    json!([{
        "type": "azure_search",
        "parameters": {
            "endpoint": search.endpoint,
            "index_name": search.index,
            "authentication": {
                "type": "api_key",
                "key": search.api_key,
            },
        },
    }])
}

/// Multi-turn chat that resends the full history each turn
pub struct DirectChat {
    provider: Arc<dyn CompletionProvider>,
    settings: GenerationSettings,
    system_prompt: String,
    data_sources: Value,
    max_turns: usize,
}

impl DirectChat {
    pub fn from_config(config: &RagConfig, provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            provider,
            settings: config.chat.answer_settings(),
            system_prompt: config.chat.direct_system_prompt.clone(),
            data_sources: data_sources(&config.search),
            max_turns: config.chat.max_turns,
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    /// Send `input` after the full `history` and return the extended snapshot.
    ///
    /// # Errors
    ///
    /// Returns the provider's error, or `EmptyCompletion` if the reply is blank.
    pub async fn send(&self, history: &ConversationHistory, input: &str) -> Result<(ConversationHistory, String)> {
        let mut messages = history.to_messages();
        messages.push(Message::user(input));

        let request = CompletionRequest::new(messages)
            .with_settings(self.settings)
            .with_extension("data_sources", self.data_sources.clone());
        let response = self.provider.complete(&request).await?;

        let reply = response
            .first_text()
            .ok_or_else(|| RagError::EmptyCompletion("direct chat reply had no content".to_string()))?
            .to_string();

        Ok((history.with_exchange(input, reply.clone()), reply))
    }

    /// Run until `max_turns` replies or input closes.
    ///
    /// # Errors
    ///
    /// Returns the first console or completion error.
    pub async fn run(&self, console: &mut dyn Console) -> Result<ConversationTranscript> {
        let session_id = uuid::Uuid::new_v4();
        let mut history = ConversationHistory::new(self.system_prompt.clone());
        let mut end = ConversationEnd::Completed;

        tracing::info!(session_id = %session_id, max_turns = self.max_turns, "Starting direct chat");
        console.write_line(WELCOME)?;

        for turn in 1..=self.max_turns {
            let Some(input) = read_question(console)? else {
                end = ConversationEnd::InputClosed;
                break;
            };

            console.write_line("...Sending the following request to Azure OpenAI endpoint...")?;
            console.write_line(&format!("Request: {}\n", input))?;

            let (next, reply) = self.send(&history, &input).await?;
            tracing::debug!(turn, messages = next.len(), "Direct chat turn complete");

            console.write_line(&format!("{}{}\n", RESPONSE_PREFIX, reply))?;
            history = next;
        }

        console.write_line(FAREWELL)?;

        Ok(ConversationTranscript {
            session_id,
            history,
            turns: Vec::new(),
            end,
        })
    }
}
