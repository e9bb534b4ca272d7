//! Conversation loop
//!
//! Drives a fixed number of strictly sequential turns. Each turn generates a
//! search query, retrieves documents, composes a grounded answer and returns
//! a new history snapshot; nothing else carries state between turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{RagConfig, RetrievalFailurePolicy, TokenCeilings};
use crate::console::Console;
use crate::conversation::{ConversationHistory, MessageBudgetBuilder};
use crate::error::Result;
use crate::llm::{CompletionProvider, CompletionRequest, GenerationSettings, TokenCounter};
use crate::pipeline::composer::GroundedAnswerComposer;
use crate::pipeline::query::{QueryExtractor, QuerySource};
use crate::retrieval::{Retriever, SearchService};

/// Prompt shown before each question
pub const INPUT_PROMPT: &str = "\nEnter a question:";

/// Printed before each answer
pub const RESPONSE_PREFIX: &str = "Response: ";

/// Printed when the conversation ends
pub const FAREWELL: &str = "Thanks for chatting! Goodbye";

/// How a conversation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationEnd {
    /// Every configured turn ran
    Completed,

    /// Input closed before the last turn
    InputClosed,
}

/// Report for one completed turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    /// 1-based turn index
    pub index: usize,

    pub input: String,

    /// Query sent to the search index
    pub query: String,

    pub query_source: QuerySource,

    /// Documents the answer was grounded on
    pub documents: usize,

    /// User turn carrying the query and snippets
    pub grounding: String,

    pub answer: String,

    pub started_at: DateTime<Utc>,

    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

/// Result of one turn: the extended history and its report
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub history: ConversationHistory,
    pub record: TurnRecord,
}

/// Everything a finished conversation produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTranscript {
    pub session_id: Uuid,
    pub history: ConversationHistory,
    pub turns: Vec<TurnRecord>,
    pub end: ConversationEnd,
}

/// Retrieval-augmented conversation controller
pub struct ConversationLoop {
    provider: Arc<dyn CompletionProvider>,
    retriever: Retriever,
    extractor: QueryExtractor,
    composer: GroundedAnswerComposer,
    budget: MessageBudgetBuilder,
    query_settings: GenerationSettings,
    system_prompt: String,
    query_prompt: String,
    ceilings: TokenCeilings,
    max_turns: usize,
    retrieval_failure: RetrievalFailurePolicy,
}

impl ConversationLoop {
    /// Wire the loop from configuration and its collaborators.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the model's token limit is unknown
    /// or too small.
    pub fn from_config(
        config: &RagConfig,
        provider: Arc<dyn CompletionProvider>,
        search: Arc<dyn SearchService>,
        counter: Arc<dyn TokenCounter>,
    ) -> Result<Self> {
        let ceilings = config.token_ceilings()?;
        let budget = MessageBudgetBuilder::new(counter, config.openai.model_name.clone());

        Ok(Self {
            composer: GroundedAnswerComposer::new(
                provider.clone(),
                budget.clone(),
                config.chat.answer_settings(),
            ),
            provider,
            retriever: Retriever::from_config(search, &config.search),
            extractor: QueryExtractor::new(),
            budget,
            query_settings: config.chat.query_settings(),
            system_prompt: config.chat.system_prompt.clone(),
            query_prompt: config.chat.query_prompt.clone(),
            ceilings,
            max_turns: config.chat.max_turns,
            retrieval_failure: config.chat.retrieval_failure,
        })
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    pub fn with_retrieval_failure(mut self, policy: RetrievalFailurePolicy) -> Self {
        self.retrieval_failure = policy;
        self
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Empty history seeded with the answer system prompt
    pub fn initial_history(&self) -> ConversationHistory {
        ConversationHistory::new(self.system_prompt.clone())
    }

    /// Run the conversation until `max_turns` answers or input closes.
    ///
    /// # Errors
    ///
    /// Any failure other than malformed tool arguments ends the conversation
    /// and is returned; the partial history is discarded.
    pub async fn run(&self, console: &mut dyn Console) -> Result<ConversationTranscript> {
        let session_id = Uuid::new_v4();
        let mut history = self.initial_history();
        let mut turns = Vec::with_capacity(self.max_turns);
        let mut end = ConversationEnd::Completed;

        tracing::info!(
            session_id = %session_id,
            max_turns = self.max_turns,
            "Starting conversation"
        );

        for index in 1..=self.max_turns {
            let Some(input) = read_question(console)? else {
                end = ConversationEnd::InputClosed;
                break;
            };

            let span = tracing::info_span!("turn", session_id = %session_id, turn = index);
            let outcome = self
                .run_turn(index, &history, &input)
                .instrument(span)
                .await?;

            console.write_line(&format!("{}{}\n", RESPONSE_PREFIX, outcome.record.answer))?;

            history = outcome.history;
            turns.push(outcome.record);
        }

        console.write_line(FAREWELL)?;

        tracing::info!(
            session_id = %session_id,
            turns = turns.len(),
            end = ?end,
            "Conversation finished"
        );

        Ok(ConversationTranscript {
            session_id,
            history,
            turns,
            end,
        })
    }

    /// Run one turn against `history` and return the extended snapshot.
    ///
    /// # Errors
    ///
    /// Returns the first error of the query, retrieval or answer stage.
    pub async fn run_turn(
        &self,
        index: usize,
        history: &ConversationHistory,
        input: &str,
    ) -> Result<TurnOutcome> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let past_turns = history.past_turns();

        let tool = self.extractor.tool();
        let query_messages = self.budget.build(
            &self.query_prompt,
            &past_turns,
            &self.extractor.request_content(input),
            std::slice::from_ref(&tool),
            self.ceilings.query,
        )?;

        let request = CompletionRequest::new(query_messages.messages)
            .with_settings(self.query_settings)
            .with_tools(vec![tool]);
        let response = self.provider.complete(&request).await?;

        let outcome = self.extractor.classify(&response);
        let query_source = outcome.source();
        let query = outcome.into_query(input);

        tracing::info!(query = %query, source = %query_source, "Search query ready");

        let documents = match self.retriever.retrieve(&query).await {
            Ok(documents) => documents,
            Err(e) if self.retrieval_failure == RetrievalFailurePolicy::AnswerWithoutSources => {
                tracing::warn!(error = %e, "Retrieval failed, answering without sources");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let composed = self
            .composer
            .compose(
                &query,
                &documents,
                &self.system_prompt,
                &past_turns,
                self.ceilings.answer,
            )
            .await?;

        let elapsed = timer.elapsed();
        tracing::debug!(
            documents = documents.len(),
            history_included = composed.history_included,
            elapsed_ms = elapsed.as_millis() as u64,
            "Turn complete"
        );

        Ok(TurnOutcome {
            history: history.with_exchange(input, composed.answer.clone()),
            record: TurnRecord {
                index,
                input: input.to_string(),
                query,
                query_source,
                documents: documents.len(),
                grounding: composed.grounding,
                answer: composed.answer,
                started_at,
                elapsed,
            },
        })
    }
}

/// Read the next non-blank line, or `None` once input closes
pub(crate) fn read_question(console: &mut dyn Console) -> Result<Option<String>> {
    loop {
        match console.read_line(INPUT_PROMPT)? {
            None => return Ok(None),
            Some(line) if line.trim().is_empty() => continue,
            Some(line) => return Ok(Some(line)),
        }
    }
}
