//! Grounded answer composition

use std::sync::Arc;

use crate::conversation::MessageBudgetBuilder;
use crate::error::{RagError, Result};
use crate::llm::{CompletionProvider, CompletionRequest, GenerationSettings, Message};
use crate::retrieval::RetrievedDocument;

/// Result of one grounded answer call
#[derive(Debug, Clone)]
pub struct ComposedAnswer {
    pub answer: String,

    /// The user turn that carried the query and snippets
    pub grounding: String,

    /// History messages that fit alongside the grounding
    pub history_included: usize,
}

/// Frames retrieved snippets into a user turn and asks for an answer
pub struct GroundedAnswerComposer {
    provider: Arc<dyn CompletionProvider>,
    budget: MessageBudgetBuilder,
    settings: GenerationSettings,
}

impl GroundedAnswerComposer {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        budget: MessageBudgetBuilder,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            provider,
            budget,
            settings,
        }
    }

    /// `**{query}**` followed by every highlight snippet, space separated.
    ///
    /// A document with a citation name contributes `[{source}]` ahead of its
    /// snippets. Documents without snippets contribute nothing.
    pub fn grounding_content(query: &str, documents: &[RetrievedDocument]) -> String {
        let mut parts: Vec<String> = Vec::new();
        for doc in documents.iter().filter(|doc| !doc.highlights.is_empty()) {
            if let Some(source) = &doc.source {
                parts.push(format!("[{}]", source));
            }
            parts.extend(doc.highlights.iter().cloned());
        }

        if parts.is_empty() {
            format!("**{}**", query)
        } else {
            format!("**{}** {}", query, parts.join(" "))
        }
    }

    /// Ask for an answer grounded on `documents`.
    ///
    /// # Errors
    ///
    /// Returns `BudgetExceeded` if the grounding does not fit, `EmptyCompletion`
    /// if the reply has no usable text, or the provider's error.
    pub async fn compose(
        &self,
        query: &str,
        documents: &[RetrievedDocument],
        system_prompt: &str,
        history: &[Message],
        max_tokens: usize,
    ) -> Result<ComposedAnswer> {
        let grounding = Self::grounding_content(query, documents);
        let built = self
            .budget
            .build(system_prompt, history, &grounding, &[], max_tokens)?;

        tracing::debug!(
            query,
            documents = documents.len(),
            history_included = built.history_included,
            estimated_tokens = built.estimated_tokens,
            "Requesting grounded answer"
        );

        let request = CompletionRequest::new(built.messages).with_settings(self.settings);
        let response = self.provider.complete(&request).await?;

        let answer = response
            .first_text()
            .ok_or_else(|| {
                RagError::EmptyCompletion(if response.choices.is_empty() {
                    "answer response had no choices".to_string()
                } else {
                    "answer response had no content".to_string()
                })
            })?
            .to_string();

        Ok(ComposedAnswer {
            answer,
            grounding,
            history_included: built.history_included,
        })
    }
}
