//! Scripted collaborators for deterministic runs
//!
//! Stand-ins for the completion service, the search index and the console
//! that return predetermined values and record every call.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::console::Console;
use crate::error::{RagError, Result};
use crate::llm::{
    CompletionChoice, CompletionProvider, CompletionRequest, CompletionResponse, ModelInfo,
};
use crate::retrieval::{SearchPage, SearchRequest, SearchService};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One scripted completion result
#[derive(Debug, Clone)]
pub enum StubReply {
    Response(CompletionResponse),
    Error(String),
}

/// Completion provider that replays a script of replies.
///
/// Replies are returned in order; the last one repeats once the script runs out.
pub struct ScriptedCompletionProvider {
    replies: Vec<StubReply>,
    call_count: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletionProvider {
    pub fn new(responses: Vec<CompletionResponse>) -> Self {
        Self::from_replies(responses.into_iter().map(StubReply::Response).collect())
    }

    pub fn from_replies(replies: Vec<StubReply>) -> Self {
        Self {
            replies,
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// One plain-text reply per entry
    pub fn with_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            texts
                .into_iter()
                .map(|t| CompletionResponse::from_choice(CompletionChoice::text(t)))
                .collect(),
        )
    }

    /// Append a reply
    pub fn then(mut self, response: CompletionResponse) -> Self {
        self.replies.push(StubReply::Response(response));
        self
    }

    /// Append a failing reply
    pub fn then_error(mut self, message: impl Into<String>) -> Self {
        self.replies.push(StubReply::Error(message.into()));
        self
    }

    /// Get the number of completion calls made
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Requests received so far, in call order
    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompletionProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let call_num = self.call_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request.clone());

        let reply = self
            .replies
            .get(call_num)
            .or_else(|| self.replies.last())
            .cloned()
            .ok_or_else(|| RagError::Completion("no scripted replies".to_string()))?;

        match reply {
            StubReply::Response(response) => Ok(response),
            StubReply::Error(message) => Err(RagError::Completion(message)),
        }
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "stub".to_string(),
            model_name: "scripted".to_string(),
        }
    }
}

/// Search service over a fixed list of pages.
///
/// Every search returns the same pages, chained with `{"page": n}`
/// continuations.
pub struct StaticSearchService {
    pages: Vec<Vec<Map<String, Value>>>,
    failure: Option<String>,
    call_count: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl StaticSearchService {
    pub fn new(pages: Vec<Vec<Map<String, Value>>>) -> Self {
        Self {
            pages,
            failure: None,
            call_count: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// A single page of documents
    pub fn with_documents(documents: Vec<Map<String, Value>>) -> Self {
        Self::new(vec![documents])
    }

    /// A single page with one document per entry, carrying these `content` highlights
    pub fn with_highlights(documents: &[&[&str]]) -> Self {
        Self::with_documents(
            documents
                .iter()
                .enumerate()
                .map(|(i, highlights)| document(&format!("document {}", i + 1), highlights))
                .collect(),
        )
    }

    /// Every search fails with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        let mut service = Self::new(Vec::new());
        service.failure = Some(message.into());
        service
    }

    /// Page requests made, including continuations
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Queries searched, one per search (continuations excluded)
    pub fn queries(&self) -> Vec<String> {
        lock(&self.queries).clone()
    }
}

/// Raw search document with `content`, a score and `content` highlights
pub fn document(content: &str, highlights: &[&str]) -> Map<String, Value> {
    let value = json!({
        "content": content,
        "@search.score": 1.0,
        "@search.highlights": {"content": highlights},
    });
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[async_trait]
impl SearchService for StaticSearchService {
    async fn search_page(
        &self,
        request: &SearchRequest,
        continuation: Option<&Value>,
    ) -> Result<SearchPage> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if continuation.is_none() {
            lock(&self.queries).push(request.query.clone());
        }

        if let Some(message) = &self.failure {
            return Err(RagError::Retrieval(message.clone()));
        }

        let index = continuation
            .and_then(|c| c.get("page"))
            .and_then(Value::as_u64)
            .map_or(0, |n| n as usize);

        let documents = self.pages.get(index).cloned().unwrap_or_default();
        let next = (index + 1 < self.pages.len()).then(|| json!({"page": index + 1}));

        Ok(SearchPage { documents, next })
    }
}

/// Console fed from a fixed list of input lines
#[derive(Debug, Default)]
pub struct ScriptedConsole {
    input: VecDeque<String>,
    prompts: usize,
    output: Vec<String>,
}

impl ScriptedConsole {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            input: lines.into_iter().map(Into::into).collect(),
            prompts: 0,
            output: Vec::new(),
        }
    }

    /// Lines written so far
    pub fn output(&self) -> Vec<String> {
        self.output.clone()
    }

    /// Number of times input was requested
    pub fn prompts(&self) -> usize {
        self.prompts
    }
}

impl Console for ScriptedConsole {
    fn read_line(&mut self, _prompt: &str) -> Result<Option<String>> {
        self.prompts += 1;
        Ok(self.input.pop_front())
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        self.output.push(line.to_string());
        Ok(())
    }
}
