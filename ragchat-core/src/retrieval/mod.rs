//! Document retrieval
//!
//! One bounded search per turn. The `SearchService` trait is the seam to the
//! hosted index; `Retriever` drains continuation pages and normalizes raw
//! documents into `RetrievedDocument`s.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::config::SearchConfig;
use crate::error::{RagError, Result};

pub mod azure;

pub use azure::AzureSearchClient;

/// Field carrying the relevance score in a raw search document
pub const SCORE_FIELD: &str = "@search.score";

/// Field carrying highlight snippets keyed by field name
pub const HIGHLIGHTS_FIELD: &str = "@search.highlights";

/// Field carrying the document body
pub const CONTENT_FIELD: &str = "content";

/// A search result reduced to what grounding needs
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub content: Option<String>,

    /// Higher is more relevant
    pub score: Option<f64>,

    /// Highlight snippets for the configured field, in service order
    pub highlights: Vec<String>,

    /// Citation name, when the index exposes one
    pub source: Option<String>,
}

impl RetrievedDocument {
    /// Normalize a raw search document.
    ///
    /// Missing or mistyped fields degrade to `None` or an empty list.
    pub fn from_raw(
        raw: &Map<String, Value>,
        highlight_field: &str,
        citation_field: Option<&str>,
    ) -> Self {
        let highlights = raw
            .get(HIGHLIGHTS_FIELD)
            .and_then(|h| h.get(highlight_field))
            .and_then(Value::as_array)
            .map(|snippets| {
                snippets
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            content: raw.get(CONTENT_FIELD).and_then(Value::as_str).map(str::to_string),
            score: raw.get(SCORE_FIELD).and_then(Value::as_f64),
            highlights,
            source: citation_field
                .and_then(|field| raw.get(field))
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

/// Parameters of one search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub top: usize,
    pub query_type: String,
    pub highlight_field: String,
    pub highlight_pre_tag: Option<String>,
    pub highlight_post_tag: Option<String>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, top: usize, highlight_field: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top,
            query_type: "simple".to_string(),
            highlight_field: highlight_field.into(),
            highlight_pre_tag: None,
            highlight_post_tag: None,
        }
    }

    pub fn with_query_type(mut self, query_type: impl Into<String>) -> Self {
        self.query_type = query_type.into();
        self
    }

    /// Wrap highlighted terms in the given tags
    pub fn with_highlight_tags(mut self, pre: impl Into<String>, post: impl Into<String>) -> Self {
        self.highlight_pre_tag = Some(pre.into());
        self.highlight_post_tag = Some(post.into());
        self
    }
}

/// One page of raw results
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub documents: Vec<Map<String, Value>>,

    /// Opaque continuation for the next page, if any
    pub next: Option<Value>,
}

/// Search index service
#[async_trait]
pub trait SearchService: Send + Sync {
    /// Fetch the first page, or the page named by `continuation`
    async fn search_page(
        &self,
        request: &SearchRequest,
        continuation: Option<&Value>,
    ) -> Result<SearchPage>;
}

/// Runs bounded searches against a `SearchService`
#[derive(Clone)]
pub struct Retriever {
    service: Arc<dyn SearchService>,
    top: usize,
    query_type: String,
    highlight_field: String,
    highlight_tags: Option<(String, String)>,
    citation_field: Option<String>,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("top", &self.top)
            .field("query_type", &self.query_type)
            .field("highlight_field", &self.highlight_field)
            .field("highlight_tags", &self.highlight_tags)
            .field("citation_field", &self.citation_field)
            .finish_non_exhaustive()
    }
}

impl Retriever {
    pub fn new(service: Arc<dyn SearchService>, top: usize, highlight_field: impl Into<String>) -> Self {
        Self {
            service,
            top: top.max(1),
            query_type: "simple".to_string(),
            highlight_field: highlight_field.into(),
            highlight_tags: None,
            citation_field: None,
        }
    }

    pub fn from_config(service: Arc<dyn SearchService>, config: &SearchConfig) -> Self {
        let retriever = Self::new(service, config.top, config.highlight_field.clone())
            .with_query_type(config.query_type.clone())
            .with_citation_field(config.citation_field.clone());

        match (&config.highlight_pre_tag, &config.highlight_post_tag) {
            (Some(pre), Some(post)) => retriever.with_highlight_tags(pre.clone(), post.clone()),
            _ => retriever,
        }
    }

    pub fn with_query_type(mut self, query_type: impl Into<String>) -> Self {
        self.query_type = query_type.into();
        self
    }

    /// Ask the service to wrap highlighted terms in these tags
    pub fn with_highlight_tags(mut self, pre: impl Into<String>, post: impl Into<String>) -> Self {
        self.highlight_tags = Some((pre.into(), post.into()));
        self
    }

    pub fn with_citation_field(mut self, field: Option<String>) -> Self {
        self.citation_field = field;
        self
    }

    pub fn top(&self) -> usize {
        self.top
    }

    /// Search for `query`, returning at most `top` documents in rank order.
    ///
    /// # Errors
    ///
    /// Returns `Retrieval` if any page request fails.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedDocument>> {
        let mut request = SearchRequest::new(query, self.top, self.highlight_field.clone())
            .with_query_type(self.query_type.clone());
        if let Some((pre, post)) = &self.highlight_tags {
            request = request.with_highlight_tags(pre.clone(), post.clone());
        }

        let mut documents = Vec::with_capacity(self.top);
        let mut continuation: Option<Value> = None;
        let mut pages = 0usize;

        loop {
            let page = self
                .service
                .search_page(&request, continuation.as_ref())
                .await
                .map_err(|e| match e {
                    RagError::Retrieval(_) => e,
                    other => RagError::Retrieval(other.to_string()),
                })?;
            pages += 1;

            let page_was_empty = page.documents.is_empty();
            for raw in &page.documents {
                if documents.len() >= self.top {
                    break;
                }
                documents.push(RetrievedDocument::from_raw(
                    raw,
                    &self.highlight_field,
                    self.citation_field.as_deref(),
                ));
            }

            match page.next {
                Some(next) if documents.len() < self.top && !page_was_empty => {
                    continuation = Some(next);
                }
                _ => break,
            }
        }

        tracing::debug!(
            query,
            documents = documents.len(),
            pages,
            "Retrieved documents"
        );

        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct PagedService {
        pages: Vec<SearchPage>,
        continuations: Mutex<Vec<Option<Value>>>,
    }

    #[async_trait]
    impl SearchService for PagedService {
        async fn search_page(
            &self,
            _request: &SearchRequest,
            continuation: Option<&Value>,
        ) -> Result<SearchPage> {
            let mut seen = self.continuations.lock().unwrap();
            let index = seen.len();
            seen.push(continuation.cloned());
            Ok(self.pages.get(index).cloned().unwrap_or_default())
        }
    }

    struct FailingService;

    #[derive(Default)]
    struct RecordingService {
        requests: Mutex<Vec<SearchRequest>>,
    }

    #[async_trait]
    impl SearchService for RecordingService {
        async fn search_page(&self, request: &SearchRequest, _: Option<&Value>) -> Result<SearchPage> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(SearchPage::default())
        }
    }

    #[async_trait]
    impl SearchService for FailingService {
        async fn search_page(&self, _: &SearchRequest, _: Option<&Value>) -> Result<SearchPage> {
            Err(RagError::Io(std::io::Error::other("connection reset")))
        }
    }

    fn raw(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn doc(n: usize) -> Map<String, Value> {
        raw(json!({
            "content": format!("document {}", n),
            "@search.score": 10.0 - n as f64,
            "@search.highlights": {"content": [format!("snippet {}a", n), format!("snippet {}b", n)]}
        }))
    }

    #[test]
    fn test_normalize_full_document() {
        let document = RetrievedDocument::from_raw(
            &raw(json!({
                "content": "Eye exams are covered annually.",
                "@search.score": 3.25,
                "@search.highlights": {"content": ["<em>Eye</em> exams"]},
                "metadata_storage_name": "benefits.pdf"
            })),
            "content",
            Some("metadata_storage_name"),
        );

        assert_eq!(document.content.as_deref(), Some("Eye exams are covered annually."));
        assert_eq!(document.score, Some(3.25));
        assert_eq!(document.highlights, vec!["<em>Eye</em> exams"]);
        assert_eq!(document.source.as_deref(), Some("benefits.pdf"));
    }

    #[test]
    fn test_normalize_missing_fields() {
        let document = RetrievedDocument::from_raw(&raw(json!({"id": "1"})), "content", None);
        assert_eq!(document, RetrievedDocument::default());

        let other_field = RetrievedDocument::from_raw(
            &raw(json!({"@search.highlights": {"title": ["t"]}, "@search.score": "high"})),
            "content",
            None,
        );
        assert!(other_field.highlights.is_empty());
        assert_eq!(other_field.score, None);
    }

    #[tokio::test]
    async fn test_drains_pages_until_limit() {
        let service = Arc::new(PagedService {
            pages: vec![
                SearchPage {
                    documents: vec![doc(1)],
                    next: Some(json!({"skip": 1})),
                },
                SearchPage {
                    documents: vec![doc(2), doc(3)],
                    next: Some(json!({"skip": 3})),
                },
            ],
            continuations: Mutex::new(Vec::new()),
        });

        let retriever = Retriever::new(service.clone(), 2, "content");
        let documents = retriever.retrieve("eye exams").await.unwrap();

        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].content.as_deref(), Some("document 1"));
        assert_eq!(documents[1].highlights, vec!["snippet 2a", "snippet 2b"]);

        let seen = service.continuations.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], None);
        assert_eq!(seen[1], Some(json!({"skip": 1})));
    }

    #[tokio::test]
    async fn test_stops_when_no_continuation() {
        let service = Arc::new(PagedService {
            pages: vec![SearchPage {
                documents: vec![doc(1)],
                next: None,
            }],
            continuations: Mutex::new(Vec::new()),
        });

        let retriever = Retriever::new(service.clone(), 5, "content");
        let documents = retriever.retrieve("anything").await.unwrap();

        assert_eq!(documents.len(), 1);
        assert_eq!(service.continuations.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_page_with_continuation_stops() {
        let service = Arc::new(PagedService {
            pages: vec![SearchPage {
                documents: vec![],
                next: Some(json!({"skip": 0})),
            }],
            continuations: Mutex::new(Vec::new()),
        });

        let documents = Retriever::new(service, 2, "content")
            .retrieve("nothing")
            .await
            .unwrap();
        assert!(documents.is_empty());
    }

    #[tokio::test]
    async fn test_failures_become_retrieval_errors() {
        let retriever = Retriever::new(Arc::new(FailingService), 2, "content");
        let err = retriever.retrieve("q").await.unwrap_err();

        assert!(matches!(err, RagError::Retrieval(_)));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_from_config() {
        let mut config = SearchConfig::default();
        config.top = 4;
        config.citation_field = Some("title".into());

        let retriever = Retriever::from_config(Arc::new(FailingService), &config);
        assert_eq!(retriever.top(), 4);
        assert_eq!(retriever.citation_field.as_deref(), Some("title"));
        assert_eq!(retriever.highlight_tags, None);
    }

    #[tokio::test]
    async fn test_configured_highlight_tags_reach_request() {
        let mut config = SearchConfig::default();
        config.query_type = "full".into();
        config.highlight_pre_tag = Some("<b>".into());
        config.highlight_post_tag = Some("</b>".into());

        let service = Arc::new(RecordingService::default());
        Retriever::from_config(service.clone(), &config)
            .retrieve("eye exams")
            .await
            .unwrap();

        let requests = service.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].query_type, "full");
        assert_eq!(requests[0].highlight_pre_tag.as_deref(), Some("<b>"));
        assert_eq!(requests[0].highlight_post_tag.as_deref(), Some("</b>"));
    }
}
