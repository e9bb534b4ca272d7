//! Azure AI Search client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{HttpConfig, SearchConfig};
use crate::error::{RagError, Result};
use crate::llm::providers::azure::{build_http_client, service_error_message};
use crate::llm::retry::{with_retry, AttemptError, RetryPolicy};
use crate::retrieval::{SearchPage, SearchRequest, SearchService};

/// Client for the documents search operation of one index
pub struct AzureSearchClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    index: String,
    api_version: String,
    retry: RetryPolicy,
}

impl AzureSearchClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        index: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            index: index.into(),
            api_version: api_version.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Create from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &SearchConfig, http: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client: build_http_client(http.timeout)?,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            index: config.index.clone(),
            api_version: config.api_version.clone(),
            retry: http.retry.clone(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn search_url(&self) -> String {
        format!(
            "{}/indexes/{}/docs/search?api-version={}",
            self.endpoint.trim_end_matches('/'),
            urlencoding::encode(&self.index),
            urlencoding::encode(&self.api_version),
        )
    }

    async fn send_once(
        &self,
        url: &str,
        body: &Value,
    ) -> std::result::Result<SearchResponse, AttemptError<RagError>> {
        let response = self
            .client
            .post(url)
            .header("api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                AttemptError::Transient(RagError::Retrieval(format!(
                    "Failed to send request to Azure AI Search: {}",
                    e
                )))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let err = RagError::Retrieval(service_error_message("Azure AI Search", status, &text));
            return Err(if self.retry.is_retryable_status(status.as_u16()) {
                AttemptError::Transient(err)
            } else {
                AttemptError::Permanent(err)
            });
        }

        response.json::<SearchResponse>().await.map_err(|e| {
            AttemptError::Permanent(RagError::Retrieval(format!(
                "Failed to parse Azure AI Search response: {}",
                e
            )))
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchBody<'a> {
    search: &'a str,
    top: usize,
    query_type: &'a str,
    highlight: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    highlight_pre_tag: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    highlight_post_tag: Option<&'a str>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    value: Vec<Map<String, Value>>,
    #[serde(rename = "@search.nextPageParameters")]
    next_page_parameters: Option<Value>,
}

fn build_search_body(request: &SearchRequest) -> Result<Value> {
    let body = SearchBody {
        search: &request.query,
        top: request.top,
        query_type: &request.query_type,
        highlight: &request.highlight_field,
        highlight_pre_tag: request.highlight_pre_tag.as_deref(),
        highlight_post_tag: request.highlight_post_tag.as_deref(),
    };
    Ok(serde_json::to_value(body)?)
}

fn convert_response(response: SearchResponse) -> SearchPage {
    SearchPage {
        documents: response.value,
        next: response.next_page_parameters.filter(|next| !next.is_null()),
    }
}

#[async_trait]
impl SearchService for AzureSearchClient {
    async fn search_page(
        &self,
        request: &SearchRequest,
        continuation: Option<&Value>,
    ) -> Result<SearchPage> {
        // A continuation is the complete body for the next page
        let body = match continuation {
            Some(next) => next.clone(),
            None => build_search_body(request)?,
        };
        let url = self.search_url();

        tracing::debug!(
            index = %self.index,
            query = %request.query,
            top = request.top,
            continuation = continuation.is_some(),
            "Sending search request"
        );

        let response = with_retry(&self.retry, "search", || self.send_once(&url, &body)).await?;
        Ok(convert_response(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_search_url() {
        let client = AzureSearchClient::new(
            "https://contoso.search.windows.net/",
            "key",
            "benefits index",
            "2023-11-01",
        );
        assert_eq!(
            client.search_url(),
            "https://contoso.search.windows.net/indexes/benefits%20index/docs/search?api-version=2023-11-01"
        );
        assert_eq!(client.index(), "benefits index");
    }

    #[test]
    fn test_search_body() {
        let request = SearchRequest::new("eye exams", 2, "content");
        let body = build_search_body(&request).unwrap();

        assert_eq!(
            body,
            json!({
                "search": "eye exams",
                "top": 2,
                "queryType": "simple",
                "highlight": "content"
            })
        );
    }

    #[test]
    fn test_search_body_with_tags() {
        let request = SearchRequest::new("dental", 3, "content")
            .with_query_type("full")
            .with_highlight_tags("<b>", "</b>");
        let body = build_search_body(&request).unwrap();

        assert_eq!(body["queryType"], "full");
        assert_eq!(body["highlightPreTag"], "<b>");
        assert_eq!(body["highlightPostTag"], "</b>");
    }

    #[test]
    fn test_convert_response_with_next_page() {
        let raw: SearchResponse = serde_json::from_value(json!({
            "@odata.context": "https://contoso.search.windows.net/indexes('benefits')/$metadata",
            "value": [
                {"@search.score": 2.5, "content": "Plan details", "@search.highlights": {"content": ["<em>Plan</em> details"]}}
            ],
            "@search.nextPageParameters": {"search": "plan", "skip": 50, "top": 2}
        }))
        .unwrap();

        let page = convert_response(raw);
        assert_eq!(page.documents.len(), 1);
        assert_eq!(page.documents[0]["content"], "Plan details");
        assert_eq!(page.next, Some(json!({"search": "plan", "skip": 50, "top": 2})));
    }

    #[test]
    fn test_convert_response_last_page() {
        let raw: SearchResponse = serde_json::from_value(json!({
            "value": [],
            "@search.nextPageParameters": null
        }))
        .unwrap();

        let page = convert_response(raw);
        assert!(page.documents.is_empty());
        assert!(page.next.is_none());
    }
}
