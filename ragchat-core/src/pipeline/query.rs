//! Search-query extraction
//!
//! The model is asked to call `search_sources` with a `search_query`
//! argument. Its answer is decided once into a `QueryOutcome`: a usable tool
//! argument wins, then usable free text, then the user's raw input.

use serde_json::{Value, json};

use crate::llm::{CompletionResponse, ToolDeclaration};

/// Function the model is asked to call
pub const SEARCH_FUNCTION_NAME: &str = "search_sources";

/// Argument carrying the generated query
pub const SEARCH_QUERY_ARGUMENT: &str = "search_query";

/// What the model returns when it cannot produce a query
pub const NO_QUERY_SENTINEL: &str = "0";

/// Prefix of the user turn sent for query generation
pub const QUERY_REQUEST_PREFIX: &str = "Generate search query for: ";

/// Where the effective search query came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    /// From the arguments of a `search_sources` call
    ToolQuery(String),

    /// From the free-text content of the response
    TextQuery(String),

    /// The model produced nothing usable
    NoQuery,
}

impl QueryOutcome {
    /// Effective query, falling back to `raw_input` unchanged
    pub fn into_query(self, raw_input: &str) -> String {
        match self {
            QueryOutcome::ToolQuery(query) | QueryOutcome::TextQuery(query) => query,
            QueryOutcome::NoQuery => raw_input.to_string(),
        }
    }

    /// Short label for logs and turn records
    pub fn source(&self) -> QuerySource {
        match self {
            QueryOutcome::ToolQuery(_) => QuerySource::Tool,
            QueryOutcome::TextQuery(_) => QuerySource::Text,
            QueryOutcome::NoQuery => QuerySource::RawInput,
        }
    }
}

/// Which extraction branch produced a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuerySource {
    Tool,
    Text,
    RawInput,
}

impl std::fmt::Display for QuerySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            QuerySource::Tool => "tool",
            QuerySource::Text => "text",
            QuerySource::RawInput => "raw_input",
        };
        f.write_str(label)
    }
}

/// Turns a query-generation response into a search query
#[derive(Debug, Clone)]
pub struct QueryExtractor {
    function_name: String,
}

impl Default for QueryExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryExtractor {
    pub fn new() -> Self {
        Self {
            function_name: SEARCH_FUNCTION_NAME.to_string(),
        }
    }

    /// Expect calls to a differently named function
    pub fn with_function_name(mut self, name: impl Into<String>) -> Self {
        self.function_name = name.into();
        self
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    /// Declaration of the query-producing function
    pub fn tool(&self) -> ToolDeclaration {
        ToolDeclaration::new(
            self.function_name.clone(),
            "Retrieve sources from the Azure AI Search index",
            json!({
                "type": "object",
                "properties": {
                    SEARCH_QUERY_ARGUMENT: {
                        "type": "string",
                        "description": "Query string to retrieve documents from azure search using simple query search eg: 'Health care plan'"
                    }
                },
                "required": [SEARCH_QUERY_ARGUMENT]
            }),
        )
    }

    /// User turn sent to ask for a search query
    pub fn request_content(&self, user_input: &str) -> String {
        format!("{}{}", QUERY_REQUEST_PREFIX, user_input)
    }

    /// Decide the outcome from the first choice of `response`
    pub fn classify(&self, response: &CompletionResponse) -> QueryOutcome {
        let Some(choice) = response.first_choice() else {
            return QueryOutcome::NoQuery;
        };

        for call in choice
            .tool_calls
            .iter()
            .filter(|call| call.name == self.function_name)
        {
            match call.parse_arguments() {
                Ok(arguments) => {
                    if let Some(query) = arguments.get(SEARCH_QUERY_ARGUMENT).and_then(usable_argument) {
                        return QueryOutcome::ToolQuery(query);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        function = %call.name,
                        error = %e,
                        "Ignoring tool call with malformed arguments"
                    );
                }
            }
        }

        match choice.content.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() && text != NO_QUERY_SENTINEL => {
                QueryOutcome::TextQuery(text.to_string())
            }
            _ => QueryOutcome::NoQuery,
        }
    }

    /// Effective query for `response`, falling back to `raw_input`
    pub fn extract(&self, response: &CompletionResponse, raw_input: &str) -> String {
        self.classify(response).into_query(raw_input)
    }
}

/// A `search_query` value that is present, non-empty and not the sentinel.
///
/// Strings are checked trimmed but returned as the model wrote them.
fn usable_argument(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty() && trimmed != NO_QUERY_SENTINEL).then(|| s.clone())
        }
        Value::Number(n) => (n.as_f64() != Some(0.0)).then(|| n.to_string()),
        _ => None,
    }
}
