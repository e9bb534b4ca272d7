use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RagError, Result};

/// Sampling settings for a single completion call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    /// Temperature for generation (0.0-2.0)
    pub temperature: f32,

    /// Maximum tokens to generate
    pub max_tokens: usize,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 1000,
        }
    }
}

impl GenerationSettings {
    pub fn new(temperature: f32, max_tokens: usize) -> Self {
        Self::default()
            .with_temperature(temperature)
            .with_max_tokens(max_tokens)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    pub fn with_max_tokens(mut self, tokens: usize) -> Self {
        self.max_tokens = tokens;
        self
    }
}

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// A single role-tagged turn of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// A function the model may ask the caller to invoke
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    /// Function name
    pub name: String,

    /// What the function does, shown to the model
    pub description: String,

    /// JSON Schema for the function arguments
    pub parameters: Value,
}

impl ToolDeclaration {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Wire shape used by chat-completions endpoints
    pub fn to_function_json(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// A structured call the model attached to its response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: Option<String>,

    /// Name of the function being called
    pub name: String,

    /// JSON-encoded argument mapping, exactly as returned by the service
    pub arguments: String,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Decode the argument mapping.
    ///
    /// # Errors
    ///
    /// Returns `RagError::ToolArgumentParse` if the arguments are not valid JSON.
    pub fn parse_arguments(&self) -> Result<Value> {
        serde_json::from_str(&self.arguments).map_err(|source| RagError::ToolArgumentParse {
            function: self.name.clone(),
            source,
        })
    }
}

/// Request to a completion provider
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Messages in the conversation
    pub messages: Vec<Message>,

    /// Temperature for generation (0.0-2.0)
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    pub max_tokens: Option<usize>,

    /// Functions the model may call
    pub tools: Vec<ToolDeclaration>,

    /// Number of choices to generate
    pub n: usize,

    /// Extra top-level fields merged into the request body
    pub extensions: Option<Map<String, Value>>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            temperature: None,
            max_tokens: None,
            tools: Vec::new(),
            n: 1,
            extensions: None,
        }
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.temperature = Some(settings.temperature);
        self.max_tokens = Some(settings.max_tokens);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDeclaration>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }
}

/// One generated alternative
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionChoice {
    /// Free-text content (may be absent when the model only called tools)
    pub content: Option<String>,

    /// Tool invocations, in the order returned
    pub tool_calls: Vec<ToolInvocation>,

    pub finish_reason: Option<String>,
}

impl CompletionChoice {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn with_tool_call(mut self, call: ToolInvocation) -> Self {
        self.tool_calls.push(call);
        self
    }
}

/// Response from a completion provider
#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    pub choices: Vec<CompletionChoice>,

    /// Token usage information
    pub usage: Option<TokenUsage>,
}

impl CompletionResponse {
    pub fn from_choice(choice: CompletionChoice) -> Self {
        Self {
            choices: vec![choice],
            usage: None,
        }
    }

    pub fn first_choice(&self) -> Option<&CompletionChoice> {
        self.choices.first()
    }

    /// Non-blank content of the first choice
    pub fn first_text(&self) -> Option<&str> {
        self.first_choice()
            .and_then(|c| c.content.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Model information
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub provider: String,
    pub model_name: String,
}

/// Chat-completion service consumed by the pipeline.
///
/// Implementors perform the network call; timeouts and retries are their concern.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Generate choices for the given request.
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse>;

    /// Get model information
    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "unknown".to_string(),
            model_name: "unknown".to_string(),
        }
    }
}

pub mod providers;
pub mod retry;
pub mod tokens;

pub use retry::RetryPolicy;
pub use tokens::{model_token_limit, HeuristicTokenCounter, TokenCounter};
