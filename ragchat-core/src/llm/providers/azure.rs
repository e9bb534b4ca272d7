//! Azure OpenAI chat-completions provider

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::config::{HttpConfig, OpenAIConfig};
use crate::error::{RagError, Result};
use crate::llm::retry::{with_retry, AttemptError, RetryPolicy};
use crate::llm::{
    CompletionChoice, CompletionProvider, CompletionRequest, CompletionResponse, Message,
    ModelInfo, TokenUsage, ToolInvocation,
};

/// Azure OpenAI provider addressing a single model deployment.
pub struct AzureOpenAIProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    deployment: String,
    api_version: String,
    model_name: String,
    retry: RetryPolicy,
}

impl AzureOpenAIProvider {
    /// Create a new provider.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Resource endpoint, e.g. `https://my-resource.openai.azure.com`
    /// * `api_key` - Resource key, sent as the `api-key` header
    /// * `deployment` - Deployment name the requests are routed to
    /// * `api_version` - Value of the `api-version` query parameter
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        deployment: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        let deployment = deployment.into();
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model_name: deployment.clone(),
            deployment,
            api_version: api_version.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Create from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &OpenAIConfig, http: &HttpConfig) -> Result<Self> {
        let client = build_http_client(http.timeout)?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            deployment: config.deployment.clone(),
            api_version: config.api_version.clone(),
            model_name: config.model_name.clone(),
            retry: http.retry.clone(),
        })
    }

    /// Name reported by `model_info` and used for token estimation
    pub fn with_model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = model_name.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn deployment(&self) -> &str {
        &self.deployment
    }

    /// Full URL of the chat-completions operation for this deployment
    pub fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint.trim_end_matches('/'),
            urlencoding::encode(&self.deployment),
            urlencoding::encode(&self.api_version),
        )
    }

    async fn send_once(
        &self,
        url: &str,
        body: &Value,
    ) -> std::result::Result<ChatResponse, AttemptError<RagError>> {
        let response = self
            .client
            .post(url)
            .header("api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                AttemptError::Transient(RagError::Completion(format!(
                    "Failed to send request to Azure OpenAI: {}",
                    e
                )))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let err = RagError::Completion(service_error_message("Azure OpenAI", status, &text));
            return Err(if self.retry.is_retryable_status(status.as_u16()) {
                AttemptError::Transient(err)
            } else {
                AttemptError::Permanent(err)
            });
        }

        response.json::<ChatResponse>().await.map_err(|e| {
            AttemptError::Permanent(RagError::Completion(format!(
                "Failed to parse Azure OpenAI response: {}",
                e
            )))
        })
    }
}

pub(crate) fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RagError::Configuration(format!("Failed to build HTTP client: {}", e)))
}

/// Human-readable message for a failed Azure REST call
pub(crate) fn service_error_message(service: &str, status: StatusCode, body: &str) -> String {
    if let Ok(error) = serde_json::from_str::<ServiceError>(body) {
        return format!(
            "{} error ({}): {}",
            service,
            error.error.code.unwrap_or_else(|| status.to_string()),
            error.error.message
        );
    }
    format!("{} error ({}): {}", service, status, body)
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    n: usize,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: Option<WireResponseMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    function: Option<WireFunction>,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct ServiceError {
    error: ServiceErrorDetail,
}

#[derive(Deserialize)]
struct ServiceErrorDetail {
    code: Option<String>,
    message: String,
}

fn convert_messages(messages: &[Message]) -> Vec<WireMessage<'_>> {
    messages
        .iter()
        .map(|m| WireMessage {
            role: m.role.as_str(),
            content: &m.content,
        })
        .collect()
}

fn build_request_body(request: &CompletionRequest) -> Result<Value> {
    let chat_request = ChatRequest {
        messages: convert_messages(&request.messages),
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        tools: request.tools.iter().map(|t| t.to_function_json()).collect(),
        n: request.n.max(1),
    };

    let mut body = serde_json::to_value(chat_request)?;
    if let (Some(extensions), Some(object)) = (&request.extensions, body.as_object_mut()) {
        for (key, value) in extensions {
            object.insert(key.clone(), value.clone());
        }
    }
    Ok(body)
}

fn convert_response(response: ChatResponse) -> CompletionResponse {
    let choices = response
        .choices
        .into_iter()
        .map(|choice| {
            let (content, tool_calls) = match choice.message {
                Some(message) => {
                    let calls = message
                        .tool_calls
                        .into_iter()
                        .filter(|call| call.kind.as_deref().is_none_or(|k| k == "function"))
                        .filter_map(|call| {
                            call.function.map(|f| ToolInvocation {
                                id: call.id,
                                name: f.name,
                                arguments: f.arguments,
                            })
                        })
                        .collect();
                    (message.content, calls)
                }
                None => (None, Vec::new()),
            };

            CompletionChoice {
                content,
                tool_calls,
                finish_reason: choice.finish_reason,
            }
        })
        .collect();

    CompletionResponse {
        choices,
        usage: response.usage,
    }
}

#[async_trait]
impl CompletionProvider for AzureOpenAIProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let body = build_request_body(request)?;
        let url = self.completions_url();

        tracing::debug!(
            deployment = %self.deployment,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending chat completion request"
        );

        let response =
            with_retry(&self.retry, "chat_completions", || self.send_once(&url, &body)).await?;
        let response = convert_response(response);

        if let Some(usage) = response.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Chat completion finished"
            );
        }

        Ok(response)
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "azure-openai".to_string(),
            model_name: self.model_name.clone(),
        }
    }
}
