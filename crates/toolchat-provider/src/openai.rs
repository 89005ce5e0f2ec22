use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{ContentBlock, LlmMessage, LlmProvider, LlmRequest, LlmResponse, ToolChoice};

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Chat-completions client for OpenAI and compatible endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderErrorKind {
    RateLimit,
    ServerError,
    Timeout,
    AuthError,
    InvalidRequest,
    Unknown,
}

impl ProviderErrorKind {
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            429 => Self::RateLimit,
            401 | 403 => Self::AuthError,
            400 | 422 => Self::InvalidRequest,
            500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit | Self::ServerError | Self::Timeout)
    }
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self::with_timeout(api_key, api_base, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(
        api_key: impl Into<String>,
        api_base: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub(crate) fn to_api_request(request: LlmRequest) -> ApiRequest {
        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .into_iter()
                    .map(|tool| ApiTool {
                        tool_type: "function".to_string(),
                        function: ApiFunctionDef {
                            name: tool.name,
                            description: tool.description,
                            parameters: tool.input_schema,
                        },
                    })
                    .collect::<Vec<_>>(),
            )
        };

        // tool_choice is only meaningful alongside a tool list
        let tool_choice = match (&tools, request.tool_choice) {
            (Some(_), Some(choice)) => Some(choice),
            _ => None,
        };

        ApiRequest {
            model: request.model,
            messages: to_api_messages(request.messages),
            max_tokens: Some(request.max_tokens),
            tools,
            tool_choice,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", self.api_base);
        let payload = Self::to_api_request(request);

        let resp = match self
            .client
            .post(url)
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&payload)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return Err(anyhow!(
                    "openai api error (timeout){}: request timed out after {}s",
                    retry_tag(&ProviderErrorKind::Timeout),
                    self.timeout.as_secs()
                ));
            }
            Err(e) if e.is_connect() => {
                return Err(anyhow!("openai api error (connect) [retryable]: {e}"));
            }
            Err(e) => return Err(e.into()),
        };

        let status = resp.status();
        if status != StatusCode::OK {
            let text = resp.text().await?;
            let parsed = serde_json::from_str::<ApiErrorEnvelope>(&text).ok();
            return Err(format_api_error(status, parsed));
        }

        let body: ApiResponse = resp.json().await?;
        to_llm_response(body)
    }
}

fn to_api_messages(messages: Vec<LlmMessage>) -> Vec<ApiMessage> {
    let mut result = Vec::new();

    for message in messages {
        let text = message.text_content();
        let tool_uses: Vec<ApiToolCall> = message
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some(ApiToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: ApiToolFunctionCall {
                        name: name.clone(),
                        arguments: match input {
                            serde_json::Value::String(raw) => raw.clone(),
                            other => other.to_string(),
                        },
                    },
                }),
                _ => None,
            })
            .collect();

        if !text.is_empty() || !tool_uses.is_empty() {
            result.push(ApiMessage {
                role: message.role.clone(),
                content: if text.is_empty() { None } else { Some(text) },
                name: None,
                tool_calls: if tool_uses.is_empty() {
                    None
                } else {
                    Some(tool_uses)
                },
                tool_call_id: None,
            });
        }

        for block in message.content {
            if let ContentBlock::ToolResult {
                tool_use_id,
                name,
                content,
                ..
            } = block
            {
                result.push(ApiMessage {
                    role: "tool".to_string(),
                    content: Some(content),
                    name,
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id),
                });
            }
        }
    }

    result
}

fn to_llm_response(body: ApiResponse) -> Result<LlmResponse> {
    let choice = body
        .choices
        .first()
        .ok_or_else(|| anyhow!("openai api error: empty choices"))?;
    let message = &choice.message;

    let mut content = Vec::new();

    if let Some(text) = &message.content {
        if !text.is_empty() {
            content.push(ContentBlock::Text { text: text.clone() });
        }
    }

    if let Some(tool_calls) = &message.tool_calls {
        for call in tool_calls {
            // unparseable arguments are kept verbatim as a JSON string
            let input = match serde_json::from_str::<serde_json::Value>(&call.function.arguments) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(
                        tool = %call.function.name,
                        "tool call arguments are not valid json: {e}"
                    );
                    serde_json::Value::String(call.function.arguments.clone())
                }
            };
            content.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.function.name.clone(),
                input,
            });
        }
    }

    let text = message.content.clone().unwrap_or_default();

    Ok(LlmResponse {
        text,
        content,
        input_tokens: body.usage.as_ref().map(|u| u.prompt_tokens),
        output_tokens: body.usage.as_ref().map(|u| u.completion_tokens),
    })
}

fn retry_tag(kind: &ProviderErrorKind) -> &'static str {
    if kind.is_retryable() {
        " [retryable]"
    } else {
        ""
    }
}

fn format_api_error(status: StatusCode, parsed: Option<ApiErrorEnvelope>) -> anyhow::Error {
    let retryable = retry_tag(&ProviderErrorKind::from_status(status));
    if let Some(api_error) = parsed {
        anyhow!(
            "openai api error ({status}){retryable}: {} ({})",
            api_error.error.message,
            api_error.error.r#type
        )
    } else {
        anyhow!("openai api error ({status}){retryable}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiRequest {
    pub model: String,
    pub messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ApiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiTool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: ApiFunctionDef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiFunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiResponse {
    pub choices: Vec<ApiChoice>,
    #[serde(default)]
    pub usage: Option<ApiUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiChoice {
    pub message: ApiAssistantMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiAssistantMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: ApiToolFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiToolFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiErrorEnvelope {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(rename = "type", default)]
    pub r#type: String,
    pub message: String,
}
