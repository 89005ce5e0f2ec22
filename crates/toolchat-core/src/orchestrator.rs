use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use toolchat_history::{HistoryManager, MessageRole, Metadata};
use toolchat_provider::{LlmProvider, LlmRequest, LlmResponse, ToolCall, ToolChoice};

use crate::config::OrchestratorConfig;
use crate::tool::{ToolArgs, ToolRegistry};
use crate::transcript;
use crate::usage::{NoOpUsageTracker, UsageEvent, UsageTracker};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an AI assistant that helps users manage projects. \
Your task is to understand the user's intent and call the appropriate function to handle their request.";

pub const APOLOGY_REPLY: &str =
    "I encountered an error while processing your request. Please try again.";
pub const NO_TOOL_FALLBACK_REPLY: &str = "I'm not sure how to help with that.";
pub const REPLY_ERROR_REPLY: &str = "I encountered an error while generating a response.";
pub const EMPTY_REPLY: &str = "I processed your request.";

const TOOL_SELECTION_REQUEST: &str = "tool_selection";
const REPLY_REQUEST: &str = "reply";

/// Result of one handled user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub conversation_id: String,
    pub reply: String,
}

/// Per-call outcome handed to the reply call.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolOutcome {
    Success { tool: String, data: Value },
    Error { tool: String, error: String, args: Value },
}

/// Drives one user turn: tool selection, tool execution, reply synthesis.
pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    history: Arc<HistoryManager>,
    tools: Arc<ToolRegistry>,
    usage: Arc<dyn UsageTracker>,
    model: String,
    max_tokens: u32,
    reply_max_tokens: u32,
    system_prompt: String,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        history: Arc<HistoryManager>,
        tools: Arc<ToolRegistry>,
        model: impl Into<String>,
    ) -> Self {
        let defaults = OrchestratorConfig::default();
        Self {
            provider,
            history,
            tools,
            usage: Arc::new(NoOpUsageTracker),
            model: model.into(),
            max_tokens: defaults.max_tokens,
            reply_max_tokens: defaults.reply_max_tokens,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_config(mut self, config: &OrchestratorConfig) -> Self {
        self.max_tokens = config.max_tokens;
        self.reply_max_tokens = config.reply_max_tokens;
        if let Some(prompt) = &config.system_prompt {
            self.system_prompt = prompt.clone();
        }
        self
    }

    pub fn with_usage_tracker(mut self, usage: Arc<dyn UsageTracker>) -> Self {
        self.usage = usage;
        self
    }

    pub fn history(&self) -> &Arc<HistoryManager> {
        &self.history
    }

    /// Create a conversation seeded with the system prompt.
    pub async fn start_conversation(&self, user_id: &str, metadata: Option<Metadata>) -> String {
        let id = self.history.create_conversation(user_id, metadata).await;
        self.history
            .add_message(&id, MessageRole::System, self.system_prompt.clone(), None)
            .await;
        id
    }

    /// Reply text only; see [`Orchestrator::handle_message`].
    pub async fn process_message(
        &self,
        text: &str,
        user_id: &str,
        conversation_id: Option<&str>,
    ) -> String {
        self.handle_message(text, user_id, conversation_id)
            .await
            .reply
    }

    /// Handle one user message. Never fails: errors become a fixed apology.
    ///
    /// A missing or unknown `conversation_id` starts a new conversation; the
    /// id actually used is returned so callers can carry it to the next turn.
    pub async fn handle_message(
        &self,
        text: &str,
        user_id: &str,
        conversation_id: Option<&str>,
    ) -> Turn {
        tracing::info!(user_id, "processing message");
        let conversation_id = self.resolve_conversation(user_id, conversation_id).await;

        let reply = match self.run_turn(&conversation_id, user_id, text).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(
                    conversation_id = %conversation_id,
                    "error processing message: {e:?}"
                );
                APOLOGY_REPLY.to_string()
            }
        };

        Turn {
            conversation_id,
            reply,
        }
    }

    async fn resolve_conversation(&self, user_id: &str, conversation_id: Option<&str>) -> String {
        if let Some(id) = conversation_id {
            if self.history.get_conversation(id).await.is_some() {
                return id.to_string();
            }
            tracing::warn!(conversation_id = id, "unknown conversation, starting a new one");
        }
        self.start_conversation(user_id, None).await
    }

    async fn run_turn(&self, conversation_id: &str, user_id: &str, text: &str) -> Result<String> {
        self.history
            .add_message(conversation_id, MessageRole::User, text, None)
            .await;

        let request = LlmRequest {
            model: self.model.clone(),
            messages: self.transcript(conversation_id).await,
            max_tokens: self.max_tokens,
            tools: self.tools.tool_defs(),
            tool_choice: Some(ToolChoice::Auto),
        };
        let response = self.provider.chat(request).await?;
        self.track(&response, TOOL_SELECTION_REQUEST, user_id, conversation_id);

        if !response.text.is_empty() {
            self.history
                .add_message(
                    conversation_id,
                    MessageRole::Assistant,
                    response.text.clone(),
                    None,
                )
                .await;
        }

        let calls = response.tool_calls();
        if calls.is_empty() {
            if response.text.is_empty() {
                return Ok(NO_TOOL_FALLBACK_REPLY.to_string());
            }
            return Ok(response.text);
        }

        let mut outcomes = Vec::with_capacity(calls.len());
        for call in &calls {
            tracing::info!(
                tool = %call.name,
                tool_call_id = %call.id,
                "tool call requested"
            );
            outcomes.push(self.run_tool_call(conversation_id, call).await);
        }

        let reply = self
            .synthesize_reply(conversation_id, user_id, &outcomes)
            .await;
        self.history
            .add_message(conversation_id, MessageRole::Assistant, reply.clone(), None)
            .await;
        Ok(reply)
    }

    /// Record the call, execute it, record the outcome. Never fails.
    async fn run_tool_call(&self, conversation_id: &str, call: &ToolCall) -> ToolOutcome {
        let (content, metadata) = transcript::call_record(call);
        self.history
            .add_message(conversation_id, MessageRole::Tool, content, Some(metadata))
            .await;

        let result = match decode_args(&call.arguments) {
            Ok(args) => self
                .tools
                .execute_tool(&call.name, args)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e),
        };

        match result {
            Ok(data) => {
                let (content, metadata) = transcript::result_record(call, &data);
                self.history
                    .add_message(conversation_id, MessageRole::Tool, content, Some(metadata))
                    .await;
                ToolOutcome::Success {
                    tool: call.name.clone(),
                    data,
                }
            }
            Err(error) => {
                tracing::error!(tool = %call.name, "error executing tool: {error}");
                let (content, metadata) = transcript::error_record(call, &error);
                self.history
                    .add_message(conversation_id, MessageRole::Tool, content, Some(metadata))
                    .await;
                ToolOutcome::Error {
                    tool: call.name.clone(),
                    error,
                    args: call.arguments.clone(),
                }
            }
        }
    }

    /// Second model call: one reply for the whole batch of outcomes.
    async fn synthesize_reply(
        &self,
        conversation_id: &str,
        user_id: &str,
        outcomes: &[ToolOutcome],
    ) -> String {
        self.history
            .add_message(
                conversation_id,
                MessageRole::System,
                tool_response_prompt(outcomes),
                None,
            )
            .await;

        let request = LlmRequest {
            model: self.model.clone(),
            messages: self.transcript(conversation_id).await,
            max_tokens: self.reply_max_tokens,
            tools: vec![],
            tool_choice: None,
        };
        match self.provider.chat(request).await {
            Ok(response) => {
                self.track(&response, REPLY_REQUEST, user_id, conversation_id);
                if response.text.is_empty() {
                    EMPTY_REPLY.to_string()
                } else {
                    response.text
                }
            }
            Err(e) => {
                tracing::error!(conversation_id, "error generating response: {e:?}");
                REPLY_ERROR_REPLY.to_string()
            }
        }
    }

    async fn transcript(&self, conversation_id: &str) -> Vec<toolchat_provider::LlmMessage> {
        match self.history.get_conversation(conversation_id).await {
            Some(conversation) => transcript::to_llm_messages(&conversation),
            None => Vec::new(),
        }
    }

    fn track(&self, response: &LlmResponse, request_type: &str, user_id: &str, session: &str) {
        let event = UsageEvent::new(
            self.model.clone(),
            u64::from(response.input_tokens.unwrap_or(0)),
            u64::from(response.output_tokens.unwrap_or(0)),
            request_type,
        )
        .with_user(user_id)
        .with_session(session);
        self.usage.track_usage(event);
    }
}

/// A string holds the model's unparsed argument text.
fn decode_args(arguments: &Value) -> std::result::Result<ToolArgs, String> {
    match arguments {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(ToolArgs::new()),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(format!("tool arguments must be a JSON object, got {other}")),
            Err(e) => Err(format!("invalid tool arguments: {e}")),
        },
        other => Err(format!("tool arguments must be a JSON object, got {other}")),
    }
}

/// System message that asks for one reply covering every outcome.
pub fn tool_response_prompt(outcomes: &[ToolOutcome]) -> String {
    let data = serde_json::to_string(outcomes).unwrap_or_else(|_| "[]".to_string());
    format!(
        "Tool response data: {data}\n\n\
         Please format a SINGLE, COHERENT response to the user based on ALL this data. \
         Avoid repetition. Respond in the same language the user is using."
    )
}
