//! Tool-traffic history records and their projection into provider messages.
//!
//! Tool calls are stored as `tool`-role history entries whose metadata
//! carries a `kind` (`call`, `result` or `error`) and the call id. When a
//! conversation is replayed to the model, call records become assistant
//! tool-use blocks and result/error records become tool-result blocks, so
//! the API sees properly paired `tool_calls` / `tool` messages.

use std::collections::HashSet;

use serde_json::Value;
use toolchat_history::{Conversation, MessageRole, Metadata};
use toolchat_provider::{ContentBlock, LlmMessage, ToolCall};
use tracing::debug;

pub const KIND_KEY: &str = "kind";
pub const KIND_CALL: &str = "call";
pub const KIND_RESULT: &str = "result";
pub const KIND_ERROR: &str = "error";

/// Content and metadata for a `tool` entry recording a requested call.
pub fn call_record(call: &ToolCall) -> (String, Metadata) {
    let pretty = match &call.arguments {
        Value::String(raw) => raw.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    };
    let content = format!("Function: {}\nArguments: {pretty}", call.name);
    (content, base_metadata(call, KIND_CALL))
}

/// Content and metadata for a successful call's outcome.
pub fn result_record(call: &ToolCall, result: &Value) -> (String, Metadata) {
    let content = match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let mut metadata = base_metadata(call, KIND_RESULT);
    metadata.insert("result".into(), result.clone());
    (content, metadata)
}

/// Content and metadata for a failed call.
pub fn error_record(call: &ToolCall, error: &str) -> (String, Metadata) {
    let mut metadata = base_metadata(call, KIND_ERROR);
    metadata.insert("error".into(), Value::String(error.to_string()));
    (format!("Error: {error}"), metadata)
}

fn base_metadata(call: &ToolCall, kind: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(KIND_KEY.into(), Value::String(kind.to_string()));
    metadata.insert("name".into(), Value::String(call.name.clone()));
    metadata.insert("arguments".into(), call.arguments.clone());
    metadata.insert("tool_call_id".into(), Value::String(call.id.clone()));
    metadata
}

fn kind_of(metadata: &Metadata) -> Option<&str> {
    metadata.get(KIND_KEY).and_then(Value::as_str)
}

fn str_field<'a>(metadata: &'a Metadata, key: &str) -> &'a str {
    metadata.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Replay a stored conversation as provider messages, preserving order.
///
/// Calls without an outcome (and outcomes without a call) are left out:
/// the API rejects unpaired tool messages.
pub fn to_llm_messages(conversation: &Conversation) -> Vec<LlmMessage> {
    let mut called = HashSet::new();
    let mut answered = HashSet::new();
    for message in &conversation.messages {
        if let Some(id) = message.tool_call_id() {
            match kind_of(&message.metadata) {
                Some(KIND_CALL) => {
                    called.insert(id);
                }
                Some(KIND_RESULT | KIND_ERROR) => {
                    answered.insert(id);
                }
                _ => {}
            }
        }
    }

    let mut out = Vec::with_capacity(conversation.messages.len());
    for message in &conversation.messages {
        match message.role {
            MessageRole::System => out.push(LlmMessage::system(&message.content)),
            MessageRole::User => out.push(LlmMessage::user(&message.content)),
            MessageRole::Assistant => out.push(LlmMessage::assistant(&message.content)),
            MessageRole::Tool => {
                let meta = &message.metadata;
                let Some(id) = message.tool_call_id() else {
                    debug!("skipping tool entry without call id");
                    continue;
                };
                match kind_of(meta) {
                    Some(KIND_CALL) if answered.contains(id) => out.push(LlmMessage {
                        role: "assistant".into(),
                        content: vec![ContentBlock::ToolUse {
                            id: id.to_string(),
                            name: str_field(meta, "name").to_string(),
                            input: meta.get("arguments").cloned().unwrap_or(Value::Null),
                        }],
                    }),
                    Some(kind @ (KIND_RESULT | KIND_ERROR)) if called.contains(id) => {
                        out.push(LlmMessage {
                            role: "tool".into(),
                            content: vec![ContentBlock::ToolResult {
                                tool_use_id: id.to_string(),
                                name: Some(str_field(meta, "name").to_string()),
                                content: message.content.clone(),
                                is_error: kind == KIND_ERROR,
                            }],
                        })
                    }
                    _ => debug!(tool_call_id = id, "skipping unpaired tool entry"),
                }
            }
        }
    }
    out
}
