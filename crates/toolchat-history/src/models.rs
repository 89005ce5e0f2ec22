use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Open string-keyed map carried by conversations and messages.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown message role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for MessageRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            metadata: Metadata::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Tool-call id linking a call record to its result record.
    pub fn tool_call_id(&self) -> Option<&str> {
        self.metadata.get("tool_call_id").and_then(|v| v.as_str())
    }
}

/// Minimal `{role, content}` projection handed to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        }
    }

    pub fn push(&mut self, message: Message) {
        self.updated_at = message.timestamp.max(self.updated_at);
        self.messages.push(message);
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            user_id: self.user_id.clone(),
            message_count: self.messages.len(),
            first_message_at: self
                .messages
                .first()
                .map(|m| m.timestamp)
                .unwrap_or(self.created_at),
            last_message_at: self
                .messages
                .last()
                .map(|m| m.timestamp)
                .unwrap_or(self.created_at),
        }
    }

    /// First user message, used as a preview line.
    pub fn first_user_message(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.role == MessageRole::User)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationSummary {
    pub id: String,
    pub user_id: String,
    pub message_count: usize,
    pub first_message_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
}

/// Most recent last message first.
pub(crate) fn sort_newest_first(summaries: &mut [ConversationSummary]) {
    summaries.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_value(MessageRole::Assistant).unwrap();
        assert_eq!(json, "assistant");
        assert_eq!("tool".parse::<MessageRole>().unwrap(), MessageRole::Tool);
        assert!("human".parse::<MessageRole>().is_err());
    }

    #[test]
    fn conversation_json_round_trip() {
        let mut conv = Conversation::new("c1", "alice");
        conv.metadata
            .insert("username".into(), serde_json::json!("alice_tg"));
        conv.push(Message::new(MessageRole::System, "be useful"));
        let mut meta = Metadata::new();
        meta.insert("tool_call_id".into(), serde_json::json!("call_1"));
        conv.push(Message::new(MessageRole::Tool, "Function: list_projects").with_metadata(meta));

        let json = serde_json::to_string_pretty(&conv).unwrap();
        let loaded: Conversation = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, conv);
        assert_eq!(loaded.messages[1].tool_call_id(), Some("call_1"));
    }

    #[test]
    fn persisted_shape_uses_iso_timestamps() {
        let mut conv = Conversation::new("c1", "alice");
        conv.push(Message::new(MessageRole::User, "hi"));
        let value = serde_json::to_value(&conv).unwrap();
        for key in ["id", "user_id", "metadata", "created_at", "updated_at", "messages"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        let ts = value["messages"][0]["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
        assert_eq!(value["messages"][0]["role"], "user");
    }

    #[test]
    fn summary_of_empty_conversation_uses_created_at() {
        let conv = Conversation::new("c1", "alice");
        let summary = conv.summary();
        assert_eq!(summary.message_count, 0);
        assert_eq!(summary.first_message_at, conv.created_at);
        assert_eq!(summary.last_message_at, conv.created_at);
    }
}
