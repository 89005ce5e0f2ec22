//! Platform-independent chat commands and per-user conversation tracking.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use toolchat_core::Orchestrator;
use toolchat_history::Metadata;

const RECENT_CONVERSATIONS: usize = 5;
const PREVIEW_CHARS: usize = 50;

pub const HELP_TEXT: &str = "Here's what you can do with this bot:

Project Management:
- List all projects
- Create a new project
- Delete a project
- Switch to a different project
- Get details about a project

Conversation Management:
- /new_conversation - Start a new conversation
- /list_conversations - List your recent conversations

Just ask me in natural language, for example:
\"Show me all projects\"
\"Create a new project called 'Test' with description 'A test project'\"
\"Delete project with ID abc123\"
\"Switch to project xyz789\"
\"What's the active project?\"";

pub const NEW_CONVERSATION_TEXT: &str =
    "Started a new conversation! You can now interact with me using natural language.";
pub const NO_CONVERSATIONS_TEXT: &str = "You don't have any conversations yet.";

/// Who is talking, as reported by the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
}

impl UserProfile {
    fn to_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert(
            "username".into(),
            Value::String(self.username.clone().unwrap_or_default()),
        );
        metadata.insert("first_name".into(), Value::String(self.first_name.clone()));
        metadata.insert(
            "last_name".into(),
            Value::String(self.last_name.clone().unwrap_or_default()),
        );
        metadata
    }
}

/// Maps platform users to their current conversation and answers chat commands.
pub struct ConversationRouter {
    orchestrator: Arc<Orchestrator>,
    current: RwLock<HashMap<String, String>>,
}

impl ConversationRouter {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            current: RwLock::new(HashMap::new()),
        }
    }

    pub async fn current_conversation(&self, user_id: &str) -> Option<String> {
        self.current.read().await.get(user_id).cloned()
    }

    /// `/start`: open a conversation and greet the user.
    pub async fn start(&self, user_id: &str, profile: &UserProfile) -> String {
        self.open_conversation(user_id, profile).await;
        format!(
            "Hello {}! I'm your project assistant. You can talk to me in natural language \
             to manage projects. Type /help to see available commands.",
            profile.first_name
        )
    }

    /// `/new_conversation`
    pub async fn new_conversation(&self, user_id: &str, profile: &UserProfile) -> String {
        self.open_conversation(user_id, profile).await;
        NEW_CONVERSATION_TEXT.to_string()
    }

    /// `/list_conversations`: the most recent few, plus the current id.
    pub async fn list_conversations(&self, user_id: &str) -> String {
        let history = self.orchestrator.history();
        let summaries = history.list_conversations(Some(user_id)).await;
        if summaries.is_empty() {
            return NO_CONVERSATIONS_TEXT.to_string();
        }

        let mut entries = Vec::new();
        for summary in summaries.iter().take(RECENT_CONVERSATIONS) {
            let preview = history
                .get_conversation(&summary.id)
                .await
                .and_then(|c| c.first_user_message().map(|m| preview(&m.content)))
                .unwrap_or_default();
            entries.push((summary.last_message_at, preview));
        }

        let current = self.current_conversation(user_id).await;
        format_conversation_list(&entries, current.as_deref())
    }

    /// Free text: run a turn in the user's current conversation.
    pub async fn handle_text(&self, user_id: &str, text: &str) -> String {
        let conversation_id = self.current_conversation(user_id).await;
        let turn = self
            .orchestrator
            .handle_message(text, user_id, conversation_id.as_deref())
            .await;
        self.current
            .write()
            .await
            .insert(user_id.to_string(), turn.conversation_id);
        turn.reply
    }

    async fn open_conversation(&self, user_id: &str, profile: &UserProfile) -> String {
        let id = self
            .orchestrator
            .start_conversation(user_id, Some(profile.to_metadata()))
            .await;
        self.current
            .write()
            .await
            .insert(user_id.to_string(), id.clone());
        tracing::info!(user_id, conversation_id = %id, "opened conversation");
        id
    }
}

/// First 50 characters, with an ellipsis when cut.
pub fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

pub fn format_conversation_list(
    entries: &[(DateTime<Utc>, String)],
    current: Option<&str>,
) -> String {
    let mut out = String::from("Your recent conversations:\n\n");
    for (i, (at, preview)) in entries.iter().enumerate() {
        out.push_str(&format!(
            "{}. {} - {preview}\n",
            i + 1,
            at.format("%Y-%m-%d %H:%M")
        ));
    }
    if let Some(id) = current {
        out.push_str(&format!("\nCurrent conversation ID: {id}"));
    }
    out
}
