use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::{ChatMessage, Conversation, ConversationSummary, Message, MessageRole, Metadata};
use crate::storage::StorageBackend;

const CONTEXT_KEY: &str = "context";

/// Conversation log with a write-through cache in front of a [`StorageBackend`].
///
/// Every mutation is persisted immediately. Faults on the write path are
/// logged and swallowed: losing one history entry must not abort a turn.
pub struct HistoryManager {
    backend: Box<dyn StorageBackend>,
    cache: Mutex<HashMap<String, Conversation>>,
}

impl HistoryManager {
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self {
            backend,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn create_conversation(&self, user_id: &str, metadata: Option<Metadata>) -> String {
        let id = Uuid::new_v4().to_string();
        let mut conversation = Conversation::new(id.clone(), user_id);
        if let Some(metadata) = metadata {
            conversation.metadata = metadata;
        }

        self.persist(&conversation).await;
        self.cache.lock().await.insert(id.clone(), conversation);
        info!(conversation_id = %id, user_id, "created conversation");
        id
    }

    /// Append a message. Returns `false` (after logging) when the id is unknown.
    pub async fn add_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: impl Into<String>,
        metadata: Option<Metadata>,
    ) -> bool {
        let mut cache = self.cache.lock().await;
        let Some(conversation) = self.resolve(&mut cache, conversation_id).await else {
            warn!(conversation_id, "conversation not found, dropping message");
            return false;
        };

        let mut message = Message::new(role, content);
        if let Some(metadata) = metadata {
            message.metadata = metadata;
        }
        conversation.push(message);
        debug!(conversation_id, role = %role, "added message");

        let snapshot = conversation.clone();
        self.persist(&snapshot).await;
        true
    }

    /// Ordered `{role, content}` projection; empty for unknown ids.
    pub async fn get_messages(&self, conversation_id: &str) -> Vec<ChatMessage> {
        let Some(conversation) = self.get_conversation(conversation_id).await else {
            return Vec::new();
        };
        conversation
            .messages
            .into_iter()
            .map(|m| ChatMessage {
                role: m.role.as_str().to_string(),
                content: m.content,
            })
            .collect()
    }

    /// Cache first, then the backing store. Missing or malformed records yield `None`.
    pub async fn get_conversation(&self, conversation_id: &str) -> Option<Conversation> {
        let mut cache = self.cache.lock().await;
        self.resolve(&mut cache, conversation_id).await.cloned()
    }

    pub async fn list_conversations(&self, user_id: Option<&str>) -> Vec<ConversationSummary> {
        match self.backend.list_conversations(user_id).await {
            Ok(summaries) => summaries,
            Err(e) => {
                error!("failed to list conversations: {e:#}");
                Vec::new()
            }
        }
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> bool {
        let cached = self.cache.lock().await.remove(conversation_id).is_some();
        let stored = match self.backend.delete_conversation(conversation_id).await {
            Ok(removed) => removed,
            Err(e) => {
                error!(conversation_id, "failed to delete conversation: {e:#}");
                false
            }
        };
        if cached || stored {
            info!(conversation_id, "deleted conversation");
        }
        cached || stored
    }

    pub async fn set_conversation_context(&self, conversation_id: &str, context: &str) -> bool {
        self.update_metadata(conversation_id, |metadata| {
            metadata.insert(CONTEXT_KEY.into(), serde_json::Value::String(context.to_string()));
        })
        .await
    }

    pub async fn get_conversation_context(&self, conversation_id: &str) -> Option<String> {
        let conversation = self.get_conversation(conversation_id).await?;
        conversation
            .metadata
            .get(CONTEXT_KEY)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    pub async fn clear_conversation_context(&self, conversation_id: &str) -> bool {
        self.update_metadata(conversation_id, |metadata| {
            metadata.remove(CONTEXT_KEY);
        })
        .await
    }

    async fn update_metadata(&self, conversation_id: &str, f: impl FnOnce(&mut Metadata)) -> bool {
        let mut cache = self.cache.lock().await;
        let Some(conversation) = self.resolve(&mut cache, conversation_id).await else {
            warn!(conversation_id, "conversation not found");
            return false;
        };
        f(&mut conversation.metadata);
        conversation.updated_at = chrono::Utc::now();

        let snapshot = conversation.clone();
        self.persist(&snapshot).await;
        true
    }

    async fn resolve<'a>(
        &self,
        cache: &'a mut HashMap<String, Conversation>,
        conversation_id: &str,
    ) -> Option<&'a mut Conversation> {
        if !cache.contains_key(conversation_id) {
            match self.backend.load_conversation(conversation_id).await {
                Ok(Some(conversation)) => {
                    debug!(conversation_id, "loaded conversation from storage");
                    cache.insert(conversation_id.to_string(), conversation);
                }
                Ok(None) => return None,
                Err(e) => {
                    error!(conversation_id, "error loading conversation: {e:#}");
                    return None;
                }
            }
        }
        cache.get_mut(conversation_id)
    }

    async fn persist(&self, conversation: &Conversation) {
        if let Err(e) = self.backend.save_conversation(conversation).await {
            error!(conversation_id = %conversation.id, "error saving conversation: {e:#}");
        }
    }
}
