//! Backing stores for conversations.
//!
//! Two implementations share the [`StorageBackend`] trait:
//! - [`MemoryStorage`] keeps conversations in a map (tests, ephemeral runs)
//! - [`FileStorage`] writes one pretty-printed JSON document per conversation,
//!   named `<id>.json`, under a single directory

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::models::{sort_newest_first, Conversation, ConversationSummary};

#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn save_conversation(&self, conversation: &Conversation) -> Result<()>;

    /// `Ok(None)` when no record exists for `id`.
    async fn load_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    /// Returns whether a record was removed.
    async fn delete_conversation(&self, id: &str) -> Result<bool>;

    /// Summaries sorted by last message time, newest first.
    async fn list_conversations(&self, user_id: Option<&str>) -> Result<Vec<ConversationSummary>>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Memory,
    #[default]
    File,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File => "file",
        }
    }
}

impl std::str::FromStr for StorageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            other => Err(anyhow!("unknown storage backend: {other}")),
        }
    }
}

/// Build a backend by name. `file` requires a directory.
pub fn create_storage_backend(kind: &str, dir: Option<&Path>) -> Result<Box<dyn StorageBackend>> {
    match kind.parse::<StorageKind>()? {
        StorageKind::Memory => Ok(Box::new(MemoryStorage::new())),
        StorageKind::File => {
            let Some(dir) = dir else {
                bail!("file storage requires a storage directory");
            };
            Ok(Box::new(FileStorage::new(dir)))
        }
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    conversations: Mutex<HashMap<String, Conversation>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Conversation>> {
        self.conversations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn save_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.lock()
            .insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn load_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self.lock().get(id).cloned())
    }

    async fn delete_conversation(&self, id: &str) -> Result<bool> {
        Ok(self.lock().remove(id).is_some())
    }

    async fn list_conversations(&self, user_id: Option<&str>) -> Result<Vec<ConversationSummary>> {
        let mut summaries: Vec<ConversationSummary> = self
            .lock()
            .values()
            .filter(|c| user_id.map_or(true, |u| c.user_id == u))
            .map(Conversation::summary)
            .collect();
        sort_newest_first(&mut summaries);
        Ok(summaries)
    }
}

pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn conversation_path(&self, id: &str) -> Result<PathBuf> {
        if !is_valid_id(id) {
            bail!("invalid conversation id: {id:?}");
        }
        Ok(self.dir.join(format!("{id}.json")))
    }
}

/// Ids double as file names; reject anything that could escape the directory.
fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn save_conversation(&self, conversation: &Conversation) -> Result<()> {
        let path = self.conversation_path(&conversation.id)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create history dir: {}", self.dir.display()))?;

        let data = serde_json::to_vec_pretty(conversation)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to replace {}", path.display()))?;

        debug!(conversation_id = %conversation.id, "saved conversation to disk");
        Ok(())
    }

    async fn load_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let path = self.conversation_path(id)?;
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        let conversation = serde_json::from_str(&raw)
            .with_context(|| format!("malformed conversation file: {}", path.display()))?;
        Ok(Some(conversation))
    }

    async fn delete_conversation(&self, id: &str) -> Result<bool> {
        let path = self.conversation_path(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("failed to delete {}", path.display())),
        }
    }

    async fn list_conversations(&self, user_id: Option<&str>) -> Result<Vec<ConversationSummary>> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let conversation = match tokio::fs::read_to_string(&path)
                .await
                .map_err(anyhow::Error::from)
                .and_then(|raw| {
                    serde_json::from_str::<Conversation>(&raw).map_err(anyhow::Error::from)
                }) {
                Ok(c) => c,
                Err(e) => {
                    error!(file = %path.display(), "error processing conversation file: {e:#}");
                    continue;
                }
            };

            if user_id.is_some_and(|u| conversation.user_id != u) {
                continue;
            }
            summaries.push(conversation.summary());
        }

        sort_newest_first(&mut summaries);
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Message, MessageRole};
    use tempfile::TempDir;

    fn sample_conversation(id: &str, user: &str) -> Conversation {
        let mut conv = Conversation::new(id, user);
        conv.push(Message::new(MessageRole::System, "You are a helpful assistant"));
        conv.push(Message::new(MessageRole::User, "Hello"));
        conv.push(Message::new(MessageRole::Assistant, "Hi there!"));
        conv
    }

    async fn exercise_backend(storage: &dyn StorageBackend) {
        let conv = sample_conversation("test_conv", "test_user");
        storage.save_conversation(&conv).await.unwrap();

        let loaded = storage
            .load_conversation("test_conv")
            .await
            .unwrap()
            .expect("saved conversation loads");
        assert_eq!(loaded, conv);
        assert_eq!(loaded.messages[0].content, "You are a helpful assistant");

        let listed = storage.list_conversations(None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "test_conv");
        assert_eq!(listed[0].message_count, 3);

        assert!(storage.delete_conversation("test_conv").await.unwrap());
        assert!(storage.load_conversation("test_conv").await.unwrap().is_none());
        assert!(!storage.delete_conversation("test_conv").await.unwrap());
    }

    #[tokio::test]
    async fn memory_storage_save_load_delete() {
        exercise_backend(&MemoryStorage::new()).await;
    }

    #[tokio::test]
    async fn file_storage_save_load_delete() {
        let tmp = TempDir::new().expect("tempdir");
        let storage = FileStorage::new(tmp.path().join("history"));
        exercise_backend(&storage).await;
    }

    #[tokio::test]
    async fn file_storage_writes_one_file_per_conversation() {
        let tmp = TempDir::new().expect("tempdir");
        let storage = FileStorage::new(tmp.path());
        storage
            .save_conversation(&sample_conversation("abc-123", "u"))
            .await
            .unwrap();

        let path = tmp.path().join("abc-123.json");
        assert!(path.exists());
        assert!(!tmp.path().join("abc-123.json.tmp").exists());
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["id"], "abc-123");
        assert_eq!(value["messages"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn file_storage_malformed_record_is_an_error_and_skipped_in_listing() {
        let tmp = TempDir::new().expect("tempdir");
        let storage = FileStorage::new(tmp.path());
        storage
            .save_conversation(&sample_conversation("good", "u"))
            .await
            .unwrap();
        std::fs::write(tmp.path().join("bad.json"), "{not json").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();

        assert!(storage.load_conversation("bad").await.is_err());
        let listed = storage.list_conversations(None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "good");
    }

    #[tokio::test]
    async fn file_storage_rejects_path_like_ids() {
        let tmp = TempDir::new().expect("tempdir");
        let storage = FileStorage::new(tmp.path());
        assert!(storage.load_conversation("../etc/passwd").await.is_err());
        assert!(storage.delete_conversation("").await.is_err());
    }

    #[tokio::test]
    async fn file_storage_missing_dir_lists_nothing() {
        let tmp = TempDir::new().expect("tempdir");
        let storage = FileStorage::new(tmp.path().join("never-created"));
        assert!(storage.list_conversations(None).await.unwrap().is_empty());
        assert!(storage.load_conversation("x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn storage_user_filter() {
        let storage = MemoryStorage::new();
        let mut conv1 = Conversation::new("conv1", "user1");
        conv1.push(Message::new(MessageRole::User, "Hello"));
        let mut conv2 = Conversation::new("conv2", "user2");
        conv2.push(Message::new(MessageRole::User, "Hi"));

        storage.save_conversation(&conv1).await.unwrap();
        storage.save_conversation(&conv2).await.unwrap();

        let user1 = storage.list_conversations(Some("user1")).await.unwrap();
        assert_eq!(user1.len(), 1);
        assert_eq!(user1[0].id, "conv1");
    }

    #[test]
    fn storage_factory() {
        assert!(create_storage_backend("memory", None).is_ok());
        assert!(create_storage_backend("unknown", None).is_err());
        let err = create_storage_backend("file", None).err().unwrap();
        assert!(err.to_string().contains("storage directory"));
        assert!(create_storage_backend("file", Some(Path::new("/tmp/x"))).is_ok());
    }
}
