pub mod manager;
pub mod models;
pub mod storage;

pub use manager::HistoryManager;
pub use models::{
    ChatMessage, Conversation, ConversationSummary, Message, MessageRole, Metadata, UnknownRole,
};
pub use storage::{create_storage_backend, FileStorage, MemoryStorage, StorageBackend, StorageKind};
