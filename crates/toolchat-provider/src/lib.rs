pub mod openai;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;

pub use openai::{OpenAiProvider, ProviderErrorKind};
pub use types::*;

/// Language-model backend: one request in, one assistant message out.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse>;
}
