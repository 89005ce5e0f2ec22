pub mod router;

#[cfg(feature = "telegram")]
pub mod telegram;

pub use router::{ConversationRouter, UserProfile};

/// A chat platform connector that runs until shut down.
#[async_trait::async_trait]
pub trait ChannelBot: Send {
    fn channel_type(&self) -> &str;
    async fn run(self: Box<Self>) -> anyhow::Result<()>;
}
