use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::{ChatAction, Message, User};

use crate::router::{ConversationRouter, UserProfile, HELP_TEXT};

/// A parsed incoming Telegram text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    NewConversation,
    ListConversations,
    /// Any other slash command.
    Unknown(String),
    Text(String),
}

impl Command {
    /// `/cmd@BotName args` is treated like `/cmd`.
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        let Some(rest) = trimmed.strip_prefix('/') else {
            return Self::Text(text.to_string());
        };
        let word = rest.split_whitespace().next().unwrap_or_default();
        let name = word.split('@').next().unwrap_or_default();
        match name {
            "start" => Self::Start,
            "help" => Self::Help,
            "new_conversation" => Self::NewConversation,
            "list_conversations" => Self::ListConversations,
            other => Self::Unknown(other.to_string()),
        }
    }
}

pub fn profile_of(user: &User) -> UserProfile {
    UserProfile {
        username: user.username.clone(),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
    }
}

pub struct TelegramBot {
    token: String,
    router: Arc<ConversationRouter>,
}

impl TelegramBot {
    pub fn new(token: String, router: Arc<ConversationRouter>) -> Self {
        Self { token, router }
    }

    pub async fn run_impl(self) -> anyhow::Result<()> {
        let bot = Bot::new(&self.token);
        let router = self.router;

        let handler = Update::filter_message().endpoint(move |bot: Bot, msg: Message| {
            let router = router.clone();

            async move {
                let Some(text) = msg.text().map(str::to_string) else {
                    return Ok::<(), teloxide::RequestError>(());
                };
                let Some(user) = msg.from.as_ref() else {
                    return Ok(());
                };
                let user_id = user.id.0.to_string();
                let chat_id = msg.chat.id;

                let reply = match Command::parse(&text) {
                    Command::Start => {
                        tracing::info!(user_id = %user_id, username = ?user.username, "user started the bot");
                        router.start(&user_id, &profile_of(user)).await
                    }
                    Command::Help => HELP_TEXT.to_string(),
                    Command::NewConversation => {
                        router.new_conversation(&user_id, &profile_of(user)).await
                    }
                    Command::ListConversations => router.list_conversations(&user_id).await,
                    Command::Unknown(name) => {
                        tracing::debug!(user_id = %user_id, command = %name, "ignoring unknown command");
                        return Ok(());
                    }
                    Command::Text(text) => {
                        tracing::info!(user_id = %user_id, "received message");
                        let _ = bot.send_chat_action(chat_id, ChatAction::Typing).await;
                        router.handle_text(&user_id, &text).await
                    }
                };

                if let Err(err) = bot.send_message(chat_id, reply).await {
                    tracing::error!("failed to send reply: {err}");
                }
                Ok(())
            }
        });

        tracing::info!("starting telegram bot");
        Dispatcher::builder(bot, handler)
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        Ok(())
    }
}

#[async_trait::async_trait]
impl crate::ChannelBot for TelegramBot {
    fn channel_type(&self) -> &str {
        "telegram"
    }

    async fn run(self: Box<Self>) -> anyhow::Result<()> {
        (*self).run_impl().await
    }
}
