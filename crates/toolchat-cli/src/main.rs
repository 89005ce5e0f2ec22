use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use toolchat_channels::telegram::TelegramBot;
use toolchat_channels::{ChannelBot, ConversationRouter};
use toolchat_core::*;
use toolchat_history::{create_storage_backend, ConversationSummary, HistoryManager};
use toolchat_provider::OpenAiProvider;

#[derive(Parser)]
#[command(name = "toolchat", version, about = "Natural-language project assistant")]
struct Cli {
    #[arg(
        long,
        default_value = "~/.toolchat",
        help = "Config root directory (contains config/, logs/ and history data)"
    )]
    config_root: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Start the Telegram bot")]
    Start,
    #[command(about = "Local REPL for testing (no Telegram needed)")]
    Chat {
        #[arg(long, default_value = "local", help = "User ID to chat as")]
        user: String,
    },
    #[command(about = "Validate config files")]
    Validate,
    #[command(subcommand, about = "Inspect stored conversations")]
    Conversations(ConversationCommands),
}

#[derive(Subcommand)]
enum ConversationCommands {
    #[command(about = "List conversations, newest first")]
    List {
        #[arg(long, help = "Only show conversations of this user")]
        user: Option<String>,
    },
    #[command(about = "Print every message of a conversation")]
    Show {
        #[arg(help = "Conversation ID")]
        conversation_id: String,
    },
    #[command(about = "Delete a conversation")]
    Delete {
        #[arg(help = "Conversation ID")]
        conversation_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();
    cli.config_root = expand_home(&cli.config_root);

    let log_dir = cli.config_root.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "toolchat.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    match command {
        Commands::Validate => {
            let config = load_config(&cli.config_root.join("config"))?;
            println!(
                "Config valid. model={}, history={}, telegram={}.",
                config.provider.model,
                config.history.backend.as_str(),
                if config.telegram.enabled { "on" } else { "off" }
            );
        }
        Commands::Start => {
            start_bot(&cli.config_root).await?;
        }
        Commands::Chat { user } => {
            run_repl(&cli.config_root, &user).await?;
        }
        Commands::Conversations(cmd) => {
            let config = load_config(&cli.config_root.join("config"))?;
            let history = open_history(&cli.config_root, &config)?;
            match cmd {
                ConversationCommands::List { user } => {
                    let summaries = history.list_conversations(user.as_deref()).await;
                    if summaries.is_empty() {
                        println!("No conversations found.");
                    } else {
                        println!(
                            "{:<38} {:<16} {:<6} {:<20}",
                            "CONVERSATION ID", "USER", "MSGS", "LAST MESSAGE"
                        );
                        println!("{}", "-".repeat(80));
                        for summary in &summaries {
                            println!("{}", summary_row(summary));
                        }
                    }
                }
                ConversationCommands::Show { conversation_id } => {
                    let conversation = history
                        .get_conversation(&conversation_id)
                        .await
                        .ok_or_else(|| anyhow::anyhow!("conversation not found: {conversation_id}"))?;
                    println!("Conversation: {}", conversation.id);
                    println!("User: {}", conversation.user_id);
                    println!("Created: {}", conversation.created_at.to_rfc3339());
                    for message in &conversation.messages {
                        println!(
                            "\n[{}] {}",
                            message.timestamp.format("%Y-%m-%d %H:%M:%S"),
                            message.role.as_str()
                        );
                        println!("{}", message.content);
                    }
                }
                ConversationCommands::Delete { conversation_id } => {
                    if history.delete_conversation(&conversation_id).await {
                        println!("Conversation '{conversation_id}' deleted.");
                    } else {
                        bail!("conversation not found: {conversation_id}");
                    }
                }
            }
        }
    }

    Ok(())
}

fn expand_home(path: &Path) -> PathBuf {
    if path.starts_with("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(path.strip_prefix("~").unwrap_or(path));
        }
    }
    path.to_path_buf()
}

fn open_history(root: &Path, config: &ToolchatConfig) -> Result<Arc<HistoryManager>> {
    let dir = config.history.resolve_dir(root);
    let backend = create_storage_backend(config.history.backend.as_str(), Some(&dir))?;
    Ok(Arc::new(HistoryManager::new(backend)))
}

struct App {
    config: ToolchatConfig,
    orchestrator: Arc<Orchestrator>,
    usage: Arc<InMemoryUsageTracker>,
}

fn bootstrap(root: &Path) -> Result<App> {
    let config = load_config(&root.join("config"))?;

    let provider = Arc::new(OpenAiProvider::with_timeout(
        config.provider.api_key.clone(),
        config.provider.api_base.clone(),
        Duration::from_secs(config.provider.timeout_secs),
    ));
    let history = open_history(root, &config)?;

    let projects = Arc::new(ProjectStore::new());
    let mut tools = ToolRegistry::new();
    register_project_tools(&mut tools, projects);
    tracing::info!(tools = tools.len(), "tool registry ready");

    let usage = Arc::new(InMemoryUsageTracker::new());
    let orchestrator = Orchestrator::new(
        provider,
        history,
        Arc::new(tools),
        config.provider.model.clone(),
    )
    .with_config(&config.orchestrator)
    .with_usage_tracker(usage.clone());

    Ok(App {
        config,
        orchestrator: Arc::new(orchestrator),
        usage,
    })
}

async fn start_bot(root: &Path) -> Result<()> {
    let app = bootstrap(root)?;
    if !app.config.telegram.enabled {
        bail!("telegram is not enabled in config/main.yaml");
    }

    let router = Arc::new(ConversationRouter::new(app.orchestrator.clone()));
    let bot: Box<dyn ChannelBot> = Box::new(TelegramBot::new(
        app.config.telegram.token.clone(),
        router,
    ));
    tracing::info!(
        app = %app.config.app.name,
        channel = bot.channel_type(),
        model = %app.config.provider.model,
        "starting channel"
    );
    bot.run().await
}

async fn run_repl(root: &Path, user_id: &str) -> Result<()> {
    let app = bootstrap(root)?;
    let conversation_id = app.orchestrator.start_conversation(user_id, None).await;

    println!("toolchat REPL. Type 'quit' to exit.");
    println!("Conversation: {conversation_id}");
    println!("---");

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input == "quit" || input == "exit" {
            break;
        }
        if input.is_empty() {
            continue;
        }

        let reply = app
            .orchestrator
            .process_message(input, user_id, Some(&conversation_id))
            .await;
        println!("{reply}");
    }

    let stats = app.usage.current_usage(Some(user_id));
    println!(
        "---\n{} model calls, {} tokens ({} in / {} out).",
        stats.event_count, stats.total_tokens, stats.total_input_tokens, stats.total_output_tokens
    );
    Ok(())
}

fn summary_row(summary: &ConversationSummary) -> String {
    format!(
        "{:<38} {:<16} {:<6} {:<20}",
        summary.id,
        summary.user_id,
        summary.message_count,
        summary.last_message_at.format("%Y-%m-%d %H:%M")
    )
}
