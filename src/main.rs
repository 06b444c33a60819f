use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use chat_prep::config::AppConfig;
use chat_prep::logging::init_logging;
use chat_prep::models::{ChatSummary, SearchCriteria, StreamItem};
use chat_prep::service::ChatPrepService;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest new messages from the source chat.db into the prepared store
    Ingest {
        /// Drop and rebuild the prepared store before ingesting
        #[arg(long)]
        rebuild: bool,

        /// Keep running and re-ingest on the configured interval
        #[arg(long)]
        watch: bool,
    },
    /// List chats grouped by participants, most recent first
    ChatList {
        /// Filter by chat name or participant fragment
        #[arg(short, long)]
        search: Option<String>,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Search chats by multiple criteria
    Search {
        /// Free-text query over chat names and participants
        #[arg(short, long)]
        query: Option<String>,

        /// Start date for message range (YYYY-MM-DD)
        #[arg(short, long)]
        start_date: Option<String>,

        /// End date for message range (YYYY-MM-DD)
        #[arg(short, long)]
        end_date: Option<String>,

        /// Participant name or handle fragment (repeatable)
        #[arg(short, long)]
        participant: Vec<String>,

        /// Full-text match over message content
        #[arg(short, long)]
        content: Option<String>,

        /// Maximum number of chats to return
        #[arg(short, long)]
        limit: Option<usize>,

        /// Stream results as they match instead of waiting
        #[arg(long)]
        stream: bool,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Show recent messages for one or more source chat ids
    Recent {
        /// Source chat ids
        #[arg(short = 'i', long, required = true, num_args = 1..)]
        chat_ids: Vec<i64>,

        /// Maximum messages to show
        #[arg(short, long, default_value = "25")]
        limit: usize,

        /// Page offset
        #[arg(short, long, default_value = "0")]
        offset: usize,

        /// Oldest first instead of newest first
        #[arg(long)]
        asc: bool,

        /// Full-text filter within the chats
        #[arg(short, long)]
        search: Option<String>,
    },
    /// Show ingestion progress and staleness
    Status {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    let _log_guard = init_logging(
        Some(&config.log_level()),
        config.logging.file_path.as_deref().map(std::path::Path::new),
    )?;

    let cli = Cli::parse();
    let service = Arc::new(ChatPrepService::new(config)?);

    match cli.command {
        Commands::Ingest { rebuild, watch } => run_ingest(service, rebuild, watch).await?,
        Commands::ChatList { search, json } => run_chat_list(service, search, json).await?,
        Commands::Search {
            query,
            start_date,
            end_date,
            participant,
            content,
            limit,
            stream,
            json,
        } => {
            let criteria = SearchCriteria {
                query,
                start_date,
                end_date,
                participant_names: participant,
                message_content: content,
                limit,
            };
            run_search(service, criteria, stream, json).await?;
        }
        Commands::Recent {
            chat_ids,
            limit,
            offset,
            asc,
            search,
        } => run_recent(service, chat_ids, limit, offset, asc, search).await?,
        Commands::Status { json } => run_status(service, json).await?,
    }

    Ok(())
}

/// Run one ingestion pass, optionally staying resident to refresh.
async fn run_ingest(service: Arc<ChatPrepService>, rebuild: bool, watch: bool) -> Result<()> {
    let outcome = Arc::clone(&service).ingest(rebuild).await?;
    println!(
        "Ingested {} messages and {} contacts into {}{}",
        outcome.messages_processed,
        outcome.contacts_processed,
        outcome.prepared_db_path,
        if outcome.rebuilt { " (rebuilt)" } else { "" }
    );

    if watch {
        let Some(handle) = ChatPrepService::spawn_refresh_loop(service) else {
            anyhow::bail!("watch mode requires ingest.refresh_interval_secs > 0");
        };
        info!("watching for new messages; press Ctrl-C to stop");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("shutting down"),
            _ = handle => {}
        }
    }
    Ok(())
}

async fn run_chat_list(
    service: Arc<ChatPrepService>,
    search: Option<String>,
    json: bool,
) -> Result<()> {
    let chats = match search {
        Some(query) => service.search_chats(query).await?,
        None => service.chat_list().await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&chats)?);
    } else {
        print_chats(&chats);
    }
    Ok(())
}

async fn run_search(
    service: Arc<ChatPrepService>,
    criteria: SearchCriteria,
    stream: bool,
    json: bool,
) -> Result<()> {
    if stream {
        let rx = service.stream_search(criteria)?;
        // Receiving on the std channel blocks, so it stays off the runtime.
        let (count, ended) = tokio::task::spawn_blocking(move || {
            let mut count = 0usize;
            for item in rx {
                match item {
                    StreamItem::Chat(chat) => {
                        count += 1;
                        print_chat_line(&chat);
                    }
                    sentinel => return (count, Some(sentinel)),
                }
            }
            (count, None)
        })
        .await?;

        match ended {
            Some(StreamItem::TimedOut) => {
                println!("... search timed out; {count} results shown are valid but incomplete");
            }
            Some(StreamItem::Failed(reason)) => {
                anyhow::bail!("search failed after {count} results: {reason}");
            }
            _ => println!("{count} matching chats"),
        }
        return Ok(());
    }

    let chats = service.advanced_search(criteria).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&chats)?);
    } else {
        print_chats(&chats);
    }
    Ok(())
}

async fn run_recent(
    service: Arc<ChatPrepService>,
    chat_ids: Vec<i64>,
    limit: usize,
    offset: usize,
    asc: bool,
    search: Option<String>,
) -> Result<()> {
    let messages = service
        .recent_messages(chat_ids, limit, offset, asc, search)
        .await?;

    for message in &messages {
        let sender = if message.is_from_me {
            "Me"
        } else {
            message.sender.as_deref().unwrap_or("Unknown")
        };
        println!("[{}] {}: {}", message.date, sender, message.text);
        for reaction in &message.reactions {
            let who = reaction.sender.as_deref().unwrap_or("Me");
            println!("    {} {} ({})", who, reaction.kind, reaction.date);
        }
    }
    println!("{} messages", messages.len());
    Ok(())
}

async fn run_status(service: Arc<ChatPrepService>, json: bool) -> Result<()> {
    let status = service.status().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!(
        "Prepared messages: {} (source rowid {}, handle rowid {})",
        status.message_count, status.last_message_rowid, status.last_contact_rowid
    );
    println!(
        "Last processed: {}",
        status.last_processed_date.as_deref().unwrap_or("never")
    );
    println!(
        "Source latest:  {}",
        status.source_max_date.as_deref().unwrap_or("unknown")
    );
    println!(
        "Status: {}",
        if status.stale { "stale, run ingest" } else { "up to date" }
    );
    Ok(())
}

fn print_chats(chats: &[ChatSummary]) {
    for chat in chats {
        print_chat_line(chat);
    }
    println!("{} chats", chats.len());
}

fn print_chat_line(chat: &ChatSummary) {
    println!(
        "{} | {} messages | last {}",
        chat.name,
        chat.total_messages,
        chat.last_message_date.as_deref().unwrap_or("-")
    );
    if let Some(preview) = chat.recent_messages.first() {
        let sender = if preview.is_from_me {
            "Me"
        } else {
            preview.sender.as_deref().unwrap_or("Unknown")
        };
        println!("    {}: {}", sender, preview.text);
    }
}
