use std::io::{self, Write};

use chatsync::bus::ConnectionEvent;
use chatsync::credential::{Credential, CredentialStore};
use chatsync::streaming::StreamOutcome;
use chatsync::{SyncClient, SyncConfig, SyncError};
use clap::{Args, Parser, Subcommand};
use events::{MessageChunk, MessageComplete, MessageNew, ServerError};
use serde_json::Value;
use tokio::sync::broadcast;

#[cfg(test)]
#[path = "main_test.rs"]
mod main_test;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("missing token; pass --token or set CHATSYNC_TOKEN")]
    MissingToken,
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{code}: {source}")]
    Sync { code: &'static str, source: SyncError },
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("health check failed with HTTP {0}")]
    Unhealthy(u16),
}

impl From<SyncError> for CliError {
    fn from(source: SyncError) -> Self {
        Self::Sync { code: source.error_code(), source }
    }
}

#[derive(Parser, Debug)]
#[command(name = "chat-cli", about = "Chat sync core operator CLI")]
struct Cli {
    #[arg(long, env = "CHATSYNC_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    #[arg(long, env = "CHATSYNC_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Ping,
    Conversations(ConversationsCommand),
    /// Print a conversation's history.
    History { conversation_id: String },
    /// Send a message and stream the reply to stdout. Ctrl-C aborts.
    Send { conversation_id: String, content: String },
    /// Join a conversation room and print channel traffic until Ctrl-C.
    Watch { conversation_id: String },
}

#[derive(Args, Debug)]
struct ConversationsCommand {
    #[command(subcommand)]
    command: ConversationsSubcommand,
}

#[derive(Subcommand, Debug)]
enum ConversationsSubcommand {
    List,
    Move {
        conversation_id: String,
        #[arg(long, help = "Current project; omit for ungrouped")]
        from: Option<String>,
        #[arg(long, help = "Target project; omit for ungrouped")]
        to: Option<String>,
    },
    Rename {
        conversation_id: String,
        #[arg(long)]
        title: String,
    },
    Retag {
        conversation_id: String,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    if let Command::Ping = cli.command {
        return run_ping(&cli.base_url).await;
    }

    let token = cli.token.ok_or(CliError::MissingToken)?;
    let config = SyncConfig { base_url: cli.base_url.trim_end_matches('/').to_owned(), ..SyncConfig::from_env() };
    let client = SyncClient::new(config, CredentialStore::with(Credential::new(token)))?;

    match cli.command {
        Command::Ping => Ok(()),
        Command::Conversations(command) => run_conversations(&client, command).await,
        Command::History { conversation_id } => {
            let messages = client.open_conversation(&conversation_id).await?;
            print_json(&serde_json::to_value(messages)?)
        }
        Command::Send { conversation_id, content } => run_send(&client, &conversation_id, &content).await,
        Command::Watch { conversation_id } => run_watch(&client, &conversation_id).await,
    }
}

async fn run_ping(base_url: &str) -> Result<(), CliError> {
    let client = reqwest::Client::new();
    let url = format!("{}/healthz", base_url.trim_end_matches('/'));
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::Unhealthy(status.as_u16()));
    }
    println!("ok");
    Ok(())
}

async fn run_conversations(client: &SyncClient, command: ConversationsCommand) -> Result<(), CliError> {
    let listed = client.refresh_conversations().await?;
    let summary = match command.command {
        ConversationsSubcommand::List => return print_json(&serde_json::to_value(listed)?),
        ConversationsSubcommand::Move { conversation_id, from, to } => {
            client
                .move_conversation(&conversation_id, from.as_deref(), to.as_deref())
                .await?
        }
        ConversationsSubcommand::Rename { conversation_id, title } => {
            client.rename_conversation(&conversation_id, &title).await?
        }
        ConversationsSubcommand::Retag { conversation_id, tags } => {
            client.retag_conversation(&conversation_id, tags).await?
        }
    };
    print_json(&serde_json::to_value(summary)?)
}

async fn run_send(client: &SyncClient, conversation_id: &str, content: &str) -> Result<(), CliError> {
    let mut chunks = client.bus().subscribe::<MessageChunk>();
    let printer = tokio::spawn(async move {
        let mut stdout = io::stdout();
        while let Ok(chunk) = chunks.recv().await {
            let _ = write!(stdout, "{}", chunk.chunk);
            let _ = stdout.flush();
        }
    });

    let send = client.send_streaming(conversation_id, content);
    tokio::pin!(send);
    let result = loop {
        tokio::select! {
            result = &mut send => break result,
            _ = tokio::signal::ctrl_c() => {
                client.abort_stream(conversation_id);
            }
        }
    };
    printer.abort();
    println!();

    match result? {
        StreamOutcome::Completed(complete) => {
            eprintln!(
                "completed: user_message={} assistant_message={} tokens={}",
                complete.user_message.id, complete.assistant_message.id, complete.assistant_message.tokens_used
            );
        }
        StreamOutcome::Aborted => eprintln!("aborted"),
        StreamOutcome::Failed(reason) | StreamOutcome::Interrupted(reason) => eprintln!("failed: {reason}"),
    }
    Ok(())
}

async fn run_watch(client: &SyncClient, conversation_id: &str) -> Result<(), CliError> {
    let bus = client.bus();
    let mut lifecycle = bus.subscribe::<ConnectionEvent>();
    let mut chunks = bus.subscribe::<MessageChunk>();
    let mut completions = bus.subscribe::<MessageComplete>();
    let mut messages = bus.subscribe::<MessageNew>();
    let mut errors = bus.subscribe::<ServerError>();

    client.connect().await?;
    let history = client.open_conversation(conversation_id).await?;
    eprintln!("joined {conversation_id}: {} messages in history", history.len());

    loop {
        tokio::select! {
            event = lifecycle.recv() => {
                if let Some(event) = received(event) {
                    eprintln!("connection: {event:?}");
                }
            }
            chunk = chunks.recv() => {
                if let Some(chunk) = received(chunk) {
                    print!("{}", chunk.chunk);
                    let _ = io::stdout().flush();
                }
            }
            complete = completions.recv() => {
                if let Some(complete) = received(complete) {
                    println!();
                    eprintln!("complete: {}", complete.assistant_message.id);
                }
            }
            new = messages.recv() => {
                if let Some(new) = received(new) {
                    println!("[{:?}] {}", new.message.role, new.message.content);
                }
            }
            error = errors.recv() => {
                if let Some(error) = received(error) {
                    eprintln!("server error: {}", error.message);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.close_conversation(conversation_id);
    client.disconnect().await;
    Ok(())
}

fn received<T>(result: Result<T, broadcast::error::RecvError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "watch output fell behind");
            None
        }
        Err(broadcast::error::RecvError::Closed) => None,
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
