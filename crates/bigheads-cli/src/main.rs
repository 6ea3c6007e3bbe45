//! Command-line control surface for a BigHeads mesh node: boots the
//! `Coordinator` (Store, Transport, Mesh engine) and exposes its actions
//! as subcommands.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use bigheads_core::config::{Config, StorageRoot};
use bigheads_core::mesh::ExportFormat;
use bigheads_core::runtime::Action;
use bigheads_core::{Coordinator, Event};

/// BigHeads - peer-to-peer chat over a Bluetooth LE mesh
#[derive(Parser)]
#[command(name = "bigheads")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Storage directory holding bigheads.db, config.json, and exports/
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node until interrupted, printing mesh events as they arrive.
    Run,

    /// Send a text message. Use "*" as the recipient to broadcast.
    Send {
        to: String,
        text: String,
    },

    /// Send a file, or an image when --image is set.
    SendFile {
        to: String,
        path: PathBuf,
        #[arg(long)]
        image: bool,
    },

    /// React to a previously received message.
    React {
        to: String,
        msg_id: String,
        reaction: String,
    },

    /// Search a chat's message history for a substring.
    Search {
        chat_id: String,
        term: String,
    },

    /// Print recent messages for a chat directly from the store.
    History {
        chat_id: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Export a chat's full history to the storage root's exports/ dir.
    Export {
        chat_id: String,
        #[arg(long, default_value = "json")]
        format: String,
    },

    /// List known contacts.
    Contacts,

    /// Block (or with --unblock, unblock) a contact.
    Block {
        node_id: String,
        #[arg(long)]
        unblock: bool,
    },

    /// Delete message history. Contacts, routing, and sessions survive.
    ClearHistory,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose { "debug" } else { "info" })
        .init();

    let storage_root = StorageRoot::new(cli.storage_dir.unwrap_or_else(default_storage_dir));
    let config = Config::load(&storage_root.config_path())?;

    let (coordinator, mut events) = Coordinator::new(config, storage_root).await?;
    coordinator.start().await?;

    let result = run_command(&coordinator, &mut events, cli.command).await;

    coordinator.shutdown().await;
    result
}

fn default_storage_dir() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("bigheads")
}

async fn run_command(
    coordinator: &Arc<Coordinator>,
    events: &mut mpsc::Receiver<Event>,
    command: Commands,
) -> anyhow::Result<()> {
    match command {
        Commands::Run => {
            tracing::info!("node running, press ctrl-c to stop");
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("shutting down");
                        return Ok(());
                    }
                    Some(event) = events.recv() => print_event(&event),
                }
            }
        }
        Commands::Send { to, text } => {
            coordinator.dispatch(Action::SendText { to, text });
            drain_events(events, Duration::from_secs(2)).await;
        }
        Commands::SendFile { to, path, image } => {
            if !path.exists() {
                anyhow::bail!("file not found: {}", path.display());
            }
            coordinator.dispatch(Action::SendFile { to, path, as_image: image });
            drain_events(events, Duration::from_secs(2)).await;
        }
        Commands::React { to, msg_id, reaction } => {
            coordinator.dispatch(Action::Reaction { to, msg_id, reaction });
            drain_events(events, Duration::from_secs(1)).await;
        }
        Commands::Search { chat_id, term } => {
            coordinator.dispatch(Action::Search { chat_id, term });
            drain_events(events, Duration::from_secs(1)).await;
        }
        Commands::History { chat_id, limit } => {
            for row in coordinator.store().get_chat_messages(&chat_id, limit)? {
                println!("[{:.0}] {}: {}", row.timestamp, row.sender, row.payload);
            }
        }
        Commands::Export { chat_id, format } => {
            let fmt = match format.as_str() {
                "html" => ExportFormat::Html,
                _ => ExportFormat::Json,
            };
            coordinator.dispatch(Action::Export { chat_id, fmt });
            drain_events(events, Duration::from_secs(1)).await;
        }
        Commands::Contacts => {
            for contact in coordinator.store().list_contacts()? {
                let suffix = if contact.blocked { " (blocked)" } else { "" };
                println!("{}{suffix}", contact.node_id);
            }
        }
        Commands::Block { node_id, unblock } => {
            coordinator.store().set_blocked(&node_id, !unblock)?;
        }
        Commands::ClearHistory => {
            coordinator.dispatch(Action::ClearHistory);
        }
    }
    Ok(())
}

/// Drain and print whatever events arrive within `window`, then return.
/// Used by one-shot subcommands that dispatch an action and want to show
/// its result without turning into a long-running daemon.
async fn drain_events(events: &mut mpsc::Receiver<Event>, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(event)) => print_event(&event),
            _ => return,
        }
    }
}

fn print_event(event: &Event) {
    match event {
        Event::PeerHello { node_id, timestamp } => {
            tracing::info!(node_id = %node_id, timestamp = *timestamp, "peer hello")
        }
        Event::Message { env } => println!("{} -> {}: {}", env.from, env.to, env.payload),
        Event::Reaction { env } => println!("{} reacted: {}", env.from, env.payload),
        Event::Typing { env } => tracing::debug!(from = %env.from, "typing"),
        Event::PeersChanged(peers) => tracing::info!(count = peers.len(), "peers changed"),
        Event::SearchResults(rows) | Event::History(rows) => {
            for row in rows {
                println!("[{:.0}] {}: {}", row.timestamp, row.sender, row.payload);
            }
        }
        Event::Toast(message) => println!("{message}"),
        Event::Exported(path) => println!("exported to {}", path.display()),
    }
}
