use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use client_core::{
    load_settings, EngineDrivers, EngineEvent, FileStore, KeyValueStore, MemoryStore,
    SessionEngine,
};
use shared::domain::{ContactInfo, PreferredServer};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    /// Key-value store file; the session is kept in memory when omitted.
    #[arg(long)]
    store: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Starts a session and prints what it reports until interrupted.
    Connect {
        /// Channel path, e.g. `acme` or `sandbox/acme`.
        channel: String,
        #[arg(long, default_value = "")]
        token: String,
        #[arg(long, value_enum, default_value_t = ServerArg::Auto)]
        server: ServerArg,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Prints what the store keeps for the next start.
    Show,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ServerArg {
    Auto,
    Europe,
    Russia,
    Asia,
}

impl From<ServerArg> for PreferredServer {
    fn from(server: ServerArg) -> Self {
        match server {
            ServerArg::Auto => Self::Auto,
            ServerArg::Europe => Self::Europe,
            ServerArg::Russia => Self::Russia,
            ServerArg::Asia => Self::Asia,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();
    let settings = load_settings().context("failed to load session settings")?;

    let store_path = cli.store.or_else(|| settings.store_path.clone());
    let store: Box<dyn KeyValueStore> = match &store_path {
        Some(path) => Box::new(
            FileStore::open(path)
                .with_context(|| format!("failed to open store {}", path.display()))?,
        ),
        None => Box::new(MemoryStore::new()),
    };

    match cli.command {
        Command::Show => {
            let Some(path) = store_path else {
                println!("no store configured");
                return Ok(());
            };
            let raw = std::fs::read_to_string(&path).unwrap_or_default();
            if raw.trim().is_empty() {
                println!("store {} is empty", path.display());
            } else {
                let entries: serde_json::Value = serde_json::from_str(&raw)?;
                println!("{}", serde_json::to_string_pretty(&entries)?);
            }
        }
        Command::Connect {
            channel,
            token,
            server,
            name,
            email,
        } => {
            let drivers = EngineDrivers::websocket(&settings);
            let engine = SessionEngine::spawn(settings, drivers, store);
            let mut events = engine.subscribe_events();
            let mut session_events = engine.subscribe_session();

            engine.set_preferred_server(server.into())?;
            engine.setup(channel, token)?;
            engine.establish_connection()?;
            if name.is_some() || email.is_some() {
                engine.set_contact_info(ContactInfo {
                    name: name.unwrap_or_default(),
                    email: email.unwrap_or_default(),
                    ..ContactInfo::default()
                })?;
            }

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.recv() => match event {
                        Ok(EngineEvent::Subject(subject)) => println!("subject: {subject:?}"),
                        Ok(EngineEvent::Transaction(batch)) => {
                            for bundle in batch {
                                println!("[{}] {:?}", bundle.tag, bundle.subject);
                            }
                        }
                        Ok(EngineEvent::Unhandled(subject)) => println!("unhandled: {subject:?}"),
                        Err(RecvError::Lagged(skipped)) => warn!(skipped, "cli: events lagged"),
                        Err(RecvError::Closed) => break,
                    },
                    change = session_events.recv() => match change {
                        Ok(change) => println!("session: {change:?}"),
                        Err(RecvError::Lagged(skipped)) => warn!(skipped, "cli: session events lagged"),
                        Err(RecvError::Closed) => break,
                    },
                }
            }

            let snapshot = engine.snapshot().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            engine.shutdown()?;
        }
    }

    Ok(())
}
