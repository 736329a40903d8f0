//! versync - headless controller for version record synchronization.
//!
//! Runs the sync loop against a target process, keeps the dataset on disk,
//! and offers offline merge/export of JSON documents.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use versync_core::{
    InjectConnector, ShutdownToken, SyncConfig, SyncNotice, SyncSession, SystemDiscovery,
    VersionStore,
};

#[derive(Parser, Debug)]
#[command(name = "versync")]
#[command(about = "Synchronize version records and tag keys from a target process")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the sync loop until interrupted
    Run {
        /// Name of the target process to discover
        #[arg(long, default_value = SyncConfig::TARGET_PROCESS_NAME)]
        process_name: String,

        /// Connect to this pid immediately instead of waiting for discovery
        #[arg(long)]
        pid: Option<u32>,

        /// Dataset file: imported on startup if present, exported on shutdown
        #[arg(long, default_value = "versions.json")]
        state: PathBuf,
    },

    /// Merge one or more JSON documents into a single sorted export
    Merge {
        /// Output document
        #[arg(short, long)]
        output: PathBuf,

        /// Input documents
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    match args.command {
        Command::Run {
            process_name,
            pid,
            state,
        } => run_sync(process_name, pid, state).await,
        Command::Merge { output, inputs } => merge_documents(output, inputs),
    }
}

async fn run_sync(process_name: String, pid: Option<u32>, state: PathBuf) -> Result<()> {
    let (mut session, mut notices) = SyncSession::new(
        process_name.clone(),
        Box::new(SystemDiscovery::new()),
        Box::new(InjectConnector),
    );

    if state.exists() {
        let merged = session.import(&state)?;
        info!("loaded {} record(s) from {}", merged, state.display());
    }

    // Surface loop notices as log lines.
    tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            match notice {
                SyncNotice::Connected { pid } => info!("connected to process {}", pid),
                SyncNotice::ConnectFailed { pid, reason } => {
                    warn!("connection to process {} failed: {}", pid, reason)
                }
                SyncNotice::ConnectionLost { pid } => {
                    warn!("connection to process {} lost", pid)
                }
                SyncNotice::DumpRejected { source, reason } => {
                    warn!("rejected dump from {}: {}", source, reason)
                }
            }
        }
    });

    if let Some(pid) = pid {
        if let Err(e) = session.connect_to(pid).await {
            error!("manual connect to {} failed: {}", pid, e);
        }
    }

    let shutdown = ShutdownToken::new();
    let handler_token = shutdown.clone();
    ctrlc::set_handler(move || handler_token.request())?;

    info!("watching for '{}' (Ctrl-C to stop)", process_name);
    session.run(shutdown).await;

    session.disconnect().await;
    session.export(&state)?;
    info!(
        "exported {} record(s) and {} tag key(s) to {}",
        session.store().record_count(),
        session.store().tag_keys.len(),
        state.display()
    );
    Ok(())
}

fn merge_documents(output: PathBuf, inputs: Vec<PathBuf>) -> Result<()> {
    let mut merged = VersionStore::new();
    for input in &inputs {
        let mut store = VersionStore::load(input)?;
        store.trim_versions();
        info!("merging {} record(s) from {}", store.record_count(), input.display());
        merged.merge_from(store);
    }
    merged.sort_versions();
    merged.save(&output)?;
    info!(
        "wrote {} record(s) and {} tag key(s) to {}",
        merged.record_count(),
        merged.tag_keys.len(),
        output.display()
    );
    Ok(())
}
