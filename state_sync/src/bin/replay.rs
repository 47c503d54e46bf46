//! Replays a recording of L2 state batches and L1 state roots through a
//! [`Synchronizer`] backed by an in-memory store, then prints the final
//! status as JSON.

use std::{fs::File, io::BufReader, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueHint};
use dotenvy::dotenv;
use felt_trie::MemoryDb;
use futures::stream;
use serde::Deserialize;
use state_sync::{
    BatchStream, CliSyncConfig, HeaderSource, L1StateUpdate, RootStream, StateBatch,
    StateProvider, SyncConfig, Synchronizer,
};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser)]
#[command(version)]
struct Cli {
    /// JSON file with the recorded `batches` and L1 `updates`.
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    file_path: PathBuf,
    #[command(flatten)]
    sync: CliSyncConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Recording {
    batches: Vec<StateBatch>,
    updates: Vec<L1StateUpdate>,
}

impl HeaderSource for Recording {
    async fn subscribe(&self, from: u64) -> anyhow::Result<RootStream> {
        let updates: Vec<_> = self
            .updates
            .iter()
            .filter(|update| update.sequence >= from)
            .copied()
            .collect();

        Ok(Box::pin(stream::iter(updates.into_iter().map(anyhow::Ok))))
    }
}

impl StateProvider for Recording {
    async fn batches(&self, from: u64) -> anyhow::Result<BatchStream> {
        let batches: Vec<_> = self
            .batches
            .iter()
            .filter(|batch| batch.sequence >= from)
            .cloned()
            .collect();

        Ok(Box::pin(stream::iter(batches.into_iter().map(anyhow::Ok))))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    state_sync::tracing::init();

    let args = Cli::parse();
    let config = SyncConfig::from(args.sync);

    let file = File::open(&args.file_path)
        .with_context(|| format!("Failed to open {}", args.file_path.display()))?;
    let recording: Recording =
        serde_json::from_reader(BufReader::new(file)).context("Failed to parse the recording")?;
    info!(
        batches = recording.batches.len(),
        updates = recording.updates.len(),
        "Replaying recording"
    );

    let (stop_tx, stop) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupted, stopping");
                stop_tx.send_replace(true);
            }
            Err(e) => {
                warn!("Cannot listen for interrupts: {e}");
                stop_tx.closed().await;
            }
        }
    });

    let mut sync = Synchronizer::new(MemoryDb::default(), config)?;
    let status = sync.run(&recording, &recording, stop).await?;

    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
