use std::time::Duration;

use clap::Args;
use felt_trie::{bits::MAX_HEIGHT, config::DEFAULT_CACHE_CAPACITY, TrieConfig};
use serde::{Deserialize, Serialize};

use crate::SyncError;

const HELP_HEADING: &str = "Synchronizer options";

/// Runtime configuration of a [`Synchronizer`](crate::Synchronizer).
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Height of the state trie.
    pub trie_height: usize,
    /// Committed trie nodes kept decoded in memory.
    pub cache_capacity: usize,
    /// First sequence number to synchronize.
    pub start_sequence: u64,
    /// Commit the trie after this many applied batches. Batches whose L1
    /// root is already known are always committed.
    pub commit_interval: usize,
    /// Stop at the first local root that disagrees with L1.
    pub halt_on_mismatch: bool,
    /// How many unmatched roots to remember on each side.
    pub root_retention: usize,
    /// Delay between polls of an upstream that had nothing new.
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            trie_height: MAX_HEIGHT,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            start_sequence: 0,
            commit_interval: 1,
            halt_on_mismatch: true,
            root_retention: 256,
            poll_interval: Duration::from_secs(2),
        }
    }
}

impl SyncConfig {
    pub fn trie_config(&self) -> TrieConfig {
        TrieConfig {
            height: self.trie_height,
            cache_capacity: self.cache_capacity,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), SyncError> {
        if self.commit_interval == 0 {
            return Err(SyncError::InvalidConfig(
                "commit interval must be non-zero".into(),
            ));
        }
        if self.root_retention == 0 {
            return Err(SyncError::InvalidConfig(
                "root retention must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Command line and environment form of [`SyncConfig`].
#[derive(Args, Clone, PartialEq, Eq, Debug)]
pub struct CliSyncConfig {
    /// Height of the state trie, in bits.
    #[arg(long, env="STATE_SYNC_TRIE_HEIGHT", help_heading = HELP_HEADING, default_value_t = MAX_HEIGHT)]
    trie_height: usize,
    /// Number of committed trie nodes kept in memory.
    #[arg(long, env="STATE_SYNC_CACHE_CAPACITY", help_heading = HELP_HEADING, default_value_t = DEFAULT_CACHE_CAPACITY)]
    cache_capacity: usize,
    /// First L2 sequence number to synchronize.
    #[arg(long, env="STATE_SYNC_START_SEQUENCE", help_heading = HELP_HEADING, default_value_t = 0)]
    start_sequence: u64,
    /// Number of batches applied between two trie commits.
    #[arg(long, env="STATE_SYNC_COMMIT_INTERVAL", help_heading = HELP_HEADING, default_value_t = 1)]
    commit_interval: usize,
    /// Keep going when a local root disagrees with the root published on L1.
    #[arg(long, env="STATE_SYNC_CONTINUE_ON_MISMATCH", help_heading = HELP_HEADING, default_value_t = false)]
    continue_on_mismatch: bool,
    /// Number of unmatched state roots remembered on each side.
    #[arg(long, env="STATE_SYNC_ROOT_RETENTION", help_heading = HELP_HEADING, default_value_t = 256)]
    root_retention: usize,
    /// Milliseconds to wait before polling an upstream that had nothing new.
    #[arg(long, env="STATE_SYNC_POLL_INTERVAL_MS", help_heading = HELP_HEADING, default_value_t = 2000)]
    poll_interval_ms: u64,
}

impl From<CliSyncConfig> for SyncConfig {
    fn from(cli: CliSyncConfig) -> Self {
        Self {
            trie_height: cli.trie_height,
            cache_capacity: cli.cache_capacity,
            start_sequence: cli.start_sequence,
            commit_interval: cli.commit_interval,
            halt_on_mismatch: !cli.continue_on_mismatch,
            root_retention: cli.root_retention,
            poll_interval: Duration::from_millis(cli.poll_interval_ms),
        }
    }
}
