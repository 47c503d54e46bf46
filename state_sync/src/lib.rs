//! Keeps a [`felt_trie`] state in step with an L2 network and checks it
//! against the state roots that network publishes on L1.
//!
//! A [`Synchronizer`] consumes two independent upstreams:
//! - a [`StateProvider`], streaming the storage writes of each L2 sequence
//!   number as a [`StateBatch`],
//! - a [`HeaderSource`], streaming the roots accepted on L1 as
//!   [`L1StateUpdate`]s.
//!
//! Batches are applied in order to the shared trie, which is committed every
//! [`SyncConfig::commit_interval`] batches. Every committed root is compared
//! with the L1 root for the same sequence number as soon as both are known.
//!
//! Clients that can only be asked for one sequence number at a time are
//! turned into upstreams with a [`Poller`].

pub mod config;
pub mod source;
pub mod sync;
pub mod tracing;

pub use config::{CliSyncConfig, SyncConfig};
pub use source::{
    BatchStream, HeaderSource, L1Client, L1StateUpdate, L2Client, Poller, RootStream, StateBatch,
    StateProvider,
};
pub use sync::{SharedTrie, SyncError, SyncStatus, Synchronizer};
