//! The two upstreams of a [`Synchronizer`](crate::Synchronizer): roots
//! published on L1 and the L2 state batches they commit to.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use async_stream::try_stream;
use felt_trie::Felt;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A state root the L1 contract accepted for an L2 sequence number.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct L1StateUpdate {
    pub sequence: u64,
    pub state_root: Felt,
}

/// Storage writes of one L2 sequence number. Writing `0` deletes a key.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct StateBatch {
    pub sequence: u64,
    pub writes: Vec<(Felt, Felt)>,
}

pub type RootStream = Pin<Box<dyn Stream<Item = anyhow::Result<L1StateUpdate>> + Send>>;

pub type BatchStream = Pin<Box<dyn Stream<Item = anyhow::Result<StateBatch>> + Send>>;

pub trait HeaderSource {
    /// Streams L1 state updates starting at sequence `from`, in order.
    fn subscribe(&self, from: u64) -> impl Future<Output = anyhow::Result<RootStream>> + Send;
}

pub trait StateProvider {
    /// Streams state batches starting at sequence `from`, in order.
    fn batches(&self, from: u64) -> impl Future<Output = anyhow::Result<BatchStream>> + Send;
}

/// Point lookups against an L1 node.
pub trait L1Client: Send + Sync + 'static {
    /// The state update for `sequence`, or `None` if it is not on L1 yet.
    fn state_update(
        &self,
        sequence: u64,
    ) -> impl Future<Output = anyhow::Result<Option<L1StateUpdate>>> + Send;
}

/// Point lookups against an L2 node.
pub trait L2Client: Send + Sync + 'static {
    /// The batch for `sequence`, or `None` if it has not been produced yet.
    fn state_batch(
        &self,
        sequence: u64,
    ) -> impl Future<Output = anyhow::Result<Option<StateBatch>>> + Send;
}

/// Turns a client that can only be asked for one sequence number at a time
/// into a never-ending stream, polling for the next number until it appears.
#[derive(Debug)]
pub struct Poller<C> {
    client: Arc<C>,
    poll_interval: Duration,
}

impl<C> Clone for Poller<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            poll_interval: self.poll_interval,
        }
    }
}

impl<C> Poller<C> {
    pub fn new(client: C, poll_interval: Duration) -> Self {
        Self {
            client: Arc::new(client),
            poll_interval,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

impl<C: L1Client> HeaderSource for Poller<C> {
    async fn subscribe(&self, from: u64) -> anyhow::Result<RootStream> {
        let client = Arc::clone(&self.client);
        let poll_interval = self.poll_interval;

        Ok(Box::pin(try_stream! {
            let mut next = from;
            loop {
                match client.state_update(next).await? {
                    Some(update) => {
                        next = update.sequence + 1;
                        yield update;
                    }
                    None => {
                        debug!(sequence = next, "Waiting for the state update to reach L1");
                        tokio::time::sleep(poll_interval).await;
                    }
                }
            }
        }))
    }
}

impl<C: L2Client> StateProvider for Poller<C> {
    async fn batches(&self, from: u64) -> anyhow::Result<BatchStream> {
        let client = Arc::clone(&self.client);
        let poll_interval = self.poll_interval;

        Ok(Box::pin(try_stream! {
            let mut next = from;
            loop {
                match client.state_batch(next).await? {
                    Some(batch) => {
                        next = batch.sequence + 1;
                        yield batch;
                    }
                    None => {
                        debug!(sequence = next, "Waiting for the next state batch");
                        tokio::time::sleep(poll_interval).await;
                    }
                }
            }
        }))
    }
}
