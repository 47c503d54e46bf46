use std::{collections::BTreeMap, sync::Arc};

use felt_trie::{BinaryTrie, Db, Felt, TrieError};
use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use crate::{
    config::SyncConfig,
    source::{HeaderSource, L1StateUpdate, StateBatch, StateProvider},
};

/// The state trie, shared between the synchronizer (the only writer) and any
/// number of readers.
pub type SharedTrie<D> = Arc<RwLock<BinaryTrie<D>>>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Trie(#[from] TrieError),

    #[error("upstream failed: {0:#}")]
    Upstream(#[from] anyhow::Error),

    #[error("local state root {local} for sequence {sequence} does not match the L1 root {remote}")]
    RootMismatch {
        sequence: u64,
        local: Felt,
        remote: Felt,
    },

    #[error("expected state batch {expected}, got {found}")]
    SequenceGap { expected: u64, found: u64 },

    #[error("invalid synchronizer config: {0}")]
    InvalidConfig(String),
}

/// Progress of a [`Synchronizer`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct SyncStatus {
    /// Last state batch applied to the trie.
    pub applied_sequence: Option<u64>,
    /// Last sequence the trie was committed at.
    pub committed_sequence: Option<u64>,
    pub committed_root: Felt,
    /// Committed roots found equal to their L1 root.
    pub matched: u64,
    /// Committed roots found different from their L1 root.
    pub mismatched: u64,
    /// L1 roots that arrived for a sequence with no committed local root.
    pub unverified: u64,
}

/// Applies L2 state batches to the state trie and checks the committed roots
/// against the roots published on L1.
///
/// The two upstreams are independent, so a root may show up on either side
/// first. Each side keeps the roots still waiting for the other.
pub struct Synchronizer<D: Db> {
    trie: SharedTrie<D>,
    config: SyncConfig,
    local_roots: BTreeMap<u64, Felt>,
    remote_roots: BTreeMap<u64, Felt>,
    uncommitted: usize,
    status: SyncStatus,
}

impl<D: Db> Synchronizer<D> {
    /// Starts from an empty state at `config.start_sequence`.
    pub fn new(db: D, config: SyncConfig) -> Result<Self, SyncError> {
        config.validate()?;
        let trie = BinaryTrie::new(db, config.trie_config())?;

        Ok(Self::with_trie(trie, config))
    }

    /// Picks up after `sequence`, whose committed root `root` is in `db`.
    pub fn resume(db: D, config: SyncConfig, root: Felt, sequence: u64) -> Result<Self, SyncError> {
        config.validate()?;
        let trie = BinaryTrie::open(db, config.trie_config(), root)?;

        let mut sync = Self::with_trie(trie, config);
        sync.status.applied_sequence = Some(sequence);
        sync.status.committed_sequence = Some(sequence);
        sync.status.committed_root = root;
        sync.local_roots.insert(sequence, root);

        Ok(sync)
    }

    fn with_trie(trie: BinaryTrie<D>, config: SyncConfig) -> Self {
        Self {
            trie: Arc::new(RwLock::new(trie)),
            config,
            local_roots: BTreeMap::new(),
            remote_roots: BTreeMap::new(),
            uncommitted: 0,
            status: SyncStatus::default(),
        }
    }

    /// A handle for reading the state while the synchronizer runs.
    pub fn trie(&self) -> SharedTrie<D> {
        Arc::clone(&self.trie)
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Hands back the store, or `None` while readers still hold the trie.
    pub fn into_db(self) -> Option<D> {
        Arc::try_unwrap(self.trie)
            .ok()
            .map(|trie| trie.into_inner().into_db())
    }

    fn next_sequence(&self) -> u64 {
        self.status
            .applied_sequence
            .map_or(self.config.start_sequence, |applied| applied + 1)
    }

    /// Follows both upstreams until they end, `stop` turns true or its sender
    /// goes away, or an error occurs. Pending writes are committed on the way
    /// out.
    pub async fn run<H, P>(
        &mut self,
        headers: &H,
        provider: &P,
        mut stop: watch::Receiver<bool>,
    ) -> Result<SyncStatus, SyncError>
    where
        H: HeaderSource,
        P: StateProvider,
    {
        let from = self.next_sequence();
        let l1_from = self.status.committed_sequence.unwrap_or(from);
        info!(from, l1_from, "Starting synchronizer");

        let mut roots = headers.subscribe(l1_from).await?;
        let mut batches = provider.batches(from).await?;
        let mut roots_done = false;
        let mut batches_done = false;

        while !(roots_done && batches_done) {
            if *stop.borrow_and_update() {
                info!("Stop requested");
                break;
            }

            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() {
                        info!("Stop signal dropped");
                        break;
                    }
                }
                update = roots.next(), if !roots_done => match update {
                    Some(update) => self.observe_state_update(update?)?,
                    None => {
                        debug!("L1 root stream ended");
                        roots_done = true;
                    }
                },
                batch = batches.next(), if !batches_done => match batch {
                    Some(batch) => self.apply_batch(batch?).await?,
                    None => {
                        debug!("State batch stream ended");
                        batches_done = true;
                    }
                },
            }
        }

        self.close().await?;
        Ok(self.status)
    }

    /// Applies the next batch under the write lock, committing when the
    /// commit interval is reached or when L1 already published its root.
    ///
    /// A batch whose commit fails stays applied and is committed by a later
    /// batch or by [`close`](Self::close).
    pub async fn apply_batch(&mut self, batch: StateBatch) -> Result<(), SyncError> {
        let StateBatch { sequence, writes } = batch;

        if let Some(applied) = self.status.applied_sequence {
            if sequence <= applied {
                warn!(sequence, applied, "Skipping state batch that was already applied");
                return Ok(());
            }
        }
        let expected = self.next_sequence();
        if sequence != expected {
            return Err(SyncError::SequenceGap {
                expected,
                found: sequence,
            });
        }

        let num_writes = writes.len();
        let mut trie = self.trie.write().await;
        trie.extend(writes)?;
        self.status.applied_sequence = Some(sequence);
        self.uncommitted += 1;
        debug!(sequence, writes = num_writes, "Applied state batch");

        if self.uncommitted < self.config.commit_interval
            && !self.remote_roots.contains_key(&sequence)
        {
            return Ok(());
        }

        let root = trie.commit()?;
        drop(trie);
        self.uncommitted = 0;

        self.on_committed(sequence, root)
    }

    /// Records a root published on L1, checking it right away if the local
    /// root for that sequence is known.
    pub fn observe_state_update(&mut self, update: L1StateUpdate) -> Result<(), SyncError> {
        let L1StateUpdate {
            sequence,
            state_root,
        } = update;
        debug!(sequence, state_root = %state_root, "State root retrieved from L1");

        if let Some(local) = self.local_roots.remove(&sequence) {
            return self.reconcile(sequence, local, state_root);
        }

        if self
            .status
            .applied_sequence
            .is_some_and(|applied| sequence <= applied)
        {
            warn!(sequence, "No committed local root for this sequence, cannot verify it");
            self.status.unverified += 1;
            return Ok(());
        }

        self.remote_roots.insert(sequence, state_root);
        retain_newest(&mut self.remote_roots, self.config.root_retention);
        Ok(())
    }

    /// Commits anything still pending.
    pub async fn close(&mut self) -> Result<(), SyncError> {
        info!("Closing Layer 1 synchronizer");

        if self.uncommitted == 0 {
            return Ok(());
        }
        let Some(sequence) = self.status.applied_sequence else {
            return Ok(());
        };

        let root = self.trie.write().await.commit()?;
        self.uncommitted = 0;
        self.on_committed(sequence, root)
    }

    fn on_committed(&mut self, sequence: u64, root: Felt) -> Result<(), SyncError> {
        self.status.committed_sequence = Some(sequence);
        self.status.committed_root = root;
        info!(sequence, root = %root, "Committed state trie");

        match self.remote_roots.remove(&sequence) {
            Some(remote) => self.reconcile(sequence, root, remote),
            None => {
                self.local_roots.insert(sequence, root);
                retain_newest(&mut self.local_roots, self.config.root_retention);
                Ok(())
            }
        }
    }

    fn reconcile(&mut self, sequence: u64, local: Felt, remote: Felt) -> Result<(), SyncError> {
        if local == remote {
            self.status.matched += 1;
            info!(sequence, root = %local, "State root matches L1");
            return Ok(());
        }

        self.status.mismatched += 1;
        error!(sequence, local = %local, remote = %remote, "State root does not match L1");

        match self.config.halt_on_mismatch {
            true => Err(SyncError::RootMismatch {
                sequence,
                local,
                remote,
            }),
            false => Ok(()),
        }
    }
}

fn retain_newest(roots: &mut BTreeMap<u64, Felt>, limit: usize) {
    while roots.len() > limit {
        roots.pop_first();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use felt_trie::{DbResult, MemoryDb, TrieConfig};
    use futures::stream;

    use super::*;
    use crate::source::{BatchStream, RootStream};

    fn felt(v: u64) -> Felt {
        Felt::from(v)
    }

    fn batches() -> Vec<StateBatch> {
        vec![
            StateBatch {
                sequence: 0,
                writes: vec![(felt(1), felt(10)), (felt(2), felt(20))],
            },
            StateBatch {
                sequence: 1,
                writes: vec![(felt(3), felt(30))],
            },
            StateBatch {
                sequence: 2,
                writes: vec![(felt(1), Felt::ZERO), (felt(4), felt(40))],
            },
            StateBatch {
                sequence: 3,
                writes: vec![(felt(2), felt(21))],
            },
        ]
    }

    /// Roots of `batches` computed on a standalone trie.
    fn expected_roots(batches: &[StateBatch]) -> Vec<Felt> {
        let mut trie = BinaryTrie::new(MemoryDb::default(), TrieConfig::default()).unwrap();
        batches
            .iter()
            .map(|batch| {
                trie.extend(batch.writes.iter().copied()).unwrap();
                trie.commit().unwrap()
            })
            .collect()
    }

    fn updates(roots: &[Felt]) -> Vec<L1StateUpdate> {
        roots
            .iter()
            .enumerate()
            .map(|(sequence, root)| L1StateUpdate {
                sequence: sequence as u64,
                state_root: *root,
            })
            .collect()
    }

    fn synchronizer(config: SyncConfig) -> Synchronizer<MemoryDb> {
        Synchronizer::new(MemoryDb::default(), config).unwrap()
    }

    /// Finite upstreams serving fixed data.
    struct Fixed {
        updates: Vec<L1StateUpdate>,
        batches: Vec<StateBatch>,
    }

    impl HeaderSource for Fixed {
        async fn subscribe(&self, from: u64) -> anyhow::Result<RootStream> {
            let updates: Vec<_> = self
                .updates
                .iter()
                .copied()
                .filter(|u| u.sequence >= from)
                .collect();
            Ok(Box::pin(stream::iter(updates.into_iter().map(anyhow::Ok))))
        }
    }

    impl StateProvider for Fixed {
        async fn batches(&self, from: u64) -> anyhow::Result<BatchStream> {
            let batches: Vec<_> = self
                .batches
                .iter()
                .filter(|b| b.sequence >= from)
                .cloned()
                .collect();
            Ok(Box::pin(stream::iter(batches.into_iter().map(anyhow::Ok))))
        }
    }

    /// A [`MemoryDb`] whose writes can be made to fail.
    #[derive(Default)]
    struct FailingStores {
        inner: MemoryDb,
        fail: bool,
    }

    impl Db for FailingStores {
        fn load(&self, hash: &Felt) -> DbResult<Option<Vec<u8>>> {
            self.inner.load(hash)
        }

        fn store(&mut self, hash: Felt, bytes: Vec<u8>) -> DbResult<()> {
            match self.fail {
                true => Err("disk full".into()),
                false => self.inner.store(hash, bytes),
            }
        }
    }

    /// Upstreams that never produce anything.
    struct Silent;

    impl HeaderSource for Silent {
        async fn subscribe(&self, _from: u64) -> anyhow::Result<RootStream> {
            Ok(Box::pin(stream::pending::<anyhow::Result<L1StateUpdate>>()))
        }
    }

    impl StateProvider for Silent {
        async fn batches(&self, _from: u64) -> anyhow::Result<BatchStream> {
            Ok(Box::pin(stream::pending::<anyhow::Result<StateBatch>>()))
        }
    }

    #[tokio::test]
    async fn l1_root_arriving_first_is_checked_on_commit() -> Result<(), SyncError> {
        let batches = batches();
        let roots = expected_roots(&batches[..1]);
        let mut sync = synchronizer(SyncConfig::default());

        sync.observe_state_update(updates(&roots)[0])?;
        assert_eq!(sync.status().matched, 0);

        sync.apply_batch(batches[0].clone()).await?;
        assert_eq!(sync.status().matched, 1);
        assert_eq!(sync.status().committed_root, roots[0]);

        Ok(())
    }

    #[tokio::test]
    async fn l1_root_arriving_last_is_checked_against_the_kept_root() -> Result<(), SyncError> {
        let batches = batches();
        let roots = expected_roots(&batches[..2]);
        let mut sync = synchronizer(SyncConfig::default());

        sync.apply_batch(batches[0].clone()).await?;
        sync.apply_batch(batches[1].clone()).await?;
        assert_eq!(sync.status().matched, 0);

        for update in updates(&roots) {
            sync.observe_state_update(update)?;
        }
        assert_eq!(sync.status().matched, 2);

        Ok(())
    }

    #[tokio::test]
    async fn run_reconciles_every_batch() -> Result<(), SyncError> {
        let batches = batches();
        let roots = expected_roots(&batches);
        let upstream = Fixed {
            updates: updates(&roots),
            batches: batches.clone(),
        };
        let mut sync = synchronizer(SyncConfig::default());
        let (_stop_tx, stop) = watch::channel(false);

        let status = sync.run(&upstream, &upstream, stop).await?;

        assert_eq!(status.matched, 4);
        assert_eq!(status.mismatched, 0);
        assert_eq!(status.applied_sequence, Some(3));
        assert_eq!(status.committed_root, roots[3]);

        Ok(())
    }

    #[tokio::test]
    async fn mismatching_root_halts_the_run() {
        let batches = batches();
        let mut roots = expected_roots(&batches);
        roots[1] = felt(12345);
        let upstream = Fixed {
            updates: updates(&roots),
            batches,
        };
        let mut sync = synchronizer(SyncConfig::default());
        let (_stop_tx, stop) = watch::channel(false);

        let result = sync.run(&upstream, &upstream, stop).await;

        assert!(matches!(
            result,
            Err(SyncError::RootMismatch { sequence: 1, remote, .. }) if remote == felt(12345)
        ));
        assert_eq!(sync.status().mismatched, 1);
    }

    #[tokio::test]
    async fn mismatches_can_be_tolerated() -> Result<(), SyncError> {
        let batches = batches();
        let mut roots = expected_roots(&batches);
        roots[2] = felt(1);
        let upstream = Fixed {
            updates: updates(&roots),
            batches,
        };
        let config = SyncConfig {
            halt_on_mismatch: false,
            ..Default::default()
        };
        let mut sync = synchronizer(config);
        let (_stop_tx, stop) = watch::channel(false);

        let status = sync.run(&upstream, &upstream, stop).await?;

        assert_eq!(status.matched, 3);
        assert_eq!(status.mismatched, 1);

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn stop_signal_ends_the_run() -> Result<(), SyncError> {
        let mut sync = synchronizer(SyncConfig::default());
        let (stop_tx, stop) = watch::channel(false);

        let stopper = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            stop_tx.send(true).unwrap();
        };
        let (status, ()) = tokio::join!(sync.run(&Silent, &Silent, stop), stopper);

        assert_eq!(status?, SyncStatus::default());

        Ok(())
    }

    #[tokio::test]
    async fn dropping_the_stop_sender_ends_the_run() -> Result<(), SyncError> {
        let mut sync = synchronizer(SyncConfig::default());
        let (stop_tx, stop) = watch::channel(false);
        drop(stop_tx);

        sync.run(&Silent, &Silent, stop).await?;

        Ok(())
    }

    #[tokio::test]
    async fn commits_follow_the_interval_unless_l1_is_waiting() -> Result<(), SyncError> {
        let batches = batches();
        let roots = expected_roots(&batches);
        let config = SyncConfig {
            commit_interval: 3,
            ..Default::default()
        };
        let mut sync = synchronizer(config);

        sync.apply_batch(batches[0].clone()).await?;
        sync.apply_batch(batches[1].clone()).await?;
        assert_eq!(sync.status().committed_sequence, None);
        assert!(sync.trie().read().await.dirty_len() > 0);

        // Sequence 0 was never committed on its own, so it cannot be checked.
        sync.observe_state_update(updates(&roots)[0])?;
        assert_eq!(sync.status().unverified, 1);

        // The interval commits at 2. L1 is already waiting at 3, which forces
        // another commit there.
        sync.observe_state_update(updates(&roots)[3])?;
        sync.apply_batch(batches[2].clone()).await?;
        assert_eq!(sync.status().committed_sequence, Some(2));
        sync.apply_batch(batches[3].clone()).await?;

        assert_eq!(sync.status().committed_sequence, Some(3));
        assert_eq!(sync.status().matched, 1);
        assert_eq!(sync.trie().read().await.dirty_len(), 0);

        Ok(())
    }

    #[tokio::test]
    async fn batches_must_be_contiguous() -> Result<(), SyncError> {
        let batches = batches();
        let mut sync = synchronizer(SyncConfig::default());

        sync.apply_batch(batches[0].clone()).await?;
        let root = sync.status().committed_root;

        // Replays are ignored.
        sync.apply_batch(batches[0].clone()).await?;
        assert_eq!(sync.status().committed_root, root);

        assert!(matches!(
            sync.apply_batch(batches[2].clone()).await,
            Err(SyncError::SequenceGap {
                expected: 1,
                found: 2
            })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn first_batch_must_be_the_start_sequence() -> Result<(), SyncError> {
        let config = SyncConfig {
            start_sequence: 5,
            ..Default::default()
        };
        let mut sync = synchronizer(config);
        let batch = |sequence| StateBatch {
            sequence,
            writes: vec![(felt(1), felt(10))],
        };

        assert!(matches!(
            sync.apply_batch(batch(9)).await,
            Err(SyncError::SequenceGap {
                expected: 5,
                found: 9
            })
        ));
        assert_eq!(sync.status(), SyncStatus::default());
        assert_eq!(sync.trie().read().await.root_hash(), Felt::ZERO);

        sync.apply_batch(batch(5)).await?;
        assert_eq!(sync.status().applied_sequence, Some(5));
        assert_eq!(sync.status().committed_sequence, Some(5));

        Ok(())
    }

    #[tokio::test]
    async fn failed_commit_is_retried_on_close() -> Result<(), SyncError> {
        let batches = batches();
        let roots = expected_roots(&batches[..1]);
        let db = FailingStores {
            fail: true,
            ..Default::default()
        };
        let mut sync = Synchronizer::new(db, SyncConfig::default())?;

        assert!(matches!(
            sync.apply_batch(batches[0].clone()).await,
            Err(SyncError::Trie(TrieError::StorageWrite { .. }))
        ));
        // The writes are in the trie, so the batch counts as applied.
        assert_eq!(sync.status().applied_sequence, Some(0));
        assert_eq!(sync.status().committed_sequence, None);
        assert_eq!(sync.trie().read().await.root_hash(), roots[0]);

        sync.trie().write().await.db_mut().fail = false;
        sync.close().await?;

        assert_eq!(sync.status().committed_sequence, Some(0));
        assert_eq!(sync.status().committed_root, roots[0]);
        assert_eq!(sync.trie().read().await.dirty_len(), 0);

        Ok(())
    }

    #[tokio::test]
    async fn readers_see_applied_batches() -> Result<(), SyncError> {
        let batches = batches();
        let mut sync = synchronizer(SyncConfig::default());
        let reader = sync.trie();

        sync.apply_batch(batches[0].clone()).await?;
        sync.apply_batch(batches[1].clone()).await?;

        let trie = reader.read().await;
        assert_eq!(trie.get(&felt(1))?, Some(felt(10)));
        assert_eq!(trie.get(&felt(3))?, Some(felt(30)));
        assert_eq!(trie.get(&felt(4))?, None);

        Ok(())
    }

    #[tokio::test]
    async fn resumes_from_a_committed_root() -> Result<(), SyncError> {
        let batches = batches();
        let roots = expected_roots(&batches);
        let config = SyncConfig {
            commit_interval: 2,
            ..Default::default()
        };
        let mut sync = synchronizer(config);
        let (_stop_tx, stop) = watch::channel(false);

        let first = Fixed {
            updates: Vec::new(),
            batches: batches[..3].to_vec(),
        };
        let status = sync.run(&first, &first, stop.clone()).await?;
        assert_eq!(status.committed_sequence, Some(2));
        assert_eq!(status.committed_root, roots[2]);

        let db = sync.into_db().unwrap();
        let mut resumed = Synchronizer::resume(db, SyncConfig::default(), roots[2], 2)?;
        let rest = Fixed {
            updates: updates(&roots),
            batches: batches.clone(),
        };
        let status = resumed.run(&rest, &rest, stop).await?;

        // The L1 roots for 2 and 3 are checked; earlier ones are skipped.
        assert_eq!(status.matched, 2);
        assert_eq!(status.applied_sequence, Some(3));
        assert_eq!(status.committed_root, roots[3]);

        Ok(())
    }
}
