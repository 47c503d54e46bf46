use thiserror::Error;

use crate::{db::DbError, felt::Felt, node::NodeCodecError};

/// Stores the result of trie operations. Returns a [`TrieError`] upon
/// failure.
pub type TrieResult<T> = Result<T, TrieError>;

/// An error type for trie operations.
///
/// Looking up an absent key is not an error; it yields `Ok(None)`.
#[derive(Debug, Error)]
pub enum TrieError {
    /// A stored node could not be decoded.
    #[error("corrupt node {hash} at depth {depth}: {source}")]
    CorruptEncoding {
        hash: Felt,
        depth: usize,
        source: NodeCodecError,
    },

    /// A stored node decoded fine but hashes to something other than the key
    /// it was stored under.
    #[error("node stored under {expected} at depth {depth} hashes to {computed}")]
    HashMismatch {
        expected: Felt,
        computed: Felt,
        depth: usize,
    },

    /// A node referenced by its parent is not in the store.
    #[error("node {hash} referenced at depth {depth} is missing from the store")]
    MissingNode { hash: Felt, depth: usize },

    /// The store failed while loading a node.
    #[error("store failed while loading node {hash} at depth {depth}: {source}")]
    StorageUnavailable {
        hash: Felt,
        depth: usize,
        source: DbError,
    },

    /// The store failed while persisting dirty nodes.
    #[error("store failed while persisting node {hash}: {source}")]
    StorageWrite { hash: Felt, source: DbError },

    /// The trie reached a shape it should never be in.
    #[error("trie invariant violated: {0}")]
    InvariantViolation(String),

    #[error("key {key} does not fit in a trie of height {height}")]
    KeyOutOfRange { key: Felt, height: usize },

    #[error("invalid trie config: {0}")]
    InvalidConfig(String),
}
