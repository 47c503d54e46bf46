//! A binary Merkle-Patricia trie over the STARK field.
//!
//! Keys and values are [`Felt`]s. Paths are compressed into edge nodes and
//! every node commits to its subtree through the StarkNet Pedersen hash, so
//! the [root hash](BinaryTrie::root_hash) commits to the whole key/value set
//! independently of insertion order.
//!
//! Nodes are persisted by hash into any [`Db`] on [`BinaryTrie::commit`] and
//! loaded back lazily, which lets a trie be reopened from a committed root
//! without reading the store up front:
//!
//! ```
//! use felt_trie::{BinaryTrie, Felt, MemoryDb, TrieConfig};
//!
//! let mut trie = BinaryTrie::new(MemoryDb::default(), TrieConfig::default())?;
//! trie.put(Felt::from(1u64), Felt::from(10u64))?;
//! let root = trie.commit()?;
//!
//! let reopened = BinaryTrie::open(trie.into_db(), TrieConfig::default(), root)?;
//! assert_eq!(reopened.get(&Felt::from(1u64))?, Some(Felt::from(10u64)));
//! # Ok::<(), felt_trie::TrieError>(())
//! ```

pub mod bits;
mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod felt;
pub mod node;
pub mod pedersen;
pub mod trie;

#[cfg(test)]
mod testing_utils;

pub use config::TrieConfig;
pub use db::{Db, DbError, DbResult, MemoryDb};
pub use error::{TrieError, TrieResult};
pub use felt::Felt;
pub use node::Node;
pub use trie::BinaryTrie;
