//! The node store a [`BinaryTrie`](crate::trie::BinaryTrie) persists into.
//!
//! Stores are content addressed: a node's bytes are keyed by the node's
//! hash, so writing the same key twice always writes the same bytes.

use std::{collections::HashMap, error::Error};

use serde::{Deserialize, Serialize};

use crate::felt::Felt;

/// A failure of the underlying store, e.g. an I/O error.
pub type DbError = Box<dyn Error + Send + Sync>;

pub type DbResult<T> = Result<T, DbError>;

pub trait Db {
    /// Returns the bytes stored under `hash`, or `None` if nothing is.
    fn load(&self, hash: &Felt) -> DbResult<Option<Vec<u8>>>;

    fn store(&mut self, hash: Felt, bytes: Vec<u8>) -> DbResult<()>;

    /// Removing nodes is optional; the trie itself never prunes.
    fn delete(&mut self, _hash: &Felt) -> DbResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryDb {
    pub db: HashMap<Felt, Vec<u8>>,
}

impl MemoryDb {
    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }
}

impl Db for MemoryDb {
    fn load(&self, hash: &Felt) -> DbResult<Option<Vec<u8>>> {
        Ok(self.db.get(hash).cloned())
    }

    fn store(&mut self, hash: Felt, bytes: Vec<u8>) -> DbResult<()> {
        self.db.insert(hash, bytes);
        Ok(())
    }

    fn delete(&mut self, hash: &Felt) -> DbResult<()> {
        self.db.remove(hash);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_db_round_trips_bytes() {
        let mut db = MemoryDb::default();
        let key = Felt::from(5u64);

        assert_eq!(db.load(&key).unwrap(), None);
        db.store(key, vec![1, 2, 3]).unwrap();
        assert_eq!(db.load(&key).unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(db.len(), 1);

        db.delete(&key).unwrap();
        assert!(db.is_empty());
    }
}
