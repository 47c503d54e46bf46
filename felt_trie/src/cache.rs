use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::{felt::Felt, node::Node};

/// Bounded set of decoded, committed nodes. Anything in it can be dropped at
/// any time since it is also in the store.
#[derive(Debug)]
pub(crate) struct ResidentCache {
    nodes: Mutex<LruCache<Felt, Node>>,
}

impl ResidentCache {
    pub(crate) fn new(capacity: NonZeroUsize) -> Self {
        Self {
            nodes: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub(crate) fn get(&self, hash: &Felt) -> Option<Node> {
        self.nodes.lock().get(hash).copied()
    }

    pub(crate) fn insert(&self, hash: Felt, node: Node) {
        self.nodes.lock().put(hash, node);
    }

    pub(crate) fn clear(&self) {
        self.nodes.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let cache = ResidentCache::new(NonZeroUsize::new(2).unwrap());
        let leaf = |v: u64| Node::Leaf {
            value: Felt::from(v),
        };

        cache.insert(Felt::from(1u64), leaf(1));
        cache.insert(Felt::from(2u64), leaf(2));
        assert_eq!(cache.get(&Felt::from(1u64)), Some(leaf(1)));

        cache.insert(Felt::from(3u64), leaf(3));
        assert_eq!(cache.get(&Felt::from(2u64)), None);
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}
