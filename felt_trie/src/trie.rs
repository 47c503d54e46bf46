//! The trie engine: lookups and copy-on-write updates over nodes that live
//! either in memory (uncommitted or resident) or in a [`Db`].

use std::collections::{HashMap, HashSet};

use log::{debug, error, trace};

use crate::{
    bits::Bits,
    cache::ResidentCache,
    config::TrieConfig,
    db::Db,
    error::{TrieError, TrieResult},
    felt::Felt,
    node::Node,
};

/// Nodes created by a single mutation, keyed by hash. They only become part
/// of the trie once the mutation succeeds.
type Staged = HashMap<Felt, Node>;

/// A binary Merkle-Patricia trie mapping felts to non-zero felts.
///
/// Leaves sit at depth `height` and are never materialized: a child reference
/// at that depth *is* the stored value. Every other node is referenced by its
/// hash and resolved from, in order, the uncommitted nodes, the resident cache
/// and finally the store.
#[derive(Debug)]
pub struct BinaryTrie<D: Db> {
    db: D,
    height: usize,
    root: Felt,
    dirty: HashMap<Felt, Node>,
    resident: ResidentCache,
}

impl<D: Db> BinaryTrie<D> {
    /// Creates an empty trie over `db`.
    pub fn new(db: D, config: TrieConfig) -> TrieResult<Self> {
        Self::open(db, config, Felt::ZERO)
    }

    /// Reopens a trie previously committed to `db` with the given root. No
    /// node is loaded until a lookup or update needs it.
    pub fn open(db: D, config: TrieConfig, root: Felt) -> TrieResult<Self> {
        let capacity = config.validate()?;

        Ok(Self {
            db,
            height: config.height,
            root,
            dirty: HashMap::new(),
            resident: ResidentCache::new(capacity),
        })
    }

    pub fn root_hash(&self) -> Felt {
        self.root
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn db(&self) -> &D {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut D {
        &mut self.db
    }

    pub fn into_db(self) -> D {
        self.db
    }

    /// Number of nodes created since the last commit.
    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    /// Number of committed nodes currently decoded in memory.
    pub fn resident_len(&self) -> usize {
        self.resident.len()
    }

    pub fn get(&self, key: &Felt) -> TrieResult<Option<Felt>> {
        let path = self.key_path(key)?;
        let mut hash = self.root;
        let mut depth = 0;

        loop {
            match self.resolve(hash, depth)? {
                Node::Empty => {
                    trace!("Get traversed Empty");
                    return Ok(None);
                }
                Node::Leaf { value } => return Ok(Some(value)),
                Node::Binary { left, right } => {
                    let bit = path.get_bit(depth);
                    trace!("Get traversed Binary (bit: {})", bit as u8);

                    hash = if bit { right } else { left };
                    depth += 1;
                }
                Node::Edge {
                    path: edge_path,
                    child,
                } => {
                    trace!("Get traversed Edge (path: {})", edge_path);
                    if path.slice(depth, edge_path.count) != edge_path {
                        return Ok(None);
                    }

                    hash = child;
                    depth += edge_path.count;
                }
            }
        }
    }

    pub fn contains(&self, key: &Felt) -> TrieResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Sets `key` to `value`. Setting a key to zero deletes it.
    ///
    /// On error the trie is left exactly as it was.
    pub fn put(&mut self, key: Felt, value: Felt) -> TrieResult<()> {
        if value.is_zero() {
            return self.delete(&key).map(|_| ());
        }

        let path = self.key_path(&key)?;
        trace!("Inserting {} => {}", key, value);

        let mut staged = Staged::new();
        let root = self.insert_rec(&mut staged, self.root, 0, &path, value)?;
        self.publish(staged, root);

        Ok(())
    }

    /// Removes `key`, returning its value if it was present.
    ///
    /// On error the trie is left exactly as it was.
    pub fn delete(&mut self, key: &Felt) -> TrieResult<Option<Felt>> {
        let path = self.key_path(key)?;
        trace!("Deleting {} if it exists", key);

        let mut staged = Staged::new();
        match self.remove_rec(&mut staged, self.root, 0, &path)? {
            None => Ok(None),
            Some((removed, replacement)) => {
                let root = reference(&mut staged, replacement);
                self.publish(staged, root);
                Ok(Some(removed))
            }
        }
    }

    /// Applies writes in order; a later write to the same key wins.
    ///
    /// Each write is applied atomically, but a failure part way leaves the
    /// earlier writes applied.
    pub fn extend<I>(&mut self, writes: I) -> TrieResult<()>
    where
        I: IntoIterator<Item = (Felt, Felt)>,
    {
        writes
            .into_iter()
            .try_for_each(|(key, value)| self.put(key, value))
    }

    /// Writes every uncommitted node reachable from the root to the store and
    /// returns the root. Uncommitted nodes that are no longer reachable are
    /// dropped.
    ///
    /// A reference means a node above the leaves and a value at them, so the
    /// same hash may need to be followed at several depths.
    ///
    /// If the store fails part way, nothing is dropped and the commit can be
    /// retried.
    pub fn commit(&mut self) -> TrieResult<Felt> {
        let mut written = HashMap::new();
        let mut visited = HashSet::new();
        let mut stack = vec![(self.root, 0)];

        while let Some((hash, depth)) = stack.pop() {
            if depth >= self.height {
                continue;
            }
            // Anything not dirty was committed together with its subtree.
            let Some(node) = self.dirty.get(&hash).copied() else {
                continue;
            };
            if !visited.insert((hash, depth)) {
                continue;
            }

            match node {
                Node::Binary { left, right } => {
                    stack.push((left, depth + 1));
                    stack.push((right, depth + 1));
                }
                Node::Edge { path, child } => stack.push((child, depth + path.count)),
                Node::Empty | Node::Leaf { .. } => {
                    return Err(invariant(format!(
                        "uncommitted {:?} stored under {} at depth {}",
                        node, hash, depth
                    )))
                }
            }

            if written.contains_key(&hash) {
                continue;
            }
            self.db
                .store(hash, node.encode_with_hash(&hash))
                .map_err(|source| TrieError::StorageWrite { hash, source })?;
            written.insert(hash, node);
        }

        debug!(
            "Committed {} nodes ({} unreachable dropped), root {}",
            written.len(),
            self.dirty.len() - written.len(),
            self.root
        );

        self.dirty.clear();
        for (hash, node) in written {
            self.resident.insert(hash, node);
        }

        Ok(self.root)
    }

    /// Drops every committed node from memory. They are reloaded from the
    /// store on demand.
    pub fn evict_all(&self) {
        debug!("Evicting {} resident nodes", self.resident.len());
        self.resident.clear();
    }

    /// All key/value pairs, in ascending key order.
    pub fn entries(&self) -> TrieResult<Vec<(Felt, Felt)>> {
        let mut entries = Vec::new();
        let mut stack = vec![(self.root, 0, Bits::empty())];

        while let Some((hash, depth, prefix)) = stack.pop() {
            match self.resolve(hash, depth)? {
                Node::Empty => {}
                Node::Leaf { value } => entries.push((prefix.to_felt(), value)),
                Node::Binary { left, right } => {
                    stack.push((right, depth + 1, prefix.add_bit(true)));
                    stack.push((left, depth + 1, prefix.add_bit(false)));
                }
                Node::Edge { path, child } => {
                    stack.push((child, depth + path.count, prefix + path))
                }
            }
        }

        Ok(entries)
    }

    /// Re-derives the hash of every node reachable from the root and checks
    /// the structural rules of the trie along the way. Returns the number of
    /// distinct node hashes visited, leaves excluded.
    pub fn verify(&self) -> TrieResult<usize> {
        let mut visited = HashSet::new();
        let mut stack = vec![(self.root, 0)];

        while let Some((hash, depth)) = stack.pop() {
            if hash.is_zero() || depth == self.height || !visited.insert((hash, depth)) {
                continue;
            }

            let node = self.resolve(hash, depth)?;
            let computed = node.hash();
            if computed != hash {
                return Err(TrieError::HashMismatch {
                    expected: hash,
                    computed,
                    depth,
                });
            }

            match node {
                Node::Binary { left, right } => {
                    if left.is_zero() || right.is_zero() {
                        return Err(invariant(format!(
                            "binary node {} at depth {} has an empty child",
                            hash, depth
                        )));
                    }
                    stack.push((left, depth + 1));
                    stack.push((right, depth + 1));
                }
                Node::Edge { path, child } => {
                    let child_depth = depth + path.count;
                    if matches!(self.resolve(child, child_depth)?, Node::Edge { .. }) {
                        return Err(invariant(format!(
                            "edge {} at depth {} points at another edge",
                            hash, depth
                        )));
                    }
                    stack.push((child, child_depth));
                }
                Node::Empty | Node::Leaf { .. } => {
                    return Err(invariant(format!(
                        "{:?} referenced by {} at depth {}",
                        node, hash, depth
                    )))
                }
            }
        }

        let distinct: HashSet<_> = visited.into_iter().map(|(hash, _)| hash).collect();
        Ok(distinct.len())
    }

    fn key_path(&self, key: &Felt) -> TrieResult<Bits> {
        match key.bit_len() <= self.height {
            true => Ok(Bits::from_key(key, self.height)),
            false => Err(TrieError::KeyOutOfRange {
                key: *key,
                height: self.height,
            }),
        }
    }

    fn publish(&mut self, staged: Staged, root: Felt) {
        trace!("New root {} ({} new nodes)", root, staged.len());
        self.dirty.extend(staged);
        self.root = root;
    }

    /// Resolves the node referenced by `hash` at `depth`.
    fn resolve(&self, hash: Felt, depth: usize) -> TrieResult<Node> {
        if hash.is_zero() {
            return Ok(Node::Empty);
        }
        if depth == self.height {
            return Ok(Node::Leaf { value: hash });
        }
        if depth > self.height {
            return Err(invariant(format!(
                "node {} referenced below the leaves at depth {}",
                hash, depth
            )));
        }

        if let Some(node) = self.dirty.get(&hash) {
            return Ok(*node);
        }
        if let Some(node) = self.resident.get(&hash) {
            return Ok(node);
        }

        let bytes = self
            .db
            .load(&hash)
            .map_err(|source| TrieError::StorageUnavailable { hash, depth, source })?
            .ok_or(TrieError::MissingNode { hash, depth })?;

        let (node, computed) = Node::decode_hashed(&bytes)
            .map_err(|source| TrieError::CorruptEncoding { hash, depth, source })?;
        if computed != hash {
            return Err(TrieError::HashMismatch {
                expected: hash,
                computed,
                depth,
            });
        }

        match node {
            Node::Leaf { .. } => {
                return Err(invariant(format!(
                    "leaf stored under {} above the leaves at depth {}",
                    hash, depth
                )))
            }
            Node::Edge { path, .. } if depth + path.count > self.height => {
                return Err(invariant(format!(
                    "edge {} at depth {} runs {} bits past the leaves",
                    hash,
                    depth,
                    depth + path.count - self.height
                )))
            }
            _ => {}
        }

        trace!("Loaded {:?} for {} at depth {}", node, hash, depth);
        self.resident.insert(hash, node);

        Ok(node)
    }

    /// Inserts `value` under `path` in the subtree `hash` at `depth`,
    /// returning the subtree's new hash.
    fn insert_rec(
        &self,
        staged: &mut Staged,
        hash: Felt,
        depth: usize,
        path: &Bits,
        value: Felt,
    ) -> TrieResult<Felt> {
        match self.resolve(hash, depth)? {
            Node::Empty => {
                trace!("Insert traversed Empty");
                Ok(edge_over(staged, path.suffix_from(depth), value))
            }
            Node::Leaf { .. } => Ok(value),
            Node::Binary { left, right } => {
                let bit = path.get_bit(depth);
                trace!("Insert traversed Binary (bit: {})", bit as u8);

                let child = if bit { right } else { left };
                let updated = self.insert_rec(staged, child, depth + 1, path, value)?;
                if updated == child {
                    return Ok(hash);
                }

                let node = match bit {
                    true => Node::Binary {
                        left,
                        right: updated,
                    },
                    false => Node::Binary {
                        left: updated,
                        right,
                    },
                };
                Ok(stage(staged, node))
            }
            Node::Edge {
                path: edge_path,
                child,
            } => {
                trace!("Insert traversed Edge (path: {})", edge_path);
                let remaining = path.suffix_from(depth);
                let shared = edge_path.common_prefix_len(&remaining);

                if shared == edge_path.count {
                    let updated =
                        self.insert_rec(staged, child, depth + edge_path.count, path, value)?;
                    if updated == child {
                        return Ok(hash);
                    }

                    return Ok(stage(
                        staged,
                        Node::Edge {
                            path: edge_path,
                            child: updated,
                        },
                    ));
                }

                // The paths diverge inside the edge: a binary node takes the
                // place of the diverging bit, with whatever is left of each
                // path hanging below it.
                let (prefix, existing_bit, existing_suffix) = edge_path.split_at(shared);
                let existing = edge_over(staged, existing_suffix, child);
                let fresh = edge_over(staged, remaining.suffix_from(shared + 1), value);

                let binary = match existing_bit {
                    true => Node::Binary {
                        left: fresh,
                        right: existing,
                    },
                    false => Node::Binary {
                        left: existing,
                        right: fresh,
                    },
                };
                let binary = stage(staged, binary);

                Ok(edge_over(staged, prefix, binary))
            }
        }
    }

    /// Removes `path` from the subtree `hash` at `depth`. Returns the removed
    /// value and the node replacing the subtree, or `None` if the key is not
    /// there.
    fn remove_rec(
        &self,
        staged: &mut Staged,
        hash: Felt,
        depth: usize,
        path: &Bits,
    ) -> TrieResult<Option<(Felt, Node)>> {
        match self.resolve(hash, depth)? {
            Node::Empty => {
                trace!("Delete traversed Empty");
                Ok(None)
            }
            Node::Leaf { value } => Ok(Some((value, Node::Empty))),
            Node::Binary { left, right } => {
                let bit = path.get_bit(depth);
                trace!("Delete traversed Binary (bit: {})", bit as u8);

                let (child, sibling) = if bit { (right, left) } else { (left, right) };
                let Some((removed, replacement)) =
                    self.remove_rec(staged, child, depth + 1, path)?
                else {
                    return Ok(None);
                };

                let node = match replacement {
                    // Only the sibling is left, so this node becomes an edge
                    // to it, absorbing the sibling if it is an edge itself.
                    Node::Empty => match self.resolve(sibling, depth + 1)? {
                        Node::Edge {
                            path: sibling_path,
                            child,
                        } => Node::Edge {
                            path: Bits::from_bit(!bit) + sibling_path,
                            child,
                        },
                        _ => Node::Edge {
                            path: Bits::from_bit(!bit),
                            child: sibling,
                        },
                    },
                    replacement => {
                        let updated = reference(staged, replacement);
                        match bit {
                            true => Node::Binary {
                                left,
                                right: updated,
                            },
                            false => Node::Binary {
                                left: updated,
                                right,
                            },
                        }
                    }
                };

                Ok(Some((removed, node)))
            }
            Node::Edge {
                path: edge_path,
                child,
            } => {
                trace!("Delete traversed Edge (path: {})", edge_path);
                if path.slice(depth, edge_path.count) != edge_path {
                    return Ok(None);
                }

                let Some((removed, replacement)) =
                    self.remove_rec(staged, child, depth + edge_path.count, path)?
                else {
                    return Ok(None);
                };

                let node = match replacement {
                    Node::Empty => Node::Empty,
                    Node::Edge {
                        path: child_path,
                        child,
                    } => Node::Edge {
                        path: edge_path + child_path,
                        child,
                    },
                    replacement => Node::Edge {
                        path: edge_path,
                        child: reference(staged, replacement),
                    },
                };

                Ok(Some((removed, node)))
            }
        }
    }
}

/// Records a new inner node and returns its hash.
fn stage(staged: &mut Staged, node: Node) -> Felt {
    let hash = node.hash();
    staged.insert(hash, node);
    hash
}

/// The reference a parent holds to `node`: nothing for the empty node, the
/// value itself for a leaf, the hash of a freshly staged node otherwise.
fn reference(staged: &mut Staged, node: Node) -> Felt {
    match node {
        Node::Empty => Felt::ZERO,
        Node::Leaf { value } => value,
        node => stage(staged, node),
    }
}

/// `child` reached through `path`, or `child` itself for an empty path.
fn edge_over(staged: &mut Staged, path: Bits, child: Felt) -> Felt {
    match path.is_empty() {
        true => child,
        false => stage(staged, Node::Edge { path, child }),
    }
}

fn invariant(msg: String) -> TrieError {
    error!("{}", msg);
    TrieError::InvariantViolation(msg)
}
