//! Trie nodes, their commitments and their canonical byte form.
//!
//! Every node reduces to a triplet `(length, path, bottom)` and its hash is
//! derived from that triplet alone:
//!
//! | node                   | triplet                          | hash                              |
//! |------------------------|----------------------------------|-----------------------------------|
//! | `Empty`                | `(0, 0, 0)`                      | `0`                               |
//! | `Leaf { value }`       | `(0, 0, value)`                  | `value`                           |
//! | `Binary { left, right }` | `(0, 0, pedersen(left, right))` | `pedersen(left, right)`          |
//! | `Edge { path, child }` | `(path.count, path, child)`      | `pedersen(child, path) + length`  |
//!
//! The stored form is an RLP list `[type, fields.., hash]`. The triplet is not
//! enough to store a binary node since its children could not be recovered
//! from their hash, so each variant stores its own fields.

use rlp::{DecoderError, Rlp, RlpStream};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    bits::{Bits, MAX_HEIGHT},
    felt::{Felt, FeltError},
    pedersen::pedersen_hash,
};

pub const LEAF_TYPE: u8 = 0;
pub const BINARY_TYPE: u8 = 1;
pub const EDGE_TYPE: u8 = 2;

/// The `(length, path, bottom)` triplet a node commits to.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Encoding {
    pub length: u8,
    pub path: Felt,
    pub bottom: Felt,
}

/// Hash of a node given its triplet.
pub fn commitment(encoding: &Encoding) -> Felt {
    match encoding.length {
        0 => encoding.bottom,
        length => {
            pedersen_hash(&encoding.bottom, &encoding.path) + Felt::from(length as u64)
        }
    }
}

/// Reasons a stored node could not be decoded.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum NodeCodecError {
    #[error("malformed rlp: {0}")]
    Rlp(#[from] DecoderError),

    #[error("{0} unexpected bytes after the node")]
    TrailingBytes(usize),

    #[error("unknown node type {0}")]
    UnknownType(u8),

    #[error("node type {node_type} expects {expected} fields, found {found}")]
    FieldCount {
        node_type: u8,
        expected: usize,
        found: usize,
    },

    #[error(transparent)]
    Felt(#[from] FeltError),

    #[error("node type {0} references the empty node")]
    EmptyReference(u8),

    #[error("edge length {0} is outside 1..=251")]
    EdgeLength(u64),

    #[error("edge path {path} does not fit in {length} bits")]
    EdgePath { path: Felt, length: usize },

    #[error("stored hash {stored} does not match the node's hash {computed}")]
    HashMismatch { stored: Felt, computed: Felt },
}

/// A trie node. Children are referenced by hash.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Node {
    #[default]
    Empty,
    Leaf {
        value: Felt,
    },
    Binary {
        left: Felt,
        right: Felt,
    },
    Edge {
        path: Bits,
        child: Felt,
    },
}

impl Node {
    pub const fn empty() -> Self {
        Node::Empty
    }

    pub const fn is_empty(&self) -> bool {
        matches!(self, Node::Empty)
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            Node::Empty => Encoding::default(),
            Node::Leaf { value } => Encoding {
                bottom: *value,
                ..Default::default()
            },
            Node::Binary { left, right } => Encoding {
                bottom: pedersen_hash(left, right),
                ..Default::default()
            },
            Node::Edge { path, child } => Encoding {
                length: path.count as u8,
                path: path.to_felt(),
                bottom: *child,
            },
        }
    }

    pub fn hash(&self) -> Felt {
        commitment(&self.encoding())
    }

    /// Canonical bytes of the node.
    pub fn encode(&self) -> Vec<u8> {
        self.encode_with_hash(&self.hash())
    }

    /// Canonical bytes of a node whose hash is already known.
    pub(crate) fn encode_with_hash(&self, hash: &Felt) -> Vec<u8> {
        let mut stream = match self {
            Node::Empty => return RlpStream::new_list(0).out().to_vec(),
            Node::Leaf { value } => {
                let mut stream = RlpStream::new_list(3);
                stream.append(&LEAF_TYPE);
                append_felt(&mut stream, value);
                stream
            }
            Node::Binary { left, right } => {
                let mut stream = RlpStream::new_list(4);
                stream.append(&BINARY_TYPE);
                append_felt(&mut stream, left);
                append_felt(&mut stream, right);
                stream
            }
            Node::Edge { path, child } => {
                let mut stream = RlpStream::new_list(5);
                stream.append(&EDGE_TYPE);
                stream.append(&(path.count as u64));
                append_felt(&mut stream, &path.to_felt());
                append_felt(&mut stream, child);
                stream
            }
        };
        append_felt(&mut stream, hash);

        stream.out().to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, NodeCodecError> {
        Self::decode_hashed(bytes).map(|(node, _)| node)
    }

    /// Decodes a node and returns it with its verified hash.
    pub fn decode_hashed(bytes: &[u8]) -> Result<(Self, Felt), NodeCodecError> {
        let rlp = Rlp::new(bytes);
        if !rlp.is_list() {
            return Err(DecoderError::RlpExpectedToBeList.into());
        }

        let total = rlp.payload_info()?.total();
        if total > bytes.len() {
            return Err(DecoderError::RlpIsTooShort.into());
        }
        if total < bytes.len() {
            return Err(NodeCodecError::TrailingBytes(bytes.len() - total));
        }

        let found = rlp.item_count()?;
        if found == 0 {
            return Ok((Node::Empty, Felt::ZERO));
        }

        let node_type: u8 = rlp.val_at(0)?;
        let expected = match node_type {
            LEAF_TYPE => 3,
            BINARY_TYPE => 4,
            EDGE_TYPE => 5,
            _ => return Err(NodeCodecError::UnknownType(node_type)),
        };
        if found != expected {
            return Err(NodeCodecError::FieldCount {
                node_type,
                expected,
                found,
            });
        }

        let node = match node_type {
            LEAF_TYPE => Node::Leaf {
                value: non_empty(node_type, felt_at(&rlp, 1)?)?,
            },
            BINARY_TYPE => Node::Binary {
                left: non_empty(node_type, felt_at(&rlp, 1)?)?,
                right: non_empty(node_type, felt_at(&rlp, 2)?)?,
            },
            _ => {
                let length: u64 = rlp.val_at(1)?;
                if length == 0 || length > MAX_HEIGHT as u64 {
                    return Err(NodeCodecError::EdgeLength(length));
                }
                let length = length as usize;

                let path = felt_at(&rlp, 2)?;
                if path.bit_len() > length {
                    return Err(NodeCodecError::EdgePath { path, length });
                }

                Node::Edge {
                    path: Bits {
                        count: length,
                        packed: path.as_uint(),
                    },
                    child: non_empty(node_type, felt_at(&rlp, 3)?)?,
                }
            }
        };

        let stored = felt_at(&rlp, expected - 1)?;
        let computed = node.hash();
        if stored != computed {
            return Err(NodeCodecError::HashMismatch { stored, computed });
        }

        Ok((node, computed))
    }
}

fn append_felt(stream: &mut RlpStream, felt: &Felt) {
    stream.append(&felt.to_be_bytes().to_vec());
}

fn felt_at(rlp: &Rlp, index: usize) -> Result<Felt, NodeCodecError> {
    let item = rlp.at(index)?;
    Ok(Felt::from_be_bytes(item.data()?)?)
}

fn non_empty(node_type: u8, felt: Felt) -> Result<Felt, NodeCodecError> {
    match felt.is_zero() {
        true => Err(NodeCodecError::EmptyReference(node_type)),
        false => Ok(felt),
    }
}
