use std::{fmt, ops::Add};

use ruint::aliases::U256;
use serde::{Deserialize, Serialize};

use crate::felt::Felt;

pub type Bit = bool;

/// The deepest a trie can be, i.e. the widest key path it can address.
pub const MAX_HEIGHT: usize = 251;

/// A sequence of at most [`MAX_HEIGHT`] bits, read most significant bit
/// first. Used both for full key paths and for the compressed path of an
/// edge node.
#[derive(
    Copy, Clone, Deserialize, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Debug,
)]
pub struct Bits {
    /// The number of bits in this sequence.
    pub count: usize,
    /// A packed encoding of these bits. Only the first (least significant)
    /// `count` bits are used. The rest are unused and should be zero.
    pub packed: U256,
}

fn mask(count: usize) -> U256 {
    (U256::from(1u64) << count) - U256::from(1u64)
}

impl Add for Bits {
    type Output = Self;

    /// Concatenation: `self` followed by `rhs`.
    fn add(self, rhs: Self) -> Self::Output {
        assert!(self.count + rhs.count <= MAX_HEIGHT, "Overflow");
        Self {
            count: self.count + rhs.count,
            packed: (self.packed << rhs.count) | rhs.packed,
        }
    }
}

impl Bits {
    pub const fn empty() -> Self {
        Bits {
            count: 0,
            packed: U256::ZERO,
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The full path of `key` in a trie of the given height. The caller
    /// guarantees the key has no bits set at or above `height`.
    pub fn from_key(key: &Felt, height: usize) -> Self {
        debug_assert!(key.bit_len() <= height);
        Bits {
            count: height,
            packed: key.as_uint(),
        }
    }

    pub fn from_bit(bit: Bit) -> Self {
        Bits {
            count: 1,
            packed: U256::from(bit as u64),
        }
    }

    /// Returns the bit at depth `i`, where depth 0 is the most significant.
    pub fn get_bit(&self, i: usize) -> Bit {
        assert!(i < self.count, "Index out of bounds");
        self.packed.bit(self.count - 1 - i)
    }

    pub fn push_bit(&mut self, bit: Bit) {
        assert!(self.count < MAX_HEIGHT, "Overflow");
        self.packed = (self.packed << 1) | U256::from(bit as u64);
        self.count += 1;
    }

    pub fn add_bit(&self, bit: Bit) -> Self {
        let mut x = *self;
        x.push_bit(bit);
        x
    }

    /// The `len` bits starting at depth `start`.
    pub fn slice(&self, start: usize, len: usize) -> Self {
        assert!(start + len <= self.count, "Index out of bounds");
        Bits {
            count: len,
            packed: (self.packed >> (self.count - start - len)) & mask(len),
        }
    }

    pub fn prefix(&self, len: usize) -> Self {
        self.slice(0, len)
    }

    pub fn suffix_from(&self, start: usize) -> Self {
        self.slice(start, self.count - start)
    }

    /// Length of the longest common prefix of `self` and `other`.
    pub fn common_prefix_len(&self, other: &Bits) -> usize {
        let len = self.count.min(other.count);
        let diff = self.prefix(len).packed ^ other.prefix(len).packed;
        len - diff.bit_len()
    }

    /// Splits around depth `point`: the bits above it, the bit at it, and the
    /// bits below it. Either side may be empty.
    pub fn split_at(&self, point: usize) -> (Self, Bit, Self) {
        (
            self.prefix(point),
            self.get_bit(point),
            self.suffix_from(point + 1),
        )
    }

    /// The packed bits as a field element, as committed to by edge nodes.
    pub fn to_felt(&self) -> Felt {
        Felt::from_raw(self.packed)
    }
}

impl fmt::Display for Bits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..self.count {
            f.write_str(if self.get_bit(i) { "1" } else { "0" })?;
        }
        Ok(())
    }
}
