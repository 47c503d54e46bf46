//! Elements of the STARK prime field, the value type of every key, value and
//! hash in the trie.

use std::{
    fmt::{self, Debug, Display, LowerHex},
    ops::Add,
    str::FromStr,
};

use ruint::{aliases::U256, uint};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The STARK field modulus `p = 2^251 + 17 * 2^192 + 1`.
pub const MODULUS: U256 =
    uint!(0x800000000000011000000000000000000000000000000000000000000000001_U256);

/// Size of the canonical big-endian byte form of a [`Felt`].
pub const FELT_BYTES: usize = 32;

/// Errors encountered when building a [`Felt`] from external data.
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum FeltError {
    /// The integer is not a canonical field element.
    #[error("{0:#x} is not below the field modulus")]
    OutOfRange(U256),

    /// A byte form of the wrong size.
    #[error("expected 32 bytes, found {0}")]
    InvalidLength(usize),

    /// A string that is not a hex number.
    #[error("invalid hex felt {0:?}")]
    InvalidHex(String),
}

/// A field element, always kept in canonical form (strictly below
/// [`MODULUS`]).
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(try_from = "U256", into = "U256")]
pub struct Felt(U256);

impl Felt {
    /// The additive identity. Also the hash of the empty node.
    pub const ZERO: Felt = Felt(U256::ZERO);

    /// The multiplicative identity.
    pub const ONE: Felt = Felt::from_u64(1);

    /// Creates a felt, rejecting integers that are not below the modulus.
    pub fn new(value: U256) -> Result<Self, FeltError> {
        match value < MODULUS {
            true => Ok(Self(value)),
            false => Err(FeltError::OutOfRange(value)),
        }
    }

    /// Any `u64` is a canonical field element.
    pub const fn from_u64(value: u64) -> Self {
        Self(U256::from_limbs([value, 0, 0, 0]))
    }

    /// Wraps an integer the caller already knows to be below the modulus.
    pub(crate) const fn from_raw(value: U256) -> Self {
        Self(value)
    }

    /// Parses the fixed-size big-endian form produced by
    /// [`Felt::to_be_bytes`].
    pub fn from_be_bytes(bytes: &[u8]) -> Result<Self, FeltError> {
        if bytes.len() != FELT_BYTES {
            return Err(FeltError::InvalidLength(bytes.len()));
        }

        let value =
            U256::try_from_be_slice(bytes).ok_or(FeltError::InvalidLength(bytes.len()))?;
        Self::new(value)
    }

    pub fn to_be_bytes(&self) -> [u8; FELT_BYTES] {
        self.0.to_be_bytes::<FELT_BYTES>()
    }

    pub const fn as_uint(&self) -> U256 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == U256::ZERO
    }

    /// Returns bit `index` of the integer, counting from the least
    /// significant bit.
    pub fn bit(&self, index: usize) -> bool {
        self.0.bit(index)
    }

    /// Number of significant bits of the integer.
    pub fn bit_len(&self) -> usize {
        self.0.bit_len()
    }
}

impl Add for Felt {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0.add_mod(rhs.0, MODULUS))
    }
}

impl From<u64> for Felt {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl TryFrom<U256> for Felt {
    type Error = FeltError;

    fn try_from(value: U256) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Felt> for U256 {
    fn from(felt: Felt) -> Self {
        felt.0
    }
}

impl FromStr for Felt {
    type Err = FeltError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let value = U256::from_str_radix(digits, 16)
            .map_err(|_| FeltError::InvalidHex(s.to_string()))?;

        Self::new(value)
    }
}

impl Display for Felt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl Debug for Felt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Felt({:#x})", self.0)
    }
}

impl LowerHex for Felt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        LowerHex::fmt(&self.0, f)
    }
}
