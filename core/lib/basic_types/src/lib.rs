//! The declaration of the most primitive types used in the Lumen network.
//!
//! Most of the types are thin newtype wrappers designed to make it impossible
//! to mix up, say, a blob key and a batch header hash at a call site.

use std::{fmt, ops, str::FromStr};

use serde::{Deserialize, Serialize};

pub mod time;

/// 32-byte content-addressed identifier of a blob header.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct BlobKey(pub [u8; 32]);

impl BlobKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, ParseBytesError> {
        let bytes: [u8; 32] = slice
            .try_into()
            .map_err(|_| ParseBytesError::InvalidLength {
                expected: 32,
                actual: slice.len(),
            })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for BlobKey {
    type Err = ParseBytesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| ParseBytesError::InvalidHex)?;
        Self::from_slice(&bytes)
    }
}

/// 32-byte identifier of an operator registered in the network.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct OperatorId(pub [u8; 32]);

impl OperatorId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Identifier of a quorum: a named subset of the operator set with its own
/// stake distribution and thresholds.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct QuorumId(pub u8);

impl fmt::Display for QuorumId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Height of an L1 block used as the reference point for operator state.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct L1BlockNumber(pub u64);

impl fmt::Display for L1BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ops::Add<u64> for L1BlockNumber {
    type Output = Self;

    fn add(self, other: u64) -> Self {
        Self(self.0 + other)
    }
}

impl ops::Sub<u64> for L1BlockNumber {
    type Output = Self;

    fn sub(self, other: u64) -> Self {
        Self(self.0.saturating_sub(other))
    }
}

/// Stake denominated in the smallest unit of the staking token.
pub type StakeAmount = u128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseBytesError {
    InvalidHex,
    InvalidLength { expected: usize, actual: usize },
}

impl fmt::Display for ParseBytesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHex => write!(f, "invalid hex string"),
            Self::InvalidLength { expected, actual } => {
                write!(f, "invalid length: expected {expected} bytes, got {actual}")
            }
        }
    }
}

impl std::error::Error for ParseBytesError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_key_hex_round_trip() {
        let key = BlobKey([0xab; 32]);
        let restored: BlobKey = key.to_string().parse().unwrap();
        assert_eq!(restored, key);
    }

    #[test]
    fn blob_key_rejects_short_input() {
        let err = BlobKey::from_slice(&[0u8; 16]).unwrap_err();
        assert_eq!(
            err,
            ParseBytesError::InvalidLength {
                expected: 32,
                actual: 16
            }
        );
    }

    #[test]
    fn block_number_arithmetic_saturates() {
        let block = L1BlockNumber(5);
        assert_eq!(block - 10, L1BlockNumber(0));
        assert_eq!(block + 3, L1BlockNumber(8));
    }
}
