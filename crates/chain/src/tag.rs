//! Block identifiers and symbolic tags.

use crate::ChainError;
use alloy_primitives::B256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Identifies one block by number or hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockId {
    /// Block number
    Number(u64),
    /// Block hash
    Hash(B256),
}

impl From<u64> for BlockId {
    fn from(number: u64) -> Self {
        Self::Number(number)
    }
}

impl From<B256> for BlockId {
    fn from(hash: B256) -> Self {
        Self::Hash(hash)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "#{n}"),
            Self::Hash(h) => write!(f, "{h}"),
        }
    }
}

/// A block reference as accepted at the API boundary.
///
/// Parsing follows the usual JSON-RPC conventions: named tags, a 66-character
/// `0x` string is a block hash, any other `0x` string is a hex number and a
/// plain decimal string is a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlockTag {
    /// The canonical head
    #[default]
    Latest,
    /// The first executable block, number 1
    Earliest,
    /// The designated safe head
    Safe,
    /// Always rejected
    Finalized,
    /// The block being built, or the head when none is
    Pending,
    /// A block number
    Number(u64),
    /// A block hash
    Hash(B256),
}

impl From<u64> for BlockTag {
    fn from(number: u64) -> Self {
        Self::Number(number)
    }
}

impl From<B256> for BlockTag {
    fn from(hash: B256) -> Self {
        Self::Hash(hash)
    }
}

impl From<BlockId> for BlockTag {
    fn from(id: BlockId) -> Self {
        match id {
            BlockId::Number(n) => Self::Number(n),
            BlockId::Hash(h) => Self::Hash(h),
        }
    }
}

impl FromStr for BlockTag {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "latest" => return Ok(Self::Latest),
            "earliest" => return Ok(Self::Earliest),
            "safe" => return Ok(Self::Safe),
            "finalized" => return Ok(Self::Finalized),
            "pending" => return Ok(Self::Pending),
            _ => {}
        }

        let invalid = || ChainError::InvalidTag(s.to_string());
        match s.strip_prefix("0x") {
            Some(_) if s.len() == 66 => s.parse::<B256>().map(Self::Hash).map_err(|_| invalid()),
            Some(hex) => u64::from_str_radix(hex, 16)
                .map(Self::Number)
                .map_err(|_| invalid()),
            None => s.parse::<u64>().map(Self::Number).map_err(|_| invalid()),
        }
    }
}

impl fmt::Display for BlockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::Earliest => f.write_str("earliest"),
            Self::Safe => f.write_str("safe"),
            Self::Finalized => f.write_str("finalized"),
            Self::Pending => f.write_str("pending"),
            Self::Number(n) => write!(f, "0x{n:x}"),
            Self::Hash(h) => write!(f, "{h}"),
        }
    }
}

impl Serialize for BlockTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BlockTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
