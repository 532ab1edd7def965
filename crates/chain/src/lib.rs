//! Ember Chain
//!
//! The canonical block chain of an ember node:
//!
//! - **Chain**: blocks by number and hash, the canonical head, a safe head
//!   pointer and the block being built
//! - **Tags**: resolution of `latest`, `earliest`, `safe`, `pending`, numbers
//!   and hashes
//! - **Validation**: header checks against the parent on insertion
//! - **Forking**: importing a starting block from a remote chain, with
//!   older blocks fetched on demand

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod chain;
mod fork;
pub mod tag;
pub mod validation;

pub use chain::{Chain, ChainDump, GenesisParams};
pub use tag::{BlockId, BlockTag};
pub use validation::{validate_header, HeaderChecks};

use alloy_primitives::B256;
use ember_state::ForkError;
use thiserror::Error;

/// Chain errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The block reference cannot be satisfied
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// No block with this number or hash exists
    #[error("unknown block {0}")]
    UnknownBlock(BlockId),

    /// The tag string could not be parsed
    #[error("invalid block tag: {0}")]
    InvalidTag(String),

    /// The tag is recognized but not supported
    #[error("block tag '{0}' is not supported")]
    UnsupportedTag(&'static str),

    /// The chain has no blocks yet
    #[error("chain is empty")]
    EmptyChain,

    /// Block number is not the head's successor
    #[error("invalid number: expected {expected}, got {actual}")]
    InvalidNumber {
        /// Expected number
        expected: u64,
        /// Actual number
        actual: u64,
    },

    /// Parent hash does not reference the head
    #[error("invalid parent hash: expected {expected}, got {actual}")]
    InvalidParentHash {
        /// Hash of the head
        expected: B256,
        /// Parent hash of the block
        actual: B256,
    },

    /// Timestamp precedes the parent's
    #[error("invalid timestamp: parent {parent}, got {actual}")]
    InvalidTimestamp {
        /// Parent timestamp
        parent: u64,
        /// Block timestamp
        actual: u64,
    },

    /// More gas used than the gas limit allows
    #[error("gas used {used} exceeds gas limit {limit}")]
    GasUsedExceedsLimit {
        /// Gas used
        used: u64,
        /// Gas limit
        limit: u64,
    },

    /// More blob gas used than a block allows
    #[error("blob gas used {used} exceeds limit {limit}")]
    BlobGasExceedsLimit {
        /// Blob gas used
        used: u64,
        /// Blob gas limit
        limit: u64,
    },

    /// Base fee is not the parent's successor
    #[error("base fee not correct: expected {expected:?}, got {actual:?}")]
    InvalidBaseFee {
        /// Expected base fee
        expected: Option<u128>,
        /// Actual base fee
        actual: Option<u128>,
    },

    /// Excess blob gas is not the parent's successor
    #[error("expected excess blob gas {expected}, got {actual:?}")]
    InvalidExcessBlobGas {
        /// Expected excess blob gas
        expected: u64,
        /// Actual excess blob gas
        actual: Option<u64>,
    },

    /// Fork upstream failure
    #[error(transparent)]
    Fork(#[from] ForkError),
}

impl ChainError {
    /// Stable discriminant for API consumers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidBlock(_) => "invalid_block",
            Self::UnknownBlock(_) => "unknown_block",
            Self::InvalidTag(_) => "invalid_tag",
            Self::UnsupportedTag(_) => "unsupported_tag",
            Self::EmptyChain => "empty_chain",
            Self::InvalidNumber { .. } => "invalid_number",
            Self::InvalidParentHash { .. } => "invalid_parent_hash",
            Self::InvalidTimestamp { .. } => "invalid_timestamp",
            Self::GasUsedExceedsLimit { .. } => "gas_used_exceeds_limit",
            Self::BlobGasExceedsLimit { .. } => "blob_gas_exceeds_limit",
            Self::InvalidBaseFee { .. } => "invalid_base_fee",
            Self::InvalidExcessBlobGas { .. } => "invalid_excess_blob_gas",
            Self::Fork(_) => "fork_error",
        }
    }
}

/// Result type for chain operations
pub type Result<T> = std::result::Result<T, ChainError>;
