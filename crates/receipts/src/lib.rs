//! # Ember Receipts
//!
//! Receipt and log index for the ember execution environment.
//!
//! This crate provides:
//! - [`ReceiptIndex`] - builds receipts from execution results and stores
//!   them per sealed block
//! - [`LogFilter`] - address and positional topic filters for log queries
//!
//! Receipts take their shape from the chain rules: from Byzantium on they
//! carry a status flag, before it the post-transaction state root.
//!
//! ## Example
//!
//! ```rust,ignore
//! use ember_receipts::{LogFilter, ReceiptConfig, ReceiptIndex};
//!
//! let index = ReceiptIndex::new(rules, ReceiptConfig::default());
//! let receipt = index.record(&header, &tx, &result, cumulative, || store.state_root());
//! index.record_block(&sealed, vec![receipt])?;
//!
//! let logs = index.get_logs(&LogFilter::new(1, 10).address(token))?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod filter;
pub mod index;

// Re-export main types at crate root
pub use filter::{AddressFilter, LogFilter, TopicFilter};
pub use index::{
    BlockReceipts, IndexedReceipt, PositionedLog, ReceiptConfig, ReceiptIndex, ReceiptsDump,
};

use alloy_primitives::B256;
use thiserror::Error;

/// Result type alias for receipt index operations
pub type Result<T> = std::result::Result<T, ReceiptError>;

/// Errors that can occur in receipt index operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReceiptError {
    /// The receipt existed but its block fell out of the retention window
    #[error("receipt of transaction {tx_hash} in block {block_number} was pruned")]
    Pruned {
        /// Transaction hash
        tx_hash: B256,
        /// Block that included the transaction
        block_number: u64,
    },

    /// Query range is inverted
    #[error("invalid block range: from {from} is after to {to}")]
    InvalidRange {
        /// First block
        from: u64,
        /// Last block
        to: u64,
    },

    /// Query range spans too many blocks
    #[error("block range too large: {requested} blocks, max {max}")]
    RangeTooLarge {
        /// Blocks requested
        requested: u64,
        /// Maximum allowed
        max: u64,
    },

    /// A block was recorded with the wrong number of receipts
    #[error(
        "block {block} has {transactions} transactions but {receipts} receipts were recorded"
    )]
    ReceiptCountMismatch {
        /// Block number
        block: u64,
        /// Transactions in the block
        transactions: usize,
        /// Receipts supplied
        receipts: usize,
    },
}

impl ReceiptError {
    /// Stable identifier of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pruned { .. } => "receipt_pruned",
            Self::InvalidRange { .. } => "invalid_range",
            Self::RangeTooLarge { .. } => "range_too_large",
            Self::ReceiptCountMismatch { .. } => "receipt_count_mismatch",
        }
    }
}
