//! # Ember Types
//!
//! Core data model for the ember EVM environment.
//!
//! This crate provides the fundamental types shared by every other ember crate:
//! - [`Transaction`] - tagged union over legacy, EIP-2930, EIP-1559, EIP-4844
//!   and impersonated transactions
//! - [`Block`] and [`BlockHeader`] - Ethereum block structures
//! - [`Account`] - the world-state account record
//! - [`Receipt`] and [`Log`] - execution records
//! - [`trie`] - Merkle-Patricia root computation
//!
//! Fixed-width primitives (`Address`, `B256`, `U256`, `Bytes`, `Bloom`) are
//! re-exported from `alloy-primitives`.
//!
//! ## Example
//!
//! ```rust
//! use ember_types::{Address, TxFeeMarket, TxFields, U256};
//!
//! let tx = TxFeeMarket {
//!     chain_id: 1,
//!     to: Some(Address::repeat_byte(0x11)),
//!     value: U256::from(1_000u64),
//!     max_fee_per_gas: 20,
//!     max_priority_fee_per_gas: 2,
//!     gas_limit: 21_000,
//!     ..Default::default()
//! };
//!
//! // At a base fee of 10 the producer receives the full tip.
//! assert_eq!(tx.effective_tip(10), Some(2));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

mod codec;

pub mod account;
pub mod block;
pub mod fees;
pub mod hardfork;
pub mod hash;
pub mod receipt;
pub mod transaction;
pub mod trie;

pub use account::Account;
pub use block::{Block, BlockHeader, SealedBlock, Withdrawal};
pub use hardfork::{ChainRules, Hardfork};
pub use hash::{keccak256, EMPTY_OMMERS_HASH, EMPTY_ROOT_HASH, KECCAK_EMPTY};
pub use receipt::{logs_bloom, Log, Receipt, ReceiptOutcome};
pub use transaction::{
    AccessListItem, ImpersonatedTx, SignableTx, Signature, Signed, Transaction, TxAccessList,
    TxBlob, TxEnvelope, TxFeeMarket, TxFields, TxLegacy, TxType,
};

pub use alloy_primitives::{Address, Bloom, BloomInput, Bytes, B256, U256};

/// Result type alias for ember types operations
pub type Result<T> = std::result::Result<T, TypesError>;

/// Errors that can occur when working with ember types
#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    /// Invalid hex string
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Invalid length for a fixed-size type
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid transaction
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Transaction type byte not recognised
    #[error("unsupported transaction type: 0x{0:02x}")]
    UnsupportedTxType(u8),

    /// Hardfork name not recognised
    #[error("unknown hardfork: {0}")]
    UnknownHardfork(String),

    /// RLP decoding error
    #[error("RLP decode error: {0}")]
    RlpDecode(#[from] rlp::DecoderError),

    /// Signature error
    #[error("signature error: {0}")]
    Signature(String),
}

impl TypesError {
    /// Stable identifier of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidHex(_) => "invalid_hex",
            Self::InvalidLength { .. } => "invalid_length",
            Self::InvalidTransaction(_) => "invalid_transaction",
            Self::UnsupportedTxType(_) => "unsupported_tx_type",
            Self::UnknownHardfork(_) => "unknown_hardfork",
            Self::RlpDecode(_) => "rlp_decode",
            Self::Signature(_) => "signature",
        }
    }
}
