//! # Ember TxPool
//!
//! Transaction pool for the ember execution environment.
//!
//! This crate provides a pool that:
//! - Validates transactions against account state before acceptance
//! - Keeps at most one transaction per sender and nonce, replacing it only
//!   on a sufficient fee bump
//! - Emits transactions in price and nonce order for block building, within
//!   a blob budget
//! - Broadcasts [`PoolEvent`]s when its contents change
//!
//! ## Example
//!
//! ```rust,ignore
//! use ember_txpool::{OrderingOptions, PoolConfig, TxPool, ValidationConfig};
//!
//! let pool = TxPool::new(PoolConfig::default(), ValidationConfig::default(), state);
//! pool.add(signed_tx).await?;
//!
//! let txs = pool.txs_by_price_and_nonce(OrderingOptions {
//!     base_fee: Some(1_000_000_000),
//!     allowed_blobs: Some(6),
//! });
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod pool;
pub mod validation;

// Re-export main types at crate root
pub use pool::{
    AddOptions, OrderingOptions, PoolConfig, PoolEvent, PoolStatus, PooledTransaction, TxPool,
};
pub use validation::{
    ChainStateProvider, HeadInfo, MockAccountState, PoolStateProvider, TransactionValidator,
    ValidationConfig, ValidationError, ValidationResult,
};

use alloy_primitives::{Address, B256};
use ember_state::StateError;

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

/// Errors that can occur in pool operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Transaction already exists in the pool
    #[error("transaction already exists in pool: {0}")]
    AlreadyExists(B256),

    /// Transaction validation failed
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A transaction with the same sender and nonce pays more or nearly as much
    #[error("replacement transaction underpriced: minimum {minimum}, provided {provided}")]
    ReplacementUnderpriced {
        /// Lowest fee that would replace the pooled transaction
        minimum: u128,
        /// Fee offered by the new transaction
        provided: u128,
    },

    /// Pool is at capacity and cannot accept more transactions
    #[error("transaction pool is full")]
    PoolFull,

    /// Sender has too many transactions in the pool
    #[error("sender {sender} has reached the limit of {limit} pooled transactions")]
    SenderLimitReached {
        /// Sender address
        sender: Address,
        /// Per-sender limit
        limit: usize,
    },

    /// Account state could not be read
    #[error("state error: {0}")]
    State(#[from] StateError),
}

impl PoolError {
    /// Stable identifier of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AlreadyExists(_) => "already_exists",
            Self::Validation(err) => err.kind(),
            Self::ReplacementUnderpriced { .. } => "replacement_underpriced",
            Self::PoolFull => "pool_full",
            Self::SenderLimitReached { .. } => "sender_limit_reached",
            Self::State(err) => err.kind(),
        }
    }
}
