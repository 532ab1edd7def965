//! # Ember Node
//!
//! An embeddable EVM node composing the ember components.
//!
//! The [`Node`] owns a state store, a chain, a transaction pool and a
//! receipt index. Submitted transactions go through the pool; a mining
//! trigger (manual, after every submission, or on an interval) pulls them in
//! price and nonce order, executes them and seals the block.
//!
//! ## Components
//!
//! - [`Node`] - lifecycle, queries, submission and cheat helpers
//! - [`BlockBuilder`] - the single mutation path that executes and seals blocks
//!
//! ## Example
//!
//! ```rust,no_run
//! use ember_config::{Config, MiningConfig};
//! use ember_node::Node;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::default();
//!     config.mining = MiningConfig::Manual;
//!
//!     let node = Node::new(config).await?;
//!     node.mine(1).await?;
//!     assert_eq!(node.block_number(), 1);
//!
//!     node.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod block_builder;
mod miner;
pub mod node;
pub mod persistence;

// Re-export main types at crate root
pub use block_builder::{BlockBuilder, BlockBuilderConfig, NextBlockOverrides, NodePool};
pub use node::{AccountInfo, Node, NodeConfig, NodeEvent, NodeStatus};
pub use persistence::{NodeDump, CHAIN_FILE, RECEIPTS_FILE, STATE_FILE};

use alloy_primitives::Address;
use ember_chain::ChainError;
use ember_config::ConfigError;
use ember_evm::InterpreterError;
use ember_receipts::ReceiptError;
use ember_state::{ForkError, StateError};
use ember_txpool::PoolError;
use ember_types::TypesError;
use std::path::PathBuf;
use thiserror::Error;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, NodeError>;

/// Errors returned by node operations
#[derive(Error, Debug)]
pub enum NodeError {
    /// State store failure
    #[error(transparent)]
    State(#[from] StateError),

    /// Chain failure or unresolvable block reference
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// Execution could not be carried out
    #[error(transparent)]
    Interpreter(#[from] InterpreterError),

    /// Transaction rejected by the pool
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Receipt lookup or log query failure
    #[error(transparent)]
    Receipts(#[from] ReceiptError),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Malformed transaction bytes
    #[error("invalid transaction: {0}")]
    Types(#[from] TypesError),

    /// Fork upstream could not be reached
    #[error(transparent)]
    Fork(#[from] ForkError),

    /// Impersonated transaction from an account that is not impersonated
    #[error("account {0} is not impersonated")]
    NotImpersonated(Address),

    /// One-shot override that the next block could not honor
    #[error("invalid next block override: {0}")]
    InvalidOverride(String),

    /// The node does not accept requests in its current status
    #[error("node is {0:?}")]
    NotReady(NodeStatus),

    /// Persisted state could not be written or read
    #[error("persistence error at {path}: {message}")]
    Persistence {
        /// File involved
        path: PathBuf,
        /// What went wrong
        message: String,
    },
}

impl NodeError {
    /// Stable identifier of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::State(err) => err.kind(),
            Self::Chain(err) => err.kind(),
            Self::Interpreter(err) => err.kind(),
            Self::Pool(err) => err.kind(),
            Self::Receipts(err) => err.kind(),
            Self::Config(err) => err.kind(),
            Self::Types(err) => err.kind(),
            Self::Fork(ForkError::Timeout { .. }) => "fork_timeout",
            Self::Fork(_) => "fork_error",
            Self::NotImpersonated(_) => "not_impersonated",
            Self::InvalidOverride(_) => "invalid_override",
            Self::NotReady(_) => "not_ready",
            Self::Persistence { .. } => "persistence",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_error_kinds_delegate() {
        let err = NodeError::from(PoolError::PoolFull);
        assert_eq!(err.kind(), "pool_full");

        let err = NodeError::from(ChainError::UnsupportedTag("finalized"));
        assert_eq!(err.kind(), "unsupported_tag");

        let err = NodeError::NotImpersonated(Address::ZERO);
        assert_eq!(err.kind(), "not_impersonated");
        assert!(err.to_string().contains("not impersonated"));
    }
}
