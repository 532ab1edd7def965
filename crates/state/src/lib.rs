//! Ember State Layer
//!
//! World state for the ember execution environment:
//!
//! - **StateStore**: accounts, storage and code behind a stack of checkpoint
//!   layers with commit/revert
//! - **Fork mode**: read-through to a remote chain with request coalescing
//!   and a memoizing cache
//! - **Dumps**: deterministic snapshots for persistence
//!
//! ```
//! use ember_state::StateStore;
//! use ember_types::{Account, Address, U256};
//!
//! let store = StateStore::new();
//! store.checkpoint();
//! store.put_account(Address::repeat_byte(1), Account::with_balance(U256::from(1)));
//! store.revert();
//! assert_eq!(store.checkpoint_depth(), 0);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod dump;
pub mod fork;
mod layer;
pub mod rpc;
pub mod store;

pub use dump::{DumpAccount, StateDump};
pub use fork::{
    ForkBackend, ForkError, ForkTransport, RemoteAccount, RemoteBlock, RemoteTransaction,
};
pub use rpc::JsonRpcTransport;
pub use store::StateStore;

use alloy_primitives::B256;
use thiserror::Error;

/// State layer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Reading through to the fork upstream failed
    #[error(transparent)]
    Fork(#[from] ForkError),

    /// Code referenced by an account is not available
    #[error("code not found: {0}")]
    CodeNotFound(B256),
}

impl StateError {
    /// Stable discriminant for API consumers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fork(ForkError::Timeout { .. }) => "fork_timeout",
            Self::Fork(_) => "fork_error",
            Self::CodeNotFound(_) => "code_not_found",
        }
    }
}

/// Result type for state operations
pub type Result<T> = std::result::Result<T, StateError>;
