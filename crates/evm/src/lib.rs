//! # Ember EVM
//!
//! EVM interpreter for the ember execution environment.
//!
//! This crate provides:
//! - [`Interpreter`] - call, create and transaction execution on revm against
//!   a [`StateStore`](ember_state::StateStore)
//! - [`ExecResult`] - return data, gas, logs and halt reason of one execution
//! - [`GasCosts`] - intrinsic gas of a transaction at a hardfork
//!
//! EVM-level halts (revert, out of gas, invalid opcode, ...) never surface as
//! errors: they produce an [`ExecResult`] whose `error` is set. Only invalid
//! parameters and state failures are returned as [`InterpreterError`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use ember_evm::{BlockContext, CallFlags, CallParams, Interpreter};
//!
//! let interpreter = Interpreter::new(store, chain);
//! let block = BlockContext::from_header(chain.canonical_head()?.header());
//! let result = interpreter
//!     .run_call(&params, &block, CallFlags::default())
//!     .await?;
//! assert!(result.is_success());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod executor;
pub mod gas;
mod state_adapter;

// Re-export main types at crate root
pub use executor::{
    spec_id, BlockContext, CallFlags, CallParams, EvmHalt, ExecResult, Interpreter,
};
pub use gas::{validate_gas_params, GasCosts, GasValidationError};

use ember_state::StateError;
use ember_types::TypesError;
use thiserror::Error;

/// Result type alias for interpreter operations
pub type Result<T> = std::result::Result<T, InterpreterError>;

/// Errors that abort an execution before or outside the EVM
#[derive(Error, Debug)]
pub enum InterpreterError {
    /// State store failure, including fork read-through errors
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Transaction failed pre-execution validation
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Block context rejected by the EVM
    #[error("invalid block context: {0}")]
    InvalidHeader(String),

    /// Sender could not be recovered
    #[error("invalid sender: {0}")]
    Sender(#[from] TypesError),

    /// The call fails even at the highest gas limit
    #[error("gas estimation failed at gas limit {gas_limit}: {reason}")]
    EstimationFailed {
        /// Highest gas limit tried
        gas_limit: u64,
        /// Halt at that limit
        reason: EvmHalt,
    },

    /// Runtime failure outside the EVM
    #[error("internal error: {0}")]
    Internal(String),
}

impl InterpreterError {
    /// Stable identifier of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::State(err) => err.kind(),
            Self::InvalidTransaction(_) => "invalid_transaction",
            Self::InvalidHeader(_) => "invalid_header",
            Self::Sender(_) => "invalid_sender",
            Self::EstimationFailed { .. } => "estimation_failed",
            Self::Internal(_) => "internal",
        }
    }
}
