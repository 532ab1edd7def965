//! Transaction validation for pool admission.
//!
//! The stateless checks (signature, size, chain id, gas) run first; the
//! state-dependent checks (nonce, gas price, balance) consult a
//! [`PoolStateProvider`]. Replacement rules live in the pool itself since
//! they depend on what is already queued.

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use ember_chain::{Chain, ChainError};
use ember_evm::{validate_gas_params, GasCosts, GasValidationError};
use ember_state::{StateError, StateStore};
use ember_types::{ChainRules, Hardfork, Transaction, TxEnvelope, TxFields, TxType};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Configuration for transaction validation
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Minimum effective gas price required (in wei)
    pub min_gas_price: u128,
    /// Maximum transaction size in bytes
    pub max_tx_size: usize,
    /// Chain id and hardfork transactions are checked against
    pub rules: ChainRules,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_gas_price: 0,
            max_tx_size: 131_072, // 128 KB
            rules: ChainRules::default(),
        }
    }
}

/// Result of the stateless and account checks
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// Recovered or asserted sender
    pub sender: Address,
    /// Encoded size in bytes
    pub tx_size: usize,
}

/// Errors that can occur during validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Invalid signature - cannot recover sender
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Unsigned transaction where a signature is required
    #[error("transaction is not signed")]
    Unsigned,

    /// Nonce is lower than the account nonce
    #[error("nonce too low: expected >= {expected}, got {actual}")]
    NonceTooLow {
        /// Account nonce
        expected: u64,
        /// Nonce in the transaction
        actual: u64,
    },

    /// Gas limit exceeds the head block's gas limit
    #[error("gas limit too high: max {max}, got {actual}")]
    GasLimitTooHigh {
        /// Block gas limit
        max: u64,
        /// Gas limit in the transaction
        actual: u64,
    },

    /// Gas limit or fee fields are inconsistent
    #[error(transparent)]
    Gas(#[from] GasValidationError),

    /// Insufficient balance to pay for gas and value
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// `value + gas_limit * max_fee` plus the blob fee cap
        required: U256,
        /// Sender balance
        available: U256,
    },

    /// Effective gas price below the pool minimum
    #[error("gas price too low: min {min} wei, got {actual} wei")]
    GasPriceTooLow {
        /// Pool minimum
        min: u128,
        /// Effective gas price at the head's base fee
        actual: u128,
    },

    /// Transaction too large
    #[error("transaction too large: max {max} bytes, got {actual} bytes")]
    TransactionTooLarge {
        /// Maximum allowed size
        max: usize,
        /// Actual size
        actual: usize,
    },

    /// Wrong chain ID
    #[error("wrong chain id: expected {expected}, got {actual}")]
    WrongChainId {
        /// Expected chain ID
        expected: u64,
        /// Actual chain ID
        actual: u64,
    },

    /// Transaction type not active at the chain's hardfork
    #[error("transaction type {0:?} is not supported at this hardfork")]
    UnsupportedTxType(TxType),

    /// Account state could not be read
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// The canonical head could not be read
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
}

impl ValidationError {
    /// Stable identifier of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidSignature(_) => "invalid_signature",
            Self::Unsigned => "unsigned",
            Self::NonceTooLow { .. } => "nonce_too_low",
            Self::GasLimitTooHigh { .. } => "gas_limit_too_high",
            Self::Gas(GasValidationError::IntrinsicGasTooLow { .. }) => "intrinsic_gas_too_low",
            Self::Gas(GasValidationError::PriorityFeeExceedsMaxFee { .. }) => {
                "priority_fee_exceeds_max_fee"
            }
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::GasPriceTooLow { .. } => "gas_price_too_low",
            Self::TransactionTooLarge { .. } => "transaction_too_large",
            Self::WrongChainId { .. } => "wrong_chain_id",
            Self::UnsupportedTxType(_) => "unsupported_tx_type",
            Self::State(err) => err.kind(),
            Self::Chain(err) => err.kind(),
        }
    }
}

/// Base fee and gas limit of the canonical head
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadInfo {
    /// Base fee of the head, if London is active
    pub base_fee: Option<u128>,
    /// Gas limit of the head
    pub gas_limit: u64,
}

impl Default for HeadInfo {
    fn default() -> Self {
        Self {
            base_fee: None,
            gas_limit: 30_000_000,
        }
    }
}

/// Account and head state consulted by the pool
///
/// Reads may reach a fork upstream, hence async.
#[async_trait]
pub trait PoolStateProvider: Send + Sync {
    /// Current nonce of `address`
    async fn get_nonce(&self, address: &Address) -> Result<u64, StateError>;

    /// Current balance of `address`
    async fn get_balance(&self, address: &Address) -> Result<U256, StateError>;

    /// Base fee and gas limit of the canonical head
    fn head(&self) -> Result<HeadInfo, ChainError>;
}

/// [`PoolStateProvider`] reading a node's state store and chain
#[derive(Debug, Clone)]
pub struct ChainStateProvider {
    store: Arc<StateStore>,
    chain: Arc<Chain>,
}

impl ChainStateProvider {
    /// Create a provider over `store` and `chain`
    pub fn new(store: Arc<StateStore>, chain: Arc<Chain>) -> Self {
        Self { store, chain }
    }
}

#[async_trait]
impl PoolStateProvider for ChainStateProvider {
    async fn get_nonce(&self, address: &Address) -> Result<u64, StateError> {
        Ok(self
            .store
            .get_account(*address)
            .await?
            .map(|account| account.nonce)
            .unwrap_or_default())
    }

    async fn get_balance(&self, address: &Address) -> Result<U256, StateError> {
        Ok(self
            .store
            .get_account(*address)
            .await?
            .map(|account| account.balance)
            .unwrap_or_default())
    }

    fn head(&self) -> Result<HeadInfo, ChainError> {
        let head = self.chain.canonical_head()?;
        Ok(HeadInfo {
            base_fee: head.header().base_fee_per_gas,
            gas_limit: head.header().gas_limit,
        })
    }
}

/// Mock account state provider for testing
#[derive(Default)]
pub struct MockAccountState {
    nonces: RwLock<HashMap<Address, u64>>,
    balances: RwLock<HashMap<Address, U256>>,
    head: RwLock<HeadInfo>,
    /// Report an empty chain instead of `head`
    headless: RwLock<bool>,
}

impl MockAccountState {
    /// Create a new mock state provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the nonce for an address
    pub fn set_nonce(&self, address: Address, nonce: u64) {
        self.nonces.write().insert(address, nonce);
    }

    /// Set the balance for an address
    pub fn set_balance(&self, address: Address, balance: U256) {
        self.balances.write().insert(address, balance);
    }

    /// Set the head block info
    pub fn set_head(&self, head: HeadInfo) {
        *self.head.write() = head;
        *self.headless.write() = false;
    }

    /// Report an empty chain from now on
    pub fn clear_head(&self) {
        *self.headless.write() = true;
    }
}

#[async_trait]
impl PoolStateProvider for MockAccountState {
    async fn get_nonce(&self, address: &Address) -> Result<u64, StateError> {
        Ok(self.nonces.read().get(address).copied().unwrap_or_default())
    }

    async fn get_balance(&self, address: &Address) -> Result<U256, StateError> {
        Ok(self.balances.read().get(address).copied().unwrap_or_default())
    }

    fn head(&self) -> Result<HeadInfo, ChainError> {
        if *self.headless.read() {
            return Err(ChainError::EmptyChain);
        }
        Ok(*self.head.read())
    }
}

/// Transaction validator
///
/// Validates transactions before they are accepted into the pool.
pub struct TransactionValidator<S: PoolStateProvider> {
    /// Validation configuration
    config: ValidationConfig,
    /// Gas costs at the configured hardfork
    costs: GasCosts,
    /// State provider for account lookups
    state: Arc<S>,
}

impl<S: PoolStateProvider> TransactionValidator<S> {
    /// Create a new transaction validator
    pub fn new(config: ValidationConfig, state: Arc<S>) -> Self {
        let costs = GasCosts::for_hardfork(config.rules.hardfork);
        Self {
            config,
            costs,
            state,
        }
    }

    /// Validation configuration
    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// State provider
    pub fn state(&self) -> &Arc<S> {
        &self.state
    }

    /// Runs every check that precedes the replacement rule:
    ///
    /// 1. Sender recovery (or an asserted sender when signatures are optional)
    /// 2. Size, chain id, type and gas checks
    /// 3. Nonce against the account nonce
    pub async fn validate_admission(
        &self,
        tx: &Transaction,
        require_signature: bool,
    ) -> Result<ValidationResult, ValidationError> {
        trace!(tx_hash = %tx.hash(), "validating transaction");

        // 1. Verify signature and recover sender
        if require_signature && !tx.is_signed() {
            return Err(ValidationError::Unsigned);
        }
        let sender = tx
            .sender()
            .map_err(|e| ValidationError::InvalidSignature(e.to_string()))?;

        // 2. Stateless checks
        let tx_size = tx.size();
        self.validate_tx_size(tx_size)?;
        self.validate_format(tx)?;
        self.validate_gas_limit(tx)?;

        // 3. Validate nonce
        let account_nonce = self.state.get_nonce(&sender).await?;
        if tx.nonce() < account_nonce {
            return Err(ValidationError::NonceTooLow {
                expected: account_nonce,
                actual: tx.nonce(),
            });
        }

        Ok(ValidationResult { sender, tx_size })
    }

    /// Checks the effective gas price at the head's base fee.
    pub fn validate_gas_price(&self, tx: &Transaction) -> Result<u128, ValidationError> {
        let effective_gas_price = tx.effective_gas_price(self.state.head()?.base_fee);
        if effective_gas_price < self.config.min_gas_price {
            return Err(ValidationError::GasPriceTooLow {
                min: self.config.min_gas_price,
                actual: effective_gas_price,
            });
        }
        Ok(effective_gas_price)
    }

    /// Checks that `balance` covers the transaction's upfront cost.
    pub fn validate_balance(&self, tx: &Transaction, balance: U256) -> Result<(), ValidationError> {
        let required = tx.upfront_cost();
        if balance < required {
            debug!(tx_hash = %tx.hash(), %required, available = %balance, "insufficient balance");
            return Err(ValidationError::InsufficientBalance {
                required,
                available: balance,
            });
        }
        Ok(())
    }

    fn validate_tx_size(&self, size: usize) -> Result<(), ValidationError> {
        if size > self.config.max_tx_size {
            warn!(
                size = size,
                max = self.config.max_tx_size,
                "transaction too large"
            );
            return Err(ValidationError::TransactionTooLarge {
                max: self.config.max_tx_size,
                actual: size,
            });
        }
        Ok(())
    }

    fn validate_format(&self, tx: &Transaction) -> Result<(), ValidationError> {
        let hardfork = self.config.rules.hardfork;
        let supported = match tx.tx_type() {
            TxType::Legacy => true,
            TxType::AccessList => hardfork >= Hardfork::Berlin,
            TxType::FeeMarket => hardfork.is_london(),
            TxType::Blob => hardfork.is_cancun(),
        };
        if !supported {
            return Err(ValidationError::UnsupportedTxType(tx.tx_type()));
        }

        // Check chain ID if present
        if let Some(chain_id) = tx.chain_id() {
            if chain_id != self.config.rules.chain_id {
                return Err(ValidationError::WrongChainId {
                    expected: self.config.rules.chain_id,
                    actual: chain_id,
                });
            }
        }
        Ok(())
    }

    fn validate_gas_limit(&self, tx: &Transaction) -> Result<(), ValidationError> {
        let block_gas_limit = self.state.head()?.gas_limit;
        if tx.gas_limit() > block_gas_limit {
            return Err(ValidationError::GasLimitTooHigh {
                max: block_gas_limit,
                actual: tx.gas_limit(),
            });
        }
        validate_gas_params(&self.costs, tx)?;
        Ok(())
    }
}
