//! EVM Interpreter
//!
//! Runs calls, contract creations and pool transactions on revm against the
//! ember state store.
//!
//! revm journals every call frame internally, so a reverted sub-call never
//! reaches the store. Each top-level execution then applies the surviving diff
//! inside one store checkpoint.

use crate::gas::GasCosts;
use crate::state_adapter::{apply_state, StoreDb};
use crate::{InterpreterError, Result};
use alloy_primitives::{Address, Bytes, B256, U256};
use ember_chain::Chain;
use ember_state::StateStore;
use ember_types::{
    fees::blob_gas_price, AccessListItem, BlockHeader, Hardfork, Log, Transaction, TxEnvelope,
    TxFields, TxType,
};
use revm::{
    primitives::{
        BlobExcessGasAndPrice, BlockEnv, CfgEnv, EVMError, Env, EnvWithHandlerCfg,
        ExecutionResult, HaltReason, HandlerCfg, Output, ResultAndState, SpecId, TransactTo,
        TxEnv,
    },
    Evm,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, trace};

/// Read-only block environment of an execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockContext {
    /// Block number
    pub number: u64,
    /// Hash of the parent block
    pub parent_hash: B256,
    /// Block timestamp (seconds since epoch)
    pub timestamp: u64,
    /// Block gas limit
    pub gas_limit: u64,
    /// Fee recipient
    pub coinbase: Address,
    /// Proof-of-work difficulty
    pub difficulty: U256,
    /// RANDAO mix (for PREVRANDAO opcode)
    pub prev_randao: B256,
    /// Base fee per gas (EIP-1559)
    pub base_fee: Option<u128>,
    /// Excess blob gas (EIP-4844)
    pub excess_blob_gas: Option<u64>,
}

impl BlockContext {
    /// Context of executing inside the block described by `header`.
    pub fn from_header(header: &BlockHeader) -> Self {
        Self {
            number: header.number,
            parent_hash: header.parent_hash,
            timestamp: header.timestamp,
            gas_limit: header.gas_limit,
            coinbase: header.coinbase,
            difficulty: header.difficulty,
            prev_randao: header.mix_hash,
            base_fee: header.base_fee_per_gas,
            excess_blob_gas: header.excess_blob_gas,
        }
    }

    /// Price per unit of blob gas in this block.
    pub fn blob_gas_price(&self) -> Option<u128> {
        self.excess_blob_gas.map(blob_gas_price)
    }
}

/// Parameters of a call or contract creation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallParams {
    /// Sender
    pub caller: Address,
    /// Target, `None` creates a contract from `data`
    pub to: Option<Address>,
    /// Calldata or init code
    pub data: Bytes,
    /// Value transferred in wei
    pub value: U256,
    /// Gas limit
    pub gas_limit: u64,
    /// Gas price, or fee cap for fee market execution; zero disables base fee checks
    pub gas_price: u128,
    /// Priority fee cap for fee market execution
    pub max_priority_fee_per_gas: Option<u128>,
    /// Nonce to check against the sender; `None` skips the check
    pub nonce: Option<u64>,
    /// Replay protection chain id; `None` skips the check
    pub chain_id: Option<u64>,
    /// EIP-2930 access list
    pub access_list: Vec<AccessListItem>,
    /// EIP-4844 versioned blob hashes
    pub blob_versioned_hashes: Vec<B256>,
    /// EIP-4844 blob fee cap
    pub max_fee_per_blob_gas: Option<u128>,
}

impl CallParams {
    /// Parameters that execute `tx` exactly as included in a block.
    pub fn from_tx(tx: &Transaction) -> Result<Self> {
        let max_priority_fee_per_gas = match tx.tx_type() {
            TxType::FeeMarket | TxType::Blob => Some(tx.max_priority_fee_per_gas()),
            TxType::Legacy | TxType::AccessList => None,
        };
        Ok(Self {
            caller: tx.sender()?,
            to: tx.to(),
            data: tx.input().clone(),
            value: tx.value(),
            gas_limit: tx.gas_limit(),
            gas_price: tx.max_fee_per_gas(),
            max_priority_fee_per_gas,
            nonce: Some(tx.nonce()),
            chain_id: tx.chain_id(),
            access_list: tx.access_list().to_vec(),
            blob_versioned_hashes: tx.blob_versioned_hashes().to_vec(),
            max_fee_per_blob_gas: tx.max_fee_per_blob_gas(),
        })
    }
}

/// Execution switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFlags {
    /// Skip the check that the caller can pay `value + gas_limit * gas_price`
    pub skip_balance: bool,
    /// Allow a caller that has code deployed (EIP-3607)
    pub allow_contract_caller: bool,
}

/// Exceptional halt of an execution
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvmHalt {
    /// REVERT opcode
    #[error("execution reverted")]
    Revert,
    /// Gas exhausted
    #[error("out of gas")]
    OutOfGas,
    /// Undefined or designated-invalid opcode
    #[error("invalid opcode")]
    InvalidOpcode,
    /// Stack underflow
    #[error("stack underflow")]
    StackUnderflow,
    /// Stack overflow
    #[error("stack overflow")]
    StackOverflow,
    /// State modification inside STATICCALL
    #[error("state change during static call")]
    StaticStateChange,
    /// Jump to a non-JUMPDEST location
    #[error("invalid jump destination")]
    InvalidJump,
    /// Call depth above 1024
    #[error("call too deep")]
    CallTooDeep,
    /// Any other halt
    #[error("{0}")]
    Other(String),
}

impl EvmHalt {
    /// Stable identifier of the halt kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Revert => "revert",
            Self::OutOfGas => "out_of_gas",
            Self::InvalidOpcode => "invalid_opcode",
            Self::StackUnderflow => "stack_underflow",
            Self::StackOverflow => "stack_overflow",
            Self::StaticStateChange => "static_state_change",
            Self::InvalidJump => "invalid_jump",
            Self::CallTooDeep => "call_too_deep",
            Self::Other(_) => "other",
        }
    }
}

impl From<HaltReason> for EvmHalt {
    fn from(reason: HaltReason) -> Self {
        match reason {
            HaltReason::OutOfGas(_) => Self::OutOfGas,
            HaltReason::OpcodeNotFound | HaltReason::InvalidFEOpcode => Self::InvalidOpcode,
            HaltReason::InvalidJump => Self::InvalidJump,
            HaltReason::StackUnderflow => Self::StackUnderflow,
            HaltReason::StackOverflow => Self::StackOverflow,
            HaltReason::StateChangeDuringStaticCall => Self::StaticStateChange,
            HaltReason::CallTooDeep => Self::CallTooDeep,
            other => Self::Other(format!("{other:?}")),
        }
    }
}

/// Outcome of one execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    /// Return data, or revert data
    pub return_value: Bytes,
    /// Gas used after refunds
    pub gas_used: u64,
    /// Gas refunded
    pub gas_refund: u64,
    /// Emitted logs; empty unless the execution succeeded
    pub logs: Vec<Log>,
    /// Address of the created contract
    pub created_address: Option<Address>,
    /// Accounts destroyed by SELFDESTRUCT
    pub self_destructed: BTreeSet<Address>,
    /// Halt reason of a failed execution
    pub error: Option<EvmHalt>,
}

impl ExecResult {
    /// Returns true if the execution did not halt.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// The revm spec matching a hardfork.
pub fn spec_id(hardfork: Hardfork) -> SpecId {
    match hardfork {
        Hardfork::Frontier => SpecId::FRONTIER,
        Hardfork::Homestead => SpecId::HOMESTEAD,
        Hardfork::Tangerine => SpecId::TANGERINE,
        Hardfork::SpuriousDragon => SpecId::SPURIOUS_DRAGON,
        Hardfork::Byzantium => SpecId::BYZANTIUM,
        Hardfork::Constantinople => SpecId::CONSTANTINOPLE,
        Hardfork::Petersburg => SpecId::PETERSBURG,
        Hardfork::Istanbul => SpecId::ISTANBUL,
        Hardfork::Berlin => SpecId::BERLIN,
        Hardfork::London => SpecId::LONDON,
        Hardfork::Merge => SpecId::MERGE,
        Hardfork::Shanghai => SpecId::SHANGHAI,
        Hardfork::Cancun => SpecId::CANCUN,
    }
}

/// EVM interpreter bound to one state store and chain
#[derive(Debug, Clone)]
pub struct Interpreter {
    store: Arc<StateStore>,
    chain: Arc<Chain>,
}

impl Interpreter {
    /// Create a new interpreter
    pub fn new(store: Arc<StateStore>, chain: Arc<Chain>) -> Self {
        Self { store, chain }
    }

    /// The state store executions read from and write to
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// The chain BLOCKHASH reads from
    pub fn chain(&self) -> &Arc<Chain> {
        &self.chain
    }

    /// Gas costs at the chain's hardfork
    pub fn gas_costs(&self) -> GasCosts {
        GasCosts::for_hardfork(self.chain.rules().hardfork)
    }

    /// Executes a call or contract creation and applies its effects.
    ///
    /// EVM halts are reported through [`ExecResult::error`]; only invalid
    /// parameters and state failures are returned as errors.
    pub async fn run_call(
        &self,
        params: &CallParams,
        block: &BlockContext,
        flags: CallFlags,
    ) -> Result<ExecResult> {
        trace!(
            caller = %params.caller,
            to = ?params.to,
            value = %params.value,
            gas_limit = params.gas_limit,
            "Executing call"
        );

        let ResultAndState { result, state } = self.transact(params, block, flags).await?;
        let self_destructed = state
            .iter()
            .filter(|(_, account)| account.is_selfdestructed())
            .map(|(address, _)| *address)
            .collect();

        self.store.checkpoint();
        apply_state(&self.store, state);
        self.store.commit();

        let exec = convert_execution_result(result, self_destructed);
        debug!(
            caller = %params.caller,
            success = exec.is_success(),
            gas_used = exec.gas_used,
            "Call executed"
        );
        Ok(exec)
    }

    /// Executes a call without applying any of its effects.
    pub async fn call(
        &self,
        params: &CallParams,
        block: &BlockContext,
        flags: CallFlags,
    ) -> Result<ExecResult> {
        trace!(caller = %params.caller, to = ?params.to, "Simulating call");

        let ResultAndState { result, state } = self.transact(params, block, flags).await?;
        let self_destructed = state
            .iter()
            .filter(|(_, account)| account.is_selfdestructed())
            .map(|(address, _)| *address)
            .collect();
        Ok(convert_execution_result(result, self_destructed))
    }

    /// Executes a pool transaction with its own nonce and fee fields.
    pub async fn run_tx(&self, tx: &Transaction, block: &BlockContext) -> Result<ExecResult> {
        let params = CallParams::from_tx(tx)?;
        let flags = CallFlags {
            skip_balance: false,
            allow_contract_caller: tx.is_impersonated(),
        };
        debug!(
            tx_hash = %tx.hash(),
            from = %params.caller,
            nonce = tx.nonce(),
            "Executing transaction"
        );
        self.run_call(&params, block, flags).await
    }

    /// Smallest gas limit at which the call succeeds.
    ///
    /// `params.gas_limit` caps the search; zero means the block gas limit.
    pub async fn estimate_gas(&self, params: &CallParams, block: &BlockContext) -> Result<u64> {
        let cap = if params.gas_limit == 0 {
            block.gas_limit
        } else {
            params.gas_limit
        };
        let flags = CallFlags::default();

        let mut attempt = CallParams {
            gas_limit: cap,
            ..params.clone()
        };
        let result = self.call(&attempt, block, flags).await?;
        if let Some(halt) = result.error {
            return Err(InterpreterError::EstimationFailed {
                gas_limit: cap,
                reason: halt,
            });
        }

        // Binary search for minimum gas
        let intrinsic =
            self.gas_costs()
                .intrinsic_gas_for(params.to.is_none(), &params.data, &params.access_list);
        let mut lower_bound = intrinsic.saturating_sub(1);
        let mut upper_bound = cap;
        while lower_bound + 1 < upper_bound {
            let mid = lower_bound + (upper_bound - lower_bound) / 2;
            attempt.gas_limit = mid;
            match self.call(&attempt, block, flags).await {
                Ok(result) if result.is_success() => upper_bound = mid,
                Ok(_) | Err(InterpreterError::InvalidTransaction(_)) => lower_bound = mid,
                Err(err) => return Err(err),
            }
        }

        debug!(caller = %params.caller, estimate = upper_bound, "Gas estimated");
        Ok(upper_bound)
    }

    async fn transact(
        &self,
        params: &CallParams,
        block: &BlockContext,
        flags: CallFlags,
    ) -> Result<ResultAndState> {
        let env = self.build_env(params, block, flags);
        let handle = Handle::try_current().map_err(|e| InterpreterError::Internal(e.to_string()))?;
        let db = StoreDb::new(self.store.clone(), self.chain.clone(), handle);

        if !db.is_remote() {
            return execute(db, env);
        }
        tokio::task::spawn_blocking(move || execute(db, env))
            .await
            .map_err(|e| InterpreterError::Internal(e.to_string()))?
    }

    /// Build EVM environment from call parameters and block context
    fn build_env(
        &self,
        params: &CallParams,
        block: &BlockContext,
        flags: CallFlags,
    ) -> EnvWithHandlerCfg {
        let rules = self.chain.rules();

        let mut cfg = CfgEnv::default();
        cfg.chain_id = rules.chain_id;
        cfg.disable_balance_check = flags.skip_balance;
        cfg.disable_base_fee = params.gas_price == 0;
        cfg.disable_eip3607 = flags.allow_contract_caller;

        let mut block_env = BlockEnv {
            number: U256::from(block.number),
            coinbase: block.coinbase,
            timestamp: U256::from(block.timestamp),
            gas_limit: U256::from(block.gas_limit),
            basefee: U256::from(block.base_fee.unwrap_or_default()),
            difficulty: block.difficulty,
            prevrandao: Some(block.prev_randao),
            ..Default::default()
        };
        if rules.hardfork.is_cancun() {
            block_env.blob_excess_gas_and_price = Some(BlobExcessGasAndPrice::new(
                block.excess_blob_gas.unwrap_or_default(),
            ));
        }

        let tx_env = TxEnv {
            caller: params.caller,
            gas_limit: params.gas_limit,
            gas_price: U256::from(params.gas_price),
            gas_priority_fee: params.max_priority_fee_per_gas.map(U256::from),
            transact_to: match params.to {
                Some(addr) => TransactTo::Call(addr),
                None => TransactTo::Create,
            },
            value: params.value,
            data: params.data.clone(),
            chain_id: params.chain_id,
            nonce: params.nonce,
            access_list: params
                .access_list
                .iter()
                .map(|item| revm::primitives::AccessListItem {
                    address: item.address,
                    storage_keys: item.storage_keys.clone(),
                })
                .collect(),
            blob_hashes: params.blob_versioned_hashes.clone(),
            max_fee_per_blob_gas: params.max_fee_per_blob_gas.map(U256::from),
            ..Default::default()
        };

        let env = Env {
            cfg,
            block: block_env,
            tx: tx_env,
        };

        let handler_cfg = HandlerCfg::new(spec_id(rules.hardfork));
        EnvWithHandlerCfg::new(Box::new(env), handler_cfg)
    }
}

fn execute(db: StoreDb, env: EnvWithHandlerCfg) -> Result<ResultAndState> {
    let mut evm = Evm::builder()
        .with_db(db)
        .with_env_with_handler_cfg(env)
        .build();
    evm.transact().map_err(InterpreterError::from)
}

impl From<EVMError<ember_state::StateError>> for InterpreterError {
    fn from(err: EVMError<ember_state::StateError>) -> Self {
        match err {
            EVMError::Transaction(e) => Self::InvalidTransaction(e.to_string()),
            EVMError::Header(e) => Self::InvalidHeader(e.to_string()),
            EVMError::Database(e) => Self::State(e),
            EVMError::Custom(msg) => Self::Internal(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Convert revm ExecutionResult to our ExecResult
fn convert_execution_result(
    result: ExecutionResult,
    self_destructed: BTreeSet<Address>,
) -> ExecResult {
    match result {
        ExecutionResult::Success {
            output,
            gas_used,
            gas_refunded,
            logs,
            ..
        } => {
            let (return_value, created_address) = match output {
                Output::Create(bytes, addr) => (bytes, addr),
                Output::Call(bytes) => (bytes, None),
            };

            ExecResult {
                return_value,
                gas_used,
                gas_refund: gas_refunded,
                logs: logs
                    .into_iter()
                    .map(|log| Log::new(log.address, log.data.topics().to_vec(), log.data.data))
                    .collect(),
                created_address,
                self_destructed,
                error: None,
            }
        }
        ExecutionResult::Revert { output, gas_used } => ExecResult {
            return_value: output,
            gas_used,
            error: Some(EvmHalt::Revert),
            ..Default::default()
        },
        ExecutionResult::Halt { reason, gas_used } => ExecResult {
            gas_used,
            error: Some(reason.into()),
            ..Default::default()
        },
    }
}
