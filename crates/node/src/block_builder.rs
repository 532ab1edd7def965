//! # Block Builder
//!
//! Block production for an ember node.
//!
//! The `BlockBuilder` is responsible for:
//! - Selecting transactions from the pool in price and nonce order
//! - Executing them one after another against the state store
//! - Building receipts and the header roots
//! - Sealing the block into the chain and indexing its receipts
//!
//! Every block is built inside one state checkpoint, so a system failure
//! halfway through leaves the state as it was before the block.

use crate::node::NodeEvent;
use crate::{NodeError, Result};
use alloy_primitives::{Address, Bytes, B256};
use ember_chain::Chain;
use ember_evm::{BlockContext, Interpreter, InterpreterError};
use ember_receipts::ReceiptIndex;
use ember_state::StateStore;
use ember_txpool::{ChainStateProvider, OrderingOptions, TxPool};
use ember_types::fees::MAX_BLOB_GAS_PER_BLOCK;
use ember_types::transaction::GAS_PER_BLOB;
use ember_types::trie::ordered_trie_root;
use ember_types::{
    keccak256, logs_bloom, Block, BlockHeader, Receipt, SealedBlock, Transaction, TxEnvelope,
    TxFields, EMPTY_OMMERS_HASH, EMPTY_ROOT_HASH,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, MutexGuard};
use tracing::{debug, info, warn};

/// The pool type used by a node
pub type NodePool = TxPool<ChainStateProvider>;

/// Configuration for block building
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBuilderConfig {
    /// Gas limit of every built block
    pub block_gas_limit: u64,
    /// Fee recipient
    pub coinbase: Address,
}

impl Default for BlockBuilderConfig {
    fn default() -> Self {
        Self {
            block_gas_limit: 30_000_000,
            coinbase: Address::ZERO,
        }
    }
}

/// One-shot values for the next block, cleared once a block is sealed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NextBlockOverrides {
    /// Base fee instead of the EIP-1559 successor of the parent
    pub base_fee: Option<u128>,
    /// Timestamp instead of the wall clock
    pub timestamp: Option<u64>,
}

/// Transactions that made it into a block, with their receipts
#[derive(Debug, Default)]
struct Executed {
    transactions: Vec<Transaction>,
    receipts: Vec<Receipt>,
    gas_used: u64,
    blob_gas_used: u64,
    /// Rejected by the interpreter; dropped from the pool
    invalid: Vec<B256>,
}

/// Builds, executes and seals blocks
///
/// Holds the node's mutation lock: block building and state cheats never
/// interleave.
pub struct BlockBuilder {
    config: BlockBuilderConfig,
    store: Arc<StateStore>,
    chain: Arc<Chain>,
    interpreter: Interpreter,
    pool: Arc<NodePool>,
    receipts: Arc<ReceiptIndex>,
    overrides: Mutex<NextBlockOverrides>,
    events: broadcast::Sender<NodeEvent>,
    lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for BlockBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockBuilder")
            .field("config", &self.config)
            .field("overrides", &*self.overrides.lock())
            .finish_non_exhaustive()
    }
}

impl BlockBuilder {
    /// Create a new block builder
    pub fn new(
        config: BlockBuilderConfig,
        store: Arc<StateStore>,
        chain: Arc<Chain>,
        pool: Arc<NodePool>,
        receipts: Arc<ReceiptIndex>,
        events: broadcast::Sender<NodeEvent>,
    ) -> Self {
        let interpreter = Interpreter::new(Arc::clone(&store), Arc::clone(&chain));
        Self {
            config,
            store,
            chain,
            interpreter,
            pool,
            receipts,
            overrides: Mutex::new(NextBlockOverrides::default()),
            events,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Builder configuration
    pub fn config(&self) -> &BlockBuilderConfig {
        &self.config
    }

    /// The interpreter blocks are executed with
    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    /// Waits for exclusive access to the node's mutable state.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Overrides pending for the next block
    pub fn overrides(&self) -> NextBlockOverrides {
        *self.overrides.lock()
    }

    /// Forces the base fee of the next block.
    pub fn set_next_base_fee(&self, base_fee: u128) {
        self.overrides.lock().base_fee = Some(base_fee);
    }

    /// Forces the timestamp of the next block.
    pub fn set_next_timestamp(&self, timestamp: u64) {
        self.overrides.lock().timestamp = Some(timestamp);
    }

    /// Block context of the block that would be built next, without
    /// consuming any override.
    pub fn pending_context(&self) -> Result<BlockContext> {
        let parent = self.chain.canonical_head()?;
        let overrides = self.overrides();
        let header = self.next_header(&parent, overrides)?;
        Ok(BlockContext::from_header(&header))
    }

    /// Builds, executes and seals one block on top of the canonical head.
    pub async fn mine_block(&self) -> Result<Arc<SealedBlock>> {
        let _guard = self.lock.lock().await;
        self.mine_block_locked().await
    }

    async fn mine_block_locked(&self) -> Result<Arc<SealedBlock>> {
        let start_time = std::time::Instant::now();
        let parent = self.chain.canonical_head()?;
        let overrides = self.overrides();
        let mut header = match self.next_header(&parent, overrides) {
            Ok(header) => header,
            Err(err @ NodeError::InvalidOverride(_)) => {
                // The parent timestamp only grows; this override never applies
                self.overrides.lock().timestamp = None;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        debug!(number = header.number, base_fee = ?header.base_fee_per_gas, "Building new block");

        self.store.checkpoint();
        let executed = match self.execute_transactions(&header).await {
            Ok(executed) => executed,
            Err(err) => {
                self.store.revert();
                return Err(err);
            }
        };

        let rules = self.chain.rules();
        header.state_root = self.store.state_root();
        header.transactions_root = Block::compute_transactions_root(&executed.transactions);
        header.receipts_root = ordered_trie_root(executed.receipts.iter().map(Receipt::encode));
        header.logs_bloom = logs_bloom(executed.receipts.iter().flat_map(|r| r.logs.iter()));
        header.gas_used = executed.gas_used;
        if rules.hardfork.is_cancun() {
            header.blob_gas_used = Some(executed.blob_gas_used);
        }

        let mut block = Block::new(header, executed.transactions);
        if rules.hardfork.is_shanghai() {
            block.withdrawals = Some(Vec::new());
        }
        let sealed = block.seal();

        let inserted = if overrides.base_fee.is_some() {
            self.chain.put_block_with_base_fee_override(sealed)
        } else {
            self.chain.put_block(sealed)
        };
        let block = match inserted {
            Ok(block) => block,
            Err(err) => {
                self.store.revert();
                return Err(err.into());
            }
        };
        self.store.commit();
        self.consume_overrides(overrides);

        self.receipts.record_block(&block, executed.receipts)?;
        self.pool.remove_included(&block.block);
        for hash in &executed.invalid {
            self.pool.remove(hash);
        }
        self.pool.evict_expired();

        info!(
            number = block.number(),
            hash = %block.hash,
            txs = block.block.transactions.len(),
            gas_used = block.header().gas_used,
            build_time_ms = start_time.elapsed().as_millis() as u64,
            "Block mined"
        );
        let _ = self.events.send(NodeEvent::BlockMined {
            number: block.number(),
            hash: block.hash,
            transactions: block.block.transactions.len(),
        });
        Ok(block)
    }

    /// Clears the overrides a sealed block used. Values set while the block
    /// was being built stay for the next one.
    fn consume_overrides(&self, used: NextBlockOverrides) {
        let mut pending = self.overrides.lock();
        if pending.base_fee == used.base_fee {
            pending.base_fee = None;
        }
        if pending.timestamp == used.timestamp {
            pending.timestamp = None;
        }
    }

    /// Header of the successor of `parent` before execution.
    fn next_header(
        &self,
        parent: &SealedBlock,
        overrides: NextBlockOverrides,
    ) -> Result<BlockHeader> {
        let rules = self.chain.rules();
        let parent_header = parent.header();

        let timestamp = match overrides.timestamp {
            Some(timestamp) if timestamp < parent_header.timestamp => {
                return Err(NodeError::InvalidOverride(format!(
                    "timestamp {timestamp} precedes parent timestamp {}",
                    parent_header.timestamp
                )));
            }
            Some(timestamp) => timestamp,
            None => current_timestamp().max(parent_header.timestamp),
        };
        let base_fee = match overrides.base_fee {
            Some(base_fee) => Some(base_fee),
            None => self.chain.next_base_fee()?,
        };

        Ok(BlockHeader {
            parent_hash: parent.hash,
            ommers_hash: EMPTY_OMMERS_HASH,
            coinbase: self.config.coinbase,
            number: parent_header.number + 1,
            gas_limit: self.config.block_gas_limit,
            timestamp,
            extra_data: Bytes::new(),
            mix_hash: keccak256(parent.hash),
            base_fee_per_gas: base_fee,
            withdrawals_root: rules.hardfork.is_shanghai().then_some(EMPTY_ROOT_HASH),
            blob_gas_used: rules.hardfork.is_cancun().then_some(0),
            excess_blob_gas: self.chain.next_excess_blob_gas()?,
            parent_beacon_block_root: rules.hardfork.is_cancun().then_some(B256::ZERO),
            ..Default::default()
        })
    }

    /// Executes pool transactions in order until the block is full.
    ///
    /// A transaction the interpreter rejects, or whose nonce is already
    /// used, is dropped. Once one of a sender's transactions is skipped the
    /// rest of them wait for a later block. System errors abort the block.
    async fn execute_transactions(&self, header: &BlockHeader) -> Result<Executed> {
        let cancun = self.chain.rules().hardfork.is_cancun();
        let candidates = self.pool.txs_by_price_and_nonce(OrderingOptions {
            base_fee: header.base_fee_per_gas,
            allowed_blobs: cancun.then_some(MAX_BLOB_GAS_PER_BLOCK / GAS_PER_BLOB),
        });
        let context = BlockContext::from_header(header);

        let mut executed = Executed::default();
        let mut skipped_senders: HashSet<Address> = HashSet::new();

        for tx in candidates {
            let hash = tx.hash();
            let sender = match tx.sender() {
                Ok(sender) => sender,
                Err(err) => {
                    debug!(tx_hash = %hash, error = %err, "Skipping transaction: no sender");
                    executed.invalid.push(hash);
                    continue;
                }
            };
            if skipped_senders.contains(&sender) {
                continue;
            }

            let account_nonce = self
                .store
                .get_account(sender)
                .await?
                .map(|account| account.nonce)
                .unwrap_or_default();
            if tx.nonce() > account_nonce {
                // Gap left by a skipped predecessor; stays pooled
                skipped_senders.insert(sender);
                continue;
            }
            if tx.nonce() < account_nonce {
                debug!(tx_hash = %hash, account_nonce, "Dropping stale transaction");
                executed.invalid.push(hash);
                continue;
            }

            if executed.gas_used + tx.gas_limit() > header.gas_limit {
                debug!(
                    tx_hash = %hash,
                    gas_limit = tx.gas_limit(),
                    "Skipping transaction: would exceed block gas limit"
                );
                skipped_senders.insert(sender);
                continue;
            }
            if executed.blob_gas_used + tx.blob_gas() > MAX_BLOB_GAS_PER_BLOCK {
                skipped_senders.insert(sender);
                continue;
            }

            let result = match self.interpreter.run_tx(&tx, &context).await {
                Ok(result) => result,
                Err(err @ (InterpreterError::InvalidTransaction(_) | InterpreterError::Sender(_))) => {
                    warn!(tx_hash = %hash, error = %err, "Dropping invalid transaction");
                    executed.invalid.push(hash);
                    skipped_senders.insert(sender);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            executed.gas_used += result.gas_used;
            executed.blob_gas_used += tx.blob_gas();
            let receipt = self.receipts.record(
                header,
                &tx,
                &result,
                executed.gas_used,
                || self.store.state_root(),
            );
            executed.receipts.push(receipt);
            executed.transactions.push(tx);
        }

        debug!(
            txs = executed.transactions.len(),
            gas = executed.gas_used,
            invalid = executed.invalid.len(),
            "Transactions executed"
        );
        Ok(executed)
    }
}

/// Seconds since the Unix epoch
pub(crate) fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
