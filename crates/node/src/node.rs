//! # Ember Node
//!
//! This module implements the node that orchestrates all ember components.
//!
//! The `Node` struct is responsible for:
//! - Creating the genesis state, or forking it from a remote chain
//! - Admitting transactions into the pool
//! - Applying the mining policy (manual, automatic or interval)
//! - Answering account, block, receipt and log queries
//! - Persisting and restoring its state
//! - Handling graceful shutdown

use crate::block_builder::{current_timestamp, BlockBuilder, BlockBuilderConfig, NodePool};
use crate::miner::IntervalMiner;
use crate::persistence::NodeDump;
use crate::{NodeError, Result};
use alloy_primitives::{Address, Bytes, B256, U256};
use ember_chain::{BlockTag, Chain, GenesisParams};
use ember_config::{Config, GenesisConfig, MiningConfig};
use ember_evm::{CallFlags, CallParams, ExecResult};
use ember_receipts::{IndexedReceipt, LogFilter, PositionedLog, ReceiptConfig, ReceiptIndex};
use ember_state::{ForkTransport, JsonRpcTransport, StateDump, StateStore};
use ember_txpool::{AddOptions, ChainStateProvider, PoolConfig, ValidationConfig};
use ember_types::fees::BaseFeeParams;
use ember_types::{Account, ChainRules, SealedBlock, Transaction, TxEnvelope};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

/// Capacity of the node event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Node lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Building genesis or forking
    Initializing,
    /// Accepting requests
    Ready,
    /// Shutdown in progress
    ShuttingDown,
    /// Stopped
    Stopped,
}

/// Events broadcast by a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// Status changed
    StatusChanged(NodeStatus),
    /// Mining policy changed
    MiningModeChanged(MiningConfig),
    /// A block was sealed into the chain
    BlockMined {
        /// Block number
        number: u64,
        /// Block hash
        hash: B256,
        /// Number of included transactions
        transactions: usize,
    },
}

/// Account as reported to callers
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Nonce
    pub nonce: u64,
    /// Balance in wei
    pub balance: U256,
    /// Hash of the runtime code
    pub code_hash: B256,
    /// Runtime code
    pub code: Bytes,
}

/// Node construction parameters
#[derive(Clone, Default)]
pub struct NodeConfig {
    /// Node configuration
    pub config: Config,
    /// Upstream transport for fork mode; a JSON-RPC client for the
    /// configured URL is created when absent
    pub fork_transport: Option<Arc<dyn ForkTransport>>,
}

impl NodeConfig {
    /// Parameters for `config`
    pub fn new(config: Config) -> Self {
        Self {
            config,
            fork_transport: None,
        }
    }

    /// Uses `transport` to reach the fork upstream
    pub fn with_fork_transport(mut self, transport: Arc<dyn ForkTransport>) -> Self {
        self.fork_transport = Some(transport);
        self
    }
}

impl From<Config> for NodeConfig {
    fn from(config: Config) -> Self {
        Self::new(config)
    }
}

impl std::fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConfig")
            .field("config", &self.config)
            .field("fork_transport", &self.fork_transport.is_some())
            .finish()
    }
}

/// An embeddable EVM node
///
/// The Node orchestrates all components of ember:
/// - State store (optionally reading through to a fork upstream)
/// - Chain of sealed blocks
/// - Transaction pool
/// - Receipt index
/// - Block builder and mining policy
///
/// Mutations (mining, cheats, restore) are serialized behind the block
/// builder's lock; queries run concurrently.
pub struct Node {
    /// Node configuration
    config: Config,

    /// Current node status
    status: watch::Sender<NodeStatus>,

    /// World state
    store: Arc<StateStore>,

    /// Canonical chain
    chain: Arc<Chain>,

    /// Transaction pool
    pool: Arc<NodePool>,

    /// Receipts and logs of sealed blocks
    receipts: Arc<ReceiptIndex>,

    /// The single mutation path
    builder: Arc<BlockBuilder>,

    /// Current mining policy
    mining: RwLock<MiningConfig>,

    /// Running interval miner, held across mode switches
    miner: tokio::sync::Mutex<Option<IntervalMiner>>,

    /// Accounts whose impersonated transactions are accepted
    impersonated: RwLock<HashSet<Address>>,

    /// Event broadcaster for node events
    events: broadcast::Sender<NodeEvent>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("status", &*self.status.borrow())
            .field("chain", &self.chain)
            .field("mining", &*self.mining.read())
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Creates a node: builds the genesis block, or forks from the configured
    /// upstream, and starts the configured mining policy.
    pub async fn new(config: impl Into<NodeConfig>) -> Result<Self> {
        let NodeConfig {
            config,
            fork_transport,
        } = config.into();
        config.validate()?;

        let rules = ChainRules {
            chain_id: config.chain.chain_id,
            hardfork: config.chain.hardfork,
            byzantium_block: config.chain.byzantium_block,
        };
        let fee_params = BaseFeeParams::default();

        let (chain, store) = match &config.fork {
            Some(fork) => {
                let transport: Arc<dyn ForkTransport> = match fork_transport {
                    Some(transport) => transport,
                    None => Arc::new(JsonRpcTransport::new(&fork.url, fork.timeout())?),
                };
                let tag: BlockTag = fork.block_tag.parse()?;
                info!(url = %fork.url, %tag, "Forking chain");
                let (chain, store) =
                    Chain::fork_from(rules, fee_params, transport, &tag, Some(fork.timeout()))
                        .await?;
                seed_genesis(&store, &config.genesis)?;
                (chain, store)
            }
            None => {
                let store = StateStore::new();
                seed_genesis(&store, &config.genesis)?;
                let params = GenesisParams {
                    gas_limit: config.chain.block_gas_limit,
                    timestamp: current_timestamp(),
                    coinbase: config.chain.coinbase,
                    base_fee: u128::from(config.chain.initial_base_fee),
                    extra_data: Bytes::new(),
                };
                let chain = Chain::with_genesis(rules, fee_params, &store, params);
                (chain, store)
            }
        };

        let store = Arc::new(store);
        let chain = Arc::new(chain);
        let provider = Arc::new(ChainStateProvider::new(
            Arc::clone(&store),
            Arc::clone(&chain),
        ));
        let pool = Arc::new(NodePool::new(
            PoolConfig {
                max_pool_size: config.pool.max_pool_size,
                max_per_sender: config.pool.max_per_sender,
                price_bump_percent: config.pool.price_bump_percent,
                max_tx_age: config.pool.max_tx_age(),
            },
            ValidationConfig {
                min_gas_price: u128::from(config.pool.min_gas_price),
                max_tx_size: config.pool.max_tx_size,
                rules,
            },
            provider,
        ));
        let receipts = Arc::new(ReceiptIndex::new(
            rules,
            ReceiptConfig {
                retain_blocks: config.receipts.retain_blocks,
                max_logs: config.receipts.max_logs,
                max_block_range: config.receipts.max_block_range,
            },
        ));

        let node = Self::assemble(config, store, chain, pool, receipts);
        node.start().await;
        Ok(node)
    }

    fn assemble(
        config: Config,
        store: Arc<StateStore>,
        chain: Arc<Chain>,
        pool: Arc<NodePool>,
        receipts: Arc<ReceiptIndex>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let builder = Arc::new(BlockBuilder::new(
            BlockBuilderConfig {
                block_gas_limit: config.chain.block_gas_limit,
                coinbase: config.chain.coinbase,
            },
            Arc::clone(&store),
            Arc::clone(&chain),
            Arc::clone(&pool),
            Arc::clone(&receipts),
            events.clone(),
        ));
        let (status, _) = watch::channel(NodeStatus::Initializing);

        Self {
            mining: RwLock::new(config.mining),
            config,
            status,
            store,
            chain,
            pool,
            receipts,
            builder,
            miner: tokio::sync::Mutex::new(None),
            impersonated: RwLock::new(HashSet::new()),
            events,
        }
    }

    async fn start(&self) {
        let mode = *self.mining.read();
        self.install_miner(mode).await;
        self.set_status(NodeStatus::Ready);
        info!(
            chain_id = self.config.chain.chain_id,
            head = self.block_number(),
            forked = self.store.is_forked(),
            mining = ?mode,
            "Node ready"
        );
    }

    // ---- lifecycle ----

    /// Node configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current node status
    pub fn status(&self) -> NodeStatus {
        *self.status.borrow()
    }

    /// Waits until the node has finished initializing.
    ///
    /// Fails if the node is shutting down or stopped.
    pub async fn ready(&self) -> Result<()> {
        let mut rx = self.status.subscribe();
        let status = match rx
            .wait_for(|status| *status != NodeStatus::Initializing)
            .await
        {
            Ok(status) => *status,
            Err(_) => self.status(),
        };
        match status {
            NodeStatus::Ready => Ok(()),
            other => Err(NodeError::NotReady(other)),
        }
    }

    /// Subscribe to node events
    pub fn subscribe_events(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// Stops mining and marks the node stopped. Idempotent.
    pub async fn shutdown(&self) {
        if self.status() == NodeStatus::Stopped {
            return;
        }
        info!("Initiating graceful shutdown");
        self.set_status(NodeStatus::ShuttingDown);
        if let Some(miner) = self.miner.lock().await.take() {
            miner.stop().await;
        }
        self.set_status(NodeStatus::Stopped);
        info!("Node shutdown complete");
    }

    fn set_status(&self, status: NodeStatus) {
        self.status.send_replace(status);
        let _ = self.events.send(NodeEvent::StatusChanged(status));
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.status() {
            NodeStatus::Ready => Ok(()),
            other => Err(NodeError::NotReady(other)),
        }
    }

    // ---- components ----

    /// World state
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Canonical chain
    pub fn chain(&self) -> &Arc<Chain> {
        &self.chain
    }

    /// Transaction pool
    pub fn pool(&self) -> &Arc<NodePool> {
        &self.pool
    }

    /// Receipt index
    pub fn receipts(&self) -> &Arc<ReceiptIndex> {
        &self.receipts
    }

    /// Block builder
    pub fn builder(&self) -> &Arc<BlockBuilder> {
        &self.builder
    }

    // ---- transactions and execution ----

    /// Submits a transaction to the pool.
    ///
    /// Impersonated transactions are accepted only from accounts enabled
    /// with [`Node::set_impersonated_account`]. In automatic mining mode a
    /// block is mined before returning.
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<B256> {
        self.ensure_ready()?;

        let impersonated = tx.is_impersonated();
        if impersonated {
            let sender = tx.sender()?;
            if !self.impersonated.read().contains(&sender) {
                return Err(NodeError::NotImpersonated(sender));
            }
        }

        let options = AddOptions {
            require_signature: !impersonated,
            ..Default::default()
        };
        // Validation reads state; a block must not be sealed meanwhile
        let hash = {
            let _guard = self.builder.lock().await;
            self.pool.add_with(tx, options).await?
        };
        debug!(tx_hash = %hash, impersonated, "Transaction submitted");

        if self.mining_mode() == MiningConfig::Auto {
            self.builder.mine_block().await?;
        }
        Ok(hash)
    }

    /// Decodes an EIP-2718 encoded transaction and submits it.
    pub async fn submit_raw_transaction(&self, data: &[u8]) -> Result<B256> {
        let tx = Transaction::decode(data)?;
        self.submit_transaction(tx).await
    }

    /// Executes a call in the context of the next block without changing
    /// any state. The caller's balance is not checked.
    pub async fn call(&self, params: &CallParams) -> Result<ExecResult> {
        self.ensure_ready()?;
        let context = self.builder.pending_context()?;
        let flags = CallFlags {
            skip_balance: true,
            allow_contract_caller: true,
        };
        Ok(self
            .builder
            .interpreter()
            .call(params, &context, flags)
            .await?)
    }

    /// Smallest gas limit at which `params` succeeds in the next block.
    pub async fn estimate_gas(&self, params: &CallParams) -> Result<u64> {
        self.ensure_ready()?;
        let context = self.builder.pending_context()?;
        Ok(self
            .builder
            .interpreter()
            .estimate_gas(params, &context)
            .await?)
    }

    // ---- queries ----

    /// Account state; absent accounts are reported empty.
    pub async fn get_account(&self, address: Address) -> Result<AccountInfo> {
        let account = self.store.get_account(address).await?.unwrap_or_default();
        let code = self.store.get_code(account.code_hash)?;
        Ok(AccountInfo {
            nonce: account.nonce,
            balance: account.balance,
            code_hash: account.code_hash,
            code,
        })
    }

    /// Balance of `address`
    pub async fn get_balance(&self, address: Address) -> Result<U256> {
        Ok(self.get_account(address).await?.balance)
    }

    /// Account nonce of `address`
    pub async fn get_nonce(&self, address: Address) -> Result<u64> {
        Ok(self.get_account(address).await?.nonce)
    }

    /// Runtime code of `address`
    pub async fn get_code(&self, address: Address) -> Result<Bytes> {
        Ok(self.store.get_account_code(address).await?)
    }

    /// Nonce the next pool transaction of `address` should use
    pub async fn get_pending_nonce(&self, address: Address) -> Result<u64> {
        Ok(self.pool.pending_nonce(&address).await?)
    }

    /// One storage slot of `address`
    pub async fn get_storage_at(&self, address: Address, key: B256) -> Result<B256> {
        Ok(self.store.get_storage(address, key).await?)
    }

    /// Number of the canonical head
    pub fn block_number(&self) -> u64 {
        self.chain.head_number().unwrap_or_default()
    }

    /// Resolves a block tag, number or hash.
    pub async fn get_block(&self, tag: &BlockTag) -> Result<Arc<SealedBlock>> {
        Ok(self.chain.resolve_tag(tag).await?)
    }

    /// A pooled or mined transaction by hash.
    pub async fn get_transaction(&self, hash: &B256) -> Result<Option<Transaction>> {
        if let Some(tx) = self.pool.get(hash) {
            return Ok(Some(tx));
        }
        let Some(indexed) = self.receipts.get_receipt(hash)? else {
            return Ok(None);
        };
        let block = self.chain.get_block(indexed.block_number).await?;
        Ok(block.block.transactions.get(indexed.tx_index).cloned())
    }

    /// Receipt of a mined transaction.
    ///
    /// `Ok(None)` for unknown transactions; pruned receipts fail with a
    /// distinct error.
    pub fn get_receipt(&self, hash: &B256) -> Result<Option<IndexedReceipt>> {
        Ok(self.receipts.get_receipt(hash)?)
    }

    /// Logs matching `filter`.
    pub fn get_logs(&self, filter: &LogFilter) -> Result<Vec<PositionedLog>> {
        Ok(self.receipts.get_logs(filter)?)
    }

    // ---- mining control ----

    /// Mines `blocks` blocks, returning them in order.
    pub async fn mine(&self, blocks: u64) -> Result<Vec<Arc<SealedBlock>>> {
        self.ensure_ready()?;
        let mut mined = Vec::new();
        for _ in 0..blocks {
            mined.push(self.builder.mine_block().await?);
        }
        Ok(mined)
    }

    /// Current mining policy
    pub fn mining_mode(&self) -> MiningConfig {
        *self.mining.read()
    }

    /// Switches the mining policy.
    ///
    /// A running interval miner is stopped before any new one starts.
    pub async fn set_mining_mode(&self, mode: MiningConfig) -> Result<()> {
        mode.validate()?;
        self.install_miner(mode).await;
        info!(mining = ?mode, "Mining mode changed");
        let _ = self.events.send(NodeEvent::MiningModeChanged(mode));
        Ok(())
    }

    /// Stops interval mining and switches to manual mining. Calling it
    /// again, or without interval mining, has no effect.
    ///
    /// No block is sealed by the interval miner after this returns.
    pub async fn stop_interval_mining(&self) {
        let mut miner = self.miner.lock().await;
        if let Some(running) = miner.take() {
            running.stop().await;
            *self.mining.write() = MiningConfig::Manual;
            let _ = self
                .events
                .send(NodeEvent::MiningModeChanged(MiningConfig::Manual));
        }
    }

    async fn install_miner(&self, mode: MiningConfig) {
        let mut miner = self.miner.lock().await;
        if let Some(running) = miner.take() {
            debug!(period_secs = running.period().as_secs(), "Replacing interval miner");
            running.stop().await;
        }
        *self.mining.write() = mode;
        if let Some(period) = mode.block_time() {
            *miner = Some(IntervalMiner::spawn(Arc::clone(&self.builder), period));
        }
    }

    /// Changes the minimum gas price for new submissions.
    pub fn set_min_gas_price(&self, min_gas_price: u128) {
        self.pool.set_min_gas_price(min_gas_price);
        info!(min_gas_price, "Minimum gas price changed");
    }

    /// Forces the base fee of the next block only.
    pub fn set_next_block_base_fee(&self, base_fee: u128) -> Result<()> {
        if !self.chain.rules().hardfork.is_london() {
            return Err(NodeError::InvalidOverride(format!(
                "base fee requires London, chain runs {}",
                self.chain.rules().hardfork
            )));
        }
        self.builder.set_next_base_fee(base_fee);
        Ok(())
    }

    /// Forces the timestamp of the next block only.
    pub fn set_next_block_timestamp(&self, timestamp: u64) -> Result<()> {
        let head = self.chain.canonical_head()?;
        if timestamp < head.header().timestamp {
            return Err(NodeError::InvalidOverride(format!(
                "timestamp {timestamp} precedes head timestamp {}",
                head.header().timestamp
            )));
        }
        self.builder.set_next_timestamp(timestamp);
        Ok(())
    }

    /// Designates the safe head.
    pub fn set_safe_head(&self, number: u64) -> Result<()> {
        Ok(self.chain.set_safe_head(number)?)
    }

    // ---- cheats ----

    /// Enables or disables impersonated transactions from `address`.
    pub fn set_impersonated_account(&self, address: Address, enabled: bool) {
        let mut impersonated = self.impersonated.write();
        if enabled {
            impersonated.insert(address);
        } else {
            impersonated.remove(&address);
        }
        debug!(%address, enabled, "Impersonation changed");
    }

    /// Whether impersonated transactions from `address` are accepted
    pub fn is_impersonated(&self, address: &Address) -> bool {
        self.impersonated.read().contains(address)
    }

    /// Sets the balance of `address`.
    pub async fn set_balance(&self, address: Address, balance: U256) -> Result<()> {
        let _guard = self.builder.lock().await;
        Ok(self.store.set_balance(address, balance).await?)
    }

    /// Sets the nonce of `address`.
    pub async fn set_nonce(&self, address: Address, nonce: u64) -> Result<()> {
        let _guard = self.builder.lock().await;
        Ok(self.store.set_nonce(address, nonce).await?)
    }

    /// Deploys `code` at `address` without running any constructor.
    pub async fn set_code(&self, address: Address, code: Bytes) -> Result<B256> {
        let _guard = self.builder.lock().await;
        Ok(self.store.set_account_code(address, code).await?)
    }

    /// Writes one storage slot of `address`.
    pub async fn set_storage_at(&self, address: Address, key: B256, value: B256) -> Result<()> {
        let _guard = self.builder.lock().await;
        self.store.put_storage(address, key, value);
        Ok(())
    }

    // ---- copies and persistence ----

    /// An independent node with a copy of this node's state, chain, pool and
    /// receipts. Only a fork upstream is shared.
    pub async fn deep_copy(&self) -> Result<Node> {
        let copy = {
            let _guard = self.builder.lock().await;
            let store = Arc::new(self.store.deep_copy());
            let chain = Arc::new(self.chain.deep_copy());
            let provider = Arc::new(ChainStateProvider::new(
                Arc::clone(&store),
                Arc::clone(&chain),
            ));
            let pool = Arc::new(self.pool.deep_copy_with_state(provider));
            let receipts = Arc::new(self.receipts.deep_copy());

            let mut config = self.config.clone();
            config.mining = self.mining_mode();
            let copy = Self::assemble(config, store, chain, pool, receipts);
            *copy.impersonated.write() = self.impersonated.read().clone();
            let overrides = self.builder.overrides();
            if let Some(base_fee) = overrides.base_fee {
                copy.builder.set_next_base_fee(base_fee);
            }
            if let Some(timestamp) = overrides.timestamp {
                copy.builder.set_next_timestamp(timestamp);
            }
            copy
        };
        copy.start().await;
        debug!(head = copy.block_number(), "Node copied");
        Ok(copy)
    }

    /// Snapshot of every account with its code and storage.
    pub fn dump_state(&self) -> Result<StateDump> {
        Ok(self.store.dump_state()?)
    }

    /// Writes every account of `dump` into the state.
    pub async fn load_state(&self, dump: &StateDump) {
        let _guard = self.builder.lock().await;
        self.store.load_state(dump);
    }

    /// State, chain and receipts in serializable form.
    pub async fn dump(&self) -> Result<NodeDump> {
        let _guard = self.builder.lock().await;
        Ok(NodeDump {
            state: self.store.dump_state()?,
            chain: self.chain.dump(),
            receipts: self.receipts.dump(),
        })
    }

    /// Persists state, chain and receipts into `dir`.
    pub async fn persist(&self, dir: &Path) -> Result<()> {
        let dump = self.dump().await?;
        dump.write_to(dir)?;
        info!(?dir, head = self.block_number(), "Node persisted");
        Ok(())
    }

    /// Restores a node persisted with [`Node::persist`].
    ///
    /// State, chain and receipts are replaced by the persisted ones, so the
    /// state root matches the restored head. Pooled transactions are
    /// dropped.
    pub async fn restore(&self, dir: &Path) -> Result<()> {
        let dump = NodeDump::read_from(dir)?;
        dump.receipts.validate()?;
        let _guard = self.builder.lock().await;
        self.chain.load(dump.chain)?;
        self.receipts.load(dump.receipts)?;
        self.store.replace_state(&dump.state);
        self.pool.clear();
        info!(?dir, head = self.block_number(), "Node restored");
        Ok(())
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        // Signals a running interval miner; it exits after its current block
        self.miner.get_mut().take();
    }
}

/// Writes the genesis accounts into the base layer of `store`.
fn seed_genesis(store: &StateStore, genesis: &GenesisConfig) -> Result<()> {
    for entry in &genesis.accounts {
        let address = entry.parse_address()?;
        let code_hash = store.put_code(entry.parse_code()?);
        store.put_account(
            address,
            Account {
                nonce: entry.nonce,
                balance: entry.parse_balance()?,
                code_hash,
                ..Default::default()
            },
        );
    }
    debug!(accounts = genesis.accounts.len(), "Seeded genesis accounts");
    Ok(())
}
