//! Main transaction pool implementation.
//!
//! This module provides:
//! - Admission with replacement by price bump
//! - Per-sender nonce queues with pool and sender capacity limits
//! - Price and nonce ordering for block building
//! - Removal of transactions included in a block

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256};
use ember_types::{Block, Transaction, TxEnvelope, TxFields};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::validation::{PoolStateProvider, TransactionValidator, ValidationConfig};
use crate::{PoolError, Result};

/// Capacity of the pool event channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of transactions in the pool
    pub max_pool_size: usize,
    /// Maximum number of transactions per sender
    pub max_per_sender: usize,
    /// Minimum fee bump percentage for replacement (e.g., 10 = 10%)
    pub price_bump_percent: u64,
    /// Age after which [`TxPool::evict_expired`] drops a transaction
    pub max_tx_age: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 5_000,
            max_per_sender: 100,
            price_bump_percent: 10,
            max_tx_age: Some(Duration::from_secs(20 * 60)),
        }
    }
}

/// Options for a single submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOptions {
    /// Reject transactions whose sender is asserted rather than recovered
    pub require_signature: bool,
    /// Skip the balance check
    pub skip_balance: bool,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            require_signature: true,
            skip_balance: false,
        }
    }
}

/// Options for [`TxPool::txs_by_price_and_nonce`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderingOptions {
    /// Base fee of the block being built
    pub base_fee: Option<u128>,
    /// Blob budget of the block being built
    pub allowed_blobs: Option<u64>,
}

/// Event emitted when the pool contents change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    /// A transaction was admitted
    Added(B256),
    /// A transaction was removed, replaced or included in a block
    Removed(B256),
}

/// Pooled transaction with metadata
#[derive(Debug, Clone)]
pub struct PooledTransaction {
    /// The transaction
    pub tx: Transaction,
    /// Transaction hash
    pub hash: B256,
    /// Sender address
    pub sender: Address,
    /// Encoded size in bytes
    pub size: usize,
    /// Time when the transaction was received
    pub added_at: Instant,
    /// Insertion sequence number, used as FIFO tie-break
    pub seq: u64,
}

impl PooledTransaction {
    /// Get the transaction nonce
    pub fn nonce(&self) -> u64 {
        self.tx.nonce()
    }
}

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatus {
    /// Transactions executable from the sender's current nonce without gaps
    pub pending: usize,
    /// Transactions behind a nonce gap
    pub queued: usize,
    /// Number of distinct senders
    pub senders: usize,
    /// Total encoded bytes
    pub total_bytes: usize,
}

/// Heap entry for price ordering
///
/// Higher tip wins; on equal tips the earlier insertion wins.
#[derive(Debug, Clone, PartialEq, Eq)]
struct OrderKey {
    tip: u128,
    seq: Reverse<u64>,
    sender: Address,
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tip
            .cmp(&other.tip)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Internal pool state
#[derive(Debug, Clone, Default)]
struct PoolInner {
    /// All transactions by hash
    by_hash: HashMap<B256, PooledTransaction>,
    /// Transactions by sender and nonce
    by_sender: HashMap<Address, BTreeMap<u64, B256>>,
    /// Total encoded bytes
    total_bytes: usize,
    /// Next insertion sequence number
    next_seq: u64,
}

impl PoolInner {
    fn existing(&self, sender: &Address, nonce: u64) -> Option<&PooledTransaction> {
        self.by_sender
            .get(sender)
            .and_then(|nonces| nonces.get(&nonce))
            .and_then(|hash| self.by_hash.get(hash))
    }

    fn insert(&mut self, tx: Transaction, hash: B256, sender: Address, size: usize) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.by_sender
            .entry(sender)
            .or_default()
            .insert(tx.nonce(), hash);
        self.total_bytes += size;
        self.by_hash.insert(
            hash,
            PooledTransaction {
                tx,
                hash,
                sender,
                size,
                added_at: Instant::now(),
                seq,
            },
        );
    }

    fn remove(&mut self, hash: &B256) -> Option<PooledTransaction> {
        let pooled = self.by_hash.remove(hash)?;
        self.total_bytes = self.total_bytes.saturating_sub(pooled.size);
        if let Some(nonces) = self.by_sender.get_mut(&pooled.sender) {
            nonces.remove(&pooled.nonce());
            if nonces.is_empty() {
                self.by_sender.remove(&pooled.sender);
            }
        }
        Some(pooled)
    }
}

/// Transaction pool
///
/// Holds validated transactions keyed by sender and nonce, at most one per
/// key, and emits them in price and nonce order for block building.
pub struct TxPool<S: PoolStateProvider> {
    /// Pool configuration
    config: PoolConfig,
    /// Internal state protected by RwLock
    inner: RwLock<PoolInner>,
    /// Transaction validator
    validator: RwLock<Arc<TransactionValidator<S>>>,
    /// Pool event broadcast
    events: broadcast::Sender<PoolEvent>,
}

impl<S: PoolStateProvider> TxPool<S> {
    /// Create a new pool
    pub fn new(config: PoolConfig, validation: ValidationConfig, state: Arc<S>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            inner: RwLock::new(PoolInner::default()),
            validator: RwLock::new(Arc::new(TransactionValidator::new(validation, state))),
            events,
        }
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Subscribe to pool events
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    /// Changes the minimum effective gas price for new submissions.
    pub fn set_min_gas_price(&self, min_gas_price: u128) {
        let mut validator = self.validator.write();
        let mut config = validator.config().clone();
        config.min_gas_price = min_gas_price;
        *validator = Arc::new(TransactionValidator::new(
            config,
            Arc::clone(validator.state()),
        ));
    }

    /// Add a signed transaction
    pub async fn add(&self, tx: Transaction) -> Result<B256> {
        self.add_with(tx, AddOptions::default()).await
    }

    /// Add a transaction
    ///
    /// Checks run in order and the first failure wins: sender, static
    /// checks, nonce, replacement price, minimum gas price, balance, then
    /// pool capacity.
    pub async fn add_with(&self, tx: Transaction, options: AddOptions) -> Result<B256> {
        let hash = tx.hash();
        if self.inner.read().by_hash.contains_key(&hash) {
            return Err(PoolError::AlreadyExists(hash));
        }

        let validator = Arc::clone(&*self.validator.read());
        let admission = validator
            .validate_admission(&tx, options.require_signature)
            .await?;
        let sender = admission.sender;
        let balance = if options.skip_balance {
            None
        } else {
            Some(validator.state().get_balance(&sender).await?)
        };

        let mut inner = self.inner.write();
        if inner.by_hash.contains_key(&hash) {
            return Err(PoolError::AlreadyExists(hash));
        }

        let replaced = match inner.existing(&sender, tx.nonce()) {
            Some(existing) => {
                self.check_replacement(&existing.tx, &tx)?;
                Some(existing.hash)
            }
            None => None,
        };

        validator.validate_gas_price(&tx)?;
        if let Some(balance) = balance {
            validator.validate_balance(&tx, balance)?;
        }

        if replaced.is_none() {
            if inner.by_hash.len() >= self.config.max_pool_size {
                warn!(tx_hash = %hash, "Pool is full");
                return Err(PoolError::PoolFull);
            }
            let sender_count = inner.by_sender.get(&sender).map_or(0, BTreeMap::len);
            if sender_count >= self.config.max_per_sender {
                return Err(PoolError::SenderLimitReached {
                    sender,
                    limit: self.config.max_per_sender,
                });
            }
        }

        if let Some(old_hash) = replaced {
            inner.remove(&old_hash);
            debug!(old = %old_hash, new = %hash, "Replaced transaction");
            let _ = self.events.send(PoolEvent::Removed(old_hash));
        }
        inner.insert(tx, hash, sender, admission.tx_size);
        drop(inner);

        debug!(tx_hash = %hash, %sender, "Transaction added to pool");
        let _ = self.events.send(PoolEvent::Added(hash));
        Ok(hash)
    }

    /// Checks that `new` bumps every fee of `old` by the configured percentage.
    fn check_replacement(&self, old: &Transaction, new: &Transaction) -> Result<()> {
        let bump = self.config.price_bump_percent as u128;
        let min_bumped = |fee: u128| fee.saturating_mul(100 + bump) / 100;

        let min_tip = min_bumped(old.max_priority_fee_per_gas());
        if new.max_priority_fee_per_gas() < min_tip {
            return Err(PoolError::ReplacementUnderpriced {
                minimum: min_tip,
                provided: new.max_priority_fee_per_gas(),
            });
        }
        let min_fee = min_bumped(old.max_fee_per_gas());
        if new.max_fee_per_gas() < min_fee {
            return Err(PoolError::ReplacementUnderpriced {
                minimum: min_fee,
                provided: new.max_fee_per_gas(),
            });
        }
        if let (Some(old_blob_fee), Some(new_blob_fee)) =
            (old.max_fee_per_blob_gas(), new.max_fee_per_blob_gas())
        {
            let min_blob_fee = min_bumped(old_blob_fee);
            if new_blob_fee < min_blob_fee {
                return Err(PoolError::ReplacementUnderpriced {
                    minimum: min_blob_fee,
                    provided: new_blob_fee,
                });
            }
        }
        Ok(())
    }

    /// Remove a transaction from the pool
    pub fn remove(&self, hash: &B256) -> Option<Transaction> {
        let removed = self.inner.write().remove(hash)?;
        trace!(tx_hash = %hash, "Removed transaction from pool");
        let _ = self.events.send(PoolEvent::Removed(*hash));
        Some(removed.tx)
    }

    /// Removes every transaction pooled for longer than `max_age`.
    ///
    /// Returns the number of transactions removed.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let expired: Vec<B256> = {
            let mut inner = self.inner.write();
            let hashes: Vec<B256> = inner
                .by_hash
                .values()
                .filter(|pooled| pooled.added_at.elapsed() > max_age)
                .map(|pooled| pooled.hash)
                .collect();
            for hash in &hashes {
                inner.remove(hash);
            }
            hashes
        };
        for hash in &expired {
            let _ = self.events.send(PoolEvent::Removed(*hash));
        }
        if !expired.is_empty() {
            info!(
                evicted = expired.len(),
                max_age_secs = max_age.as_secs(),
                "Evicted expired transactions"
            );
        }
        expired.len()
    }

    /// [`TxPool::cleanup`] with the configured age; no-op without one.
    pub fn evict_expired(&self) -> usize {
        match self.config.max_tx_age {
            Some(max_age) => self.cleanup(max_age),
            None => 0,
        }
    }

    /// Remove the transactions included in `block`
    ///
    /// Returns the number of pooled transactions removed.
    pub fn remove_included(&self, block: &Block) -> usize {
        let mut removed = Vec::new();
        {
            let mut inner = self.inner.write();
            for tx in &block.transactions {
                let hash = tx.hash();
                if inner.remove(&hash).is_some() {
                    removed.push(hash);
                }
            }
        }
        for hash in &removed {
            let _ = self.events.send(PoolEvent::Removed(*hash));
        }
        if !removed.is_empty() {
            debug!(
                block = block.number(),
                removed = removed.len(),
                "Removed included transactions"
            );
        }
        removed.len()
    }

    /// Transactions in inclusion order
    ///
    /// Each sender's transactions are emitted in ascending nonce order. Across
    /// senders, the sender whose next transaction pays the highest effective
    /// tip at `base_fee` goes first, ties broken by insertion order. With a
    /// base fee, a sender's queue is cut at the first transaction whose fee
    /// cap is below it. A blob transaction exceeding the remaining
    /// `allowed_blobs` budget is skipped together with the rest of its
    /// sender's queue.
    pub fn txs_by_price_and_nonce(&self, options: OrderingOptions) -> Vec<Transaction> {
        let base_fee = options.base_fee.unwrap_or_default();

        let mut queues: HashMap<Address, VecDeque<PooledTransaction>> = HashMap::new();
        {
            let inner = self.inner.read();
            for (sender, nonces) in &inner.by_sender {
                let queue: VecDeque<_> = nonces
                    .values()
                    .filter_map(|hash| inner.by_hash.get(hash))
                    .take_while(|pooled| pooled.tx.effective_tip(base_fee).is_some())
                    .cloned()
                    .collect();
                if !queue.is_empty() {
                    queues.insert(*sender, queue);
                }
            }
        }

        let mut heap = BinaryHeap::with_capacity(queues.len());
        for (sender, queue) in &queues {
            if let Some(first) = queue.front() {
                heap.push(order_key(first, *sender, base_fee));
            }
        }

        let mut ordered = Vec::new();
        let mut blobs_used = 0u64;
        while let Some(best) = heap.pop() {
            let Some(queue) = queues.get_mut(&best.sender) else {
                panic!("no queued transactions for sender {}", best.sender);
            };
            let Some(pooled) = queue.pop_front() else {
                panic!("empty transaction queue for sender {}", best.sender);
            };

            let blobs = pooled.tx.blob_count();
            if blobs > 0 {
                if let Some(allowed) = options.allowed_blobs {
                    if blobs_used + blobs > allowed {
                        trace!(
                            tx_hash = %pooled.hash,
                            blobs,
                            remaining = allowed - blobs_used,
                            "Skipping blob transaction over budget"
                        );
                        queue.clear();
                        continue;
                    }
                }
                blobs_used += blobs;
            }

            if let Some(next) = queue.front() {
                heap.push(order_key(next, best.sender, base_fee));
            }
            ordered.push(pooled.tx);
        }
        ordered
    }

    /// Get a transaction by hash
    pub fn get(&self, hash: &B256) -> Option<Transaction> {
        self.inner.read().by_hash.get(hash).map(|p| p.tx.clone())
    }

    /// Get a pooled transaction with its metadata
    pub fn get_pooled(&self, hash: &B256) -> Option<PooledTransaction> {
        self.inner.read().by_hash.get(hash).cloned()
    }

    /// Check if a transaction is in the pool
    pub fn contains(&self, hash: &B256) -> bool {
        self.inner.read().by_hash.contains_key(hash)
    }

    /// Get all transactions from a sender in nonce order
    pub fn transactions_by_sender(&self, sender: &Address) -> Vec<Transaction> {
        let inner = self.inner.read();
        inner
            .by_sender
            .get(sender)
            .map(|nonces| {
                nonces
                    .values()
                    .filter_map(|hash| inner.by_hash.get(hash))
                    .map(|p| p.tx.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All pooled transactions
    pub fn transactions(&self) -> Vec<Transaction> {
        self.inner
            .read()
            .by_hash
            .values()
            .map(|p| p.tx.clone())
            .collect()
    }

    /// Next nonce for `sender`, accounting for its contiguous pooled run
    pub async fn pending_nonce(&self, sender: &Address) -> Result<u64> {
        let state = Arc::clone(self.validator.read().state());
        let mut nonce = state.get_nonce(sender).await?;
        let inner = self.inner.read();
        if let Some(nonces) = inner.by_sender.get(sender) {
            while nonces.contains_key(&nonce) {
                nonce += 1;
            }
        }
        Ok(nonce)
    }

    /// Number of transactions in the pool
    pub fn len(&self) -> usize {
        self.inner.read().by_hash.len()
    }

    /// Check if the pool is empty
    pub fn is_empty(&self) -> bool {
        self.inner.read().by_hash.is_empty()
    }

    /// Pending and queued counts
    ///
    /// A transaction is pending when every nonce from the sender's account
    /// nonce up to its own is pooled.
    pub async fn status(&self) -> Result<PoolStatus> {
        let state = Arc::clone(self.validator.read().state());
        let senders: Vec<(Address, Vec<u64>)> = self
            .inner
            .read()
            .by_sender
            .iter()
            .map(|(sender, nonces)| (*sender, nonces.keys().copied().collect()))
            .collect();

        let mut status = PoolStatus {
            senders: senders.len(),
            total_bytes: self.inner.read().total_bytes,
            ..Default::default()
        };
        for (sender, nonces) in senders {
            let mut expected = state.get_nonce(&sender).await?;
            for nonce in nonces {
                if nonce == expected {
                    status.pending += 1;
                    expected += 1;
                } else {
                    status.queued += 1;
                }
            }
        }
        Ok(status)
    }

    /// Clear all transactions from the pool
    pub fn clear(&self) {
        let removed: Vec<B256> = {
            let mut inner = self.inner.write();
            let hashes = inner.by_hash.keys().copied().collect();
            let next_seq = inner.next_seq;
            *inner = PoolInner {
                next_seq,
                ..Default::default()
            };
            hashes
        };
        for hash in &removed {
            let _ = self.events.send(PoolEvent::Removed(*hash));
        }
        info!(count = removed.len(), "Cleared transaction pool");
    }

    /// Independent copy sharing the state provider
    ///
    /// The copy has its own event channel with no subscribers.
    pub fn deep_copy(&self) -> Self {
        let state = Arc::clone(self.validator.read().state());
        self.deep_copy_with_state(state)
    }

    /// Independent copy validating against `state`
    pub fn deep_copy_with_state(&self, state: Arc<S>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let validation = self.validator.read().config().clone();
        Self {
            config: self.config.clone(),
            inner: RwLock::new(self.inner.read().clone()),
            validator: RwLock::new(Arc::new(TransactionValidator::new(validation, state))),
            events,
        }
    }
}

fn order_key(pooled: &PooledTransaction, sender: Address, base_fee: u128) -> OrderKey {
    OrderKey {
        tip: pooled.tx.effective_tip(base_fee).unwrap_or_default(),
        seq: Reverse(pooled.seq),
        sender,
    }
}
