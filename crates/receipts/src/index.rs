//! Receipt index.
//!
//! Receipts are stored per block, in transaction order, alongside a
//! transaction hash index. Log positions are derived on read.

use std::collections::{BTreeMap, HashMap};

use alloy_primitives::B256;
use ember_evm::ExecResult;
use ember_types::{
    fees, logs_bloom, BlockHeader, ChainRules, Log, Receipt, ReceiptOutcome, SealedBlock,
    Transaction, TxEnvelope, TxFields,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::filter::LogFilter;
use crate::{ReceiptError, Result};

/// Receipt index configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptConfig {
    /// Keep receipts of only the most recent N blocks
    pub retain_blocks: Option<u64>,
    /// Stop collecting logs once this many have been gathered
    pub max_logs: usize,
    /// Largest block range a single query may span
    pub max_block_range: u64,
}

impl Default for ReceiptConfig {
    fn default() -> Self {
        Self {
            retain_blocks: None,
            max_logs: 10_000,
            max_block_range: 2_500,
        }
    }
}

/// Receipts of one sealed block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockReceipts {
    /// Block hash
    pub block_hash: B256,
    /// Block number
    pub block_number: u64,
    /// Transaction hashes in block order
    pub tx_hashes: Vec<B256>,
    /// Receipts in block order
    pub receipts: Vec<Receipt>,
}

/// A receipt with its position in the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedReceipt {
    /// The receipt
    pub receipt: Receipt,
    /// Transaction hash
    pub tx_hash: B256,
    /// Hash of the including block
    pub block_hash: B256,
    /// Number of the including block
    pub block_number: u64,
    /// Index of the transaction in the block
    pub tx_index: usize,
    /// Block-level index of the receipt's first log
    pub first_log_index: usize,
}

/// A log with its position in the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionedLog {
    /// The log
    pub log: Log,
    /// Hash of the including block
    pub block_hash: B256,
    /// Number of the including block
    pub block_number: u64,
    /// Hash of the emitting transaction
    pub tx_hash: B256,
    /// Index of the emitting transaction in the block
    pub tx_index: usize,
    /// Index of the log in the block
    pub log_index: usize,
}

/// Serializable snapshot of a [`ReceiptIndex`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptsDump {
    /// Stored blocks in ascending number order
    pub blocks: Vec<BlockReceipts>,
    /// Transactions whose receipts were pruned, with their block number
    #[serde(default)]
    pub pruned: BTreeMap<B256, u64>,
}

impl ReceiptsDump {
    /// Checks that every block carries one receipt per transaction hash.
    pub fn validate(&self) -> Result<()> {
        match self
            .blocks
            .iter()
            .find(|block| block.receipts.len() != block.tx_hashes.len())
        {
            Some(block) => Err(ReceiptError::ReceiptCountMismatch {
                block: block.block_number,
                transactions: block.tx_hashes.len(),
                receipts: block.receipts.len(),
            }),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TxLocation {
    block_number: u64,
    tx_index: usize,
}

#[derive(Debug, Clone, Default)]
struct IndexInner {
    /// Receipts by block number
    blocks: BTreeMap<u64, BlockReceipts>,
    /// Location of every stored transaction
    by_tx: HashMap<B256, TxLocation>,
    /// Transactions whose block was pruned
    pruned: HashMap<B256, u64>,
}

impl IndexInner {
    fn insert(&mut self, block: BlockReceipts) {
        for (tx_index, tx_hash) in block.tx_hashes.iter().enumerate() {
            self.pruned.remove(tx_hash);
            self.by_tx.insert(
                *tx_hash,
                TxLocation {
                    block_number: block.block_number,
                    tx_index,
                },
            );
        }
        self.blocks.insert(block.block_number, block);
    }

    fn remove(&mut self, number: u64) -> Option<BlockReceipts> {
        let block = self.blocks.remove(&number)?;
        for tx_hash in &block.tx_hashes {
            self.by_tx.remove(tx_hash);
        }
        Some(block)
    }

    /// Drops every block at or below `number`.
    fn prune_through(&mut self, number: u64) -> usize {
        let pruned: Vec<u64> = self.blocks.range(..=number).map(|(n, _)| *n).collect();
        for n in &pruned {
            if let Some(block) = self.remove(*n) {
                for tx_hash in block.tx_hashes {
                    self.pruned.insert(tx_hash, block.block_number);
                }
            }
        }
        pruned.len()
    }
}

/// Receipt and log index
///
/// Builds receipts from execution results, stores them per sealed block and
/// answers receipt and log queries. Never touches chain or state itself.
#[derive(Debug)]
pub struct ReceiptIndex {
    rules: ChainRules,
    config: ReceiptConfig,
    inner: RwLock<IndexInner>,
}

impl ReceiptIndex {
    /// Create an empty index
    pub fn new(rules: ChainRules, config: ReceiptConfig) -> Self {
        Self {
            rules,
            config,
            inner: RwLock::new(IndexInner::default()),
        }
    }

    /// Index configuration
    pub fn config(&self) -> &ReceiptConfig {
        &self.config
    }

    /// Builds the receipt of `tx` executed in the block with `header`.
    ///
    /// From Byzantium on the receipt carries a status flag, set iff the
    /// execution did not halt. Before Byzantium it carries the state root
    /// after the transaction, read through `state_root` only in that case.
    pub fn record(
        &self,
        header: &BlockHeader,
        tx: &Transaction,
        result: &ExecResult,
        cumulative_gas_used: u64,
        state_root: impl FnOnce() -> B256,
    ) -> Receipt {
        let outcome = if self.rules.is_byzantium(header.number) {
            ReceiptOutcome::Status(result.is_success())
        } else {
            ReceiptOutcome::StateRoot(state_root())
        };

        let is_blob = tx.blob_count() > 0;
        let receipt = Receipt {
            tx_type: tx.tx_type(),
            outcome,
            cumulative_gas_used,
            logs_bloom: logs_bloom(&result.logs),
            logs: result.logs.clone(),
            gas_used: result.gas_used,
            effective_gas_price: tx.effective_gas_price(header.base_fee_per_gas),
            contract_address: result.created_address,
            blob_gas_used: is_blob.then(|| tx.blob_gas()),
            blob_gas_price: is_blob
                .then(|| fees::blob_gas_price(header.excess_blob_gas.unwrap_or_default())),
        };
        trace!(
            tx_hash = %tx.hash(),
            success = receipt.is_success(),
            cumulative_gas_used,
            "Built receipt"
        );
        receipt
    }

    /// Stores the receipts of a sealed block, one per transaction.
    ///
    /// Prunes blocks that fall out of the retention window.
    pub fn record_block(&self, block: &SealedBlock, receipts: Vec<Receipt>) -> Result<()> {
        if receipts.len() != block.block.transactions.len() {
            return Err(ReceiptError::ReceiptCountMismatch {
                block: block.number(),
                transactions: block.block.transactions.len(),
                receipts: receipts.len(),
            });
        }

        let entry = BlockReceipts {
            block_hash: block.hash,
            block_number: block.number(),
            tx_hashes: block.block.transactions.iter().map(|tx| tx.hash()).collect(),
            receipts,
        };

        let mut inner = self.inner.write();
        inner.insert(entry);
        debug!(
            block = block.number(),
            receipts = block.block.transactions.len(),
            "Recorded block receipts"
        );

        if let Some(retain) = self.config.retain_blocks {
            let newest = block.number();
            if newest >= retain {
                let pruned = inner.prune_through(newest - retain);
                if pruned > 0 {
                    debug!(pruned, newest, retain, "Pruned block receipts");
                }
            }
        }
        Ok(())
    }

    /// Removes the receipts of block `number`
    pub fn delete_block(&self, number: u64) -> Option<BlockReceipts> {
        self.inner.write().remove(number)
    }

    /// Receipt of a transaction with its position
    ///
    /// Returns `Ok(None)` for a transaction never indexed and
    /// [`ReceiptError::Pruned`] for one whose block fell out of the window.
    pub fn get_receipt(&self, tx_hash: &B256) -> Result<Option<IndexedReceipt>> {
        let inner = self.inner.read();
        let Some(location) = inner.by_tx.get(tx_hash).copied() else {
            return match inner.pruned.get(tx_hash) {
                Some(block_number) => Err(ReceiptError::Pruned {
                    tx_hash: *tx_hash,
                    block_number: *block_number,
                }),
                None => Ok(None),
            };
        };

        let Some(block) = inner.blocks.get(&location.block_number) else {
            return Ok(None);
        };
        let Some(receipt) = block.receipts.get(location.tx_index) else {
            return Ok(None);
        };
        let first_log_index = block.receipts[..location.tx_index]
            .iter()
            .map(|r| r.logs.len())
            .sum();

        Ok(Some(IndexedReceipt {
            receipt: receipt.clone(),
            tx_hash: *tx_hash,
            block_hash: block.block_hash,
            block_number: block.block_number,
            tx_index: location.tx_index,
            first_log_index,
        }))
    }

    /// Receipts of block `number`, if stored
    pub fn get_block_receipts(&self, number: u64) -> Option<BlockReceipts> {
        self.inner.read().blocks.get(&number).cloned()
    }

    /// Logs matching `filter`, ordered by block, transaction and log index
    ///
    /// Blocks without stored receipts are skipped. Collection stops after the
    /// block in which the configured log limit is reached.
    pub fn get_logs(&self, filter: &LogFilter) -> Result<Vec<PositionedLog>> {
        if filter.from_block > filter.to_block {
            return Err(ReceiptError::InvalidRange {
                from: filter.from_block,
                to: filter.to_block,
            });
        }
        let span = (filter.to_block - filter.from_block).saturating_add(1);
        if span > self.config.max_block_range {
            return Err(ReceiptError::RangeTooLarge {
                requested: span,
                max: self.config.max_block_range,
            });
        }

        let inner = self.inner.read();
        let mut logs = Vec::new();
        for block in inner
            .blocks
            .range(filter.from_block..=filter.to_block)
            .map(|(_, block)| block)
        {
            let mut log_index = 0;
            for (tx_index, (receipt, tx_hash)) in
                block.receipts.iter().zip(&block.tx_hashes).enumerate()
            {
                for log in &receipt.logs {
                    if filter.matches(log) {
                        logs.push(PositionedLog {
                            log: log.clone(),
                            block_hash: block.block_hash,
                            block_number: block.block_number,
                            tx_hash: *tx_hash,
                            tx_index,
                            log_index,
                        });
                    }
                    log_index += 1;
                }
            }
            if logs.len() >= self.config.max_logs {
                debug!(
                    collected = logs.len(),
                    last_block = block.block_number,
                    "Log limit reached"
                );
                break;
            }
        }
        Ok(logs)
    }

    /// Number of blocks with stored receipts
    pub fn len(&self) -> usize {
        self.inner.read().blocks.len()
    }

    /// Check if no receipts are stored
    pub fn is_empty(&self) -> bool {
        self.inner.read().blocks.is_empty()
    }

    /// Snapshot of every stored block
    pub fn dump(&self) -> ReceiptsDump {
        let inner = self.inner.read();
        ReceiptsDump {
            blocks: inner.blocks.values().cloned().collect(),
            pruned: inner.pruned.iter().map(|(h, n)| (*h, *n)).collect(),
        }
    }

    /// Replaces the index contents with `dump`
    ///
    /// Fails without touching the index if a block's receipts and
    /// transaction hashes disagree in number.
    pub fn load(&self, dump: ReceiptsDump) -> Result<()> {
        dump.validate()?;
        let mut inner = IndexInner::default();
        for block in dump.blocks {
            inner.insert(block);
        }
        inner.pruned = dump.pruned.into_iter().collect();
        *self.inner.write() = inner;
        Ok(())
    }

    /// Independent copy of the index
    pub fn deep_copy(&self) -> Self {
        Self {
            rules: self.rules,
            config: self.config,
            inner: RwLock::new(self.inner.read().clone()),
        }
    }
}
