//! Importing blocks from a fork upstream.

use crate::tag::BlockId;
use crate::Result;
use ember_state::{ForkTransport, RemoteBlock};
use ember_types::{Block, SealedBlock};
use std::sync::Arc;
use tracing::{debug, warn};

/// Upstream of a forked chain.
#[derive(Clone)]
pub(crate) struct ChainFork {
    transport: Arc<dyn ForkTransport>,
    block_number: u64,
}

impl ChainFork {
    pub fn new(transport: Arc<dyn ForkTransport>, block_number: u64) -> Self {
        Self {
            transport,
            block_number,
        }
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    /// Fetches and converts one upstream block.
    pub async fn fetch(&self, id: BlockId) -> Result<Option<SealedBlock>> {
        let remote = match id {
            BlockId::Number(n) => self.transport.get_block_by_number(n).await?,
            BlockId::Hash(h) => self.transport.get_block_by_hash(h).await?,
        };
        match remote {
            Some(remote) if remote.header.number <= self.block_number => {
                Ok(Some(import_remote_block(self.transport.as_ref(), remote).await?))
            }
            _ => Ok(None),
        }
    }
}

/// Converts an upstream block, fetching its uncles one by one and dropping
/// transactions of types the interpreter cannot represent.
///
/// The block keeps the hash the upstream reported.
pub(crate) async fn import_remote_block(
    transport: &dyn ForkTransport,
    remote: RemoteBlock,
) -> Result<SealedBlock> {
    let RemoteBlock {
        hash,
        header,
        transactions,
        uncles,
    } = remote;

    let mut ommers = Vec::with_capacity(uncles.len());
    for index in 0..uncles.len() {
        match transport.get_uncle(hash, index).await? {
            Some(uncle) => ommers.push(uncle),
            None => warn!(%hash, index, "Upstream is missing an uncle header"),
        }
    }

    let total = transactions.len();
    let transactions: Vec<_> = transactions
        .into_iter()
        .filter_map(|remote| {
            if remote.tx.is_none() {
                debug!(
                    tx_hash = %remote.hash,
                    tx_type = remote.tx_type,
                    "Skipping unsupported transaction type"
                );
            }
            remote.tx
        })
        .collect();
    if transactions.len() < total {
        warn!(
            %hash,
            dropped = total - transactions.len(),
            "Dropped unsupported transactions from forked block"
        );
    }

    let mut block = Block::new(header, transactions);
    block.ommers = ommers;
    Ok(SealedBlock::new_unchecked(block, hash))
}
