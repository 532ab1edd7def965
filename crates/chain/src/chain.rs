//! The canonical chain.

use crate::fork::{import_remote_block, ChainFork};
use crate::tag::{BlockId, BlockTag};
use crate::validation::{self, HeaderChecks};
use crate::{ChainError, Result};
use alloy_primitives::{Address, Bytes, B256};
use ember_state::{ForkTransport, StateStore};
use ember_types::fees::BaseFeeParams;
use ember_types::{Block, BlockHeader, ChainRules, SealedBlock, EMPTY_ROOT_HASH};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Header fields of a locally created genesis block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenesisParams {
    /// Block gas limit
    pub gas_limit: u64,
    /// Unix timestamp
    pub timestamp: u64,
    /// Beneficiary
    pub coinbase: Address,
    /// Base fee, when the fee market is active
    pub base_fee: u128,
    /// Extra data
    pub extra_data: Bytes,
}

impl Default for GenesisParams {
    fn default() -> Self {
        Self {
            gas_limit: 30_000_000,
            timestamp: 0,
            coinbase: Address::ZERO,
            base_fee: ember_types::fees::INITIAL_BASE_FEE,
            extra_data: Bytes::new(),
        }
    }
}

/// Serializable form of a chain, see [`Chain::dump`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChainDump {
    /// Every local block, ascending by number
    pub blocks: Vec<SealedBlock>,
    /// Safe head number
    pub safe: Option<u64>,
}

#[derive(Debug, Default)]
struct ChainInner {
    blocks_by_number: BTreeMap<u64, Arc<SealedBlock>>,
    blocks_by_hash: HashMap<B256, u64>,
    head: Option<u64>,
    safe: Option<u64>,
    pending: Option<Arc<SealedBlock>>,
}

impl ChainInner {
    fn insert(&mut self, block: Arc<SealedBlock>) {
        self.blocks_by_hash.insert(block.hash, block.number());
        self.blocks_by_number.insert(block.number(), block);
    }

    fn by_id(&self, id: &BlockId) -> Option<Arc<SealedBlock>> {
        let number = match id {
            BlockId::Number(n) => *n,
            BlockId::Hash(h) => *self.blocks_by_hash.get(h)?,
        };
        self.blocks_by_number.get(&number).cloned()
    }

    fn head(&self) -> Result<Arc<SealedBlock>> {
        self.head
            .and_then(|n| self.blocks_by_number.get(&n).cloned())
            .ok_or(ChainError::EmptyChain)
    }
}

/// The canonical sequence of blocks with tag resolution.
///
/// Block numbers increase by one per block and every block's parent hash
/// references the previous canonical block. A forked chain starts at the
/// imported fork block; older blocks are fetched from the upstream on demand.
pub struct Chain {
    rules: ChainRules,
    fee_params: BaseFeeParams,
    inner: RwLock<ChainInner>,
    fork: Option<ChainFork>,
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Chain")
            .field("rules", &self.rules)
            .field("head", &inner.head)
            .field("blocks", &inner.blocks_by_number.len())
            .field("forked", &self.fork.is_some())
            .finish()
    }
}

impl Chain {
    /// Creates a chain without any block.
    pub fn new(rules: ChainRules, fee_params: BaseFeeParams) -> Self {
        Self {
            rules,
            fee_params,
            inner: RwLock::new(ChainInner::default()),
            fork: None,
        }
    }

    /// Creates a chain whose genesis commits to the current state of `store`.
    pub fn with_genesis(
        rules: ChainRules,
        fee_params: BaseFeeParams,
        store: &StateStore,
        params: GenesisParams,
    ) -> Self {
        let chain = Self::new(rules, fee_params);
        let genesis = chain.genesis_block(store, params);
        info!(
            hash = %genesis.hash,
            state_root = %genesis.header().state_root,
            "Created genesis block"
        );
        {
            let mut inner = chain.inner.write();
            inner.insert(Arc::new(genesis));
            inner.head = Some(0);
        }
        chain
    }

    fn genesis_block(&self, store: &StateStore, params: GenesisParams) -> SealedBlock {
        let hardfork = self.rules.hardfork;
        let header = BlockHeader {
            coinbase: params.coinbase,
            state_root: store.state_root(),
            gas_limit: params.gas_limit,
            timestamp: params.timestamp,
            extra_data: params.extra_data,
            base_fee_per_gas: hardfork.is_london().then_some(params.base_fee),
            withdrawals_root: hardfork.is_shanghai().then_some(EMPTY_ROOT_HASH),
            blob_gas_used: hardfork.is_cancun().then_some(0),
            excess_blob_gas: hardfork.is_cancun().then_some(0),
            parent_beacon_block_root: hardfork.is_cancun().then_some(B256::ZERO),
            ..Default::default()
        };
        let mut block = Block::new(header, Vec::new());
        if hardfork.is_shanghai() {
            block.withdrawals = Some(Vec::new());
        }
        block.seal()
    }

    /// Forks from `transport` at `tag`.
    ///
    /// Imports the fork block, with its uncles and minus any transaction the
    /// interpreter cannot represent, as the initial canonical head and
    /// returns a state store reading through to the upstream at that block.
    pub async fn fork_from(
        rules: ChainRules,
        fee_params: BaseFeeParams,
        transport: Arc<dyn ForkTransport>,
        tag: &BlockTag,
        timeout: Option<Duration>,
    ) -> Result<(Self, StateStore)> {
        let remote = match tag {
            BlockTag::Hash(hash) => transport.get_block_by_hash(*hash).await?,
            BlockTag::Finalized => return Err(ChainError::UnsupportedTag("finalized")),
            BlockTag::Earliest => transport.get_block_by_number(1).await?,
            BlockTag::Number(n) => transport.get_block_by_number(*n).await?,
            BlockTag::Latest | BlockTag::Safe | BlockTag::Pending => {
                let latest = transport.block_number().await?;
                transport.get_block_by_number(latest).await?
            }
        };
        let remote = remote.ok_or_else(|| {
            ChainError::InvalidBlock(format!("fork block {tag} not found upstream"))
        })?;
        let block = import_remote_block(transport.as_ref(), remote).await?;
        let number = block.number();

        info!(
            number,
            hash = %block.hash,
            transactions = block.block.transactions.len(),
            "Forked chain"
        );

        let chain = Self {
            rules,
            fee_params,
            inner: RwLock::new(ChainInner::default()),
            fork: Some(ChainFork::new(transport.clone(), number)),
        };
        {
            let mut inner = chain.inner.write();
            inner.insert(Arc::new(block));
            inner.head = Some(number);
        }
        let store = StateStore::forked(transport, number, timeout);
        Ok((chain, store))
    }

    /// Chain rules.
    pub fn rules(&self) -> &ChainRules {
        &self.rules
    }

    /// Base fee controller parameters.
    pub fn fee_params(&self) -> &BaseFeeParams {
        &self.fee_params
    }

    /// Number of the fork block, if forked.
    pub fn fork_block(&self) -> Option<u64> {
        self.fork.as_ref().map(ChainFork::block_number)
    }

    /// The canonical head.
    pub fn canonical_head(&self) -> Result<Arc<SealedBlock>> {
        self.inner.read().head()
    }

    /// Number of the canonical head.
    pub fn head_number(&self) -> Option<u64> {
        self.inner.read().head
    }

    /// Looks up a block without consulting the fork upstream.
    pub fn get_local_block(&self, id: impl Into<BlockId>) -> Option<Arc<SealedBlock>> {
        self.inner.read().by_id(&id.into())
    }

    /// Hash of the canonical block `number`, if known locally.
    pub fn block_hash(&self, number: u64) -> Option<B256> {
        self.inner
            .read()
            .blocks_by_number
            .get(&number)
            .map(|block| block.hash)
    }

    /// Returns a canonical block by number or hash.
    ///
    /// Blocks before the fork point are fetched from the upstream and kept.
    pub async fn get_block(&self, id: impl Into<BlockId>) -> Result<Arc<SealedBlock>> {
        let id = id.into();
        if let Some(block) = self.get_local_block(id) {
            return Ok(block);
        }
        let Some(fork) = &self.fork else {
            return Err(ChainError::UnknownBlock(id));
        };
        if matches!(id, BlockId::Number(n) if n > fork.block_number()) {
            return Err(ChainError::UnknownBlock(id));
        }

        let block = fork.fetch(id).await?.ok_or(ChainError::UnknownBlock(id))?;
        debug!(number = block.number(), hash = %block.hash, "Fetched historical block from fork");
        let block = Arc::new(block);
        self.inner.write().insert(block.clone());
        Ok(block)
    }

    /// Resolves a block tag.
    ///
    /// `earliest` is block 1; block 0 is the genesis seed state and is only
    /// addressable by number or hash.
    pub async fn resolve_tag(&self, tag: &BlockTag) -> Result<Arc<SealedBlock>> {
        match tag {
            BlockTag::Latest => self.canonical_head(),
            BlockTag::Earliest => self.get_block(1).await,
            BlockTag::Safe => {
                let safe = self.inner.read().safe;
                match safe {
                    Some(number) => self.get_block(number).await,
                    None => Err(ChainError::InvalidBlock("no safe block designated".into())),
                }
            }
            BlockTag::Finalized => Err(ChainError::UnsupportedTag("finalized")),
            BlockTag::Pending => {
                let pending = self.inner.read().pending.clone();
                match pending {
                    Some(block) => Ok(block),
                    None => self.canonical_head(),
                }
            }
            BlockTag::Number(n) => {
                let head = self.canonical_head()?.number();
                if *n > head {
                    return Err(ChainError::InvalidBlock(format!(
                        "block {n} is past the canonical head {head}"
                    )));
                }
                self.get_block(*n).await
            }
            BlockTag::Hash(hash) => self.get_block(*hash).await,
        }
    }

    /// Appends a validated block and makes it the canonical head.
    pub fn put_block(&self, block: SealedBlock) -> Result<Arc<SealedBlock>> {
        self.insert_block(block, HeaderChecks::All)
    }

    /// Like [`Chain::put_block`], but accepts any base fee.
    pub fn put_block_with_base_fee_override(
        &self,
        block: SealedBlock,
    ) -> Result<Arc<SealedBlock>> {
        self.insert_block(block, HeaderChecks::SkipBaseFee)
    }

    fn insert_block(&self, block: SealedBlock, checks: HeaderChecks) -> Result<Arc<SealedBlock>> {
        let mut inner = self.inner.write();
        if let Ok(parent) = inner.head() {
            validation::validate_header(
                &self.rules,
                &self.fee_params,
                parent.header(),
                parent.hash,
                block.header(),
                checks,
            )?;
        }

        let block = Arc::new(block);
        let number = block.number();
        inner.insert(block.clone());
        inner.head = Some(number);
        if inner
            .pending
            .as_ref()
            .is_some_and(|pending| pending.number() <= number)
        {
            inner.pending = None;
        }
        debug!(
            number,
            hash = %block.hash,
            txs = block.block.transactions.len(),
            "Block added to chain"
        );
        Ok(block)
    }

    /// Designates the safe head.
    pub fn set_safe_head(&self, number: u64) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.blocks_by_number.contains_key(&number) {
            return Err(ChainError::UnknownBlock(BlockId::Number(number)));
        }
        inner.safe = Some(number);
        Ok(())
    }

    /// Sets or clears the block currently being built.
    pub fn set_pending(&self, block: Option<SealedBlock>) {
        self.inner.write().pending = block.map(Arc::new);
    }

    /// Base fee the next block must carry.
    pub fn next_base_fee(&self) -> Result<Option<u128>> {
        let head = self.canonical_head()?;
        Ok(validation::next_base_fee(&self.rules, &self.fee_params, head.header()))
    }

    /// Excess blob gas the next block must carry.
    pub fn next_excess_blob_gas(&self) -> Result<Option<u64>> {
        let head = self.canonical_head()?;
        Ok(validation::next_excess_blob_gas(&self.rules, head.header()))
    }

    /// Every local block and the safe pointer.
    pub fn dump(&self) -> ChainDump {
        let inner = self.inner.read();
        ChainDump {
            blocks: inner
                .blocks_by_number
                .values()
                .map(|block| block.as_ref().clone())
                .collect(),
            safe: inner.safe,
        }
    }

    /// Replaces the local blocks with those of `dump`. The highest block
    /// becomes the head.
    pub fn load(&self, dump: ChainDump) -> Result<()> {
        let mut inner = ChainInner::default();
        for block in dump.blocks {
            if let Some(head) = inner.head {
                if block.number() <= head {
                    return Err(ChainError::InvalidBlock(format!(
                        "dump is not ordered at block {}",
                        block.number()
                    )));
                }
            }
            inner.head = Some(block.number());
            inner.insert(Arc::new(block));
        }
        inner.safe = dump.safe;
        debug!(head = ?inner.head, "Loaded chain");
        *self.inner.write() = inner;
        Ok(())
    }

    /// A copy sharing only the upstream transport.
    pub fn deep_copy(&self) -> Self {
        let inner = self.inner.read();
        Self {
            rules: self.rules,
            fee_params: self.fee_params,
            inner: RwLock::new(ChainInner {
                blocks_by_number: inner.blocks_by_number.clone(),
                blocks_by_hash: inner.blocks_by_hash.clone(),
                head: inner.head,
                safe: inner.safe,
                pending: inner.pending.clone(),
            }),
            fork: self.fork.clone(),
        }
    }
}
