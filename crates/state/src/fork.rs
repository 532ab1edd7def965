//! Read-through access to a remote chain.
//!
//! A [`ForkBackend`] owns the upstream transport, the block the fork is
//! pinned to and a cache of everything fetched so far. Concurrent misses for
//! the same key share one in-flight request; only successful responses are
//! memoized, so a timed-out or failed fetch leaves no trace in the cache.

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use ember_types::{keccak256, Account, BlockHeader, Transaction, KECCAK_EMPTY};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised while talking to the fork upstream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ForkError {
    /// The transport failed to deliver the request
    #[error("fork transport error: {0}")]
    Transport(String),

    /// The upstream did not answer within the configured timeout
    #[error("fork request timed out after {ms}ms")]
    Timeout {
        /// Timeout in milliseconds
        ms: u64,
    },

    /// The upstream answered with something that could not be interpreted
    #[error("invalid fork response: {0}")]
    InvalidResponse(String),
}

/// Account data as reported by the upstream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteAccount {
    /// Nonce
    pub nonce: u64,
    /// Balance
    pub balance: U256,
    /// Runtime code
    pub code: Bytes,
}

/// A transaction as reported by the upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTransaction {
    /// Hash reported by the upstream
    pub hash: B256,
    /// EIP-2718 type byte reported by the upstream
    pub tx_type: u8,
    /// The decoded transaction, when the type is one ember can represent
    pub tx: Option<Transaction>,
}

/// A block as reported by the upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBlock {
    /// Hash reported by the upstream
    pub hash: B256,
    /// Header
    pub header: BlockHeader,
    /// Transactions, including ones ember cannot execute
    pub transactions: Vec<RemoteTransaction>,
    /// Hashes of the uncle headers
    pub uncles: Vec<B256>,
}

/// Access to a remote chain for fork mode.
///
/// Retry policy, if any, belongs to implementations; the state store treats
/// every error as final for the read that triggered it.
#[async_trait]
pub trait ForkTransport: Send + Sync + 'static {
    /// Account nonce, balance and code at `block`.
    async fn get_account(&self, address: Address, block: u64) -> Result<RemoteAccount, ForkError>;

    /// One storage slot at `block`.
    async fn get_storage(&self, address: Address, key: B256, block: u64)
        -> Result<B256, ForkError>;

    /// Number of the upstream's latest block.
    async fn block_number(&self) -> Result<u64, ForkError>;

    /// Block by number with full transactions.
    async fn get_block_by_number(&self, number: u64) -> Result<Option<RemoteBlock>, ForkError>;

    /// Block by hash with full transactions.
    async fn get_block_by_hash(&self, hash: B256) -> Result<Option<RemoteBlock>, ForkError>;

    /// Uncle header of block `hash` at position `index`.
    async fn get_uncle(&self, hash: B256, index: usize) -> Result<Option<BlockHeader>, ForkError>;
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ForkCache {
    pub accounts: HashMap<Address, Option<Account>>,
    pub storage: HashMap<(Address, B256), B256>,
    pub codes: HashMap<B256, Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FetchKey {
    Account(Address),
    Storage(Address, B256),
}

#[derive(Debug, Clone)]
pub(crate) enum Fetched {
    Account(Option<Account>),
    Storage(B256),
}

type SharedFetch = Shared<BoxFuture<'static, Result<Fetched, ForkError>>>;

/// Upstream connection, pinned block and fetch cache of a forked store.
pub struct ForkBackend {
    transport: Arc<dyn ForkTransport>,
    block_number: u64,
    timeout: Option<Duration>,
    pub(crate) cache: RwLock<ForkCache>,
    inflight: Mutex<HashMap<FetchKey, SharedFetch>>,
}

impl std::fmt::Debug for ForkBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForkBackend")
            .field("block_number", &self.block_number)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ForkBackend {
    /// Creates a backend reading upstream state as of `block_number`.
    pub fn new(
        transport: Arc<dyn ForkTransport>,
        block_number: u64,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            transport,
            block_number,
            timeout,
            cache: RwLock::new(ForkCache::default()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Block the fork reads from.
    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    /// The upstream transport.
    pub fn transport(&self) -> Arc<dyn ForkTransport> {
        self.transport.clone()
    }

    /// A new backend sharing the transport with a copy of the cache.
    pub(crate) fn deep_copy(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            block_number: self.block_number,
            timeout: self.timeout,
            cache: RwLock::new(self.cache.read().clone()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn clear_cache(&self) {
        *self.cache.write() = ForkCache::default();
    }

    pub(crate) async fn fetch_account(
        self: &Arc<Self>,
        address: Address,
    ) -> Result<Option<Account>, ForkError> {
        match self.fetch(FetchKey::Account(address)).await? {
            Fetched::Account(account) => Ok(account),
            Fetched::Storage(_) => Err(ForkError::InvalidResponse("expected account".into())),
        }
    }

    pub(crate) async fn fetch_storage(
        self: &Arc<Self>,
        address: Address,
        key: B256,
    ) -> Result<B256, ForkError> {
        match self.fetch(FetchKey::Storage(address, key)).await? {
            Fetched::Storage(value) => Ok(value),
            Fetched::Account(_) => Err(ForkError::InvalidResponse("expected storage".into())),
        }
    }

    fn cached(&self, key: &FetchKey) -> Option<Fetched> {
        let cache = self.cache.read();
        match key {
            FetchKey::Account(address) => {
                cache.accounts.get(address).copied().map(Fetched::Account)
            }
            FetchKey::Storage(address, slot) => cache
                .storage
                .get(&(*address, *slot))
                .copied()
                .map(Fetched::Storage),
        }
    }

    async fn fetch(self: &Arc<Self>, key: FetchKey) -> Result<Fetched, ForkError> {
        let pending = {
            let mut inflight = self.inflight.lock();
            // re-checked under the in-flight lock: a fetch that completed
            // after the caller's cache miss has memoized before unregistering
            if let Some(hit) = self.cached(&key) {
                return Ok(hit);
            }
            match inflight.get(&key) {
                Some(pending) => {
                    debug!(?key, "Joining in-flight fork request");
                    pending.clone()
                }
                None => {
                    let pending = self.clone().run(key.clone()).boxed().shared();
                    inflight.insert(key, pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    async fn run(self: Arc<Self>, key: FetchKey) -> Result<Fetched, ForkError> {
        debug!(?key, block = self.block_number, "Fetching from fork");
        let request = self.request(&key);
        let result = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, request).await {
                Ok(result) => result,
                Err(_) => Err(ForkError::Timeout {
                    ms: timeout.as_millis() as u64,
                }),
            },
            None => request.await,
        };

        match &result {
            Ok((fetched, code)) => {
                let mut cache = self.cache.write();
                match fetched {
                    Fetched::Account(account) => {
                        if let FetchKey::Account(address) = &key {
                            cache.accounts.insert(*address, *account);
                        }
                        if let (Some(account), Some(code)) = (account, code) {
                            cache.codes.insert(account.code_hash, code.clone());
                        }
                    }
                    Fetched::Storage(value) => {
                        if let FetchKey::Storage(address, slot) = &key {
                            cache.storage.insert((*address, *slot), *value);
                        }
                    }
                }
            }
            Err(error) => warn!(?key, %error, "Fork request failed"),
        }
        self.inflight.lock().remove(&key);

        result.map(|(fetched, _)| fetched)
    }

    async fn request(&self, key: &FetchKey) -> Result<(Fetched, Option<Bytes>), ForkError> {
        match key {
            FetchKey::Account(address) => {
                let remote = self.transport.get_account(*address, self.block_number).await?;
                if remote.nonce == 0 && remote.balance.is_zero() && remote.code.is_empty() {
                    return Ok((Fetched::Account(None), None));
                }
                let code_hash = if remote.code.is_empty() {
                    KECCAK_EMPTY
                } else {
                    keccak256(&remote.code)
                };
                let account = Account {
                    nonce: remote.nonce,
                    balance: remote.balance,
                    code_hash,
                    ..Default::default()
                };
                Ok((Fetched::Account(Some(account)), Some(remote.code)))
            }
            FetchKey::Storage(address, slot) => {
                let value = self
                    .transport
                    .get_storage(*address, *slot, self.block_number)
                    .await?;
                Ok((Fetched::Storage(value), None))
            }
        }
    }
}
