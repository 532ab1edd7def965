//! The layered world state.

use crate::dump::{DumpAccount, StateDump};
use crate::fork::{ForkBackend, ForkTransport};
use crate::layer::Layer;
use crate::{Result, StateError};
use alloy_primitives::{Address, Bytes, B256, U256};
use ember_types::{keccak256, trie, Account, KECCAK_EMPTY};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

#[derive(Debug, Clone)]
struct Inner {
    /// `layers[0]` is the base; every open checkpoint adds one on top.
    layers: Vec<Layer>,
    /// Content-addressed, so never rolled back.
    codes: HashMap<B256, Bytes>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            layers: vec![Layer::default()],
            codes: HashMap::new(),
        }
    }
}

impl Inner {
    fn top(&mut self) -> &mut Layer {
        let top = self.layers.len() - 1;
        &mut self.layers[top]
    }

    fn local_account(&self, address: &Address) -> Option<Option<Account>> {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| layer.accounts.get(address).copied())
    }

    /// `Some(value)` when a layer decides the slot; `Some(ZERO)` once a
    /// cleared diff hides everything below it.
    fn local_storage(&self, address: &Address, key: &B256) -> Option<B256> {
        for layer in self.layers.iter().rev() {
            if let Some(diff) = layer.storage.get(address) {
                if let Some(value) = diff.slots.get(key) {
                    return Some(*value);
                }
                if diff.cleared {
                    return Some(B256::ZERO);
                }
            }
        }
        None
    }
}

/// Account and contract-storage state with nested checkpoints and optional
/// read-through to a remote chain.
///
/// Reads consult the checkpoint layers from the innermost outwards, then the
/// fork cache, then the fork upstream. Writes always land in the innermost
/// layer and never reach the upstream.
#[derive(Debug, Default)]
pub struct StateStore {
    inner: RwLock<Inner>,
    fork: Option<Arc<ForkBackend>>,
}

impl StateStore {
    /// Creates an empty local store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store reading missing state from `transport` as of `block`.
    pub fn forked(
        transport: Arc<dyn ForkTransport>,
        block: u64,
        timeout: Option<Duration>,
    ) -> Self {
        info!(block, ?timeout, "Creating forked state store");
        Self {
            inner: RwLock::new(Inner::default()),
            fork: Some(Arc::new(ForkBackend::new(transport, block, timeout))),
        }
    }

    /// Whether reads fall through to a remote chain.
    pub fn is_forked(&self) -> bool {
        self.fork.is_some()
    }

    /// The fork backend, if any.
    pub fn fork(&self) -> Option<&Arc<ForkBackend>> {
        self.fork.as_ref()
    }

    /// Block the fork is pinned to.
    pub fn fork_block(&self) -> Option<u64> {
        self.fork.as_ref().map(|fork| fork.block_number())
    }

    // ---- reads ----

    /// Looks up an account without touching the upstream.
    ///
    /// Returns `None` when the answer is only known upstream, `Some(None)`
    /// when the account is known to be absent.
    pub fn peek_account(&self, address: Address) -> Option<Option<Account>> {
        if let Some(account) = self.inner.read().local_account(&address) {
            return Some(account);
        }
        match &self.fork {
            Some(fork) => fork.cache.read().accounts.get(&address).copied(),
            None => Some(None),
        }
    }

    /// Looks up a storage slot without touching the upstream.
    pub fn peek_storage(&self, address: Address, key: B256) -> Option<B256> {
        if let Some(value) = self.inner.read().local_storage(&address, &key) {
            return Some(value);
        }
        match &self.fork {
            Some(fork) => fork.cache.read().storage.get(&(address, key)).copied(),
            None => Some(B256::ZERO),
        }
    }

    /// Returns the account at `address`, with its storage root filled in.
    ///
    /// Empty accounts are reported as absent.
    pub async fn get_account(&self, address: Address) -> Result<Option<Account>> {
        let account = match self.peek_account(address) {
            Some(account) => account,
            None => self.fetch_account(address).await?,
        };
        Ok(account
            .filter(|account| !account.is_empty())
            .map(|mut account| {
                account.storage_root = self.storage_root_of(address);
                account
            }))
    }

    /// Returns the storage slot `key` of `address`; unset slots read as zero.
    pub async fn get_storage(&self, address: Address, key: B256) -> Result<B256> {
        if let Some(value) = self.peek_storage(address, key) {
            return Ok(value);
        }
        match &self.fork {
            Some(fork) => Ok(fork.fetch_storage(address, key).await?),
            None => Ok(B256::ZERO),
        }
    }

    /// Returns code by hash.
    pub fn get_code(&self, code_hash: B256) -> Result<Bytes> {
        if code_hash == KECCAK_EMPTY {
            return Ok(Bytes::new());
        }
        if let Some(code) = self.inner.read().codes.get(&code_hash) {
            return Ok(code.clone());
        }
        if let Some(code) = self
            .fork
            .as_ref()
            .and_then(|fork| fork.cache.read().codes.get(&code_hash).cloned())
        {
            return Ok(code);
        }
        Err(StateError::CodeNotFound(code_hash))
    }

    /// Returns the runtime code deployed at `address`.
    pub async fn get_account_code(&self, address: Address) -> Result<Bytes> {
        match self.get_account(address).await? {
            Some(account) => self.get_code(account.code_hash),
            None => Ok(Bytes::new()),
        }
    }

    async fn fetch_account(&self, address: Address) -> Result<Option<Account>> {
        match &self.fork {
            Some(fork) => Ok(fork.fetch_account(address).await?),
            None => Ok(None),
        }
    }

    // ---- writes ----

    /// Writes `account` to the innermost layer. Writing an empty account
    /// deletes it, leaving its storage untouched.
    pub fn put_account(&self, address: Address, account: Account) {
        trace!(%address, nonce = account.nonce, balance = %account.balance, "put_account");
        let entry = (!account.is_empty()).then_some(account);
        self.inner.write().top().accounts.insert(address, entry);
    }

    /// Removes the account and all of its storage.
    pub fn delete_account(&self, address: Address) {
        trace!(%address, "delete_account");
        let mut inner = self.inner.write();
        let top = inner.top();
        top.accounts.insert(address, None);
        top.wipe_storage(address);
    }

    /// Hides every storage slot of `address`, local or upstream.
    pub fn clear_storage(&self, address: Address) {
        self.inner.write().top().wipe_storage(address);
    }

    /// Writes one storage slot. Writing zero is equivalent to deleting it.
    pub fn put_storage(&self, address: Address, key: B256, value: B256) {
        trace!(%address, %key, %value, "put_storage");
        self.inner
            .write()
            .top()
            .storage
            .entry(address)
            .or_default()
            .slots
            .insert(key, value);
    }

    /// Stores `code` and returns its keccak hash.
    pub fn put_code(&self, code: Bytes) -> B256 {
        if code.is_empty() {
            return KECCAK_EMPTY;
        }
        let hash = keccak256(&code);
        self.inner.write().codes.entry(hash).or_insert(code);
        hash
    }

    /// Applies `f` to the current account (or a fresh one) and writes it back.
    pub async fn modify_account(
        &self,
        address: Address,
        f: impl FnOnce(&mut Account),
    ) -> Result<Account> {
        let mut account = self.get_account(address).await?.unwrap_or_default();
        f(&mut account);
        self.put_account(address, account);
        Ok(account)
    }

    /// Overwrites the balance of `address`.
    pub async fn set_balance(&self, address: Address, balance: U256) -> Result<()> {
        self.modify_account(address, |account| account.balance = balance)
            .await
            .map(|_| ())
    }

    /// Overwrites the nonce of `address`.
    pub async fn set_nonce(&self, address: Address, nonce: u64) -> Result<()> {
        self.modify_account(address, |account| account.nonce = nonce)
            .await
            .map(|_| ())
    }

    /// Replaces the runtime code of `address`.
    pub async fn set_account_code(&self, address: Address, code: Bytes) -> Result<B256> {
        let code_hash = self.put_code(code);
        self.modify_account(address, |account| account.code_hash = code_hash)
            .await?;
        Ok(code_hash)
    }

    // ---- checkpoints ----

    /// Opens a new checkpoint.
    pub fn checkpoint(&self) {
        let mut inner = self.inner.write();
        inner.layers.push(Layer::default());
        trace!(depth = inner.layers.len() - 1, "checkpoint");
    }

    /// Merges the innermost checkpoint into its parent.
    ///
    /// # Panics
    ///
    /// Panics if no checkpoint is open.
    pub fn commit(&self) {
        let mut inner = self.inner.write();
        assert!(
            inner.layers.len() > 1,
            "commit called without an open checkpoint"
        );
        if let Some(top) = inner.layers.pop() {
            inner.top().absorb(top);
        }
        trace!(depth = inner.layers.len() - 1, "commit");
    }

    /// Discards every write made since the innermost checkpoint.
    ///
    /// # Panics
    ///
    /// Panics if no checkpoint is open.
    pub fn revert(&self) {
        let mut inner = self.inner.write();
        assert!(
            inner.layers.len() > 1,
            "revert called without an open checkpoint"
        );
        inner.layers.pop();
        trace!(depth = inner.layers.len() - 1, "revert");
    }

    /// Number of open checkpoints.
    pub fn checkpoint_depth(&self) -> usize {
        self.inner.read().layers.len() - 1
    }

    // ---- roots and snapshots ----

    /// Flattens every layer over the fork cache into one view.
    fn flatten(&self) -> (BTreeMap<Address, Account>, BTreeMap<Address, BTreeMap<B256, B256>>) {
        let mut accounts: BTreeMap<Address, Account> = BTreeMap::new();
        let mut storage: BTreeMap<Address, BTreeMap<B256, B256>> = BTreeMap::new();

        if let Some(fork) = &self.fork {
            let cache = fork.cache.read();
            for (address, account) in &cache.accounts {
                if let Some(account) = account {
                    accounts.insert(*address, *account);
                }
            }
            for ((address, key), value) in &cache.storage {
                storage.entry(*address).or_default().insert(*key, *value);
            }
        }

        let inner = self.inner.read();
        for layer in &inner.layers {
            for (address, account) in &layer.accounts {
                match account {
                    Some(account) => {
                        accounts.insert(*address, *account);
                    }
                    None => {
                        accounts.remove(address);
                    }
                }
            }
            for (address, diff) in &layer.storage {
                let slots = storage.entry(*address).or_default();
                if diff.cleared {
                    slots.clear();
                }
                slots.extend(diff.slots.iter().map(|(k, v)| (*k, *v)));
            }
        }

        for slots in storage.values_mut() {
            slots.retain(|_, value| !value.is_zero());
        }
        storage.retain(|_, slots| !slots.is_empty());
        (accounts, storage)
    }

    fn storage_root_of(&self, address: Address) -> B256 {
        let mut slots: BTreeMap<B256, B256> = BTreeMap::new();
        if let Some(fork) = &self.fork {
            let cache = fork.cache.read();
            slots.extend(
                cache
                    .storage
                    .iter()
                    .filter(|((owner, _), _)| *owner == address)
                    .map(|((_, key), value)| (*key, *value)),
            );
        }
        let inner = self.inner.read();
        for diff in inner.layers.iter().filter_map(|l| l.storage.get(&address)) {
            if diff.cleared {
                slots.clear();
            }
            slots.extend(diff.slots.iter().map(|(k, v)| (*k, *v)));
        }
        trie::storage_root(slots)
    }

    /// Merkle-Patricia root over every account visible locally.
    ///
    /// In fork mode only state fetched so far is included.
    pub fn state_root(&self) -> B256 {
        let (accounts, storage) = self.flatten();
        trie::state_root(accounts.into_iter().map(|(address, mut account)| {
            account.storage_root = trie::storage_root(
                storage
                    .get(&address)
                    .into_iter()
                    .flatten()
                    .map(|(k, v)| (*k, *v)),
            );
            (address, account)
        }))
    }

    /// Serializable snapshot of every visible account with its code and
    /// non-zero storage.
    pub fn dump_state(&self) -> Result<StateDump> {
        let (accounts, mut storage) = self.flatten();
        let mut dump = StateDump::default();
        for (address, account) in accounts {
            let code = self.get_code(account.code_hash)?;
            dump.accounts.insert(
                address,
                DumpAccount {
                    nonce: account.nonce,
                    balance: account.balance,
                    code,
                    storage: storage.remove(&address).unwrap_or_default(),
                },
            );
        }
        debug!(accounts = dump.accounts.len(), "Dumped state");
        Ok(dump)
    }

    /// Writes every account of `dump` into the innermost layer, replacing
    /// the storage of each account it names.
    pub fn load_state(&self, dump: &StateDump) {
        for (address, entry) in &dump.accounts {
            let code_hash = self.put_code(entry.code.clone());
            self.put_account(
                *address,
                Account {
                    nonce: entry.nonce,
                    balance: entry.balance,
                    code_hash,
                    ..Default::default()
                },
            );
            self.clear_storage(*address);
            for (key, value) in &entry.storage {
                self.put_storage(*address, *key, *value);
            }
        }
        debug!(accounts = dump.accounts.len(), "Loaded state");
    }

    /// Resets the local state to exactly `dump`.
    ///
    /// Every checkpoint layer is discarded, so accounts written since the
    /// dump was taken and absent from it disappear. Code and the fork cache
    /// are kept; both only hold content already fixed by its key.
    pub fn replace_state(&self, dump: &StateDump) {
        {
            let mut inner = self.inner.write();
            if inner.layers.len() > 1 {
                debug!(depth = inner.layers.len() - 1, "Discarding open checkpoints");
            }
            inner.layers = vec![Layer::default()];
        }
        self.load_state(dump);
    }

    /// An independent copy of this store, including open checkpoints and the
    /// fork cache. The copy shares only the upstream transport.
    pub fn deep_copy(&self) -> Self {
        Self {
            inner: RwLock::new(self.inner.read().clone()),
            fork: self
                .fork
                .as_ref()
                .map(|fork| Arc::new(fork.deep_copy())),
        }
    }

    /// Drops everything fetched from the upstream so far.
    pub fn clear_caches(&self) {
        if let Some(fork) = &self.fork {
            fork.clear_cache();
            debug!("Cleared fork cache");
        }
    }
}
