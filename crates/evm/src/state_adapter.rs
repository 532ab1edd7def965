//! State Adapter
//!
//! Adapts the ember state store and chain to revm's `Database` trait, and
//! writes revm's post-execution state diff back into the store.

use alloy_primitives::{Address, B256, U256};
use ember_chain::{Chain, ChainError};
use ember_state::{StateError, StateStore};
use ember_types::{Account, KECCAK_EMPTY};
use revm::{
    primitives::{AccountInfo, Bytecode, EvmState},
    Database,
};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::trace;

/// revm database reading from a [`StateStore`] and a [`Chain`].
///
/// Local reads never leave the calling thread. A read that has to go to the
/// fork upstream blocks on `handle`, so a forked database must be driven from
/// a blocking thread rather than from inside the runtime.
pub(crate) struct StoreDb {
    store: Arc<StateStore>,
    chain: Arc<Chain>,
    handle: Handle,
}

impl StoreDb {
    pub(crate) fn new(store: Arc<StateStore>, chain: Arc<Chain>, handle: Handle) -> Self {
        Self {
            store,
            chain,
            handle,
        }
    }

    /// Whether any read may need to wait on the fork upstream.
    pub(crate) fn is_remote(&self) -> bool {
        self.store.is_forked() || self.chain.fork_block().is_some()
    }

    fn load_account(&self, address: Address) -> Result<Option<Account>, StateError> {
        match self.store.peek_account(address) {
            Some(account) => Ok(account),
            None => self.handle.block_on(self.store.get_account(address)),
        }
    }
}

impl Database for StoreDb {
    type Error = StateError;

    fn basic(&mut self, address: Address) -> Result<Option<AccountInfo>, Self::Error> {
        trace!(%address, "Loading account");
        let Some(account) = self.load_account(address)? else {
            return Ok(None);
        };
        let code = self.store.get_code(account.code_hash)?;
        Ok(Some(AccountInfo {
            balance: account.balance,
            nonce: account.nonce,
            code_hash: account.code_hash,
            code: Some(Bytecode::new_raw(code)),
        }))
    }

    fn code_by_hash(&mut self, code_hash: B256) -> Result<Bytecode, Self::Error> {
        trace!(hash = %code_hash, "Loading code");
        Ok(Bytecode::new_raw(self.store.get_code(code_hash)?))
    }

    fn storage(&mut self, address: Address, index: U256) -> Result<U256, Self::Error> {
        let key = B256::from(index);
        let value = match self.store.peek_storage(address, key) {
            Some(value) => value,
            None => self.handle.block_on(self.store.get_storage(address, key))?,
        };
        Ok(U256::from_be_bytes(value.0))
    }

    fn block_hash(&mut self, number: u64) -> Result<B256, Self::Error> {
        if let Some(hash) = self.chain.block_hash(number) {
            return Ok(hash);
        }
        match self.chain.fork_block() {
            Some(fork_block) if number <= fork_block => {
                match self.handle.block_on(self.chain.get_block(number)) {
                    Ok(block) => Ok(block.hash),
                    Err(ChainError::Fork(err)) => Err(StateError::Fork(err)),
                    Err(_) => Ok(B256::ZERO),
                }
            }
            _ => Ok(B256::ZERO),
        }
    }
}

/// Writes a revm state diff into the innermost layer of `store`.
///
/// Self-destructed accounts are deleted with their storage. Accounts created
/// during execution start from empty storage.
pub(crate) fn apply_state(store: &StateStore, state: EvmState) {
    for (address, account) in state {
        if !account.is_touched() {
            continue;
        }
        if account.is_selfdestructed() {
            trace!(%address, "Deleting self-destructed account");
            store.delete_account(address);
            continue;
        }

        if account.is_created() {
            store.clear_storage(address);
            if let Some(code) = account.info.code.as_ref().filter(|code| !code.is_empty()) {
                store.put_code(code.original_bytes());
            }
        }

        let code_hash = if account.info.code_hash == B256::ZERO {
            KECCAK_EMPTY
        } else {
            account.info.code_hash
        };
        store.put_account(
            address,
            Account {
                nonce: account.info.nonce,
                balance: account.info.balance,
                code_hash,
                ..Default::default()
            },
        );

        for (slot, value) in account.storage {
            if value.is_changed() {
                store.put_storage(address, B256::from(slot), B256::from(value.present_value));
            }
        }
    }
}
