//! Checkpoint diff layers.

use alloy_primitives::{Address, B256};
use ember_types::Account;
use std::collections::HashMap;

/// Storage writes made to one account inside a layer.
#[derive(Debug, Clone, Default)]
pub(crate) struct StorageDiff {
    /// Set when the account's storage was wiped (self-destruct or deletion);
    /// slots in lower layers are then invisible.
    pub cleared: bool,
    pub slots: HashMap<B256, B256>,
}

/// One checkpoint's worth of account and storage writes.
///
/// An account mapped to `None` was deleted in this layer.
#[derive(Debug, Clone, Default)]
pub(crate) struct Layer {
    pub accounts: HashMap<Address, Option<Account>>,
    pub storage: HashMap<Address, StorageDiff>,
}

impl Layer {
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.storage.is_empty()
    }

    /// Folds `top` into `self`, with `top` taking precedence.
    pub fn absorb(&mut self, top: Layer) {
        self.accounts.extend(top.accounts);
        for (address, diff) in top.storage {
            if diff.cleared {
                self.storage.insert(address, diff);
                continue;
            }
            self.storage
                .entry(address)
                .or_default()
                .slots
                .extend(diff.slots);
        }
    }

    pub fn wipe_storage(&mut self, address: Address) {
        self.storage.insert(
            address,
            StorageDiff {
                cleared: true,
                slots: HashMap::new(),
            },
        );
    }
}
