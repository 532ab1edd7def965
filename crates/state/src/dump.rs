//! Serializable state snapshots.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One account of a [`StateDump`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DumpAccount {
    /// Nonce
    pub nonce: u64,
    /// Balance
    pub balance: U256,
    /// Runtime code, empty for externally owned accounts
    #[serde(default, skip_serializing_if = "alloy_primitives::bytes::Bytes::is_empty")]
    pub code: Bytes,
    /// Non-zero storage slots
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub storage: BTreeMap<B256, B256>,
}

/// A deterministic snapshot of every account visible in a store.
///
/// Ordered maps keep the serialized form stable, so dumping a store that was
/// loaded from a dump reproduces the same bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateDump {
    /// Accounts by address
    pub accounts: BTreeMap<Address, DumpAccount>,
}

impl StateDump {
    /// Number of accounts in the dump.
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Whether the dump holds no accounts.
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
