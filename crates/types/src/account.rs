//! World-state account record.

use crate::codec::{append_b256, append_u256};
use crate::hash::{EMPTY_ROOT_HASH, KECCAK_EMPTY};
use alloy_primitives::{B256, U256};
use rlp::RlpStream;
use serde::{Deserialize, Serialize};

/// An account as committed to the state trie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Number of transactions sent (or contracts created, for contracts)
    pub nonce: u64,
    /// Balance in wei
    pub balance: U256,
    /// Keccak hash of the account code
    pub code_hash: B256,
    /// Root of the account's storage trie
    pub storage_root: B256,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            nonce: 0,
            balance: U256::ZERO,
            code_hash: KECCAK_EMPTY,
            storage_root: EMPTY_ROOT_HASH,
        }
    }
}

impl Account {
    /// Creates an externally owned account with the given balance.
    pub fn with_balance(balance: U256) -> Self {
        Self {
            balance,
            ..Default::default()
        }
    }

    /// EIP-161 emptiness: no nonce, no balance and no code.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && !self.has_code()
    }

    /// Returns true if the account has code.
    pub fn has_code(&self) -> bool {
        self.code_hash != KECCAK_EMPTY && self.code_hash != B256::ZERO
    }

    /// RLP encoding `[nonce, balance, storage_root, code_hash]` used as the
    /// state trie leaf.
    pub fn trie_encode(&self) -> Vec<u8> {
        let mut s = RlpStream::new_list(4);
        s.append(&self.nonce);
        append_u256(&mut s, &self.balance);
        append_b256(&mut s, &self.storage_root);
        append_b256(&mut s, &self.code_hash);
        s.out().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_account_is_empty() {
        let account = Account::default();
        assert!(account.is_empty());
        assert!(!account.has_code());
    }

    #[test]
    fn test_funded_account_is_not_empty() {
        let account = Account::with_balance(U256::from(1u64));
        assert!(!account.is_empty());
    }

    #[test]
    fn test_trie_encoding_shape() {
        let encoded = Account::default().trie_encode();
        let rlp = rlp::Rlp::new(&encoded);
        assert_eq!(rlp.item_count().unwrap(), 4);
    }
}
