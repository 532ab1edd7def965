//! Merkle-Patricia trie root computation.
//!
//! Roots are computed in one pass over a sorted key set rather than by
//! maintaining a persistent node store: every caller (state root, transaction
//! root, receipt root) has the full leaf set in memory at the time it needs
//! the commitment.

use crate::account::Account;
use crate::hash::{keccak256, EMPTY_ROOT_HASH};
use alloy_primitives::{Address, B256, U256};
use rlp::RlpStream;
use std::collections::BTreeMap;

/// Nibble path of a trie key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Nibbles(Vec<u8>);

impl Nibbles {
    fn from_bytes(bytes: &[u8]) -> Self {
        let mut nibbles = Vec::with_capacity(bytes.len() * 2);
        for byte in bytes {
            nibbles.push(byte >> 4);
            nibbles.push(byte & 0x0f);
        }
        Nibbles(nibbles)
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn at(&self, index: usize) -> u8 {
        self.0[index]
    }

    /// Hex-prefix encoding of `path[start..end]`.
    ///
    /// The high nibble of the first byte carries the node kind (leaf or
    /// extension) and the parity of the path length.
    fn encode_compact(&self, start: usize, end: usize, is_leaf: bool) -> Vec<u8> {
        let path = &self.0[start..end];
        let odd = path.len() % 2 == 1;
        let flag: u8 = match (is_leaf, odd) {
            (false, false) => 0x0,
            (false, true) => 0x1,
            (true, false) => 0x2,
            (true, true) => 0x3,
        };

        let mut out = Vec::with_capacity(path.len() / 2 + 1);
        let rest = if odd {
            out.push((flag << 4) | path[0]);
            &path[1..]
        } else {
            out.push(flag << 4);
            path
        };
        for pair in rest.chunks(2) {
            out.push((pair[0] << 4) | pair[1]);
        }
        out
    }
}

/// Computes the trie root over arbitrary keys.
///
/// Later duplicates of a key overwrite earlier ones. Empty values are
/// treated as absent.
pub fn trie_root<I, K, V>(entries: I) -> B256
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    let sorted: BTreeMap<Nibbles, Vec<u8>> = entries
        .into_iter()
        .filter(|(_, v)| !v.as_ref().is_empty())
        .map(|(k, v)| (Nibbles::from_bytes(k.as_ref()), v.as_ref().to_vec()))
        .collect();

    if sorted.is_empty() {
        return EMPTY_ROOT_HASH;
    }

    let leaves: Vec<(Nibbles, Vec<u8>)> = sorted.into_iter().collect();
    keccak256(encode_node(&leaves, 0))
}

/// Root of a trie keyed by `keccak256(key)`, as used for accounts and storage.
pub fn secure_trie_root<I, K, V>(entries: I) -> B256
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    trie_root(
        entries
            .into_iter()
            .map(|(k, v)| (keccak256(k.as_ref()), v)),
    )
}

/// Root of a trie keyed by `rlp(index)`, as used for transactions and receipts.
pub fn ordered_trie_root<I, V>(items: I) -> B256
where
    I: IntoIterator<Item = V>,
    V: AsRef<[u8]>,
{
    trie_root(
        items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (rlp::encode(&(i as u64)).to_vec(), v)),
    )
}

/// Root of an account's storage trie. Zero-valued slots are omitted.
pub fn storage_root<I>(slots: I) -> B256
where
    I: IntoIterator<Item = (B256, B256)>,
{
    secure_trie_root(slots.into_iter().filter(|(_, v)| !v.is_zero()).map(|(k, v)| {
        let trimmed = U256::from_be_bytes(v.0).to_be_bytes_trimmed_vec();
        (k, rlp::encode(&trimmed).to_vec())
    }))
}

/// Root of the account trie. Empty accounts are omitted.
pub fn state_root<I>(accounts: I) -> B256
where
    I: IntoIterator<Item = (Address, Account)>,
{
    secure_trie_root(
        accounts
            .into_iter()
            .filter(|(_, account)| !account.is_empty())
            .map(|(address, account)| (address, account.trie_encode())),
    )
}

/// RLP-encodes the node covering `leaves`, all of which share the first
/// `depth` nibbles.
fn encode_node(leaves: &[(Nibbles, Vec<u8>)], depth: usize) -> Vec<u8> {
    if let [(key, value)] = leaves {
        let mut s = RlpStream::new_list(2);
        s.append(&key.encode_compact(depth, key.len(), true));
        s.append(value);
        return s.out().to_vec();
    }

    // sorted input: the shared prefix of first and last is shared by all
    let first = &leaves[0].0;
    let last = &leaves[leaves.len() - 1].0;
    let mut shared = depth;
    while shared < first.len() && shared < last.len() && first.at(shared) == last.at(shared) {
        shared += 1;
    }

    if shared > depth {
        let child = encode_node(leaves, shared);
        let mut s = RlpStream::new_list(2);
        s.append(&first.encode_compact(depth, shared, false));
        append_child(&mut s, child);
        return s.out().to_vec();
    }

    let mut s = RlpStream::new_list(17);
    let mut branch_value: Option<&Vec<u8>> = None;
    let mut cursor = 0;
    if leaves[0].0.len() == depth {
        branch_value = Some(&leaves[0].1);
        cursor = 1;
    }
    for nibble in 0..16u8 {
        let start = cursor;
        while cursor < leaves.len() && leaves[cursor].0.at(depth) == nibble {
            cursor += 1;
        }
        if start == cursor {
            s.append_empty_data();
        } else {
            append_child(&mut s, encode_node(&leaves[start..cursor], depth + 1));
        }
    }
    match branch_value {
        Some(value) => {
            s.append(value);
        }
        None => {
            s.append_empty_data();
        }
    }
    s.out().to_vec()
}

/// Children shorter than a hash are embedded inline; others are referenced by hash.
fn append_child(s: &mut RlpStream, encoded: Vec<u8>) {
    if encoded.len() < 32 {
        s.append_raw(&encoded, 1);
    } else {
        s.append(&keccak256(&encoded).as_slice());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::b256;

    #[test]
    fn test_empty_trie() {
        let empty: Vec<(Vec<u8>, Vec<u8>)> = vec![];
        assert_eq!(trie_root(empty), EMPTY_ROOT_HASH);
        assert_eq!(ordered_trie_root(Vec::<Vec<u8>>::new()), EMPTY_ROOT_HASH);
    }

    #[test]
    fn test_compact_encoding() {
        let nibbles = Nibbles(vec![1, 2, 3, 4, 5]);
        assert_eq!(nibbles.encode_compact(0, 5, false), vec![0x11, 0x23, 0x45]);
        assert_eq!(nibbles.encode_compact(1, 5, true), vec![0x20, 0x23, 0x45]);
        assert_eq!(nibbles.encode_compact(0, 5, true), vec![0x31, 0x23, 0x45]);
        assert_eq!(nibbles.encode_compact(1, 5, false), vec![0x00, 0x23, 0x45]);
    }

    #[test]
    fn test_known_root() {
        // go-ethereum TestInsert vector
        let root = trie_root(vec![
            (b"doe".to_vec(), b"reindeer".to_vec()),
            (b"dog".to_vec(), b"puppy".to_vec()),
            (b"dogglesworth".to_vec(), b"cat".to_vec()),
        ]);
        assert_eq!(
            root,
            b256!("8aad789dff2f538bca5d8ea56e8abe10f4c7ba3a5dea95fea4cd6e7c3a1168d3")
        );
    }

    #[test]
    fn test_insertion_order_irrelevant() {
        let a = trie_root(vec![(vec![1u8, 2], vec![9u8]), (vec![1u8, 3], vec![8u8])]);
        let b = trie_root(vec![(vec![1u8, 3], vec![8u8]), (vec![1u8, 2], vec![9u8])]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_storage_is_deletion() {
        let key = B256::repeat_byte(1);
        let with_zero = storage_root(vec![(key, B256::ZERO)]);
        assert_eq!(with_zero, EMPTY_ROOT_HASH);
        assert_ne!(storage_root(vec![(key, B256::with_last_byte(1))]), EMPTY_ROOT_HASH);
    }

    #[test]
    fn test_empty_accounts_omitted() {
        let root = state_root(vec![(Address::repeat_byte(1), Account::default())]);
        assert_eq!(root, EMPTY_ROOT_HASH);
    }

    #[test]
    fn test_empty_values_are_absent() {
        let with_empty = trie_root(vec![(vec![1u8], vec![7u8]), (vec![2u8], vec![])]);
        let without = trie_root(vec![(vec![1u8], vec![7u8])]);
        assert_eq!(with_empty, without);
    }
}
