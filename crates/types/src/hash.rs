//! Well-known hashes and the keccak helper used across ember.

use alloy_primitives::{b256, B256};

pub use alloy_primitives::keccak256;

/// Keccak-256 of the empty byte string; the code hash of accounts without code.
pub const KECCAK_EMPTY: B256 =
    b256!("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470");

/// Root of an empty Merkle-Patricia trie, `keccak256(rlp(""))`.
pub const EMPTY_ROOT_HASH: B256 =
    b256!("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421");

/// Hash of the RLP encoding of an empty list, used for the ommers hash of
/// blocks without uncles.
pub const EMPTY_OMMERS_HASH: B256 =
    b256!("1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_match_keccak() {
        assert_eq!(keccak256([]), KECCAK_EMPTY);
        assert_eq!(keccak256([0x80]), EMPTY_ROOT_HASH);
        assert_eq!(keccak256([0xc0]), EMPTY_OMMERS_HASH);
    }
}
