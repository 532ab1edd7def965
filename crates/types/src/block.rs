//! Block and header types.
//!
//! Headers follow the Ethereum layout, including the optional fields added
//! by London (base fee), Shanghai (withdrawals root) and Cancun (blob gas and
//! beacon root). A block is identified by `keccak256(rlp(header))`.

use crate::codec::{
    address_at, append_address, append_b256, append_bytes, append_u256, b256_at, bytes_at, u256_at,
};
use crate::hash::{keccak256, EMPTY_OMMERS_HASH, EMPTY_ROOT_HASH};
use crate::transaction::{Transaction, TxEnvelope};
use crate::trie::ordered_trie_root;
use crate::Result;
use alloy_primitives::{Address, Bloom, Bytes, B256, U256};
use rlp::{DecoderError, Encodable, Rlp, RlpStream};
use serde::{Deserialize, Serialize};

/// Block header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Hash of the parent block
    pub parent_hash: B256,
    /// Hash of the RLP list of ommer headers
    pub ommers_hash: B256,
    /// Fee recipient
    pub coinbase: Address,
    /// State root after executing the block
    pub state_root: B256,
    /// Root of the transaction trie
    pub transactions_root: B256,
    /// Root of the receipt trie
    pub receipts_root: B256,
    /// OR of all receipt blooms
    pub logs_bloom: Bloom,
    /// Proof-of-work difficulty; zero after the merge
    pub difficulty: U256,
    /// Block number
    pub number: u64,
    /// Gas limit
    pub gas_limit: u64,
    /// Gas used by all transactions
    pub gas_used: u64,
    /// Unix timestamp in seconds
    pub timestamp: u64,
    /// Arbitrary extra data
    pub extra_data: Bytes,
    /// Mix hash; carries prevRandao after the merge
    pub mix_hash: B256,
    /// Proof-of-work nonce
    pub nonce: u64,
    /// EIP-1559 base fee
    pub base_fee_per_gas: Option<u128>,
    /// EIP-4895 withdrawals root
    pub withdrawals_root: Option<B256>,
    /// EIP-4844 blob gas used
    pub blob_gas_used: Option<u64>,
    /// EIP-4844 excess blob gas
    pub excess_blob_gas: Option<u64>,
    /// EIP-4788 parent beacon block root
    pub parent_beacon_block_root: Option<B256>,
}

impl Default for BlockHeader {
    fn default() -> Self {
        Self {
            parent_hash: B256::ZERO,
            ommers_hash: EMPTY_OMMERS_HASH,
            coinbase: Address::ZERO,
            state_root: EMPTY_ROOT_HASH,
            transactions_root: EMPTY_ROOT_HASH,
            receipts_root: EMPTY_ROOT_HASH,
            logs_bloom: Bloom::ZERO,
            difficulty: U256::ZERO,
            number: 0,
            gas_limit: 30_000_000,
            gas_used: 0,
            timestamp: 0,
            extra_data: Bytes::new(),
            mix_hash: B256::ZERO,
            nonce: 0,
            base_fee_per_gas: None,
            withdrawals_root: None,
            blob_gas_used: None,
            excess_blob_gas: None,
            parent_beacon_block_root: None,
        }
    }
}

impl BlockHeader {
    /// Computes the block hash.
    pub fn hash(&self) -> B256 {
        keccak256(rlp::encode(self))
    }

    /// Number of optional trailing fields present.
    ///
    /// Trailing fields are positional: a later field is only encoded when
    /// every earlier one is present.
    fn optional_field_count(&self) -> usize {
        let present = [
            self.base_fee_per_gas.is_some(),
            self.withdrawals_root.is_some(),
            self.blob_gas_used.is_some(),
            self.excess_blob_gas.is_some(),
            self.parent_beacon_block_root.is_some(),
        ];
        present.iter().take_while(|p| **p).count()
    }

    /// Decodes a header from its RLP encoding.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let rlp = Rlp::new(data);
        Ok(Self::decode_rlp(&rlp)?)
    }

    fn decode_rlp(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        let count = rlp.item_count()?;
        if !(15..=20).contains(&count) {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        let nonce_bytes: Vec<u8> = rlp.val_at(14)?;
        if nonce_bytes.len() != 8 {
            return Err(DecoderError::RlpInvalidLength);
        }
        let mut nonce = [0u8; 8];
        nonce.copy_from_slice(&nonce_bytes);
        let bloom_bytes: Vec<u8> = rlp.val_at(6)?;
        if bloom_bytes.len() != 256 {
            return Err(DecoderError::RlpInvalidLength);
        }

        Ok(Self {
            parent_hash: b256_at(rlp, 0)?,
            ommers_hash: b256_at(rlp, 1)?,
            coinbase: address_at(rlp, 2)?,
            state_root: b256_at(rlp, 3)?,
            transactions_root: b256_at(rlp, 4)?,
            receipts_root: b256_at(rlp, 5)?,
            logs_bloom: Bloom::from_slice(&bloom_bytes),
            difficulty: u256_at(rlp, 7)?,
            number: rlp.val_at(8)?,
            gas_limit: rlp.val_at(9)?,
            gas_used: rlp.val_at(10)?,
            timestamp: rlp.val_at(11)?,
            extra_data: bytes_at(rlp, 12)?,
            mix_hash: b256_at(rlp, 13)?,
            nonce: u64::from_be_bytes(nonce),
            base_fee_per_gas: if count > 15 { Some(rlp.val_at(15)?) } else { None },
            withdrawals_root: if count > 16 { Some(b256_at(rlp, 16)?) } else { None },
            blob_gas_used: if count > 17 { Some(rlp.val_at(17)?) } else { None },
            excess_blob_gas: if count > 18 { Some(rlp.val_at(18)?) } else { None },
            parent_beacon_block_root: if count > 19 { Some(b256_at(rlp, 19)?) } else { None },
        })
    }
}

impl Encodable for BlockHeader {
    fn rlp_append(&self, s: &mut RlpStream) {
        let optional = self.optional_field_count();
        s.begin_list(15 + optional);
        append_b256(s, &self.parent_hash);
        append_b256(s, &self.ommers_hash);
        append_address(s, &self.coinbase);
        append_b256(s, &self.state_root);
        append_b256(s, &self.transactions_root);
        append_b256(s, &self.receipts_root);
        s.append(&self.logs_bloom.as_slice());
        append_u256(s, &self.difficulty);
        s.append(&self.number);
        s.append(&self.gas_limit);
        s.append(&self.gas_used);
        s.append(&self.timestamp);
        append_bytes(s, &self.extra_data);
        append_b256(s, &self.mix_hash);
        s.append(&self.nonce.to_be_bytes().as_slice());

        if optional > 0 {
            s.append(&self.base_fee_per_gas.unwrap_or_default());
        }
        if optional > 1 {
            append_b256(s, &self.withdrawals_root.unwrap_or_default());
        }
        if optional > 2 {
            s.append(&self.blob_gas_used.unwrap_or_default());
        }
        if optional > 3 {
            s.append(&self.excess_blob_gas.unwrap_or_default());
        }
        if optional > 4 {
            append_b256(s, &self.parent_beacon_block_root.unwrap_or_default());
        }
    }
}

/// A validator withdrawal (EIP-4895).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Withdrawal {
    /// Monotonic withdrawal index
    pub index: u64,
    /// Validator index
    pub validator_index: u64,
    /// Recipient
    pub address: Address,
    /// Amount in gwei
    pub amount: u64,
}

impl Encodable for Withdrawal {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(4);
        s.append(&self.index);
        s.append(&self.validator_index);
        append_address(s, &self.address);
        s.append(&self.amount);
    }
}

/// A sealed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Header
    pub header: BlockHeader,
    /// Transactions in execution order
    pub transactions: Vec<Transaction>,
    /// Uncle headers
    #[serde(default)]
    pub ommers: Vec<BlockHeader>,
    /// Withdrawals, present from Shanghai on
    #[serde(default)]
    pub withdrawals: Option<Vec<Withdrawal>>,
}

impl Block {
    /// Creates a block from a header and transactions, without uncles.
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
            ommers: Vec::new(),
            withdrawals: None,
        }
    }

    /// Block hash.
    pub fn hash(&self) -> B256 {
        self.header.hash()
    }

    /// Block number.
    pub fn number(&self) -> u64 {
        self.header.number
    }

    /// Returns the index of a transaction in this block.
    pub fn transaction_index(&self, tx_hash: &B256) -> Option<usize> {
        self.transactions.iter().position(|tx| tx.hash() == *tx_hash)
    }

    /// Root of the transaction trie over `transactions`.
    pub fn compute_transactions_root(transactions: &[Transaction]) -> B256 {
        ordered_trie_root(transactions.iter().map(|tx| tx.encoded()))
    }

    /// Hash of the RLP list of `ommers`.
    pub fn compute_ommers_hash(ommers: &[BlockHeader]) -> B256 {
        if ommers.is_empty() {
            return EMPTY_OMMERS_HASH;
        }
        let mut s = RlpStream::new_list(ommers.len());
        for ommer in ommers {
            s.append(ommer);
        }
        keccak256(s.out())
    }

    /// Root of the withdrawals trie.
    pub fn compute_withdrawals_root(withdrawals: &[Withdrawal]) -> B256 {
        ordered_trie_root(withdrawals.iter().map(|w| rlp::encode(w).to_vec()))
    }
}

/// A block paired with its hash.
///
/// Locally built blocks are sealed with [`Block::seal`]. Blocks imported from
/// a remote chain keep the hash the remote reported, since their headers may
/// carry fields this crate does not model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBlock {
    /// Block hash
    pub hash: B256,
    /// The block
    pub block: Block,
}

impl SealedBlock {
    /// Pairs a block with an externally supplied hash.
    pub fn new_unchecked(block: Block, hash: B256) -> Self {
        Self { hash, block }
    }

    /// Block header.
    pub fn header(&self) -> &BlockHeader {
        &self.block.header
    }

    /// Block number.
    pub fn number(&self) -> u64 {
        self.block.header.number
    }
}

impl Block {
    /// Computes the hash and seals the block.
    pub fn seal(self) -> SealedBlock {
        let hash = self.hash();
        SealedBlock { hash, block: self }
    }
}
