//! Transaction envelopes.
//!
//! This module provides the transaction model for ember:
//! - [`TxLegacy`], [`TxAccessList`], [`TxFeeMarket`], [`TxBlob`] - unsigned payloads
//! - [`Signed`] - a payload together with its ECDSA signature and hash
//! - [`ImpersonatedTx`] - a fee-market payload with an asserted sender
//! - [`Transaction`] - the tagged union over all of the above
//!
//! Every variant exposes the same logical fields through [`TxFields`];
//! hashing, signing and sender resolution go through [`TxEnvelope`].

use crate::codec::{
    address_at, append_address, append_b256, append_bytes, append_to, append_u256, b256_at,
    b256_from, bytes_at, to_at, u256_at,
};
use crate::hash::keccak256;
use crate::{Result, TypesError};
use alloy_primitives::{Address, Bytes, B256, U256};
use k256::ecdsa::{RecoveryId, Signature as K256Signature, SigningKey, VerifyingKey};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Gas consumed by a single blob (EIP-4844).
pub const GAS_PER_BLOB: u64 = 1 << 17;

/// Transaction type identifier (EIP-2718).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum TxType {
    /// Legacy transaction (pre-EIP-2718)
    Legacy = 0x00,
    /// EIP-2930 access list transaction
    AccessList = 0x01,
    /// EIP-1559 fee market transaction
    FeeMarket = 0x02,
    /// EIP-4844 blob transaction
    Blob = 0x03,
}

impl TxType {
    /// Returns the transaction type byte.
    pub const fn as_byte(&self) -> u8 {
        *self as u8
    }

    /// Creates a TxType from a byte.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x00 => Ok(Self::Legacy),
            0x01 => Ok(Self::AccessList),
            0x02 => Ok(Self::FeeMarket),
            0x03 => Ok(Self::Blob),
            _ => Err(TypesError::UnsupportedTxType(byte)),
        }
    }
}

/// An access list entry for EIP-2930 and later transactions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct AccessListItem {
    /// The address being accessed
    pub address: Address,
    /// Storage keys being accessed
    pub storage_keys: Vec<B256>,
}

impl Encodable for AccessListItem {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        append_address(s, &self.address);
        s.begin_list(self.storage_keys.len());
        for key in &self.storage_keys {
            append_b256(s, key);
        }
    }
}

impl Decodable for AccessListItem {
    fn decode(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        if rlp.item_count()? != 2 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        let keys = rlp.at(1)?;
        let mut storage_keys = Vec::with_capacity(keys.item_count()?);
        for i in 0..keys.item_count()? {
            storage_keys.push(b256_at(&keys, i)?);
        }
        Ok(Self {
            address: address_at(rlp, 0)?,
            storage_keys,
        })
    }
}

/// ECDSA signature components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Signature {
    /// Parity (typed transactions) or legacy `v` value (27/28 or EIP-155)
    pub v: u64,
    /// R component
    pub r: U256,
    /// S component
    pub s: U256,
}

impl Signature {
    /// Creates a new signature from components.
    pub const fn new(v: u64, r: U256, s: U256) -> Self {
        Self { v, r, s }
    }

    /// Returns the y-parity bit regardless of how `v` is encoded.
    pub fn y_parity(&self) -> u8 {
        match self.v {
            0 | 1 => self.v as u8,
            27 | 28 => (self.v - 27) as u8,
            v => ((v - 35) % 2) as u8,
        }
    }

    /// Chain id encoded in an EIP-155 legacy `v`, if any.
    pub fn legacy_chain_id(&self) -> Option<u64> {
        if self.v >= 35 {
            Some((self.v - 35) / 2)
        } else {
            None
        }
    }

    /// Signs a 32-byte prehash, returning a parity-style signature.
    pub fn sign_prehash(hash: &B256, key: &SigningKey) -> Result<Self> {
        let (sig, recovery_id) = key
            .sign_prehash_recoverable(hash.as_slice())
            .map_err(|e| TypesError::Signature(e.to_string()))?;
        let bytes = sig.to_bytes();
        Ok(Self {
            v: recovery_id.is_y_odd() as u64,
            r: U256::from_be_slice(&bytes[..32]),
            s: U256::from_be_slice(&bytes[32..]),
        })
    }

    /// Recovers the signer of `hash`.
    pub fn recover(&self, hash: &B256) -> Result<Address> {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.r.to_be_bytes::<32>());
        bytes[32..].copy_from_slice(&self.s.to_be_bytes::<32>());

        let signature =
            K256Signature::from_slice(&bytes).map_err(|e| TypesError::Signature(e.to_string()))?;
        let recovery_id = RecoveryId::from_byte(self.y_parity())
            .ok_or_else(|| TypesError::Signature("invalid recovery id".into()))?;

        let key = VerifyingKey::recover_from_prehash(hash.as_slice(), &signature, recovery_id)
            .map_err(|e| TypesError::Signature(e.to_string()))?;
        Ok(public_key_to_address(&key))
    }
}

/// Derives the Ethereum address of a secp256k1 public key.
pub fn public_key_to_address(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Uniform read access to the logical fields of every transaction variant.
pub trait TxFields {
    /// EIP-2718 type of the envelope.
    fn tx_type(&self) -> TxType;
    /// Replay-protection chain id, if any.
    fn chain_id(&self) -> Option<u64>;
    /// Sender nonce.
    fn nonce(&self) -> u64;
    /// Gas limit.
    fn gas_limit(&self) -> u64;
    /// Call target, `None` for contract creation.
    fn to(&self) -> Option<Address>;
    /// Value transferred in wei.
    fn value(&self) -> U256;
    /// Calldata or init code.
    fn input(&self) -> &Bytes;
    /// Access list; empty for legacy transactions.
    fn access_list(&self) -> &[AccessListItem];
    /// Fee cap per gas. Equal to the gas price for pre-1559 transactions.
    fn max_fee_per_gas(&self) -> u128;
    /// Priority fee cap per gas. Equal to the gas price for pre-1559 transactions.
    fn max_priority_fee_per_gas(&self) -> u128;

    /// Fixed gas price for pre-1559 transactions.
    fn gas_price(&self) -> Option<u128> {
        None
    }

    /// Blob fee cap for blob transactions.
    fn max_fee_per_blob_gas(&self) -> Option<u128> {
        None
    }

    /// Versioned hashes of the blobs carried by this transaction.
    fn blob_versioned_hashes(&self) -> &[B256] {
        &[]
    }

    /// Returns true for contract creation.
    fn is_create(&self) -> bool {
        self.to().is_none()
    }

    /// Number of blobs carried.
    fn blob_count(&self) -> u64 {
        self.blob_versioned_hashes().len() as u64
    }

    /// Blob gas consumed when included.
    fn blob_gas(&self) -> u64 {
        self.blob_count() * GAS_PER_BLOB
    }

    /// Portion of the gas price paid to the block producer at `base_fee`.
    ///
    /// Returns `None` when the fee cap does not cover the base fee.
    fn effective_tip(&self, base_fee: u128) -> Option<u128> {
        let max_fee = self.max_fee_per_gas();
        if max_fee < base_fee {
            return None;
        }
        Some(std::cmp::min(max_fee - base_fee, self.max_priority_fee_per_gas()))
    }

    /// Gas price actually paid at `base_fee`; the fee cap when there is no base fee.
    fn effective_gas_price(&self, base_fee: Option<u128>) -> u128 {
        match base_fee {
            Some(base) => match self.effective_tip(base) {
                Some(tip) => base + tip,
                None => self.max_fee_per_gas(),
            },
            None => self.max_fee_per_gas(),
        }
    }

    /// Maximum wei the sender may be charged: `value + gas_limit * max_fee`
    /// plus the blob fee cap.
    fn upfront_cost(&self) -> U256 {
        let gas = U256::from(self.gas_limit()) * U256::from(self.max_fee_per_gas());
        let blob = U256::from(self.blob_gas())
            * U256::from(self.max_fee_per_blob_gas().unwrap_or_default());
        self.value().saturating_add(gas).saturating_add(blob)
    }
}

/// Hashing, encoding and sender resolution shared by every transaction variant.
pub trait TxEnvelope: TxFields {
    /// Transaction hash.
    fn hash(&self) -> B256;
    /// Sender, recovered from the signature or asserted for impersonated transactions.
    fn sender(&self) -> Result<Address>;
    /// Whether the sender is backed by a signature.
    fn is_signed(&self) -> bool;
    /// Canonical EIP-2718 encoding.
    fn encoded(&self) -> Vec<u8>;
}

/// An unsigned payload that can be signed and RLP encoded.
pub trait SignableTx: TxFields + Sized {
    /// Number of RLP fields before the signature.
    const FIELD_COUNT: usize;

    /// Appends the payload fields (without list header).
    fn append_fields(&self, s: &mut RlpStream);

    /// Decodes the payload fields from the first `FIELD_COUNT` list items.
    fn decode_fields(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError>;

    /// Bytes that are hashed for signing.
    fn signing_payload(&self) -> Vec<u8> {
        let mut s = RlpStream::new_list(Self::FIELD_COUNT);
        self.append_fields(&mut s);
        let mut out = vec![self.tx_type().as_byte()];
        out.extend_from_slice(&s.out());
        out
    }

    /// Hash that is signed.
    fn signing_hash(&self) -> B256 {
        keccak256(self.signing_payload())
    }

    /// The `v` value written into the envelope for a given parity.
    fn envelope_v(&self, y_parity: u8) -> u64 {
        y_parity as u64
    }

    /// Signs the payload.
    fn sign(self, key: &SigningKey) -> Result<Signed<Self>> {
        let mut signature = Signature::sign_prehash(&self.signing_hash(), key)?;
        signature.v = self.envelope_v(signature.y_parity());
        Ok(Signed::new(self, signature))
    }
}

/// A legacy transaction, EIP-155 replay protected when `chain_id` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TxLegacy {
    /// Chain id for EIP-155 signing
    pub chain_id: Option<u64>,
    /// Sender nonce
    pub nonce: u64,
    /// Gas price
    pub gas_price: u128,
    /// Gas limit
    pub gas_limit: u64,
    /// Recipient, `None` for creation
    pub to: Option<Address>,
    /// Value in wei
    pub value: U256,
    /// Calldata or init code
    pub input: Bytes,
}

/// An EIP-2930 access list transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TxAccessList {
    /// Chain id
    pub chain_id: u64,
    /// Sender nonce
    pub nonce: u64,
    /// Gas price
    pub gas_price: u128,
    /// Gas limit
    pub gas_limit: u64,
    /// Recipient, `None` for creation
    pub to: Option<Address>,
    /// Value in wei
    pub value: U256,
    /// Calldata or init code
    pub input: Bytes,
    /// Pre-warmed addresses and slots
    pub access_list: Vec<AccessListItem>,
}

/// An EIP-1559 fee market transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TxFeeMarket {
    /// Chain id
    pub chain_id: u64,
    /// Sender nonce
    pub nonce: u64,
    /// Tip cap per gas
    pub max_priority_fee_per_gas: u128,
    /// Fee cap per gas
    pub max_fee_per_gas: u128,
    /// Gas limit
    pub gas_limit: u64,
    /// Recipient, `None` for creation
    pub to: Option<Address>,
    /// Value in wei
    pub value: U256,
    /// Calldata or init code
    pub input: Bytes,
    /// Pre-warmed addresses and slots
    pub access_list: Vec<AccessListItem>,
}

/// An EIP-4844 blob transaction (canonical form, without sidecar).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TxBlob {
    /// Chain id
    pub chain_id: u64,
    /// Sender nonce
    pub nonce: u64,
    /// Tip cap per gas
    pub max_priority_fee_per_gas: u128,
    /// Fee cap per gas
    pub max_fee_per_gas: u128,
    /// Gas limit
    pub gas_limit: u64,
    /// Recipient; blob transactions cannot create contracts
    pub to: Address,
    /// Value in wei
    pub value: U256,
    /// Calldata
    pub input: Bytes,
    /// Pre-warmed addresses and slots
    pub access_list: Vec<AccessListItem>,
    /// Fee cap per blob gas
    pub max_fee_per_blob_gas: u128,
    /// Versioned hashes of the carried blobs
    pub blob_versioned_hashes: Vec<B256>,
}

impl TxFields for TxLegacy {
    fn tx_type(&self) -> TxType {
        TxType::Legacy
    }
    fn chain_id(&self) -> Option<u64> {
        self.chain_id
    }
    fn nonce(&self) -> u64 {
        self.nonce
    }
    fn gas_limit(&self) -> u64 {
        self.gas_limit
    }
    fn to(&self) -> Option<Address> {
        self.to
    }
    fn value(&self) -> U256 {
        self.value
    }
    fn input(&self) -> &Bytes {
        &self.input
    }
    fn access_list(&self) -> &[AccessListItem] {
        &[]
    }
    fn max_fee_per_gas(&self) -> u128 {
        self.gas_price
    }
    fn max_priority_fee_per_gas(&self) -> u128 {
        self.gas_price
    }
    fn gas_price(&self) -> Option<u128> {
        Some(self.gas_price)
    }
}

impl SignableTx for TxLegacy {
    const FIELD_COUNT: usize = 6;

    fn append_fields(&self, s: &mut RlpStream) {
        s.append(&self.nonce);
        s.append(&self.gas_price);
        s.append(&self.gas_limit);
        append_to(s, &self.to);
        append_u256(s, &self.value);
        append_bytes(s, &self.input);
    }

    fn decode_fields(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        Ok(Self {
            chain_id: None,
            nonce: rlp.val_at(0)?,
            gas_price: rlp.val_at(1)?,
            gas_limit: rlp.val_at(2)?,
            to: to_at(rlp, 3)?,
            value: u256_at(rlp, 4)?,
            input: bytes_at(rlp, 5)?,
        })
    }

    fn signing_payload(&self) -> Vec<u8> {
        match self.chain_id {
            Some(chain_id) => {
                let mut s = RlpStream::new_list(Self::FIELD_COUNT + 3);
                self.append_fields(&mut s);
                s.append(&chain_id);
                s.append(&0u8);
                s.append(&0u8);
                s.out().to_vec()
            }
            None => {
                let mut s = RlpStream::new_list(Self::FIELD_COUNT);
                self.append_fields(&mut s);
                s.out().to_vec()
            }
        }
    }

    fn envelope_v(&self, y_parity: u8) -> u64 {
        match self.chain_id {
            Some(chain_id) => chain_id * 2 + 35 + y_parity as u64,
            None => 27 + y_parity as u64,
        }
    }
}

impl TxFields for TxAccessList {
    fn tx_type(&self) -> TxType {
        TxType::AccessList
    }
    fn chain_id(&self) -> Option<u64> {
        Some(self.chain_id)
    }
    fn nonce(&self) -> u64 {
        self.nonce
    }
    fn gas_limit(&self) -> u64 {
        self.gas_limit
    }
    fn to(&self) -> Option<Address> {
        self.to
    }
    fn value(&self) -> U256 {
        self.value
    }
    fn input(&self) -> &Bytes {
        &self.input
    }
    fn access_list(&self) -> &[AccessListItem] {
        &self.access_list
    }
    fn max_fee_per_gas(&self) -> u128 {
        self.gas_price
    }
    fn max_priority_fee_per_gas(&self) -> u128 {
        self.gas_price
    }
    fn gas_price(&self) -> Option<u128> {
        Some(self.gas_price)
    }
}

impl SignableTx for TxAccessList {
    const FIELD_COUNT: usize = 8;

    fn append_fields(&self, s: &mut RlpStream) {
        s.append(&self.chain_id);
        s.append(&self.nonce);
        s.append(&self.gas_price);
        s.append(&self.gas_limit);
        append_to(s, &self.to);
        append_u256(s, &self.value);
        append_bytes(s, &self.input);
        s.append_list::<AccessListItem, AccessListItem>(&self.access_list);
    }

    fn decode_fields(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        Ok(Self {
            chain_id: rlp.val_at(0)?,
            nonce: rlp.val_at(1)?,
            gas_price: rlp.val_at(2)?,
            gas_limit: rlp.val_at(3)?,
            to: to_at(rlp, 4)?,
            value: u256_at(rlp, 5)?,
            input: bytes_at(rlp, 6)?,
            access_list: rlp.list_at(7)?,
        })
    }
}

impl TxFields for TxFeeMarket {
    fn tx_type(&self) -> TxType {
        TxType::FeeMarket
    }
    fn chain_id(&self) -> Option<u64> {
        Some(self.chain_id)
    }
    fn nonce(&self) -> u64 {
        self.nonce
    }
    fn gas_limit(&self) -> u64 {
        self.gas_limit
    }
    fn to(&self) -> Option<Address> {
        self.to
    }
    fn value(&self) -> U256 {
        self.value
    }
    fn input(&self) -> &Bytes {
        &self.input
    }
    fn access_list(&self) -> &[AccessListItem] {
        &self.access_list
    }
    fn max_fee_per_gas(&self) -> u128 {
        self.max_fee_per_gas
    }
    fn max_priority_fee_per_gas(&self) -> u128 {
        self.max_priority_fee_per_gas
    }
}

impl SignableTx for TxFeeMarket {
    const FIELD_COUNT: usize = 9;

    fn append_fields(&self, s: &mut RlpStream) {
        s.append(&self.chain_id);
        s.append(&self.nonce);
        s.append(&self.max_priority_fee_per_gas);
        s.append(&self.max_fee_per_gas);
        s.append(&self.gas_limit);
        append_to(s, &self.to);
        append_u256(s, &self.value);
        append_bytes(s, &self.input);
        s.append_list::<AccessListItem, AccessListItem>(&self.access_list);
    }

    fn decode_fields(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        Ok(Self {
            chain_id: rlp.val_at(0)?,
            nonce: rlp.val_at(1)?,
            max_priority_fee_per_gas: rlp.val_at(2)?,
            max_fee_per_gas: rlp.val_at(3)?,
            gas_limit: rlp.val_at(4)?,
            to: to_at(rlp, 5)?,
            value: u256_at(rlp, 6)?,
            input: bytes_at(rlp, 7)?,
            access_list: rlp.list_at(8)?,
        })
    }
}

impl TxFields for TxBlob {
    fn tx_type(&self) -> TxType {
        TxType::Blob
    }
    fn chain_id(&self) -> Option<u64> {
        Some(self.chain_id)
    }
    fn nonce(&self) -> u64 {
        self.nonce
    }
    fn gas_limit(&self) -> u64 {
        self.gas_limit
    }
    fn to(&self) -> Option<Address> {
        Some(self.to)
    }
    fn value(&self) -> U256 {
        self.value
    }
    fn input(&self) -> &Bytes {
        &self.input
    }
    fn access_list(&self) -> &[AccessListItem] {
        &self.access_list
    }
    fn max_fee_per_gas(&self) -> u128 {
        self.max_fee_per_gas
    }
    fn max_priority_fee_per_gas(&self) -> u128 {
        self.max_priority_fee_per_gas
    }
    fn max_fee_per_blob_gas(&self) -> Option<u128> {
        Some(self.max_fee_per_blob_gas)
    }
    fn blob_versioned_hashes(&self) -> &[B256] {
        &self.blob_versioned_hashes
    }
}

impl SignableTx for TxBlob {
    const FIELD_COUNT: usize = 11;

    fn append_fields(&self, s: &mut RlpStream) {
        s.append(&self.chain_id);
        s.append(&self.nonce);
        s.append(&self.max_priority_fee_per_gas);
        s.append(&self.max_fee_per_gas);
        s.append(&self.gas_limit);
        append_address(s, &self.to);
        append_u256(s, &self.value);
        append_bytes(s, &self.input);
        s.append_list::<AccessListItem, AccessListItem>(&self.access_list);
        s.append(&self.max_fee_per_blob_gas);
        s.begin_list(self.blob_versioned_hashes.len());
        for hash in &self.blob_versioned_hashes {
            append_b256(s, hash);
        }
    }

    fn decode_fields(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        let hashes = rlp.at(10)?;
        let mut blob_versioned_hashes = Vec::with_capacity(hashes.item_count()?);
        for item in hashes.iter() {
            blob_versioned_hashes.push(b256_from(item.data()?)?);
        }
        Ok(Self {
            chain_id: rlp.val_at(0)?,
            nonce: rlp.val_at(1)?,
            max_priority_fee_per_gas: rlp.val_at(2)?,
            max_fee_per_gas: rlp.val_at(3)?,
            gas_limit: rlp.val_at(4)?,
            to: address_at(rlp, 5)?,
            value: u256_at(rlp, 6)?,
            input: bytes_at(rlp, 7)?,
            access_list: rlp.list_at(8)?,
            max_fee_per_blob_gas: rlp.val_at(9)?,
            blob_versioned_hashes,
        })
    }
}

macro_rules! delegate_tx_fields {
    ($self:ident => $inner:expr) => {
        fn tx_type(&$self) -> TxType {
            $inner.tx_type()
        }
        fn chain_id(&$self) -> Option<u64> {
            $inner.chain_id()
        }
        fn nonce(&$self) -> u64 {
            $inner.nonce()
        }
        fn gas_limit(&$self) -> u64 {
            $inner.gas_limit()
        }
        fn to(&$self) -> Option<Address> {
            $inner.to()
        }
        fn value(&$self) -> U256 {
            $inner.value()
        }
        fn input(&$self) -> &Bytes {
            $inner.input()
        }
        fn access_list(&$self) -> &[AccessListItem] {
            $inner.access_list()
        }
        fn max_fee_per_gas(&$self) -> u128 {
            $inner.max_fee_per_gas()
        }
        fn max_priority_fee_per_gas(&$self) -> u128 {
            $inner.max_priority_fee_per_gas()
        }
        fn gas_price(&$self) -> Option<u128> {
            $inner.gas_price()
        }
        fn max_fee_per_blob_gas(&$self) -> Option<u128> {
            $inner.max_fee_per_blob_gas()
        }
        fn blob_versioned_hashes(&$self) -> &[B256] {
            $inner.blob_versioned_hashes()
        }
    };
}

/// A signed payload with its cached hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signed<T> {
    /// The unsigned payload
    pub tx: T,
    /// The signature over `tx.signing_hash()`
    pub signature: Signature,
    hash: B256,
}

impl<T: SignableTx> Signed<T> {
    /// Attaches a signature to a payload and computes the envelope hash.
    pub fn new(tx: T, signature: Signature) -> Self {
        let mut signed = Self {
            tx,
            signature,
            hash: B256::ZERO,
        };
        signed.hash = keccak256(signed.encode());
        signed
    }

    /// EIP-2718 encoding: `type || rlp([fields.., y, r, s])`, or the bare
    /// list for legacy transactions.
    pub fn encode(&self) -> Vec<u8> {
        let mut s = RlpStream::new_list(T::FIELD_COUNT + 3);
        self.tx.append_fields(&mut s);
        s.append(&self.signature.v);
        append_u256(&mut s, &self.signature.r);
        append_u256(&mut s, &self.signature.s);
        let body = s.out();

        if self.tx.tx_type() == TxType::Legacy {
            return body.to_vec();
        }
        let mut out = Vec::with_capacity(body.len() + 1);
        out.push(self.tx.tx_type().as_byte());
        out.extend_from_slice(&body);
        out
    }

    /// Decodes the RLP list body of an envelope (type byte already stripped).
    fn decode_body(body: &[u8]) -> Result<Self> {
        let rlp = Rlp::new(body);
        if rlp.item_count()? != T::FIELD_COUNT + 3 {
            return Err(TypesError::InvalidTransaction(
                "unexpected RLP item count".into(),
            ));
        }
        let tx = T::decode_fields(&rlp)?;
        let signature = Signature {
            v: rlp.val_at(T::FIELD_COUNT)?,
            r: u256_at(&rlp, T::FIELD_COUNT + 1)?,
            s: u256_at(&rlp, T::FIELD_COUNT + 2)?,
        };
        Ok(Self::new(tx, signature))
    }
}

impl<T: SignableTx> TxFields for Signed<T> {
    delegate_tx_fields!(self => self.tx);
}

impl<T: SignableTx> TxEnvelope for Signed<T> {
    fn hash(&self) -> B256 {
        self.hash
    }

    fn sender(&self) -> Result<Address> {
        self.signature.recover(&self.tx.signing_hash())
    }

    fn is_signed(&self) -> bool {
        true
    }

    fn encoded(&self) -> Vec<u8> {
        self.encode()
    }
}

/// A fee market payload whose sender is asserted rather than recovered.
///
/// The hash is computed over the unsigned payload, so it differs from the
/// hash any real signature would produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpersonatedTx {
    /// The unsigned payload
    pub tx: TxFeeMarket,
    /// The asserted sender
    pub from: Address,
}

impl ImpersonatedTx {
    /// Creates an impersonated transaction sent by `from`.
    pub fn new(tx: TxFeeMarket, from: Address) -> Self {
        Self { tx, from }
    }
}

impl TxFields for ImpersonatedTx {
    delegate_tx_fields!(self => self.tx);
}

impl TxEnvelope for ImpersonatedTx {
    fn hash(&self) -> B256 {
        self.tx.signing_hash()
    }

    fn sender(&self) -> Result<Address> {
        Ok(self.from)
    }

    fn is_signed(&self) -> bool {
        false
    }

    fn encoded(&self) -> Vec<u8> {
        self.tx.signing_payload()
    }
}

/// Any transaction ember can pool, execute or include in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Transaction {
    /// Legacy transaction
    Legacy(Signed<TxLegacy>),
    /// EIP-2930 transaction
    AccessList(Signed<TxAccessList>),
    /// EIP-1559 transaction
    FeeMarket(Signed<TxFeeMarket>),
    /// EIP-4844 transaction
    Blob(Signed<TxBlob>),
    /// Transaction with an asserted sender
    Impersonated(ImpersonatedTx),
}

impl Transaction {
    fn fields(&self) -> &dyn TxFields {
        match self {
            Self::Legacy(tx) => tx,
            Self::AccessList(tx) => tx,
            Self::FeeMarket(tx) => tx,
            Self::Blob(tx) => tx,
            Self::Impersonated(tx) => tx,
        }
    }

    fn envelope(&self) -> &dyn TxEnvelope {
        match self {
            Self::Legacy(tx) => tx,
            Self::AccessList(tx) => tx,
            Self::FeeMarket(tx) => tx,
            Self::Blob(tx) => tx,
            Self::Impersonated(tx) => tx,
        }
    }

    /// Decodes an EIP-2718 envelope or a bare legacy RLP list.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let first = *data
            .first()
            .ok_or_else(|| TypesError::InvalidTransaction("empty transaction data".into()))?;
        if first >= 0xc0 {
            let tx = Signed::<TxLegacy>::decode_body(data)?;
            let chain_id = tx.signature.legacy_chain_id();
            let tx = Signed::new(TxLegacy { chain_id, ..tx.tx }, tx.signature);
            return Ok(Self::Legacy(tx));
        }
        let body = &data[1..];
        match TxType::from_byte(first)? {
            TxType::AccessList => Ok(Self::AccessList(Signed::decode_body(body)?)),
            TxType::FeeMarket => Ok(Self::FeeMarket(Signed::decode_body(body)?)),
            TxType::Blob => Ok(Self::Blob(Signed::decode_body(body)?)),
            TxType::Legacy => Err(TypesError::InvalidTransaction(
                "legacy transactions are not type-prefixed".into(),
            )),
        }
    }

    /// Returns true if the sender is asserted rather than recovered.
    pub fn is_impersonated(&self) -> bool {
        matches!(self, Self::Impersonated(_))
    }

    /// Encoded size in bytes.
    pub fn size(&self) -> usize {
        self.encoded().len()
    }
}

impl TxFields for Transaction {
    delegate_tx_fields!(self => self.fields());
}

impl TxEnvelope for Transaction {
    fn hash(&self) -> B256 {
        self.envelope().hash()
    }

    fn sender(&self) -> Result<Address> {
        self.envelope().sender()
    }

    fn is_signed(&self) -> bool {
        self.envelope().is_signed()
    }

    fn encoded(&self) -> Vec<u8> {
        self.envelope().encoded()
    }
}

impl From<Signed<TxLegacy>> for Transaction {
    fn from(tx: Signed<TxLegacy>) -> Self {
        Self::Legacy(tx)
    }
}

impl From<Signed<TxAccessList>> for Transaction {
    fn from(tx: Signed<TxAccessList>) -> Self {
        Self::AccessList(tx)
    }
}

impl From<Signed<TxFeeMarket>> for Transaction {
    fn from(tx: Signed<TxFeeMarket>) -> Self {
        Self::FeeMarket(tx)
    }
}

impl From<Signed<TxBlob>> for Transaction {
    fn from(tx: Signed<TxBlob>) -> Self {
        Self::Blob(tx)
    }
}

impl From<ImpersonatedTx> for Transaction {
    fn from(tx: ImpersonatedTx) -> Self {
        Self::Impersonated(tx)
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tx {{ hash: {}, type: {:?}, nonce: {}, to: {}, value: {} }}",
            self.hash(),
            self.tx_type(),
            self.nonce(),
            self.to()
                .map(|a| a.to_string())
                .unwrap_or_else(|| "CREATE".to_string()),
            self.value()
        )
    }
}
