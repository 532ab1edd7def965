//! RLP helpers for the fixed-width primitives re-exported from `alloy-primitives`.
//!
//! The `rlp` crate has no impls for foreign types, so addresses, words and
//! big integers go through these free functions instead.

use alloy_primitives::{Address, Bytes, B256, U256};
use rlp::{DecoderError, Rlp, RlpStream};

pub(crate) fn append_u256(s: &mut RlpStream, value: &U256) {
    s.append(&value.to_be_bytes_trimmed_vec());
}

pub(crate) fn append_address(s: &mut RlpStream, address: &Address) {
    s.append(&address.as_slice());
}

pub(crate) fn append_b256(s: &mut RlpStream, hash: &B256) {
    s.append(&hash.as_slice());
}

pub(crate) fn append_bytes(s: &mut RlpStream, bytes: &Bytes) {
    s.append(&bytes.as_ref());
}

/// Appends a call target, or the empty string for contract creation.
pub(crate) fn append_to(s: &mut RlpStream, to: &Option<Address>) {
    match to {
        Some(addr) => append_address(s, addr),
        None => {
            s.append(&"");
        }
    }
}

pub(crate) fn u256_at(rlp: &Rlp<'_>, index: usize) -> Result<U256, DecoderError> {
    let bytes: Vec<u8> = rlp.val_at(index)?;
    if bytes.len() > 32 {
        return Err(DecoderError::RlpIsTooBig);
    }
    if bytes.first() == Some(&0) {
        return Err(DecoderError::RlpInvalidIndirection);
    }
    U256::try_from_be_slice(&bytes).ok_or(DecoderError::RlpIsTooBig)
}

pub(crate) fn address_at(rlp: &Rlp<'_>, index: usize) -> Result<Address, DecoderError> {
    address_from(&rlp.val_at::<Vec<u8>>(index)?)
}

pub(crate) fn address_from(bytes: &[u8]) -> Result<Address, DecoderError> {
    if bytes.len() != 20 {
        return Err(DecoderError::RlpInvalidLength);
    }
    Ok(Address::from_slice(bytes))
}

pub(crate) fn b256_at(rlp: &Rlp<'_>, index: usize) -> Result<B256, DecoderError> {
    b256_from(&rlp.val_at::<Vec<u8>>(index)?)
}

pub(crate) fn b256_from(bytes: &[u8]) -> Result<B256, DecoderError> {
    if bytes.len() != 32 {
        return Err(DecoderError::RlpInvalidLength);
    }
    Ok(B256::from_slice(bytes))
}

pub(crate) fn bytes_at(rlp: &Rlp<'_>, index: usize) -> Result<Bytes, DecoderError> {
    Ok(Bytes::from(rlp.val_at::<Vec<u8>>(index)?))
}

pub(crate) fn to_at(rlp: &Rlp<'_>, index: usize) -> Result<Option<Address>, DecoderError> {
    let bytes: Vec<u8> = rlp.val_at(index)?;
    if bytes.is_empty() {
        return Ok(None);
    }
    address_from(&bytes).map(Some)
}
