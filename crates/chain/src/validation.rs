//! Header validation against the parent block.

use crate::{ChainError, Result};
use alloy_primitives::B256;
use ember_types::fees::{self, BaseFeeParams, INITIAL_BASE_FEE, MAX_BLOB_GAS_PER_BLOCK};
use ember_types::{BlockHeader, ChainRules};

/// Which header checks [`validate_header`] applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderChecks {
    /// Every check
    #[default]
    All,
    /// Every check except the base fee, for blocks built with an explicit
    /// base fee override
    SkipBaseFee,
}

/// Base fee the block following `parent` must carry, if the fee market is
/// active.
pub fn next_base_fee(
    rules: &ChainRules,
    params: &BaseFeeParams,
    parent: &BlockHeader,
) -> Option<u128> {
    if !rules.hardfork.is_london() {
        return None;
    }
    Some(match parent.base_fee_per_gas {
        Some(base_fee) => params.next_base_fee(parent.gas_used, parent.gas_limit, base_fee),
        None => INITIAL_BASE_FEE,
    })
}

/// Excess blob gas the block following `parent` must carry, if blobs are
/// active.
pub fn next_excess_blob_gas(rules: &ChainRules, parent: &BlockHeader) -> Option<u64> {
    rules.hardfork.is_cancun().then(|| {
        fees::next_excess_blob_gas(
            parent.excess_blob_gas.unwrap_or_default(),
            parent.blob_gas_used.unwrap_or_default(),
        )
    })
}

/// Checks that `header` is a valid successor of `parent`, whose hash is
/// `parent_hash`.
pub fn validate_header(
    rules: &ChainRules,
    params: &BaseFeeParams,
    parent: &BlockHeader,
    parent_hash: B256,
    header: &BlockHeader,
    checks: HeaderChecks,
) -> Result<()> {
    if header.number != parent.number + 1 {
        return Err(ChainError::InvalidNumber {
            expected: parent.number + 1,
            actual: header.number,
        });
    }
    if header.parent_hash != parent_hash {
        return Err(ChainError::InvalidParentHash {
            expected: parent_hash,
            actual: header.parent_hash,
        });
    }
    if header.timestamp < parent.timestamp {
        return Err(ChainError::InvalidTimestamp {
            parent: parent.timestamp,
            actual: header.timestamp,
        });
    }
    if header.gas_used > header.gas_limit {
        return Err(ChainError::GasUsedExceedsLimit {
            used: header.gas_used,
            limit: header.gas_limit,
        });
    }

    if checks == HeaderChecks::All {
        let expected = next_base_fee(rules, params, parent);
        if header.base_fee_per_gas != expected {
            return Err(ChainError::InvalidBaseFee {
                expected,
                actual: header.base_fee_per_gas,
            });
        }
    }

    if let Some(expected) = next_excess_blob_gas(rules, parent) {
        if header.excess_blob_gas != Some(expected) {
            return Err(ChainError::InvalidExcessBlobGas {
                expected,
                actual: header.excess_blob_gas,
            });
        }
        let used = header.blob_gas_used.unwrap_or_default();
        if used > MAX_BLOB_GAS_PER_BLOCK {
            return Err(ChainError::BlobGasExceedsLimit {
                used,
                limit: MAX_BLOB_GAS_PER_BLOCK,
            });
        }
    }

    Ok(())
}
