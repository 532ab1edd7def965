//! EIP-1559 and EIP-4844 fee arithmetic.

use serde::{Deserialize, Serialize};

/// Target blob gas per block (three blobs).
pub const TARGET_BLOB_GAS_PER_BLOCK: u64 = 393_216;

/// Maximum blob gas per block (six blobs).
pub const MAX_BLOB_GAS_PER_BLOCK: u64 = 786_432;

/// Minimum blob gas price in wei.
pub const MIN_BLOB_GASPRICE: u128 = 1;

/// Blob base fee update fraction.
pub const BLOB_GASPRICE_UPDATE_FRACTION: u128 = 3_338_477;

/// Base fee of the first London block.
pub const INITIAL_BASE_FEE: u128 = 1_000_000_000;

/// Parameters of the EIP-1559 base fee controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseFeeParams {
    /// Bounds the per-block change to `1/denominator`
    pub max_change_denominator: u128,
    /// Gas target is `gas_limit / elasticity_multiplier`
    pub elasticity_multiplier: u64,
}

impl Default for BaseFeeParams {
    fn default() -> Self {
        Self {
            max_change_denominator: 8,
            elasticity_multiplier: 2,
        }
    }
}

impl BaseFeeParams {
    /// Base fee of the block following a parent with the given usage.
    pub fn next_base_fee(
        &self,
        parent_gas_used: u64,
        parent_gas_limit: u64,
        parent_base_fee: u128,
    ) -> u128 {
        let target = parent_gas_limit / self.elasticity_multiplier;
        if target == 0 || parent_gas_used == target {
            return parent_base_fee;
        }

        if parent_gas_used > target {
            let delta = (parent_gas_used - target) as u128;
            let increase = std::cmp::max(
                parent_base_fee * delta / target as u128 / self.max_change_denominator,
                1,
            );
            parent_base_fee.saturating_add(increase)
        } else {
            let delta = (target - parent_gas_used) as u128;
            let decrease = parent_base_fee * delta / target as u128 / self.max_change_denominator;
            parent_base_fee.saturating_sub(decrease)
        }
    }
}

/// Excess blob gas of the block following a parent with the given values.
pub fn next_excess_blob_gas(parent_excess_blob_gas: u64, parent_blob_gas_used: u64) -> u64 {
    (parent_excess_blob_gas + parent_blob_gas_used).saturating_sub(TARGET_BLOB_GAS_PER_BLOCK)
}

/// Blob gas price for a block with `excess_blob_gas`.
pub fn blob_gas_price(excess_blob_gas: u64) -> u128 {
    fake_exponential(
        MIN_BLOB_GASPRICE,
        excess_blob_gas as u128,
        BLOB_GASPRICE_UPDATE_FRACTION,
    )
}

/// Integer approximation of `factor * e ** (numerator / denominator)`.
fn fake_exponential(factor: u128, numerator: u128, denominator: u128) -> u128 {
    let mut i = 1u128;
    let mut output = 0u128;
    let mut accum = factor * denominator;
    while accum > 0 {
        output = output.saturating_add(accum);
        accum = accum.saturating_mul(numerator) / (denominator * i);
        i += 1;
    }
    output / denominator
}
