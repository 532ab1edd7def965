//! Transaction-level gas accounting
//!
//! Intrinsic gas and fee-field checks applied before a transaction reaches
//! the interpreter. Opcode costs live in revm's per-hardfork tables.

use ember_types::{AccessListItem, Hardfork, TxFields};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transaction-level gas costs for one hardfork
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasCosts {
    /// Base cost for a transaction (21000 gas)
    pub tx_base: u64,
    /// Extra cost of a contract creation
    pub tx_create: u64,
    /// Cost per zero byte of calldata
    pub tx_data_zero: u64,
    /// Cost per non-zero byte of calldata
    pub tx_data_non_zero: u64,
    /// Cost per access list address
    pub access_list_address: u64,
    /// Cost per access list storage key
    pub access_list_storage_key: u64,
    /// Cost per init code word (EIP-3860), zero before Shanghai
    pub init_code_word: u64,
}

impl GasCosts {
    /// Costs in effect at `hardfork`.
    pub fn for_hardfork(hardfork: Hardfork) -> Self {
        Self {
            tx_base: 21_000,
            tx_create: if hardfork >= Hardfork::Homestead {
                32_000
            } else {
                0
            },
            tx_data_zero: 4,
            // EIP-2028
            tx_data_non_zero: if hardfork >= Hardfork::Istanbul {
                16
            } else {
                68
            },
            access_list_address: 2_400,
            access_list_storage_key: 1_900,
            init_code_word: if hardfork.is_shanghai() { 2 } else { 0 },
        }
    }

    /// Gas charged before the first opcode runs.
    pub fn intrinsic_gas(&self, tx: &impl TxFields) -> u64 {
        self.intrinsic_gas_for(tx.is_create(), tx.input(), tx.access_list())
    }

    /// Intrinsic gas of an execution described by its parts.
    pub fn intrinsic_gas_for(
        &self,
        is_create: bool,
        data: &[u8],
        access_list: &[AccessListItem],
    ) -> u64 {
        let mut gas = self.tx_base;

        if is_create {
            gas += self.tx_create;
            let init_code_words = data.len().div_ceil(32) as u64;
            gas += init_code_words * self.init_code_word;
        }

        let zeros = data.iter().filter(|byte| **byte == 0).count() as u64;
        let non_zeros = data.len() as u64 - zeros;
        gas += zeros * self.tx_data_zero + non_zeros * self.tx_data_non_zero;

        for item in access_list {
            gas += self.access_list_address;
            gas += item.storage_keys.len() as u64 * self.access_list_storage_key;
        }

        gas
    }
}

impl Default for GasCosts {
    fn default() -> Self {
        Self::for_hardfork(Hardfork::Cancun)
    }
}

/// Errors in gas parameter validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GasValidationError {
    /// Gas limit does not cover intrinsic gas
    #[error("intrinsic gas too low: need {intrinsic}, have {gas_limit}")]
    IntrinsicGasTooLow {
        /// Intrinsic gas of the transaction
        intrinsic: u64,
        /// Provided gas limit
        gas_limit: u64,
    },

    /// Priority fee exceeds max fee
    #[error("priority fee {priority_fee} exceeds max fee {max_fee}")]
    PriorityFeeExceedsMaxFee {
        /// Provided priority fee
        priority_fee: u128,
        /// Provided max fee
        max_fee: u128,
    },
}

/// Checks the gas limit and fee fields of `tx` in isolation.
pub fn validate_gas_params(
    costs: &GasCosts,
    tx: &impl TxFields,
) -> Result<(), GasValidationError> {
    let intrinsic = costs.intrinsic_gas(tx);
    if tx.gas_limit() < intrinsic {
        return Err(GasValidationError::IntrinsicGasTooLow {
            intrinsic,
            gas_limit: tx.gas_limit(),
        });
    }

    if tx.max_priority_fee_per_gas() > tx.max_fee_per_gas() {
        return Err(GasValidationError::PriorityFeeExceedsMaxFee {
            priority_fee: tx.max_priority_fee_per_gas(),
            max_fee: tx.max_fee_per_gas(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_types::{Address, Bytes, TxFeeMarket, TxLegacy, B256};

    #[test]
    fn test_intrinsic_gas() {
        let costs = GasCosts::default();

        let transfer = TxLegacy {
            to: Some(Address::repeat_byte(1)),
            ..Default::default()
        };
        assert_eq!(costs.intrinsic_gas(&transfer), 21_000);

        let with_data = TxLegacy {
            input: Bytes::from_static(&[0, 1, 0, 1]),
            ..transfer.clone()
        };
        assert_eq!(costs.intrinsic_gas(&with_data), 21_000 + 4 + 16 + 4 + 16);

        let create = TxLegacy {
            to: None,
            input: Bytes::from(vec![1u8; 33]),
            ..Default::default()
        };
        assert_eq!(
            costs.intrinsic_gas(&create),
            21_000 + 32_000 + 2 * 2 + 33 * 16
        );
    }

    #[test]
    fn test_pre_istanbul_calldata_costs_more() {
        let tx = TxLegacy {
            to: Some(Address::ZERO),
            input: Bytes::from_static(&[1]),
            ..Default::default()
        };
        let berlin = GasCosts::for_hardfork(Hardfork::Berlin).intrinsic_gas(&tx);
        let byzantium = GasCosts::for_hardfork(Hardfork::Byzantium).intrinsic_gas(&tx);
        assert_eq!(byzantium - berlin, 52);
    }

    #[test]
    fn test_access_list_cost() {
        let tx = TxFeeMarket {
            to: Some(Address::ZERO),
            access_list: vec![AccessListItem {
                address: Address::repeat_byte(1),
                storage_keys: vec![B256::ZERO, B256::repeat_byte(1)],
            }],
            ..Default::default()
        };
        assert_eq!(
            GasCosts::default().intrinsic_gas(&tx),
            21_000 + 2_400 + 2 * 1_900
        );
    }

    #[test]
    fn test_gas_validation() {
        let costs = GasCosts::default();
        let tx = TxFeeMarket {
            to: Some(Address::ZERO),
            gas_limit: 21_000,
            max_fee_per_gas: 10,
            max_priority_fee_per_gas: 2,
            ..Default::default()
        };
        assert!(validate_gas_params(&costs, &tx).is_ok());

        let low = TxFeeMarket {
            gas_limit: 20_999,
            ..tx.clone()
        };
        assert!(matches!(
            validate_gas_params(&costs, &low),
            Err(GasValidationError::IntrinsicGasTooLow { .. })
        ));

        let inverted = TxFeeMarket {
            max_priority_fee_per_gas: 11,
            ..tx
        };
        assert!(matches!(
            validate_gas_params(&costs, &inverted),
            Err(GasValidationError::PriorityFeeExceedsMaxFee { .. })
        ));
    }
}
