//! Genesis accounts
//!
//! The accounts funded in the genesis state. Without explicit accounts the
//! node starts with the ten well-known development accounts.

use crate::error::{ConfigError, ConfigResult};
use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Well-known development accounts funded by default
pub const DEV_ACCOUNTS: [&str; 10] = [
    "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266",
    "0x70997970C51812dc3A010C7d01b50e0d17dc79C8",
    "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC",
    "0x90F79bf6EB2c4f870365E785982E1f101E93b906",
    "0x15d34AAf54267DB7D7c367839AAf71A00a2C6A65",
    "0x9965507D1a55bcC2695C58ba16FB37d819B0A4dc",
    "0x976EA74026E726554dB657fA54763abd0C3a0aa9",
    "0x14dC79964da2C08b23698B3D3cc7Ca32193d9955",
    "0x23618e81E3f5cdF7f54C3d65f7FBc0aBf5B21E8f",
    "0xa0Ee7A142d267C1f36714E4a8F75612F20a79720",
];

/// Balance of each default development account: 1000 ETH in wei
pub const DEV_ACCOUNT_BALANCE: &str = "1000000000000000000000";

/// Genesis configuration containing initial state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisConfig {
    /// Initial accounts with balances
    #[serde(default)]
    pub accounts: Vec<GenesisAccount>,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            accounts: DEV_ACCOUNTS
                .iter()
                .map(|address| GenesisAccount::new(*address, DEV_ACCOUNT_BALANCE))
                .collect(),
        }
    }
}

impl GenesisConfig {
    /// Validate the genesis configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut seen_accounts = HashSet::new();
        for account in &self.accounts {
            let address = account.parse_address()?;
            account.parse_balance()?;
            account.parse_code()?;
            if !seen_accounts.insert(address) {
                return Err(ConfigError::DuplicateAccount(account.address.clone()));
            }
        }

        debug!(accounts = self.accounts.len(), "Genesis validation passed");
        Ok(())
    }
}

/// Initial account in genesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    /// Account address (hex string with 0x prefix)
    pub address: String,

    /// Initial balance in wei (decimal string, unbounded)
    pub balance: String,

    /// Contract code (hex string with 0x prefix)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Initial nonce
    #[serde(default)]
    pub nonce: u64,
}

impl GenesisAccount {
    /// Creates an externally owned account with `balance` wei.
    pub fn new(address: impl Into<String>, balance: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            balance: balance.into(),
            code: None,
            nonce: 0,
        }
    }

    /// Parse address to alloy Address type.
    pub fn parse_address(&self) -> ConfigResult<Address> {
        if !self.address.starts_with("0x") || self.address.len() != 42 {
            return Err(ConfigError::InvalidAddress(self.address.clone()));
        }
        self.address
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(self.address.clone()))
    }

    /// Parse balance to U256.
    pub fn parse_balance(&self) -> ConfigResult<U256> {
        U256::from_str_radix(&self.balance, 10)
            .map_err(|_| ConfigError::InvalidBalance(self.balance.clone()))
    }

    /// Parse the contract code, empty when absent.
    pub fn parse_code(&self) -> ConfigResult<Bytes> {
        let Some(code) = &self.code else {
            return Ok(Bytes::new());
        };
        let digits = code.strip_prefix("0x").unwrap_or(code);
        hex::decode(digits)
            .map(Bytes::from)
            .map_err(|_| ConfigError::InvalidCode(self.address.clone()))
    }
}
