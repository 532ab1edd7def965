//! Hardfork identifiers and the rules derived from them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::TypesError;

/// Ethereum hardforks ember can execute, in activation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hardfork {
    /// Frontier
    Frontier,
    /// Homestead
    Homestead,
    /// Tangerine Whistle
    Tangerine,
    /// Spurious Dragon
    SpuriousDragon,
    /// Byzantium
    Byzantium,
    /// Constantinople
    Constantinople,
    /// Petersburg
    Petersburg,
    /// Istanbul
    Istanbul,
    /// Berlin
    Berlin,
    /// London
    London,
    /// The merge
    Merge,
    /// Shanghai
    Shanghai,
    /// Cancun
    Cancun,
}

impl Hardfork {
    /// Whether EIP-1559 base fees are active.
    pub fn is_london(&self) -> bool {
        *self >= Self::London
    }

    /// Whether withdrawals are active.
    pub fn is_shanghai(&self) -> bool {
        *self >= Self::Shanghai
    }

    /// Whether blob transactions are active.
    pub fn is_cancun(&self) -> bool {
        *self >= Self::Cancun
    }
}

impl FromStr for Hardfork {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "frontier" | "chainstart" => Ok(Self::Frontier),
            "homestead" => Ok(Self::Homestead),
            "tangerine" | "tangerinewhistle" => Ok(Self::Tangerine),
            "spuriousdragon" => Ok(Self::SpuriousDragon),
            "byzantium" => Ok(Self::Byzantium),
            "constantinople" => Ok(Self::Constantinople),
            "petersburg" => Ok(Self::Petersburg),
            "istanbul" => Ok(Self::Istanbul),
            "berlin" => Ok(Self::Berlin),
            "london" => Ok(Self::London),
            "merge" | "paris" => Ok(Self::Merge),
            "shanghai" => Ok(Self::Shanghai),
            "cancun" => Ok(Self::Cancun),
            other => Err(TypesError::UnknownHardfork(other.to_string())),
        }
    }
}

impl fmt::Display for Hardfork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = format!("{:?}", self).to_lowercase();
        f.write_str(&name)
    }
}

/// Chain-level rules consulted by the interpreter and the receipt index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainRules {
    /// Replay-protection chain id
    pub chain_id: u64,
    /// Hardfork used for execution
    pub hardfork: Hardfork,
    /// First block at which receipts carry a status instead of a state root
    pub byzantium_block: u64,
}

impl Default for ChainRules {
    fn default() -> Self {
        Self {
            chain_id: 900,
            hardfork: Hardfork::Cancun,
            byzantium_block: 0,
        }
    }
}

impl ChainRules {
    /// Whether receipts of block `number` carry a status flag.
    pub fn is_byzantium(&self, number: u64) -> bool {
        self.hardfork >= Hardfork::Byzantium && number >= self.byzantium_block
    }
}
