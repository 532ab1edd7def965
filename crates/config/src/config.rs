//! Main configuration module for ember
//!
//! All node settings live in one TOML file; every section is optional and
//! falls back to development defaults.

use crate::error::{ConfigError, ConfigResult};
use crate::genesis::GenesisConfig;
use alloy_primitives::Address;
use ember_types::Hardfork;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Main configuration struct containing all ember settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Chain rules and block parameters
    pub chain: ChainConfig,

    /// Block production policy
    pub mining: MiningConfig,

    /// Transaction pool limits
    pub pool: TxPoolConfig,

    /// Upstream chain to fork from (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fork: Option<ForkConfig>,

    /// Receipt retention and log query limits
    pub receipts: ReceiptsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Genesis accounts
    pub genesis: GenesisConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use ember_config::Config;
    /// use std::path::Path;
    ///
    /// let config = Config::load(Path::new("ember.toml"))?;
    /// ```
    pub fn load(path: &Path) -> ConfigResult<Self> {
        info!("Loading configuration from {:?}", path);

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config = Self::from_toml_str(&content)?;

        info!(
            chain_id = config.chain.chain_id,
            hardfork = %config.chain.hardfork,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: Config = toml::from_str(content)?;
        debug!("Configuration parsed successfully, validating...");
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        self.chain.validate()?;
        self.mining.validate()?;
        self.pool.validate()?;
        if let Some(ref fork) = self.fork {
            fork.validate()?;
        }
        self.receipts.validate()?;
        self.logging.validate()?;
        self.genesis.validate()?;

        debug!("Configuration validation passed");
        Ok(())
    }

    /// Serialize the configuration to TOML.
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = self.to_toml_string()?;
        std::fs::write(path, content).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }
}

// =============================================================================
// Chain Configuration
// =============================================================================

/// Chain rules and block parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Replay-protection chain id
    pub chain_id: u64,

    /// Hardfork used for execution
    pub hardfork: Hardfork,

    /// Gas limit of mined blocks
    pub block_gas_limit: u64,

    /// Base fee of the genesis block in wei
    pub initial_base_fee: u64,

    /// First block whose receipts carry a status flag
    pub byzantium_block: u64,

    /// Fee recipient of mined blocks
    pub coinbase: Address,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 900,
            hardfork: Hardfork::Cancun,
            block_gas_limit: 30_000_000,
            initial_base_fee: 1_000_000_000, // 1 gwei
            byzantium_block: 0,
            coinbase: Address::ZERO,
        }
    }
}

impl ChainConfig {
    /// Validate chain settings.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.chain_id == 0 {
            return Err(ConfigError::InvalidChainId);
        }
        if self.block_gas_limit < 21_000 {
            return Err(ConfigError::InvalidGasLimit(self.block_gas_limit));
        }
        Ok(())
    }
}

// =============================================================================
// Mining Configuration
// =============================================================================

/// Block production policy.
///
/// ```toml
/// [mining]
/// mode = "interval"
/// block_time_secs = 2
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum MiningConfig {
    /// Blocks are mined only on request
    Manual,
    /// A block is mined after every accepted transaction
    #[default]
    Auto,
    /// A block is mined on a fixed interval
    Interval {
        /// Seconds between blocks
        block_time_secs: u64,
    },
}

impl MiningConfig {
    /// Interval between blocks, for interval mining.
    pub fn block_time(&self) -> Option<Duration> {
        match self {
            Self::Interval { block_time_secs } => Some(Duration::from_secs(*block_time_secs)),
            _ => None,
        }
    }

    /// Validate mining settings.
    pub fn validate(&self) -> ConfigResult<()> {
        if let Self::Interval { block_time_secs } = self {
            if *block_time_secs == 0 {
                return Err(ConfigError::InvalidBlockTime(*block_time_secs));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Pool Configuration
// =============================================================================

/// Transaction pool limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxPoolConfig {
    /// Minimum effective gas price in wei
    pub min_gas_price: u64,

    /// Maximum number of pooled transactions
    pub max_pool_size: usize,

    /// Maximum number of pooled transactions per sender
    pub max_per_sender: usize,

    /// Maximum encoded transaction size in bytes
    pub max_tx_size: usize,

    /// Fee bump required to replace a pooled transaction, in percent
    pub price_bump_percent: u64,

    /// Age in seconds after which a transaction still pooled once a block
    /// is sealed is evicted; 0 keeps transactions indefinitely
    pub max_tx_age_secs: u64,
}

impl Default for TxPoolConfig {
    fn default() -> Self {
        Self {
            min_gas_price: 0,
            max_pool_size: 5_000,
            max_per_sender: 100,
            max_tx_size: 131_072, // 128 KB
            price_bump_percent: 10,
            max_tx_age_secs: 20 * 60,
        }
    }
}

impl TxPoolConfig {
    /// Eviction age of pooled transactions, if any
    pub fn max_tx_age(&self) -> Option<Duration> {
        (self.max_tx_age_secs > 0).then(|| Duration::from_secs(self.max_tx_age_secs))
    }

    /// Validate pool settings.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_pool_size == 0 {
            return Err(ConfigError::InvalidPoolLimit {
                name: "max_pool_size",
            });
        }
        if self.max_per_sender == 0 {
            return Err(ConfigError::InvalidPoolLimit {
                name: "max_per_sender",
            });
        }
        if self.max_tx_size == 0 {
            return Err(ConfigError::InvalidPoolLimit {
                name: "max_tx_size",
            });
        }
        Ok(())
    }
}

// =============================================================================
// Fork Configuration
// =============================================================================

/// Upstream chain to fork from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkConfig {
    /// JSON-RPC endpoint
    pub url: String,

    /// Block to fork at: `latest`, `safe`, a number or a 0x block hash
    #[serde(default = "default_fork_tag")]
    pub block_tag: String,

    /// Timeout of a single upstream request in milliseconds
    #[serde(default = "default_fork_timeout")]
    pub timeout_ms: u64,
}

fn default_fork_tag() -> String {
    "latest".to_string()
}

fn default_fork_timeout() -> u64 {
    30_000
}

impl ForkConfig {
    /// Fork at the upstream head of `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            block_tag: default_fork_tag(),
            timeout_ms: default_fork_timeout(),
        }
    }

    /// Upstream request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Validate fork settings.
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(ConfigError::InvalidForkUrl(self.url.clone()));
        }

        let tag = self.block_tag.as_str();
        let valid_tag = matches!(tag, "latest" | "safe")
            || tag.parse::<u64>().is_ok()
            || tag
                .strip_prefix("0x")
                .is_some_and(|digits| hex::decode(digits).is_ok() || u64::from_str_radix(digits, 16).is_ok());
        if !valid_tag {
            return Err(ConfigError::InvalidForkTag(self.block_tag.clone()));
        }
        Ok(())
    }
}

// =============================================================================
// Receipts Configuration
// =============================================================================

/// Receipt retention and log query limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiptsConfig {
    /// Keep receipts of only the most recent N blocks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retain_blocks: Option<u64>,

    /// Maximum number of logs returned by one query
    pub max_logs: usize,

    /// Maximum block range of one log query
    pub max_block_range: u64,
}

impl Default for ReceiptsConfig {
    fn default() -> Self {
        Self {
            retain_blocks: None,
            max_logs: 10_000,
            max_block_range: 2_500,
        }
    }
}

impl ReceiptsConfig {
    /// Validate receipts settings.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.retain_blocks == Some(0) {
            return Err(ConfigError::InvalidReceiptsLimit {
                name: "retain_blocks",
            });
        }
        if self.max_logs == 0 {
            return Err(ConfigError::InvalidReceiptsLimit { name: "max_logs" });
        }
        if self.max_block_range == 0 {
            return Err(ConfigError::InvalidReceiptsLimit {
                name: "max_block_range",
            });
        }
        Ok(())
    }
}

// =============================================================================
// Logging Configuration
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl LoggingConfig {
    /// Validate logging settings.
    pub fn validate(&self) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.level.clone()));
        }

        let valid_formats = ["json", "pretty", "compact"];
        if !valid_formats.contains(&self.format.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogFormat(self.format.clone()));
        }

        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
