//! Configuration error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading and validation
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("Failed to read config file at {path}: {source}")]
    FileRead {
        /// File path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML configuration
    #[error("Failed to parse TOML config: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Failed to serialize configuration
    #[error("Failed to serialize config: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Invalid chain ID (must be non-zero)
    #[error("Invalid chain ID: chain_id must be non-zero")]
    InvalidChainId,

    /// Invalid gas limit
    #[error("Invalid gas limit: block_gas_limit must be at least 21000 (minimum tx gas), got {0}")]
    InvalidGasLimit(u64),

    /// Invalid block time
    #[error("Invalid block time: interval mining needs at least 1s, got {0}s")]
    InvalidBlockTime(u64),

    /// Invalid pool limit
    #[error("Invalid pool setting: {name} must be positive")]
    InvalidPoolLimit {
        /// Setting name
        name: &'static str,
    },

    /// Invalid receipts setting
    #[error("Invalid receipts setting: {name} must be positive")]
    InvalidReceiptsLimit {
        /// Setting name
        name: &'static str,
    },

    /// Invalid fork URL
    #[error("Invalid fork URL: {0}")]
    InvalidForkUrl(String),

    /// Invalid fork block tag
    #[error("Invalid fork block tag: {0}. Valid values: latest, safe, a block number or hash")]
    InvalidForkTag(String),

    /// Invalid address format
    #[error("Invalid address format: {0}")]
    InvalidAddress(String),

    /// Invalid balance string
    #[error("Invalid balance value: {0}")]
    InvalidBalance(String),

    /// Invalid contract code hex
    #[error("Invalid code for genesis account {0}")]
    InvalidCode(String),

    /// Duplicate genesis account
    #[error("Duplicate genesis account: {0}")]
    DuplicateAccount(String),

    /// Invalid log level
    #[error("Invalid log level: {0}. Valid values: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    /// Invalid log format
    #[error("Invalid log format: {0}. Valid values: json, pretty, compact")]
    InvalidLogFormat(String),

    /// Global subscriber could not be installed
    #[error("Failed to initialize tracing: {0}")]
    Tracing(String),
}

impl ConfigError {
    /// Stable identifier of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FileRead { .. } => "file_read",
            Self::TomlParse(_) => "toml_parse",
            Self::TomlSerialize(_) => "toml_serialize",
            Self::InvalidChainId => "invalid_chain_id",
            Self::InvalidGasLimit(_) => "invalid_gas_limit",
            Self::InvalidBlockTime(_) => "invalid_block_time",
            Self::InvalidPoolLimit { .. } => "invalid_pool_limit",
            Self::InvalidReceiptsLimit { .. } => "invalid_receipts_limit",
            Self::InvalidForkUrl(_) => "invalid_fork_url",
            Self::InvalidForkTag(_) => "invalid_fork_tag",
            Self::InvalidAddress(_) => "invalid_address",
            Self::InvalidBalance(_) => "invalid_balance",
            Self::InvalidCode(_) => "invalid_code",
            Self::DuplicateAccount(_) => "duplicate_account",
            Self::InvalidLogLevel(_) => "invalid_log_level",
            Self::InvalidLogFormat(_) => "invalid_log_format",
            Self::Tracing(_) => "tracing",
        }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
