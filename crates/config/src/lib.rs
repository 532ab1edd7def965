//! # Ember Configuration
//!
//! Configuration parsing, genesis accounts and logging setup for an ember node.
//!
//! All settings live in one TOML file. Every section is optional; an empty
//! file yields a Cancun development chain with ten funded accounts.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ember_config::{init_tracing, Config};
//! use std::path::Path;
//!
//! let config = Config::load(Path::new("ember.toml"))?;
//! init_tracing(&config.logging)?;
//!
//! println!("Chain ID: {}", config.chain.chain_id);
//! ```
//!
//! ## Configuration Sections
//!
//! - `[chain]` - Chain id, hardfork, gas limit and initial base fee
//! - `[mining]` - `manual`, `auto` or `interval` block production
//! - `[pool]` - Transaction pool limits
//! - `[fork]` - Upstream endpoint and block to fork from (optional)
//! - `[receipts]` - Receipt retention and log query limits
//! - `[logging]` - Log level and format
//! - `[[genesis.accounts]]` - Initial account balances and code

mod config;
mod error;
mod genesis;
mod logging;

pub use config::*;
pub use error::*;
pub use genesis::*;
pub use logging::*;

/// Re-export alloy primitives for convenience
pub use alloy_primitives::{Address, B256, U256};
pub use ember_types::Hardfork;
