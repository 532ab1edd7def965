//! Persisted node layout
//!
//! A persisted node is a directory with three JSON documents: the state
//! dump, the chain's blocks and the receipts by block. All three use ordered
//! collections, so persisting a restored node reproduces the same bytes.

use crate::{NodeError, Result};
use ember_chain::ChainDump;
use ember_receipts::ReceiptsDump;
use ember_state::StateDump;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Account and storage snapshot
pub const STATE_FILE: &str = "state.json";

/// Blocks by number and the safe head
pub const CHAIN_FILE: &str = "chain.json";

/// Receipts by block
pub const RECEIPTS_FILE: &str = "receipts.json";

/// Everything a node needs to resume
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDump {
    /// World state
    pub state: StateDump,
    /// Local blocks
    pub chain: ChainDump,
    /// Receipt index
    pub receipts: ReceiptsDump,
}

impl NodeDump {
    /// Writes the dump into `dir`, creating it if needed.
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|e| persistence_error(dir, e))?;
        write_json(&dir.join(STATE_FILE), &self.state)?;
        write_json(&dir.join(CHAIN_FILE), &self.chain)?;
        write_json(&dir.join(RECEIPTS_FILE), &self.receipts)?;
        debug!(?dir, accounts = self.state.len(), blocks = self.chain.blocks.len(), "Persisted node");
        Ok(())
    }

    /// Reads a dump written by [`NodeDump::write_to`].
    pub fn read_from(dir: &Path) -> Result<Self> {
        Ok(Self {
            state: read_json(&dir.join(STATE_FILE))?,
            chain: read_json(&dir.join(CHAIN_FILE))?,
            receipts: read_json(&dir.join(RECEIPTS_FILE))?,
        })
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value).map_err(|e| persistence_error(path, e))?;
    std::fs::write(path, data).map_err(|e| persistence_error(path, e))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read(path).map_err(|e| persistence_error(path, e))?;
    serde_json::from_slice(&data).map_err(|e| persistence_error(path, e))
}

fn persistence_error(path: &Path, err: impl std::fmt::Display) -> NodeError {
    NodeError::Persistence {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
