//! Receipts, logs and the logs bloom.

use crate::codec::{append_address, append_b256, append_bytes};
use crate::transaction::TxType;
use alloy_primitives::{Address, Bloom, BloomInput, Bytes, B256};
use rlp::{Encodable, RlpStream};
use serde::{Deserialize, Serialize};

/// A log entry as emitted by the interpreter, without position metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Log {
    /// Emitting contract
    pub address: Address,
    /// Indexed topics, at most four
    pub topics: Vec<B256>,
    /// Unindexed payload
    pub data: Bytes,
}

impl Log {
    /// Creates a log entry.
    pub fn new(address: Address, topics: Vec<B256>, data: Bytes) -> Self {
        Self {
            address,
            topics,
            data,
        }
    }

    /// Inserts the address and every topic into `bloom`.
    pub fn accrue_bloom(&self, bloom: &mut Bloom) {
        bloom.accrue(BloomInput::Raw(self.address.as_slice()));
        for topic in &self.topics {
            bloom.accrue(BloomInput::Raw(topic.as_slice()));
        }
    }
}

impl Encodable for Log {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(3);
        append_address(s, &self.address);
        s.begin_list(self.topics.len());
        for topic in &self.topics {
            append_b256(s, topic);
        }
        append_bytes(s, &self.data);
    }
}

/// Builds the bloom of a set of logs.
pub fn logs_bloom<'a>(logs: impl IntoIterator<Item = &'a Log>) -> Bloom {
    let mut bloom = Bloom::ZERO;
    for log in logs {
        log.accrue_bloom(&mut bloom);
    }
    bloom
}

/// First field of a receipt, selected by hardfork.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReceiptOutcome {
    /// Byzantium and later: success flag
    Status(bool),
    /// Before Byzantium: intermediate state root after the transaction
    StateRoot(B256),
}

impl ReceiptOutcome {
    /// Success flag; pre-Byzantium receipts carry no status and report `None`.
    pub fn status(&self) -> Option<bool> {
        match self {
            Self::Status(ok) => Some(*ok),
            Self::StateRoot(_) => None,
        }
    }
}

/// Per-transaction execution record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Envelope type of the transaction
    pub tx_type: TxType,
    /// Status or intermediate state root
    pub outcome: ReceiptOutcome,
    /// Gas used by this and all preceding transactions in the block
    pub cumulative_gas_used: u64,
    /// Bloom over `logs`
    pub logs_bloom: Bloom,
    /// Emitted logs
    pub logs: Vec<Log>,
    /// Gas used by this transaction alone
    pub gas_used: u64,
    /// Price per gas actually paid
    pub effective_gas_price: u128,
    /// Address of the contract created, if any
    pub contract_address: Option<Address>,
    /// Blob gas used, for blob transactions
    pub blob_gas_used: Option<u64>,
    /// Blob gas price paid, for blob transactions
    pub blob_gas_price: Option<u128>,
}

impl Receipt {
    /// Consensus encoding: `rlp([outcome, cumulative_gas, bloom, logs])`,
    /// prefixed by the type byte for typed transactions.
    pub fn encode(&self) -> Vec<u8> {
        let mut s = RlpStream::new_list(4);
        match self.outcome {
            ReceiptOutcome::Status(true) => {
                s.append(&1u8);
            }
            ReceiptOutcome::Status(false) => {
                s.append_empty_data();
            }
            ReceiptOutcome::StateRoot(root) => append_b256(&mut s, &root),
        }
        s.append(&self.cumulative_gas_used);
        s.append(&self.logs_bloom.as_slice());
        s.append_list::<Log, Log>(&self.logs);
        let body = s.out();

        if self.tx_type == TxType::Legacy {
            return body.to_vec();
        }
        let mut out = Vec::with_capacity(body.len() + 1);
        out.push(self.tx_type.as_byte());
        out.extend_from_slice(&body);
        out
    }

    /// Whether the transaction succeeded; pre-Byzantium receipts report `true`.
    pub fn is_success(&self) -> bool {
        self.outcome.status().unwrap_or(true)
    }
}
