//! Log filters.

use alloy_primitives::{Address, B256};
use ember_types::Log;
use serde::{Deserialize, Serialize};

/// Address filter - single address or array of addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AddressFilter {
    /// Single address
    Single(Address),
    /// Any of these addresses
    Multiple(Vec<Address>),
}

impl AddressFilter {
    fn matches(&self, address: &Address) -> bool {
        match self {
            Self::Single(expected) => expected == address,
            Self::Multiple(expected) => expected.contains(address),
        }
    }
}

impl From<Address> for AddressFilter {
    fn from(address: Address) -> Self {
        Self::Single(address)
    }
}

impl From<Vec<Address>> for AddressFilter {
    fn from(addresses: Vec<Address>) -> Self {
        Self::Multiple(addresses)
    }
}

/// Topic filter - single topic or array of topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TopicFilter {
    /// Single topic
    Single(B256),
    /// Any of these topics
    Multiple(Vec<B256>),
}

impl TopicFilter {
    fn matches(&self, topic: &B256) -> bool {
        match self {
            Self::Single(expected) => expected == topic,
            Self::Multiple(expected) => expected.contains(topic),
        }
    }
}

impl From<B256> for TopicFilter {
    fn from(topic: B256) -> Self {
        Self::Single(topic)
    }
}

/// Filter parameters for [`ReceiptIndex::get_logs`](crate::ReceiptIndex::get_logs).
///
/// Topics are positional: `[None, Some(B)]` matches any first topic and `B`
/// in second position. Trailing topics of a log beyond the filter are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    /// First block, inclusive
    pub from_block: u64,
    /// Last block, inclusive
    pub to_block: u64,
    /// Contract address(es) to filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<AddressFilter>,
    /// Topics to filter (up to 4)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<Option<TopicFilter>>,
}

impl LogFilter {
    /// Filter over blocks `from_block..=to_block` matching every log.
    pub fn new(from_block: u64, to_block: u64) -> Self {
        Self {
            from_block,
            to_block,
            ..Default::default()
        }
    }

    /// Restrict to logs emitted by `address`.
    pub fn address(mut self, address: impl Into<AddressFilter>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Restrict by positional topics.
    pub fn topics(mut self, topics: Vec<Option<TopicFilter>>) -> Self {
        self.topics = topics;
        self
    }

    /// Check if a log matches the address and topic filters.
    pub fn matches(&self, log: &Log) -> bool {
        if let Some(ref address) = self.address {
            if !address.matches(&log.address) {
                return false;
            }
        }

        for (i, topic_filter) in self.topics.iter().enumerate() {
            // None means any topic matches
            let Some(filter) = topic_filter else {
                continue;
            };
            match log.topics.get(i) {
                Some(topic) if filter.matches(topic) => {}
                _ => return false,
            }
        }
        true
    }
}
