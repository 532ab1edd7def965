//! JSON-RPC fork transport over HTTP.

use crate::fork::{ForkError, ForkTransport, RemoteAccount, RemoteBlock, RemoteTransaction};
use alloy_primitives::{Address, Bloom, Bytes, B256, U256, U64};
use async_trait::async_trait;
use ember_types::{
    AccessListItem, BlockHeader, ImpersonatedTx, Signature, Signed, Transaction, TxAccessList,
    TxBlob, TxFeeMarket, TxLegacy, EMPTY_OMMERS_HASH,
};
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, trace};

/// [`ForkTransport`] backed by a standard Ethereum JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct JsonRpcTransport {
    client: HttpClient,
    url: String,
}

impl JsonRpcTransport {
    /// Connects to `url`. Requests fail with a transport error after `timeout`.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ForkError> {
        let client = HttpClientBuilder::default()
            .request_timeout(timeout)
            .build(url)
            .map_err(|e| ForkError::Transport(e.to_string()))?;
        debug!(url, "Created fork transport");
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    /// Endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: jsonrpsee::core::params::ArrayParams,
    ) -> Result<T, ForkError> {
        trace!(method, "Fork RPC request");
        self.client
            .request(method, params)
            .await
            .map_err(|e| ForkError::Transport(format!("{method}: {e}")))
    }
}

fn tag(block: u64) -> String {
    format!("0x{block:x}")
}

#[async_trait]
impl ForkTransport for JsonRpcTransport {
    async fn get_account(&self, address: Address, block: u64) -> Result<RemoteAccount, ForkError> {
        let (balance, nonce, code) = futures::try_join!(
            self.call::<U256>("eth_getBalance", rpc_params![address, tag(block)]),
            self.call::<U64>("eth_getTransactionCount", rpc_params![address, tag(block)]),
            self.call::<Bytes>("eth_getCode", rpc_params![address, tag(block)]),
        )?;
        Ok(RemoteAccount {
            nonce: nonce.to::<u64>(),
            balance,
            code,
        })
    }

    async fn get_storage(
        &self,
        address: Address,
        key: B256,
        block: u64,
    ) -> Result<B256, ForkError> {
        self.call("eth_getStorageAt", rpc_params![address, key, tag(block)])
            .await
    }

    async fn block_number(&self) -> Result<u64, ForkError> {
        let number: U64 = self.call("eth_blockNumber", rpc_params![]).await?;
        Ok(number.to::<u64>())
    }

    async fn get_block_by_number(&self, number: u64) -> Result<Option<RemoteBlock>, ForkError> {
        let block: Option<RpcBlock> = self
            .call("eth_getBlockByNumber", rpc_params![tag(number), true])
            .await?;
        block.map(RpcBlock::into_remote).transpose()
    }

    async fn get_block_by_hash(&self, hash: B256) -> Result<Option<RemoteBlock>, ForkError> {
        let block: Option<RpcBlock> = self
            .call("eth_getBlockByHash", rpc_params![hash, true])
            .await?;
        block.map(RpcBlock::into_remote).transpose()
    }

    async fn get_uncle(&self, hash: B256, index: usize) -> Result<Option<BlockHeader>, ForkError> {
        let uncle: Option<RpcHeader> = self
            .call(
                "eth_getUncleByBlockHashAndIndex",
                rpc_params![hash, format!("0x{index:x}")],
            )
            .await?;
        Ok(uncle.map(RpcHeader::into_header))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcHeader {
    parent_hash: B256,
    #[serde(default)]
    sha3_uncles: Option<B256>,
    miner: Address,
    state_root: B256,
    transactions_root: B256,
    receipts_root: B256,
    logs_bloom: Bloom,
    #[serde(default)]
    difficulty: U256,
    number: U64,
    gas_limit: U64,
    gas_used: U64,
    timestamp: U64,
    #[serde(default)]
    extra_data: Bytes,
    #[serde(default)]
    mix_hash: B256,
    #[serde(default)]
    nonce: Option<alloy_primitives::B64>,
    #[serde(default)]
    base_fee_per_gas: Option<U256>,
    #[serde(default)]
    withdrawals_root: Option<B256>,
    #[serde(default)]
    blob_gas_used: Option<U64>,
    #[serde(default)]
    excess_blob_gas: Option<U64>,
    #[serde(default)]
    parent_beacon_block_root: Option<B256>,
}

impl RpcHeader {
    fn into_header(self) -> BlockHeader {
        BlockHeader {
            parent_hash: self.parent_hash,
            ommers_hash: self.sha3_uncles.unwrap_or(EMPTY_OMMERS_HASH),
            coinbase: self.miner,
            state_root: self.state_root,
            transactions_root: self.transactions_root,
            receipts_root: self.receipts_root,
            logs_bloom: self.logs_bloom,
            difficulty: self.difficulty,
            number: self.number.to::<u64>(),
            gas_limit: self.gas_limit.to::<u64>(),
            gas_used: self.gas_used.to::<u64>(),
            timestamp: self.timestamp.to::<u64>(),
            extra_data: self.extra_data,
            mix_hash: self.mix_hash,
            nonce: self.nonce.map(|n| u64::from_be_bytes(n.0)).unwrap_or_default(),
            base_fee_per_gas: self.base_fee_per_gas.map(|fee| fee.saturating_to::<u128>()),
            withdrawals_root: self.withdrawals_root,
            blob_gas_used: self.blob_gas_used.map(|v| v.to::<u64>()),
            excess_blob_gas: self.excess_blob_gas.map(|v| v.to::<u64>()),
            parent_beacon_block_root: self.parent_beacon_block_root,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlock {
    hash: B256,
    #[serde(flatten)]
    header: RpcHeader,
    #[serde(default)]
    transactions: Vec<RpcTransaction>,
    #[serde(default)]
    uncles: Vec<B256>,
}

impl RpcBlock {
    fn into_remote(self) -> Result<RemoteBlock, ForkError> {
        Ok(RemoteBlock {
            hash: self.hash,
            header: self.header.into_header(),
            transactions: self
                .transactions
                .into_iter()
                .map(RpcTransaction::into_remote)
                .collect(),
            uncles: self.uncles,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransaction {
    hash: B256,
    #[serde(rename = "type", default)]
    tx_type: U64,
    from: Address,
    nonce: U64,
    gas: U64,
    to: Option<Address>,
    value: U256,
    input: Bytes,
    #[serde(default)]
    chain_id: Option<U64>,
    #[serde(default)]
    gas_price: Option<U256>,
    #[serde(default)]
    max_fee_per_gas: Option<U256>,
    #[serde(default)]
    max_priority_fee_per_gas: Option<U256>,
    #[serde(default)]
    max_fee_per_blob_gas: Option<U256>,
    #[serde(default)]
    blob_versioned_hashes: Vec<B256>,
    #[serde(default)]
    access_list: Vec<RpcAccessListItem>,
    #[serde(default)]
    v: Option<U64>,
    #[serde(default)]
    r: Option<U256>,
    #[serde(default)]
    s: Option<U256>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcAccessListItem {
    address: Address,
    storage_keys: Vec<B256>,
}

impl RpcTransaction {
    fn into_remote(self) -> RemoteTransaction {
        let tx_type = self.tx_type.saturating_to::<u8>();
        let hash = self.hash;
        RemoteTransaction {
            hash,
            tx_type,
            tx: self.into_transaction(tx_type),
        }
    }

    /// Rebuilds the transaction, or `None` for types ember cannot represent.
    fn into_transaction(self, tx_type: u8) -> Option<Transaction> {
        let fee = |v: Option<U256>| v.map(|v| v.saturating_to::<u128>()).unwrap_or_default();
        let access_list = self
            .access_list
            .into_iter()
            .map(|item| AccessListItem {
                address: item.address,
                storage_keys: item.storage_keys,
            })
            .collect::<Vec<_>>();
        let chain_id = self.chain_id.map(|c| c.to::<u64>());
        let signature = match (self.v, self.r, self.s) {
            (Some(v), Some(r), Some(s)) => Some(Signature::new(v.to::<u64>(), r, s)),
            _ => None,
        };

        let tx = match tx_type {
            0 => Transaction::Legacy(Signed::new(
                TxLegacy {
                    chain_id,
                    nonce: self.nonce.to::<u64>(),
                    gas_price: fee(self.gas_price),
                    gas_limit: self.gas.to::<u64>(),
                    to: self.to,
                    value: self.value,
                    input: self.input,
                },
                signature?,
            )),
            1 => Transaction::AccessList(Signed::new(
                TxAccessList {
                    chain_id: chain_id.unwrap_or_default(),
                    nonce: self.nonce.to::<u64>(),
                    gas_price: fee(self.gas_price),
                    gas_limit: self.gas.to::<u64>(),
                    to: self.to,
                    value: self.value,
                    input: self.input,
                    access_list,
                },
                signature?,
            )),
            2 => {
                let payload = TxFeeMarket {
                    chain_id: chain_id.unwrap_or_default(),
                    nonce: self.nonce.to::<u64>(),
                    max_priority_fee_per_gas: fee(self.max_priority_fee_per_gas),
                    max_fee_per_gas: fee(self.max_fee_per_gas),
                    gas_limit: self.gas.to::<u64>(),
                    to: self.to,
                    value: self.value,
                    input: self.input,
                    access_list,
                };
                match signature {
                    Some(signature) => Transaction::FeeMarket(Signed::new(payload, signature)),
                    // some nodes omit signatures of system transactions
                    None => Transaction::Impersonated(ImpersonatedTx::new(payload, self.from)),
                }
            }
            3 => Transaction::Blob(Signed::new(
                TxBlob {
                    chain_id: chain_id.unwrap_or_default(),
                    nonce: self.nonce.to::<u64>(),
                    max_priority_fee_per_gas: fee(self.max_priority_fee_per_gas),
                    max_fee_per_gas: fee(self.max_fee_per_gas),
                    gas_limit: self.gas.to::<u64>(),
                    to: self.to?,
                    value: self.value,
                    input: self.input,
                    access_list,
                    max_fee_per_blob_gas: fee(self.max_fee_per_blob_gas),
                    blob_versioned_hashes: self.blob_versioned_hashes,
                },
                signature?,
            )),
            _ => return None,
        };
        Some(tx)
    }
}
