//! Tests for the transaction pool.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use ember_txpool::{
    AddOptions, HeadInfo, MockAccountState, OrderingOptions, PoolConfig, PoolError, PoolEvent,
    PoolStatus, TxPool, ValidationConfig,
};
use ember_types::transaction::public_key_to_address;
use ember_types::{
    Block, BlockHeader, ImpersonatedTx, SignableTx, Transaction, TxBlob, TxEnvelope, TxFeeMarket,
    TxFields, TxLegacy,
};
use k256::ecdsa::SigningKey;

const GWEI: u128 = 1_000_000_000;
const ETH: u128 = 1_000_000_000_000_000_000;

fn key(seed: u8) -> SigningKey {
    SigningKey::from_slice(&[seed; 32]).unwrap()
}

fn address_of(seed: u8) -> Address {
    public_key_to_address(key(seed).verifying_key())
}

fn create_pool_with(config: PoolConfig) -> (TxPool<MockAccountState>, Arc<MockAccountState>) {
    let state = Arc::new(MockAccountState::new());
    for seed in 1..=4 {
        state.set_balance(address_of(seed), U256::from(100 * ETH));
    }
    let pool = TxPool::new(config, ValidationConfig::default(), Arc::clone(&state));
    (pool, state)
}

fn create_pool() -> (TxPool<MockAccountState>, Arc<MockAccountState>) {
    create_pool_with(PoolConfig::default())
}

/// Fee market transfer from `seed` with the given tip and fee cap in gwei
fn fee_market(seed: u8, nonce: u64, tip: u128, max_fee: u128) -> Transaction {
    TxFeeMarket {
        chain_id: 900,
        nonce,
        max_priority_fee_per_gas: tip * GWEI,
        max_fee_per_gas: max_fee * GWEI,
        gas_limit: 21_000,
        to: Some(Address::repeat_byte(0xee)),
        value: U256::from(1u64),
        ..Default::default()
    }
    .sign(&key(seed))
    .unwrap()
    .into()
}

fn legacy(seed: u8, nonce: u64, gas_price: u128) -> Transaction {
    TxLegacy {
        chain_id: Some(900),
        nonce,
        gas_price: gas_price * GWEI,
        gas_limit: 21_000,
        to: Some(Address::repeat_byte(0xee)),
        value: U256::from(1u64),
        ..Default::default()
    }
    .sign(&key(seed))
    .unwrap()
    .into()
}

fn blob(seed: u8, nonce: u64, tip: u128, blobs: u8) -> Transaction {
    TxBlob {
        chain_id: 900,
        nonce,
        max_priority_fee_per_gas: tip * GWEI,
        max_fee_per_gas: 100 * GWEI,
        gas_limit: 21_000,
        to: Address::repeat_byte(0xee),
        max_fee_per_blob_gas: GWEI,
        blob_versioned_hashes: (0..blobs).map(|i| B256::repeat_byte(0x01 + i)).collect(),
        ..Default::default()
    }
    .sign(&key(seed))
    .unwrap()
    .into()
}

fn hashes(txs: &[Transaction]) -> Vec<B256> {
    txs.iter().map(|tx| tx.hash()).collect()
}

#[tokio::test]
async fn test_add_and_get() {
    let (pool, _state) = create_pool();
    let tx = fee_market(1, 0, 1, 10);

    let hash = pool.add(tx.clone()).await.unwrap();
    assert_eq!(hash, tx.hash());
    assert_eq!(pool.len(), 1);
    assert!(pool.contains(&hash));
    assert_eq!(pool.get(&hash), Some(tx));
    assert_eq!(pool.get_pooled(&hash).unwrap().sender, address_of(1));
}

#[tokio::test]
async fn test_duplicate_rejected() {
    let (pool, _state) = create_pool();
    let tx = fee_market(1, 0, 1, 10);
    pool.add(tx.clone()).await.unwrap();

    let err = pool.add(tx.clone()).await.unwrap_err();
    assert_eq!(err, PoolError::AlreadyExists(tx.hash()));
    assert_eq!(err.kind(), "already_exists");
}

#[tokio::test]
async fn test_nonce_below_account_rejected() {
    let (pool, state) = create_pool();
    state.set_nonce(address_of(1), 5);

    let err = pool.add(fee_market(1, 4, 1, 10)).await.unwrap_err();
    assert_eq!(err.kind(), "nonce_too_low");
    assert!(pool.is_empty());
}

#[tokio::test]
async fn test_insufficient_balance_rejected_before_pooling() {
    let (pool, state) = create_pool();
    state.set_balance(address_of(1), U256::from(ETH));

    let tx: Transaction = TxFeeMarket {
        chain_id: 900,
        max_priority_fee_per_gas: GWEI,
        max_fee_per_gas: 10 * GWEI,
        gas_limit: 21_000,
        to: Some(address_of(2)),
        value: U256::from(1000 * ETH),
        ..Default::default()
    }
    .sign(&key(1))
    .unwrap()
    .into();

    let err = pool.add(tx.clone()).await.unwrap_err();
    assert_eq!(err.kind(), "insufficient_balance");
    assert!(pool.is_empty());

    // The same transaction is accepted when the balance check is skipped
    let options = AddOptions {
        skip_balance: true,
        ..Default::default()
    };
    assert!(pool.add_with(tx, options).await.is_ok());
}

#[tokio::test]
async fn test_min_gas_price() {
    let (pool, _state) = create_pool();
    pool.set_min_gas_price(5 * GWEI);

    let err = pool.add(fee_market(1, 0, 1, 2)).await.unwrap_err();
    assert_eq!(err.kind(), "gas_price_too_low");

    assert!(pool.add(fee_market(1, 0, 1, 5)).await.is_ok());
}

#[tokio::test]
async fn test_admission_order_nonce_before_price() {
    let (pool, state) = create_pool();
    pool.set_min_gas_price(100 * GWEI);
    state.set_nonce(address_of(1), 1);

    // Both the nonce and the price are wrong: the nonce check wins
    let err = pool.add(fee_market(1, 0, 1, 2)).await.unwrap_err();
    assert_eq!(err.kind(), "nonce_too_low");
}

#[tokio::test]
async fn test_replacement_requires_price_bump() {
    let (pool, _state) = create_pool();
    let mut events = pool.subscribe();

    let original = fee_market(1, 0, 10, 100);
    pool.add(original.clone()).await.unwrap();
    assert_eq!(events.recv().await.unwrap(), PoolEvent::Added(original.hash()));

    // 5% bump on both fees is not enough
    let underpriced = fee_market(1, 0, 10, 105);
    let err = pool.add(underpriced).await.unwrap_err();
    assert_eq!(
        err,
        PoolError::ReplacementUnderpriced {
            minimum: 11 * GWEI,
            provided: 10 * GWEI,
        }
    );
    assert_eq!(err.kind(), "replacement_underpriced");

    // Tip bumped but fee cap not
    let err = pool.add(fee_market(1, 0, 11, 105)).await.unwrap_err();
    assert_eq!(
        err,
        PoolError::ReplacementUnderpriced {
            minimum: 110 * GWEI,
            provided: 105 * GWEI,
        }
    );

    let replacement = fee_market(1, 0, 11, 110);
    pool.add(replacement.clone()).await.unwrap();
    assert_eq!(pool.len(), 1);
    assert!(!pool.contains(&original.hash()));
    assert_eq!(pool.get(&replacement.hash()), Some(replacement.clone()));

    assert_eq!(events.recv().await.unwrap(), PoolEvent::Removed(original.hash()));
    assert_eq!(events.recv().await.unwrap(), PoolEvent::Added(replacement.hash()));
}

#[tokio::test]
async fn test_blob_replacement_requires_blob_fee_bump() {
    let (pool, _state) = create_pool();
    pool.add(blob(1, 0, 1, 1)).await.unwrap();

    let same_blob_fee: Transaction = TxBlob {
        chain_id: 900,
        max_priority_fee_per_gas: 2 * GWEI,
        max_fee_per_gas: 200 * GWEI,
        gas_limit: 21_000,
        to: Address::repeat_byte(0xee),
        max_fee_per_blob_gas: GWEI,
        blob_versioned_hashes: vec![B256::repeat_byte(0x01)],
        ..Default::default()
    }
    .sign(&key(1))
    .unwrap()
    .into();

    let err = pool.add(same_blob_fee).await.unwrap_err();
    assert_eq!(
        err,
        PoolError::ReplacementUnderpriced {
            minimum: GWEI * 11 / 10,
            provided: GWEI,
        }
    );
}

#[tokio::test]
async fn test_impersonated_requires_opt_in() {
    let (pool, state) = create_pool();
    let from = Address::repeat_byte(0xaa);
    state.set_balance(from, U256::from(ETH));

    let payload = TxFeeMarket {
        chain_id: 900,
        max_priority_fee_per_gas: GWEI,
        max_fee_per_gas: 10 * GWEI,
        gas_limit: 21_000,
        to: Some(Address::repeat_byte(0xee)),
        ..Default::default()
    };
    let tx: Transaction = ImpersonatedTx::new(payload, from).into();

    let err = pool.add(tx.clone()).await.unwrap_err();
    assert_eq!(err.kind(), "unsigned");

    let options = AddOptions {
        require_signature: false,
        ..Default::default()
    };
    pool.add_with(tx.clone(), options).await.unwrap();
    assert_eq!(pool.transactions_by_sender(&from), vec![tx]);
}

#[tokio::test]
async fn test_sender_limit() {
    let (pool, _state) = create_pool_with(PoolConfig {
        max_per_sender: 2,
        ..Default::default()
    });

    pool.add(fee_market(1, 0, 1, 10)).await.unwrap();
    pool.add(fee_market(1, 1, 1, 10)).await.unwrap();
    let err = pool.add(fee_market(1, 2, 1, 10)).await.unwrap_err();
    assert_eq!(
        err,
        PoolError::SenderLimitReached {
            sender: address_of(1),
            limit: 2
        }
    );

    // Replacing an existing nonce does not count against the limit
    assert!(pool.add(fee_market(1, 1, 2, 20)).await.is_ok());
    // Other senders are unaffected
    assert!(pool.add(fee_market(2, 0, 1, 10)).await.is_ok());
}

#[tokio::test]
async fn test_pool_full() {
    let (pool, _state) = create_pool_with(PoolConfig {
        max_pool_size: 1,
        ..Default::default()
    });

    pool.add(fee_market(1, 0, 1, 10)).await.unwrap();
    let err = pool.add(fee_market(2, 0, 1, 10)).await.unwrap_err();
    assert_eq!(err, PoolError::PoolFull);
}

#[tokio::test]
async fn test_ordering_by_price_across_senders() {
    let (pool, _state) = create_pool();
    let low = fee_market(1, 0, 1, 100);
    let high = fee_market(2, 0, 5, 100);
    let mid = fee_market(3, 0, 3, 100);
    for tx in [&low, &high, &mid] {
        pool.add(tx.clone()).await.unwrap();
    }

    let ordered = pool.txs_by_price_and_nonce(OrderingOptions::default());
    assert_eq!(hashes(&ordered), hashes(&[high, mid, low]));
}

#[tokio::test]
async fn test_nonce_order_within_sender() {
    let (pool, _state) = create_pool();
    // Sender 1 pays little for nonce 0 and a lot for nonce 1 and 2
    let a0 = fee_market(1, 0, 1, 100);
    let a1 = fee_market(1, 1, 50, 100);
    let a2 = fee_market(1, 2, 60, 100);
    let b0 = fee_market(2, 0, 10, 100);
    for tx in [&a2, &a1, &b0, &a0] {
        pool.add(tx.clone()).await.unwrap();
    }

    let ordered = pool.txs_by_price_and_nonce(OrderingOptions::default());
    assert_eq!(hashes(&ordered), hashes(&[b0, a0, a1, a2]));
}

#[tokio::test]
async fn test_equal_price_is_fifo() {
    let (pool, _state) = create_pool();
    let first = fee_market(3, 0, 2, 100);
    let second = fee_market(1, 0, 2, 100);
    let third = fee_market(2, 0, 2, 100);
    for tx in [&first, &second, &third] {
        pool.add(tx.clone()).await.unwrap();
    }

    let ordered = pool.txs_by_price_and_nonce(OrderingOptions::default());
    assert_eq!(hashes(&ordered), hashes(&[first, second, third]));
}

#[tokio::test]
async fn test_ordering_uses_effective_tip_at_base_fee() {
    let (pool, _state) = create_pool();
    // tip 5, cap 12: effective tip 2 at base fee 10
    let capped = fee_market(1, 0, 5, 12);
    // tip 3, cap 100: effective tip 3 at base fee 10
    let uncapped = fee_market(2, 0, 3, 100);
    // legacy 14 gwei: effective tip 4 at base fee 10
    let old_style = legacy(3, 0, 14);
    for tx in [&capped, &uncapped, &old_style] {
        pool.add(tx.clone()).await.unwrap();
    }

    let ordered = pool.txs_by_price_and_nonce(OrderingOptions {
        base_fee: Some(10 * GWEI),
        allowed_blobs: None,
    });
    assert_eq!(
        hashes(&ordered),
        hashes(&[old_style.clone(), uncapped.clone(), capped.clone()])
    );

    // Without a base fee the raw tips decide
    let ordered = pool.txs_by_price_and_nonce(OrderingOptions::default());
    assert_eq!(hashes(&ordered), hashes(&[old_style, capped, uncapped]));
}

#[tokio::test]
async fn test_sender_queue_cut_below_base_fee() {
    let (pool, _state) = create_pool();
    let a0 = fee_market(1, 0, 1, 20);
    let a1 = fee_market(1, 1, 1, 5);
    let a2 = fee_market(1, 2, 1, 20);
    let b0 = fee_market(2, 0, 1, 4);
    for tx in [&a0, &a1, &a2, &b0] {
        pool.add(tx.clone()).await.unwrap();
    }

    let ordered = pool.txs_by_price_and_nonce(OrderingOptions {
        base_fee: Some(10 * GWEI),
        allowed_blobs: None,
    });
    assert_eq!(hashes(&ordered), hashes(&[a0]));
    // Nothing is removed from the pool
    assert_eq!(pool.len(), 4);
}

#[tokio::test]
async fn test_blob_budget() {
    let (pool, _state) = create_pool();
    let cheap = blob(1, 0, 1, 1);
    let pricey = blob(2, 0, 5, 1);
    pool.add(cheap.clone()).await.unwrap();
    pool.add(pricey.clone()).await.unwrap();

    let options = OrderingOptions {
        base_fee: None,
        allowed_blobs: Some(1),
    };
    let ordered = pool.txs_by_price_and_nonce(options);
    assert_eq!(hashes(&ordered), hashes(&[pricey.clone()]));

    // The budget is per invocation
    let ordered = pool.txs_by_price_and_nonce(options);
    assert_eq!(hashes(&ordered), hashes(&[pricey.clone()]));

    // Without a budget both are emitted
    let ordered = pool.txs_by_price_and_nonce(OrderingOptions::default());
    assert_eq!(hashes(&ordered), hashes(&[pricey, cheap]));
}

#[tokio::test]
async fn test_blob_over_budget_skips_rest_of_sender() {
    let (pool, _state) = create_pool();
    let big = blob(1, 0, 10, 2);
    let after_big = fee_market(1, 1, 10, 100);
    let small = blob(2, 0, 1, 1);
    let plain = fee_market(3, 0, 2, 100);
    for tx in [&big, &after_big, &small, &plain] {
        pool.add(tx.clone()).await.unwrap();
    }

    let ordered = pool.txs_by_price_and_nonce(OrderingOptions {
        base_fee: None,
        allowed_blobs: Some(1),
    });
    // Only non-skipped blobs count against the budget
    assert_eq!(hashes(&ordered), hashes(&[plain, small]));
}

#[tokio::test]
async fn test_remove_included() {
    let (pool, _state) = create_pool();
    let mut events = pool.subscribe();
    let included = fee_market(1, 0, 1, 10);
    let kept = fee_market(2, 0, 1, 10);
    let foreign = fee_market(3, 0, 1, 10);
    pool.add(included.clone()).await.unwrap();
    pool.add(kept.clone()).await.unwrap();

    let block = Block::new(
        BlockHeader {
            number: 1,
            ..Default::default()
        },
        vec![included.clone(), foreign],
    );
    assert_eq!(pool.remove_included(&block), 1);
    assert_eq!(pool.len(), 1);
    assert!(pool.contains(&kept.hash()));

    assert_eq!(events.recv().await.unwrap(), PoolEvent::Added(included.hash()));
    assert_eq!(events.recv().await.unwrap(), PoolEvent::Added(kept.hash()));
    assert_eq!(events.recv().await.unwrap(), PoolEvent::Removed(included.hash()));
}

#[tokio::test]
async fn test_remove() {
    let (pool, _state) = create_pool();
    let tx = fee_market(1, 0, 1, 10);
    let hash = pool.add(tx.clone()).await.unwrap();

    assert_eq!(pool.remove(&hash), Some(tx));
    assert_eq!(pool.remove(&hash), None);
    assert!(pool.transactions_by_sender(&address_of(1)).is_empty());
}

#[tokio::test]
async fn test_status_and_pending_nonce() {
    let (pool, state) = create_pool();
    state.set_nonce(address_of(1), 2);
    for nonce in [2, 3, 5] {
        pool.add(fee_market(1, nonce, 1, 10)).await.unwrap();
    }
    pool.add(fee_market(2, 0, 1, 10)).await.unwrap();

    let status = pool.status().await.unwrap();
    assert_eq!(status.pending, 3);
    assert_eq!(status.queued, 1);
    assert_eq!(status.senders, 2);
    assert!(status.total_bytes > 0);

    assert_eq!(pool.pending_nonce(&address_of(1)).await.unwrap(), 4);
    assert_eq!(pool.pending_nonce(&address_of(3)).await.unwrap(), 0);
}

#[tokio::test]
async fn test_clear() {
    let (pool, _state) = create_pool();
    pool.add(fee_market(1, 0, 1, 10)).await.unwrap();
    pool.add(fee_market(2, 0, 1, 10)).await.unwrap();

    pool.clear();
    assert!(pool.is_empty());
    assert_eq!(pool.status().await.unwrap(), PoolStatus::default());
    assert!(pool
        .txs_by_price_and_nonce(OrderingOptions::default())
        .is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_evicts_old_transactions() {
    let (pool, _state) = create_pool();
    let mut events = pool.subscribe();
    let old = pool.add(fee_market(1, 0, 1, 10)).await.unwrap();
    events.recv().await.unwrap();

    tokio::time::advance(Duration::from_secs(600)).await;
    let fresh = pool.add(fee_market(2, 0, 1, 10)).await.unwrap();
    events.recv().await.unwrap();

    assert_eq!(pool.cleanup(Duration::from_secs(600)), 0);
    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(pool.cleanup(Duration::from_secs(600)), 1);

    assert!(!pool.contains(&old));
    assert!(pool.contains(&fresh));
    assert_eq!(events.recv().await.unwrap(), PoolEvent::Removed(old));
    assert_eq!(pool.status().await.unwrap().senders, 1);
}

#[tokio::test(start_paused = true)]
async fn test_evict_expired_uses_configured_age() {
    let (pool, _state) = create_pool_with(PoolConfig {
        max_tx_age: Some(Duration::from_secs(60)),
        ..Default::default()
    });
    pool.add(fee_market(1, 0, 1, 10)).await.unwrap();
    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(pool.evict_expired(), 1);
    assert!(pool.is_empty());

    let (keeping, _state) = create_pool_with(PoolConfig {
        max_tx_age: None,
        ..Default::default()
    });
    keeping.add(fee_market(1, 0, 1, 10)).await.unwrap();
    tokio::time::advance(Duration::from_secs(86_400)).await;
    assert_eq!(keeping.evict_expired(), 0);
    assert_eq!(keeping.len(), 1);
}

#[tokio::test]
async fn test_deep_copy_is_independent() {
    let (pool, _state) = create_pool();
    let tx = fee_market(1, 0, 1, 10);
    pool.add(tx.clone()).await.unwrap();

    let copy = pool.deep_copy();
    copy.add(fee_market(2, 0, 1, 10)).await.unwrap();
    pool.remove(&tx.hash());

    assert_eq!(pool.len(), 0);
    assert_eq!(copy.len(), 2);
    assert!(copy.contains(&tx.hash()));
}

#[tokio::test]
async fn test_gas_limit_checked_against_head() {
    let (pool, state) = create_pool();
    state.set_head(HeadInfo {
        base_fee: Some(GWEI),
        gas_limit: 20_000,
    });

    let err = pool.add(fee_market(1, 0, 1, 10)).await.unwrap_err();
    assert_eq!(err.kind(), "gas_limit_too_high");
    assert_eq!(fee_market(1, 0, 1, 10).gas_limit(), 21_000);
}
