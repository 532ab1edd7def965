//! Tests for the receipt index.

use alloy_primitives::{Address, BloomInput, Bytes, B256, U256};
use ember_evm::{EvmHalt, ExecResult};
use ember_receipts::{
    BlockReceipts, LogFilter, ReceiptConfig, ReceiptError, ReceiptIndex, ReceiptsDump,
    TopicFilter,
};
use ember_types::{
    Block, BlockHeader, ChainRules, Hardfork, ImpersonatedTx, Log, Receipt, ReceiptOutcome,
    SealedBlock, Transaction, TxEnvelope, TxFeeMarket,
};

fn create_index(config: ReceiptConfig) -> ReceiptIndex {
    ReceiptIndex::new(ChainRules::default(), config)
}

fn tx(nonce: u64) -> Transaction {
    ImpersonatedTx::new(
        TxFeeMarket {
            chain_id: 900,
            nonce,
            max_priority_fee_per_gas: 1,
            max_fee_per_gas: 10,
            gas_limit: 50_000,
            to: Some(Address::repeat_byte(0xee)),
            value: U256::ZERO,
            ..Default::default()
        },
        Address::repeat_byte(0xaa),
    )
    .into()
}

fn log(address: u8, topics: &[u8]) -> Log {
    Log::new(
        Address::repeat_byte(address),
        topics.iter().map(|t| B256::repeat_byte(*t)).collect(),
        Bytes::from_static(b"payload"),
    )
}

fn success(logs: Vec<Log>) -> ExecResult {
    ExecResult {
        gas_used: 30_000,
        logs,
        ..Default::default()
    }
}

fn header(number: u64) -> BlockHeader {
    BlockHeader {
        number,
        base_fee_per_gas: Some(2),
        ..Default::default()
    }
}

/// Seals block `number` with one transaction per result and records it
fn record(index: &ReceiptIndex, number: u64, results: Vec<ExecResult>) -> SealedBlock {
    let header = header(number);
    let txs: Vec<Transaction> = (0..results.len() as u64)
        .map(|i| tx(number * 100 + i))
        .collect();

    let mut cumulative = 0;
    let receipts: Vec<Receipt> = txs
        .iter()
        .zip(&results)
        .map(|(tx, result)| {
            cumulative += result.gas_used;
            index.record(&header, tx, result, cumulative, || B256::ZERO)
        })
        .collect();

    let block = Block::new(header, txs).seal();
    index.record_block(&block, receipts).unwrap();
    block
}

#[test]
fn test_post_byzantium_receipt() {
    let index = create_index(ReceiptConfig::default());
    let emitted = log(1, &[0xa]);
    let tx = tx(0);

    let receipt = index.record(&header(1), &tx, &success(vec![emitted.clone()]), 30_000, || {
        panic!("state root is not read after Byzantium")
    });
    assert_eq!(receipt.outcome, ReceiptOutcome::Status(true));
    assert_eq!(receipt.cumulative_gas_used, 30_000);
    assert_eq!(receipt.gas_used, 30_000);
    // base fee 2 + tip 1
    assert_eq!(receipt.effective_gas_price, 3);
    assert!(receipt
        .logs_bloom
        .contains_input(BloomInput::Raw(emitted.address.as_slice())));
    assert!(receipt
        .logs_bloom
        .contains_input(BloomInput::Raw(emitted.topics[0].as_slice())));

    let failed = ExecResult {
        error: Some(EvmHalt::Revert),
        ..success(vec![])
    };
    let receipt = index.record(&header(1), &tx, &failed, 30_000, || B256::ZERO);
    assert_eq!(receipt.outcome, ReceiptOutcome::Status(false));
}

#[test]
fn test_pre_byzantium_receipt_carries_state_root() {
    let rules = ChainRules {
        hardfork: Hardfork::Cancun,
        byzantium_block: 10,
        ..Default::default()
    };
    let index = ReceiptIndex::new(rules, ReceiptConfig::default());
    let root = B256::repeat_byte(0x77);

    let receipt = index.record(&header(9), &tx(0), &success(vec![]), 21_000, || root);
    assert_eq!(receipt.outcome, ReceiptOutcome::StateRoot(root));

    let receipt = index.record(&header(10), &tx(0), &success(vec![]), 21_000, || root);
    assert_eq!(receipt.outcome, ReceiptOutcome::Status(true));

    let rules = ChainRules {
        hardfork: Hardfork::Homestead,
        ..Default::default()
    };
    let index = ReceiptIndex::new(rules, ReceiptConfig::default());
    let receipt = index.record(&header(1), &tx(0), &success(vec![]), 21_000, || root);
    assert_eq!(receipt.outcome, ReceiptOutcome::StateRoot(root));
}

#[test]
fn test_get_receipt_with_position() {
    let index = create_index(ReceiptConfig::default());
    let block = record(
        &index,
        1,
        vec![
            success(vec![log(1, &[]), log(1, &[])]),
            success(vec![log(2, &[])]),
        ],
    );
    let second = &block.block.transactions[1];

    let indexed = index.get_receipt(&second.hash()).unwrap().unwrap();
    assert_eq!(indexed.block_hash, block.hash);
    assert_eq!(indexed.block_number, 1);
    assert_eq!(indexed.tx_index, 1);
    assert_eq!(indexed.first_log_index, 2);
    assert_eq!(indexed.receipt.cumulative_gas_used, 60_000);

    assert_eq!(index.get_receipt(&B256::repeat_byte(0x99)).unwrap(), None);
}

#[test]
fn test_receipt_count_mismatch() {
    let index = create_index(ReceiptConfig::default());
    let block = Block::new(header(1), vec![tx(0)]).seal();

    let err = index.record_block(&block, vec![]).unwrap_err();
    assert_eq!(err.kind(), "receipt_count_mismatch");
}

#[test]
fn test_get_logs_ordering_and_positions() {
    let index = create_index(ReceiptConfig::default());
    record(&index, 2, vec![success(vec![log(1, &[0xa])])]);
    record(
        &index,
        1,
        vec![
            success(vec![log(1, &[0xa]), log(2, &[0xb])]),
            success(vec![log(1, &[0xc])]),
        ],
    );

    let logs = index.get_logs(&LogFilter::new(1, 2)).unwrap();
    let positions: Vec<(u64, usize, usize)> = logs
        .iter()
        .map(|l| (l.block_number, l.tx_index, l.log_index))
        .collect();
    assert_eq!(positions, vec![(1, 0, 0), (1, 0, 1), (1, 1, 2), (2, 0, 0)]);
}

#[test]
fn test_get_logs_filters() {
    let index = create_index(ReceiptConfig::default());
    record(
        &index,
        1,
        vec![success(vec![
            log(1, &[0xa, 0xb]),
            log(2, &[0xa, 0xc]),
            log(3, &[0xd]),
        ])],
    );

    // Address set is OR
    let filter =
        LogFilter::new(1, 1).address(vec![Address::repeat_byte(1), Address::repeat_byte(3)]);
    let logs = index.get_logs(&filter).unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].log.address, Address::repeat_byte(1));
    assert_eq!(logs[1].log.address, Address::repeat_byte(3));
    // Positions are block-level even when filtered
    assert_eq!(logs[1].log_index, 2);

    // Positional topics with an OR-set in second position
    let filter = LogFilter::new(1, 1).topics(vec![
        Some(B256::repeat_byte(0xa).into()),
        Some(TopicFilter::Multiple(vec![
            B256::repeat_byte(0xb),
            B256::repeat_byte(0xc),
        ])),
    ]);
    assert_eq!(index.get_logs(&filter).unwrap().len(), 2);

    // Wildcard first position
    let filter = LogFilter::new(1, 1).topics(vec![None, Some(B256::repeat_byte(0xc).into())]);
    let logs = index.get_logs(&filter).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].log.address, Address::repeat_byte(2));
}

#[test]
fn test_get_logs_range_checks() {
    let index = create_index(ReceiptConfig {
        max_block_range: 10,
        ..Default::default()
    });

    let err = index.get_logs(&LogFilter::new(5, 4)).unwrap_err();
    assert_eq!(err, ReceiptError::InvalidRange { from: 5, to: 4 });

    let err = index.get_logs(&LogFilter::new(1, 11)).unwrap_err();
    assert_eq!(
        err,
        ReceiptError::RangeTooLarge {
            requested: 11,
            max: 10
        }
    );

    assert!(index.get_logs(&LogFilter::new(1, 10)).unwrap().is_empty());
}

#[test]
fn test_get_logs_full_u64_range_is_too_large() {
    let index = create_index(ReceiptConfig::default());
    record(&index, 1, vec![success(vec![log(1, &[])])]);

    let err = index.get_logs(&LogFilter::new(0, u64::MAX)).unwrap_err();
    assert_eq!(
        err,
        ReceiptError::RangeTooLarge {
            requested: u64::MAX,
            max: 2_500
        }
    );

    let err = index.get_logs(&LogFilter::new(1, u64::MAX)).unwrap_err();
    assert_eq!(err.kind(), "range_too_large");
}

#[test]
fn test_get_logs_limit_stops_after_block() {
    let index = create_index(ReceiptConfig {
        max_logs: 3,
        ..Default::default()
    });
    for number in 1..=3 {
        record(&index, number, vec![success(vec![log(1, &[]), log(1, &[])])]);
    }

    // The limit is crossed in block 2, whose logs are returned in full
    let logs = index.get_logs(&LogFilter::new(1, 3)).unwrap();
    assert_eq!(logs.len(), 4);
    assert_eq!(logs.last().unwrap().block_number, 2);
}

#[test]
fn test_pruned_receipt_is_distinguishable() {
    let index = create_index(ReceiptConfig {
        retain_blocks: Some(2),
        ..Default::default()
    });
    let first = record(&index, 1, vec![success(vec![log(1, &[])])]);
    record(&index, 2, vec![success(vec![])]);
    let third = record(&index, 3, vec![success(vec![])]);

    assert_eq!(index.len(), 2);
    let pruned_hash = first.block.transactions[0].hash();
    let err = index.get_receipt(&pruned_hash).unwrap_err();
    assert_eq!(
        err,
        ReceiptError::Pruned {
            tx_hash: pruned_hash,
            block_number: 1
        }
    );
    assert_eq!(err.kind(), "receipt_pruned");

    assert!(index
        .get_receipt(&third.block.transactions[0].hash())
        .unwrap()
        .is_some());
    assert_eq!(index.get_receipt(&B256::repeat_byte(0x42)).unwrap(), None);
    assert!(index.get_logs(&LogFilter::new(1, 3)).unwrap().is_empty());
}

#[test]
fn test_dump_load_roundtrip() {
    let index = create_index(ReceiptConfig {
        retain_blocks: Some(1),
        ..Default::default()
    });
    let first = record(&index, 1, vec![success(vec![log(1, &[0xa])])]);
    let second = record(&index, 2, vec![success(vec![log(2, &[0xb])])]);

    let json = serde_json::to_string(&index.dump()).unwrap();
    let dump: ReceiptsDump = serde_json::from_str(&json).unwrap();
    assert_eq!(dump, index.dump());

    let restored = create_index(ReceiptConfig::default());
    restored.load(dump).unwrap();

    assert_eq!(
        restored.get_receipt(&second.block.transactions[0].hash()),
        index.get_receipt(&second.block.transactions[0].hash())
    );
    assert_eq!(
        restored
            .get_receipt(&first.block.transactions[0].hash())
            .unwrap_err()
            .kind(),
        "receipt_pruned"
    );
    assert_eq!(
        restored.get_logs(&LogFilter::new(1, 2)).unwrap(),
        index.get_logs(&LogFilter::new(1, 2)).unwrap()
    );
}

#[test]
fn test_load_rejects_mismatched_block() {
    let index = create_index(ReceiptConfig::default());
    let block = record(&index, 1, vec![success(vec![log(1, &[])])]);

    let mut dump = index.dump();
    dump.blocks.push(BlockReceipts {
        block_hash: B256::repeat_byte(2),
        block_number: 2,
        tx_hashes: Vec::new(),
        receipts: dump.blocks[0].receipts.clone(),
    });

    let err = index.load(dump).unwrap_err();
    assert_eq!(
        err,
        ReceiptError::ReceiptCountMismatch {
            block: 2,
            transactions: 0,
            receipts: 1
        }
    );

    // The index is left as it was
    assert_eq!(index.len(), 1);
    let logs = index.get_logs(&LogFilter::new(1, 2)).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].tx_hash, block.block.transactions[0].hash());
}

#[test]
fn test_deep_copy_and_delete() {
    let index = create_index(ReceiptConfig::default());
    let block = record(&index, 1, vec![success(vec![])]);
    let hash = block.block.transactions[0].hash();

    let copy = index.deep_copy();
    assert!(index.delete_block(1).is_some());

    assert_eq!(index.get_receipt(&hash).unwrap(), None);
    assert!(index.is_empty());
    assert!(copy.get_receipt(&hash).unwrap().is_some());
    assert_eq!(copy.get_block_receipts(1).unwrap().block_hash, block.hash);
}
