//! Tests for block types

use ember_types::{
    Block, BlockHeader, ImpersonatedTx, Transaction, TxFeeMarket, Withdrawal, Address,
    EMPTY_ROOT_HASH, B256,
};

#[test]
fn test_block_header_hash() {
    let header = BlockHeader::default();
    let hash = header.hash();
    assert_ne!(hash, B256::ZERO);
    assert_eq!(hash, header.hash());
}

#[test]
fn test_block_hash_changes_with_number() {
    let a = BlockHeader::default();
    let b = BlockHeader {
        number: 1,
        ..Default::default()
    };
    assert_ne!(a.hash(), b.hash());
}

#[test]
fn test_transactions_root_depends_on_order() {
    let tx = |nonce| -> Transaction {
        ImpersonatedTx::new(
            TxFeeMarket {
                nonce,
                ..Default::default()
            },
            Address::repeat_byte(1),
        )
        .into()
    };
    let forward = Block::compute_transactions_root(&[tx(0), tx(1)]);
    let reverse = Block::compute_transactions_root(&[tx(1), tx(0)]);
    assert_ne!(forward, EMPTY_ROOT_HASH);
    assert_ne!(forward, reverse);
}

#[test]
fn test_block_transaction_index() {
    let tx: Transaction = ImpersonatedTx::new(TxFeeMarket::default(), Address::ZERO).into();
    let block = Block::new(BlockHeader::default(), vec![tx.clone()]);
    use ember_types::TxEnvelope;
    assert_eq!(block.transaction_index(&tx.hash()), Some(0));
    assert_eq!(block.transaction_index(&B256::ZERO), None);
}

#[test]
fn test_withdrawals_root() {
    let root = Block::compute_withdrawals_root(&[Withdrawal {
        index: 0,
        validator_index: 1,
        address: Address::repeat_byte(9),
        amount: 32,
    }]);
    assert_ne!(root, EMPTY_ROOT_HASH);
    assert_eq!(Block::compute_withdrawals_root(&[]), EMPTY_ROOT_HASH);
}
