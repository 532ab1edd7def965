//! Integration tests for the interpreter

use async_trait::async_trait;
use ember_chain::{BlockTag, Chain, GenesisParams};
use ember_evm::{
    BlockContext, CallFlags, CallParams, EvmHalt, Interpreter, InterpreterError,
};
use ember_state::{ForkError, ForkTransport, RemoteAccount, RemoteBlock, StateStore};
use ember_types::fees::BaseFeeParams;
use ember_types::transaction::public_key_to_address;
use ember_types::{
    Account, Address, BlockHeader, Bytes, ChainRules, SignableTx, Transaction, TxFeeMarket, B256,
    U256,
};
use k256::ecdsa::SigningKey;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const ETH: u128 = 1_000_000_000_000_000_000;

fn alice() -> Address {
    Address::repeat_byte(0xaa)
}

fn bob() -> Address {
    Address::repeat_byte(0xbb)
}

fn create_interpreter() -> Interpreter {
    let store = StateStore::new();
    store.put_account(alice(), Account::with_balance(U256::from(10 * ETH)));
    let chain = Chain::with_genesis(
        ChainRules::default(),
        BaseFeeParams::default(),
        &store,
        GenesisParams::default(),
    );
    Interpreter::new(Arc::new(store), Arc::new(chain))
}

fn next_context(chain: &Chain) -> BlockContext {
    let head = chain.canonical_head().unwrap();
    BlockContext {
        number: head.number() + 1,
        parent_hash: head.hash,
        timestamp: head.header().timestamp + 12,
        gas_limit: head.header().gas_limit,
        coinbase: Address::repeat_byte(0xcb),
        difficulty: U256::ZERO,
        prev_randao: B256::ZERO,
        base_fee: chain.next_base_fee().unwrap(),
        excess_blob_gas: chain.next_excess_blob_gas().unwrap(),
    }
}

fn transfer(value: u128) -> CallParams {
    CallParams {
        caller: alice(),
        to: Some(bob()),
        value: U256::from(value),
        gas_limit: 21_000,
        ..Default::default()
    }
}

fn call_to(to: Address) -> CallParams {
    CallParams {
        caller: alice(),
        to: Some(to),
        gas_limit: 200_000,
        ..Default::default()
    }
}

async fn deploy(interpreter: &Interpreter, address: Address, code: Vec<u8>) {
    interpreter
        .store()
        .set_account_code(address, Bytes::from(code))
        .await
        .unwrap();
}

async fn balance(interpreter: &Interpreter, address: Address) -> U256 {
    interpreter
        .store()
        .get_account(address)
        .await
        .unwrap()
        .map(|account| account.balance)
        .unwrap_or_default()
}

// PUSH1 v PUSH1 k SSTORE
fn sstore(key: u8, value: u8) -> Vec<u8> {
    vec![0x60, value, 0x60, key, 0x55]
}

#[tokio::test]
async fn test_simple_transfer() {
    let interpreter = create_interpreter();
    let block = next_context(interpreter.chain());

    let result = interpreter
        .run_call(&transfer(ETH), &block, CallFlags::default())
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(result.gas_used, 21_000);
    assert_eq!(balance(&interpreter, bob()).await, U256::from(ETH));
    assert_eq!(balance(&interpreter, alice()).await, U256::from(9 * ETH));
    assert_eq!(interpreter.store().checkpoint_depth(), 0);
}

#[tokio::test]
async fn test_call_does_not_apply_state() {
    let interpreter = create_interpreter();
    let block = next_context(interpreter.chain());
    let root = interpreter.store().state_root();

    let result = interpreter
        .call(&transfer(ETH), &block, CallFlags::default())
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(balance(&interpreter, bob()).await, U256::ZERO);
    assert_eq!(interpreter.store().state_root(), root);
}

#[tokio::test]
async fn test_storage_write_persists() {
    let interpreter = create_interpreter();
    let contract = Address::repeat_byte(0xc0);
    let mut code = sstore(0, 42);
    code.push(0x00);
    deploy(&interpreter, contract, code).await;

    let block = next_context(interpreter.chain());
    let result = interpreter
        .run_call(&call_to(contract), &block, CallFlags::default())
        .await
        .unwrap();

    assert!(result.is_success());
    let slot = interpreter
        .store()
        .get_storage(contract, B256::ZERO)
        .await
        .unwrap();
    assert_eq!(slot, B256::with_last_byte(42));
}

#[tokio::test]
async fn test_revert_discards_writes_and_refunds_gas() {
    let interpreter = create_interpreter();
    let contract = Address::repeat_byte(0xc1);
    // SSTORE(0, 1) then REVERT(0, 0)
    let mut code = sstore(0, 1);
    code.extend_from_slice(&[0x60, 0x00, 0x60, 0x00, 0xfd]);
    deploy(&interpreter, contract, code).await;

    let block = next_context(interpreter.chain());
    let params = CallParams {
        value: U256::from(5u64),
        ..call_to(contract)
    };
    let result = interpreter
        .run_call(&params, &block, CallFlags::default())
        .await
        .unwrap();

    assert_eq!(result.error, Some(EvmHalt::Revert));
    assert!(result.gas_used < params.gas_limit);
    assert!(result.logs.is_empty());
    assert_eq!(balance(&interpreter, contract).await, U256::ZERO);
    let slot = interpreter
        .store()
        .get_storage(contract, B256::ZERO)
        .await
        .unwrap();
    assert_eq!(slot, B256::ZERO);
}

#[tokio::test]
async fn test_invalid_opcode_consumes_all_gas() {
    let interpreter = create_interpreter();
    let contract = Address::repeat_byte(0xc2);
    deploy(&interpreter, contract, vec![0xfe]).await;

    let block = next_context(interpreter.chain());
    let params = call_to(contract);
    let result = interpreter
        .run_call(&params, &block, CallFlags::default())
        .await
        .unwrap();

    assert_eq!(result.error, Some(EvmHalt::InvalidOpcode));
    assert_eq!(result.gas_used, params.gas_limit);
}

#[tokio::test]
async fn test_infinite_loop_runs_out_of_gas() {
    let interpreter = create_interpreter();
    let contract = Address::repeat_byte(0xc3);
    // JUMPDEST PUSH1 0 JUMP
    deploy(&interpreter, contract, vec![0x5b, 0x60, 0x00, 0x56]).await;

    let block = next_context(interpreter.chain());
    let result = interpreter
        .run_call(&call_to(contract), &block, CallFlags::default())
        .await
        .unwrap();

    assert_eq!(result.error, Some(EvmHalt::OutOfGas));
    assert_eq!(result.error.as_ref().map(EvmHalt::kind), Some("out_of_gas"));
}

#[tokio::test]
async fn test_reverted_subcall_leaves_caller_frame_intact() {
    let interpreter = create_interpreter();
    let inner = Address::repeat_byte(0xc4);
    let outer = Address::repeat_byte(0xc5);

    let mut inner_code = sstore(0, 1);
    inner_code.extend_from_slice(&[0x60, 0x00, 0x60, 0x00, 0xfd]);
    deploy(&interpreter, inner, inner_code).await;

    // CALL(gas, inner, 0, 0, 0, 0, 0), SSTORE(1, success), SSTORE(0, 1)
    let mut outer_code = vec![0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x73];
    outer_code.extend_from_slice(inner.as_slice());
    outer_code.extend_from_slice(&[0x5a, 0xf1, 0x60, 0x01, 0x55]);
    outer_code.extend(sstore(0, 1));
    outer_code.push(0x00);
    deploy(&interpreter, outer, outer_code).await;

    let block = next_context(interpreter.chain());
    let result = interpreter
        .run_call(&call_to(outer), &block, CallFlags::default())
        .await
        .unwrap();
    assert!(result.is_success());

    let store = interpreter.store();
    assert_eq!(
        store.get_storage(outer, B256::ZERO).await.unwrap(),
        B256::with_last_byte(1)
    );
    assert_eq!(
        store.get_storage(outer, B256::with_last_byte(1)).await.unwrap(),
        B256::ZERO
    );
    assert_eq!(store.get_storage(inner, B256::ZERO).await.unwrap(), B256::ZERO);
}

#[tokio::test]
async fn test_create_deploys_code() {
    let interpreter = create_interpreter();
    // MSTORE8(0, 0) RETURN(0, 1): deploys a single STOP
    let init_code = vec![0x60, 0x00, 0x60, 0x00, 0x53, 0x60, 0x01, 0x60, 0x00, 0xf3];
    let params = CallParams {
        caller: alice(),
        to: None,
        data: Bytes::from(init_code),
        gas_limit: 100_000,
        ..Default::default()
    };

    let block = next_context(interpreter.chain());
    let result = interpreter
        .run_call(&params, &block, CallFlags::default())
        .await
        .unwrap();

    let expected = alice().create(0);
    assert!(result.is_success());
    assert_eq!(result.created_address, Some(expected));
    let code = interpreter.store().get_account_code(expected).await.unwrap();
    assert_eq!(code.as_ref(), &[0x00]);
    let created = interpreter.store().get_account(expected).await.unwrap().unwrap();
    assert_eq!(created.nonce, 1);
}

#[tokio::test]
async fn test_selfdestruct_in_constructor() {
    let interpreter = create_interpreter();
    // CALLER SELFDESTRUCT
    let params = CallParams {
        caller: alice(),
        to: None,
        data: Bytes::from_static(&[0x33, 0xff]),
        value: U256::from(7u64),
        gas_limit: 100_000,
        ..Default::default()
    };

    let block = next_context(interpreter.chain());
    let result = interpreter
        .run_call(&params, &block, CallFlags::default())
        .await
        .unwrap();

    let created = alice().create(0);
    assert!(result.is_success());
    assert!(result.self_destructed.contains(&created));
    assert!(interpreter.store().get_account(created).await.unwrap().is_none());
}

#[tokio::test]
async fn test_logs_are_returned_without_positions() {
    let interpreter = create_interpreter();
    let contract = Address::repeat_byte(0xc6);
    // LOG1(0, 0, 7)
    deploy(
        &interpreter,
        contract,
        vec![0x60, 0x07, 0x60, 0x00, 0x60, 0x00, 0xa1, 0x00],
    )
    .await;

    let block = next_context(interpreter.chain());
    let result = interpreter
        .run_call(&call_to(contract), &block, CallFlags::default())
        .await
        .unwrap();

    assert_eq!(result.logs.len(), 1);
    assert_eq!(result.logs[0].address, contract);
    assert_eq!(result.logs[0].topics, vec![B256::with_last_byte(7)]);
    assert!(result.logs[0].data.is_empty());
}

#[tokio::test]
async fn test_blockhash_reads_chain() {
    let interpreter = create_interpreter();
    let contract = Address::repeat_byte(0xc7);
    // SSTORE(0, BLOCKHASH(0))
    deploy(
        &interpreter,
        contract,
        vec![0x60, 0x00, 0x40, 0x60, 0x00, 0x55, 0x00],
    )
    .await;

    let block = next_context(interpreter.chain());
    interpreter
        .run_call(&call_to(contract), &block, CallFlags::default())
        .await
        .unwrap();

    let genesis = interpreter.chain().get_local_block(0u64).unwrap();
    let slot = interpreter
        .store()
        .get_storage(contract, B256::ZERO)
        .await
        .unwrap();
    assert_eq!(slot, genesis.hash);
}

#[tokio::test]
async fn test_skip_balance() {
    let interpreter = create_interpreter();
    let broke = Address::repeat_byte(0x01);
    let params = CallParams {
        caller: broke,
        ..transfer(ETH)
    };
    let block = next_context(interpreter.chain());

    let err = interpreter
        .run_call(&params, &block, CallFlags::default())
        .await
        .unwrap_err();
    assert!(matches!(err, InterpreterError::InvalidTransaction(_)));
    assert_eq!(err.kind(), "invalid_transaction");

    let flags = CallFlags {
        skip_balance: true,
        ..Default::default()
    };
    let result = interpreter.run_call(&params, &block, flags).await.unwrap();
    assert!(result.is_success());
    assert_eq!(balance(&interpreter, bob()).await, U256::from(ETH));
}

#[tokio::test]
async fn test_estimate_gas() {
    let interpreter = create_interpreter();
    let block = next_context(interpreter.chain());

    let estimate = interpreter
        .estimate_gas(
            &CallParams {
                gas_limit: 0,
                ..transfer(1)
            },
            &block,
        )
        .await
        .unwrap();
    assert_eq!(estimate, 21_000);

    let contract = Address::repeat_byte(0xc8);
    let mut code = sstore(0, 1);
    code.push(0x00);
    deploy(&interpreter, contract, code).await;

    let params = call_to(contract);
    let estimate = interpreter.estimate_gas(&params, &block).await.unwrap();
    assert!(estimate > 21_000);

    let exact = CallParams {
        gas_limit: estimate,
        ..params.clone()
    };
    let result = interpreter.call(&exact, &block, CallFlags::default()).await.unwrap();
    assert!(result.is_success());

    let short = CallParams {
        gas_limit: estimate - 1,
        ..params
    };
    let result = interpreter.call(&short, &block, CallFlags::default()).await.unwrap();
    assert!(!result.is_success());
}

#[tokio::test]
async fn test_estimate_gas_of_failing_call() {
    let interpreter = create_interpreter();
    let contract = Address::repeat_byte(0xc9);
    deploy(&interpreter, contract, vec![0xfe]).await;

    let block = next_context(interpreter.chain());
    let err = interpreter
        .estimate_gas(&call_to(contract), &block)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        InterpreterError::EstimationFailed {
            reason: EvmHalt::InvalidOpcode,
            ..
        }
    ));
}

#[tokio::test]
async fn test_run_signed_transaction() {
    let interpreter = create_interpreter();
    let key = SigningKey::from_slice(&[0x42; 32]).unwrap();
    let sender = public_key_to_address(key.verifying_key());
    interpreter
        .store()
        .put_account(sender, Account::with_balance(U256::from(ETH)));

    let block = next_context(interpreter.chain());
    let base_fee = block.base_fee.unwrap();
    let tx: Transaction = TxFeeMarket {
        chain_id: 900,
        nonce: 0,
        max_fee_per_gas: base_fee * 2,
        max_priority_fee_per_gas: 1_000,
        gas_limit: 21_000,
        to: Some(bob()),
        value: U256::from(100u64),
        ..Default::default()
    }
    .sign(&key)
    .unwrap()
    .into();

    let result = interpreter.run_tx(&tx, &block).await.unwrap();
    assert!(result.is_success());

    let account = interpreter.store().get_account(sender).await.unwrap().unwrap();
    assert_eq!(account.nonce, 1);
    let paid = U256::from(100u64) + U256::from(21_000u128 * (base_fee + 1_000));
    assert_eq!(account.balance, U256::from(ETH) - paid);
    assert_eq!(
        balance(&interpreter, block.coinbase).await,
        U256::from(21_000u128 * 1_000)
    );

    // Replaying the same nonce fails validation
    let err = interpreter.run_tx(&tx, &block).await.unwrap_err();
    assert_eq!(err.kind(), "invalid_transaction");
}

#[derive(Default)]
struct MockForkTransport {
    account_calls: AtomicUsize,
}

#[async_trait]
impl ForkTransport for MockForkTransport {
    async fn get_account(&self, address: Address, _block: u64) -> Result<RemoteAccount, ForkError> {
        self.account_calls.fetch_add(1, Ordering::SeqCst);
        if address == alice() {
            return Ok(RemoteAccount {
                balance: U256::from(5 * ETH),
                ..Default::default()
            });
        }
        Ok(RemoteAccount::default())
    }

    async fn get_storage(&self, _: Address, _: B256, _: u64) -> Result<B256, ForkError> {
        Ok(B256::ZERO)
    }

    async fn block_number(&self) -> Result<u64, ForkError> {
        Ok(10)
    }

    async fn get_block_by_number(&self, number: u64) -> Result<Option<RemoteBlock>, ForkError> {
        Ok((number <= 10).then(|| RemoteBlock {
            hash: B256::with_last_byte(number as u8),
            header: BlockHeader {
                number,
                gas_limit: 30_000_000,
                base_fee_per_gas: Some(7),
                excess_blob_gas: Some(0),
                blob_gas_used: Some(0),
                ..Default::default()
            },
            transactions: Vec::new(),
            uncles: Vec::new(),
        }))
    }

    async fn get_block_by_hash(&self, _hash: B256) -> Result<Option<RemoteBlock>, ForkError> {
        Ok(None)
    }

    async fn get_uncle(&self, _: B256, _: usize) -> Result<Option<BlockHeader>, ForkError> {
        Ok(None)
    }
}

#[tokio::test]
async fn test_forked_transfer_reads_through() {
    let transport = Arc::new(MockForkTransport::default());
    let (chain, store) = Chain::fork_from(
        ChainRules::default(),
        BaseFeeParams::default(),
        transport.clone(),
        &BlockTag::Latest,
        None,
    )
    .await
    .unwrap();
    let interpreter = Interpreter::new(Arc::new(store), Arc::new(chain));
    let block = next_context(interpreter.chain());

    let result = interpreter
        .run_call(&transfer(ETH), &block, CallFlags::default())
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(balance(&interpreter, alice()).await, U256::from(4 * ETH));
    assert_eq!(balance(&interpreter, bob()).await, U256::from(ETH));
    let calls = transport.account_calls.load(Ordering::SeqCst);
    assert!(calls >= 2);

    // Both accounts are now local; a second run does not go upstream
    interpreter
        .run_call(&transfer(ETH), &block, CallFlags::default())
        .await
        .unwrap();
    assert_eq!(transport.account_calls.load(Ordering::SeqCst), calls);
}
