//! Integration tests for the chainstate engine

use parking_lot::Mutex;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use std::sync::Arc;
use utxo_chainstate::mining::{create_coinbase_transaction, mine_block};
use utxo_chainstate::script::{anyone_can_spend, pay_to_pubkey, sign_input};
use utxo_chainstate::*;

type Engine = ChainState<MemoryUtxoStore, MemoryBlockStorage>;

fn engine() -> Engine {
    let mut config = EngineConfig::regtest();
    config.chain.coinbase_maturity = 1;
    ChainState::in_memory(config).unwrap()
}

/// Mine a block on `parent`. `salt` shifts the timestamp so that sibling
/// blocks with the same contents get different hashes.
fn mine_on(state: &Engine, parent: &Hash, txs: Vec<Transaction>, salt: u32) -> Block {
    let parent_header = state.header(parent).unwrap();
    let height = state.block_height(parent).unwrap() + 1;
    let coinbase = create_coinbase_transaction(height, 50 * COIN, anyone_can_spend());
    mine_block(
        *parent,
        parent_header.timestamp + 1 + salt,
        parent_header.bits,
        coinbase,
        txs,
        10_000,
    )
    .unwrap()
    .unwrap()
}

fn genesis_outpoint(state: &Engine) -> OutPoint {
    OutPoint::new(txid(&state.params().genesis.transactions[0]), 0)
}

fn spend(prevout: OutPoint, value: Amount, lock: ByteString) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TransactionInput {
            prevout,
            script_sig: vec![],
            sequence: SEQUENCE_FINAL,
        }],
        outputs: vec![TransactionOutput {
            value,
            script_pubkey: lock,
        }],
        lock_time: 0,
    }
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl ChainListener for Recorder {
    fn on_transaction_accepted(&self, txid: &Hash) {
        self.events.lock().push(format!("tx {}", hash_to_hex(txid)));
    }

    fn on_block_accepted(&self, hash: &Hash, is_new_tip: bool) {
        self.events
            .lock()
            .push(format!("block {} {}", hash_to_hex(hash), is_new_tip));
    }

    fn on_reorg(&self, disconnected: &[Hash], connected: &[Hash]) {
        self.events
            .lock()
            .push(format!("reorg -{} +{}", disconnected.len(), connected.len()));
    }
}

#[test]
fn test_reorg_returns_transactions_to_mempool() {
    let state = engine();
    let recorder = Arc::new(Recorder::default());
    state.subscribe(recorder.clone());

    let genesis = state.best_tip();
    let b1 = mine_on(&state, &genesis, vec![], 0);
    let b1_hash = block_hash(&b1.header);
    state.submit_block(&serialize(&b1)).unwrap();

    // B2 confirms a spend of the genesis output
    let tx = spend(genesis_outpoint(&state), 49 * COIN, anyone_can_spend());
    let tx_id = state.submit_transaction(&serialize(&tx)).unwrap();
    assert!(state.mempool_contains(&tx_id));

    let b2 = mine_on(&state, &b1_hash, vec![tx.clone()], 0);
    let b2_hash = block_hash(&b2.header);
    assert_eq!(
        state.submit_block(&serialize(&b2)),
        Ok(AcceptanceOutcome::BestChain {
            height: 2,
            disconnected: 0
        })
    );
    assert!(!state.mempool_contains(&tx_id));
    assert_eq!(state.confirmations_of(&tx_id), Some(1));
    assert!(state.utxo_for(&genesis_outpoint(&state)).is_none());

    // B2' has equal work: first seen keeps the tip
    let b2_alt = mine_on(&state, &b1_hash, vec![], 7);
    let b2_alt_hash = block_hash(&b2_alt.header);
    assert_eq!(
        state.submit_block(&serialize(&b2_alt)),
        Ok(AcceptanceOutcome::SideChain)
    );
    assert_eq!(state.best_tip(), b2_hash);

    // B3' gives the competing branch more work
    let b3_alt = mine_on(&state, &b2_alt_hash, vec![], 0);
    let b3_alt_hash = block_hash(&b3_alt.header);
    assert_eq!(
        state.submit_block(&serialize(&b3_alt)),
        Ok(AcceptanceOutcome::BestChain {
            height: 3,
            disconnected: 1
        })
    );
    assert_eq!(state.best_tip(), b3_alt_hash);
    assert_eq!(state.block_status(&b2_hash), Some(BlockStatus::SideChain));
    assert_eq!(state.block_status(&b2_alt_hash), Some(BlockStatus::BestChain));

    // B2's effects are gone and its transaction is pending again
    assert!(state.utxo_for(&genesis_outpoint(&state)).is_some());
    assert!(state.utxo_for(&OutPoint::new(tx_id, 0)).is_none());
    assert_eq!(state.confirmations_of(&tx_id), None);
    assert!(state.mempool_contains(&tx_id));
    assert_eq!(state.mempool_transactions(), vec![tx]);

    let events = recorder.events.lock().clone();
    assert!(events.contains(&"reorg -1 +2".to_string()));
    assert!(events.contains(&format!("block {} true", hash_to_hex(&b3_alt_hash))));
    assert!(events.contains(&format!("block {} false", hash_to_hex(&b2_alt_hash))));
}

#[test]
fn test_two_block_reorg_matches_replayed_chain() {
    let state = engine();
    let recorder = Arc::new(Recorder::default());
    state.subscribe(recorder.clone());
    let genesis = state.best_tip();

    // Active branch: B1 spends the genesis output, B2 spends B1's spend
    let tx1 = spend(genesis_outpoint(&state), 49 * COIN, anyone_can_spend());
    let tx2 = spend(OutPoint::new(txid(&tx1), 0), 48 * COIN, anyone_can_spend());
    let b1 = mine_on(&state, &genesis, vec![tx1.clone()], 0);
    let b1_hash = block_hash(&b1.header);
    state.submit_block(&serialize(&b1)).unwrap();
    let b2 = mine_on(&state, &b1_hash, vec![tx2.clone()], 0);
    let b2_hash = block_hash(&b2.header);
    state.submit_block(&serialize(&b2)).unwrap();
    assert_eq!(state.best_tip(), b2_hash);
    assert!(state.utxo_for(&OutPoint::new(txid(&tx2), 0)).is_some());

    // Competing branch of empty blocks overtakes it at height 3
    let b1_alt = mine_on(&state, &genesis, vec![], 5);
    let b1_alt_hash = block_hash(&b1_alt.header);
    assert_eq!(
        state.submit_block(&serialize(&b1_alt)),
        Ok(AcceptanceOutcome::SideChain)
    );
    let b2_alt = mine_on(&state, &b1_alt_hash, vec![], 5);
    let b2_alt_hash = block_hash(&b2_alt.header);
    assert_eq!(
        state.submit_block(&serialize(&b2_alt)),
        Ok(AcceptanceOutcome::SideChain)
    );
    let b3_alt = mine_on(&state, &b2_alt_hash, vec![], 5);
    let b3_alt_hash = block_hash(&b3_alt.header);
    assert_eq!(
        state.submit_block(&serialize(&b3_alt)),
        Ok(AcceptanceOutcome::BestChain {
            height: 3,
            disconnected: 2
        })
    );
    assert_eq!(state.best_tip(), b3_alt_hash);
    assert_eq!(state.block_status(&b1_hash), Some(BlockStatus::SideChain));
    assert_eq!(state.block_status(&b2_hash), Some(BlockStatus::SideChain));

    // Replay the new best chain from genesis into a fresh store
    let mut replayed = MemoryUtxoStore::new();
    let mut blocks = Vec::new();
    for height in 0..=3 {
        let block = state.block_at_height(height).unwrap().unwrap();
        let connected = utxo_chainstate::block::connect_block(
            &block,
            height,
            &replayed,
            state.params(),
            &TagDispatch::new(),
        )
        .unwrap();
        replayed.apply_block_delta(&connected.delta).unwrap();
        blocks.push(block);
    }
    assert_eq!(block_hash(&blocks[3].header), b3_alt_hash);

    let mut outpoints = Vec::new();
    for block in blocks.iter().chain([&b1, &b2]) {
        for tx in &block.transactions {
            let id = txid(tx);
            outpoints.extend((0..tx.outputs.len() as u32).map(|i| OutPoint::new(id, i)));
            outpoints.extend(tx.inputs.iter().map(|input| input.prevout));
        }
    }
    for outpoint in &outpoints {
        assert_eq!(state.utxo_for(outpoint), replayed.get(outpoint), "{}", outpoint);
    }
    assert!(state.utxo_for(&genesis_outpoint(&state)).is_some());

    // Both spends are pending again, parent before child
    assert_eq!(state.confirmations_of(&txid(&tx1)), None);
    assert_eq!(state.confirmations_of(&txid(&tx2)), None);
    assert_eq!(state.mempool_transactions(), vec![tx1, tx2]);

    let events = recorder.events.lock().clone();
    assert!(events.contains(&"reorg -2 +3".to_string()));
}

#[test]
fn test_confirmations_grow_with_chain() {
    let state = engine();
    let genesis = state.best_tip();
    let tx = spend(genesis_outpoint(&state), 10 * COIN, anyone_can_spend());
    let tx_id = txid(&tx);

    let b1 = mine_on(&state, &genesis, vec![tx], 0);
    let mut tip = block_hash(&b1.header);
    state.submit_block(&serialize(&b1)).unwrap();
    assert_eq!(state.confirmations_of(&tx_id), Some(1));

    for _ in 0..3 {
        let block = mine_on(&state, &tip, vec![], 0);
        tip = block_hash(&block.header);
        state.submit_block(&serialize(&block)).unwrap();
    }
    assert_eq!(state.best_height(), 4);
    assert_eq!(state.confirmations_of(&tx_id), Some(4));
    assert_eq!(state.block_at_height(1).unwrap(), Some(b1));
}

#[test]
fn test_pay_to_pubkey_spend_through_engine() {
    let state = engine();
    let secret = SecretKey::from_slice(&[11; 32]).unwrap();
    let pubkey = PublicKey::from_secret_key(&Secp256k1::new(), &secret);

    let genesis = state.best_tip();
    let fund = spend(genesis_outpoint(&state), 40 * COIN, pay_to_pubkey(&pubkey));
    let fund_id = txid(&fund);
    let b1 = mine_on(&state, &genesis, vec![fund.clone()], 0);
    state.submit_block(&serialize(&b1)).unwrap();

    let funded = OutPoint::new(fund_id, 0);
    let mut payment = spend(funded, 39 * COIN, anyone_can_spend());
    assert_eq!(
        state.submit_transaction(&serialize(&payment)),
        Err(TxError::AuthorizationFailed { input: 0 })
    );

    let signature = sign_input(&secret, &SigningContext::new(&payment, 0, &fund.outputs[0]));
    payment.inputs[0].script_sig = signature;
    let payment_id = state.submit_transaction(&serialize(&payment)).unwrap();
    assert_eq!(state.mempool_spender_of(&funded), Some(payment_id));
    assert_eq!(state.mempool_total_fees(), COIN);

    let double_spend = spend(funded, 38 * COIN, anyone_can_spend());
    assert_eq!(
        state.submit_transaction(&serialize(&double_spend)),
        Err(TxError::Conflict {
            outpoint: funded,
            spender: payment_id
        })
    );
}

#[test]
fn test_block_template_collects_mempool() {
    let state = engine();
    let tx = spend(genesis_outpoint(&state), 49 * COIN, anyone_can_spend());
    let tx_id = state.submit_transaction(&serialize(&tx)).unwrap();

    let template = state.block_template(anyone_can_spend()).unwrap();
    assert_eq!(template.transactions.len(), 2);
    assert_eq!(template.transactions[0].outputs[0].value, 51 * COIN);

    let header = mining::solve_header(&template.header, 10_000).unwrap().unwrap();
    let block = Block {
        header,
        transactions: template.transactions,
    };
    assert!(matches!(
        state.submit_block(&serialize(&block)),
        Ok(AcceptanceOutcome::BestChain { height: 1, .. })
    ));
    assert_eq!(state.mempool_len(), 0);
    assert_eq!(state.confirmations_of(&tx_id), Some(1));
}

#[test]
fn test_headers_first_then_bodies() {
    let state = engine();
    let genesis = state.best_tip();
    let b1 = mine_on(&state, &genesis, vec![], 0);
    state.submit_headers(&[serialize(&b1.header)]).unwrap();
    let b2 = mine_on(&state, &block_hash(&b1.header), vec![], 0);
    state.submit_headers(&[serialize(&b2.header)]).unwrap();

    assert_eq!(
        state.block_status(&block_hash(&b2.header)),
        Some(BlockStatus::HeaderValid)
    );
    assert_eq!(state.best_height(), 0);

    assert_eq!(
        state.submit_block(&serialize(&b2)),
        Ok(AcceptanceOutcome::AwaitingParent)
    );
    state.submit_block(&serialize(&b1)).unwrap();
    assert_eq!(state.best_tip(), block_hash(&b2.header));
}

#[test]
fn test_concurrent_readers_see_consistent_tips() {
    let state = engine();
    let mut blocks = Vec::new();
    {
        // build the chain on a scratch engine so the real one starts empty
        let scratch = engine();
        let mut tip = scratch.best_tip();
        for _ in 0..20 {
            let block = mine_on(&scratch, &tip, vec![], 0);
            tip = block_hash(&block.header);
            scratch.submit_block(&serialize(&block)).unwrap();
            blocks.push(serialize(&block));
        }
    }

    std::thread::scope(|scope| {
        let reader = scope.spawn(|| {
            let mut last = 0;
            while last < 20 {
                let height = state.best_height();
                assert!(height >= last);
                let tip = state.best_tip();
                assert!(state.header(&tip).is_some());
                last = height;
            }
        });
        for bytes in &blocks {
            state.submit_block(bytes).unwrap();
        }
        reader.join().unwrap();
    });
    assert_eq!(state.best_height(), 20);
}
