//! Tests for the mempool against a bare UTXO store

use utxo_chainstate::mempool::*;
use utxo_chainstate::script::anyone_can_spend;
use utxo_chainstate::*;

fn store_with(outpoint: OutPoint, value: Amount) -> MemoryUtxoStore {
    let mut store = MemoryUtxoStore::new();
    store
        .apply_block_delta(&BlockDelta {
            spent: vec![],
            created: vec![(
                outpoint,
                UtxoEntry {
                    output: TransactionOutput {
                        value,
                        script_pubkey: anyone_can_spend(),
                    },
                    height: 1,
                    is_coinbase: false,
                },
            )],
        })
        .unwrap();
    store
}

fn spend(prevout: OutPoint, value: Amount) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TransactionInput {
            prevout,
            script_sig: vec![],
            sequence: SEQUENCE_FINAL,
        }],
        outputs: vec![TransactionOutput {
            value,
            script_pubkey: anyone_can_spend(),
        }],
        lock_time: 0,
    }
}

fn ctx() -> ValidationContext {
    ValidationContext {
        height: 10,
        time: 1_700_000_000,
        coinbase_maturity: COINBASE_MATURITY,
    }
}

#[test]
fn test_chained_spends_and_fees() {
    let funding = OutPoint::new([1; 32], 0);
    let store = store_with(funding, 10_000);
    let auth = TagDispatch::new();
    let mut pool = Mempool::new(MempoolConfig::default());

    let parent = spend(funding, 9_000);
    let parent_id = pool.admit(parent, &store, &ctx(), &auth).unwrap();
    let child = spend(OutPoint::new(parent_id, 0), 8_500);
    let child_id = pool.admit(child, &store, &ctx(), &auth).unwrap();

    assert_eq!(pool.len(), 2);
    assert_eq!(pool.entry(&child_id).map(|e| e.fee), Some(500));
    assert_eq!(pool.total_fees(), 1_500);
    let order: Vec<Hash> = pool.entries().map(|e| e.txid).collect();
    assert_eq!(order, vec![parent_id, child_id]);

    // The pool view serves unconfirmed outputs at the given height
    let view = pool.view(&store, 11);
    let unconfirmed = view.get(&OutPoint::new(parent_id, 0)).unwrap();
    assert_eq!(unconfirmed.height, 11);
    assert_eq!(unconfirmed.output.value, 9_000);
}

#[test]
fn test_first_seen_conflict_wins() {
    let funding = OutPoint::new([2; 32], 0);
    let store = store_with(funding, 10_000);
    let auth = TagDispatch::new();
    let mut pool = Mempool::new(MempoolConfig::default());

    let first = pool.admit(spend(funding, 9_000), &store, &ctx(), &auth).unwrap();
    assert_eq!(
        pool.admit(spend(funding, 5_000), &store, &ctx(), &auth),
        Err(TxError::Conflict {
            outpoint: funding,
            spender: first
        })
    );
    assert_eq!(
        pool.admit(spend(funding, 9_000), &store, &ctx(), &auth),
        Err(TxError::AlreadyKnown(first))
    );
    assert_eq!(pool.spender_of(&funding), Some(first));
}

#[test]
fn test_pool_limit() {
    let store = MemoryUtxoStore::new();
    let auth = TagDispatch::new();
    let mut pool = Mempool::new(MempoolConfig { max_transactions: 0 });
    assert_eq!(
        pool.admit(spend(OutPoint::new([3; 32], 0), 1), &store, &ctx(), &auth),
        Err(TxError::PoolFull)
    );
}

#[test]
fn test_revalidate_evicts_spent_chains() {
    let funding = OutPoint::new([4; 32], 0);
    let mut store = store_with(funding, 10_000);
    let auth = TagDispatch::new();
    let mut pool = Mempool::new(MempoolConfig::default());

    let parent_id = pool.admit(spend(funding, 9_000), &store, &ctx(), &auth).unwrap();
    let child_id = pool
        .admit(spend(OutPoint::new(parent_id, 0), 8_000), &store, &ctx(), &auth)
        .unwrap();

    // A competing transaction confirms and spends the funding output
    store
        .apply_block_delta(&BlockDelta {
            spent: vec![funding],
            created: vec![],
        })
        .unwrap();
    let report = pool.revalidate(vec![], &store, &ctx(), &auth);
    assert_eq!(report.evicted, vec![parent_id, child_id]);
    assert!(report.readmitted.is_empty());
    assert!(pool.is_empty());
    assert_eq!(pool.spender_of(&funding), None);
}

#[test]
fn test_revalidate_offers_disconnected_first() {
    let funding = OutPoint::new([5; 32], 0);
    let store = store_with(funding, 10_000);
    let auth = TagDispatch::new();
    let mut pool = Mempool::new(MempoolConfig::default());

    // Pool holds a spend that conflicts with a transaction from a
    // disconnected block; the disconnected one is offered first and wins.
    let pooled = pool.admit(spend(funding, 9_500), &store, &ctx(), &auth).unwrap();
    let from_block = spend(funding, 9_000);
    let report = pool.revalidate(vec![from_block.clone()], &store, &ctx(), &auth);

    assert_eq!(report.readmitted, vec![txid(&from_block)]);
    assert_eq!(report.evicted, vec![pooled]);
    assert_eq!(pool.transactions(), vec![from_block]);
}
