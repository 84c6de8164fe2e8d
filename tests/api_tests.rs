//! Public API scenarios and cross-checks against an independent hash library

use bitcoin_hashes::{sha256d as reference, Hash as _};
use utxo_chainstate::hashing::hash_pair;
use utxo_chainstate::merkle::{merkle_branch, merkle_root, merkle_root_checked, verify_branch};
use utxo_chainstate::pow::{block_work, compact_from_target, expand_target};
use utxo_chainstate::script::anyone_can_spend;
use utxo_chainstate::transaction::validate_transaction;
use utxo_chainstate::*;

#[test]
fn test_sha256d_matches_reference_implementation() {
    let inputs: [&[u8]; 4] = [b"", b"abc", &[0u8; 80], &[0xffu8; 1000]];
    for data in inputs {
        assert_eq!(sha256d(data), reference::Hash::hash(data).into_inner());
    }
}

#[test]
fn test_production_engine_starts_at_known_genesis() {
    let state = ChainState::in_memory(EngineConfig::new(ChainParams::production())).unwrap();
    assert_eq!(
        hash_to_hex(&state.best_tip()),
        "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
    );
    let coinbase_id = txid(&state.params().genesis.transactions[0]);
    assert_eq!(
        hash_to_hex(&coinbase_id),
        "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
    );
    assert_eq!(
        state.utxo_for(&OutPoint::new(coinbase_id, 0)).map(|e| e.output.value),
        Some(50 * COIN)
    );
}

#[test]
fn test_difficulty_scenario() {
    let target = expand_target(0x1d00ffff).unwrap();
    let mut expected = [0u8; 32];
    expected[4] = 0xff;
    expected[5] = 0xff;
    assert_eq!(target, expected);
    assert_eq!(compact_from_target(&target), 0x1d00ffff);
    assert_eq!(block_work(0x1d00ffff), num_bigint::BigUint::from(0x1_0001_0001u64));
}

#[test]
fn test_three_leaf_merkle_scenario() {
    let a = sha256d(b"A");
    let b = sha256d(b"B");
    let c = sha256d(b"C");
    let expected = hash_pair(&hash_pair(&a, &b), &hash_pair(&c, &c));
    assert_eq!(merkle_root(&[a, b, c]), expected);

    // Duplicating C yields the same root but is flagged as mutated
    assert_eq!(merkle_root_checked(&[a, b, c]), (expected, false));
    assert_eq!(merkle_root_checked(&[a, b, c, c]), (expected, true));

    let branch = merkle_branch(&[a, b, c], 2);
    assert_eq!(branch, vec![c, hash_pair(&a, &b)]);
    assert_eq!(verify_branch(&c, &branch, 2), expected);
}

fn funded_store(values: &[Amount]) -> (MemoryUtxoStore, Vec<OutPoint>) {
    let mut store = MemoryUtxoStore::new();
    let created: Vec<(OutPoint, UtxoEntry)> = values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            (
                OutPoint::new(sha256d(&[i as u8]), 0),
                UtxoEntry {
                    output: TransactionOutput {
                        value: *value,
                        script_pubkey: anyone_can_spend(),
                    },
                    height: 1,
                    is_coinbase: false,
                },
            )
        })
        .collect();
    let outpoints = created.iter().map(|(op, _)| *op).collect();
    store
        .apply_block_delta(&BlockDelta {
            spent: vec![],
            created,
        })
        .unwrap();
    (store, outpoints)
}

fn paying(prevouts: &[OutPoint], outputs: &[Amount]) -> Transaction {
    Transaction {
        version: 1,
        inputs: prevouts
            .iter()
            .map(|prevout| TransactionInput {
                prevout: *prevout,
                script_sig: vec![],
                sequence: SEQUENCE_FINAL,
            })
            .collect(),
        outputs: outputs
            .iter()
            .map(|value| TransactionOutput {
                value: *value,
                script_pubkey: anyone_can_spend(),
            })
            .collect(),
        lock_time: 0,
    }
}

#[test]
fn test_fee_scenario() {
    let (store, outpoints) = funded_store(&[5000, 4000]);
    let ctx = ValidationContext {
        height: 10,
        time: 1_700_000_000,
        coinbase_maturity: COINBASE_MATURITY,
    };
    let auth = TagDispatch::new();

    let tx = paying(&outpoints, &[8000, 700]);
    assert_eq!(validate_transaction(&tx, &store, &ctx, &auth), Ok(300));

    let (store, outpoints) = funded_store(&[9000]);
    let tx = paying(&outpoints, &[9100]);
    assert_eq!(
        validate_transaction(&tx, &store, &ctx, &auth),
        Err(TxError::Underflow {
            inputs: 9000,
            outputs: 9100
        })
    );
}

#[test]
fn test_engine_config_from_json() {
    let json = EngineConfig::regtest().to_json().unwrap();
    let config = EngineConfig::from_json_str(&json).unwrap();
    let state = ChainState::in_memory(config).unwrap();
    assert_eq!(state.params().network, "regtest");
    assert_eq!(
        state.best_tip(),
        block_hash(&ChainParams::regtest().genesis.header)
    );
}
