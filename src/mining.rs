//! Block production helpers: coinbase construction, block assembly and nonce
//! grinding.

use crate::constants::*;
use crate::error::PowError;
use crate::hashing::{block_hash, txid};
use crate::merkle::merkle_root;
use crate::pow::{expand_target, meets_target};
use crate::types::*;

/// CreateCoinbase: ℕ × ℕ₆₄ × 𝒮𝒞 → 𝒯𝒳
///
/// The unlock field starts with the little-endian height, which keeps
/// coinbase txids unique across blocks paying the same lock.
pub fn create_coinbase_transaction(height: Height, value: Amount, lock: ByteString) -> Transaction {
    let mut script_sig = height.to_le_bytes().to_vec();
    script_sig.extend_from_slice(b"/utxo/");
    Transaction {
        version: 1,
        inputs: vec![TransactionInput {
            prevout: OutPoint::null(),
            script_sig,
            sequence: SEQUENCE_FINAL,
        }],
        outputs: vec![TransactionOutput {
            value,
            script_pubkey: lock,
        }],
        lock_time: 0,
    }
}

/// Block with `coinbase` first, then `transactions`, committed by a fresh
/// Merkle root. The nonce starts at zero.
pub fn assemble_block(
    prev_block_hash: Hash,
    timestamp: u32,
    bits: u32,
    coinbase: Transaction,
    transactions: Vec<Transaction>,
) -> Block {
    let mut all = Vec::with_capacity(transactions.len() + 1);
    all.push(coinbase);
    all.extend(transactions);
    let txids: Vec<Hash> = all.iter().map(txid).collect();
    Block {
        header: BlockHeader {
            version: 1,
            prev_block_hash,
            merkle_root: merkle_root(&txids),
            timestamp,
            bits,
            nonce: 0,
        },
        transactions: all,
    }
}

/// MineBlock: ℋ × ℕ → ℋ ∪ {⊥}
///
/// Try up to `max_tries` nonces starting from the header's own. Returns the
/// first header meeting its target, or `None` if none did.
pub fn solve_header(header: &BlockHeader, max_tries: u64) -> Result<Option<BlockHeader>, PowError> {
    let target = expand_target(header.bits)?;
    let mut candidate = header.clone();
    for _ in 0..max_tries {
        if meets_target(&block_hash(&candidate), &target) {
            return Ok(Some(candidate));
        }
        candidate.nonce = match candidate.nonce.checked_add(1) {
            Some(n) => n,
            None => return Ok(None),
        };
    }
    Ok(None)
}

/// Assemble and solve in one step.
pub fn mine_block(
    prev_block_hash: Hash,
    timestamp: u32,
    bits: u32,
    coinbase: Transaction,
    transactions: Vec<Transaction>,
    max_tries: u64,
) -> Result<Option<Block>, PowError> {
    let mut block = assemble_block(prev_block_hash, timestamp, bits, coinbase, transactions);
    Ok(solve_header(&block.header, max_tries)?.map(|header| {
        block.header = header;
        block
    }))
}
