//! Block validation: header rules, context-free body rules and connection
//! against a parent UTXO view.

use crate::config::ChainParams;
use crate::constants::*;
use crate::economic::max_coinbase_value;
use crate::encoding::serialized_size;
use crate::error::{BlockError, TxError};
use crate::hashing::txid;
use crate::merkle::merkle_root_checked;
use crate::pow::check_proof_of_work;
use crate::script::Authorization;
use crate::transaction::{check_transaction, validate_transaction};
use crate::types::*;
use crate::utxo::{BlockDelta, UtxoOverlay, UtxoView};
use std::collections::HashSet;

/// What a header is checked against, derived from its ancestors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderContext {
    /// Difficulty encoding the header must carry.
    pub expected_bits: u32,
    /// Median timestamp of the previous `MEDIAN_TIME_SPAN` headers.
    pub median_time_past: u32,
    /// Local clock, seconds since the epoch.
    pub now: u32,
    pub max_future_block_time: u32,
}

/// Median of up to `MEDIAN_TIME_SPAN` timestamps; zero for none.
pub fn median_time(timestamps: &[u32]) -> u32 {
    if timestamps.is_empty() {
        return 0;
    }
    let mut sorted = timestamps.to_vec();
    sorted.sort_unstable();
    sorted[sorted.len() / 2]
}

/// CheckBlockHeader: ℋ × ctx → {valid, invalid}
///
/// For header h with parent context ctx:
/// 1. h.bits = ctx.expected_bits
/// 2. expand(h.bits) ≠ 0 ∧ SHA256d(h) ≤ expand(h.bits)
/// 3. ctx.median_time_past < h.time ≤ ctx.now + max_future
///
/// The link to a known parent is checked by the chain index, which owns
/// the set of known headers.
pub fn check_block_header(header: &BlockHeader, ctx: &HeaderContext) -> Result<(), BlockError> {
    check_header_work(header, ctx.expected_bits)?;
    check_header_time(header, ctx)
}

/// Rules 1 and 2 of [`check_block_header`]: the header carries the required
/// difficulty and its hash meets it.
pub fn check_header_work(header: &BlockHeader, expected_bits: u32) -> Result<(), BlockError> {
    if header.bits != expected_bits {
        return Err(BlockError::BadDifficulty {
            expected: expected_bits,
            got: header.bits,
        });
    }
    if !check_proof_of_work(header)? {
        return Err(BlockError::InsufficientWork);
    }
    Ok(())
}

/// Rule 3 of [`check_block_header`].
pub fn check_header_time(header: &BlockHeader, ctx: &HeaderContext) -> Result<(), BlockError> {
    if header.timestamp <= ctx.median_time_past {
        return Err(BlockError::TimeTooOld {
            time: header.timestamp,
            median: ctx.median_time_past,
        });
    }
    let limit = ctx.now.saturating_add(ctx.max_future_block_time);
    if header.timestamp > limit {
        return Err(BlockError::TimeTooNew {
            time: header.timestamp,
            limit,
        });
    }
    Ok(())
}

/// CheckBlock: ℬ → {valid, invalid}
///
/// Rules that need no chain context:
/// 1. |txs| > 0
/// 2. h.merkle_root = MerkleRoot(txids) and no level pairs identical digests
/// 3. |b| ≤ M_max_block_size
/// 4. txs[0] is coinbase, no other tx is
/// 5. ∀tx ∈ txs: CheckTransaction(tx)
///
/// The commitment is checked before anything else so that a valid header
/// with a substituted body is never blamed for the body.
pub fn check_block(block: &Block) -> Result<(), BlockError> {
    if block.transactions.is_empty() {
        return Err(BlockError::NoTransactions);
    }

    let txids: Vec<Hash> = block.transactions.iter().map(txid).collect();
    let (root, mutated) = merkle_root_checked(&txids);
    if root != block.header.merkle_root {
        return Err(BlockError::BadCommitmentRoot);
    }
    if mutated {
        return Err(BlockError::MutatedCommitment);
    }

    let size = serialized_size(block);
    if size > MAX_BLOCK_SIZE {
        return Err(BlockError::Oversized(size));
    }

    if !block.transactions[0].is_coinbase() {
        return Err(BlockError::BadCoinbase(
            "first transaction is not a coinbase".to_string(),
        ));
    }
    if block.transactions[1..].iter().any(Transaction::is_coinbase) {
        return Err(BlockError::BadCoinbase(
            "more than one coinbase".to_string(),
        ));
    }

    for (index, tx) in block.transactions.iter().enumerate() {
        check_transaction(tx).map_err(|source| BlockError::TxValidationFailed { index, source })?;
    }
    Ok(())
}

/// Outcome of connecting a block to a parent view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedBlock {
    pub delta: BlockDelta,
    pub fees: Amount,
}

/// ConnectBlock: ℬ × 𝒰𝒮 × ℕ → {valid, invalid} × Δ𝒰𝒮
///
/// For a context-free valid block b at height h over parent view us:
/// 1. every non-coinbase tx validates against us extended by the outputs of
///    earlier transactions in b
/// 2. no outpoint is spent twice within b
/// 3. Σ coinbase outputs ≤ GetBlockSubsidy(h) + Σ fees
///
/// Returns the delta to apply to `us`. Outputs created and spent inside b
/// appear in neither list.
pub fn connect_block<V: UtxoView + ?Sized>(
    block: &Block,
    height: Height,
    view: &V,
    params: &ChainParams,
    authorizer: &dyn Authorization,
) -> Result<ConnectedBlock, BlockError> {
    let ctx = ValidationContext {
        height,
        time: block.header.timestamp,
        coinbase_maturity: params.coinbase_maturity,
    };

    let mut overlay = UtxoOverlay::new(view);
    let mut spent: Vec<OutPoint> = Vec::new();
    let mut spent_set: HashSet<OutPoint> = HashSet::new();
    let mut created: Vec<(OutPoint, UtxoEntry)> = Vec::new();
    let mut created_set: HashSet<OutPoint> = HashSet::new();
    let mut fees: Amount = 0;

    for (index, tx) in block.transactions.iter().enumerate() {
        let is_coinbase = index == 0;
        if !is_coinbase {
            for input in &tx.inputs {
                if spent_set.contains(&input.prevout) {
                    return Err(BlockError::InBlockDoubleSpend(input.prevout));
                }
            }
            let fee = validate_transaction(tx, &overlay, &ctx, authorizer)
                .map_err(|source| BlockError::TxValidationFailed { index, source })?;
            fees = fees.checked_add(fee).ok_or(BlockError::TxValidationFailed {
                index,
                source: TxError::Overflow,
            })?;

            for input in &tx.inputs {
                overlay.spend(&input.prevout);
                spent_set.insert(input.prevout);
                spent.push(input.prevout);
            }
        } else {
            validate_transaction(tx, &overlay, &ctx, authorizer)
                .map_err(|source| BlockError::TxValidationFailed { index, source })?;
        }

        let id = txid(tx);
        for (vout, output) in tx.outputs.iter().enumerate() {
            let outpoint = OutPoint::new(id, vout as u32);
            if overlay.contains(&outpoint) || created_set.contains(&outpoint) {
                return Err(BlockError::DuplicateOutput(outpoint));
            }
            let entry = UtxoEntry {
                output: output.clone(),
                height,
                is_coinbase,
            };
            overlay.add(outpoint, entry.clone());
            created_set.insert(outpoint);
            created.push((outpoint, entry));
        }
    }

    let claimed = block.transactions[0]
        .outputs
        .iter()
        .try_fold(0u64, |acc, o| acc.checked_add(o.value));
    let allowed = max_coinbase_value(height, fees, params);
    match (claimed, allowed) {
        (Some(claimed), Some(allowed)) if claimed <= allowed => {}
        (claimed, allowed) => {
            return Err(BlockError::BadCoinbase(format!(
                "coinbase claims {:?}, limit {:?}",
                claimed, allowed
            )))
        }
    }

    let delta = BlockDelta {
        spent: spent
            .into_iter()
            .filter(|outpoint| !created_set.contains(outpoint))
            .collect(),
        created: created
            .into_iter()
            .filter(|(outpoint, _)| !spent_set.contains(outpoint))
            .collect(),
    };
    Ok(ConnectedBlock { delta, fees })
}
