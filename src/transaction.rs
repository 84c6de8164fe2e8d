//! Transaction validation
//!
//! Gates run in order and the first failure wins:
//! structure, finality, prevout resolution, authorization, value conservation.
//! Coinbase transactions stop after structure; the block validator checks
//! them against the subsidy schedule.

use crate::constants::*;
use crate::encoding::serialized_size;
use crate::error::TxError;
use crate::script::{Authorization, SigningContext};
use crate::types::*;
use crate::utxo::UtxoView;
use std::collections::HashSet;

/// Input value minus output value of a non-coinbase transaction.
pub type Fee = Amount;

/// CheckTransaction: 𝒯𝒳 → {valid, invalid}
///
/// A transaction tx = (v, ins, outs, lt) is well formed if and only if:
/// 1. |ins| > 0 ∧ |outs| > 0
/// 2. no prevout appears twice in ins
/// 3. ∀o ∈ outs: o.value ≤ M_max and Σ o.value ≤ M_max
/// 4. |tx| ≤ M_max_tx_size
/// 5. coinbase: 2 ≤ |script_sig| ≤ 100, otherwise no null prevouts
pub fn check_transaction(tx: &Transaction) -> Result<(), TxError> {
    if tx.inputs.is_empty() {
        return Err(TxError::NoInputs);
    }
    if tx.outputs.is_empty() {
        return Err(TxError::NoOutputs);
    }

    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        if !seen.insert(input.prevout) {
            return Err(TxError::DuplicateInput(input.prevout));
        }
    }

    let mut total = 0u64;
    for (index, output) in tx.outputs.iter().enumerate() {
        if output.value > MAX_MONEY {
            return Err(TxError::ValueOutOfRange {
                index,
                value: output.value,
            });
        }
        total = total
            .checked_add(output.value)
            .filter(|t| *t <= MAX_MONEY)
            .ok_or(TxError::OutputTotalOutOfRange)?;
    }

    let size = serialized_size(tx);
    if size > MAX_TX_SIZE {
        return Err(TxError::Oversized(size));
    }

    if tx.is_coinbase() {
        let len = tx.inputs[0].script_sig.len();
        if !(MIN_COINBASE_SCRIPT_SIZE..=MAX_COINBASE_SCRIPT_SIZE).contains(&len) {
            return Err(TxError::BadCoinbaseScriptLength(len));
        }
    } else if let Some(index) = tx.inputs.iter().position(|i| i.prevout.is_null()) {
        return Err(TxError::NullPrevout(index));
    }

    Ok(())
}

/// IsFinalTx: 𝒯𝒳 × ℕ × ℕ → {true, false}
///
/// Lock times below 500,000,000 are heights, the rest are timestamps. A
/// transaction whose inputs all carry the final sequence is final regardless.
pub fn is_final_tx(tx: &Transaction, height: Height, time: u32) -> bool {
    if tx.lock_time == 0 {
        return true;
    }
    let limit = if tx.lock_time < LOCKTIME_THRESHOLD {
        height
    } else {
        time
    };
    if tx.lock_time < limit {
        return true;
    }
    tx.inputs.iter().all(|input| input.sequence == SEQUENCE_FINAL)
}

/// CheckTxInputs: 𝒯𝒳 × 𝒰𝒮 × ℕ → ℕ
///
/// For a non-coinbase transaction tx against view us at context ctx:
/// 1. ∀i ∈ ins: us(i.prevout) ≠ ⊥
/// 2. coinbase prevouts have at least `coinbase_maturity` confirmations
/// 3. ∀i ∈ ins: evaluate(i.script_sig, us(i.prevout).script_pubkey) = true
/// 4. Σ us(i.prevout).value ≥ Σ o.value
///
/// Returns Σ inputs − Σ outputs.
pub fn check_tx_inputs<V: UtxoView + ?Sized>(
    tx: &Transaction,
    view: &V,
    ctx: &ValidationContext,
    authorizer: &dyn Authorization,
) -> Result<Fee, TxError> {
    let mut spent = Vec::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        let entry = view
            .get(&input.prevout)
            .ok_or(TxError::AlreadySpentOrUnknown(input.prevout))?;
        if entry.is_coinbase {
            let confirmations = ctx.height.saturating_sub(entry.height);
            if confirmations < ctx.coinbase_maturity {
                return Err(TxError::ImmatureCoinbase {
                    outpoint: input.prevout,
                    confirmations,
                });
            }
        }
        spent.push(entry);
    }

    for (index, (input, entry)) in tx.inputs.iter().zip(&spent).enumerate() {
        let signing = SigningContext::new(tx, index, &entry.output);
        if !authorizer.evaluate(&input.script_sig, &entry.output.script_pubkey, &signing) {
            return Err(TxError::AuthorizationFailed { input: index });
        }
    }

    let inputs = spent
        .iter()
        .try_fold(0u64, |acc, entry| acc.checked_add(entry.value()))
        .ok_or(TxError::Overflow)?;
    let outputs = tx
        .outputs
        .iter()
        .try_fold(0u64, |acc, output| acc.checked_add(output.value))
        .ok_or(TxError::Overflow)?;

    inputs
        .checked_sub(outputs)
        .ok_or(TxError::Underflow { inputs, outputs })
}

/// Full validation of one transaction against a view.
///
/// Coinbase transactions are returned with zero fee after the structural
/// gate.
pub fn validate_transaction<V: UtxoView + ?Sized>(
    tx: &Transaction,
    view: &V,
    ctx: &ValidationContext,
    authorizer: &dyn Authorization,
) -> Result<Fee, TxError> {
    check_transaction(tx)?;
    if !is_final_tx(tx, ctx.height, ctx.time) {
        return Err(TxError::NonFinal);
    }
    if tx.is_coinbase() {
        return Ok(0);
    }
    check_tx_inputs(tx, view, ctx, authorizer)
}
