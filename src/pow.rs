//! Proof of work: compact difficulty encoding, target checks and chain work

use crate::config::ChainParams;
use crate::error::PowError;
use crate::hashing::block_hash;
use crate::types::*;
use num_bigint::BigUint;

/// Full-width target as a 256-bit big-endian number.
pub type Target = [u8; 32];

/// ExpandTarget: ℕ₃₂ → 𝕋
///
/// The encoding is a 1-byte exponent `e` and a 3-byte mantissa `m`:
/// `target = m × 256^(e − 3)`. For `e ≤ 3` this narrows the mantissa with a
/// right shift; otherwise the mantissa bytes land at offset `32 − e` of the
/// big-endian buffer. A zero mantissa expands to a zero target, which callers
/// must reject before comparing against it.
pub fn expand_target(bits: u32) -> Result<Target, PowError> {
    let exponent = (bits >> 24) as i32;
    let mantissa = bits & 0x00ff_ffff;
    let mut target = [0u8; 32];

    if mantissa == 0 {
        return Ok(target);
    }

    if exponent <= 3 {
        let value = mantissa >> (8 * (3 - exponent));
        target[28..].copy_from_slice(&value.to_be_bytes());
        return Ok(target);
    }

    let mantissa_bytes = mantissa.to_be_bytes();
    for (i, byte) in mantissa_bytes[1..].iter().enumerate() {
        let position = 32 - exponent + i as i32;
        if position < 0 {
            if *byte != 0 {
                return Err(PowError::Overflow(bits));
            }
            continue;
        }
        target[position as usize] = *byte;
    }
    Ok(target)
}

/// Compact encoding of a target, the inverse of [`expand_target`] for
/// normalized encodings (mantissa high bit clear).
pub fn compact_from_target(target: &Target) -> u32 {
    let first = match target.iter().position(|b| *b != 0) {
        Some(i) => i,
        None => return 0,
    };
    let mut size = (32 - first) as u32;
    let byte_at = |i: usize| target.get(i).copied().unwrap_or(0) as u32;
    let mut mantissa = (byte_at(first) << 16) | (byte_at(first + 1) << 8) | byte_at(first + 2);
    if mantissa & 0x0080_0000 != 0 {
        mantissa >>= 8;
        size += 1;
    }
    (size << 24) | mantissa
}

pub fn target_is_zero(target: &Target) -> bool {
    target.iter().all(|b| *b == 0)
}

/// MeetsTarget: ℍ × 𝕋 → {true, false}
///
/// The digest is read as a big-endian number after reversing its native byte
/// order, then compared with `<=`.
pub fn meets_target(hash: &Hash, target: &Target) -> bool {
    let mut value = *hash;
    value.reverse();
    value <= *target
}

/// CheckProofOfWork: ℋ → {true, false}
///
/// Formula: SHA256(SHA256(header)) ≤ ExpandTarget(header.bits)
pub fn check_proof_of_work(header: &BlockHeader) -> Result<bool, PowError> {
    let target = expand_target(header.bits)?;
    if target_is_zero(&target) {
        return Err(PowError::ZeroTarget(header.bits));
    }
    Ok(meets_target(&block_hash(header), &target))
}

pub fn target_to_biguint(target: &Target) -> BigUint {
    BigUint::from_bytes_be(target)
}

pub fn biguint_to_target(value: &BigUint) -> Option<Target> {
    let bytes = value.to_bytes_be();
    if bytes.len() > 32 {
        return None;
    }
    let mut target = [0u8; 32];
    target[32 - bytes.len()..].copy_from_slice(&bytes);
    Some(target)
}

/// Expected number of hashes to find a header at this difficulty:
/// `2^256 / (target + 1)`. Invalid or zero targets carry no work.
pub fn block_work(bits: u32) -> BigUint {
    let target = match expand_target(bits) {
        Ok(t) if !target_is_zero(&t) => t,
        _ => return BigUint::from(0u32),
    };
    let numerator = BigUint::from(1u32) << 256usize;
    numerator / (target_to_biguint(&target) + 1u32)
}

/// Whether the block at `height` starts a new difficulty period.
/// A zero interval never retargets.
pub fn is_retarget_height(height: Height, params: &ChainParams) -> bool {
    !params.no_retargeting && height.checked_rem(params.retarget_interval) == Some(0)
}

/// GetNextWorkRequired for a retarget boundary.
///
/// `actual_timespan` is the time between the first and last header of the
/// closing period. It is clamped to [¼, 4]× the expected timespan, the old
/// target scaled by `actual / expected`, and the result capped at the chain's
/// easiest target.
pub fn calculate_next_work_required(
    last_bits: u32,
    actual_timespan: i64,
    params: &ChainParams,
) -> Result<u32, PowError> {
    let expected = params.target_timespan().max(1) as i64;
    let clamped = actual_timespan.clamp(expected / 4, expected * 4) as u64;

    let old_target = target_to_biguint(&expand_target(last_bits)?);
    let limit = target_to_biguint(&expand_target(params.pow_limit_bits)?);

    let mut new_target = old_target * clamped / (expected as u64);
    if new_target > limit {
        new_target = limit;
    }
    let target = biguint_to_target(&new_target).ok_or(PowError::Overflow(last_bits))?;
    Ok(compact_from_target(&target))
}
