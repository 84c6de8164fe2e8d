//! Monetary schedule: block subsidy and supply

use crate::config::ChainParams;
use crate::constants::*;
use crate::types::*;

/// GetBlockSubsidy: ℕ → ℕ₆₄
///
/// The subsidy halves every `subsidy_halving_interval` blocks and is zero
/// after 64 halvings.
///
/// Formula: subsidy = S₀ ≫ ⌊h / H⌋
pub fn get_block_subsidy(height: Height, params: &ChainParams) -> Amount {
    let halvings = height / params.subsidy_halving_interval.max(1);
    if halvings >= 64 {
        return 0;
    }
    params.initial_subsidy >> halvings
}

/// TotalSupply: ℕ → ℕ₆₄
///
/// Sum of all subsidies from genesis through `height`, computed per halving
/// era rather than per block.
pub fn total_supply(height: Height, params: &ChainParams) -> Amount {
    let interval = params.subsidy_halving_interval.max(1) as u64;
    let blocks = height as u64 + 1;
    let mut total = 0u64;
    let mut era = 0u64;
    while era * interval < blocks && era < 64 {
        let era_blocks = (blocks - era * interval).min(interval);
        total = total.saturating_add(era_blocks.saturating_mul(params.initial_subsidy >> era));
        era += 1;
    }
    total
}

/// Coinbase outputs may claim at most subsidy plus fees.
pub fn max_coinbase_value(height: Height, fees: Amount, params: &ChainParams) -> Option<Amount> {
    get_block_subsidy(height, params).checked_add(fees)
}

pub fn validate_supply_limit(height: Height, params: &ChainParams) -> bool {
    total_supply(height, params) <= MAX_MONEY
}
