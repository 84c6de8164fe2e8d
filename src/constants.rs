//! Consensus constants

/// Maximum money supply: 21,000,000 coins in base units
pub const MAX_MONEY: u64 = 21_000_000 * COIN;

/// Base units per coin
pub const COIN: u64 = 100_000_000;

/// Maximum serialized transaction size: 1MB
pub const MAX_TX_SIZE: usize = 1_000_000;

/// Maximum serialized block size: 4MB
pub const MAX_BLOCK_SIZE: usize = 4_000_000;

/// Coinbase script_sig length bounds
pub const MIN_COINBASE_SCRIPT_SIZE: usize = 2;
pub const MAX_COINBASE_SCRIPT_SIZE: usize = 100;

/// Maximum script length
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Maximum stack size during script execution
pub const MAX_STACK_SIZE: usize = 1000;

/// Maximum number of operations in script
pub const MAX_SCRIPT_OPS: usize = 201;

/// Maximum size of a single pushed stack element
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;

/// Halving interval: 210,000 blocks
pub const HALVING_INTERVAL: u32 = 210_000;

/// Initial block subsidy: 50 coins
pub const INITIAL_SUBSIDY: u64 = 50 * COIN;

/// Blocks a coinbase output must wait before being spent
pub const COINBASE_MATURITY: u32 = 100;

/// Difficulty adjustment interval: 2016 blocks
pub const DIFFICULTY_ADJUSTMENT_INTERVAL: u32 = 2016;

/// Target time per block: 10 minutes
pub const TARGET_TIME_PER_BLOCK: u32 = 600;

/// Easiest target allowed on the production chain
pub const MAX_TARGET: u32 = 0x1d00ffff;

/// Easiest target allowed on regression-test chains
pub const REGTEST_MAX_TARGET: u32 = 0x207fffff;

/// Number of ancestors whose median timestamp bounds a new header from below
pub const MEDIAN_TIME_SPAN: usize = 11;

/// How far past wall-clock time a header timestamp may be (seconds)
pub const MAX_FUTURE_BLOCK_TIME: u32 = 2 * 60 * 60;

/// Lock time threshold: lock times below this are block heights
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Sequence number for final input
pub const SEQUENCE_FINAL: u32 = 0xffffffff;
