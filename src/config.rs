//! Chain parameters and engine configuration.

use crate::constants::*;
use crate::economic::validate_supply_limit;
use crate::merkle::merkle_root;
use crate::hashing::txid;
use crate::pow::{expand_target, target_is_zero};
use crate::types::*;
use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Consensus parameters of one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    /// Human-readable chain name.
    pub network: String,
    /// Designated first block. Its header is trusted without a proof-of-work check.
    pub genesis: Block,
    /// Easiest allowed difficulty encoding.
    pub pow_limit_bits: u32,
    /// Blocks per difficulty period.
    pub retarget_interval: u32,
    /// Intended seconds between blocks.
    pub target_spacing: u32,
    /// Keep the parent's difficulty forever (test chains).
    pub no_retargeting: bool,
    pub subsidy_halving_interval: u32,
    pub initial_subsidy: Amount,
    pub coinbase_maturity: u32,
    /// Seconds a header timestamp may run ahead of the local clock.
    pub max_future_block_time: u32,
}

impl ChainParams {
    /// Expected duration of one difficulty period, in seconds. Saturates for
    /// parameters that [`ChainParams::validate`] would refuse.
    pub fn target_timespan(&self) -> u32 {
        self.retarget_interval.saturating_mul(self.target_spacing)
    }

    /// Reject parameter sets the consensus arithmetic cannot work with.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.retarget_interval > 0, "retarget_interval must be positive");
        ensure!(self.target_spacing > 0, "target_spacing must be positive");
        ensure!(
            self.retarget_interval.checked_mul(self.target_spacing).is_some(),
            "retarget_interval * target_spacing overflows: {} * {}",
            self.retarget_interval,
            self.target_spacing
        );
        ensure!(
            self.subsidy_halving_interval > 0,
            "subsidy_halving_interval must be positive"
        );
        let limit = expand_target(self.pow_limit_bits)
            .with_context(|| format!("Invalid pow_limit_bits {:#010x}", self.pow_limit_bits))?;
        ensure!(
            !target_is_zero(&limit),
            "pow_limit_bits {:#010x} expands to a zero target",
            self.pow_limit_bits
        );
        ensure!(
            validate_supply_limit(Height::MAX, self),
            "subsidy schedule exceeds the money supply"
        );
        Ok(())
    }

    /// Production parameters with the 2009 genesis block.
    pub fn production() -> Self {
        let coinbase = Transaction {
            version: 1,
            inputs: vec![TransactionInput {
                prevout: OutPoint::null(),
                script_sig: decode_constant(
                    "04ffff001d0104455468652054696d65732030332f4a616e2f32303039204368616e63656c6c6f72206f6e206272696e6b206f66207365636f6e64206261696c6f757420666f722062616e6b73",
                ),
                sequence: SEQUENCE_FINAL,
            }],
            outputs: vec![TransactionOutput {
                value: INITIAL_SUBSIDY,
                script_pubkey: decode_constant(
                    "4104678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5fac",
                ),
            }],
            lock_time: 0,
        };
        let genesis = Block {
            header: BlockHeader {
                version: 1,
                prev_block_hash: [0; 32],
                merkle_root: txid(&coinbase),
                timestamp: 1231006505,
                bits: MAX_TARGET,
                nonce: 2083236893,
            },
            transactions: vec![coinbase],
        };
        Self {
            network: "production".to_string(),
            genesis,
            pow_limit_bits: MAX_TARGET,
            retarget_interval: DIFFICULTY_ADJUSTMENT_INTERVAL,
            target_spacing: TARGET_TIME_PER_BLOCK,
            no_retargeting: false,
            subsidy_halving_interval: HALVING_INTERVAL,
            initial_subsidy: INITIAL_SUBSIDY,
            coinbase_maturity: COINBASE_MATURITY,
            max_future_block_time: MAX_FUTURE_BLOCK_TIME,
        }
    }

    /// Regression-test parameters: trivial difficulty, no retargeting and an
    /// anyone-can-spend genesis output.
    pub fn regtest() -> Self {
        let coinbase = Transaction {
            version: 1,
            inputs: vec![TransactionInput {
                prevout: OutPoint::null(),
                script_sig: b"\x00regtest genesis".to_vec(),
                sequence: SEQUENCE_FINAL,
            }],
            outputs: vec![TransactionOutput {
                value: INITIAL_SUBSIDY,
                script_pubkey: vec![0x00],
            }],
            lock_time: 0,
        };
        let genesis = Block {
            header: BlockHeader {
                version: 1,
                prev_block_hash: [0; 32],
                merkle_root: merkle_root(&[txid(&coinbase)]),
                timestamp: 1_296_688_602,
                bits: REGTEST_MAX_TARGET,
                nonce: 0,
            },
            transactions: vec![coinbase],
        };
        Self {
            network: "regtest".to_string(),
            genesis,
            pow_limit_bits: REGTEST_MAX_TARGET,
            retarget_interval: DIFFICULTY_ADJUSTMENT_INTERVAL,
            target_spacing: TARGET_TIME_PER_BLOCK,
            no_retargeting: true,
            subsidy_halving_interval: 150,
            initial_subsidy: INITIAL_SUBSIDY,
            coinbase_maturity: COINBASE_MATURITY,
            max_future_block_time: MAX_FUTURE_BLOCK_TIME,
        }
    }
}

fn decode_constant(s: &str) -> Vec<u8> {
    hex::decode(s).expect("hex constant is valid")
}

/// Mempool limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MempoolConfig {
    /// Maximum number of transactions held at once.
    pub max_transactions: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_transactions: 50_000,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub chain: ChainParams,
    #[serde(default)]
    pub mempool: MempoolConfig,
    /// Deepest fork below the best tip a new header may attach to.
    #[serde(default = "default_max_reorg_depth")]
    pub max_reorg_depth: u32,
}

fn default_max_reorg_depth() -> u32 {
    1_000
}

impl EngineConfig {
    pub fn new(chain: ChainParams) -> Self {
        Self {
            chain,
            mempool: MempoolConfig::default(),
            max_reorg_depth: default_max_reorg_depth(),
        }
    }

    pub fn regtest() -> Self {
        Self::new(ChainParams::regtest())
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).context("Failed to parse engine configuration")?;
        config
            .chain
            .validate()
            .with_context(|| format!("Invalid chain parameters for {}", config.chain.network))?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_json_str(&contents)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize engine configuration")
    }
}
