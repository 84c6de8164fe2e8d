//! # UTXO Chainstate
//!
//! Chainstate and block-acceptance engine of a UTXO ledger node.
//!
//! The crate turns incoming bytes (transactions, headers, full blocks) into a
//! validated, append-only history plus the derived set of currently spendable
//! outputs. Independent nodes running it compute identical identifiers, accept
//! and reject the same objects and converge on the same best chain.
//!
//! ## Architecture
//!
//! Components, leaves first:
//! - Canonical codec and digest ([`encoding`], [`hashing`])
//! - Difficulty/target codec ([`pow`])
//! - Merkle engine ([`merkle`])
//! - UTXO store ([`utxo`])
//! - Transaction validator ([`transaction`], authorization in [`script`])
//! - Block validator and chain selector ([`block`], [`chain`],
//!   [`reorganization`], [`chainstate`])
//! - Mempool ([`mempool`])
//!
//! ## Design Principles
//!
//! 1. **Single owner**: all chain mutation goes through [`ChainState`]
//! 2. **Atomic transitions**: readers see either the old tip or the new one
//! 3. **Exact Version Pinning**: consensus-critical dependencies are pinned
//! 4. **Typed rejections**: invalid network input never panics
//!
//! ## Usage
//!
//! ```rust
//! use utxo_chainstate::{ChainState, EngineConfig};
//!
//! let state = ChainState::in_memory(EngineConfig::regtest()).unwrap();
//! assert_eq!(state.best_height(), 0);
//! assert_eq!(state.mempool_len(), 0);
//! ```

pub mod types;
pub mod constants;
pub mod error;
pub mod config;
pub mod encoding;
pub mod hashing;
pub mod pow;
pub mod merkle;
pub mod utxo;
pub mod script;
pub mod transaction;
pub mod block;
pub mod economic;
pub mod chain;
pub mod reorganization;
pub mod storage;
pub mod mempool;
pub mod mining;
pub mod chainstate;

// Re-export commonly used types
pub use types::*;
pub use constants::*;
pub use error::{
    BlockError, ChainError, ConflictError, DecodeError, MalformedEncoding, PowError, StoreError,
    TxError,
};
pub use config::{ChainParams, EngineConfig, MempoolConfig};
pub use encoding::{deserialize, serialize, Decodable, Encodable};
pub use hashing::{block_hash, sha256d, txid};
pub use chain::BlockStatus;
pub use chainstate::{AcceptanceOutcome, ChainListener, ChainState};
pub use script::{Authorization, SigningContext, TagDispatch};
pub use storage::{BlockStorage, MemoryBlockStorage};
pub use utxo::{BlockDelta, MemoryUtxoStore, UndoData, UtxoOverlay, UtxoStore, UtxoView};
