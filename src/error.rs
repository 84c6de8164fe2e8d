//! Error types for chainstate validation
//!
//! Validation failures are routine (adversarial peers) and always come back as a
//! typed rejection of one object. Only [`StoreError`] during an apply/undo is
//! fatal to the engine.

use crate::types::{hash_to_hex, Amount, Hash, OutPoint};
use thiserror::Error;

/// Decode failure: bytes are not the canonical encoding of any object.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of input: {needed} more bytes needed")]
    UnexpectedEof { needed: usize },

    #[error("non-canonical variable-length integer")]
    NonCanonicalVarInt,

    #[error("declared length {0} exceeds remaining input")]
    OversizedLength(u64),

    #[error("{0} trailing bytes after object")]
    TrailingBytes(usize),
}

/// The name the rest of the node uses for decode failures.
pub type MalformedEncoding = DecodeError;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowError {
    #[error("difficulty encoding {0:#010x} expands to a zero target")]
    ZeroTarget(u32),

    #[error("difficulty encoding {0:#010x} overflows 256 bits")]
    Overflow(u32),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("malformed transaction: {0}")]
    Malformed(#[from] DecodeError),

    #[error("transaction has no inputs")]
    NoInputs,

    #[error("transaction has no outputs")]
    NoOutputs,

    #[error("transaction spends {0} more than once")]
    DuplicateInput(OutPoint),

    #[error("output {index} value {value} out of range")]
    ValueOutOfRange { index: usize, value: Amount },

    #[error("total output value out of range")]
    OutputTotalOutOfRange,

    #[error("transaction too large: {0} bytes")]
    Oversized(usize),

    #[error("input {0} references the null outpoint")]
    NullPrevout(usize),

    #[error("coinbase script length {0} out of range")]
    BadCoinbaseScriptLength(usize),

    #[error("input {0} is already spent or unknown")]
    AlreadySpentOrUnknown(OutPoint),

    #[error("input {outpoint} spends a coinbase with only {confirmations} confirmations")]
    ImmatureCoinbase { outpoint: OutPoint, confirmations: u32 },

    #[error("authorization failed for input {input}")]
    AuthorizationFailed { input: usize },

    #[error("value sum overflow")]
    Overflow,

    #[error("outputs ({outputs}) exceed inputs ({inputs})")]
    Underflow { inputs: Amount, outputs: Amount },

    #[error("transaction is not final")]
    NonFinal,

    #[error("input {outpoint} already claimed by mempool transaction {}", hash_to_hex(.spender))]
    Conflict { outpoint: OutPoint, spender: Hash },

    #[error("transaction {} already known", hash_to_hex(.0))]
    AlreadyKnown(Hash),

    #[error("coinbase transactions are only valid in blocks")]
    CoinbaseNotAllowed,

    #[error("mempool is full")]
    PoolFull,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("malformed block: {0}")]
    Malformed(#[from] DecodeError),

    #[error("previous block {} is unknown", hash_to_hex(.0))]
    BadHeaderLink(Hash),

    #[error("header hash does not meet its target")]
    InsufficientWork,

    #[error("bad target: {0}")]
    BadTarget(#[from] PowError),

    #[error("difficulty encoding {got:#010x}, expected {expected:#010x}")]
    BadDifficulty { expected: u32, got: u32 },

    #[error("timestamp {time} not after median time past {median}")]
    TimeTooOld { time: u32, median: u32 },

    #[error("timestamp {time} beyond allowed {limit}")]
    TimeTooNew { time: u32, limit: u32 },

    #[error("block has no transactions")]
    NoTransactions,

    #[error("block too large: {0} bytes")]
    Oversized(usize),

    #[error("commitment root does not match transactions")]
    BadCommitmentRoot,

    #[error("transaction list repeats a subtree (mutated commitment)")]
    MutatedCommitment,

    #[error("bad coinbase: {0}")]
    BadCoinbase(String),

    #[error("outpoint {0} spent twice within the block")]
    InBlockDoubleSpend(OutPoint),

    #[error("block creates {0} while an unspent output already has that reference")]
    DuplicateOutput(OutPoint),

    #[error("transaction {index} invalid: {source}")]
    TxValidationFailed { index: usize, source: TxError },

    #[error("block descends from rejected block {}", hash_to_hex(.0))]
    InvalidAncestor(Hash),

    #[error("block {} was previously rejected: {reason}", hash_to_hex(.hash))]
    PreviouslyRejected { hash: Hash, reason: String },

    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl BlockError {
    /// Whether the failure is a property of the header hash itself and can be
    /// remembered. Body/commitment mismatches are not: the same header may
    /// arrive later with its real transactions.
    pub fn is_permanent(&self) -> bool {
        match self {
            BlockError::Malformed(_)
            | BlockError::BadHeaderLink(_)
            | BlockError::TimeTooNew { .. }
            | BlockError::NoTransactions
            | BlockError::BadCommitmentRoot
            | BlockError::MutatedCommitment
            | BlockError::PreviouslyRejected { .. }
            | BlockError::Chain(_) => false,
            BlockError::InsufficientWork
            | BlockError::BadTarget(_)
            | BlockError::BadDifficulty { .. }
            | BlockError::TimeTooOld { .. }
            | BlockError::Oversized(_)
            | BlockError::BadCoinbase(_)
            | BlockError::InBlockDoubleSpend(_)
            | BlockError::DuplicateOutput(_)
            | BlockError::TxValidationFailed { .. }
            | BlockError::InvalidAncestor(_) => true,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("parent {} is unknown", hash_to_hex(.0))]
    UnknownParent(Hash),

    #[error("fork at height {fork_height} is too far below tip {tip_height}")]
    Stale { fork_height: u32, tip_height: u32 },

    #[error("invalid header {}: {reason}", hash_to_hex(.hash))]
    InvalidHeader { hash: Hash, reason: Box<BlockError> },

    #[error("malformed header: {0}")]
    Malformed(#[from] DecodeError),

    #[error("block data for {} is missing", hash_to_hex(.0))]
    MissingBlockData(Hash),

    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),

    #[error("chain state halted after a storage failure; operator recovery required")]
    Halted,
}

/// Defensive invariant violations of the UTXO store. Reaching one means a
/// validator let through something it should have rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    #[error("outpoint {0} is already spent")]
    AlreadySpent(OutPoint),

    #[error("outpoint {0} already exists")]
    Duplicate(OutPoint),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("utxo conflict: {0}")]
    Conflict(#[from] ConflictError),

    #[error("storage i/o error: {0}")]
    Io(String),
}
