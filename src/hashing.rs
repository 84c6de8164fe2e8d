//! Digest primitive and object identifiers
//!
//! Identifiers are `SHA256(SHA256(canonical bytes))`. A single diverging byte
//! in the encoding diverges every identifier downstream.

use crate::encoding::serialize;
use crate::types::*;
use sha2::{Digest, Sha256};

/// Double SHA256.
pub fn sha256d(data: &[u8]) -> Hash {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&second);
    hash
}

/// Transaction identifier.
pub fn txid(tx: &Transaction) -> Hash {
    sha256d(&serialize(tx))
}

/// Header digest, which is also the block identifier.
pub fn block_hash(header: &BlockHeader) -> Hash {
    sha256d(&serialize(header))
}

/// Merkle interior node: digest of the two children concatenated.
pub fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(left);
    data[32..].copy_from_slice(right);
    sha256d(&data)
}
