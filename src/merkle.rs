//! Merkle commitment over an ordered list of digests
//!
//! Each level pairs adjacent digests and hashes their concatenation. An odd
//! level duplicates its last element first. That duplication lets two
//! different transaction lists share a root (`[A,B,C]` and `[A,B,C,C]`), so
//! [`merkle_root_checked`] reports when a level pairs identical digests and
//! block validation rejects such lists.

use crate::hashing::hash_pair;
use crate::types::Hash;

/// ComputeMerkleRoot: ℍ* → ℍ
///
/// The empty list commits to the all-zero digest. Real blocks never hit this
/// since the coinbase is always present.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    merkle_root_checked(leaves).0
}

/// Root plus a flag telling whether any level hashed two identical siblings.
pub fn merkle_root_checked(leaves: &[Hash]) -> (Hash, bool) {
    if leaves.is_empty() {
        return ([0u8; 32], false);
    }

    let mut level = leaves.to_vec();
    let mut mutated = false;
    while level.len() > 1 {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = match pair.get(1) {
                Some(right) => {
                    if right == left {
                        mutated = true;
                    }
                    right
                }
                None => left,
            };
            next.push(hash_pair(left, right));
        }
        level = next;
    }
    (level[0], mutated)
}

/// Sibling digests from the leaf at `index` up to (not including) the root.
///
/// Returns an empty branch for an out-of-range index.
pub fn merkle_branch(leaves: &[Hash], mut index: usize) -> Vec<Hash> {
    let mut branch = Vec::new();
    if index >= leaves.len() {
        return branch;
    }

    let mut level = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = level[level.len() - 1];
            level.push(last);
        }
        branch.push(level[index ^ 1]);
        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
        index /= 2;
    }
    branch
}

/// Fold a branch back up to a root. Bit `i` of `index` says whether the running
/// digest is the left (0) or right (1) child at level `i`.
pub fn verify_branch(leaf: &Hash, branch: &[Hash], mut index: u64) -> Hash {
    let mut current = *leaf;
    for sibling in branch {
        current = if index & 1 == 0 {
            hash_pair(&current, sibling)
        } else {
            hash_pair(sibling, &current)
        };
        index >>= 1;
    }
    current
}
