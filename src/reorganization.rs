//! Chain reorganization planning
//!
//! A reorganization is two explicit ordered lists built by walking parent
//! links back to the common ancestor: blocks to disconnect (tip first) and
//! blocks to connect (oldest first). Walks are iterative.

use crate::chain::ChainIndex;
use crate::types::*;

/// Reorganization: When a chain with more work is found
///
/// For active tip t and candidate c with common ancestor f:
/// 1. disconnect = [t, parent(t), ..., child(f)]
/// 2. connect    = [child(f), ..., parent(c), c] on the candidate branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgPlan {
    pub fork: Hash,
    pub fork_height: Height,
    /// Active blocks to disconnect, most recent first.
    pub disconnect: Vec<Hash>,
    /// Candidate-branch blocks to connect, oldest first.
    pub connect: Vec<(Hash, Height)>,
}

impl ReorgPlan {
    /// Plain extension of the current tip.
    pub fn is_extension(&self) -> bool {
        self.disconnect.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.disconnect.len()
    }
}

/// Plan the switch from the active chain to `candidate`.
///
/// Returns `None` if `candidate` is unknown or its ancestry is broken.
pub fn plan_reorg(index: &ChainIndex, candidate: &Hash) -> Option<ReorgPlan> {
    let mut connect = Vec::new();
    let mut cursor = index.get(candidate)?;
    while !index.is_active(&cursor.hash) {
        connect.push((cursor.hash, cursor.height));
        cursor = index.get(cursor.parent())?;
    }
    connect.reverse();

    let fork = cursor.hash;
    let fork_height = cursor.height;
    let disconnect = ((fork_height + 1)..=index.height())
        .rev()
        .filter_map(|height| index.hash_at(height))
        .collect();

    Some(ReorgPlan {
        fork,
        fork_height,
        disconnect,
        connect,
    })
}

/// Work comparison deciding whether `candidate` should replace the tip.
pub fn should_reorganize(index: &ChainIndex, candidate: &Hash) -> bool {
    match index.get(candidate) {
        Some(entry) => entry.chain_work > index.tip().chain_work,
        None => false,
    }
}
