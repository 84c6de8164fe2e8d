//! Header arena and active chain
//!
//! Every known header lives in one map keyed by its hash, with the parent
//! hash as the only back-link. The active chain is a height-indexed list of
//! hashes. Rejections are remembered by hash.

use crate::block::{check_header_time, check_header_work, median_time, HeaderContext};
use crate::config::ChainParams;
use crate::constants::MEDIAN_TIME_SPAN;
use crate::error::{BlockError, ChainError, PowError};
use crate::hashing::{block_hash, txid};
use crate::pow::{block_work, calculate_next_work_required, is_retarget_height};
use crate::types::*;
use num_bigint::BigUint;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Validation state of a known block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockStatus {
    /// Header passed its checks; the body is missing or not yet connected.
    HeaderValid,
    /// Body was connected once, but the block is not on the best chain.
    SideChain,
    /// On the best chain.
    BestChain,
    Rejected(String),
}

#[derive(Debug, Clone)]
pub struct HeaderEntry {
    pub hash: Hash,
    pub header: BlockHeader,
    pub height: Height,
    /// Cumulative work from genesis through this header.
    pub chain_work: BigUint,
    /// Arrival order, used to break work ties in favor of the first seen.
    pub sequence: u64,
    pub has_body: bool,
    pub fully_validated: bool,
}

impl HeaderEntry {
    pub fn parent(&self) -> &Hash {
        &self.header.prev_block_hash
    }
}

pub struct ChainIndex {
    entries: HashMap<Hash, HeaderEntry>,
    children: HashMap<Hash, Vec<Hash>>,
    active: Vec<Hash>,
    rejected: HashMap<Hash, String>,
    /// Stored bodies not yet connected.
    pending: HashSet<Hash>,
    /// Active-chain transaction id to the heights containing it, lowest
    /// first. A repeated coinbase id appears once per block that carries it.
    tx_index: HashMap<Hash, Vec<Height>>,
    next_sequence: u64,
}

impl ChainIndex {
    /// Index containing only the genesis block, which is trusted as given.
    pub fn new(genesis: &Block) -> Self {
        let hash = block_hash(&genesis.header);
        let entry = HeaderEntry {
            hash,
            header: genesis.header.clone(),
            height: 0,
            chain_work: block_work(genesis.header.bits),
            sequence: 0,
            has_body: true,
            fully_validated: true,
        };
        let mut index = Self {
            entries: HashMap::new(),
            children: HashMap::new(),
            active: vec![hash],
            rejected: HashMap::new(),
            pending: HashSet::new(),
            tx_index: HashMap::new(),
            next_sequence: 1,
        };
        index.entries.insert(hash, entry);
        index.index_transactions(genesis, 0);
        index
    }

    pub fn get(&self, hash: &Hash) -> Option<&HeaderEntry> {
        self.entries.get(hash)
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tip_hash(&self) -> Hash {
        self.active[self.active.len() - 1]
    }

    pub fn tip(&self) -> &HeaderEntry {
        &self.entries[&self.tip_hash()]
    }

    pub fn height(&self) -> Height {
        (self.active.len() - 1) as Height
    }

    /// Active-chain block at `height`.
    pub fn hash_at(&self, height: Height) -> Option<Hash> {
        self.active.get(height as usize).copied()
    }

    pub fn is_active(&self, hash: &Hash) -> bool {
        match self.entries.get(hash) {
            Some(entry) => self.hash_at(entry.height) == Some(*hash),
            None => false,
        }
    }

    pub fn status(&self, hash: &Hash) -> Option<BlockStatus> {
        if let Some(reason) = self.rejected.get(hash) {
            return Some(BlockStatus::Rejected(reason.clone()));
        }
        let entry = self.entries.get(hash)?;
        Some(if self.is_active(hash) {
            BlockStatus::BestChain
        } else if entry.fully_validated {
            BlockStatus::SideChain
        } else {
            BlockStatus::HeaderValid
        })
    }

    pub fn rejection(&self, hash: &Hash) -> Option<&str> {
        self.rejected.get(hash).map(String::as_str)
    }

    /// Latest active-chain height containing `txid`.
    pub fn tx_height(&self, txid: &Hash) -> Option<Height> {
        self.tx_index.get(txid).and_then(|heights| heights.last().copied())
    }

    /// Ancestor of `hash` at `height`, walking parent links.
    pub fn ancestor(&self, hash: &Hash, height: Height) -> Option<&HeaderEntry> {
        let mut entry = self.entries.get(hash)?;
        if height > entry.height {
            return None;
        }
        if self.is_active(hash) {
            return self.hash_at(height).and_then(|h| self.entries.get(&h));
        }
        while entry.height > height {
            entry = self.entries.get(entry.parent())?;
        }
        Some(entry)
    }

    /// Median timestamp of `hash` and up to ten of its ancestors.
    pub fn median_time_past(&self, hash: &Hash) -> u32 {
        let mut timestamps = Vec::with_capacity(MEDIAN_TIME_SPAN);
        let mut cursor = self.entries.get(hash);
        while let Some(entry) = cursor {
            timestamps.push(entry.header.timestamp);
            if timestamps.len() == MEDIAN_TIME_SPAN || entry.height == 0 {
                break;
            }
            cursor = self.entries.get(entry.parent());
        }
        median_time(&timestamps)
    }

    /// Difficulty encoding required of a child of `parent`.
    pub fn next_work_required(&self, parent: &Hash, params: &ChainParams) -> Result<u32, PowError> {
        let entry = match self.entries.get(parent) {
            Some(entry) => entry,
            None => return Ok(params.pow_limit_bits),
        };
        let height = entry.height + 1;
        if !is_retarget_height(height, params) {
            return Ok(entry.header.bits);
        }
        let first_height = height.saturating_sub(params.retarget_interval);
        let first = match self.ancestor(parent, first_height) {
            Some(first) => first,
            None => return Ok(entry.header.bits),
        };
        let actual = entry.header.timestamp as i64 - first.header.timestamp as i64;
        calculate_next_work_required(entry.header.bits, actual, params)
    }

    /// Walk back from `hash` to the nearest active-chain block.
    pub fn fork_point(&self, hash: &Hash) -> Option<&HeaderEntry> {
        let mut entry = self.entries.get(hash)?;
        while !self.is_active(&entry.hash) {
            entry = self.entries.get(entry.parent())?;
        }
        Some(entry)
    }

    /// HeaderValid transition for one header.
    ///
    /// Known headers are accepted again without work. No failure is cached
    /// under a header's hash until it carries the difficulty its parent
    /// requires and meets it. An unknown parent is never cached, since the
    /// parent may still arrive.
    pub fn accept_header(
        &mut self,
        header: &BlockHeader,
        now: u32,
        params: &ChainParams,
        max_reorg_depth: u32,
    ) -> Result<Hash, BlockError> {
        let hash = block_hash(header);
        if let Some(reason) = self.rejected.get(&hash) {
            return Err(BlockError::PreviouslyRejected {
                hash,
                reason: reason.clone(),
            });
        }
        if self.entries.contains_key(&hash) {
            return Ok(hash);
        }

        let parent_hash = header.prev_block_hash;
        let (height, parent_work) = match self.entries.get(&parent_hash) {
            Some(parent) => (parent.height + 1, parent.chain_work.clone()),
            None if self.rejected.contains_key(&parent_hash) => {
                return Err(BlockError::InvalidAncestor(parent_hash));
            }
            None => return Err(BlockError::BadHeaderLink(parent_hash)),
        };

        check_header_work(header, self.next_work_required(&parent_hash, params)?)?;

        if self.rejected.contains_key(&parent_hash) {
            let err = BlockError::InvalidAncestor(parent_hash);
            self.reject(hash, &err);
            return Err(err);
        }

        if let Some(fork) = self.fork_point(&parent_hash) {
            let tip_height = self.height();
            if tip_height.saturating_sub(fork.height) > max_reorg_depth {
                return Err(ChainError::Stale {
                    fork_height: fork.height,
                    tip_height,
                }
                .into());
            }
        }

        let ctx = HeaderContext {
            expected_bits: header.bits,
            median_time_past: self.median_time_past(&parent_hash),
            now,
            max_future_block_time: params.max_future_block_time,
        };
        if let Err(err) = check_header_time(header, &ctx) {
            if err.is_permanent() {
                self.reject(hash, &err);
            }
            return Err(err);
        }

        let chain_work = parent_work + block_work(header.bits);
        let entry = HeaderEntry {
            hash,
            header: header.clone(),
            height,
            chain_work,
            sequence: self.next_sequence,
            has_body: false,
            fully_validated: false,
        };
        self.next_sequence += 1;
        self.entries.insert(hash, entry);
        self.children.entry(parent_hash).or_default().push(hash);
        debug!(hash = %hash_to_hex(&hash), height, "Accepted header");
        Ok(hash)
    }

    /// Remember a rejection. Only call with errors for which
    /// [`BlockError::is_permanent`] holds.
    pub fn reject(&mut self, hash: Hash, err: &BlockError) {
        self.pending.remove(&hash);
        self.rejected.insert(hash, err.to_string());
    }

    /// Reject every known descendant of `hash`.
    pub fn reject_descendants(&mut self, hash: &Hash) {
        let mut stack = vec![*hash];
        while let Some(current) = stack.pop() {
            if let Some(children) = self.children.get(&current).cloned() {
                for child in children {
                    if !self.rejected.contains_key(&child) {
                        self.reject(child, &BlockError::InvalidAncestor(current));
                    }
                    stack.push(child);
                }
            }
        }
    }

    /// Record that the body of `hash` is stored and awaiting connection.
    pub fn mark_body_stored(&mut self, hash: &Hash) {
        if let Some(entry) = self.entries.get_mut(hash) {
            entry.has_body = true;
            if !entry.fully_validated {
                self.pending.insert(*hash);
            }
        }
    }

    /// Most-work chain that could replace the active one: a pending block
    /// whose whole path back to a fully validated ancestor has bodies and
    /// whose work exceeds the tip's. Ties go to the first seen.
    pub fn best_candidate(&self) -> Option<Hash> {
        let tip_work = &self.tip().chain_work;
        let mut best: Option<&HeaderEntry> = None;
        for hash in &self.pending {
            let entry = &self.entries[hash];
            if entry.chain_work <= *tip_work || !self.is_connectable(hash) {
                continue;
            }
            let better = match best {
                None => true,
                Some(b) => {
                    entry.chain_work > b.chain_work
                        || (entry.chain_work == b.chain_work && entry.sequence < b.sequence)
                }
            };
            if better {
                best = Some(entry);
            }
        }
        best.map(|e| e.hash)
    }

    /// Whether every block from `hash` back to the active chain has a body
    /// and none is rejected.
    pub fn is_connectable(&self, hash: &Hash) -> bool {
        let mut cursor = self.entries.get(hash);
        while let Some(entry) = cursor {
            if self.rejected.contains_key(&entry.hash) || !entry.has_body {
                return false;
            }
            if entry.fully_validated && self.is_active(&entry.hash) {
                return true;
            }
            cursor = self.entries.get(entry.parent());
        }
        false
    }

    /// Extend the active chain by `block`, whose parent must be the tip.
    pub fn connect_tip(&mut self, hash: &Hash, block: &Block) {
        let height = self.active.len() as Height;
        self.active.push(*hash);
        self.pending.remove(hash);
        if let Some(entry) = self.entries.get_mut(hash) {
            entry.fully_validated = true;
        }
        self.index_transactions(block, height);
    }

    /// Remove the tip block from the active chain.
    pub fn disconnect_tip(&mut self, block: &Block) {
        if self.active.len() <= 1 {
            return;
        }
        self.active.pop();
        for tx in &block.transactions {
            let id = txid(tx);
            if let Some(heights) = self.tx_index.get_mut(&id) {
                heights.pop();
                if heights.is_empty() {
                    self.tx_index.remove(&id);
                }
            }
        }
    }

    fn index_transactions(&mut self, block: &Block, height: Height) {
        for tx in &block.transactions {
            self.tx_index.entry(txid(tx)).or_default().push(height);
        }
    }
}
