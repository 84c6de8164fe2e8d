//! UTXO store: the spendable-state index
//!
//! An outpoint is present iff the transaction that created it is in the active
//! history and no transaction in that history has spent it. Block transitions
//! go through [`UtxoStore::apply_block_delta`] and
//! [`UtxoStore::undo_block_delta`], each of which checks every precondition
//! before touching anything, so a failed call leaves the store unchanged.

use crate::error::{ConflictError, StoreError};
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Read access to a UTXO set.
pub trait UtxoView {
    fn get(&self, outpoint: &OutPoint) -> Option<UtxoEntry>;

    fn contains(&self, outpoint: &OutPoint) -> bool {
        self.get(outpoint).is_some()
    }
}

/// Mutable UTXO set driven one block transition at a time.
pub trait UtxoStore: UtxoView {
    /// Remove every spent outpoint and insert every created one, or do nothing.
    /// Returns the removed entries so the transition can be undone.
    fn apply_block_delta(&mut self, delta: &BlockDelta) -> Result<UndoData, StoreError>;

    /// Exact inverse of the apply that produced `undo`.
    fn undo_block_delta(&mut self, undo: &UndoData) -> Result<(), StoreError>;
}

/// UTXO changes implied by connecting one block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDelta {
    /// Outpoints consumed from the parent state.
    pub spent: Vec<OutPoint>,
    /// Outputs created and still unspent at the end of the block.
    pub created: Vec<(OutPoint, UtxoEntry)>,
}

impl BlockDelta {
    pub fn is_empty(&self) -> bool {
        self.spent.is_empty() && self.created.is_empty()
    }
}

/// What a block removed from the store, kept alongside the block for disconnects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoData {
    /// Entries the block spent, to be restored.
    pub spent: Vec<(OutPoint, UtxoEntry)>,
    /// Outpoints the block created, to be removed.
    pub created: Vec<OutPoint>,
}

/// Check a delta against `view` without applying it.
fn check_apply<V: UtxoView + ?Sized>(view: &V, delta: &BlockDelta) -> Result<(), ConflictError> {
    let mut spent = HashSet::with_capacity(delta.spent.len());
    for outpoint in &delta.spent {
        if !spent.insert(*outpoint) || !view.contains(outpoint) {
            return Err(ConflictError::AlreadySpent(*outpoint));
        }
    }
    let mut created = HashSet::with_capacity(delta.created.len());
    for (outpoint, _) in &delta.created {
        let exists_after_spends = view.contains(outpoint) && !spent.contains(outpoint);
        if !created.insert(*outpoint) || exists_after_spends {
            return Err(ConflictError::Duplicate(*outpoint));
        }
    }
    Ok(())
}

/// Check an undo against `view` without applying it.
fn check_undo<V: UtxoView + ?Sized>(view: &V, undo: &UndoData) -> Result<(), ConflictError> {
    let mut created = HashSet::with_capacity(undo.created.len());
    for outpoint in &undo.created {
        if !created.insert(*outpoint) || !view.contains(outpoint) {
            return Err(ConflictError::AlreadySpent(*outpoint));
        }
    }
    let mut restored = HashSet::with_capacity(undo.spent.len());
    for (outpoint, _) in &undo.spent {
        let exists_after_removals = view.contains(outpoint) && !created.contains(outpoint);
        if !restored.insert(*outpoint) || exists_after_removals {
            return Err(ConflictError::Duplicate(*outpoint));
        }
    }
    Ok(())
}

/// In-memory UTXO store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryUtxoStore {
    entries: HashMap<OutPoint, UtxoEntry>,
}

impl MemoryUtxoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OutPoint, &UtxoEntry)> {
        self.entries.iter()
    }

    /// Sum of all unspent values.
    pub fn total_value(&self) -> u128 {
        self.entries.values().map(|e| e.value() as u128).sum()
    }
}

impl UtxoView for MemoryUtxoStore {
    fn get(&self, outpoint: &OutPoint) -> Option<UtxoEntry> {
        self.entries.get(outpoint).cloned()
    }

    fn contains(&self, outpoint: &OutPoint) -> bool {
        self.entries.contains_key(outpoint)
    }
}

impl UtxoStore for MemoryUtxoStore {
    fn apply_block_delta(&mut self, delta: &BlockDelta) -> Result<UndoData, StoreError> {
        check_apply(&*self, delta)?;

        let mut undo = UndoData {
            spent: Vec::with_capacity(delta.spent.len()),
            created: Vec::with_capacity(delta.created.len()),
        };
        for outpoint in &delta.spent {
            if let Some(entry) = self.entries.remove(outpoint) {
                undo.spent.push((*outpoint, entry));
            }
        }
        for (outpoint, entry) in &delta.created {
            self.entries.insert(*outpoint, entry.clone());
            undo.created.push(*outpoint);
        }
        Ok(undo)
    }

    fn undo_block_delta(&mut self, undo: &UndoData) -> Result<(), StoreError> {
        check_undo(&*self, undo)?;

        for outpoint in &undo.created {
            self.entries.remove(outpoint);
        }
        for (outpoint, entry) in &undo.spent {
            self.entries.insert(*outpoint, entry.clone());
        }
        Ok(())
    }
}

/// Copy-on-write view over another UTXO view.
///
/// Changes live in a private diff (`None` marks a removal) until the caller
/// takes them; the base is never written. Used to validate a block, or a whole
/// branch of blocks, before committing anything.
pub struct UtxoOverlay<'a, V: UtxoView + ?Sized> {
    base: &'a V,
    changes: HashMap<OutPoint, Option<UtxoEntry>>,
}

impl<'a, V: UtxoView + ?Sized> UtxoOverlay<'a, V> {
    pub fn new(base: &'a V) -> Self {
        Self {
            base,
            changes: HashMap::new(),
        }
    }

    /// Remove and return an entry.
    pub fn spend(&mut self, outpoint: &OutPoint) -> Option<UtxoEntry> {
        let entry = self.get(outpoint)?;
        self.changes.insert(*outpoint, None);
        Some(entry)
    }

    pub fn add(&mut self, outpoint: OutPoint, entry: UtxoEntry) {
        self.changes.insert(outpoint, Some(entry));
    }

    pub fn is_modified(&self) -> bool {
        !self.changes.is_empty()
    }
}

impl<V: UtxoView + ?Sized> UtxoView for UtxoOverlay<'_, V> {
    fn get(&self, outpoint: &OutPoint) -> Option<UtxoEntry> {
        match self.changes.get(outpoint) {
            Some(change) => change.clone(),
            None => self.base.get(outpoint),
        }
    }
}

impl<V: UtxoView + ?Sized> UtxoStore for UtxoOverlay<'_, V> {
    fn apply_block_delta(&mut self, delta: &BlockDelta) -> Result<UndoData, StoreError> {
        check_apply(&*self, delta)?;

        let mut undo = UndoData::default();
        for outpoint in &delta.spent {
            if let Some(entry) = self.spend(outpoint) {
                undo.spent.push((*outpoint, entry));
            }
        }
        for (outpoint, entry) in &delta.created {
            self.add(*outpoint, entry.clone());
            undo.created.push(*outpoint);
        }
        Ok(undo)
    }

    fn undo_block_delta(&mut self, undo: &UndoData) -> Result<(), StoreError> {
        check_undo(&*self, undo)?;

        for outpoint in &undo.created {
            self.changes.insert(*outpoint, None);
        }
        for (outpoint, entry) in &undo.spent {
            self.add(*outpoint, entry.clone());
        }
        Ok(())
    }
}
