//! Block storage collaborator
//!
//! Append-only persistence of accepted headers, block bodies and the undo
//! records needed to disconnect them. Records are keyed by header hash.
//! Implementations must be crash-consistent at the granularity of one call.

use crate::encoding::{deserialize, serialize};
use crate::error::StoreError;
use crate::types::*;
use crate::utxo::UndoData;
use std::collections::HashMap;

pub trait BlockStorage {
    fn persist_header(&mut self, hash: &Hash, header: &BlockHeader) -> Result<(), StoreError>;

    fn persist_block_body(&mut self, hash: &Hash, block: &Block) -> Result<(), StoreError>;

    fn load_header(&self, hash: &Hash) -> Result<Option<BlockHeader>, StoreError>;

    fn load_block_body(&self, hash: &Hash) -> Result<Option<Block>, StoreError>;

    fn persist_undo(&mut self, hash: &Hash, undo: &UndoData) -> Result<(), StoreError>;

    fn load_undo(&self, hash: &Hash) -> Result<Option<UndoData>, StoreError>;
}

/// In-memory storage holding the same bytes a disk backend would write:
/// canonical encodings for headers and blocks, JSON for undo records.
#[derive(Debug, Default)]
pub struct MemoryBlockStorage {
    headers: HashMap<Hash, Vec<u8>>,
    blocks: HashMap<Hash, Vec<u8>>,
    undo: HashMap<Hash, Vec<u8>>,
}

impl MemoryBlockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

fn corrupt(kind: &str, hash: &Hash, err: impl std::fmt::Display) -> StoreError {
    StoreError::Io(format!("corrupt {} record {}: {}", kind, hash_to_hex(hash), err))
}

impl BlockStorage for MemoryBlockStorage {
    fn persist_header(&mut self, hash: &Hash, header: &BlockHeader) -> Result<(), StoreError> {
        self.headers.entry(*hash).or_insert_with(|| serialize(header));
        Ok(())
    }

    fn persist_block_body(&mut self, hash: &Hash, block: &Block) -> Result<(), StoreError> {
        self.blocks.entry(*hash).or_insert_with(|| serialize(block));
        Ok(())
    }

    fn load_header(&self, hash: &Hash) -> Result<Option<BlockHeader>, StoreError> {
        self.headers
            .get(hash)
            .map(|bytes| deserialize(bytes).map_err(|e| corrupt("header", hash, e)))
            .transpose()
    }

    fn load_block_body(&self, hash: &Hash) -> Result<Option<Block>, StoreError> {
        self.blocks
            .get(hash)
            .map(|bytes| deserialize(bytes).map_err(|e| corrupt("block", hash, e)))
            .transpose()
    }

    fn persist_undo(&mut self, hash: &Hash, undo: &UndoData) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(undo).map_err(|e| corrupt("undo", hash, e))?;
        self.undo.insert(*hash, bytes);
        Ok(())
    }

    fn load_undo(&self, hash: &Hash) -> Result<Option<UndoData>, StoreError> {
        self.undo
            .get(hash)
            .map(|bytes| serde_json::from_slice(bytes).map_err(|e| corrupt("undo", hash, e)))
            .transpose()
    }
}
