//! The chainstate engine
//!
//! [`ChainState`] owns the header index, the UTXO store and block storage
//! behind a single `RwLock`, plus the mempool behind its own `Mutex`. Lock
//! order is always chain then mempool.
//!
//! Block processing holds an upgradable read lock: other writers are
//! excluded while readers continue. Candidate branches are validated on a
//! [`UtxoOverlay`] and the lock is upgraded to a write lock only to commit
//! the undo/apply sequence, so a reader sees either the old tip or the new
//! one. A storage failure during that commit halts the engine.

use crate::block::{check_block, connect_block};
use crate::chain::{BlockStatus, ChainIndex};
use crate::config::{ChainParams, EngineConfig};
use crate::economic::get_block_subsidy;
use crate::encoding::deserialize;
use crate::error::{BlockError, ChainError, StoreError, TxError};
use crate::hashing::block_hash;
use crate::mempool::Mempool;
use crate::mining::{assemble_block, create_coinbase_transaction};
use crate::reorganization::{plan_reorg, should_reorganize};
use crate::constants::MAX_BLOCK_SIZE;
use crate::script::{Authorization, TagDispatch};
use crate::storage::{BlockStorage, MemoryBlockStorage};
use crate::types::*;
use crate::utxo::{BlockDelta, MemoryUtxoStore, UndoData, UtxoOverlay, UtxoStore};
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Notifications for the transport layer. Called after all locks are released.
pub trait ChainListener: Send + Sync {
    fn on_transaction_accepted(&self, _txid: &Hash) {}

    fn on_block_accepted(&self, _hash: &Hash, _is_new_tip: bool) {}

    fn on_reorg(&self, _disconnected: &[Hash], _connected: &[Hash]) {}
}

/// Where a submitted block ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptanceOutcome {
    /// On the best chain at `height`; `disconnected` blocks were reorganized out.
    BestChain { height: Height, disconnected: usize },
    /// Stored on a branch with no more work than the best chain.
    SideChain,
    /// Stored; connects once the missing ancestor bodies arrive.
    AwaitingParent,
    /// Body already known.
    Duplicate,
}

struct ChainInner<S, B> {
    index: ChainIndex,
    utxo: S,
    storage: B,
}

/// Result of validating one candidate branch on an overlay.
struct BranchValidation {
    disconnect: Vec<(Hash, Block, UndoData)>,
    connect: Vec<(Hash, Block, BlockDelta)>,
    failure: Option<(Hash, BlockError)>,
}

/// Effects of one block submission, reported once locks are released.
#[derive(Default)]
struct Activation {
    disconnected: Vec<Hash>,
    disconnected_blocks: Vec<Block>,
    connected: Vec<Hash>,
    failures: Vec<(Hash, BlockError)>,
}

impl Activation {
    fn moved_tip(&self) -> bool {
        !self.connected.is_empty() || !self.disconnected.is_empty()
    }
}

pub struct ChainState<S: UtxoStore, B: BlockStorage> {
    config: EngineConfig,
    inner: RwLock<ChainInner<S, B>>,
    mempool: Mutex<Mempool>,
    listeners: RwLock<Vec<Arc<dyn ChainListener>>>,
    authorizer: Box<dyn Authorization>,
    halted: AtomicBool,
}

fn unix_time() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().min(u32::MAX as u64) as u32)
        .unwrap_or(0)
}

impl ChainState<MemoryUtxoStore, MemoryBlockStorage> {
    /// Engine over in-memory UTXO and block storage.
    pub fn in_memory(config: EngineConfig) -> Result<Self, ChainError> {
        Self::new(config, MemoryUtxoStore::new(), MemoryBlockStorage::new())
    }
}

impl<S: UtxoStore, B: BlockStorage> ChainState<S, B> {
    /// Engine with the default tag-dispatched authorization.
    pub fn new(config: EngineConfig, utxo: S, storage: B) -> Result<Self, ChainError> {
        Self::with_authorizer(config, utxo, storage, Box::new(TagDispatch::new()))
    }

    /// Start from the configured genesis block, which must be the only state
    /// the fresh `utxo` store will hold.
    pub fn with_authorizer(
        config: EngineConfig,
        mut utxo: S,
        mut storage: B,
        authorizer: Box<dyn Authorization>,
    ) -> Result<Self, ChainError> {
        let genesis = config.chain.genesis.clone();
        let hash = block_hash(&genesis.header);
        let connected = connect_block(&genesis, 0, &utxo, &config.chain, authorizer.as_ref())
            .map_err(|e| ChainError::InvalidHeader {
                hash,
                reason: Box::new(e),
            })?;
        let undo = utxo.apply_block_delta(&connected.delta)?;
        storage.persist_header(&hash, &genesis.header)?;
        storage.persist_block_body(&hash, &genesis)?;
        storage.persist_undo(&hash, &undo)?;

        info!(
            network = %config.chain.network,
            genesis = %hash_to_hex(&hash),
            "Initialized chain state"
        );
        Ok(Self {
            inner: RwLock::new(ChainInner {
                index: ChainIndex::new(&genesis),
                utxo,
                storage,
            }),
            mempool: Mutex::new(Mempool::new(config.mempool.clone())),
            listeners: RwLock::new(Vec::new()),
            authorizer,
            halted: AtomicBool::new(false),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn params(&self) -> &ChainParams {
        &self.config.chain
    }

    pub fn subscribe(&self, listener: Arc<dyn ChainListener>) {
        self.listeners.write().push(listener);
    }

    fn notify(&self, f: impl Fn(&dyn ChainListener)) {
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            f(listener.as_ref());
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<(), ChainError> {
        if self.is_halted() {
            Err(ChainError::Halted)
        } else {
            Ok(())
        }
    }

    fn halt(&self, err: &StoreError) -> ChainError {
        self.halted.store(true, Ordering::SeqCst);
        error!(error = %err, "Storage failure while committing a block transition; halting");
        ChainError::Storage(err.clone())
    }

    /// Context for a transaction that would go into the next block.
    fn next_block_context(&self, index: &ChainIndex) -> ValidationContext {
        ValidationContext {
            height: index.height() + 1,
            time: unix_time(),
            coinbase_maturity: self.config.chain.coinbase_maturity,
        }
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Decode and admit a transaction to the mempool.
    pub fn submit_transaction(&self, bytes: &[u8]) -> Result<Hash, TxError> {
        let tx: Transaction = deserialize(bytes)?;
        self.accept_transaction(tx)
    }

    pub fn accept_transaction(&self, tx: Transaction) -> Result<Hash, TxError> {
        let id = {
            let inner = self.inner.read();
            let ctx = self.next_block_context(&inner.index);
            let mut pool = self.mempool.lock();
            pool.admit(tx, &inner.utxo, &ctx, self.authorizer.as_ref())
        };
        match &id {
            Ok(id) => debug!(txid = %hash_to_hex(id), "Accepted transaction"),
            Err(e) => debug!(error = %e, "Rejected transaction"),
        }
        let id = id?;
        self.notify(|l| l.on_transaction_accepted(&id));
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Headers
    // ------------------------------------------------------------------

    /// Decode and index a run of headers. Headers before the first failure
    /// stay indexed.
    pub fn submit_headers(&self, headers: &[Vec<u8>]) -> Result<(), ChainError> {
        self.ensure_running()?;
        let now = unix_time();
        let mut inner = self.inner.write();
        for bytes in headers {
            let header: BlockHeader = deserialize(bytes)?;
            let hash = inner
                .index
                .accept_header(&header, now, &self.config.chain, self.config.max_reorg_depth)
                .map_err(|e| header_error(block_hash(&header), e))?;
            inner.storage.persist_header(&hash, &header)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------

    /// Decode and process one block.
    pub fn submit_block(&self, bytes: &[u8]) -> Result<AcceptanceOutcome, BlockError> {
        let block: Block = deserialize(bytes)?;
        self.accept_block(block)
    }

    /// Process blocks in order, checking `cancel` between blocks. Returns one
    /// result per block processed; a cancelled batch returns fewer results
    /// than blocks.
    pub fn process_blocks(
        &self,
        batch: &[Vec<u8>],
        cancel: &AtomicBool,
    ) -> Vec<Result<AcceptanceOutcome, BlockError>> {
        let mut results = Vec::with_capacity(batch.len());
        for bytes in batch {
            if cancel.load(Ordering::SeqCst) {
                info!(processed = results.len(), total = batch.len(), "Block batch cancelled");
                break;
            }
            results.push(self.submit_block(bytes));
        }
        results
    }

    pub fn accept_block(&self, block: Block) -> Result<AcceptanceOutcome, BlockError> {
        self.ensure_running()?;
        let hash = block_hash(&block.header);
        let guard = self.inner.upgradable_read();
        self.ensure_running()?;

        if let Some(reason) = guard.index.rejection(&hash) {
            return Err(BlockError::PreviouslyRejected {
                hash,
                reason: reason.to_string(),
            });
        }
        if guard.index.get(&hash).map(|e| e.has_body).unwrap_or(false) {
            return Ok(AcceptanceOutcome::Duplicate);
        }

        let mut write = RwLockUpgradableReadGuard::upgrade(guard);
        self.store_block(&mut *write, hash, &block)?;
        let guard = RwLockWriteGuard::downgrade_to_upgradable(write);

        // Blocks committed before a failed round stay on the chain and are
        // still reported.
        let (guard, activation, activated) = self.activate_best_chain(guard);

        let outcome = if let Err(err) = activated {
            Err(err)
        } else if let Some((_, err)) = activation.failures.iter().find(|(h, _)| *h == hash) {
            Err(err.clone())
        } else if guard.index.rejection(&hash).is_some() {
            let ancestor = activation
                .failures
                .last()
                .map(|(h, _)| *h)
                .unwrap_or(block.header.prev_block_hash);
            Err(BlockError::InvalidAncestor(ancestor))
        } else if guard.index.is_active(&hash) {
            Ok(AcceptanceOutcome::BestChain {
                height: guard.index.get(&hash).map(|e| e.height).unwrap_or(0),
                disconnected: activation.disconnected.len(),
            })
        } else if guard.index.is_connectable(&hash) {
            Ok(AcceptanceOutcome::SideChain)
        } else {
            Ok(AcceptanceOutcome::AwaitingParent)
        };
        let tip = guard.index.tip_hash();
        drop(guard);

        if activation.moved_tip() {
            self.update_mempool(&activation.disconnected_blocks);
        }
        self.report(&activation, &hash, &tip, &outcome);
        outcome
    }

    /// Header rules, context-free body rules, then persist. Runs under the
    /// write lock.
    fn store_block(
        &self,
        inner: &mut ChainInner<S, B>,
        hash: Hash,
        block: &Block,
    ) -> Result<(), BlockError> {
        let params = &self.config.chain;
        if let Err(e) = inner
            .index
            .accept_header(&block.header, unix_time(), params, self.config.max_reorg_depth)
        {
            warn!(hash = %hash_to_hex(&hash), error = %e, "Rejected block header");
            return Err(e);
        }
        if let Err(e) = check_block(block) {
            if e.is_permanent() {
                inner.index.reject(hash, &e);
                inner.index.reject_descendants(&hash);
            }
            warn!(hash = %hash_to_hex(&hash), error = %e, "Rejected block");
            return Err(e);
        }
        inner
            .storage
            .persist_header(&hash, &block.header)
            .map_err(ChainError::from)?;
        inner
            .storage
            .persist_block_body(&hash, block)
            .map_err(ChainError::from)?;
        inner.index.mark_body_stored(&hash);
        Ok(())
    }

    /// Switch to the most-work connectable chain until no candidate beats the
    /// tip. Iterative: each round plans one branch, validates it on an
    /// overlay and commits the valid part. The returned [`Activation`] holds
    /// everything committed, including rounds before a failing one.
    fn activate_best_chain<'a>(
        &self,
        mut guard: RwLockUpgradableReadGuard<'a, ChainInner<S, B>>,
    ) -> (
        RwLockUpgradableReadGuard<'a, ChainInner<S, B>>,
        Activation,
        Result<(), BlockError>,
    ) {
        let mut activation = Activation::default();
        loop {
            let plan = match guard.index.best_candidate().and_then(|c| plan_reorg(&guard.index, &c)) {
                Some(plan) => plan,
                None => break,
            };
            debug!(
                fork_height = plan.fork_height,
                depth = plan.depth(),
                extension = plan.is_extension(),
                blocks = plan.connect.len(),
                "Validating candidate branch"
            );
            let branch = match self.validate_branch(&*guard, &plan.disconnect, &plan.connect) {
                Ok(branch) => branch,
                Err(e) => return (guard, activation, Err(e.into())),
            };

            let mut write = RwLockUpgradableReadGuard::upgrade(guard);
            let inner = &mut *write;
            if let Some((bad, err)) = &branch.failure {
                warn!(hash = %hash_to_hex(bad), error = %err, "Block failed to connect");
                inner.index.reject(*bad, err);
                inner.index.reject_descendants(bad);
                activation.failures.push((*bad, err.clone()));
            }

            let beats_tip = branch
                .connect
                .last()
                .map(|(h, _, _)| should_reorganize(&inner.index, h))
                .unwrap_or(false);
            if beats_tip {
                if let Err(e) = self.commit_branch(inner, branch, &mut activation) {
                    guard = RwLockWriteGuard::downgrade_to_upgradable(write);
                    return (guard, activation, Err(e.into()));
                }
            }
            guard = RwLockWriteGuard::downgrade_to_upgradable(write);
        }
        (guard, activation, Ok(()))
    }

    /// Replay a branch on an overlay: undo the active blocks above the fork,
    /// then connect the candidate blocks in order, stopping at the first
    /// invalid one.
    fn validate_branch(
        &self,
        inner: &ChainInner<S, B>,
        disconnect: &[Hash],
        connect: &[(Hash, Height)],
    ) -> Result<BranchValidation, ChainError> {
        let mut overlay = UtxoOverlay::new(&inner.utxo);
        let mut branch = BranchValidation {
            disconnect: Vec::with_capacity(disconnect.len()),
            connect: Vec::with_capacity(connect.len()),
            failure: None,
        };

        for hash in disconnect {
            let block = inner
                .storage
                .load_block_body(hash)?
                .ok_or(ChainError::MissingBlockData(*hash))?;
            let undo = inner
                .storage
                .load_undo(hash)?
                .ok_or(ChainError::MissingBlockData(*hash))?;
            overlay.undo_block_delta(&undo)?;
            branch.disconnect.push((*hash, block, undo));
        }

        for (hash, height) in connect {
            let block = inner
                .storage
                .load_block_body(hash)?
                .ok_or(ChainError::MissingBlockData(*hash))?;
            match connect_block(&block, *height, &overlay, &self.config.chain, self.authorizer.as_ref()) {
                Ok(connected) => {
                    overlay.apply_block_delta(&connected.delta)?;
                    debug!(hash = %hash_to_hex(hash), height, fees = connected.fees, "Validated block");
                    branch.connect.push((*hash, block, connected.delta));
                }
                Err(e) => {
                    branch.failure = Some((*hash, e));
                    break;
                }
            }
        }
        Ok(branch)
    }

    /// Apply a validated branch to the real store. Runs under the write lock.
    fn commit_branch(
        &self,
        inner: &mut ChainInner<S, B>,
        branch: BranchValidation,
        activation: &mut Activation,
    ) -> Result<(), ChainError> {
        let depth = branch.disconnect.len();
        for (hash, block, undo) in branch.disconnect {
            inner.utxo.undo_block_delta(&undo).map_err(|e| self.halt(&e))?;
            inner.index.disconnect_tip(&block);
            debug!(hash = %hash_to_hex(&hash), "Disconnected block");
            activation.disconnected.push(hash);
            activation.disconnected_blocks.push(block);
        }
        for (hash, block, delta) in branch.connect {
            let undo = inner.utxo.apply_block_delta(&delta).map_err(|e| self.halt(&e))?;
            inner.storage.persist_undo(&hash, &undo).map_err(|e| self.halt(&e))?;
            inner.index.connect_tip(&hash, &block);
            activation.connected.push(hash);
        }

        let tip = inner.index.tip();
        if depth > 0 {
            info!(
                depth,
                tip = %hash_to_hex(&tip.hash),
                height = tip.height,
                "Chain reorganized"
            );
        } else {
            info!(tip = %hash_to_hex(&tip.hash), height = tip.height, "New best tip");
        }
        Ok(())
    }

    /// Re-validate the mempool against the current tip, offering transactions
    /// of disconnected blocks first (oldest block first).
    fn update_mempool(&self, disconnected_blocks: &[Block]) {
        let disconnected: Vec<Transaction> = disconnected_blocks
            .iter()
            .rev()
            .flat_map(|b| b.transactions.iter().skip(1).cloned())
            .collect();

        let inner = self.inner.read();
        let ctx = self.next_block_context(&inner.index);
        let report = self.mempool.lock().revalidate(
            disconnected,
            &inner.utxo,
            &ctx,
            self.authorizer.as_ref(),
        );
        debug!(
            readmitted = report.readmitted.len(),
            evicted = report.evicted.len(),
            "Mempool revalidated"
        );
    }

    fn report(
        &self,
        activation: &Activation,
        hash: &Hash,
        tip: &Hash,
        outcome: &Result<AcceptanceOutcome, BlockError>,
    ) {
        if !activation.disconnected.is_empty() {
            self.notify(|l| l.on_reorg(&activation.disconnected, &activation.connected));
        }
        for connected in &activation.connected {
            self.notify(|l| l.on_block_accepted(connected, connected == tip));
        }
        if let Ok(AcceptanceOutcome::SideChain) = outcome {
            self.notify(|l| l.on_block_accepted(hash, false));
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn utxo_for(&self, outpoint: &OutPoint) -> Option<UtxoEntry> {
        self.inner.read().utxo.get(outpoint)
    }

    /// Best height minus containing height plus one, for transactions on the
    /// best chain.
    pub fn confirmations_of(&self, txid: &Hash) -> Option<u32> {
        let inner = self.inner.read();
        let height = inner.index.tx_height(txid)?;
        Some(inner.index.height() - height + 1)
    }

    pub fn best_tip(&self) -> Hash {
        self.inner.read().index.tip_hash()
    }

    pub fn best_height(&self) -> Height {
        self.inner.read().index.height()
    }

    pub fn header(&self, hash: &Hash) -> Option<BlockHeader> {
        self.inner.read().index.get(hash).map(|e| e.header.clone())
    }

    /// Height of any indexed header, on the best chain or not.
    pub fn block_height(&self, hash: &Hash) -> Option<Height> {
        self.inner.read().index.get(hash).map(|e| e.height)
    }

    pub fn block_status(&self, hash: &Hash) -> Option<BlockStatus> {
        self.inner.read().index.status(hash)
    }

    pub fn block(&self, hash: &Hash) -> Result<Option<Block>, ChainError> {
        Ok(self.inner.read().storage.load_block_body(hash)?)
    }

    pub fn block_at_height(&self, height: Height) -> Result<Option<Block>, ChainError> {
        let inner = self.inner.read();
        match inner.index.hash_at(height) {
            Some(hash) => Ok(inner.storage.load_block_body(&hash)?),
            None => Ok(None),
        }
    }

    pub fn mempool_contains(&self, txid: &Hash) -> bool {
        self.mempool.lock().contains(txid)
    }

    pub fn mempool_transaction(&self, txid: &Hash) -> Option<Transaction> {
        self.mempool.lock().get(txid).cloned()
    }

    pub fn mempool_len(&self) -> usize {
        self.mempool.lock().len()
    }

    pub fn mempool_transactions(&self) -> Vec<Transaction> {
        self.mempool.lock().transactions()
    }

    pub fn mempool_spender_of(&self, outpoint: &OutPoint) -> Option<Hash> {
        self.mempool.lock().spender_of(outpoint)
    }

    pub fn mempool_total_fees(&self) -> Amount {
        self.mempool.lock().total_fees()
    }

    /// Unsolved block extending the best tip with mempool transactions in
    /// arrival order, paying subsidy plus fees to `lock`.
    pub fn block_template(&self, lock: ByteString) -> Result<Block, ChainError> {
        let inner = self.inner.read();
        let tip = inner.index.tip();
        let height = tip.height + 1;
        let bits = inner
            .index
            .next_work_required(&tip.hash, &self.config.chain)
            .map_err(|e| ChainError::InvalidHeader {
                hash: tip.hash,
                reason: Box::new(e.into()),
            })?;
        let timestamp = unix_time().max(inner.index.median_time_past(&tip.hash) + 1);

        let pool = self.mempool.lock();
        let mut size = 1_000;
        let mut fees: Amount = 0;
        let mut transactions = Vec::new();
        for entry in pool.entries() {
            if size + entry.size > MAX_BLOCK_SIZE {
                break;
            }
            size += entry.size;
            fees = fees.saturating_add(entry.fee);
            transactions.push(entry.tx.clone());
        }

        let subsidy = get_block_subsidy(height, &self.config.chain);
        let coinbase = create_coinbase_transaction(height, subsidy.saturating_add(fees), lock);
        Ok(assemble_block(tip.hash, timestamp, bits, coinbase, transactions))
    }
}

/// Map a header rejection onto the header-batch error type.
fn header_error(hash: Hash, err: BlockError) -> ChainError {
    match err {
        BlockError::BadHeaderLink(parent) => ChainError::UnknownParent(parent),
        BlockError::Chain(e) => e,
        BlockError::Malformed(e) => ChainError::Malformed(e),
        other => ChainError::InvalidHeader {
            hash,
            reason: Box::new(other),
        },
    }
}
