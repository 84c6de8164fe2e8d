//! Unconfirmed transaction pool
//!
//! Transactions are validated against the best-tip UTXO view extended by the
//! outputs of earlier pool transactions, so unconfirmed chains are allowed.
//! Each outpoint has at most one spender in the pool; the first one seen wins.

use crate::config::MempoolConfig;
use crate::encoding::serialized_size;
use crate::error::TxError;
use crate::hashing::txid;
use crate::script::Authorization;
use crate::transaction::{validate_transaction, Fee};
use crate::types::*;
use crate::utxo::UtxoView;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub txid: Hash,
    pub fee: Fee,
    pub size: usize,
    /// Arrival order within the pool.
    pub sequence: u64,
}

/// Outcome of re-validating the pool against a new tip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevalidationReport {
    /// Transactions from disconnected blocks that re-entered the pool.
    pub readmitted: Vec<Hash>,
    /// Former pool transactions that no longer validate.
    pub evicted: Vec<Hash>,
}

pub struct Mempool {
    config: MempoolConfig,
    entries: HashMap<Hash, MempoolEntry>,
    /// Arrival sequence to txid.
    order: BTreeMap<u64, Hash>,
    /// Outpoint to the pool transaction spending it.
    spends: HashMap<OutPoint, Hash>,
    next_sequence: u64,
}

/// Chain view extended with the outputs of pool transactions.
pub struct MempoolView<'a, V: UtxoView + ?Sized> {
    base: &'a V,
    pool: &'a Mempool,
    height: Height,
}

impl<V: UtxoView + ?Sized> UtxoView for MempoolView<'_, V> {
    fn get(&self, outpoint: &OutPoint) -> Option<UtxoEntry> {
        if let Some(entry) = self.base.get(outpoint) {
            return Some(entry);
        }
        let parent = self.pool.entries.get(&outpoint.hash)?;
        let output = parent.tx.outputs.get(outpoint.index as usize)?;
        Some(UtxoEntry {
            output: output.clone(),
            height: self.height,
            is_coinbase: false,
        })
    }
}

impl Mempool {
    pub fn new(config: MempoolConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            order: BTreeMap::new(),
            spends: HashMap::new(),
            next_sequence: 0,
        }
    }

    /// View over `base` in which pool outputs are spendable as if created at `height`.
    pub fn view<'a, V: UtxoView + ?Sized>(&'a self, base: &'a V, height: Height) -> MempoolView<'a, V> {
        MempoolView {
            base,
            pool: self,
            height,
        }
    }

    /// AcceptToMemoryPool: 𝒯𝒳 × 𝒰𝒮 → {accepted, rejected}
    ///
    /// For transaction tx against the best-tip view us:
    /// 1. tx not already pooled, not a coinbase, pool not full
    /// 2. no input spent by another pool transaction
    /// 3. tx validates against us extended by pool outputs
    pub fn admit<V: UtxoView + ?Sized>(
        &mut self,
        tx: Transaction,
        view: &V,
        ctx: &ValidationContext,
        authorizer: &dyn Authorization,
    ) -> Result<Hash, TxError> {
        let id = txid(&tx);
        if self.entries.contains_key(&id) {
            return Err(TxError::AlreadyKnown(id));
        }
        if tx.is_coinbase() {
            return Err(TxError::CoinbaseNotAllowed);
        }
        if self.entries.len() >= self.config.max_transactions {
            return Err(TxError::PoolFull);
        }
        for input in &tx.inputs {
            if let Some(spender) = self.spends.get(&input.prevout) {
                return Err(TxError::Conflict {
                    outpoint: input.prevout,
                    spender: *spender,
                });
            }
        }

        let fee = validate_transaction(&tx, &self.view(view, ctx.height), ctx, authorizer)?;
        self.insert(id, tx, fee);
        Ok(id)
    }

    fn insert(&mut self, id: Hash, tx: Transaction, fee: Fee) {
        for input in &tx.inputs {
            self.spends.insert(input.prevout, id);
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.order.insert(sequence, id);
        let size = serialized_size(&tx);
        self.entries.insert(
            id,
            MempoolEntry {
                tx,
                txid: id,
                fee,
                size,
                sequence,
            },
        );
    }

    /// Re-validate the whole pool after the best tip changed.
    ///
    /// Transactions of disconnected blocks are offered first, in the order
    /// given, then every existing entry in arrival order. Anything that fails
    /// is dropped.
    pub fn revalidate<V: UtxoView + ?Sized>(
        &mut self,
        disconnected: Vec<Transaction>,
        view: &V,
        ctx: &ValidationContext,
        authorizer: &dyn Authorization,
    ) -> RevalidationReport {
        let previous: Vec<MempoolEntry> = {
            let mut entries = std::mem::take(&mut self.entries);
            std::mem::take(&mut self.order)
                .into_values()
                .filter_map(|id| entries.remove(&id))
                .collect()
        };
        self.spends.clear();

        let mut report = RevalidationReport::default();
        for tx in disconnected.into_iter().filter(|tx| !tx.is_coinbase()) {
            match self.admit(tx, view, ctx, authorizer) {
                Ok(id) => report.readmitted.push(id),
                Err(e) => debug!(error = %e, "Disconnected transaction not readmitted"),
            }
        }
        for entry in previous {
            match self.admit(entry.tx, view, ctx, authorizer) {
                Ok(_) | Err(TxError::AlreadyKnown(_)) => {}
                Err(e) => {
                    debug!(txid = %hash_to_hex(&entry.txid), error = %e, "Evicting transaction");
                    report.evicted.push(entry.txid);
                }
            }
        }
        report
    }

    pub fn contains(&self, txid: &Hash) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn get(&self, txid: &Hash) -> Option<&Transaction> {
        self.entries.get(txid).map(|e| &e.tx)
    }

    pub fn entry(&self, txid: &Hash) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pool entries in arrival order.
    pub fn entries(&self) -> impl Iterator<Item = &MempoolEntry> + '_ {
        self.order.values().filter_map(|id| self.entries.get(id))
    }

    /// Pool transactions in arrival order.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.entries().map(|e| e.tx.clone()).collect()
    }

    pub fn spender_of(&self, outpoint: &OutPoint) -> Option<Hash> {
        self.spends.get(outpoint).copied()
    }

    pub fn total_fees(&self) -> Amount {
        self.entries.values().map(|e| e.fee).sum()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.spends.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::*;
    use crate::script::{anyone_can_spend, TagDispatch};
    use crate::utxo::{BlockDelta, MemoryUtxoStore, UtxoStore};

    fn ctx() -> ValidationContext {
        ValidationContext {
            height: 200,
            time: 1_700_000_000,
            coinbase_maturity: COINBASE_MATURITY,
        }
    }

    fn spend(prevout: OutPoint, value: Amount) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TransactionInput {
                prevout,
                script_sig: vec![],
                sequence: SEQUENCE_FINAL,
            }],
            outputs: vec![TransactionOutput {
                value,
                script_pubkey: anyone_can_spend(),
            }],
            lock_time: 0,
        }
    }

    fn store_with(outpoints: &[(OutPoint, Amount)]) -> MemoryUtxoStore {
        let mut store = MemoryUtxoStore::new();
        let created = outpoints
            .iter()
            .map(|(o, v)| {
                (
                    *o,
                    UtxoEntry {
                        output: TransactionOutput {
                            value: *v,
                            script_pubkey: anyone_can_spend(),
                        },
                        height: 1,
                        is_coinbase: false,
                    },
                )
            })
            .collect();
        store
            .apply_block_delta(&BlockDelta {
                spent: vec![],
                created,
            })
            .unwrap();
        store
    }

    fn pool() -> Mempool {
        Mempool::new(MempoolConfig::default())
    }

    #[test]
    fn test_admit_and_query() {
        let a = OutPoint::new([1; 32], 0);
        let store = store_with(&[(a, 1_000)]);
        let mut pool = pool();
        let tx = spend(a, 900);
        let id = pool.admit(tx.clone(), &store, &ctx(), &TagDispatch::new()).unwrap();

        assert!(pool.contains(&id));
        assert_eq!(pool.get(&id), Some(&tx));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.spender_of(&a), Some(id));
        assert_eq!(pool.total_fees(), 100);
        assert_eq!(pool.entry(&id).map(|e| e.fee), Some(100));
    }

    #[test]
    fn test_admit_duplicate() {
        let a = OutPoint::new([1; 32], 0);
        let store = store_with(&[(a, 1_000)]);
        let mut pool = pool();
        let tx = spend(a, 900);
        let id = pool.admit(tx.clone(), &store, &ctx(), &TagDispatch::new()).unwrap();
        assert_eq!(
            pool.admit(tx, &store, &ctx(), &TagDispatch::new()),
            Err(TxError::AlreadyKnown(id))
        );
    }

    #[test]
    fn test_first_seen_conflict() {
        let a = OutPoint::new([1; 32], 0);
        let store = store_with(&[(a, 1_000)]);
        let mut pool = pool();
        let first = pool.admit(spend(a, 900), &store, &ctx(), &TagDispatch::new()).unwrap();
        assert_eq!(
            pool.admit(spend(a, 800), &store, &ctx(), &TagDispatch::new()),
            Err(TxError::Conflict {
                outpoint: a,
                spender: first
            })
        );
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_chained_unconfirmed_spend() {
        let a = OutPoint::new([1; 32], 0);
        let store = store_with(&[(a, 1_000)]);
        let mut pool = pool();
        let parent = spend(a, 900);
        let parent_id = pool.admit(parent, &store, &ctx(), &TagDispatch::new()).unwrap();
        let child = spend(OutPoint::new(parent_id, 0), 850);
        let child_id = pool.admit(child.clone(), &store, &ctx(), &TagDispatch::new()).unwrap();

        assert_eq!(pool.transactions().len(), 2);
        assert_eq!(pool.transactions()[1], child);
        assert_eq!(pool.total_fees(), 150);
        assert_eq!(pool.spender_of(&OutPoint::new(parent_id, 0)), Some(child_id));
    }

    #[test]
    fn test_rejects_coinbase_and_invalid() {
        let store = store_with(&[]);
        let mut pool = pool();
        let mut coinbase = spend(OutPoint::null(), 1);
        coinbase.inputs[0].script_sig = vec![1, 2];
        assert_eq!(
            pool.admit(coinbase, &store, &ctx(), &TagDispatch::new()),
            Err(TxError::CoinbaseNotAllowed)
        );

        let missing = OutPoint::new([4; 32], 0);
        assert_eq!(
            pool.admit(spend(missing, 1), &store, &ctx(), &TagDispatch::new()),
            Err(TxError::AlreadySpentOrUnknown(missing))
        );
        assert!(pool.is_empty());
    }

    #[test]
    fn test_pool_full() {
        let a = OutPoint::new([1; 32], 0);
        let b = OutPoint::new([2; 32], 0);
        let store = store_with(&[(a, 1_000), (b, 1_000)]);
        let mut pool = Mempool::new(MempoolConfig { max_transactions: 1 });
        pool.admit(spend(a, 900), &store, &ctx(), &TagDispatch::new()).unwrap();
        assert_eq!(
            pool.admit(spend(b, 900), &store, &ctx(), &TagDispatch::new()),
            Err(TxError::PoolFull)
        );
    }

    #[test]
    fn test_revalidate_evicts_confirmed_and_children_survive() {
        let a = OutPoint::new([1; 32], 0);
        let b = OutPoint::new([2; 32], 0);
        let mut store = store_with(&[(a, 1_000), (b, 1_000)]);
        let mut pool = pool();
        let auth = TagDispatch::new();

        let confirmed = spend(a, 900);
        let confirmed_id = pool.admit(confirmed, &store, &ctx(), &auth).unwrap();
        let child = spend(OutPoint::new(confirmed_id, 0), 800);
        let child_id = pool.admit(child.clone(), &store, &ctx(), &auth).unwrap();
        let other = spend(b, 500);
        let other_id = pool.admit(other, &store, &ctx(), &auth).unwrap();

        // a block confirms `confirmed` and spends `b` elsewhere
        store
            .apply_block_delta(&BlockDelta {
                spent: vec![a, b],
                created: vec![(
                    OutPoint::new(confirmed_id, 0),
                    UtxoEntry {
                        output: TransactionOutput {
                            value: 900,
                            script_pubkey: anyone_can_spend(),
                        },
                        height: 200,
                        is_coinbase: false,
                    },
                )],
            })
            .unwrap();

        let next = ValidationContext { height: 201, ..ctx() };
        let report = pool.revalidate(vec![], &store, &next, &auth);
        assert!(report.readmitted.is_empty());
        assert_eq!(report.evicted.len(), 2);
        assert!(report.evicted.contains(&confirmed_id));
        assert!(report.evicted.contains(&other_id));
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(&child_id));
        assert_eq!(pool.spender_of(&OutPoint::new(confirmed_id, 0)), Some(child_id));
    }

    #[test]
    fn test_revalidate_readmits_disconnected_first() {
        let a = OutPoint::new([1; 32], 0);
        let store = store_with(&[(a, 1_000)]);
        let mut pool = pool();
        let auth = TagDispatch::new();

        // pool holds a double spend of what the disconnected block contained
        let pooled = spend(a, 700);
        let pooled_id = pool.admit(pooled, &store, &ctx(), &auth).unwrap();
        let disconnected = spend(a, 900);

        let report = pool.revalidate(vec![disconnected.clone()], &store, &ctx(), &auth);
        assert_eq!(report.readmitted, vec![txid(&disconnected)]);
        assert_eq!(report.evicted, vec![pooled_id]);
        assert_eq!(pool.transactions(), vec![disconnected]);
    }
}
