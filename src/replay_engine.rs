//! Snapshot/replay engine: folds the reducer over a prefix of the chain

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::error;

use crate::context::ApplyContext;
use crate::error::{ConsistencyFault, LedgerError};
use crate::hasher::StateHasher;
use crate::reducer::InventoryReducer;
use crate::state::InventoryState;
use crate::traits::{Reducer, State};
use crate::transaction::Transaction;
use crate::types::{Block, BlockHash, StateHash};

/// Which prefix of the chain a snapshot covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cutoff {
    /// The whole chain
    Latest,
    /// Blocks `0..=index`
    Index(u64),
    /// Blocks committed at or before the instant
    Timestamp(DateTime<Utc>),
}

impl Cutoff {
    fn includes(&self, block: &Block) -> bool {
        match self {
            Cutoff::Latest => true,
            Cutoff::Index(index) => block.index <= *index,
            Cutoff::Timestamp(at) => block.timestamp <= *at,
        }
    }
}

/// Figures derived alongside the fold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kpis {
    pub total_units: u64,
    /// `Σ price × stock` over live products
    pub total_value: Decimal,
    pub stock_by_sku: BTreeMap<String, u64>,
    /// Non-genesis blocks inside the window
    pub transaction_count: usize,
    pub active_products: usize,
    /// Live SKUs at or below the low-stock threshold
    pub low_stock_skus: Vec<String>,
}

impl Kpis {
    /// `None` when the total value does not fit a `Decimal`
    fn derive(state: &InventoryState, transaction_count: usize, low_stock_threshold: u64) -> Option<Self> {
        let mut kpis = Kpis {
            total_units: 0,
            total_value: Decimal::ZERO,
            stock_by_sku: BTreeMap::new(),
            transaction_count,
            active_products: 0,
            low_stock_skus: Vec::new(),
        };

        for product in state.active_products() {
            let stock = product.total_stock();
            kpis.total_units = kpis.total_units.saturating_add(stock);
            kpis.total_value = kpis.total_value.checked_add(product.stock_value()?)?;
            kpis.stock_by_sku.insert(product.sku.clone(), stock);
            kpis.active_products += 1;
            if stock <= low_stock_threshold {
                kpis.low_stock_skus.push(product.sku.clone());
            }
        }
        Some(kpis)
    }
}

/// Replay result for one cutoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub state: InventoryState,
    pub kpis: Kpis,
    pub state_hash: StateHash,
    /// Last block folded in; `None` when the cutoff precedes genesis
    pub last_index: Option<u64>,
    pub last_hash: Option<BlockHash>,
}

impl Snapshot {
    /// Per-SKU stock movement from `self` to `later`
    pub fn diff(&self, later: &Snapshot) -> SnapshotDiff {
        let skus: BTreeSet<&String> = self
            .kpis
            .stock_by_sku
            .keys()
            .chain(later.kpis.stock_by_sku.keys())
            .collect();

        let changes = skus
            .into_iter()
            .filter_map(|sku| {
                let before = self.kpis.stock_by_sku.get(sku).copied().unwrap_or(0);
                let after = later.kpis.stock_by_sku.get(sku).copied().unwrap_or(0);
                (before != after).then(|| (sku.clone(), StockDelta { before, after }))
            })
            .collect();

        SnapshotDiff {
            from_index: self.last_index,
            to_index: later.last_index,
            changes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDelta {
    pub before: u64,
    pub after: u64,
}

impl StockDelta {
    pub fn change(&self) -> i128 {
        self.after as i128 - self.before as i128
    }
}

/// Stock changes between two snapshots; unchanged SKUs are omitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDiff {
    pub from_index: Option<u64>,
    pub to_index: Option<u64>,
    pub changes: BTreeMap<String, StockDelta>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Replays committed blocks through a reducer.
///
/// Holds no cursor between calls: the same chain and cutoff always produce the same
/// snapshot.
#[derive(Debug, Clone)]
pub struct ReplayEngine<R = InventoryReducer> {
    reducer: R,
    low_stock_threshold: u64,
}

impl ReplayEngine<InventoryReducer> {
    pub fn new() -> Self {
        Self::with_reducer(InventoryReducer::new())
    }
}

impl Default for ReplayEngine<InventoryReducer> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> ReplayEngine<R>
where
    R: Reducer<InventoryState, Transaction>,
{
    pub fn with_reducer(reducer: R) -> Self {
        Self {
            reducer,
            low_stock_threshold: 5,
        }
    }

    pub fn with_low_stock_threshold(mut self, threshold: u64) -> Self {
        self.low_stock_threshold = threshold;
        self
    }

    pub fn reducer(&self) -> &R {
        &self.reducer
    }

    pub fn low_stock_threshold(&self) -> u64 {
        self.low_stock_threshold
    }

    /// Replay the prefix of `chain` selected by `cutoff`
    pub fn state_at(&self, chain: &[Block], cutoff: Cutoff) -> Result<Snapshot, LedgerError> {
        // Timestamps never decrease along the chain, so every cutoff selects a prefix.
        let window = chain.iter().take_while(|b| cutoff.includes(b)).count();
        let blocks = &chain[..window];

        let mut state = InventoryState::new();
        let transaction_count = self.fold(&mut state, blocks)?;
        self.snapshot(state, blocks.last(), transaction_count)
    }

    /// Build a snapshot from an already folded state
    pub fn snapshot(
        &self,
        state: InventoryState,
        last: Option<&Block>,
        transaction_count: usize,
    ) -> Result<Snapshot, LedgerError> {
        let index = last.map(|b| b.index).unwrap_or(0);
        let kpis = Kpis::derive(&state, transaction_count, self.low_stock_threshold).ok_or_else(|| {
            error!(index, "Inventory value overflowed during snapshot");
            ConsistencyFault::ValueOverflow { index }
        })?;
        let state_hash = StateHasher::new().hash(&state)?;
        Ok(Snapshot {
            state,
            kpis,
            state_hash,
            last_index: last.map(|b| b.index),
            last_hash: last.map(|b| b.hash),
        })
    }

    /// Fold committed `blocks` into `state`, returning how many non-genesis blocks were applied.
    ///
    /// Any refusal here means a block got past the append gate, so it is reported as a
    /// [`ConsistencyFault`] rather than a validation error.
    pub fn fold(&self, state: &mut InventoryState, blocks: &[Block]) -> Result<usize, ConsistencyFault> {
        let mut applied = 0;
        for block in blocks {
            if block.is_genesis() {
                continue;
            }

            let context = ApplyContext::for_block(block);
            if let Err(source) = self.reducer.apply_in_place(state, &block.transaction, &context) {
                error!(
                    index = block.index,
                    hash = %block.hash,
                    kind = %block.transaction.kind(),
                    %source,
                    "Committed block failed replay"
                );
                return Err(ConsistencyFault::ReplayRejected {
                    index: block.index,
                    hash: block.hash,
                    source,
                });
            }
            applied += 1;
        }

        if let Err(e) = state.validate() {
            let index = blocks.last().map(|b| b.index).unwrap_or(0);
            error!(index, reason = %e, "Replayed state failed validation");
            return Err(ConsistencyFault::InvalidReplayedState {
                index,
                reason: e.to_string(),
            });
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::transaction::{Actor, CreateItem, GenesisInfo, MoveStock, StockChange};
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap()
    }

    fn chain_of(transactions: Vec<Transaction>) -> Vec<Block> {
        let mut blocks = vec![Block::seal(
            0,
            start(),
            Transaction::Genesis(GenesisInfo::default()),
            BlockHash::GENESIS_PREVIOUS,
        )
        .unwrap()];
        for (i, tx) in transactions.into_iter().enumerate() {
            let prev = blocks.last().unwrap().hash;
            let index = i as u64 + 1;
            let block = Block::seal(index, start() + Duration::hours(index as i64), tx, prev).unwrap();
            blocks.push(block);
        }
        blocks
    }

    fn create(sku: &str, quantity: u64) -> Transaction {
        Transaction::CreateItem(CreateItem {
            sku: sku.to_string(),
            product_name: sku.to_string(),
            price: Decimal::new(250, 2),
            category: "Tools".to_string(),
            quantity,
            to_location: "Warehouse".to_string(),
            actor: Actor::default(),
        })
    }

    fn stock_out(sku: &str, quantity: u64) -> Transaction {
        Transaction::StockOut(StockChange {
            sku: sku.to_string(),
            quantity,
            location: "Warehouse".to_string(),
            actor: Actor::default(),
        })
    }

    #[test]
    fn test_genesis_only_chain_is_empty() {
        let snapshot = ReplayEngine::new().state_at(&chain_of(vec![]), Cutoff::Latest).unwrap();
        assert!(snapshot.state.products.is_empty());
        assert_eq!(snapshot.kpis.total_units, 0);
        assert_eq!(snapshot.kpis.total_value, Decimal::ZERO);
        assert_eq!(snapshot.kpis.transaction_count, 0);
        assert_eq!(snapshot.last_index, Some(0));
    }

    #[test]
    fn test_kpis_follow_the_fold() {
        let chain = chain_of(vec![
            create("SKU-1", 10),
            create("SKU-2", 3),
            Transaction::Move(MoveStock {
                sku: "SKU-1".to_string(),
                quantity: 4,
                from_location: "Warehouse".to_string(),
                to_location: "Retailer".to_string(),
                actor: Actor::default(),
            }),
        ]);

        let snapshot = ReplayEngine::new().state_at(&chain, Cutoff::Latest).unwrap();
        assert_eq!(snapshot.kpis.total_units, 13);
        assert_eq!(snapshot.kpis.total_value, Decimal::new(3250, 2));
        assert_eq!(snapshot.kpis.stock_by_sku["SKU-1"], 10);
        assert_eq!(snapshot.kpis.transaction_count, 3);
        assert_eq!(snapshot.kpis.active_products, 2);
        assert_eq!(snapshot.kpis.low_stock_skus, vec!["SKU-2".to_string()]);
    }

    #[test]
    fn test_cutoffs_select_prefixes() {
        let chain = chain_of(vec![create("SKU-1", 10), stock_out("SKU-1", 4), stock_out("SKU-1", 1)]);
        let engine = ReplayEngine::new();

        let by_index = engine.state_at(&chain, Cutoff::Index(2)).unwrap();
        assert_eq!(by_index.kpis.total_units, 6);
        assert_eq!(by_index.last_index, Some(2));

        let by_time = engine
            .state_at(&chain, Cutoff::Timestamp(start() + Duration::minutes(90)))
            .unwrap();
        assert_eq!(by_time.kpis.total_units, 10);
        assert_eq!(by_time.kpis.transaction_count, 1);

        let before_genesis = engine
            .state_at(&chain, Cutoff::Timestamp(start() - Duration::seconds(1)))
            .unwrap();
        assert_eq!(before_genesis.last_index, None);
    }

    #[test]
    fn test_replay_is_repeatable() {
        let chain = chain_of(vec![create("SKU-1", 10), stock_out("SKU-1", 4)]);
        let engine = ReplayEngine::new();
        let a = engine.state_at(&chain, Cutoff::Latest).unwrap();
        let b = engine.state_at(&chain, Cutoff::Latest).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.state_hash, b.state_hash);
    }

    #[test]
    fn test_committed_refusal_is_consistency_fault() {
        let chain = chain_of(vec![create("SKU-1", 2), stock_out("SKU-1", 5)]);
        let err = ReplayEngine::new().state_at(&chain, Cutoff::Latest).unwrap_err();
        match err {
            LedgerError::Consistency(ConsistencyFault::ReplayRejected { index, source, .. }) => {
                assert_eq!(index, 2);
                assert!(matches!(source, ValidationError::InsufficientStock { .. }));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_diff_reports_changed_skus_only() {
        let chain = chain_of(vec![create("SKU-1", 10), create("SKU-2", 3), stock_out("SKU-1", 4)]);
        let engine = ReplayEngine::new();
        let before = engine.state_at(&chain, Cutoff::Index(2)).unwrap();
        let after = engine.state_at(&chain, Cutoff::Latest).unwrap();

        let diff = before.diff(&after);
        assert_eq!(diff.changes.len(), 1);
        assert_eq!(diff.changes["SKU-1"].change(), -4);
        assert!(after.diff(&after).is_empty());
    }
}
