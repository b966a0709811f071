//! Consumer-side mirror of the ledger
//!
//! A subscriber keeps its own replayed copy of the inventory and folds each broadcast block
//! into it with the same reducer the ledger uses. Blocks are deduplicated by hash, which is
//! how the originating node ignores the echo of its own append. Only the genesis and a
//! bounded window of recent blocks are remembered; anything older that shows up again is
//! reported as a gap.

use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::error::{IntegrityError, LedgerError};
use crate::notifier::Notification;
use crate::reducer::InventoryReducer;
use crate::replay_engine::{Cutoff, ReplayEngine, Snapshot};
use crate::state::InventoryState;
use crate::store::verify_chain;
use crate::traits::Reducer;
use crate::transaction::Transaction;
use crate::types::{Block, BlockHash, ChainBreak};

/// What `ingest` did with a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Folded into the local state
    Applied,
    /// Already known by hash; ignored
    Duplicate,
    /// Does not extend the local tip; the caller must `resync` from the full chain
    Gap,
}

/// Recent blocks remembered for echo suppression
pub const DEFAULT_DEDUPE_WINDOW: usize = 1024;

#[derive(Debug, Clone)]
pub struct LocalMirror<R = InventoryReducer> {
    engine: ReplayEngine<R>,
    state: InventoryState,
    genesis: Option<BlockHash>,
    /// Consecutive `(index, hash)` pairs ending at the tip
    recent: VecDeque<(u64, BlockHash)>,
    window: usize,
    applied: usize,
}

impl LocalMirror<InventoryReducer> {
    pub fn new() -> Self {
        Self::with_engine(ReplayEngine::new())
    }
}

impl Default for LocalMirror<InventoryReducer> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> LocalMirror<R>
where
    R: Reducer<InventoryState, Transaction>,
{
    pub fn with_engine(engine: ReplayEngine<R>) -> Self {
        Self {
            engine,
            state: InventoryState::new(),
            genesis: None,
            recent: VecDeque::new(),
            window: DEFAULT_DEDUPE_WINDOW,
            applied: 0,
        }
    }

    /// Remember at most `window` recent blocks (at least one)
    pub fn with_dedupe_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self.trim();
        self
    }

    pub fn state(&self) -> &InventoryState {
        &self.state
    }

    /// Index and hash of the newest block folded in
    pub fn tip(&self) -> Option<(u64, BlockHash)> {
        self.recent.back().copied()
    }

    /// Whether `hash` is the genesis or one of the remembered recent blocks
    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.genesis.as_ref() == Some(hash) || self.recent.iter().any(|(_, h)| h == hash)
    }

    fn remembered(&self, index: u64) -> Option<BlockHash> {
        let (first, _) = self.recent.front()?;
        let offset = usize::try_from(index.checked_sub(*first)?).ok()?;
        self.recent.get(offset).map(|(_, h)| *h)
    }

    fn remember(&mut self, index: u64, hash: BlockHash) {
        self.recent.push_back((index, hash));
        self.trim();
    }

    fn trim(&mut self) {
        while self.recent.len() > self.window {
            self.recent.pop_front();
        }
    }

    /// Non-genesis blocks folded since the last genesis
    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Fold one broadcast block.
    ///
    /// A genesis block with an unknown hash means the ledger was reset, so the mirror starts
    /// over from it. A reducer refusal is a consistency fault; the mirror should then be
    /// rebuilt with [`resync`](Self::resync).
    pub fn ingest(&mut self, block: &Block) -> Result<IngestOutcome, LedgerError> {
        if self.genesis == Some(block.hash) || self.remembered(block.index) == Some(block.hash) {
            debug!(index = block.index, hash = %block.hash, "Duplicate block ignored");
            return Ok(IngestOutcome::Duplicate);
        }

        if block.is_genesis() {
            self.restart_from(block);
            return Ok(IngestOutcome::Applied);
        }

        let extends_tip = matches!(
            self.tip(),
            Some((index, hash)) if block.index == index + 1 && block.previous_hash == hash
        );
        if !extends_tip {
            warn!(
                index = block.index,
                previous = %block.previous_hash,
                tip = ?self.tip().map(|(i, _)| i),
                "Block does not extend the mirror tip"
            );
            return Ok(IngestOutcome::Gap);
        }

        self.applied += self.engine.fold(&mut self.state, std::slice::from_ref(block))?;
        self.remember(block.index, block.hash);
        Ok(IngestOutcome::Applied)
    }

    /// Handle one notifier message. A lag is reported as a gap.
    pub fn observe(&mut self, notification: &Notification) -> Result<IngestOutcome, LedgerError> {
        match notification {
            Notification::Block(block) => self.ingest(block),
            Notification::Lagged(missed) => {
                warn!(missed, "Mirror missed notifications");
                Ok(IngestOutcome::Gap)
            }
        }
    }

    /// Rebuild the mirror from a freshly fetched chain
    pub fn resync(&mut self, chain: &[Block]) -> Result<(), LedgerError> {
        let report = verify_chain(chain);
        if !report.valid {
            return Err(IntegrityError::Broken {
                index: report.first_broken_index.unwrap_or(0),
                failure: report.failure.unwrap_or(ChainBreak::Empty),
            }
            .into());
        }

        let snapshot = self.engine.state_at(chain, Cutoff::Latest)?;
        self.state = snapshot.state;
        self.genesis = chain.first().map(|b| b.hash);
        let keep = chain.len().saturating_sub(self.window);
        self.recent = chain[keep..].iter().map(|b| (b.index, b.hash)).collect();
        self.applied = snapshot.kpis.transaction_count;
        debug!(tip = ?self.tip().map(|(i, _)| i), "Mirror resynced");
        Ok(())
    }

    /// Snapshot of the mirrored state
    pub fn snapshot(&self) -> Result<Snapshot, LedgerError> {
        let mut snapshot = self.engine.snapshot(self.state.clone(), None, self.applied)?;
        snapshot.last_index = self.tip().map(|(i, _)| i);
        snapshot.last_hash = self.tip().map(|(_, h)| h);
        Ok(snapshot)
    }

    fn restart_from(&mut self, genesis: &Block) {
        if self.genesis.is_some() {
            warn!(hash = %genesis.hash, "New genesis observed; mirror restarted");
        }
        self.state = InventoryState::new();
        self.genesis = Some(genesis.hash);
        self.recent.clear();
        self.remember(genesis.index, genesis.hash);
        self.applied = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{Actor, CreateItem, GenesisInfo, StockChange};
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    fn chain(len: u64) -> Vec<Block> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap();
        let mut blocks = vec![Block::seal(
            0,
            t0,
            Transaction::Genesis(GenesisInfo::default()),
            BlockHash::GENESIS_PREVIOUS,
        )
        .unwrap()];
        for index in 1..=len {
            let tx = if index == 1 {
                Transaction::CreateItem(CreateItem {
                    sku: "SKU-9".to_string(),
                    product_name: "Bolt".to_string(),
                    price: Decimal::ONE,
                    category: "Hardware".to_string(),
                    quantity: 1,
                    to_location: "Warehouse".to_string(),
                    actor: Actor::default(),
                })
            } else {
                Transaction::StockIn(StockChange {
                    sku: "SKU-9".to_string(),
                    quantity: 2,
                    location: "Warehouse".to_string(),
                    actor: Actor::default(),
                })
            };
            let prev = blocks[blocks.len() - 1].hash;
            blocks.push(Block::seal(index, t0 + Duration::minutes(index as i64), tx, prev).unwrap());
        }
        blocks
    }

    #[test]
    fn test_echo_is_duplicate() {
        let blocks = chain(1);
        let mut mirror = LocalMirror::new();
        assert_eq!(mirror.ingest(&blocks[0]).unwrap(), IngestOutcome::Applied);
        assert_eq!(mirror.ingest(&blocks[1]).unwrap(), IngestOutcome::Applied);
        assert_eq!(mirror.ingest(&blocks[1]).unwrap(), IngestOutcome::Duplicate);
        assert_eq!(mirror.state().total_stock("SKU-9"), 1);
    }

    #[test]
    fn test_skipped_block_is_gap() {
        let blocks = chain(3);
        let mut mirror = LocalMirror::new();
        mirror.ingest(&blocks[0]).unwrap();
        mirror.ingest(&blocks[1]).unwrap();
        assert_eq!(mirror.ingest(&blocks[3]).unwrap(), IngestOutcome::Gap);
        assert_eq!(mirror.tip().map(|(i, _)| i), Some(1));

        mirror.resync(&blocks).unwrap();
        assert_eq!(mirror.tip().map(|(i, _)| i), Some(3));
        assert_eq!(mirror.state().total_stock("SKU-9"), 5);
        assert_eq!(mirror.ingest(&blocks[3]).unwrap(), IngestOutcome::Duplicate);
    }

    #[test]
    fn test_lag_is_gap() {
        let mut mirror = LocalMirror::new();
        assert_eq!(mirror.observe(&Notification::Lagged(4)).unwrap(), IngestOutcome::Gap);
    }

    #[test]
    fn test_resync_rejects_tampered_chain() {
        let mut blocks = chain(2);
        if let Transaction::StockIn(change) = &mut blocks[2].transaction {
            change.quantity = 200;
        }
        let err = LocalMirror::new().resync(&blocks).unwrap_err();
        assert!(matches!(err, LedgerError::Integrity(IntegrityError::Broken { index: 2, .. })));
    }

    #[test]
    fn test_mirror_matches_full_replay() {
        let blocks = chain(4);
        let mut mirror = LocalMirror::new();
        for block in &blocks {
            mirror.ingest(block).unwrap();
        }
        let replayed = ReplayEngine::new().state_at(&blocks, Cutoff::Latest).unwrap();
        assert_eq!(mirror.snapshot().unwrap(), replayed);
    }

    #[test]
    fn test_dedupe_memory_is_bounded() {
        let blocks = chain(5);
        let mut mirror = LocalMirror::new().with_dedupe_window(2);
        for block in &blocks {
            assert_eq!(mirror.ingest(block).unwrap(), IngestOutcome::Applied);
        }

        assert!(mirror.contains(&blocks[0].hash));
        assert!(mirror.contains(&blocks[5].hash));
        assert!(!mirror.contains(&blocks[2].hash));

        assert_eq!(mirror.ingest(&blocks[5]).unwrap(), IngestOutcome::Duplicate);
        assert_eq!(mirror.ingest(&blocks[0]).unwrap(), IngestOutcome::Duplicate);
        assert_eq!(mirror.ingest(&blocks[2]).unwrap(), IngestOutcome::Gap);
        assert_eq!(mirror.state().total_stock("SKU-9"), 9);
        assert_eq!(mirror.tip(), Some((5, blocks[5].hash)));
    }
}
