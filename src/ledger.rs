//! # Ledger
//!
//! The single write path into the chain. Every append replays the current tail state,
//! re-checks the transaction with the shared reducer, seals a block linked to the tail and
//! hands it to the store's compare-and-append. Appenders in one process queue on a mutex;
//! appenders in other processes are detected through [`StoreError::TailMoved`] and retried
//! against the new tail a bounded number of times.
//!
//! Blocks are published to subscribers only after the store has accepted them.

use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::config::LedgerConfig;
use crate::context::{ApplyContext, SystemClock};
use crate::error::{ConflictError, ConsistencyFault, IntegrityError, LedgerError, StoreError};
use crate::journal::{JournalEntry, JournalLevel, LedgerJournal};
use crate::notifier::{ChangeNotifier, Subscription};
use crate::replay_engine::{Cutoff, ReplayEngine, Snapshot};
use crate::state::InventoryState;
use crate::store::{verify_chain, BlockStore};
use crate::traits::{Action, Authorizer, Clock, Reducer};
use crate::transaction::{Actor, GenesisInfo, ResetProvenance, Transaction};
use crate::types::{Block, BlockHash, VerifyReport};

/// State replayed up to a known block
#[derive(Debug, Clone)]
struct ReplayCache {
    tip: Block,
    state: InventoryState,
}

/// Builder for [`Ledger`]
pub struct LedgerBuilder<S: BlockStore> {
    store: S,
    config: LedgerConfig,
    clock: Option<Arc<dyn Clock>>,
    notifier: Option<Arc<ChangeNotifier>>,
    engine: ReplayEngine,
}

impl<S: BlockStore> LedgerBuilder<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            config: LedgerConfig::default(),
            clock: None,
            notifier: None,
            engine: ReplayEngine::new(),
        }
    }

    pub fn with_config(mut self, config: LedgerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Share a notifier with other components instead of creating one
    pub fn with_notifier(mut self, notifier: Arc<ChangeNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_replay_engine(mut self, engine: ReplayEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Open the ledger, writing the initial genesis block if the store is empty
    pub fn open(self) -> Result<Ledger<S>, LedgerError> {
        self.config.validate()?;
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(ChangeNotifier::new(self.config.notifier_capacity)));
        let journal = LedgerJournal::new(self.config.journal_level, self.config.journal_capacity);

        let ledger = Ledger {
            store: self.store,
            engine: self.engine,
            append_lock: Mutex::new(()),
            cache: Mutex::new(None),
            notifier,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            config: self.config,
            journal: Mutex::new(journal),
        };
        ledger.ensure_genesis()?;
        Ok(ledger)
    }
}

/// Hash-chained inventory ledger over a [`BlockStore`]
pub struct Ledger<S: BlockStore> {
    store: S,
    engine: ReplayEngine,
    append_lock: Mutex<()>,
    cache: Mutex<Option<ReplayCache>>,
    notifier: Arc<ChangeNotifier>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
    journal: Mutex<LedgerJournal>,
}

impl<S: BlockStore> Ledger<S> {
    /// Open with default configuration and the system clock
    pub fn open(store: S) -> Result<Self, LedgerError> {
        LedgerBuilder::new(store).open()
    }

    pub fn builder(store: S) -> LedgerBuilder<S> {
        LedgerBuilder::new(store)
    }

    fn ensure_genesis(&self) -> Result<(), LedgerError> {
        let _guard = self.append_lock.lock();
        if self.store.tail()?.is_some() {
            return Ok(());
        }

        let genesis = Block::seal(
            0,
            self.now(),
            Transaction::Genesis(GenesisInfo::default()),
            BlockHash::GENESIS_PREVIOUS,
        )?;
        match self.store.append(&genesis) {
            Ok(()) => {
                self.record(
                    JournalEntry::new(JournalLevel::Info, self.now(), "Genesis written")
                        .with_block(genesis.index, genesis.hash),
                );
                Ok(())
            }
            // Another handle created the chain first.
            Err(StoreError::TailMoved { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Validate and commit a transaction exactly as given.
    ///
    /// The transaction is re-checked against the state replayed at commit time, so a stale
    /// pre-check elsewhere can never let an invalid block through.
    pub fn append(&self, transaction: Transaction) -> Result<Block, LedgerError> {
        let _guard = self.append_lock.lock();

        let mut attempts = 0u32;
        loop {
            let (tail, mut state) = self.replayed_tail()?;
            let index = tail.index + 1;
            let timestamp = self.now().max(tail.timestamp);
            let context = ApplyContext::new(index, timestamp);

            if let Err(reason) = self
                .engine
                .reducer()
                .apply_in_place(&mut state, &transaction, &context)
            {
                self.record(
                    JournalEntry::new(JournalLevel::Warn, timestamp, "Transaction rejected")
                        .with_index(index)
                        .with_kind(transaction.kind())
                        .with_metadata("reason", &reason),
                );
                return Err(reason.into());
            }

            let block = Block::seal(index, timestamp, transaction.clone(), tail.hash)?;
            match self.store.append(&block) {
                Ok(()) => {
                    *self.cache.lock() = Some(ReplayCache {
                        tip: block.clone(),
                        state,
                    });
                    self.record(
                        JournalEntry::new(JournalLevel::Info, timestamp, "Block appended")
                            .with_block(block.index, block.hash)
                            .with_kind(block.transaction.kind()),
                    );
                    self.notifier.publish(&block);
                    return Ok(block);
                }
                Err(StoreError::TailMoved {
                    actual_index,
                    actual_hash,
                    ..
                }) => {
                    attempts += 1;
                    if attempts > self.config.max_append_retries {
                        self.record(
                            JournalEntry::new(JournalLevel::Warn, timestamp, "Append lost the race for the tail")
                                .with_index(index)
                                .with_kind(transaction.kind())
                                .with_metadata("attempts", attempts),
                        );
                        return Err(ConflictError::TailContention {
                            attempts,
                            observed_index: actual_index,
                            observed_hash: actual_hash,
                        }
                        .into());
                    }
                    debug!(attempts, actual_index, "Tail moved during append, retrying");
                    self.backoff(attempts);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Commit a caller's draft on behalf of `actor`.
    ///
    /// The capability check runs first; the draft's actor is then overwritten with the
    /// server's view of who is acting.
    pub fn submit<A>(&self, mut draft: Transaction, actor: Actor, authorizer: &A) -> Result<Block, LedgerError>
    where
        A: Authorizer + ?Sized,
    {
        self.authorize(Action::Append(draft.kind()), authorizer)?;
        draft.stamp_actor(actor);
        self.append(draft)
    }

    /// Check a transaction against the current tail without committing it.
    ///
    /// Returns the state the transaction would produce.
    pub fn precheck(&self, transaction: &Transaction) -> Result<InventoryState, LedgerError> {
        let (tail, mut state) = self.replayed_tail()?;
        let context = ApplyContext::new(tail.index + 1, self.now().max(tail.timestamp));
        self.engine
            .reducer()
            .apply_in_place(&mut state, transaction, &context)?;
        Ok(state)
    }

    /// The full chain, oldest first
    pub fn all(&self) -> Result<Vec<Block>, LedgerError> {
        Ok(self.store.blocks()?)
    }

    pub fn tail(&self) -> Result<Block, LedgerError> {
        self.store
            .tail()?
            .ok_or_else(|| IntegrityError::MissingGenesis.into())
    }

    /// Structural verification, gated like any other privileged operation
    pub fn verify<A>(&self, authorizer: &A) -> Result<VerifyReport, LedgerError>
    where
        A: Authorizer + ?Sized,
    {
        self.authorize(Action::Verify, authorizer)?;
        self.verify_unchecked()
    }

    /// Structural verification without a capability check, for internal callers
    pub fn verify_unchecked(&self) -> Result<VerifyReport, LedgerError> {
        let report = verify_chain(&self.store.blocks()?);
        if let (Some(index), Some(failure)) = (report.first_broken_index, &report.failure) {
            error!(index, ?failure, "Chain verification failed");
            self.record(
                JournalEntry::new(JournalLevel::Error, self.now(), "Chain verification failed")
                    .with_index(index)
                    .with_metadata("failure", format!("{:?}", failure)),
            );
        }
        Ok(report)
    }

    /// Like [`verify_unchecked`](Self::verify_unchecked) but a broken chain is an error
    pub fn check_integrity(&self) -> Result<(), LedgerError> {
        let report = self.verify_unchecked()?;
        match (report.first_broken_index, report.failure) {
            (Some(index), Some(failure)) => Err(IntegrityError::Broken { index, failure }.into()),
            _ => Ok(()),
        }
    }

    /// Truncate the chain to a single new genesis block.
    ///
    /// The new genesis records the tip it replaced and who reset it.
    pub fn reset<A>(&self, actor: Actor, authorizer: &A) -> Result<Block, LedgerError>
    where
        A: Authorizer + ?Sized,
    {
        self.authorize(Action::Reset, authorizer)?;
        let _guard = self.append_lock.lock();

        let old_tip = self.store.tail()?;
        let info = GenesisInfo {
            reset_from: old_tip.as_ref().map(|tip| ResetProvenance {
                truncated_tip_index: tip.index,
                truncated_tip_hash: tip.hash,
            }),
            actor: Some(actor.clone()),
        };
        let genesis = Block::seal(
            0,
            self.now(),
            Transaction::Genesis(info),
            BlockHash::GENESIS_PREVIOUS,
        )?;

        self.store.replace_with_genesis(&genesis)?;
        *self.cache.lock() = None;

        let mut entry = JournalEntry::new(JournalLevel::Warn, genesis.timestamp, "Ledger reset to genesis")
            .with_block(genesis.index, genesis.hash)
            .with_metadata("employee_id", &actor.employee_id)
            .with_metadata("user_name", &actor.user_name);
        if let Some(tip) = &old_tip {
            entry = entry
                .with_metadata("truncated_tip_index", tip.index)
                .with_metadata("truncated_tip_hash", tip.hash);
        }
        self.record(entry);

        self.notifier.publish(&genesis);
        Ok(genesis)
    }

    /// Replay a prefix of the chain
    pub fn state_at(&self, cutoff: Cutoff) -> Result<Snapshot, LedgerError> {
        let blocks = self.store.blocks()?;
        self.engine.state_at(&blocks, cutoff)
    }

    pub fn subscribe(&self) -> Subscription {
        self.notifier.subscribe()
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    pub fn journal_entries(&self) -> Vec<JournalEntry> {
        self.journal.lock().entries()
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn authorize<A>(&self, action: Action, authorizer: &A) -> Result<(), LedgerError>
    where
        A: Authorizer + ?Sized,
    {
        if authorizer.can(action) {
            return Ok(());
        }
        warn!(%action, "Permission denied");
        self.record(
            JournalEntry::new(JournalLevel::Warn, self.now(), "Permission denied")
                .with_metadata("action", action),
        );
        Err(LedgerError::PermissionDenied {
            action: action.to_string(),
        })
    }

    /// Tail block and the state replayed through it.
    ///
    /// Folds only the blocks past the cached tip when that tip is still part of the chain.
    fn replayed_tail(&self) -> Result<(Block, InventoryState), LedgerError> {
        let mut cache = self.cache.lock();

        if let Some(cached) = cache.take() {
            let blocks = self.store.blocks_from(cached.tip.index)?;
            if blocks.first().map(|b| b.hash) == Some(cached.tip.hash) {
                let mut state = cached.state;
                if let Err(fault) = self.engine.fold(&mut state, &blocks[1..]) {
                    self.record_fault(&fault);
                    return Err(fault.into());
                }
                let tip = blocks.last().cloned().unwrap_or(cached.tip);
                *cache = Some(ReplayCache {
                    tip: tip.clone(),
                    state: state.clone(),
                });
                return Ok((tip, state));
            }
            debug!(index = cached.tip.index, "Cached tip no longer in chain; replaying from genesis");
        }

        let blocks = self.store.blocks()?;
        let tip = blocks.last().cloned().ok_or(IntegrityError::MissingGenesis)?;
        let mut state = InventoryState::new();
        if let Err(fault) = self.engine.fold(&mut state, &blocks) {
            self.record_fault(&fault);
            return Err(fault.into());
        }
        *cache = Some(ReplayCache {
            tip: tip.clone(),
            state: state.clone(),
        });
        Ok((tip, state))
    }

    fn record_fault(&self, fault: &ConsistencyFault) {
        self.record(
            JournalEntry::new(JournalLevel::Error, self.now(), "Committed chain failed replay")
                .with_metadata("fault", fault),
        );
    }

    fn backoff(&self, attempt: u32) {
        let base = self.config.retry_backoff_ms;
        let jitter = if base > 0 {
            rand::thread_rng().gen_range(0..=base)
        } else {
            0
        };
        std::thread::sleep(Duration::from_millis(base.saturating_mul(attempt as u64) + jitter));
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(3)
    }

    fn record(&self, entry: JournalEntry) {
        self.journal.lock().record(entry);
    }
}

impl<S: BlockStore> std::fmt::Debug for Ledger<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("config", &self.config)
            .field("subscribers", &self.notifier.subscriber_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ManualClock;
    use crate::error::ValidationError;
    use crate::store::MemoryStore;
    use crate::transaction::{CreateItem, StockChange};
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn ledger_at(clock: Arc<ManualClock>) -> Ledger<MemoryStore> {
        Ledger::builder(MemoryStore::new())
            .with_clock(clock)
            .open()
            .unwrap()
    }

    fn create(sku: &str, quantity: u64) -> Transaction {
        Transaction::CreateItem(CreateItem {
            sku: sku.to_string(),
            product_name: "Crate".to_string(),
            price: Decimal::new(5, 0),
            category: "Packaging".to_string(),
            quantity,
            to_location: "Warehouse".to_string(),
            actor: Actor::default(),
        })
    }

    #[test]
    fn test_open_writes_single_genesis() {
        let ledger = Ledger::open(MemoryStore::new()).unwrap();
        let chain = ledger.all().unwrap();
        assert_eq!(chain.len(), 1);
        assert!(matches!(chain[0].transaction, Transaction::Genesis(_)));
        assert_eq!(chain[0].previous_hash, BlockHash::GENESIS_PREVIOUS);
    }

    #[test]
    fn test_timestamps_never_regress() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()));
        let ledger = ledger_at(clock.clone());
        ledger.append(create("SKU-1", 1)).unwrap();

        clock.set(Utc.with_ymd_and_hms(2024, 6, 1, 11, 0, 0).unwrap());
        let block = ledger.append(create("SKU-2", 1)).unwrap();
        assert_eq!(block.timestamp, Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        assert!(ledger.verify_unchecked().unwrap().valid);
    }

    #[test]
    fn test_rejection_is_journaled_and_not_committed() {
        let ledger = Ledger::open(MemoryStore::new()).unwrap();
        ledger.append(create("SKU-1", 10)).unwrap();

        let err = ledger
            .append(Transaction::StockOut(StockChange {
                sku: "SKU-1".to_string(),
                quantity: 12,
                location: "Warehouse".to_string(),
                actor: Actor::default(),
            }))
            .unwrap_err();

        assert!(matches!(
            err,
            LedgerError::Validation(ValidationError::InsufficientStock { available: 10, requested: 12, .. })
        ));
        assert_eq!(ledger.all().unwrap().len(), 2);
        assert!(ledger
            .journal_entries()
            .iter()
            .any(|e| e.message == "Transaction rejected" && e.block_index == Some(2)));
    }

    #[test]
    fn test_precheck_does_not_commit() {
        let ledger = Ledger::open(MemoryStore::new()).unwrap();
        let state = ledger.precheck(&create("SKU-1", 4)).unwrap();
        assert_eq!(state.total_stock("SKU-1"), 4);
        assert_eq!(ledger.all().unwrap().len(), 1);
    }

    #[test]
    fn test_genesis_cannot_be_appended() {
        let ledger = Ledger::open(MemoryStore::new()).unwrap();
        let err = ledger
            .append(Transaction::Genesis(GenesisInfo::default()))
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Validation(ValidationError::MisplacedGenesis { index: 1 })
        ));
    }
}
