//! Deterministic inputs handed to the reducer, and the clocks the ledger stamps blocks with

use chrono::{DateTime, Duration, SubsecRound, Utc};
use parking_lot::Mutex;

use crate::traits::Clock;
use crate::types::Block;

/// Position and commit time of the block a transaction is applied as.
///
/// The reducer reads time only from here, never from the wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyContext {
    pub index: u64,
    pub timestamp: DateTime<Utc>,
}

impl ApplyContext {
    pub fn new(index: u64, timestamp: DateTime<Utc>) -> Self {
        Self { index, timestamp }
    }

    /// Context describing a block that is already committed
    pub fn for_block(block: &Block) -> Self {
        Self::new(block.index, block.timestamp)
    }
}

/// Wall clock, truncated to the millisecond precision blocks are hashed with
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(3)
    }
}

/// Manually driven clock for replays, tests and backfills
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(start.trunc_subsecs(3)),
        }
    }

    pub fn set(&self, time: DateTime<Utc>) {
        *self.current.lock() = time.trunc_subsecs(3);
    }

    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock();
        *current = (*current + by).trunc_subsecs(3);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }
}
