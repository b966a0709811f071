//! Operator journal for the ledger
//!
//! Every entry is also emitted as a `tracing` event, so hosts with a subscriber get the
//! same stream; the journal keeps a bounded, queryable copy in memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::transaction::TransactionKind;
use crate::types::BlockHash;

/// Journal severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JournalLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A journal entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub level: JournalLevel,
    pub timestamp: DateTime<Utc>,
    pub block_index: Option<u64>,
    pub block_hash: Option<BlockHash>,
    pub kind: Option<TransactionKind>,
    pub message: String,
    /// Additional structured data
    pub metadata: Vec<(String, String)>,
}

impl JournalEntry {
    pub fn new(level: JournalLevel, timestamp: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp,
            block_index: None,
            block_hash: None,
            kind: None,
            message: message.into(),
            metadata: Vec::new(),
        }
    }

    pub fn with_block(mut self, index: u64, hash: BlockHash) -> Self {
        self.block_index = Some(index);
        self.block_hash = Some(hash);
        self
    }

    pub fn with_index(mut self, index: u64) -> Self {
        self.block_index = Some(index);
        self
    }

    pub fn with_kind(mut self, kind: TransactionKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.push((key.into(), value.to_string()));
        self
    }

    fn emit(&self) {
        let index = self.block_index;
        let hash = self.block_hash.map(|h| h.to_hex());
        let kind = self.kind.map(|k| k.as_str());
        let metadata = format!("{:?}", self.metadata);
        match self.level {
            JournalLevel::Debug => {
                tracing::debug!(?index, ?hash, ?kind, %metadata, "{}", self.message)
            }
            JournalLevel::Info => {
                tracing::info!(?index, ?hash, ?kind, %metadata, "{}", self.message)
            }
            JournalLevel::Warn => {
                tracing::warn!(?index, ?hash, ?kind, %metadata, "{}", self.message)
            }
            JournalLevel::Error => {
                tracing::error!(?index, ?hash, ?kind, %metadata, "{}", self.message)
            }
        }
    }
}

/// Bounded in-memory journal; the oldest entries fall off first
#[derive(Debug, Clone)]
pub struct LedgerJournal {
    entries: VecDeque<JournalEntry>,
    min_level: JournalLevel,
    capacity: usize,
}

impl LedgerJournal {
    pub fn new(min_level: JournalLevel, capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            min_level,
            capacity: capacity.max(1),
        }
    }

    /// Emit the entry and keep it if it meets the minimum level
    pub fn record(&mut self, entry: JournalEntry) {
        entry.emit();
        if entry.level < self.min_level {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn filter_by_level(&self, level: JournalLevel) -> Vec<&JournalEntry> {
        self.entries.iter().filter(|e| e.level == level).collect()
    }

    pub fn filter_by_block(&self, index: u64) -> Vec<&JournalEntry> {
        self.entries
            .iter()
            .filter(|e| e.block_index == Some(index))
            .collect()
    }
}

impl Default for LedgerJournal {
    fn default() -> Self {
        Self::new(JournalLevel::Info, 10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_filters_below_min_level() {
        let mut journal = LedgerJournal::new(JournalLevel::Info, 10);
        let now = Utc::now();

        journal.record(JournalEntry::new(JournalLevel::Debug, now, "noise"));
        journal.record(JournalEntry::new(JournalLevel::Warn, now, "rejected").with_index(4));

        assert_eq!(journal.len(), 1);
        assert_eq!(journal.entries()[0].message, "rejected");
        assert_eq!(journal.filter_by_block(4).len(), 1);
    }

    #[test]
    fn test_journal_drops_oldest_at_capacity() {
        let mut journal = LedgerJournal::new(JournalLevel::Debug, 2);
        let now = Utc::now();
        for i in 0..3u64 {
            journal.record(JournalEntry::new(JournalLevel::Info, now, format!("e{}", i)));
        }
        let messages: Vec<String> = journal.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["e1", "e2"]);
    }
}
