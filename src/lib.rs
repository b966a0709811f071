//! Stock Ledger
//!
//! A tamper-evident, hash-chained inventory ledger. Inventory state is never stored; it is
//! rebuilt by replaying the chain through a single shared reducer.

pub mod analytics;
pub mod config;
pub mod context;
pub mod error;
pub mod hasher;
pub mod journal;
pub mod ledger;
pub mod mirror;
pub mod notifier;
pub mod reducer;
pub mod replay_engine;
pub mod state;
pub mod store;
pub mod traits;
pub mod transaction;
pub mod types;

// Re-export core types and traits
pub use analytics::{AnomalyEngine, AnomalyFlag, AnomalyReport, StockForecast};
pub use config::{AnalyticsConfig, LedgerConfig};
pub use context::{ApplyContext, ManualClock, SystemClock};
pub use error::{
    ConfigError, ConflictError, ConsistencyFault, IntegrityError, LedgerError, SerializationError,
    StoreError, ValidationError,
};
pub use hasher::{BlockHasher, StateHasher};
pub use journal::{JournalEntry, JournalLevel, LedgerJournal};
pub use ledger::{Ledger, LedgerBuilder};
pub use mirror::{IngestOutcome, LocalMirror};
pub use notifier::{ChangeNotifier, Notification, Subscription, SubscriptionClosed};
pub use reducer::InventoryReducer;
pub use replay_engine::{Cutoff, Kpis, ReplayEngine, Snapshot, SnapshotDiff, StockDelta};
pub use state::{InventoryState, Product};
pub use store::{verify_chain, BlockStore, FileStore, MemoryStore};
pub use traits::{Action, Authorizer, Clock, Reducer, State};
pub use transaction::{Actor, Transaction, TransactionKind};
pub use types::{Block, BlockHash, ChainBreak, StateHash, VerifyReport};
