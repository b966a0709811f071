//! Canonical hashing of blocks and replayed states using Blake3

use blake3::Hasher as Blake3Hasher;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::error::SerializationError;
use crate::traits::State;
use crate::transaction::Transaction;
use crate::types::{BlockHash, StateHash};

/// Domain separator so block digests never collide with state digests
const BLOCK_DOMAIN: &[u8] = b"stockledger/block/v1\n";
const STATE_DOMAIN: &[u8] = b"stockledger/state/v1\n";

/// BlockHasher computes the digest of a block's logical content.
///
/// The transaction payload goes through `serde_json::Value`, whose object map keeps keys
/// sorted, so the byte form depends only on field names and values and never on the order in
/// which a producer wrote the fields. Timestamps are rendered as RFC 3339 with millisecond
/// precision and a `Z` suffix.
#[derive(Debug, Clone, Default)]
pub struct BlockHasher;

impl BlockHasher {
    pub fn new() -> Self {
        Self
    }

    /// Canonical bytes for `(index, timestamp, transaction, previousHash)`
    pub fn canonical_bytes(
        &self,
        index: u64,
        timestamp: &DateTime<Utc>,
        transaction: &Transaction,
        previous_hash: &BlockHash,
    ) -> Result<Vec<u8>, SerializationError> {
        let payload = serde_json::to_value(transaction).map_err(|e| {
            SerializationError::SerializationFailed {
                reason: format!("transaction canonicalization failed: {}", e),
            }
        })?;

        let envelope = json!({
            "index": index,
            "previousHash": previous_hash.to_hex(),
            "timestamp": canonical_timestamp(timestamp),
            "transaction": sort_keys(payload),
        });

        serde_json::to_vec(&envelope).map_err(|e| SerializationError::SerializationFailed {
            reason: format!("block canonicalization failed: {}", e),
        })
    }

    /// Digest of a block's content
    pub fn digest(
        &self,
        index: u64,
        timestamp: &DateTime<Utc>,
        transaction: &Transaction,
        previous_hash: &BlockHash,
    ) -> Result<BlockHash, SerializationError> {
        let bytes = self.canonical_bytes(index, timestamp, transaction, previous_hash)?;

        let mut hasher = Blake3Hasher::new();
        hasher.update(BLOCK_DOMAIN);
        hasher.update(&bytes);
        Ok(BlockHash(*hasher.finalize().as_bytes()))
    }
}

/// Millisecond RFC 3339 rendering used inside block digests
pub fn canonical_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// serde_json's default `Map` is already a BTreeMap; this keeps the guarantee even if a
// dependency turns on `preserve_order` somewhere in the build graph.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sort_keys(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// StateHasher fingerprints a replayed state.
///
/// Used to prove two replays produced bit-identical results.
#[derive(Debug, Clone, Default)]
pub struct StateHasher;

impl StateHasher {
    pub fn new() -> Self {
        Self
    }

    /// Compute the cryptographic hash of a state
    pub fn hash<S: State>(&self, state: &S) -> Result<StateHash, SerializationError> {
        let serialized =
            bincode::serialize(state).map_err(|e| SerializationError::SerializationFailed {
                reason: format!("state encoding failed: {}", e),
            })?;

        let mut hasher = Blake3Hasher::new();
        hasher.update(STATE_DOMAIN);
        hasher.update(&serialized);
        Ok(StateHash(*hasher.finalize().as_bytes()))
    }
}
