//! Core data types for the ledger

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::SerializationError;
use crate::hasher::BlockHasher;
use crate::transaction::Transaction;

/// Digest of a block's canonical content.
///
/// Persisted and displayed as 64 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    /// The fixed `previousHash` carried by every genesis block
    pub const GENESIS_PREVIOUS: BlockHash = BlockHash([0u8; 32]);

    /// Parse a hash from its hex form
    pub fn from_hex(s: &str) -> Result<Self, SerializationError> {
        let bytes = hex::decode(s).map_err(|e| SerializationError::DeserializationFailed {
            reason: format!("invalid block hash hex: {}", e),
        })?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SerializationError::DeserializationFailed {
                reason: "block hash must be 32 bytes".to_string(),
            })?;
        Ok(BlockHash(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BlockHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Cryptographic hash of a replayed inventory state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateHash(pub [u8; 32]);

impl fmt::Display for StateHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// One immutable, hash-linked ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub transaction: Transaction,
    pub previous_hash: BlockHash,
    pub hash: BlockHash,
}

impl Block {
    /// Build a block and compute its digest.
    ///
    /// The digest is computed exactly once here; nothing recomputes or rewrites it later.
    /// The timestamp is truncated to the millisecond precision the digest covers.
    pub fn seal(
        index: u64,
        timestamp: DateTime<Utc>,
        transaction: Transaction,
        previous_hash: BlockHash,
    ) -> Result<Self, SerializationError> {
        let timestamp = timestamp.trunc_subsecs(3);
        let hash = BlockHasher::new().digest(index, &timestamp, &transaction, &previous_hash)?;
        Ok(Self {
            index,
            timestamp,
            transaction,
            previous_hash,
            hash,
        })
    }

    /// Recompute the digest from the stored fields
    pub fn recompute_hash(&self) -> Result<BlockHash, SerializationError> {
        BlockHasher::new().digest(
            self.index,
            &self.timestamp,
            &self.transaction,
            &self.previous_hash,
        )
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }
}

/// Why a chain failed structural verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "reason")]
pub enum ChainBreak {
    /// The chain holds no blocks at all
    Empty,
    /// Block 0 is not a well-formed genesis
    MalformedGenesis,
    /// Stored index does not follow its predecessor
    IndexGap { expected: u64, found: u64 },
    /// Recomputed digest disagrees with the stored one
    HashMismatch { stored: BlockHash, recomputed: BlockHash },
    /// Stored `previousHash` does not match the prior block's stored hash
    LinkMismatch { expected: BlockHash, found: BlockHash },
    /// Timestamp went backwards relative to the prior block
    TimestampRegression,
    /// Timestamp carries precision below the millisecond, which the digest does not cover
    SubMillisecondTimestamp,
    /// Block content could not be canonicalized
    Unhashable { detail: String },
}

/// Outcome of `verify`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyReport {
    pub valid: bool,
    pub first_broken_index: Option<u64>,
    pub blocks_checked: usize,
    pub failure: Option<ChainBreak>,
}

impl VerifyReport {
    pub fn ok(blocks_checked: usize) -> Self {
        Self {
            valid: true,
            first_broken_index: None,
            blocks_checked,
            failure: None,
        }
    }

    pub fn broken(index: u64, blocks_checked: usize, failure: ChainBreak) -> Self {
        Self {
            valid: false,
            first_broken_index: Some(index),
            blocks_checked,
            failure: Some(failure),
        }
    }
}
