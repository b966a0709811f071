//! Block persistence: ordered append with linkage checks, full reads, and reset

use chrono::Timelike;
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::transaction::Transaction;
use crate::types::{Block, BlockHash, ChainBreak, VerifyReport};

/// Ordered block storage.
///
/// `append` is a compare-and-append: it only succeeds when the block extends the store's
/// current tail (next index, `previousHash` equal to the tail's hash). Anything else is
/// reported as [`StoreError::TailMoved`] and nothing is written.
pub trait BlockStore: Send + Sync {
    /// Last committed block
    fn tail(&self) -> Result<Option<Block>, StoreError>;

    /// The whole chain, oldest first
    fn blocks(&self) -> Result<Vec<Block>, StoreError>;

    /// Blocks with `index >= start`, oldest first
    fn blocks_from(&self, start: u64) -> Result<Vec<Block>, StoreError> {
        Ok(self
            .blocks()?
            .into_iter()
            .filter(|b| b.index >= start)
            .collect())
    }

    fn append(&self, block: &Block) -> Result<(), StoreError>;

    /// Drop every block and leave `genesis` as the only one
    fn replace_with_genesis(&self, genesis: &Block) -> Result<(), StoreError>;
}

impl<T: BlockStore + ?Sized> BlockStore for Arc<T> {
    fn tail(&self) -> Result<Option<Block>, StoreError> {
        (**self).tail()
    }

    fn blocks(&self) -> Result<Vec<Block>, StoreError> {
        (**self).blocks()
    }

    fn blocks_from(&self, start: u64) -> Result<Vec<Block>, StoreError> {
        (**self).blocks_from(start)
    }

    fn append(&self, block: &Block) -> Result<(), StoreError> {
        (**self).append(block)
    }

    fn replace_with_genesis(&self, genesis: &Block) -> Result<(), StoreError> {
        (**self).replace_with_genesis(genesis)
    }
}

/// Check that `block` may follow `tail`
fn check_extends(tail: Option<&Block>, block: &Block) -> Result<(), StoreError> {
    match tail {
        None if block.index == 0 => Ok(()),
        None => Err(StoreError::Empty),
        Some(tail) if block.index == tail.index + 1 && block.previous_hash == tail.hash => Ok(()),
        Some(tail) => Err(StoreError::TailMoved {
            expected_index: block.index.saturating_sub(1),
            actual_index: tail.index,
            actual_hash: tail.hash,
        }),
    }
}

/// Structural verification of a chain: digests, linkage, indices and genesis shape.
///
/// Business rules are not re-run here.
pub fn verify_chain(blocks: &[Block]) -> VerifyReport {
    let Some(genesis) = blocks.first() else {
        return VerifyReport::broken(0, 0, ChainBreak::Empty);
    };

    let genesis_ok = genesis.index == 0
        && matches!(genesis.transaction, Transaction::Genesis(_))
        && genesis.previous_hash == BlockHash::GENESIS_PREVIOUS;
    if !genesis_ok {
        return VerifyReport::broken(0, 1, ChainBreak::MalformedGenesis);
    }

    for (position, block) in blocks.iter().enumerate() {
        let position_index = position as u64;
        let checked = position + 1;

        if position > 0 {
            let prev = &blocks[position - 1];
            if block.index != prev.index + 1 {
                return VerifyReport::broken(
                    position_index,
                    checked,
                    ChainBreak::IndexGap {
                        expected: prev.index + 1,
                        found: block.index,
                    },
                );
            }
            if block.previous_hash != prev.hash {
                return VerifyReport::broken(
                    position_index,
                    checked,
                    ChainBreak::LinkMismatch {
                        expected: prev.hash,
                        found: block.previous_hash,
                    },
                );
            }
            if block.timestamp < prev.timestamp {
                return VerifyReport::broken(position_index, checked, ChainBreak::TimestampRegression);
            }
        }

        if block.timestamp.nanosecond() % 1_000_000 != 0 {
            return VerifyReport::broken(position_index, checked, ChainBreak::SubMillisecondTimestamp);
        }

        match block.recompute_hash() {
            Ok(recomputed) if recomputed == block.hash => {}
            Ok(recomputed) => {
                return VerifyReport::broken(
                    position_index,
                    checked,
                    ChainBreak::HashMismatch {
                        stored: block.hash,
                        recomputed,
                    },
                );
            }
            Err(e) => {
                return VerifyReport::broken(
                    position_index,
                    checked,
                    ChainBreak::Unhashable {
                        detail: e.to_string(),
                    },
                );
            }
        }
    }

    VerifyReport::ok(blocks.len())
}

/// In-memory store for tests, caches and single-process deployments
#[derive(Debug, Default)]
pub struct MemoryStore {
    blocks: RwLock<Vec<Block>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an existing chain as-is, without validation.
    ///
    /// Used to import chains and to inspect damaged ones.
    pub fn from_blocks(blocks: Vec<Block>) -> Self {
        Self {
            blocks: RwLock::new(blocks),
        }
    }
}

impl BlockStore for MemoryStore {
    fn tail(&self) -> Result<Option<Block>, StoreError> {
        Ok(self.blocks.read().last().cloned())
    }

    fn blocks(&self) -> Result<Vec<Block>, StoreError> {
        Ok(self.blocks.read().clone())
    }

    fn blocks_from(&self, start: u64) -> Result<Vec<Block>, StoreError> {
        let blocks = self.blocks.read();
        let offset = blocks.partition_point(|b| b.index < start);
        Ok(blocks[offset..].to_vec())
    }

    fn append(&self, block: &Block) -> Result<(), StoreError> {
        let mut blocks = self.blocks.write();
        check_extends(blocks.last(), block)?;
        blocks.push(block.clone());
        Ok(())
    }

    fn replace_with_genesis(&self, genesis: &Block) -> Result<(), StoreError> {
        let mut blocks = self.blocks.write();
        blocks.clear();
        blocks.push(genesis.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct FileCursor {
    /// Bytes of the data file already parsed into the cache
    synced_len: u64,
}

/// JSON-lines file store: one block per line, in insertion order.
///
/// Writers in any process serialize on an exclusive lock of a sidecar `.lock` file, then
/// pick up blocks other processes appended before checking linkage.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
    cache: RwLock<Vec<Block>>,
    cursor: Mutex<FileCursor>,
}

impl FileStore {
    /// Open (creating if needed) the store at `path` and load its chain
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        OpenOptions::new().create(true).append(true).open(&path)?;

        let mut lock_name = path.as_os_str().to_os_string();
        lock_name.push(".lock");

        let store = Self {
            path,
            lock_path: PathBuf::from(lock_name),
            cache: RwLock::new(Vec::new()),
            cursor: Mutex::new(FileCursor::default()),
        };
        {
            let mut cursor = store.cursor.lock();
            store.sync_from_disk(&mut cursor)?;
        }
        debug!(path = %store.path.display(), blocks = store.cache.read().len(), "File store opened");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_file(&self) -> Result<File, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.lock_path)?;
        file.lock_exclusive()?;
        Ok(file)
    }

    /// Parse any complete lines written since the last sync
    fn sync_from_disk(&self, cursor: &mut FileCursor) -> Result<(), StoreError> {
        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();

        if len < cursor.synced_len || (cursor.synced_len > 0 && self.genesis_replaced(&mut file)?) {
            warn!(path = %self.path.display(), "Data file was reset; reloading from start");
            cursor.synced_len = 0;
            self.cache.write().clear();
        }
        if len == cursor.synced_len {
            return Ok(());
        }

        file.seek(SeekFrom::Start(cursor.synced_len))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        // A trailing partial line belongs to a writer still in progress, or to one that
        // crashed; the next locked append discards the latter.
        let Some(last_newline) = buf.iter().rposition(|b| *b == b'\n') else {
            return Ok(());
        };
        let complete = &buf[..=last_newline];

        let mut parsed = Vec::new();
        let base_line = self.cache.read().len();
        for (offset, line) in complete.split(|b| *b == b'\n').enumerate() {
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            let block: Block =
                serde_json::from_slice(line).map_err(|e| StoreError::CorruptRecord {
                    line: base_line + offset + 1,
                    reason: e.to_string(),
                })?;
            parsed.push(block);
        }

        self.cache.write().extend(parsed);
        cursor.synced_len += complete.len() as u64;
        Ok(())
    }

    /// Whether another handle has reset the file since it was last read
    fn genesis_replaced(&self, file: &mut File) -> Result<bool, StoreError> {
        let Some(cached) = self.cache.read().first().map(|b| b.hash) else {
            return Ok(false);
        };
        file.seek(SeekFrom::Start(0))?;
        let mut first = Vec::new();
        BufReader::new(&mut *file).read_until(b'\n', &mut first)?;
        let block: Block = serde_json::from_slice(&first).map_err(|e| StoreError::CorruptRecord {
            line: 1,
            reason: e.to_string(),
        })?;
        Ok(block.hash != cached)
    }

    fn encode(block: &Block) -> Result<Vec<u8>, StoreError> {
        let mut line = serde_json::to_vec(block).map_err(|e| StoreError::CorruptRecord {
            line: block.index as usize + 1,
            reason: e.to_string(),
        })?;
        line.push(b'\n');
        Ok(line)
    }
}

impl BlockStore for FileStore {
    fn tail(&self) -> Result<Option<Block>, StoreError> {
        {
            let mut cursor = self.cursor.lock();
            self.sync_from_disk(&mut cursor)?;
        }
        Ok(self.cache.read().last().cloned())
    }

    fn blocks(&self) -> Result<Vec<Block>, StoreError> {
        {
            let mut cursor = self.cursor.lock();
            self.sync_from_disk(&mut cursor)?;
        }
        Ok(self.cache.read().clone())
    }

    fn append(&self, block: &Block) -> Result<(), StoreError> {
        let mut cursor = self.cursor.lock();
        let lock = self.lock_file()?;

        self.sync_from_disk(&mut cursor)?;
        check_extends(self.cache.read().last(), block)?;

        let line = Self::encode(block)?;
        let mut file = OpenOptions::new().write(true).open(&self.path)?;

        // Under the lock nobody else is mid-write, so bytes past the last parsed line are
        // residue of a crashed writer.
        let len = file.metadata()?.len();
        if len > cursor.synced_len {
            warn!(
                path = %self.path.display(),
                discarded = len - cursor.synced_len,
                "Truncating torn trailing record"
            );
            file.set_len(cursor.synced_len)?;
        }
        file.seek(SeekFrom::Start(cursor.synced_len))?;

        if let Err(e) = file.write_all(&line).and_then(|()| file.sync_data()) {
            if let Err(rollback) = file.set_len(cursor.synced_len) {
                warn!(path = %self.path.display(), error = %rollback, "Could not roll back partial write");
            }
            return Err(e.into());
        }

        cursor.synced_len += line.len() as u64;
        self.cache.write().push(block.clone());

        lock.unlock()?;
        Ok(())
    }

    fn replace_with_genesis(&self, genesis: &Block) -> Result<(), StoreError> {
        let mut cursor = self.cursor.lock();
        let lock = self.lock_file()?;

        let line = Self::encode(genesis)?;
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&line)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        cursor.synced_len = line.len() as u64;
        {
            let mut cache = self.cache.write();
            cache.clear();
            cache.push(genesis.clone());
        }

        lock.unlock()?;
        Ok(())
    }
}
