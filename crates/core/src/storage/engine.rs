//! Embedded transactional key-value engine.
//!
//! A [`Database`] is a directory holding named buckets. Each bucket maps byte
//! keys to byte values in key order and carries a monotonic `u64` sequence.
//! State lives in memory behind a `RwLock`; durability comes from the WAL
//! (one frame per committed transaction) and periodic snapshots.
//!
//! Write transactions are exclusive and exclude readers; read transactions
//! run concurrently with each other.

use crate::config::{SNAPSHOT_FILE_NAME, WAL_FILE_NAME};
use crate::error::{Error, Result};
use crate::storage::persistence::{load_snapshot, save_snapshot};
use crate::storage::wal::{SyncWriteAheadLog, WalEntry, WalOp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Contents of one bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketData {
    /// Last value handed out by `next_sequence` (0 = never).
    pub sequence: u64,
    pub entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

/// The complete in-memory state, as stored in snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    pub buckets: BTreeMap<String, BucketData>,
    /// Number of the last transaction folded into this state.
    pub last_txn: u64,
}

impl EngineState {
    /// Apply a committed transaction. Transactions at or below `last_txn`
    /// are already part of the state and are ignored.
    pub fn apply(&mut self, txn: u64, ops: Vec<WalOp>) {
        if txn <= self.last_txn {
            return;
        }
        for op in ops {
            match op {
                WalOp::CreateBucket { bucket } => {
                    self.buckets.entry(bucket).or_default();
                }
                WalOp::Put { bucket, key, value } => {
                    self.buckets
                        .entry(bucket)
                        .or_default()
                        .entries
                        .insert(key, value);
                }
                WalOp::SetSequence { bucket, value } => {
                    let data = self.buckets.entry(bucket).or_default();
                    data.sequence = data.sequence.max(value);
                }
            }
        }
        self.last_txn = txn;
    }
}

struct Shared {
    dir: PathBuf,
    state: RwLock<EngineState>,
    wal: SyncWriteAheadLog,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Err(e) = self.wal.sync() {
            tracing::warn!("Failed to sync WAL on close of {:?}: {}", self.dir, e);
        }
    }
}

/// Handle to an open database directory.
///
/// Cloning produces a new handle to the same shared state. The files are
/// released when the last handle is closed or dropped.
#[derive(Clone)]
pub struct Database {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("dir", &self.shared.dir)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Create a new, empty database at `dir`.
    ///
    /// Fails with [`Error::AlreadyExists`] if `dir` is a file or a non-empty directory.
    pub fn create(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if dir.exists() && (!dir.is_dir() || fs::read_dir(dir)?.next().is_some()) {
            return Err(Error::AlreadyExists(format!("{}", dir.display())));
        }
        fs::create_dir_all(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(dir, fs::Permissions::from_mode(0o700));
        }
        tracing::info!("Created database at {:?}", dir);
        Self::open(dir)
    }

    /// Open an existing database directory and recover its state.
    ///
    /// Loads the snapshot, then replays the WAL on top of it. A damaged WAL
    /// tail (torn frame or CRC mismatch) is cut off so later commits replay.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(Error::Storage(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("database directory {:?} does not exist", dir),
            )));
        }

        let mut state = load_snapshot(&dir)?.unwrap_or_default();
        let wal = SyncWriteAheadLog::open(&dir)?;
        let (entries, stats) = wal.replay()?;
        let replayed = entries.len();
        for entry in entries {
            state.apply(entry.txn, entry.ops);
        }
        if stats.stopped_early() {
            tracing::warn!(
                "WAL replay stopped early (truncated={}, crc_errors={}); discarding tail after {} bytes",
                stats.truncated,
                stats.crc_errors,
                stats.valid_len
            );
            wal.truncate_to(stats.valid_len)?;
        }

        tracing::info!(
            "Opened database {:?}: {} buckets, txn {}, {} WAL entries replayed",
            dir,
            state.buckets.len(),
            state.last_txn,
            replayed
        );

        Ok(Self {
            shared: Arc::new(Shared {
                dir,
                state: RwLock::new(state),
                wal,
            }),
        })
    }

    /// True if `dir` holds database files.
    pub fn exists(dir: impl AsRef<Path>) -> bool {
        let dir = dir.as_ref();
        dir.join(WAL_FILE_NAME).exists() || dir.join(SNAPSHOT_FILE_NAME).exists()
    }

    /// Run `f` in a read-only transaction.
    pub fn view<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&ReadTxn<'_>) -> Result<T>,
    {
        let state = self.shared.state.read();
        f(&ReadTxn { state: &*state })
    }

    /// Run `f` in an exclusive write transaction.
    ///
    /// If `f` returns `Ok`, its writes are logged as one WAL frame and then
    /// applied. If `f` fails, or the log write fails, nothing is applied and
    /// the error is returned unchanged.
    pub fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut WriteTxn<'_>) -> Result<T>,
    {
        let mut state = self.shared.state.write();
        let (out, ops) = {
            let mut txn = WriteTxn::new(&*state);
            let out = f(&mut txn)?;
            (out, txn.ops)
        };
        if ops.is_empty() {
            return Ok(out);
        }

        let entry = WalEntry {
            txn: state.last_txn + 1,
            ops,
        };
        self.shared.wal.append(&entry)?;
        tracing::debug!("Committed txn {} ({} ops)", entry.txn, entry.ops.len());
        state.apply(entry.txn, entry.ops);
        Ok(out)
    }

    /// Write a snapshot of the current state and truncate the WAL.
    pub fn checkpoint(&self) -> Result<()> {
        let state = self.shared.state.read();
        let _gate = self.shared.wal.freeze();
        save_snapshot(&state, &self.shared.dir)?;
        self.shared.wal.truncate()?;
        tracing::info!("Checkpoint complete at txn {}", state.last_txn);
        Ok(())
    }

    /// Flush the WAL and release this handle.
    pub fn close(self) -> Result<()> {
        self.shared.wal.sync()
    }
}

/// Read-only view of the database state.
pub struct ReadTxn<'a> {
    state: &'a EngineState,
}

impl<'a> ReadTxn<'a> {
    /// True if the bucket exists.
    pub fn bucket_exists(&self, bucket: &str) -> bool {
        self.state.buckets.contains_key(bucket)
    }

    /// Value stored under `key`, if any.
    pub fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<&'a [u8]>> {
        Ok(self.bucket(bucket)?.entries.get(key).map(Vec::as_slice))
    }

    /// Last value handed out by the bucket's sequence.
    pub fn sequence(&self, bucket: &str) -> Result<u64> {
        Ok(self.bucket(bucket)?.sequence)
    }

    /// Number of keys in the bucket.
    pub fn len(&self, bucket: &str) -> Result<usize> {
        Ok(self.bucket(bucket)?.entries.len())
    }

    fn bucket(&self, bucket: &str) -> Result<&'a BucketData> {
        self.state
            .buckets
            .get(bucket)
            .ok_or_else(|| Error::BucketNotFound(bucket.to_string()))
    }
}

/// An open write transaction. Reads observe this transaction's own writes.
pub struct WriteTxn<'a> {
    state: &'a EngineState,
    created: BTreeSet<String>,
    writes: HashMap<String, BTreeMap<Vec<u8>, Vec<u8>>>,
    sequences: HashMap<String, u64>,
    ops: Vec<WalOp>,
}

impl<'a> WriteTxn<'a> {
    fn new(state: &'a EngineState) -> Self {
        Self {
            state,
            created: BTreeSet::new(),
            writes: HashMap::new(),
            sequences: HashMap::new(),
            ops: Vec::new(),
        }
    }

    /// True if the bucket exists or was created in this transaction.
    pub fn bucket_exists(&self, bucket: &str) -> bool {
        self.state.buckets.contains_key(bucket) || self.created.contains(bucket)
    }

    /// Create an empty bucket. Fails if it already exists.
    pub fn create_bucket(&mut self, bucket: &str) -> Result<()> {
        if self.bucket_exists(bucket) {
            return Err(Error::AlreadyExists(format!("bucket '{}'", bucket)));
        }
        self.created.insert(bucket.to_string());
        self.ops.push(WalOp::CreateBucket {
            bucket: bucket.to_string(),
        });
        Ok(())
    }

    /// Create the bucket unless it already exists.
    pub fn create_bucket_if_missing(&mut self, bucket: &str) -> Result<()> {
        if self.bucket_exists(bucket) {
            return Ok(());
        }
        self.create_bucket(bucket)
    }

    /// Value stored under `key`, including writes made in this transaction.
    pub fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_bucket(bucket)?;
        if let Some(value) = self.writes.get(bucket).and_then(|w| w.get(key)) {
            return Ok(Some(value.clone()));
        }
        Ok(self
            .state
            .buckets
            .get(bucket)
            .and_then(|b| b.entries.get(key))
            .cloned())
    }

    /// Insert or overwrite `key`.
    pub fn put(&mut self, bucket: &str, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.check_bucket(bucket)?;
        self.writes
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_vec(), value.clone());
        self.ops.push(WalOp::Put {
            bucket: bucket.to_string(),
            key: key.to_vec(),
            value,
        });
        Ok(())
    }

    /// Advance the bucket's sequence and return the new value (first call returns 1).
    pub fn next_sequence(&mut self, bucket: &str) -> Result<u64> {
        let current = self.sequence(bucket)?;
        let next = current
            .checked_add(1)
            .ok_or_else(|| Error::Invalid(format!("sequence of bucket '{}' exhausted", bucket)))?;
        self.sequences.insert(bucket.to_string(), next);
        self.ops.push(WalOp::SetSequence {
            bucket: bucket.to_string(),
            value: next,
        });
        Ok(next)
    }

    /// Current sequence value, including increments made in this transaction.
    pub fn sequence(&self, bucket: &str) -> Result<u64> {
        self.check_bucket(bucket)?;
        if let Some(&seq) = self.sequences.get(bucket) {
            return Ok(seq);
        }
        Ok(self.state.buckets.get(bucket).map_or(0, |b| b.sequence))
    }

    fn check_bucket(&self, bucket: &str) -> Result<()> {
        if self.bucket_exists(bucket) {
            Ok(())
        } else {
            Err(Error::BucketNotFound(bucket.to_string()))
        }
    }
}
