//! Synchronous Write-Ahead Log (WAL) for crash recovery.
//!
//! Every committed write transaction is appended to the WAL as a single frame
//! before it is applied in memory, so replay restores whole transactions or
//! nothing. Each frame is `[u32 length BE][u32 CRC32 BE][bincode payload]` and
//! is durably flushed with `fsync`. A frame that fails to
//! write is cut off again before the error is returned.

use crate::config::{MAX_WAL_FRAME_LEN, WAL_FILE_NAME};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

/// One mutation inside a committed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalOp {
    /// Create an empty bucket.
    CreateBucket { bucket: String },
    /// Insert or overwrite a key.
    Put {
        bucket: String,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    /// Advance a bucket's sequence to `value`.
    SetSequence { bucket: String, value: u64 },
}

/// A committed transaction: the unit of replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Transaction number, strictly increasing across the database lifetime.
    pub txn: u64,
    /// Operations in the order they were issued.
    pub ops: Vec<WalOp>,
}

/// Diagnostic statistics from a WAL replay.
#[derive(Debug, Default)]
pub struct ReplayStats {
    /// Number of transactions successfully read.
    pub success: usize,
    /// Number of CRC mismatches encountered (replay stopped).
    pub crc_errors: usize,
    /// Whether replay was terminated by a truncated frame.
    pub truncated: bool,
    /// Length in bytes of the intact prefix of the log.
    pub valid_len: u64,
}

impl ReplayStats {
    /// True when replay stopped before the end of the file.
    pub fn stopped_early(&self) -> bool {
        self.truncated || self.crc_errors > 0
    }
}

/// Synchronous append-only write-ahead log with CRC32 integrity checks.
///
/// Thread-safe via `parking_lot::Mutex`. Each [`append`](SyncWriteAheadLog::append)
/// call writes and fsyncs one whole frame before returning. A failed append
/// cuts the file back to the end of the last good frame, so a transaction that
/// was reported as failed never replays.
pub struct SyncWriteAheadLog {
    /// Mutex-protected WAL file and its last known good length.
    writer: Mutex<WalWriter>,
    /// Write gate: freeze() takes exclusive, append() takes shared.
    write_gate: parking_lot::RwLock<()>,
    /// Path to WAL file (needed for replay/truncate).
    path: PathBuf,
}

struct WalWriter {
    file: File,
    /// File length at the end of the last fully synced frame.
    synced_len: u64,
    /// Set when a failed append could not be rolled back; all writes are refused.
    poisoned: bool,
}

impl WalWriter {
    /// Drop whatever part of a failed frame reached the file.
    fn rollback(&mut self) -> io::Result<()> {
        self.file.set_len(self.synced_len)?;
        self.file.sync_all()
    }

    fn check_usable(&self) -> Result<()> {
        if self.poisoned {
            return Err(Error::Storage(io::Error::other(
                "write-ahead log could not be rolled back after a failed append; reopen the database",
            )));
        }
        Ok(())
    }
}

impl SyncWriteAheadLog {
    /// Open or create the WAL file of a database directory in append mode.
    pub fn open(dir: &Path) -> io::Result<Self> {
        let path = dir.join(WAL_FILE_NAME);
        let file = open_append(&path)?;
        let synced_len = file.metadata()?.len();
        Ok(Self {
            writer: Mutex::new(WalWriter {
                file,
                synced_len,
                poisoned: false,
            }),
            write_gate: parking_lot::RwLock::new(()),
            path,
        })
    }

    /// Append a committed transaction synchronously.
    ///
    /// On failure the log is restored to its length before the call. If that
    /// restore fails too, the log refuses every later write.
    pub fn append(&self, entry: &WalEntry) -> Result<()> {
        let framed = serialize_and_frame(entry)?;

        let _gate = self.write_gate.read();
        let mut w = self.writer.lock();
        w.check_usable()?;

        let written = w.file.write_all(&framed).and_then(|()| w.file.sync_all());
        if let Err(e) = written {
            tracing::error!(
                "WAL append of txn {} failed: {}; rolling back to {} bytes",
                entry.txn,
                e,
                w.synced_len
            );
            if let Err(rollback) = w.rollback() {
                tracing::error!("WAL rollback failed, refusing further writes: {}", rollback);
                w.poisoned = true;
            }
            return Err(e.into());
        }
        w.synced_len += framed.len() as u64;
        Ok(())
    }

    /// Read all intact transactions from the WAL, in commit order.
    ///
    /// A truncated tail, an oversized length header, or a CRC mismatch ends
    /// replay; everything before it is returned. A frame whose checksum matches
    /// but whose payload does not decode is reported as [`Error::Corrupt`].
    pub fn replay(&self) -> Result<(Vec<WalEntry>, ReplayStats)> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        let mut stats = ReplayStats::default();
        let mut header_buf = [0u8; 8];

        loop {
            match read_full(&mut reader, &mut header_buf)? {
                ReadOutcome::Full => {}
                ReadOutcome::Eof => break,
                ReadOutcome::Partial => {
                    tracing::warn!("WAL truncated mid-header, stopping replay");
                    stats.truncated = true;
                    break;
                }
            }
            let len =
                u32::from_be_bytes([header_buf[0], header_buf[1], header_buf[2], header_buf[3]])
                    as usize;
            let stored_crc =
                u32::from_be_bytes([header_buf[4], header_buf[5], header_buf[6], header_buf[7]]);
            if len > MAX_WAL_FRAME_LEN {
                tracing::warn!(
                    "WAL frame header announces {} bytes (max {}), stopping replay",
                    len,
                    MAX_WAL_FRAME_LEN
                );
                stats.truncated = true;
                break;
            }
            let mut data = vec![0u8; len];
            if read_full(&mut reader, &mut data)? != ReadOutcome::Full {
                tracing::warn!("WAL truncated mid-entry, stopping replay");
                stats.truncated = true;
                break;
            }
            let computed_crc = crc32fast::hash(&data);
            if computed_crc != stored_crc {
                tracing::warn!("WAL entry CRC mismatch, stopping replay");
                stats.crc_errors += 1;
                break;
            }
            let entry = bincode::deserialize::<WalEntry>(&data).map_err(|e| {
                Error::Corrupt(format!(
                    "WAL entry at offset {} does not decode: {}",
                    stats.valid_len, e
                ))
            })?;
            entries.push(entry);
            stats.success += 1;
            stats.valid_len += 8 + len as u64;
        }

        Ok((entries, stats))
    }

    /// Acquire an exclusive write gate, blocking all [`append`](SyncWriteAheadLog::append) calls.
    ///
    /// Hold the returned guard while performing snapshot + truncate.
    pub fn freeze(&self) -> parking_lot::RwLockWriteGuard<'_, ()> {
        self.write_gate.write()
    }

    /// Truncate the WAL file and fsync.
    pub fn truncate(&self) -> Result<()> {
        self.truncate_to(0)
    }

    /// Cut the WAL back to its first `len` bytes, dropping a damaged tail.
    pub fn truncate_to(&self, len: u64) -> Result<()> {
        let mut w = self.writer.lock();
        w.file.set_len(len)?;
        w.file.sync_all()?;
        w.synced_len = len;
        w.poisoned = false;
        Ok(())
    }

    /// Fsync the WAL file.
    pub fn sync(&self) -> Result<()> {
        let w = self.writer.lock();
        w.check_usable()?;
        w.file.sync_all()?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn replace_file(&self, file: File) {
        self.writer.lock().file = file;
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts.open(path)
}

#[derive(Debug, PartialEq, Eq)]
enum ReadOutcome {
    Full,
    Eof,
    Partial,
}

/// Like `read_exact`, but tells a clean end of file apart from a torn frame.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<ReadOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(if filled == 0 {
                    ReadOutcome::Eof
                } else {
                    ReadOutcome::Partial
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(ReadOutcome::Full)
}

/// Serialize a WAL entry into its on-disk frame format:
/// `[u32 len BE][u32 crc32 BE][bincode payload]`.
fn serialize_and_frame(entry: &WalEntry) -> Result<Vec<u8>> {
    let bytes = bincode::serialize(entry)?;
    if bytes.len() > MAX_WAL_FRAME_LEN {
        return Err(Error::Invalid(format!(
            "transaction {} is {} bytes, above the {} byte frame limit",
            entry.txn,
            bytes.len(),
            MAX_WAL_FRAME_LEN
        )));
    }
    let len = bytes.len() as u32;
    let crc = crc32fast::hash(&bytes);

    let mut framed = Vec::with_capacity(8 + bytes.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(&crc.to_be_bytes());
    framed.extend_from_slice(&bytes);
    Ok(framed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn put(txn: u64, key: u8) -> WalEntry {
        WalEntry {
            txn,
            ops: vec![
                WalOp::Put {
                    bucket: "b".into(),
                    key: vec![key],
                    value: vec![key, key],
                },
                WalOp::SetSequence {
                    bucket: "b".into(),
                    value: txn,
                },
            ],
        }
    }

    #[test]
    fn test_append_and_replay() {
        let dir = TempDir::new().unwrap();
        let wal = SyncWriteAheadLog::open(dir.path()).unwrap();
        wal.append(&WalEntry {
            txn: 1,
            ops: vec![WalOp::CreateBucket { bucket: "b".into() }],
        })
        .unwrap();
        wal.append(&put(2, 9)).unwrap();

        let (entries, stats) = wal.replay().unwrap();
        assert_eq!(stats.success, 2);
        assert_eq!(stats.crc_errors, 0);
        assert!(!stats.stopped_early());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1], put(2, 9));
        let file_len = std::fs::metadata(dir.path().join(WAL_FILE_NAME))
            .unwrap()
            .len();
        assert_eq!(stats.valid_len, file_len);
    }

    #[test]
    fn test_truncate_clears_wal() {
        let dir = TempDir::new().unwrap();
        let wal = SyncWriteAheadLog::open(dir.path()).unwrap();
        wal.append(&put(1, 1)).unwrap();
        wal.truncate().unwrap();
        let (entries, _) = wal.replay().unwrap();
        assert!(entries.is_empty(), "WAL should be empty after truncate");
    }

    #[test]
    fn test_torn_tail_is_dropped() {
        let dir = TempDir::new().unwrap();
        let wal_path = dir.path().join(WAL_FILE_NAME);
        {
            let wal = SyncWriteAheadLog::open(dir.path()).unwrap();
            wal.append(&put(1, 1)).unwrap();
            wal.append(&put(2, 2)).unwrap();
        }
        let data = std::fs::read(&wal_path).unwrap();
        std::fs::write(&wal_path, &data[..data.len() - 3]).unwrap();

        let wal = SyncWriteAheadLog::open(dir.path()).unwrap();
        let (entries, stats) = wal.replay().unwrap();
        assert_eq!(entries, vec![put(1, 1)]);
        assert!(stats.truncated);

        // After cutting the tail, new frames replay again.
        wal.truncate_to(stats.valid_len).unwrap();
        wal.append(&put(3, 3)).unwrap();
        let (entries, stats) = wal.replay().unwrap();
        assert_eq!(entries, vec![put(1, 1), put(3, 3)]);
        assert!(!stats.stopped_early());
    }

    #[test]
    fn test_rolled_back_frame_never_replays() {
        let dir = TempDir::new().unwrap();
        let wal_path = dir.path().join(WAL_FILE_NAME);
        let wal = SyncWriteAheadLog::open(dir.path()).unwrap();
        wal.append(&put(1, 1)).unwrap();
        let good_len = std::fs::metadata(&wal_path).unwrap().len();

        // Half of the next frame reaches the file before the write fails.
        let aborted = serialize_and_frame(&put(2, 100)).unwrap();
        {
            let mut w = wal.writer.lock();
            w.file.write_all(&aborted[..aborted.len() / 2]).unwrap();
            w.rollback().unwrap();
        }
        assert_eq!(std::fs::metadata(&wal_path).unwrap().len(), good_len);

        // The retry reuses txn 2 and must be the one that replays.
        wal.append(&put(2, 2)).unwrap();
        let (entries, stats) = wal.replay().unwrap();
        assert_eq!(entries, vec![put(1, 1), put(2, 2)]);
        assert!(!stats.stopped_early());
    }

    #[test]
    fn test_failed_append_without_rollback_refuses_writes() {
        let dir = TempDir::new().unwrap();
        let wal_path = dir.path().join(WAL_FILE_NAME);
        let wal = SyncWriteAheadLog::open(dir.path()).unwrap();
        wal.append(&put(1, 1)).unwrap();
        let good_len = std::fs::metadata(&wal_path).unwrap().len();

        // A read-only handle fails both the write and the rollback.
        wal.replace_file(File::open(&wal_path).unwrap());
        assert!(matches!(wal.append(&put(2, 2)), Err(Error::Storage(_))));
        assert!(matches!(wal.append(&put(2, 3)), Err(Error::Storage(_))));
        assert!(wal.sync().is_err());
        assert_eq!(std::fs::metadata(&wal_path).unwrap().len(), good_len);

        let reopened = SyncWriteAheadLog::open(dir.path()).unwrap();
        let (entries, _) = reopened.replay().unwrap();
        assert_eq!(entries, vec![put(1, 1)]);
    }

    #[test]
    fn test_oversized_length_header_is_a_torn_tail() {
        let dir = TempDir::new().unwrap();
        let wal_path = dir.path().join(WAL_FILE_NAME);
        {
            let wal = SyncWriteAheadLog::open(dir.path()).unwrap();
            wal.append(&put(1, 1)).unwrap();
        }
        let good_len = std::fs::metadata(&wal_path).unwrap().len();
        let mut data = std::fs::read(&wal_path).unwrap();
        data.extend_from_slice(&u32::MAX.to_be_bytes());
        data.extend_from_slice(&[0u8; 12]);
        std::fs::write(&wal_path, &data).unwrap();

        let wal = SyncWriteAheadLog::open(dir.path()).unwrap();
        let (entries, stats) = wal.replay().unwrap();
        assert_eq!(entries, vec![put(1, 1)]);
        assert!(stats.truncated);
        assert_eq!(stats.valid_len, good_len);
    }

    #[test]
    fn test_crc_corruption_detected() {
        let dir = TempDir::new().unwrap();
        let wal_path = dir.path().join(WAL_FILE_NAME);
        {
            let wal = SyncWriteAheadLog::open(dir.path()).unwrap();
            wal.append(&put(1, 1)).unwrap();
        }
        // Corrupt one byte in the payload
        let mut data = std::fs::read(&wal_path).unwrap();
        data[10] ^= 0xFF;
        std::fs::write(&wal_path, &data).unwrap();

        let wal = SyncWriteAheadLog::open(dir.path()).unwrap();
        let (entries, stats) = wal.replay().unwrap();
        assert!(entries.is_empty());
        assert_eq!(stats.crc_errors, 1);
        assert_eq!(stats.valid_len, 0);
    }

    #[test]
    fn test_freeze_and_truncate() {
        let dir = TempDir::new().unwrap();
        {
            let wal = SyncWriteAheadLog::open(dir.path()).unwrap();
            wal.append(&put(1, 1)).unwrap();
            let _gate = wal.freeze();
            wal.truncate().unwrap();
        }
        let wal = SyncWriteAheadLog::open(dir.path()).unwrap();
        wal.append(&put(2, 2)).unwrap();
        let (entries, _) = wal.replay().unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_serialize_and_frame_format() {
        let framed = serialize_and_frame(&put(5, 5)).unwrap();
        // First 4 bytes = length (BE), next 4 = CRC32 (BE)
        let len = u32::from_be_bytes([framed[0], framed[1], framed[2], framed[3]]) as usize;
        let stored_crc = u32::from_be_bytes([framed[4], framed[5], framed[6], framed[7]]);
        let payload = &framed[8..];
        assert_eq!(payload.len(), len);
        assert_eq!(crc32fast::hash(payload), stored_crc);
    }
}
