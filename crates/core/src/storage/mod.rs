//! Storage layer: an embedded transactional key-value engine.
//!
//! Buckets live in memory inside a [`Database`]. Durability is provided by a
//! `SyncWriteAheadLog` (one CRC32-framed entry per committed transaction, fsync)
//! and bincode snapshots (atomic temp-file + rename).

/// Database handle, bucket state, and read/write transactions.
pub mod engine;
/// Disk persistence: snapshot save/load with atomic writes.
pub mod persistence;
/// Write-Ahead Log with CRC32 checksums.
pub mod wal;

pub use engine::{Database, ReadTxn, WriteTxn};
pub use wal::{ReplayStats, SyncWriteAheadLog, WalEntry, WalOp};
