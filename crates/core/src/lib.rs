//! # vptree-core
//!
//! Persistent vantage-point tree index over fixed-dimension feature vectors,
//! backed by an embedded transactional key-value engine.
//!
//! This is the core library crate with zero async dependencies, suitable for
//! embedding directly or driving from the `vptree` command-line tool.
//!
//! ```text
//! insert(vector) → features::process → Database::update ─┐
//!                                                        ├ allocate id
//!                                                        ├ fetch root (id 0)
//!                                                        ├ descend by DistanceMetric
//!                                                        └ put parent + node (codec v1)
//! Persistence: WAL (one CRC32 frame per transaction + fsync) → Snapshots (bincode)
//! ```

/// Fixed-width binary node record layout (version 1).
pub mod codec;
/// Global configuration constants and the persisted per-index configuration.
pub mod config;
/// Crate-wide error type.
pub mod error;
/// Feature processing: normalization, L1 norm, and entropy-based complexity.
pub mod features;
/// Vantage-point tree index: insertion, node store, and validation.
pub mod index;
/// Distance metrics between nodes.
pub mod metric;
/// Tree node model.
pub mod node;
/// Storage layer: buckets, transactions, write-ahead log, and snapshots.
pub mod storage;

pub use config::IndexConfig;
pub use error::{Error, Result};
pub use index::SimilarityIndex;
pub use metric::DistanceMetric;
pub use node::{FeatureVector, Node, NodeId};
pub use storage::Database;
