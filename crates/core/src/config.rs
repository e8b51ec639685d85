//! Configuration for vptree-db.
//!
//! Tuning parameters, on-disk names, and input validation limits are compile-time
//! constants. The per-index settings that must stay fixed for the lifetime of a
//! store (dimension, bucket, distance metric) live in [`IndexConfig`], which is
//! persisted next to the tree when the index is bootstrapped.

use crate::metric::DistanceMetric;
use serde::{Deserialize, Serialize};

/// Default feature vector dimension.
///
/// Matches the 80-bin descriptors the index was first built for.
pub const DEFAULT_DIMENSION: usize = 80;

/// Maximum allowed feature vector dimension.
///
/// Bounds the record size at `64 + 16 * MAX_DIMENSION` bytes.
pub const MAX_DIMENSION: usize = 4096;

/// Default name of the bucket holding the tree nodes.
pub const DEFAULT_BUCKET: &str = "sys";

/// Bucket holding one serialized [`IndexConfig`] per index bucket.
pub const META_BUCKET: &str = "meta";

/// Id of the pre-existing root node every descent starts from.
pub const ROOT_ID: u64 = 0;

/// Version written in the first two bytes of every node record.
pub const RECORD_FORMAT_VERSION: u16 = 1;

/// Fixed header size of a node record, before the two key arrays.
pub const RECORD_HEADER_LEN: usize = 64;

/// File name of the write-ahead log inside a database directory.
pub const WAL_FILE_NAME: &str = "wal.bin";

/// File name of the snapshot inside a database directory.
pub const SNAPSHOT_FILE_NAME: &str = "snapshot.vdb";

/// Maximum payload length of one WAL frame (64 MiB).
///
/// An insert at `MAX_DIMENSION` writes two records of about 64 KiB each. Replay
/// treats a header announcing more than this as a torn tail.
pub const MAX_WAL_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Maximum length of a bucket name in bytes.
pub const MAX_BUCKET_NAME_LEN: usize = 128;

/// Settings of one index. Written once at bootstrap and reloaded on open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Number of components in every feature vector.
    pub dimension: usize,
    /// Bucket the nodes are stored in.
    pub bucket: String,
    /// Distance function used to partition the tree.
    pub metric: DistanceMetric,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
            bucket: DEFAULT_BUCKET.to_string(),
            metric: DistanceMetric::default(),
        }
    }
}

impl IndexConfig {
    /// Creates a config with the given dimension and the default bucket and metric.
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::default()
        }
    }

    /// Check the limits on dimension and bucket name.
    pub fn validate(&self) -> Result<(), String> {
        if self.dimension == 0 || self.dimension > MAX_DIMENSION {
            return Err(format!(
                "dimension must be between 1 and {}, got {}",
                MAX_DIMENSION, self.dimension
            ));
        }
        if self.bucket.is_empty() || self.bucket.len() > MAX_BUCKET_NAME_LEN {
            return Err(format!(
                "bucket name must be 1 to {} bytes, got {}",
                MAX_BUCKET_NAME_LEN,
                self.bucket.len()
            ));
        }
        if self.bucket == META_BUCKET {
            return Err(format!("bucket name '{}' is reserved", META_BUCKET));
        }
        Ok(())
    }

    /// Size in bytes of one encoded node record for this dimension.
    pub fn record_len(&self) -> usize {
        record_len(self.dimension)
    }
}

/// Size in bytes of one encoded node record with `dimension` components.
pub const fn record_len(dimension: usize) -> usize {
    RECORD_HEADER_LEN + 16 * dimension
}
