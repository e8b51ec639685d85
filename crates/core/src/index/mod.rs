//! Persistent vantage-point tree index.
//!
//! A [`SimilarityIndex`] owns one bucket of a [`Database`]. Nodes are stored
//! under their 8-byte big-endian id; the root lives at id 0 and is written once
//! by [`SimilarityIndex::bootstrap`]. Every [`insert`](SimilarityIndex::insert)
//! runs in exactly one write transaction: allocate an id, fetch the root, walk
//! down, and write the final parent and the new node.

/// Vantage-point descent and attachment.
pub mod insert;
/// Node store over a bucket: get, put, and id allocation.
pub mod store;
/// Tree invariant checks.
pub mod validate;

pub use insert::{Placement, Side};
pub use store::{NodeReader, NodeSource, NodeStore};
pub use validate::TreeStats;

use crate::config::{IndexConfig, META_BUCKET, ROOT_ID};
use crate::error::{Error, Result};
use crate::features;
use crate::node::{FeatureVector, Node, NodeId};
use crate::storage::Database;

/// Handle to one vantage-point tree inside a database.
#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    db: Database,
    config: IndexConfig,
}

impl SimilarityIndex {
    /// Create the index bucket, record its configuration, and write the root node.
    ///
    /// The root has an all-zero key and no children. Fails with
    /// [`Error::AlreadyExists`] if the bucket already exists.
    pub fn bootstrap(db: Database, config: IndexConfig) -> Result<Self> {
        config.validate().map_err(Error::Invalid)?;
        let meta = bincode::serialize(&config)?;

        db.update(|tx| {
            tx.create_bucket(&config.bucket)?;
            tx.create_bucket_if_missing(META_BUCKET)?;
            tx.put(META_BUCKET, config.bucket.as_bytes(), meta)?;

            let mut root = features::process(vec![0.0; config.dimension])?;
            root.id = Some(ROOT_ID);
            NodeStore::new(tx, &config).put(ROOT_ID, &root)
        })?;

        tracing::info!(
            "Bootstrapped index '{}' (dimension {}, metric {})",
            config.bucket,
            config.dimension,
            config.metric
        );
        Ok(Self { db, config })
    }

    /// Open an index previously created with [`bootstrap`](Self::bootstrap).
    pub fn open(db: Database, bucket: &str) -> Result<Self> {
        let config = db.view(|tx| {
            if !tx.bucket_exists(bucket) {
                return Err(Error::BucketNotFound(bucket.to_string()));
            }
            let raw = if tx.bucket_exists(META_BUCKET) {
                tx.get(META_BUCKET, bucket.as_bytes())?
            } else {
                None
            };
            let raw = raw.ok_or_else(|| {
                Error::Invalid(format!("bucket '{}' has no index configuration", bucket))
            })?;
            bincode::deserialize::<IndexConfig>(raw)
                .map_err(|e| Error::Corrupt(format!("index configuration: {}", e)))
        })?;
        config.validate().map_err(Error::Invalid)?;
        if config.bucket != bucket {
            return Err(Error::Corrupt(format!(
                "configuration stored for '{}' names bucket '{}'",
                bucket, config.bucket
            )));
        }

        tracing::debug!(
            "Opened index '{}' (dimension {}, metric {})",
            config.bucket,
            config.dimension,
            config.metric
        );
        Ok(Self { db, config })
    }

    /// Settings this index was bootstrapped with.
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Underlying database handle.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Insert a raw feature vector and return the id assigned to it.
    pub fn insert(&self, vector: FeatureVector) -> Result<NodeId> {
        self.place(vector).map(|p| p.id)
    }

    /// Insert a raw feature vector and report where it was attached.
    pub fn place(&self, vector: FeatureVector) -> Result<Placement> {
        if vector.len() != self.config.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.config.dimension,
                actual: vector.len(),
            });
        }
        let mut node = features::process(vector)?;

        self.db.update(|tx| {
            let mut store = NodeStore::new(tx, &self.config);
            node.id = Some(store.allocate_id()?);
            let root = store.get(ROOT_ID)?;
            insert::insert(&mut store, self.config.metric, root, node)
        })
    }

    /// Fetch a node by id.
    pub fn get(&self, id: NodeId) -> Result<Node> {
        self.db
            .view(|tx| NodeReader::new(tx, &self.config).get(id))
    }

    /// Fetch the root node.
    pub fn root(&self) -> Result<Node> {
        self.get(ROOT_ID)
    }

    /// Number of inserted nodes, root excluded.
    pub fn len(&self) -> Result<u64> {
        self.db
            .view(|tx| NodeReader::new(tx, &self.config).allocated())
    }

    /// True when nothing has been inserted yet.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Check the tree invariants; see [`validate::validate`].
    pub fn validate(&self) -> Result<TreeStats> {
        self.db.view(|tx| {
            let reader = NodeReader::new(tx, &self.config);
            validate::validate(&reader, self.config.metric, ROOT_ID, reader.allocated()?)
        })
    }

    /// Release this handle and flush the database.
    pub fn close(self) -> Result<()> {
        self.db.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::DistanceMetric;
    use tempfile::TempDir;

    fn fresh(dimension: usize) -> (TempDir, SimilarityIndex) {
        let tmp = TempDir::new().unwrap();
        let db = Database::create(tmp.path().join("db")).unwrap();
        let index = SimilarityIndex::bootstrap(db, IndexConfig::with_dimension(dimension)).unwrap();
        (tmp, index)
    }

    #[test]
    fn test_bootstrap_writes_root() {
        let (_tmp, index) = fresh(4);
        let root = index.root().unwrap();
        assert_eq!(root.id, Some(ROOT_ID));
        assert!(root.is_leaf());
        assert_eq!(root.key, vec![0.0; 4]);
        assert!(index.is_empty().unwrap());
        assert_eq!(index.validate().unwrap().nodes, 0);
    }

    #[test]
    fn test_bootstrap_twice_fails() {
        let (_tmp, index) = fresh(4);
        let err = SimilarityIndex::bootstrap(index.database().clone(), IndexConfig::with_dimension(4))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn test_first_insert_attaches_left_of_root() {
        let (_tmp, index) = fresh(4);
        let id = index.insert(vec![1.0, 0.0, 0.0, 1.0]).unwrap();
        assert_eq!(id, 1);

        let root = index.root().unwrap();
        let v1 = index.get(id).unwrap();
        assert_eq!(root.left, Some(id));
        assert_eq!(root.right, None);
        let expected = index.config().metric.distance(&root, &v1).unwrap();
        assert_eq!(root.radius, expected);
        assert_eq!(v1.distance_to_parent, expected);
        assert!(v1.is_leaf());
    }

    #[test]
    fn test_dimension_mismatch_is_rejected_without_consuming_an_id() {
        let (_tmp, index) = fresh(4);
        let err = index.insert(vec![1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 4,
                actual: 2
            }
        ));
        assert_eq!(index.len().unwrap(), 0);
        assert_eq!(index.insert(vec![1.0; 4]).unwrap(), 1);
    }

    #[test]
    fn test_invalid_vector_is_rejected() {
        let (_tmp, index) = fresh(2);
        assert!(matches!(
            index.insert(vec![-1.0, 2.0]),
            Err(Error::InvalidVector(_))
        ));
        assert!(index.is_empty().unwrap());
    }

    #[test]
    fn test_missing_root_is_not_found_and_rolls_back() {
        let tmp = TempDir::new().unwrap();
        let db = Database::create(tmp.path().join("db")).unwrap();
        let config = IndexConfig::with_dimension(2);
        let meta = bincode::serialize(&config).unwrap();
        db.update(|tx| {
            tx.create_bucket(&config.bucket)?;
            tx.create_bucket(META_BUCKET)?;
            tx.put(META_BUCKET, config.bucket.as_bytes(), meta)
        })
        .unwrap();

        let index = SimilarityIndex::open(db, &config.bucket).unwrap();
        let err = index.insert(vec![1.0, 1.0]).unwrap_err();
        assert!(matches!(err, Error::NotFound { id: 0, .. }));
        // The allocated id was rolled back with the transaction.
        assert_eq!(index.len().unwrap(), 0);
    }

    #[test]
    fn test_open_restores_config() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db");
        let config = IndexConfig {
            dimension: 3,
            bucket: "features".to_string(),
            metric: DistanceMetric::NormalizedEuclidean,
        };
        {
            let index = SimilarityIndex::bootstrap(Database::create(&path).unwrap(), config.clone())
                .unwrap();
            index.insert(vec![1.0, 2.0, 3.0]).unwrap();
            index.close().unwrap();
        }
        let index = SimilarityIndex::open(Database::open(&path).unwrap(), "features").unwrap();
        assert_eq!(index.config(), &config);
        assert_eq!(index.len().unwrap(), 1);
        assert_eq!(index.insert(vec![3.0, 2.0, 1.0]).unwrap(), 2);
    }

    #[test]
    fn test_open_unknown_bucket() {
        let (_tmp, index) = fresh(2);
        let err = SimilarityIndex::open(index.database().clone(), "other").unwrap_err();
        assert!(matches!(err, Error::BucketNotFound(_)));
    }

    #[test]
    fn test_two_indexes_share_one_database() {
        let (_tmp, a) = fresh(2);
        let b = SimilarityIndex::bootstrap(
            a.database().clone(),
            IndexConfig {
                bucket: "second".to_string(),
                ..IndexConfig::with_dimension(3)
            },
        )
        .unwrap();
        assert_eq!(a.insert(vec![1.0, 1.0]).unwrap(), 1);
        assert_eq!(b.insert(vec![1.0, 1.0, 1.0]).unwrap(), 1);
        assert_eq!(a.insert(vec![2.0, 1.0]).unwrap(), 2);
        assert_eq!(b.len().unwrap(), 1);
    }
}
