//! Node access on top of a bucket.
//!
//! Nodes are looked up by id through the current transaction on every step;
//! nothing is cached between calls, so the stored records are the only source
//! of truth for the tree.

use crate::codec::{self, id_key};
use crate::config::IndexConfig;
use crate::error::{Error, Result};
use crate::node::{Node, NodeId};
use crate::storage::{ReadTxn, WriteTxn};

/// Anything nodes can be fetched from by id.
pub trait NodeSource {
    /// Fetch and decode a node. Fails with [`Error::NotFound`] if no record exists.
    fn get(&self, id: NodeId) -> Result<Node>;
}

/// Read and write access to the nodes of one index inside a write transaction.
pub struct NodeStore<'t, 'db> {
    txn: &'t mut WriteTxn<'db>,
    config: &'t IndexConfig,
}

impl<'t, 'db> NodeStore<'t, 'db> {
    pub fn new(txn: &'t mut WriteTxn<'db>, config: &'t IndexConfig) -> Self {
        Self { txn, config }
    }

    /// Upsert the record for `id`.
    pub fn put(&mut self, id: NodeId, node: &Node) -> Result<()> {
        if node.id != Some(id) {
            return Err(Error::Invalid(format!(
                "node with id {:?} cannot be stored under {}",
                node.id, id
            )));
        }
        if node.dimension() != self.config.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.config.dimension,
                actual: node.dimension(),
            });
        }
        self.txn
            .put(&self.config.bucket, &id_key(id), codec::encode(node))
    }

    /// Hand out the next node id. Ids start at 1; 0 is the root.
    pub fn allocate_id(&mut self) -> Result<NodeId> {
        self.txn.next_sequence(&self.config.bucket)
    }
}

impl NodeSource for NodeStore<'_, '_> {
    fn get(&self, id: NodeId) -> Result<Node> {
        let raw = self.txn.get(&self.config.bucket, &id_key(id))?;
        decode_record(self.config, id, raw.as_deref())
    }
}

/// Read-only access to the nodes of one index.
pub struct NodeReader<'t, 'db> {
    txn: &'t ReadTxn<'db>,
    config: &'t IndexConfig,
}

impl<'t, 'db> NodeReader<'t, 'db> {
    pub fn new(txn: &'t ReadTxn<'db>, config: &'t IndexConfig) -> Self {
        Self { txn, config }
    }

    /// Current value of the id sequence, i.e. the number of inserted nodes.
    pub fn allocated(&self) -> Result<u64> {
        self.txn.sequence(&self.config.bucket)
    }
}

impl NodeSource for NodeReader<'_, '_> {
    fn get(&self, id: NodeId) -> Result<Node> {
        let raw = self.txn.get(&self.config.bucket, &id_key(id))?;
        decode_record(self.config, id, raw)
    }
}

fn decode_record(config: &IndexConfig, id: NodeId, raw: Option<&[u8]>) -> Result<Node> {
    let raw = raw.ok_or_else(|| Error::NotFound {
        bucket: config.bucket.clone(),
        id,
    })?;
    let node = codec::decode(raw, config.dimension)?;
    if node.id != Some(id) {
        return Err(Error::Corrupt(format!(
            "record under key {} carries id {:?}",
            id, node.id
        )));
    }
    Ok(node)
}
