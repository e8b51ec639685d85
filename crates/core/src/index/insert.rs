//! Vantage-point insertion.
//!
//! A new node walks down from the root. At each visited node (`parent`):
//!
//! 1. empty left slot: attach as left child, fix `parent.radius` to the distance;
//! 2. distance ≤ radius: descend into the left child;
//! 3. empty right slot: attach as right child;
//! 4. otherwise: descend into the right child.
//!
//! Every subtree keeps its own root as vantage point and a radius, once set by
//! the first left child, never changes. Only the final parent and the new node
//! are written.

use crate::error::{Error, Result};
use crate::index::store::{NodeSource, NodeStore};
use crate::metric::DistanceMetric;
use crate::node::{Node, NodeId};

/// Which child slot a node was attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Where an insertion placed its node.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    /// Id of the inserted node.
    pub id: NodeId,
    /// Id of the node it was attached under.
    pub parent: NodeId,
    pub side: Side,
    /// Number of edges from the root to the inserted node.
    pub depth: usize,
    /// Distance to the parent, cached on the new node.
    pub distance: f64,
}

/// Place `node` (which must already carry its id) in the subtree rooted at `root`.
pub fn insert(
    store: &mut NodeStore<'_, '_>,
    metric: DistanceMetric,
    root: Node,
    mut node: Node,
) -> Result<Placement> {
    let id = node
        .id
        .ok_or_else(|| Error::Invalid("cannot insert a node without an id".to_string()))?;

    let mut parent = root;
    let mut depth = 1;
    loop {
        let parent_id = parent
            .id
            .ok_or_else(|| Error::Corrupt("stored node has no id".to_string()))?;
        let distance = metric.distance(&parent, &node)?;

        let side = match (parent.left, parent.right) {
            (None, _) => {
                parent.left = Some(id);
                parent.radius = distance;
                Side::Left
            }
            (Some(left), _) if distance <= parent.radius => {
                parent = store.get(left)?;
                depth += 1;
                continue;
            }
            (Some(_), None) => {
                parent.right = Some(id);
                Side::Right
            }
            (Some(_), Some(right)) => {
                parent = store.get(right)?;
                depth += 1;
                continue;
            }
        };

        node.distance_to_parent = distance;
        store.put(parent_id, &parent)?;
        store.put(id, &node)?;

        tracing::debug!(
            "Placed node {} as {:?} child of {} (depth {}, distance {})",
            id,
            side,
            parent_id,
            depth,
            distance
        );
        return Ok(Placement {
            id,
            parent: parent_id,
            side,
            depth,
            distance,
        });
    }
}
