//! Tree node model.
//!
//! A [`Node`] is one feature vector placed in the tree together with the
//! statistics derived from it and the links to its two child subtrees.
//! Children are referenced by id and resolved through the store on every step.

use serde::{Deserialize, Serialize};

/// Node identifier, assigned from the bucket sequence. The root is id 0.
pub type NodeId = u64;

/// Fixed-length ordered sequence of real numbers.
pub type FeatureVector = Vec<f64>;

/// A vantage point in the tree.
///
/// Nodes reachable through `left` were within `radius` of this node when they
/// were inserted; nodes reachable through `right` were beyond it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Id in the bucket. `None` until the node is inserted.
    pub id: Option<NodeId>,
    /// Root of the "within radius" subtree.
    pub left: Option<NodeId>,
    /// Root of the "beyond radius" subtree.
    pub right: Option<NodeId>,
    /// Raw feature vector.
    pub key: FeatureVector,
    /// Distance separating the two subtrees. Fixed when the left child is attached.
    pub radius: f64,
    /// `key` scaled to sum to 1, or all zeros when the sum is not positive.
    pub normalized_key: FeatureVector,
    /// Sum of the components of `key`.
    pub l1_norm: f64,
    /// Exponential of the Shannon entropy of `normalized_key`.
    pub complexity: f64,
    /// Distance to the parent computed when this node was linked.
    pub distance_to_parent: f64,
}

impl Node {
    /// Number of components in the key.
    pub fn dimension(&self) -> usize {
        self.key.len()
    }

    /// True when neither child slot is occupied.
    pub fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    /// Iterate over the occupied child slots, left first.
    pub fn children(&self) -> impl Iterator<Item = NodeId> {
        self.left.into_iter().chain(self.right)
    }
}
