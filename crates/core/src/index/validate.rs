//! Structural checks over a stored tree.

use crate::error::{Error, Result};
use crate::index::insert::Side;
use crate::index::store::NodeSource;
use crate::metric::DistanceMetric;
use crate::node::NodeId;
use std::collections::HashSet;

/// Shape of a validated tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Nodes reachable from the root, root excluded.
    pub nodes: u64,
    /// Nodes with no children, root included when the tree is empty.
    pub leaves: u64,
    /// Longest root-to-leaf path in edges.
    pub max_depth: usize,
}

/// Walk the tree from `root` and check its invariants.
///
/// - every reachable id decodes and is reached exactly once;
/// - the cached parent distance matches the metric;
/// - left children lie within their parent's radius, right children beyond it;
/// - the number of reachable nodes equals `allocated`.
pub fn validate(
    source: &impl NodeSource,
    metric: DistanceMetric,
    root: NodeId,
    allocated: u64,
) -> Result<TreeStats> {
    let mut stats = TreeStats::default();
    let mut seen: HashSet<NodeId> = HashSet::new();
    seen.insert(root);
    let mut stack = vec![(root, 0usize)];

    while let Some((id, depth)) = stack.pop() {
        let parent = source.get(id)?;
        stats.max_depth = stats.max_depth.max(depth);
        if parent.is_leaf() {
            stats.leaves += 1;
        }

        for (child_id, side) in [(parent.left, Side::Left), (parent.right, Side::Right)]
            .into_iter()
            .filter_map(|(c, s)| c.map(|c| (c, s)))
        {
            if !seen.insert(child_id) {
                return Err(Error::Invalid(format!(
                    "node {} is reachable more than once (again from {})",
                    child_id, id
                )));
            }
            let child = source.get(child_id)?;

            let distance = metric.distance(&parent, &child)?;
            if distance.to_bits() != child.distance_to_parent.to_bits() {
                return Err(Error::Invalid(format!(
                    "node {} caches distance {} to parent {}, metric gives {}",
                    child_id, child.distance_to_parent, id, distance
                )));
            }
            let within = child.distance_to_parent <= parent.radius;
            if within != (side == Side::Left) {
                return Err(Error::Invalid(format!(
                    "{:?} child {} of {} has distance {} against radius {}",
                    side, child_id, id, child.distance_to_parent, parent.radius
                )));
            }

            stats.nodes += 1;
            stack.push((child_id, depth + 1));
        }
    }

    if stats.nodes != allocated {
        return Err(Error::Invalid(format!(
            "{} nodes reachable from the root but {} ids allocated",
            stats.nodes, allocated
        )));
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IndexConfig, ROOT_ID};
    use crate::index::store::NodeStore;
    use crate::index::SimilarityIndex;
    use crate::storage::Database;
    use tempfile::TempDir;

    fn populated() -> (TempDir, SimilarityIndex) {
        let tmp = TempDir::new().unwrap();
        let db = Database::create(tmp.path().join("db")).unwrap();
        let index = SimilarityIndex::bootstrap(db, IndexConfig::with_dimension(3)).unwrap();
        for v in [
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [1.0, 1.0, 1.0],
            [5.0, 0.0, 1.0],
            [0.2, 0.3, 0.5],
        ] {
            index.insert(v.to_vec()).unwrap();
        }
        (tmp, index)
    }

    /// Rewrite one stored node with `edit` applied, bypassing the insertion path.
    fn tamper(index: &SimilarityIndex, id: NodeId, edit: impl FnOnce(&mut crate::node::Node)) {
        let config = index.config().clone();
        index
            .database()
            .update(|tx| {
                let mut store = NodeStore::new(tx, &config);
                let mut node = store.get(id)?;
                edit(&mut node);
                store.put(id, &node)
            })
            .unwrap();
    }

    #[test]
    fn test_valid_tree_stats() {
        let (_tmp, index) = populated();
        let stats = index.validate().unwrap();
        assert_eq!(stats.nodes, 5);
        assert!(stats.max_depth >= 1);
        assert!(stats.leaves >= 1);
    }

    #[test]
    fn test_shared_child_is_detected() {
        let (_tmp, index) = populated();
        let root = index.root().unwrap();
        let left = root.left.unwrap();
        // Point a leaf back at the root's left child.
        let leaf = (1..=5)
            .find(|&id| id != left && index.get(id).unwrap().is_leaf())
            .unwrap();
        tamper(&index, leaf, |n| n.right = Some(left));
        assert!(matches!(index.validate(), Err(Error::Invalid(_))));
    }

    #[test]
    fn test_cycle_to_root_is_detected() {
        let (_tmp, index) = populated();
        let leaf = (1..=5).find(|&id| index.get(id).unwrap().is_leaf()).unwrap();
        tamper(&index, leaf, |n| n.left = Some(ROOT_ID));
        assert!(matches!(index.validate(), Err(Error::Invalid(_))));
    }

    #[test]
    fn test_stale_distance_is_detected() {
        let (_tmp, index) = populated();
        tamper(&index, 1, |n| n.distance_to_parent += 1.0);
        assert!(matches!(index.validate(), Err(Error::Invalid(_))));
    }

    #[test]
    fn test_dangling_child_is_not_found() {
        let (_tmp, index) = populated();
        let leaf = (1..=5).find(|&id| index.get(id).unwrap().is_leaf()).unwrap();
        tamper(&index, leaf, |n| n.left = Some(99));
        assert!(matches!(index.validate(), Err(Error::NotFound { id: 99, .. })));
    }

    #[test]
    fn test_count_mismatch_is_detected() {
        let (_tmp, index) = populated();
        let config = index.config().clone();
        index
            .database()
            .update(|tx| tx.next_sequence(&config.bucket).map(|_| ()))
            .unwrap();
        assert!(matches!(index.validate(), Err(Error::Invalid(_))));
    }
}
