//! Feature processing: derives the normalized key, L1 norm, and complexity
//! of a raw feature vector and wraps them in an unlinked [`Node`].
//!
//! Components must be finite and non-negative. A vector whose components sum
//! to zero gets an all-zero normalized key and a complexity of 1.

use crate::error::{Error, Result};
use crate::node::{FeatureVector, Node};

/// Build an unlinked node from a raw feature vector.
///
/// The returned node has no id, no children, and zero radius and parent distance.
pub fn process(key: FeatureVector) -> Result<Node> {
    check_components(&key)?;

    let l1_norm = l1_norm(&key);
    let normalized_key = normalize(&key, l1_norm);
    let complexity = complexity(&normalized_key);

    Ok(Node {
        id: None,
        left: None,
        right: None,
        key,
        radius: 0.0,
        normalized_key,
        l1_norm,
        complexity,
        distance_to_parent: 0.0,
    })
}

/// Sum of the components.
pub fn l1_norm(key: &[f64]) -> f64 {
    key.iter().sum()
}

/// Scale `key` by `1 / total`, or return zeros when `total` is not positive.
pub fn normalize(key: &[f64], total: f64) -> FeatureVector {
    if total > 0.0 {
        key.iter().map(|&x| x / total).collect()
    } else {
        vec![0.0; key.len()]
    }
}

/// Perplexity of a distribution: `exp(-Σ p ln p)` over the non-zero entries.
pub fn complexity(distribution: &[f64]) -> f64 {
    let entropy: f64 = distribution
        .iter()
        .filter(|&&p| p != 0.0)
        .map(|&p| -p * p.ln())
        .sum();
    entropy.exp()
}

fn check_components(key: &[f64]) -> Result<()> {
    for (i, &x) in key.iter().enumerate() {
        if !x.is_finite() {
            return Err(Error::InvalidVector(format!(
                "component {} is not finite ({})",
                i, x
            )));
        }
        if x < 0.0 {
            return Err(Error::InvalidVector(format!(
                "component {} is negative ({})",
                i, x
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_key_sums_to_one() {
        let node = process(vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(node.l1_norm, 10.0);
        let sum: f64 = node.normalized_key.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12, "sum should be 1, got {sum}");
        assert_eq!(node.normalized_key[3], 0.4);
    }

    #[test]
    fn test_zero_sum_gives_zero_key() {
        let node = process(vec![0.0; 5]).unwrap();
        assert_eq!(node.l1_norm, 0.0);
        assert!(node.normalized_key.iter().all(|&p| p == 0.0));
        assert_eq!(node.complexity, 1.0);
    }

    #[test]
    fn test_uniform_complexity_equals_dimension() {
        let node = process(vec![2.5; 8]).unwrap();
        assert!(
            (node.complexity - 8.0).abs() < 1e-9,
            "uniform perplexity should be 8, got {}",
            node.complexity
        );
    }

    #[test]
    fn test_single_spike_complexity_is_one() {
        let node = process(vec![0.0, 0.0, 7.0, 0.0]).unwrap();
        assert_eq!(node.complexity, 1.0);
    }

    #[test]
    fn test_zero_components_are_skipped() {
        // Two equal non-zero bins behave like a two-bin uniform distribution.
        let node = process(vec![0.0, 3.0, 0.0, 3.0, 0.0]).unwrap();
        assert!((node.complexity - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_negative_and_non_finite() {
        assert!(matches!(
            process(vec![1.0, -0.5]),
            Err(Error::InvalidVector(_))
        ));
        assert!(matches!(
            process(vec![f64::NAN, 1.0]),
            Err(Error::InvalidVector(_))
        ));
        assert!(matches!(
            process(vec![f64::INFINITY]),
            Err(Error::InvalidVector(_))
        ));
    }

    #[test]
    fn test_fresh_node_defaults() {
        let node = process(vec![1.0, 1.0]).unwrap();
        assert_eq!(node.radius, 0.0);
        assert_eq!(node.distance_to_parent, 0.0);
        assert_eq!(node.left, None);
        assert_eq!(node.right, None);
    }
}
