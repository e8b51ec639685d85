//! Distance metrics between tree nodes.
//!
//! Every metric is non-negative, symmetric, and zero exactly when the vectors
//! it looks at are identical. The metric is part of the persisted
//! [`IndexConfig`](crate::config::IndexConfig), so one store never mixes formulas.

use crate::error::{Error, Result};
use crate::node::Node;
use serde::{Deserialize, Serialize};

/// Distance function used to partition the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// L2 distance between raw keys. Range: \[0, ∞).
    Euclidean,
    /// L2 distance between normalized keys. Range: \[0, √2\].
    NormalizedEuclidean,
    /// L2 distance between normalized keys scaled by the complexity ratio
    /// `max(c_a, c_b) / min(c_a, c_b)`. Range: \[0, √2 · D\].
    #[default]
    ComplexityCorrected,
}

impl DistanceMetric {
    /// Compute the distance between two nodes.
    ///
    /// Fails with [`Error::DimensionMismatch`] when the keys differ in length.
    pub fn distance(&self, a: &Node, b: &Node) -> Result<f64> {
        if a.key.len() != b.key.len() {
            return Err(Error::DimensionMismatch {
                expected: a.key.len(),
                actual: b.key.len(),
            });
        }
        let d = match self {
            DistanceMetric::Euclidean => euclidean(&a.key, &b.key),
            DistanceMetric::NormalizedEuclidean => euclidean(&a.normalized_key, &b.normalized_key),
            DistanceMetric::ComplexityCorrected => {
                let base = euclidean(&a.normalized_key, &b.normalized_key);
                if base == 0.0 {
                    0.0
                } else {
                    base * complexity_ratio(a.complexity, b.complexity)
                }
            }
        };
        Ok(d)
    }

    /// Name used on the command line and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::NormalizedEuclidean => "normalized-euclidean",
            DistanceMetric::ComplexityCorrected => "complexity-corrected",
        }
    }
}

impl std::str::FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "euclidean" => Ok(DistanceMetric::Euclidean),
            "normalized-euclidean" => Ok(DistanceMetric::NormalizedEuclidean),
            "complexity-corrected" => Ok(DistanceMetric::ComplexityCorrected),
            other => Err(format!(
                "unknown metric '{}' (expected euclidean, normalized-euclidean or complexity-corrected)",
                other
            )),
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Ratio of the larger to the smaller complexity. Complexities are at least 1
/// for accepted inputs; the guard keeps the ratio finite for anything smaller.
fn complexity_ratio(ca: f64, cb: f64) -> f64 {
    let (lo, hi) = if ca <= cb { (ca, cb) } else { (cb, ca) };
    if lo > 0.0 {
        hi / lo
    } else {
        1.0
    }
}
