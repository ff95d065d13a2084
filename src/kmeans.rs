//! K-means clustering of feature vectors with jittered tie-breaking.
//!
//! The iteration count is fixed: exactly `max_steps` assignment/update passes are run, without any
//! convergence check. Before every assignment, a small random amount `|N(0, jitter)|` is added to
//! each point-to-centroid distance so that equidistant centroids are picked at random.
use rand::Rng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::SortError;

/// Default standard deviation of the noise added to every distance.
pub const DEFAULT_JITTER: f64 = 1e-4;
/// Minimum number of feature vectors to compute the distances in parallel.
pub const MIN_PARALLEL_VECTORS: usize = 1000;

/// Parameters of the clustering engine.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct KMeans {
    /// The number of clusters.
    num_clusters: usize,
    /// The number of assignment/update passes.
    max_steps: usize,
    /// The standard deviation of the tie-breaking noise.
    jitter: f64,
}

/// The outcome of a clustering run.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Clustering {
    /// The cluster ID of every feature vector.
    pub assignments: Vec<usize>,
    /// The centroid of every cluster.
    pub centroids: Vec<Vec<f64>>,
}

impl KMeans {
    /// Create a new clustering engine with the default jitter.
    /// Returns an error if the number of clusters or steps is zero.
    pub fn build(num_clusters: usize, max_steps: usize) -> Result<Self, SortError> {
        Self::build_with_jitter(num_clusters, max_steps, DEFAULT_JITTER)
    }

    /// Create a new clustering engine with a custom jitter.
    /// A zero jitter disables the tie-breaking noise, ties then go to the lowest cluster ID.
    pub fn build_with_jitter(
        num_clusters: usize,
        max_steps: usize,
        jitter: f64,
    ) -> Result<Self, SortError> {
        if num_clusters == 0 {
            return Err(SortError::InvalidParameter(
                "Number of clusters must be positive".to_string(),
            ));
        }
        if max_steps == 0 {
            return Err(SortError::InvalidParameter(
                "Number of steps must be positive".to_string(),
            ));
        }
        if !jitter.is_finite() || jitter < 0.0 {
            return Err(SortError::InvalidParameter(format!(
                "Jitter must be non-negative, got {}",
                jitter
            )));
        }
        Ok(KMeans {
            num_clusters,
            max_steps,
            jitter,
        })
    }

    pub fn num_clusters(&self) -> usize {
        self.num_clusters
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Cluster the feature vectors.
    ///
    /// The initial centroids are `num_clusters` feature vectors drawn uniformly at random (with
    /// replacement). A cluster left without members keeps its previous centroid.
    pub fn fit<R: Rng>(&self, data: &[Vec<f64>], rng: &mut R) -> Result<Clustering, SortError> {
        let dim = data
            .first()
            .map(|row| row.len())
            .ok_or_else(|| SortError::InvalidParameter("No feature vectors to cluster".to_string()))?;
        if data.iter().any(|row| row.len() != dim) {
            return Err(SortError::InvalidParameter(
                "Feature vectors must share the same dimension".to_string(),
            ));
        }
        if self.num_clusters > data.len() {
            return Err(SortError::InvalidParameter(format!(
                "Cannot form {} clusters from {} feature vectors",
                self.num_clusters,
                data.len()
            )));
        }
        let noise = Normal::new(0.0, self.jitter)
            .map_err(|e| SortError::InvalidParameter(format!("Invalid jitter: {}", e)))?;

        let mut centroids: Vec<Vec<f64>> = (0..self.num_clusters)
            .map(|_| data[rng.gen_range(0..data.len())].clone())
            .collect();
        let mut assignments = vec![0; data.len()];

        for step in 0..self.max_steps {
            let mut distances = pairwise_distances(data, &centroids);

            // Noise is drawn sequentially so that the outcome does not depend on parallelism
            for row in distances.iter_mut() {
                for d in row.iter_mut() {
                    *d += noise.sample(rng).abs();
                }
            }

            for (assignment, row) in assignments.iter_mut().zip(distances.iter()) {
                *assignment = nearest(row);
            }

            let empty = update_centroids(data, &assignments, &mut centroids);
            if empty > 0 {
                log::debug!("Step {}: {} empty cluster(s) kept their centroid", step, empty);
            }
        }

        log::debug!(
            "Clustered {} vectors into {} clusters in {} steps",
            data.len(),
            self.num_clusters,
            self.max_steps
        );
        Ok(Clustering {
            assignments,
            centroids,
        })
    }
}

/// Euclidean distance between two vectors of equal length.
pub fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// The distance from every vector (row) to every centroid (column).
fn pairwise_distances(data: &[Vec<f64>], centroids: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let distances_to = |row: &Vec<f64>| -> Vec<f64> {
        centroids
            .iter()
            .map(|centroid| euclidean(row, centroid))
            .collect()
    };
    if data.len() >= MIN_PARALLEL_VECTORS {
        data.par_iter().map(distances_to).collect()
    } else {
        data.iter().map(distances_to).collect()
    }
}

/// The index of the smallest distance, the first one in case of ties.
fn nearest(distances: &[f64]) -> usize {
    distances
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |(best, min), (k, d)| {
            if *d < min {
                (k, *d)
            } else {
                (best, min)
            }
        })
        .0
}

/// Move every centroid to the mean of its members.
/// Returns the number of clusters without members, whose centroids are left untouched.
fn update_centroids(data: &[Vec<f64>], assignments: &[usize], centroids: &mut [Vec<f64>]) -> usize {
    let dim = centroids.first().map_or(0, |c| c.len());
    let mut sums = vec![vec![0.0; dim]; centroids.len()];
    let mut counts = vec![0_usize; centroids.len()];

    for (row, k) in data.iter().zip(assignments.iter()) {
        counts[*k] += 1;
        sums[*k].iter_mut().zip(row.iter()).for_each(|(s, x)| *s += x);
    }

    let mut empty = 0;
    for ((centroid, sum), count) in centroids.iter_mut().zip(sums).zip(counts) {
        if count == 0 {
            empty += 1;
            continue;
        }
        *centroid = sum.into_iter().map(|s| s / count as f64).collect();
    }
    empty
}

impl Clustering {
    pub fn num_clusters(&self) -> usize {
        self.centroids.len()
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// The number of members of every cluster.
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.num_clusters()];
        self.assignments.iter().for_each(|k| sizes[*k] += 1);
        sizes
    }

    /// The indices of the vectors assigned to the cluster.
    pub fn members(&self, cluster_id: usize) -> Vec<usize> {
        self.assignments
            .iter()
            .enumerate()
            .filter(|(_, k)| **k == cluster_id)
            .map(|(i, _)| i)
            .collect()
    }

    /// The sum of squared distances from every vector to its centroid.
    pub fn inertia(&self, data: &[Vec<f64>]) -> f64 {
        data.iter()
            .zip(self.assignments.iter())
            .map(|(row, k)| euclidean(row, &self.centroids[*k]).powi(2))
            .sum()
    }
}
