//! One-dimensional k-means.
//!
//! Partitions scalar observations into k groups by minimizing the
//! **within-cluster sum of squares** (WCSS). Both mixture engines use the result
//! as their starting point.
//!
//! # Lloyd's Algorithm
//!
//! 1. Draw k initial centers from the data, uniformly with replacement
//! 2. **Assign**: each point → nearest center (absolute distance)
//! 3. **Update**: each center → mean of its assigned points
//! 4. Repeat until no non-empty center moves by `tol` or more
//!
//! Ties in the assignment step go to the lowest-indexed center. A center that
//! receives no points keeps its previous position.
//!
//! # Failure Modes
//!
//! - **Local optima**: Lloyd finds a local minimum only; restart with another
//!   draw from the RNG if the fit looks wrong
//! - **Duplicate draws**: drawing the same observation twice can leave one of the
//!   two centers empty for the rest of the run
//!
//! # Randomness
//!
//! The caller supplies the RNG. There is no implicit global source, so a fit
//! is reproducible from a seed and independent fits can run on separate
//! threads without coordination.

use crate::error::{check_fit_args, check_tol, Result};
use rand::Rng;

/// Result of a k-means run.
#[derive(Debug, Clone, PartialEq)]
pub struct KmeansFit {
    /// Final cluster centers, one per cluster.
    pub centers: Vec<f64>,
    /// Cluster index of every observation.
    pub assignments: Vec<usize>,
    /// Lloyd iterations performed.
    pub iterations: usize,
    /// Whether the center-shift criterion was met before `max_iter`.
    pub converged: bool,
}

impl KmeansFit {
    /// Number of observations assigned to each cluster.
    pub fn counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.centers.len()];
        for &a in &self.assignments {
            counts[a] += 1;
        }
        counts
    }

    /// Within-cluster sum of squares for `data` under this partition.
    pub fn inertia(&self, data: &[f64]) -> f64 {
        data.iter()
            .zip(&self.assignments)
            .map(|(&x, &a)| (x - self.centers[a]).powi(2))
            .sum()
    }
}

/// K-means clustering of scalar data.
#[derive(Debug, Clone)]
pub struct Kmeans {
    /// Number of clusters.
    k: usize,
    /// Maximum iterations.
    max_iter: usize,
    /// Convergence tolerance on the per-center shift.
    tol: f64,
}

impl Kmeans {
    /// Create a new k-means clusterer.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            max_iter: 100,
            tol: 1e-5,
        }
    }

    /// Set maximum iterations.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set convergence tolerance.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Number of clusters.
    pub fn n_clusters(&self) -> usize {
        self.k
    }

    /// Index of the center nearest to `x`; the first one wins ties.
    ///
    /// Historical fits scanned with `<=` and let the last tied center win, so
    /// labels can differ from them when `data` holds duplicate draws.
    #[inline]
    fn nearest(x: f64, centers: &[f64]) -> usize {
        let mut best_cluster = 0;
        let mut best_dist = f64::INFINITY;
        for (k, &c) in centers.iter().enumerate() {
            let dist = (x - c).abs();
            if dist < best_dist {
                best_dist = dist;
                best_cluster = k;
            }
        }
        best_cluster
    }

    /// Run Lloyd's algorithm on `data`.
    pub fn fit<R: Rng + ?Sized>(&self, data: &[f64], rng: &mut R) -> Result<KmeansFit> {
        check_fit_args(data, self.k, self.max_iter)?;
        check_tol("tol", self.tol)?;

        let n = data.len();
        let mut centers: Vec<f64> = (0..self.k).map(|_| data[rng.random_range(0..n)]).collect();
        let mut assignments = vec![0usize; n];
        let mut sums = vec![0.0f64; self.k];
        let mut counts = vec![0usize; self.k];

        let mut iterations = 0;
        let mut converged = false;
        while iterations < self.max_iter && !converged {
            iterations += 1;

            // Assignment step
            sums.fill(0.0);
            counts.fill(0);
            for (label, &x) in assignments.iter_mut().zip(data) {
                let k = Self::nearest(x, &centers);
                *label = k;
                sums[k] += x;
                counts[k] += 1;
            }

            // Update step; empty clusters keep their center.
            converged = true;
            for k in 0..self.k {
                if counts[k] == 0 {
                    continue;
                }
                let m = sums[k] / counts[k] as f64;
                converged &= (m - centers[k]).abs() < self.tol;
                centers[k] = m;
            }
        }

        tracing::trace!(k = self.k, n, iterations, converged, "k-means finished");

        Ok(KmeansFit {
            centers,
            assignments,
            iterations,
            converged,
        })
    }
}

/// Run k-means with explicit settings; see [`Kmeans`].
pub fn kmeans<R: Rng + ?Sized>(
    data: &[f64],
    k: usize,
    max_iter: usize,
    tol: f64,
    rng: &mut R,
) -> Result<KmeansFit> {
    Kmeans::new(k).with_max_iter(max_iter).with_tol(tol).fit(data, rng)
}
