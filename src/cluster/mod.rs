//! Hard clustering used to seed the mixture estimators.
//!
//! ### K-means
//!
//! Assign each point to the nearest centroid, then move every centroid to the
//! mean of its points. Repeat.
//!
//! **Objective**: Minimize within-cluster sum of squares:
//!
//! ```text
//! J = Σ_k Σ_{x ∈ C_k} (x - μ_k)²
//! ```
//!
//! In one dimension the clusters are intervals, so the result doubles as a
//! reasonable partition for initial means, variances and weights.
//!
//! ## Usage
//!
//! ```rust
//! use mixfit::cluster::Kmeans;
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//!
//! let data = [0.0, 0.1, 10.0, 10.1];
//! let mut rng = StdRng::seed_from_u64(42);
//! let fit = Kmeans::new(2).fit(&data, &mut rng).unwrap();
//! assert_eq!(fit.assignments[0], fit.assignments[1]);
//! assert_ne!(fit.assignments[0], fit.assignments[2]);
//! ```

mod kmeans;

pub use kmeans::{kmeans, Kmeans, KmeansFit};
