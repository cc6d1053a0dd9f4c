//! Univariate Gaussian mixture fitting.
//!
//! Models scalar data as a mixture of k Gaussians:
//!
//! ```text
//! p(x) = Σₖ πₖ × N(x | μₖ, σ²ₖ)
//! ```
//!
//! Two estimators share the k-means seeding in [`crate::cluster`] and the
//! kernels in [`crate::math`], but nothing else:
//!
//! | Estimator | Objective | State per component | Weights |
//! |-----------|-----------|---------------------|---------|
//! | [`Em`] | maximum likelihood | μ, σ², π | sum to 1 |
//! | [`Vb`] | evidence lower bound | Normal-Gamma-Dirichlet factors | `exp(E[ln π])`, sum < 1 |
//!
//! The number of components is fixed by the caller and never pruned: a
//! component that loses all responsibility stays in the result with weight
//! near zero and its variance at the floor.
//!
//! ## Usage
//!
//! ```rust
//! use mixfit::mixture::{Em, Vb};
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//!
//! let data = [-5.1, -4.9, -5.0, 5.0, 5.2, 4.8, 5.1];
//! let mut rng = StdRng::seed_from_u64(7);
//!
//! let em = Em::new(2).with_n_init(3).fit(&data, &mut rng).unwrap();
//! let vb = Vb::new(2).with_n_init(3).fit(&data, &mut rng).unwrap();
//!
//! let em_means = em.params.sorted_by_mean().means;
//! assert!((em_means[0] + 5.0).abs() < 0.5);
//! assert!((em_means[1] - 5.0).abs() < 0.5);
//! assert_eq!(vb.params.n_components(), 2);
//! ```

mod em;
mod params;
mod vb;

pub use em::{fit_em, Em, EmFit};
pub use params::MixtureParams;
pub use vb::{fit_vb, Priors, SecondMoment, StoppingRule, Vb, VbFit, VariationalPosterior};

/// Variance floor applied to every component.
pub const MIN_VAR: f64 = 1e-6;
