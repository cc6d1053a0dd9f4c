//! Maximum-likelihood mixture fitting with Expectation-Maximization.
//!
//! # The EM Algorithm
//!
//! Direct optimization of the mixture likelihood is intractable (sum inside
//! the log). EM alternates two closed-form steps, each of which never decreases
//! the likelihood:
//!
//! **E-step**: responsibilities (soft assignments)
//! ```text
//! γₙₖ = πₖ N(xₙ | μₖ, σ²ₖ) / Σⱼ πⱼ N(xₙ | μⱼ, σ²ⱼ)
//! ```
//!
//! **M-step**: with `Nₖ = Σₙ γₙₖ`
//! - μₖ = Σₙ γₙₖ xₙ / Nₖ
//! - σ²ₖ = MIN_VAR + Σₙ γₙₖ (xₙ - μₖ)² / Nₖ
//! - πₖ = Nₖ / N
//!
//! Iteration stops once the log-likelihood changes by less than `tol`.
//!
//! # Failure Modes
//!
//! - **Local optima**: the k-means seed decides which optimum EM climbs;
//!   [`Em::with_n_init`] keeps the best of several seeds
//! - **Collapse**: a component sitting on a single point drives its variance to
//!   zero and the likelihood to infinity; the `MIN_VAR` floor prevents it
//! - **Starvation**: a component whose responsibility mass falls below a small
//!   guard keeps its mean and variance and ends with weight ≈ 0. It is
//!   reported as is, never pruned

use super::params::{argmax_rows, normalize_log_row, MixtureParams};
use super::MIN_VAR;
use crate::cluster::Kmeans;
use crate::error::{check_fit_args, check_tol, Error, Result};
use crate::math::{normal_log_pdf, normal_pdf};
use ndarray::Array2;
use rand::Rng;
use tracing::{debug, trace, warn};

/// Responsibility mass below which a component's mean and variance are frozen.
const RESP_EPS: f64 = 1e-3;

/// Tolerance of the k-means pass that seeds EM.
const KMEANS_TOL: f64 = 1e-5;

/// Result of an EM fit.
#[derive(Debug, Clone)]
pub struct EmFit {
    /// Fitted component parameters.
    pub params: MixtureParams,
    /// Responsibilities from the final E-step, shape `(n, k)`.
    pub responsibilities: Array2<f64>,
    /// Log-likelihood of the data under `params`.
    pub log_likelihood: f64,
    /// EM iterations performed.
    pub iterations: usize,
    /// Whether the log-likelihood criterion was met before `max_iter`.
    pub converged: bool,
}

impl EmFit {
    /// Most responsible component for each observation.
    pub fn labels(&self) -> Vec<usize> {
        argmax_rows(&self.responsibilities)
    }
}

/// EM estimator for a univariate Gaussian mixture.
#[derive(Debug, Clone)]
pub struct Em {
    /// Number of components.
    n_components: usize,
    /// Maximum EM iterations (also the k-means cap).
    max_iter: usize,
    /// Log-likelihood convergence tolerance.
    tol: f64,
    /// Variance floor.
    min_var: f64,
    /// Independent k-means seeds to try.
    n_init: usize,
}

impl Em {
    /// Create a new EM estimator with `k` components.
    pub fn new(k: usize) -> Self {
        Self {
            n_components: k,
            max_iter: 100,
            tol: 1e-3,
            min_var: MIN_VAR,
            n_init: 1,
        }
    }

    /// Set maximum iterations.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set the log-likelihood convergence tolerance.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Set the variance floor.
    pub fn with_min_var(mut self, min_var: f64) -> Self {
        self.min_var = min_var;
        self
    }

    /// Run `n` seeded fits and keep the one with the highest log-likelihood.
    pub fn with_n_init(mut self, n: usize) -> Self {
        self.n_init = n;
        self
    }

    /// Number of components.
    pub fn n_components(&self) -> usize {
        self.n_components
    }

    fn check_settings(&self) -> Result<()> {
        check_tol("tol", self.tol)?;
        if !(self.min_var > 0.0 && self.min_var.is_finite()) {
            return Err(Error::InvalidParameter {
                name: "min_var",
                message: "must be finite and > 0",
            });
        }
        if self.n_init == 0 {
            return Err(Error::InvalidParameter {
                name: "n_init",
                message: "must be >= 1",
            });
        }
        Ok(())
    }

    /// Fit the mixture, seeding each attempt with k-means drawn from `rng`.
    pub fn fit<R: Rng + ?Sized>(&self, data: &[f64], rng: &mut R) -> Result<EmFit> {
        check_fit_args(data, self.n_components, self.max_iter)?;
        self.check_settings()?;

        let mut best = self.run(data, self.initialize(data, rng)?);
        for attempt in 1..self.n_init {
            let fit = self.run(data, self.initialize(data, rng)?);
            trace!(attempt, log_likelihood = fit.log_likelihood, "EM restart");
            if fit.log_likelihood > best.log_likelihood {
                best = fit;
            }
        }
        Ok(best)
    }

    /// Fit the mixture starting from `init` instead of a k-means seed.
    ///
    /// Variances below the floor are raised to it.
    pub fn fit_from(&self, data: &[f64], init: MixtureParams) -> Result<EmFit> {
        check_fit_args(data, self.n_components, self.max_iter)?;
        self.check_settings()?;
        init.validate()?;
        if init.n_components() != self.n_components {
            return Err(Error::DimensionMismatch {
                expected: self.n_components,
                found: init.n_components(),
            });
        }

        let mut params = init;
        for v in &mut params.variances {
            *v = v.max(self.min_var);
        }
        Ok(self.run(data, params))
    }

    /// Parameters from a k-means partition: cluster means, floored
    /// within-cluster variances and cluster proportions.
    fn initialize<R: Rng + ?Sized>(&self, data: &[f64], rng: &mut R) -> Result<MixtureParams> {
        let k = self.n_components;
        let partition = Kmeans::new(k)
            .with_max_iter(self.max_iter)
            .with_tol(KMEANS_TOL)
            .fit(data, rng)?;

        let counts = partition.counts();
        let mut params = MixtureParams::zeros(k);
        params.means.copy_from_slice(&partition.centers);
        params.variances.fill(0.0);
        for (&x, &c) in data.iter().zip(&partition.assignments) {
            params.variances[c] += (x - params.means[c]).powi(2);
        }
        let n = data.len() as f64;
        for c in 0..k {
            let spread = if counts[c] > 0 {
                params.variances[c] / counts[c] as f64
            } else {
                0.0
            };
            params.variances[c] = self.min_var + spread;
            params.weights[c] = counts[c] as f64 / n;
        }
        Ok(params)
    }

    /// The EM loop proper.
    fn run(&self, data: &[f64], mut params: MixtureParams) -> EmFit {
        let n = data.len();
        let k = self.n_components;
        let mut resp = Array2::zeros((n, k));
        let mut log_terms = vec![0.0; k];
        let mut resp_count = vec![0.0; k];

        let mut prev_ll = f64::NEG_INFINITY;
        let mut log_likelihood = f64::NEG_INFINITY;
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.max_iter {
            iterations += 1;

            let log_rows = Self::e_step(data, &params, &mut resp, &mut log_terms);
            if log_rows > 0 {
                debug!(iteration = iterations, rows = log_rows, "E-step rows computed in log space");
            }
            self.m_step(data, &mut params, &resp, &mut resp_count);

            log_likelihood = params.log_likelihood(data);
            trace!(iteration = iterations, log_likelihood, "EM iteration");

            if (log_likelihood - prev_ll).abs() < self.tol {
                converged = true;
                break;
            }
            prev_ll = log_likelihood;
        }

        if converged {
            debug!(k, n, iterations, log_likelihood, "EM converged");
        } else {
            warn!(k, n, iterations, log_likelihood, "EM stopped at max_iter without converging");
        }

        EmFit {
            params,
            responsibilities: resp,
            log_likelihood,
            iterations,
            converged,
        }
    }

    /// Recompute all responsibilities. Returns how many rows needed the
    /// log-space path because every density underflowed.
    fn e_step(
        data: &[f64],
        params: &MixtureParams,
        resp: &mut Array2<f64>,
        log_terms: &mut [f64],
    ) -> usize {
        let mut log_rows = 0;
        for (i, &x) in data.iter().enumerate() {
            let mut row = resp.row_mut(i);
            let mut total = 0.0;
            for (c, r) in row.iter_mut().enumerate() {
                *r = params.weights[c] * normal_pdf(x, params.means[c], params.variances[c]);
                total += *r;
            }

            if total >= f64::MIN_POSITIVE && total.is_finite() {
                row.mapv_inplace(|r| r / total);
                continue;
            }

            // Too far from every component for the direct densities.
            log_rows += 1;
            for (c, t) in log_terms.iter_mut().enumerate() {
                *t = params.weights[c].ln()
                    + normal_log_pdf(x, params.means[c], params.variances[c]);
            }
            if !normalize_log_row(log_terms, row) {
                warn!(x, "no component has finite log-density; using uniform responsibilities");
            }
        }
        log_rows
    }

    fn m_step(
        &self,
        data: &[f64],
        params: &mut MixtureParams,
        resp: &Array2<f64>,
        resp_count: &mut [f64],
    ) {
        let n = data.len() as f64;
        for (c, count) in resp_count.iter_mut().enumerate() {
            let col = resp.column(c);
            *count = col.sum();

            if *count > RESP_EPS {
                let mean = col.iter().zip(data).map(|(r, x)| r * x).sum::<f64>() / *count;
                let spread = col
                    .iter()
                    .zip(data)
                    .map(|(r, x)| r * (x - mean).powi(2))
                    .sum::<f64>()
                    / *count;
                params.means[c] = mean;
                params.variances[c] = self.min_var + spread;
            }
            params.weights[c] = *count / n;
        }
    }
}

/// Fit a `k`-component mixture by EM; see [`Em`] for the remaining defaults.
pub fn fit_em<R: Rng + ?Sized>(
    data: &[f64],
    k: usize,
    max_iter: usize,
    tol: f64,
    rng: &mut R,
) -> Result<EmFit> {
    Em::new(k).with_max_iter(max_iter).with_tol(tol).fit(data, rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::sample_mixture;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn assert_invariants(fit: &EmFit) {
        let w: f64 = fit.params.weights.iter().sum();
        assert!((w - 1.0).abs() < 1e-9, "weights sum to {w}");
        assert!(fit.params.variances.iter().all(|&v| v >= MIN_VAR));
        for row in fit.responsibilities.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_em_two_clusters() {
        let mut rng = StdRng::seed_from_u64(42);
        let data = sample_mixture(400, &[-3.0, 4.0], &[0.5, 0.5], &[0.4, 0.6], &mut rng).unwrap();

        let fit = Em::new(2).with_n_init(5).fit(&data, &mut rng).unwrap();
        assert_invariants(&fit);
        assert!(fit.converged);

        let p = fit.params.sorted_by_mean();
        assert!((p.means[0] + 3.0).abs() < 0.3, "{p:?}");
        assert!((p.means[1] - 4.0).abs() < 0.3, "{p:?}");
        assert!((p.weights[0] - 0.4).abs() < 0.05, "{p:?}");

        // First 160 points come from the left component.
        let labels = fit.labels();
        assert!(labels[..160].iter().all(|&l| l == labels[0]));
        assert!(labels[160..].iter().all(|&l| l != labels[0]));
    }

    #[test]
    fn test_em_single_component_matches_moments() {
        let mut rng = StdRng::seed_from_u64(7);
        let data = sample_mixture(500, &[2.0], &[3.0], &[1.0], &mut rng).unwrap();
        let fit = fit_em(&data, 1, 100, 1e-6, &mut rng).unwrap();

        let n = data.len() as f64;
        let mean = data.iter().sum::<f64>() / n;
        let var = data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        assert!((fit.params.means[0] - mean).abs() < 1e-9);
        assert!((fit.params.variances[0] - (var + MIN_VAR)).abs() < 1e-9);
        assert_eq!(fit.params.weights, vec![1.0]);
    }

    #[test]
    fn test_em_starved_component_is_kept() {
        // All points equal: k-means puts everything in cluster 0.
        let data = vec![1.0; 10];
        let mut rng = StdRng::seed_from_u64(0);
        let fit = fit_em(&data, 2, 50, 1e-3, &mut rng).unwrap();

        assert_eq!(fit.params.weights, vec![1.0, 0.0]);
        assert_eq!(fit.params.variances, vec![MIN_VAR, MIN_VAR]);
        assert_eq!(fit.params.means, vec![1.0, 1.0]);
        assert!(fit.log_likelihood.is_finite());
        assert_eq!(fit.iterations, 2);
        assert!(fit.converged);
        assert_invariants(&fit);
    }

    #[test]
    fn test_em_surplus_components_starve_reproducibly() {
        // Two distinct values, three components: one component is left empty.
        let data: Vec<f64> = [0.0; 5].iter().chain([10.0; 5].iter()).copied().collect();
        for seed in 0..5u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let fit = fit_em(&data, 3, 50, 1e-3, &mut rng).unwrap();

            let mut weights = fit.params.weights.clone();
            weights.sort_by(|a, b| a.total_cmp(b));
            assert_eq!(weights, vec![0.0, 0.5, 0.5], "seed {seed}");
            assert!(fit.params.variances.iter().all(|&v| v == MIN_VAR));
            assert_invariants(&fit);

            let again = fit_em(&data, 3, 50, 1e-3, &mut StdRng::seed_from_u64(seed)).unwrap();
            assert_eq!(again.params, fit.params);
        }
    }

    #[test]
    fn test_em_outlier_uses_log_space() {
        let data = [0.0, 0.05, 10.0, 10.05, 500.0];
        let init = MixtureParams::new(vec![0.0, 10.0], vec![0.01, 0.01], vec![0.5, 0.5]).unwrap();
        let fit = Em::new(2).with_max_iter(1).fit_from(&data, init).unwrap();

        let row = fit.responsibilities.row(4);
        assert!(row.iter().all(|r| r.is_finite()));
        assert!((row.sum() - 1.0).abs() < 1e-12);
        // 500 is closer to 10 than to 0.
        assert!(row[1] > 0.999);
        assert_invariants(&fit);
    }

    #[test]
    fn test_em_max_iter_is_not_an_error() {
        let mut rng = StdRng::seed_from_u64(1);
        let data = sample_mixture(100, &[0.0, 3.0], &[1.0, 1.0], &[0.5, 0.5], &mut rng).unwrap();
        let fit = fit_em(&data, 2, 1, 1e-3, &mut rng).unwrap();
        assert_eq!(fit.iterations, 1);
        assert!(!fit.converged);
        assert_invariants(&fit);
    }

    #[test]
    fn test_em_warm_start_is_a_fixed_point() {
        let mut rng = StdRng::seed_from_u64(5);
        let data =
            sample_mixture(600, &[-4.0, 3.0], &[0.5, 1.5], &[0.3, 0.7], &mut rng).unwrap();
        let em = Em::new(2).with_max_iter(1000).with_tol(1e-9);
        let fit = em.fit(&data, &mut rng).unwrap();
        assert!(fit.converged);

        let refit = em.fit_from(&data, fit.params.clone()).unwrap();
        assert!(refit.params.max_abs_diff(&fit.params) < 1e-3);
        assert!((refit.log_likelihood - fit.log_likelihood).abs() < 1e-3);
    }

    #[test]
    fn test_em_deterministic_with_seed() {
        let data = sample_mixture(
            200,
            &[0.0, 5.0],
            &[1.0, 1.0],
            &[0.5, 0.5],
            &mut StdRng::seed_from_u64(3),
        )
        .unwrap();
        let a = fit_em(&data, 2, 100, 1e-3, &mut StdRng::seed_from_u64(9)).unwrap();
        let b = fit_em(&data, 2, 100, 1e-3, &mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(a.params, b.params);
        assert_eq!(a.iterations, b.iterations);
    }

    #[test]
    fn test_em_restarts_never_worse() {
        let data = sample_mixture(
            300,
            &[-5.0, 5.0, 8.0],
            &[0.5, 0.5, 1.0],
            &[0.2, 0.5, 0.3],
            &mut StdRng::seed_from_u64(8),
        )
        .unwrap();
        let single = Em::new(3).fit(&data, &mut StdRng::seed_from_u64(4)).unwrap();
        // The first attempt consumes the same draws as the single fit.
        let multi = Em::new(3)
            .with_n_init(4)
            .fit(&data, &mut StdRng::seed_from_u64(4))
            .unwrap();
        assert!(multi.log_likelihood >= single.log_likelihood);
    }

    #[test]
    fn test_em_invalid_arguments() {
        let mut rng = StdRng::seed_from_u64(0);
        let data = [1.0, 2.0, 3.0];
        assert!(matches!(
            fit_em(&data, 0, 10, 1e-3, &mut rng),
            Err(Error::InvalidClusterCount { .. })
        ));
        assert!(matches!(
            fit_em(&data, 4, 10, 1e-3, &mut rng),
            Err(Error::InvalidClusterCount { .. })
        ));
        assert!(fit_em(&data, 2, 0, 1e-3, &mut rng).is_err());
        assert!(Em::new(2).with_n_init(0).fit(&data, &mut rng).is_err());
        assert!(Em::new(2).with_min_var(0.0).fit(&data, &mut rng).is_err());

        let wrong_k = MixtureParams::new(vec![0.0], vec![1.0], vec![1.0]).unwrap();
        assert_eq!(
            Em::new(2).fit_from(&data, wrong_k).unwrap_err(),
            Error::DimensionMismatch {
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn test_em_rejects_data_whose_squares_overflow() {
        let data = [1e160, -1e160, 0.0, 1.0];
        let err = fit_em(&data, 2, 20, 1e-3, &mut StdRng::seed_from_u64(0)).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { name: "data", .. }));

        // Large but bounded data still yields finite, valid parameters.
        let data = [1e90, 1.1e90, -1e90, -1.1e90];
        let fit = fit_em(&data, 2, 50, 1e-3, &mut StdRng::seed_from_u64(0)).unwrap();
        assert!(fit.params.validate().is_ok(), "{:?}", fit.params);
        assert!(fit.log_likelihood.is_finite());
    }

    proptest! {
        #[test]
        fn em_invariants_hold(
            data in proptest::collection::vec(-50.0f64..50.0, 5..80),
            k in 1usize..5,
            seed in any::<u64>(),
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let fit = fit_em(&data, k, 50, 1e-3, &mut rng).unwrap();

            let w: f64 = fit.params.weights.iter().sum();
            prop_assert!((w - 1.0).abs() < 1e-9);
            prop_assert!(fit.params.variances.iter().all(|&v| v >= MIN_VAR));
            for row in fit.responsibilities.rows() {
                prop_assert!((row.sum() - 1.0).abs() < 1e-6);
            }
            prop_assert!(fit.log_likelihood.is_finite());
            prop_assert!(fit.iterations >= 1 && fit.iterations <= 50);
        }
    }
}
