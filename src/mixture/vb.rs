//! Approximate Bayesian mixture fitting with mean-field variational inference.
//!
//! # The Model
//!
//! ```text
//! π ~ Dirichlet(u₀, …, u₀)
//! μₖ ~ N(m₀, 1/β₀)
//! τₖ ~ Gamma(a₀, b₀)               (τ = 1/σ², shape/rate)
//! zₙ ~ Categorical(π)
//! xₙ | zₙ = k ~ N(μₖ, 1/τₖ)
//! ```
//!
//! The posterior is approximated by the factorization
//! `q(z) Πₖ q(μₖ) q(τₖ) q(π)` with `q(μₖ) = N(E[μₖ], 1/βₖ)`,
//! `q(τₖ) = Gamma(aₖ, bₖ)` and `q(π) = Dirichlet(u)`. Every factor has a
//! closed-form update given the others (conjugacy), so fitting is coordinate
//! ascent over four blocks per iteration:
//!
//! 1. **Precision**: `aₖ = a₀ + Nₖ/2`, `bₖ = b₀ + ½ Σₙ rₙₖ E[(xₙ - μₖ)²]`
//! 2. **Mean**: `βₖ = β₀ + E[τₖ] Nₖ`, `E[μₖ] = (m₀β₀ + E[τₖ] Σₙ rₙₖ xₙ) / βₖ`
//! 3. **Weights**: `uₖ = u₀ + Nₖ`, `E[ln πₖ] = ψ(uₖ) - ψ(Σⱼ uⱼ)`
//! 4. **Responsibilities**:
//!    `ln rₙₖ = E[ln πₖ] + ½E[ln τₖ] - ½E[τₖ] E[(xₙ - μₖ)²]`, normalized per row
//!
//! with `E[(x - μₖ)²] = x² - 2x E[μₖ] + E[μₖ²]`.
//!
//! # Reported Parameters
//!
//! Point estimates are `E[μₖ]`, `1/E[τₖ]` (floored at `MIN_VAR`) and
//! `exp(E[ln πₖ])`. The weights are **not renormalized**: by Jensen's
//! inequality they sum to slightly less than one.
//!
//! # Second Moment of the Mean
//!
//! The exact second moment is `E[μₖ²] = E[μₖ]² + 1/βₖ` ([`SecondMoment::Exact`],
//! the default). [`SecondMoment::Legacy`] reproduces the historical
//! `E[μₖ] + 1/E[τₖ]` for comparison against older results; it is not a valid
//! moment, so the expected squared deviation is clamped at zero before use.
//!
//! # Stopping
//!
//! Both the proxy log-likelihood of the point estimates and the evidence lower
//! bound (ELBO) are tracked every iteration; [`StoppingRule`] picks which one
//! has to settle within `tol`. In `Exact` mode the ELBO never decreases from one
//! iteration to the next.

use super::params::{argmax_rows, normalize_log_row, MixtureParams};
use super::MIN_VAR;
use crate::cluster::Kmeans;
use crate::error::{check_fit_args, check_tol, Error, Result};
use crate::math::{digamma, LN_2PI};
use ndarray::Array2;
use rand::Rng;
use statrs::function::gamma::ln_gamma;
use tracing::{debug, trace, warn};

const KMEANS_TOL: f64 = 1e-5;

/// Formula for `E[μₖ²]` in the mean update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecondMoment {
    /// `E[μ]² + 1/β`, the second moment of `q(μ)`.
    #[default]
    Exact,
    /// `E[μ] + 1/E[τ]`, kept for compatibility with historical fits.
    Legacy,
}

/// Quantity whose change decides convergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoppingRule {
    /// Log-likelihood of the data under the point estimates.
    #[default]
    ProxyLogLikelihood,
    /// Evidence lower bound.
    Elbo,
}

/// Conjugate prior hyperparameters, shared by all components.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Priors {
    /// Prior mean of every component mean (`m₀`).
    pub mean_location: f64,
    /// Prior precision of every component mean (`β₀`).
    pub mean_precision: f64,
    /// Gamma shape of the component precisions (`a₀`).
    pub precision_shape: f64,
    /// Gamma rate of the component precisions (`b₀`).
    pub precision_rate: f64,
    /// Symmetric Dirichlet concentration of the weights (`u₀`).
    pub concentration: f64,
}

impl Default for Priors {
    fn default() -> Self {
        Self {
            mean_location: 0.0,
            mean_precision: 1e-3,
            precision_shape: 1e-5,
            precision_rate: 1e-5,
            concentration: 5.0,
        }
    }
}

impl Priors {
    /// Set the prior mean location.
    pub fn with_mean_location(mut self, m: f64) -> Self {
        self.mean_location = m;
        self
    }

    /// Set the prior mean precision.
    pub fn with_mean_precision(mut self, beta: f64) -> Self {
        self.mean_precision = beta;
        self
    }

    /// Set the Gamma prior on the precisions.
    pub fn with_precision(mut self, shape: f64, rate: f64) -> Self {
        self.precision_shape = shape;
        self.precision_rate = rate;
        self
    }

    /// Set the Dirichlet concentration.
    pub fn with_concentration(mut self, u: f64) -> Self {
        self.concentration = u;
        self
    }

    fn validate(&self) -> Result<()> {
        if !self.mean_location.is_finite() {
            return Err(Error::InvalidParameter {
                name: "mean_location",
                message: "must be finite",
            });
        }
        let positive = [
            ("mean_precision", self.mean_precision),
            ("precision_shape", self.precision_shape),
            ("precision_rate", self.precision_rate),
            ("concentration", self.concentration),
        ];
        for (name, value) in positive {
            if !(value > 0.0 && value.is_finite()) {
                return Err(Error::InvalidParameter {
                    name,
                    message: "must be finite and > 0",
                });
            }
        }
        Ok(())
    }
}

/// Variational posterior factors and their cached expectations, per component.
#[derive(Debug, Clone, PartialEq)]
pub struct VariationalPosterior {
    /// `E[μₖ]`, the mean of `q(μₖ)`.
    pub mean: Vec<f64>,
    /// `E[μₖ²]` under the configured [`SecondMoment`].
    pub mean_sq: Vec<f64>,
    /// `βₖ`, the precision of `q(μₖ)`.
    pub mean_precision: Vec<f64>,
    /// `aₖ`, the shape of `q(τₖ)`.
    pub shape: Vec<f64>,
    /// `bₖ`, the rate of `q(τₖ)`.
    pub rate: Vec<f64>,
    /// `E[τₖ] = aₖ / bₖ`.
    pub precision: Vec<f64>,
    /// `E[ln τₖ] = ψ(aₖ) - ln bₖ`.
    pub log_precision: Vec<f64>,
    /// `uₖ`, the Dirichlet concentration of `q(π)`.
    pub concentration: Vec<f64>,
    /// `E[ln πₖ] = ψ(uₖ) - ψ(Σⱼ uⱼ)`.
    pub log_weight: Vec<f64>,
}

impl VariationalPosterior {
    /// Prior-valued factors with the means placed at `centers`.
    fn from_centers(centers: &[f64], priors: &Priors) -> Self {
        let k = centers.len();
        Self {
            mean: centers.to_vec(),
            mean_sq: centers.iter().map(|c| c * c).collect(),
            mean_precision: vec![priors.mean_precision; k],
            shape: vec![priors.precision_shape; k],
            rate: vec![priors.precision_rate; k],
            precision: vec![priors.precision_shape / priors.precision_rate; k],
            log_precision: vec![digamma(priors.precision_shape) - priors.precision_rate.ln(); k],
            concentration: vec![priors.concentration; k],
            log_weight: vec![-(k as f64).ln(); k],
        }
    }

    /// Number of components.
    pub fn n_components(&self) -> usize {
        self.mean.len()
    }

    /// Point estimates `E[μ]`, `max(1/E[τ], MIN_VAR)` and `exp(E[ln π])`.
    pub fn point_estimates(&self) -> MixtureParams {
        MixtureParams {
            means: self.mean.clone(),
            variances: self.precision.iter().map(|t| (1.0 / t).max(MIN_VAR)).collect(),
            weights: self.log_weight.iter().map(|l| l.exp()).collect(),
        }
    }

    /// `Σₙ rₙₖ E[(xₙ - μₖ)²]` from the sufficient statistics, clamped at zero.
    #[inline]
    fn expected_sq_dev(&self, c: usize, stats: &SuffStats) -> f64 {
        (stats.sum_sq[c] - 2.0 * self.mean[c] * stats.sum[c] + self.mean_sq[c] * stats.count[c])
            .max(0.0)
    }
}

/// Responsibility-weighted counts, sums and sums of squares per component.
#[derive(Debug, Clone)]
struct SuffStats {
    count: Vec<f64>,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl SuffStats {
    fn new(k: usize) -> Self {
        Self {
            count: vec![0.0; k],
            sum: vec![0.0; k],
            sum_sq: vec![0.0; k],
        }
    }

    fn update(&mut self, data: &[f64], resp: &Array2<f64>) {
        for (c, col) in resp.columns().into_iter().enumerate() {
            let (mut n, mut s, mut s2) = (0.0, 0.0, 0.0);
            for (&r, &x) in col.iter().zip(data) {
                n += r;
                s += r * x;
                s2 += r * x * x;
            }
            self.count[c] = n;
            self.sum[c] = s;
            self.sum_sq[c] = s2;
        }
    }
}

/// Result of a variational fit.
#[derive(Debug, Clone)]
pub struct VbFit {
    /// Point estimates; weights do not sum exactly to one.
    pub params: MixtureParams,
    /// Final variational factors.
    pub posterior: VariationalPosterior,
    /// Final responsibilities, shape `(n, k)`.
    pub responsibilities: Array2<f64>,
    /// Log-likelihood of the data under `params`.
    pub log_likelihood: f64,
    /// Evidence lower bound of the final factors.
    pub elbo: f64,
    /// Iterations performed.
    pub iterations: usize,
    /// Whether the stopping rule was met before `max_iter`.
    pub converged: bool,
}

impl VbFit {
    /// Most responsible component for each observation.
    pub fn labels(&self) -> Vec<usize> {
        argmax_rows(&self.responsibilities)
    }
}

/// Mean-field variational Bayes estimator for a univariate Gaussian mixture.
#[derive(Debug, Clone)]
pub struct Vb {
    /// Number of components.
    n_components: usize,
    /// Conjugate prior hyperparameters.
    priors: Priors,
    /// Maximum iterations (also the k-means cap).
    max_iter: usize,
    /// Convergence tolerance on the stopping quantity.
    tol: f64,
    /// Formula for `E[μ²]`.
    second_moment: SecondMoment,
    /// Quantity checked against `tol`.
    stopping: StoppingRule,
    /// Independent k-means seeds to try.
    n_init: usize,
}

impl Vb {
    /// Create a new estimator with `k` components and default priors.
    pub fn new(k: usize) -> Self {
        Self {
            n_components: k,
            priors: Priors::default(),
            max_iter: 100,
            tol: 1e-3,
            second_moment: SecondMoment::default(),
            stopping: StoppingRule::default(),
            n_init: 1,
        }
    }

    /// Set the priors.
    pub fn with_priors(mut self, priors: Priors) -> Self {
        self.priors = priors;
        self
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

    /// Choose the `E[μ²]` formula.
    pub fn with_second_moment(mut self, mode: SecondMoment) -> Self {
        self.second_moment = mode;
        self
    }

    /// Choose the convergence criterion.
    pub fn with_stopping(mut self, rule: StoppingRule) -> Self {
        self.stopping = rule;
        self
    }

    /// Run `n` seeded fits and keep the one with the highest ELBO.
    pub fn with_n_init(mut self, n: usize) -> Self {
        self.n_init = n;
        self
    }

    /// Number of components.
    pub fn n_components(&self) -> usize {
        self.n_components
    }

    /// Fit the mixture, seeding each attempt with k-means drawn from `rng`.
    pub fn fit<R: Rng + ?Sized>(&self, data: &[f64], rng: &mut R) -> Result<VbFit> {
        check_fit_args(data, self.n_components, self.max_iter)?;
        check_tol("tol", self.tol)?;
        self.priors.validate()?;
        if self.n_init == 0 {
            return Err(Error::InvalidParameter {
                name: "n_init",
                message: "must be >= 1",
            });
        }

        let mut best = self.run_seeded(data, rng)?;
        for attempt in 1..self.n_init {
            let fit = self.run_seeded(data, rng)?;
            trace!(attempt, elbo = fit.elbo, "VB restart");
            if fit.elbo > best.elbo {
                best = fit;
            }
        }
        Ok(best)
    }

    fn run_seeded<R: Rng + ?Sized>(&self, data: &[f64], rng: &mut R) -> Result<VbFit> {
        let partition = Kmeans::new(self.n_components)
            .with_max_iter(self.max_iter)
            .with_tol(KMEANS_TOL)
            .fit(data, rng)?;

        let mut resp = Array2::zeros((data.len(), self.n_components));
        for (mut row, &c) in resp.rows_mut().into_iter().zip(&partition.assignments) {
            row[c] = 1.0;
        }
        let posterior = VariationalPosterior::from_centers(&partition.centers, &self.priors);
        Ok(self.run(data, posterior, resp))
    }

    /// The coordinate-ascent loop.
    fn run(&self, data: &[f64], mut q: VariationalPosterior, mut resp: Array2<f64>) -> VbFit {
        let n = data.len();
        let k = self.n_components;
        let mut stats = SuffStats::new(k);
        let mut log_terms = vec![0.0; k];

        let mut prev = f64::NEG_INFINITY;
        let mut params = q.point_estimates();
        let mut log_likelihood = f64::NEG_INFINITY;
        let mut elbo = f64::NEG_INFINITY;
        let mut iterations = 0;
        let mut converged = false;

        stats.update(data, &resp);
        while iterations < self.max_iter {
            iterations += 1;

            self.update_precision_and_mean(&mut q, &stats);
            self.update_weights(&mut q, &stats);
            let dead_rows = Self::update_responsibilities(data, &q, &mut resp, &mut log_terms);
            if dead_rows > 0 {
                warn!(iteration = iterations, rows = dead_rows, "reset non-finite responsibility rows to uniform");
            }

            // Statistics of the new responsibilities feed the bound and the next sweep.
            stats.update(data, &resp);
            params = q.point_estimates();
            log_likelihood = params.log_likelihood(data);
            elbo = self.elbo(&q, &stats, &resp);
            trace!(iteration = iterations, log_likelihood, elbo, "VB iteration");

            let objective = match self.stopping {
                StoppingRule::ProxyLogLikelihood => log_likelihood,
                StoppingRule::Elbo => elbo,
            };
            if (objective - prev).abs() < self.tol {
                converged = true;
                break;
            }
            prev = objective;
        }

        if converged {
            debug!(k, n, iterations, log_likelihood, elbo, "VB converged");
        } else {
            warn!(k, n, iterations, log_likelihood, elbo, "VB stopped at max_iter without converging");
        }

        VbFit {
            params,
            posterior: q,
            responsibilities: resp,
            log_likelihood,
            elbo,
            iterations,
            converged,
        }
    }

    /// Blocks 1 and 2: `q(τ)` from the current `q(μ)`, then `q(μ)` from the
    /// new `E[τ]`.
    fn update_precision_and_mean(&self, q: &mut VariationalPosterior, stats: &SuffStats) {
        let p = &self.priors;
        for c in 0..q.n_components() {
            let sq_dev = q.expected_sq_dev(c, stats);
            q.shape[c] = p.precision_shape + 0.5 * stats.count[c];
            q.rate[c] = p.precision_rate + 0.5 * sq_dev;
            q.precision[c] = q.shape[c] / q.rate[c];
            q.log_precision[c] = digamma(q.shape[c]) - q.rate[c].ln();

            q.mean_precision[c] = p.mean_precision + q.precision[c] * stats.count[c];
            q.mean[c] = (p.mean_location * p.mean_precision + q.precision[c] * stats.sum[c])
                / q.mean_precision[c];
            q.mean_sq[c] = match self.second_moment {
                SecondMoment::Exact => q.mean[c] * q.mean[c] + 1.0 / q.mean_precision[c],
                SecondMoment::Legacy => q.mean[c] + 1.0 / q.precision[c],
            };
        }
    }

    /// Block 3: `q(π)`.
    fn update_weights(&self, q: &mut VariationalPosterior, stats: &SuffStats) {
        for (u, &n) in q.concentration.iter_mut().zip(&stats.count) {
            *u = self.priors.concentration + n;
        }
        let psi_total = digamma(q.concentration.iter().sum());
        for (l, &u) in q.log_weight.iter_mut().zip(&q.concentration) {
            *l = digamma(u) - psi_total;
        }
    }

    /// Block 4: `q(z)`. Returns the number of rows reset to uniform.
    fn update_responsibilities(
        data: &[f64],
        q: &VariationalPosterior,
        resp: &mut Array2<f64>,
        log_terms: &mut [f64],
    ) -> usize {
        let mut dead_rows = 0;
        for (row, &x) in resp.rows_mut().into_iter().zip(data) {
            for (c, t) in log_terms.iter_mut().enumerate() {
                let sq_dev = x * x - 2.0 * x * q.mean[c] + q.mean_sq[c];
                *t = q.log_weight[c] + 0.5 * q.log_precision[c] - 0.5 * q.precision[c] * sq_dev;
            }
            if !normalize_log_row(log_terms, row) {
                dead_rows += 1;
            }
        }
        dead_rows
    }

    /// Evidence lower bound `E_q[ln p(x, z, μ, τ, π)] - E_q[ln q]`.
    fn elbo(&self, q: &VariationalPosterior, stats: &SuffStats, resp: &Array2<f64>) -> f64 {
        let p = &self.priors;
        let k = q.n_components() as f64;

        // E[ln p(x | z, μ, τ)] + E[ln p(z | π)]
        let mut bound = 0.0;
        for c in 0..q.n_components() {
            bound += stats.count[c]
                * (q.log_weight[c] + 0.5 * q.log_precision[c] - 0.5 * LN_2PI)
                - 0.5 * q.precision[c] * q.expected_sq_dev(c, stats);
        }

        // -E[ln q(z)]
        bound -= resp
            .iter()
            .filter(|&&r| r > 0.0)
            .map(|&r| r * r.ln())
            .sum::<f64>();

        // E[ln p(π)] - E[ln q(π)]
        let sum_log_weight: f64 = q.log_weight.iter().sum();
        bound += ln_gamma(k * p.concentration) - k * ln_gamma(p.concentration)
            + (p.concentration - 1.0) * sum_log_weight;
        bound -= ln_gamma(q.concentration.iter().sum())
            - q.concentration.iter().map(|&u| ln_gamma(u)).sum::<f64>()
            + q.concentration
                .iter()
                .zip(&q.log_weight)
                .map(|(&u, &l)| (u - 1.0) * l)
                .sum::<f64>();

        for c in 0..q.n_components() {
            // E[ln p(μ)] - E[ln q(μ)]
            let prior_sq_dev = q.mean_sq[c] - 2.0 * p.mean_location * q.mean[c]
                + p.mean_location * p.mean_location;
            bound += 0.5 * p.mean_precision.ln() - 0.5 * LN_2PI
                - 0.5 * p.mean_precision * prior_sq_dev;
            bound -= 0.5 * q.mean_precision[c].ln() - 0.5 * LN_2PI - 0.5;

            // E[ln p(τ)] - E[ln q(τ)]
            bound += p.precision_shape * p.precision_rate.ln() - ln_gamma(p.precision_shape)
                + (p.precision_shape - 1.0) * q.log_precision[c]
                - p.precision_rate * q.precision[c];
            bound -= q.shape[c] * q.rate[c].ln() - ln_gamma(q.shape[c])
                + (q.shape[c] - 1.0) * q.log_precision[c]
                - q.shape[c];
        }

        bound
    }
}

/// Fit a `k`-component mixture by variational Bayes with the given priors;
/// see [`Vb`] for the remaining defaults.
pub fn fit_vb<R: Rng + ?Sized>(
    data: &[f64],
    k: usize,
    max_iter: usize,
    priors: Priors,
    rng: &mut R,
) -> Result<VbFit> {
    Vb::new(k)
        .with_max_iter(max_iter)
        .with_priors(priors)
        .fit(data, rng)
}
