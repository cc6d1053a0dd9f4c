//! Component parameters of a fitted mixture and evaluation of the model they
//! define.

use crate::error::{Error, Result};
use crate::math::{log_sum_exp, mixture_log_pdf, normal_log_pdf};
use ndarray::Array2;

/// Per-component parameters of a univariate Gaussian mixture.
///
/// The three vectors are parallel and have one entry per component.
#[derive(Debug, Clone, PartialEq)]
pub struct MixtureParams {
    /// Component means.
    pub means: Vec<f64>,
    /// Component variances (strictly positive).
    pub variances: Vec<f64>,
    /// Mixing weights.
    pub weights: Vec<f64>,
}

impl MixtureParams {
    /// Build from parallel vectors, checking that they describe a valid mixture.
    pub fn new(means: Vec<f64>, variances: Vec<f64>, weights: Vec<f64>) -> Result<Self> {
        let params = Self {
            means,
            variances,
            weights,
        };
        params.validate()?;
        Ok(params)
    }

    /// `k` components, all at the origin with unit variance and equal weight.
    pub(crate) fn zeros(k: usize) -> Self {
        Self {
            means: vec![0.0; k],
            variances: vec![1.0; k],
            weights: vec![1.0 / k as f64; k],
        }
    }

    /// Number of components.
    pub fn n_components(&self) -> usize {
        self.means.len()
    }

    /// Check lengths and value ranges.
    ///
    /// Weights need to lie in `[0, 1]` but are not required to sum to one, so
    /// variational point estimates pass.
    pub fn validate(&self) -> Result<()> {
        if self.means.is_empty() {
            return Err(Error::EmptyInput);
        }
        for len in [self.variances.len(), self.weights.len()] {
            if len != self.means.len() {
                return Err(Error::DimensionMismatch {
                    expected: self.means.len(),
                    found: len,
                });
            }
        }
        if self.means.iter().any(|m| !m.is_finite()) {
            return Err(Error::InvalidParameter {
                name: "means",
                message: "must be finite",
            });
        }
        if self.variances.iter().any(|v| !(*v > 0.0 && v.is_finite())) {
            return Err(Error::InvalidParameter {
                name: "variances",
                message: "must be finite and > 0",
            });
        }
        if self.weights.iter().any(|w| !(0.0..=1.0).contains(w)) {
            return Err(Error::InvalidParameter {
                name: "weights",
                message: "must lie in [0, 1]",
            });
        }
        Ok(())
    }

    /// Mixture log-density at `x`.
    pub fn log_pdf(&self, x: f64) -> f64 {
        mixture_log_pdf(x, &self.means, &self.variances, &self.weights)
    }

    /// Total log-likelihood of `data`.
    pub fn log_likelihood(&self, data: &[f64]) -> f64 {
        data.iter().map(|&x| self.log_pdf(x)).sum()
    }

    /// Posterior component membership of every observation, shape `(n, k)`.
    pub fn responsibilities(&self, data: &[f64]) -> Array2<f64> {
        let k = self.n_components();
        let mut resp = Array2::zeros((data.len(), k));
        let mut log_terms = vec![0.0; k];
        for (i, &x) in data.iter().enumerate() {
            for c in 0..k {
                log_terms[c] =
                    self.weights[c].ln() + normal_log_pdf(x, self.means[c], self.variances[c]);
            }
            normalize_log_row(&log_terms, resp.row_mut(i));
        }
        resp
    }

    /// Hard assignment: the most responsible component for each observation.
    pub fn predict(&self, data: &[f64]) -> Vec<usize> {
        argmax_rows(&self.responsibilities(data))
    }

    /// Components reordered by ascending mean.
    pub fn sorted_by_mean(&self) -> Self {
        let mut order: Vec<usize> = (0..self.n_components()).collect();
        order.sort_by(|&a, &b| self.means[a].total_cmp(&self.means[b]));
        Self {
            means: order.iter().map(|&i| self.means[i]).collect(),
            variances: order.iter().map(|&i| self.variances[i]).collect(),
            weights: order.iter().map(|&i| self.weights[i]).collect(),
        }
    }

    /// Largest absolute change of any parameter relative to `other`.
    pub fn max_abs_diff(&self, other: &Self) -> f64 {
        let diff = |a: &[f64], b: &[f64]| {
            a.iter()
                .zip(b)
                .map(|(x, y)| (x - y).abs())
                .fold(0.0, f64::max)
        };
        diff(&self.means, &other.means)
            .max(diff(&self.variances, &other.variances))
            .max(diff(&self.weights, &other.weights))
    }
}

/// Write `exp(t - lse(t))` into `row`.
///
/// Returns `false` (and writes a uniform row) when no term is finite, which
/// would otherwise turn the whole row into NaN.
pub(crate) fn normalize_log_row(log_terms: &[f64], mut row: ndarray::ArrayViewMut1<'_, f64>) -> bool {
    let log_sum = log_sum_exp(log_terms);
    if !log_sum.is_finite() {
        row.fill(1.0 / log_terms.len() as f64);
        return false;
    }
    for (r, &t) in row.iter_mut().zip(log_terms) {
        *r = (t - log_sum).exp();
    }
    true
}

pub(crate) fn argmax_rows(resp: &Array2<f64>) -> Vec<usize> {
    resp.rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, _)| i)
                .unwrap_or(0)
        })
        .collect()
}
