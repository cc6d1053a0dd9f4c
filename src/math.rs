//! Numeric kernels shared by the k-means seeding and both mixture engines.
//!
//! Everything here is a pure function of its arguments.
//!
//! # Why log space
//!
//! A mixture density is a sum of exponentials:
//!
//! ```text
//! p(x) = Σₖ wₖ × N(x | μₖ, σ²ₖ)
//! ```
//!
//! For a point a few dozen standard deviations away from every component,
//! each term underflows to `0.0` and `ln p(x)` becomes `-∞`. Working with the
//! per-component log terms and the log-sum-exp identity
//!
//! ```text
//! ln Σₖ exp(tₖ) = m + ln Σₖ exp(tₖ - m),   m = maxₖ tₖ
//! ```
//!
//! keeps the largest term at `exp(0) = 1`, so the sum never underflows to zero.

use std::f64::consts::PI;

/// `ln(2π)`.
pub const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Euler-Mascheroni constant, `-ψ(1)`.
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// `π²/6`, the trigamma function at 1.
const TRIGAMMA_ONE: f64 = 1.644_934_066_848_226_4;

/// Gaussian density.
#[inline]
pub fn normal_pdf(x: f64, mean: f64, variance: f64) -> f64 {
    debug_assert!(variance > 0.0, "variance must be positive");
    let diff = x - mean;
    (-0.5 * diff * diff / variance).exp() / (2.0 * PI * variance).sqrt()
}

/// Gaussian log-density.
///
/// `variance` must be strictly positive; the engines floor it before calling.
#[inline]
pub fn normal_log_pdf(x: f64, mean: f64, variance: f64) -> f64 {
    debug_assert!(variance > 0.0, "variance must be positive");
    let diff = x - mean;
    -0.5 * diff * diff / variance - 0.5 * variance.ln() - 0.5 * LN_2PI
}

/// Log-sum-exp for numerical stability.
///
/// Returns `-∞` for an empty slice or when every value is `-∞`.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NEG_INFINITY;
    }
    let max_val = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max_val.is_infinite() {
        return max_val;
    }
    max_val
        + values
            .iter()
            .map(|&v| (v - max_val).exp())
            .sum::<f64>()
            .ln()
}

#[inline]
fn component_log_term(x: f64, mean: f64, variance: f64, weight: f64) -> f64 {
    // ln(0) = -inf, which drops out of the sum after exponentiation.
    weight.ln() + normal_log_pdf(x, mean, variance)
}

/// Log-density of a univariate Gaussian mixture at `x`.
///
/// Computes `ln Σₖ wₖ N(x | μₖ, σ²ₖ)` through log-sum-exp without allocating.
/// Components with zero weight contribute nothing. The three slices are
/// parallel and must have the same length.
pub fn mixture_log_pdf(x: f64, means: &[f64], variances: &[f64], weights: &[f64]) -> f64 {
    debug_assert_eq!(means.len(), variances.len());
    debug_assert_eq!(means.len(), weights.len());

    let terms = || {
        means
            .iter()
            .zip(variances)
            .zip(weights)
            .map(|((&m, &v), &w)| component_log_term(x, m, v, w))
    };

    let max_val = terms().fold(f64::NEG_INFINITY, f64::max);
    if max_val.is_infinite() {
        return max_val;
    }
    max_val + terms().map(|t| (t - max_val).exp()).sum::<f64>().ln()
}

/// The digamma function ψ(x), the derivative of `ln Γ(x)`.
///
/// Bernardo's Algorithm AS 103, extended to negative arguments and to more
/// terms of the asymptotic series:
///
/// - NaN or `-∞` input gives NaN.
/// - Non-positive integers are poles and give `-∞`.
/// - `x < 0` uses the reflection `ψ(x) = ψ(1 - x) + π / tan(-πx)`.
/// - `0 < x <= 1e-6` uses `-γ - 1/x + (π²/6)·x`.
/// - Otherwise the argument is shifted up to `x >= 12` with
///   `ψ(x) = ψ(x + 1) - 1/x`, then de Moivre's expansion is applied.
///
/// # References
///
/// - Bernardo (1976). "Algorithm AS 103: Psi (Digamma) Function",
///   Applied Statistics 25(3).
pub fn digamma(x: f64) -> f64 {
    const SMALL: f64 = 1e-6;
    const LARGE: f64 = 12.0;
    const S3: f64 = 1.0 / 12.0;
    const S4: f64 = 1.0 / 120.0;
    const S5: f64 = 1.0 / 252.0;
    const S6: f64 = 1.0 / 240.0;
    const S7: f64 = 1.0 / 132.0;

    if x.is_nan() || x == f64::NEG_INFINITY {
        return f64::NAN;
    }
    if x <= 0.0 && x.floor() == x {
        return f64::NEG_INFINITY;
    }
    if x < 0.0 {
        return digamma(1.0 - x) + PI / (-PI * x).tan();
    }
    if x <= SMALL {
        return -EULER_GAMMA - 1.0 / x + TRIGAMMA_ONE * x;
    }

    let mut x = x;
    let mut result = 0.0;
    while x < LARGE {
        result -= 1.0 / x;
        x += 1.0;
    }

    let r = 1.0 / x;
    result += x.ln() - 0.5 * r;
    let r2 = r * r;
    result -= r2 * (S3 - r2 * (S4 - r2 * (S5 - r2 * (S6 - r2 * S7))));
    result
}
