//! Synthetic mixture data.
//!
//! Draws a deterministic-size block of observations per component, which makes
//! recovery tests reproducible. Blocks are emitted in component order and
//! are not shuffled; every fitting routine in this crate is order-invariant up
//! to its random initialization.

use crate::error::{Error, Result};
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Sample `n` observations from a univariate Gaussian mixture.
///
/// Component `k` contributes `floor(weights[k] * n)` points; the remainder left
/// by rounding is drawn from the last component.
pub fn sample_mixture<R: Rng + ?Sized>(
    n: usize,
    means: &[f64],
    variances: &[f64],
    weights: &[f64],
    rng: &mut R,
) -> Result<Vec<f64>> {
    if means.is_empty() {
        return Err(Error::EmptyInput);
    }
    for len in [variances.len(), weights.len()] {
        if len != means.len() {
            return Err(Error::DimensionMismatch {
                expected: means.len(),
                found: len,
            });
        }
    }
    if weights.iter().any(|w| !(0.0..=1.0).contains(w)) {
        return Err(Error::InvalidParameter {
            name: "weights",
            message: "must lie in [0, 1]",
        });
    }

    let components = means
        .iter()
        .zip(variances)
        .map(|(&m, &v)| {
            if !(v > 0.0 && v.is_finite()) || !m.is_finite() {
                return Err(Error::InvalidParameter {
                    name: "variances",
                    message: "must be finite and > 0 with finite means",
                });
            }
            Normal::new(m, v.sqrt()).map_err(|_| Error::InvalidParameter {
                name: "variances",
                message: "must be finite and > 0 with finite means",
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut out = Vec::with_capacity(n);
    for (dist, &w) in components.iter().zip(weights) {
        // Weights sum to at most 1 in practice; clamp so a sloppy sum cannot overrun n.
        let size = ((w * n as f64).floor() as usize).min(n - out.len());
        out.extend((0..size).map(|_| dist.sample(rng)));
    }
    if let Some(last) = components.last() {
        while out.len() < n {
            out.push(last.sample(rng));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn block_sizes_follow_weights() {
        let mut rng = StdRng::seed_from_u64(1);
        let data = sample_mixture(
            10,
            &[-100.0, 0.0, 100.0],
            &[1.0, 1.0, 1.0],
            &[0.25, 0.25, 0.25],
            &mut rng,
        )
        .unwrap();
        assert_eq!(data.len(), 10);
        // floor(2.5) = 2 per component, remaining 4 from the last.
        assert!(data[..2].iter().all(|&x| x < -50.0));
        assert!(data[2..4].iter().all(|&x| x.abs() < 50.0));
        assert!(data[4..].iter().all(|&x| x > 50.0));
    }

    #[test]
    fn moments_match_component() {
        let mut rng = StdRng::seed_from_u64(9);
        let data = sample_mixture(20_000, &[3.0], &[4.0], &[1.0], &mut rng).unwrap();
        let n = data.len() as f64;
        let mean = data.iter().sum::<f64>() / n;
        let var = data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        assert!((mean - 3.0).abs() < 0.1, "mean {mean}");
        assert!((var - 4.0).abs() < 0.2, "var {var}");
    }

    #[test]
    fn rejects_bad_shapes() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(
            sample_mixture(10, &[0.0, 1.0], &[1.0], &[0.5, 0.5], &mut rng),
            Err(Error::DimensionMismatch {
                expected: 2,
                found: 1
            })
        );
        assert_eq!(
            sample_mixture(10, &[], &[], &[], &mut rng),
            Err(Error::EmptyInput)
        );
        assert!(sample_mixture(10, &[0.0], &[0.0], &[1.0], &mut rng).is_err());
        assert!(sample_mixture(10, &[0.0], &[1.0], &[1.5], &mut rng).is_err());
    }

    #[test]
    fn same_seed_same_sample() {
        let a = sample_mixture(50, &[0.0, 5.0], &[1.0, 2.0], &[0.4, 0.6], &mut StdRng::seed_from_u64(3));
        let b = sample_mixture(50, &[0.0, 5.0], &[1.0, 2.0], &[0.4, 0.6], &mut StdRng::seed_from_u64(3));
        assert_eq!(a, b);
    }
}
