//! # mixfit
//!
//! Univariate Gaussian mixture models: maximum likelihood by EM and approximate
//! Bayesian inference by mean-field variational Bayes, both seeded by k-means.
//!
//! All randomness comes from a caller-supplied [`rand::Rng`]; fits are
//! deterministic for a fixed seed and share no global state.

pub mod cluster;
/// Error types used across `mixfit`.
pub mod error;
pub mod math;
pub mod mixture;
pub mod sample;


pub use error::{Error, Result};

pub use cluster::{kmeans, Kmeans, KmeansFit};
pub use math::{digamma, log_sum_exp, mixture_log_pdf, normal_log_pdf, normal_pdf};
pub use mixture::{
    fit_em, fit_vb, Em, EmFit, MixtureParams, Priors, SecondMoment, StoppingRule, Vb, VbFit,
    VariationalPosterior, MIN_VAR,
};
pub use sample::sample_mixture;
