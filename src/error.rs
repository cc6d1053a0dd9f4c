use core::fmt;

/// Result alias for `mixfit`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the clustering and mixture-fitting entry points.
///
/// Numeric outcomes that are mathematically meaningful (a digamma pole, a
/// starved component, hitting the iteration cap) are *not* errors; they are
/// reported through return values.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Input was empty.
    EmptyInput,

    /// Two parallel sequences disagree in length.
    DimensionMismatch {
        /// Expected length.
        expected: usize,
        /// Found length.
        found: usize,
    },

    /// Invalid number of components requested.
    InvalidClusterCount {
        /// Requested count.
        requested: usize,
        /// Number of observations.
        n_items: usize,
    },

    /// Invalid parameter value.
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Error message.
        message: &'static str,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::EmptyInput => write!(f, "empty input provided"),
            Error::DimensionMismatch { expected, found } => {
                write!(f, "length mismatch: expected {expected}, found {found}")
            }
            Error::InvalidClusterCount { requested, n_items } => {
                write!(
                    f,
                    "cannot fit {requested} components to {n_items} observations"
                )
            }
            Error::InvalidParameter { name, message } => {
                write!(f, "invalid parameter '{name}': {message}")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Largest accepted `|x|`. Squared deviations and their sums over the data
/// stay finite below it.
pub(crate) const MAX_ABS_DATA: f64 = 1e100;

/// Shared argument checks for every fitting entry point.
pub(crate) fn check_fit_args(data: &[f64], k: usize, max_iter: usize) -> Result<()> {
    if data.is_empty() {
        return Err(Error::EmptyInput);
    }
    if k == 0 || k > data.len() {
        return Err(Error::InvalidClusterCount {
            requested: k,
            n_items: data.len(),
        });
    }
    if max_iter == 0 {
        return Err(Error::InvalidParameter {
            name: "max_iter",
            message: "must be >= 1",
        });
    }
    if data.iter().any(|x| !x.is_finite()) {
        return Err(Error::InvalidParameter {
            name: "data",
            message: "must contain only finite values",
        });
    }
    if data.iter().any(|x| x.abs() > MAX_ABS_DATA) {
        return Err(Error::InvalidParameter {
            name: "data",
            message: "magnitudes must not exceed 1e100",
        });
    }
    Ok(())
}

/// Tolerances must be finite and non-negative.
pub(crate) fn check_tol(name: &'static str, tol: f64) -> Result<()> {
    if !(tol >= 0.0 && tol.is_finite()) {
        return Err(Error::InvalidParameter {
            name,
            message: "must be finite and >= 0",
        });
    }
    Ok(())
}
