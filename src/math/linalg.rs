//! Dense matrix inversion with a choice of decomposition.

use std::fmt;
use std::str::FromStr;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How [`invert`] computes the inverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvertMethod {
    /// nalgebra's `try_inverse` (closed form for small sizes, LU otherwise).
    Direct,
    /// Explicit LU decomposition with partial pivoting.
    Lu,
    /// Singular value decomposition; rejects rank-deficient input.
    Svd,
    /// Moore-Penrose pseudo-inverse. Accepts singular and non-square input.
    Pinv,
}

impl InvertMethod {
    pub const ALL: [InvertMethod; 4] = [
        InvertMethod::Direct,
        InvertMethod::Lu,
        InvertMethod::Svd,
        InvertMethod::Pinv,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InvertMethod::Direct => "direct",
            InvertMethod::Lu => "lu",
            InvertMethod::Svd => "svd",
            InvertMethod::Pinv => "pinv",
        }
    }
}

impl fmt::Display for InvertMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvertMethod {
    type Err = InvertError;

    /// Also accepts the library names the toolkit used: `numpy`, `scipy`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" | "numpy" => Ok(InvertMethod::Direct),
            "lu" | "scipy" => Ok(InvertMethod::Lu),
            "svd" => Ok(InvertMethod::Svd),
            "pinv" => Ok(InvertMethod::Pinv),
            _ => Err(InvertError::UnknownMethod {
                name: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum InvertError {
    #[error("unknown inversion method '{name}' (expected direct, lu, svd or pinv)")]
    UnknownMethod { name: String },

    #[error("cannot invert a {rows}x{cols} matrix with method {method}")]
    NotSquare {
        rows: usize,
        cols: usize,
        method: InvertMethod,
    },

    #[error("matrix is singular (method {method})")]
    Singular { method: InvertMethod },

    #[error("decomposition failed: {0}")]
    Decomposition(&'static str),
}

/// Invert `matrix` with the given method.
///
/// Every method except [`InvertMethod::Pinv`] needs a square, non-singular
/// matrix.
pub fn invert(matrix: &DMatrix<f64>, method: InvertMethod) -> Result<DMatrix<f64>, InvertError> {
    let (rows, cols) = matrix.shape();
    if method != InvertMethod::Pinv && rows != cols {
        return Err(InvertError::NotSquare { rows, cols, method });
    }
    if matrix.is_empty() {
        return Ok(DMatrix::zeros(cols, rows));
    }

    match method {
        InvertMethod::Direct => matrix
            .clone()
            .try_inverse()
            .ok_or(InvertError::Singular { method }),
        InvertMethod::Lu => matrix
            .clone()
            .lu()
            .try_inverse()
            .ok_or(InvertError::Singular { method }),
        InvertMethod::Svd | InvertMethod::Pinv => {
            let svd = matrix.clone().svd(true, true);
            let largest = svd.singular_values.max();
            let cutoff = f64::EPSILON * rows.max(cols) as f64 * largest;
            if method == InvertMethod::Svd && svd.singular_values.min() <= cutoff {
                return Err(InvertError::Singular { method });
            }
            svd.pseudo_inverse(cutoff)
                .map_err(InvertError::Decomposition)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DMatrix<f64> {
        DMatrix::from_row_slice(3, 3, &[1.0, 2.0, -1.0, 2.0, 1.0, 2.0, -1.0, 2.0, 1.0])
    }

    #[test]
    fn test_every_method_inverts_sample() {
        let m = sample();
        let identity = DMatrix::<f64>::identity(3, 3);
        for method in InvertMethod::ALL {
            let inv = invert(&m, method).unwrap();
            let product = &m * &inv;
            assert!(
                (product - &identity).abs().max() < 1e-12,
                "method {method} does not give the inverse"
            );
        }
    }

    #[test]
    fn test_known_inverse() {
        // det = -16
        let expected = DMatrix::from_row_slice(
            3,
            3,
            &[
                3.0 / 16.0,
                4.0 / 16.0,
                -5.0 / 16.0,
                4.0 / 16.0,
                0.0,
                4.0 / 16.0,
                -5.0 / 16.0,
                4.0 / 16.0,
                3.0 / 16.0,
            ],
        );
        let inv = invert(&sample(), InvertMethod::Lu).unwrap();
        assert!((inv - expected).abs().max() < 1e-14);
    }

    #[test]
    fn test_singular_is_rejected() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        for method in [InvertMethod::Direct, InvertMethod::Lu, InvertMethod::Svd] {
            assert_eq!(invert(&m, method), Err(InvertError::Singular { method }));
        }
        // The pseudo-inverse exists and satisfies A A+ A = A.
        let pinv = invert(&m, InvertMethod::Pinv).unwrap();
        assert!((&m * &pinv * &m - &m).abs().max() < 1e-12);
    }

    #[test]
    fn test_non_square() {
        let m = DMatrix::from_row_slice(2, 3, &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        assert!(matches!(
            invert(&m, InvertMethod::Svd),
            Err(InvertError::NotSquare { rows: 2, cols: 3, .. })
        ));
        let pinv = invert(&m, InvertMethod::Pinv).unwrap();
        assert_eq!(pinv.shape(), (3, 2));
    }

    #[test]
    fn test_method_names() {
        assert_eq!("scipy".parse::<InvertMethod>(), Ok(InvertMethod::Lu));
        assert_eq!("NumPy".parse::<InvertMethod>(), Ok(InvertMethod::Direct));
        assert_eq!("pinv".parse::<InvertMethod>(), Ok(InvertMethod::Pinv));
        let err = "cholesky".parse::<InvertMethod>().unwrap_err();
        assert!(err.to_string().contains("'cholesky'"));
    }
}
