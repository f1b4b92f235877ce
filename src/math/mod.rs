//! Leaf numeric helpers.

pub mod linalg;
pub mod polynomials;

pub use linalg::{invert, InvertError, InvertMethod};
pub use polynomials::{Polynomial, Rational};

/// Falling factorial `n (n-1) ... (n-k+1)`; zero when `k > n`.
pub fn fall_factorial(n: u64, k: u64) -> f64 {
    if k > n {
        return 0.0;
    }
    (0..k).map(|i| (n - i) as f64).product()
}

/// Root mean square. Empty input gives 0.
pub fn rms(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = data.iter().map(|v| v * v).sum();
    (sum_sq / data.len() as f64).sqrt()
}
