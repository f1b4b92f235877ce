//! Polynomial and rational function objects.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::accel::Arg;
use crate::check::{check_type, Category, CheckError};

/// `p(x) = sum_i c[i] * x^i`.
///
/// Any power can be switched off with a zero coefficient. For example, even powers up to
/// fourth order: `Polynomial::new(vec![a0, 0.0, a2, 0.0, a4])`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polynomial {
    coeffs: Vec<f64>,
}

impl Polynomial {
    pub fn new(coeffs: impl Into<Vec<f64>>) -> Self {
        Self {
            coeffs: coeffs.into(),
        }
    }

    pub fn coeffs(&self) -> &[f64] {
        &self.coeffs
    }

    pub fn eval(&self, x: f64) -> f64 {
        power_sum(&self.coeffs, x)
    }
}

impl TryFrom<&Arg> for Polynomial {
    type Error = CheckError;

    fn try_from(arg: &Arg) -> Result<Self, Self::Error> {
        check_type(Category::Array, "coeffs", arg)?;
        Ok(Self::new(arg.as_slice().unwrap_or_default()))
    }
}

impl fmt::Display for Polynomial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Polynomial{:?}", self.coeffs)
    }
}

/// `r(x) = sum_i n[i] * x^i / d(x)` with `d(x) = sum_j d[j] * x^j`.
///
/// A zero denominator gives IEEE infinities or NaN; no check is made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rational {
    num_coeffs: Vec<f64>,
    den_coeffs: Vec<f64>,
}

impl Rational {
    pub fn new(num_coeffs: impl Into<Vec<f64>>, den_coeffs: impl Into<Vec<f64>>) -> Self {
        Self {
            num_coeffs: num_coeffs.into(),
            den_coeffs: den_coeffs.into(),
        }
    }

    pub fn from_args(num: &Arg, den: &Arg) -> Result<Self, CheckError> {
        check_type(Category::Array, "num_coeffs", num)?;
        check_type(Category::Array, "den_coeffs", den)?;
        Ok(Self::new(
            num.as_slice().unwrap_or_default(),
            den.as_slice().unwrap_or_default(),
        ))
    }

    pub fn num_coeffs(&self) -> &[f64] {
        &self.num_coeffs
    }

    pub fn den_coeffs(&self) -> &[f64] {
        &self.den_coeffs
    }

    pub fn eval(&self, x: f64) -> f64 {
        let den = power_sum(&self.den_coeffs, x);
        self.num_coeffs
            .iter()
            .enumerate()
            .map(|(i, c)| c * x.powi(i as i32) / den)
            .sum()
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rational function{:?}{:?}",
            self.num_coeffs, self.den_coeffs
        )
    }
}

// Term by term, lowest power first, so results match a hand-written loop.
fn power_sum(coeffs: &[f64], x: f64) -> f64 {
    coeffs
        .iter()
        .enumerate()
        .map(|(i, c)| c * x.powi(i as i32))
        .sum()
}
