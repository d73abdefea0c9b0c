//! S-parameter transformation functions
//!
//! Conversions between scattering (S) and scattering-transfer (T)
//! parameters of a 2-port at one frequency point. The T convention is
//!
//! ```text
//! T = 1/S21 * [[-det(S), S11],
//!              [  -S22,    1]]
//! ```
//!
//! so that a series connection of networks A then B has `T = T_A . T_B`.

use ndarray::Array2;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::matrix_ops::{ensure_square, max_norm};
use crate::constants::DEFAULT_SINGULARITY_EPS;
use crate::error::NetworkError;

/// Relative singularity tolerance.
///
/// A pivot is singular when `|pivot| <= eps * scale`, where the scale is the
/// magnitude of the largest element involved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub eps: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            eps: DEFAULT_SINGULARITY_EPS,
        }
    }
}

impl Tolerance {
    pub fn new(eps: f64) -> Self {
        Self { eps }
    }

    /// Fail with [`NetworkError::Singular`] unless `pivot` clears the tolerance.
    pub fn check(
        &self,
        term: &'static str,
        pivot: Complex64,
        scale: f64,
    ) -> Result<(), NetworkError> {
        let magnitude = pivot.norm();
        let threshold = self.eps * scale;
        // NaN pivots fail the comparison and are reported as singular
        if magnitude > threshold {
            Ok(())
        } else {
            Err(NetworkError::Singular {
                point: None,
                term,
                magnitude,
                threshold,
            })
        }
    }
}

/// Convert 2-port S-parameters to T-parameters
pub fn s2t(s: &Array2<Complex64>, tol: Tolerance) -> Result<Array2<Complex64>, NetworkError> {
    ensure_square(s, 2, "s2t")?;

    let s11 = s[[0, 0]];
    let s12 = s[[0, 1]];
    let s21 = s[[1, 0]];
    let s22 = s[[1, 1]];

    tol.check("S21", s21, max_norm(&s.view()))?;

    let det = s11 * s22 - s12 * s21;
    let mut t = Array2::<Complex64>::zeros((2, 2));
    t[[0, 0]] = -det / s21;
    t[[0, 1]] = s11 / s21;
    t[[1, 0]] = -s22 / s21;
    t[[1, 1]] = Complex64::new(1.0, 0.0) / s21;
    Ok(t)
}

/// Convert 2-port T-parameters to S-parameters
pub fn t2s(t: &Array2<Complex64>, tol: Tolerance) -> Result<Array2<Complex64>, NetworkError> {
    ensure_square(t, 2, "t2s")?;

    let t11 = t[[0, 0]];
    let t12 = t[[0, 1]];
    let t21 = t[[1, 0]];
    let t22 = t[[1, 1]];

    tol.check("T22", t22, max_norm(&t.view()))?;

    let det = t11 * t22 - t12 * t21;
    let mut s = Array2::<Complex64>::zeros((2, 2));
    s[[0, 0]] = t12 / t22;
    s[[0, 1]] = det / t22;
    s[[1, 0]] = Complex64::new(1.0, 0.0) / t22;
    s[[1, 1]] = -t21 / t22;
    Ok(s)
}
