//! Matrix operation helpers
//!
//! Small dense complex-matrix utilities shared by the network algebra and the
//! calibration engine. Everything here works on a single frequency point.

use ndarray::{arr2, s, Array2, Array3, ArrayView2};
use num_complex::Complex64;

use super::transforms::Tolerance;
use crate::error::NetworkError;

/// Largest element magnitude, the scale singularity checks are relative to.
#[inline]
pub fn max_norm(m: &ArrayView2<Complex64>) -> f64 {
    m.iter().fold(0.0, |acc, z| acc.max(z.norm()))
}

/// Copy the matrix at frequency index `f` out of a `[nfreq, n, n]` stack.
#[inline]
pub fn matrix_at(s: &Array3<Complex64>, f: usize) -> Array2<Complex64> {
    s.slice(s![f, .., ..]).to_owned()
}

/// Stack per-point matrices into a `[nfreq, n, n]` array.
pub fn stack(
    matrices: &[Array2<Complex64>],
    nports: usize,
) -> Result<Array3<Complex64>, NetworkError> {
    let mut out = Array3::<Complex64>::zeros((matrices.len(), nports, nports));
    for (f, m) in matrices.iter().enumerate() {
        if m.dim() != (nports, nports) {
            return Err(NetworkError::Shape(format!(
                "matrix {} is {:?}, expected {}x{}",
                f,
                m.dim(),
                nports,
                nports
            )));
        }
        out.slice_mut(s![f, .., ..]).assign(m);
    }
    Ok(out)
}

/// Identity matrix of given size
#[inline]
pub fn identity(n: usize) -> Array2<Complex64> {
    Array2::<Complex64>::eye(n)
}

/// Require an `n x n` matrix.
pub fn ensure_square(
    m: &Array2<Complex64>,
    n: usize,
    context: &'static str,
) -> Result<(), NetworkError> {
    let (rows, cols) = m.dim();
    if rows != cols {
        return Err(NetworkError::Shape(format!(
            "{}: matrix is {}x{}, expected square",
            context, rows, cols
        )));
    }
    if rows != n {
        return Err(NetworkError::PortMismatch {
            context,
            expected: n,
            found: rows,
        });
    }
    Ok(())
}

/// Inverse of a 2x2 matrix by its adjugate
///
/// The determinant is compared against `tol` scaled by the square of the
/// largest element, so uniformly scaled matrices behave the same.
pub fn invert_2x2(
    m: &Array2<Complex64>,
    tol: Tolerance,
) -> Result<Array2<Complex64>, NetworkError> {
    ensure_square(m, 2, "2x2 inversion")?;

    let det = m[[0, 0]] * m[[1, 1]] - m[[0, 1]] * m[[1, 0]];
    let scale = max_norm(&m.view());
    tol.check("determinant", det, scale * scale)?;

    Ok(arr2(&[[m[[1, 1]], -m[[0, 1]]], [-m[[1, 0]], m[[0, 0]]]]).mapv(|x| x / det))
}
