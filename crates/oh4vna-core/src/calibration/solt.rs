//! SOL and SOLT error models at a single frequency point
//!
//! The one-port model is the 3-term flow graph
//!
//! ```text
//! Gm = e00 + e10e01 * G / (1 - e11 * G)
//! ```
//!
//! and the two-port model is the forward/reverse 12-term model built on
//! top of the two one-port models plus a through connection.

use nalgebra::{Matrix3, Vector3};
use ndarray::{arr2, Array2};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::NetworkError;
use crate::math::matrix_ops::ensure_square;
use crate::math::transforms::Tolerance;

const ONE: Complex64 = Complex64::new(1.0, 0.0);

/// 3-term one-port error model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OnePortTerms {
    /// e00
    pub directivity: Complex64,
    /// e11
    pub source_match: Complex64,
    /// e10 * e01
    pub reflection_tracking: Complex64,
}

impl OnePortTerms {
    /// Error-free reflectometer
    pub fn ideal() -> Self {
        Self {
            directivity: Complex64::new(0.0, 0.0),
            source_match: Complex64::new(0.0, 0.0),
            reflection_tracking: ONE,
        }
    }

    /// Solve the model from three measured/actual reflection pairs.
    ///
    /// With `de = e00 e11 - e10e01` each standard gives one linear equation
    ///
    /// ```text
    /// [1  -Gi  Gm*Gi] [e00 de e11]^T = Gm
    /// ```
    pub fn solve(
        measured: [Complex64; 3],
        actual: [Complex64; 3],
        tol: Tolerance,
    ) -> Result<Self, NetworkError> {
        let row = |k: usize| [ONE, -actual[k], measured[k] * actual[k]];
        let (r0, r1, r2) = (row(0), row(1), row(2));
        let a = Matrix3::new(
            r0[0], r0[1], r0[2], //
            r1[0], r1[1], r1[2], //
            r2[0], r2[1], r2[2],
        );

        // Product of row norms bounds the determinant
        let scale: f64 = [r0, r1, r2]
            .iter()
            .map(|r| r.iter().map(|z| z.norm()).fold(0.0, f64::max))
            .product();
        let lu = a.lu();
        tol.check("one-port standards determinant", lu.determinant(), scale)?;

        let b = Vector3::new(measured[0], measured[1], measured[2]);
        let x = lu.solve(&b).ok_or(NetworkError::Singular {
            point: None,
            term: "one-port standards determinant",
            magnitude: 0.0,
            threshold: tol.eps * scale,
        })?;

        let (e00, de, e11) = (x[0], x[1], x[2]);
        Ok(Self {
            directivity: e00,
            source_match: e11,
            reflection_tracking: e00 * e11 - de,
        })
    }

    /// Actual reflection from a measured one
    pub fn correct(&self, measured: Complex64, tol: Tolerance) -> Result<Complex64, NetworkError> {
        let offset = measured - self.directivity;
        let den = self.reflection_tracking + self.source_match * offset;
        tol.check(
            "reflection correction denominator",
            den,
            self.reflection_tracking.norm() + (self.source_match * offset).norm(),
        )?;
        Ok(offset / den)
    }

    /// Measured reflection for an actual one
    pub fn distort(&self, actual: Complex64, tol: Tolerance) -> Result<Complex64, NetworkError> {
        let den = ONE - self.source_match * actual;
        tol.check("source match loop", den, 1.0)?;
        Ok(self.directivity + self.reflection_tracking * actual / den)
    }
}

/// The six error terms of one stimulus direction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectionTerms {
    pub directivity: Complex64,
    pub source_match: Complex64,
    pub reflection_tracking: Complex64,
    pub load_match: Complex64,
    pub transmission_tracking: Complex64,
    pub isolation: Complex64,
}

impl DirectionTerms {
    /// Direction whose reflectometer is `terms` and whose other paths are ideal
    pub fn from_one_port(terms: OnePortTerms) -> Self {
        Self {
            directivity: terms.directivity,
            source_match: terms.source_match,
            reflection_tracking: terms.reflection_tracking,
            load_match: Complex64::new(0.0, 0.0),
            transmission_tracking: ONE,
            isolation: Complex64::new(0.0, 0.0),
        }
    }

    /// The reflectometer part of this direction
    pub fn one_port(&self) -> OnePortTerms {
        OnePortTerms {
            directivity: self.directivity,
            source_match: self.source_match,
            reflection_tracking: self.reflection_tracking,
        }
    }

    /// Load match and transmission tracking from a through measurement.
    ///
    /// `s_in`/`s_out` are the actual reflections of the through seen from
    /// the driven and the terminated side, `s_fwd`/`s_back` its transmission
    /// towards and from the receiver.
    #[allow(clippy::too_many_arguments)]
    fn solve(
        source: OnePortTerms,
        refl_measured: Complex64,
        trans_measured: Complex64,
        isolation: Complex64,
        s_in: Complex64,
        s_fwd: Complex64,
        s_back: Complex64,
        s_out: Complex64,
        tol: Tolerance,
    ) -> Result<Self, NetworkError> {
        // Reflection at the driven reference plane
        let gamma_in = source.correct(refl_measured, tol)?;

        let excess = gamma_in - s_in;
        let den = s_fwd * s_back + s_out * excess;
        let scale = (s_fwd * s_back).norm() + (s_out * excess).norm();
        tol.check("through load-match denominator", den, scale)?;
        let load_match = excess / den;

        let loop_det = (ONE - source.source_match * s_in) * (ONE - load_match * s_out)
            - source.source_match * load_match * s_fwd * s_back;
        tol.check("through transmission", s_fwd, 1.0)?;
        let transmitted = trans_measured - isolation;
        tol.check(
            "through transmission tracking",
            transmitted,
            trans_measured.norm() + isolation.norm(),
        )?;
        let transmission_tracking = transmitted * loop_det / s_fwd;

        Ok(Self {
            directivity: source.directivity,
            source_match: source.source_match,
            reflection_tracking: source.reflection_tracking,
            load_match,
            transmission_tracking,
            isolation,
        })
    }
}

/// 12-term two-port error model between two instrument ports
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TwoPortTerms {
    pub forward: DirectionTerms,
    pub reverse: DirectionTerms,
}

impl TwoPortTerms {
    /// Solve the full model from the two one-port models and a through.
    ///
    /// `isolation` holds the forward and reverse crosstalk, zero when the
    /// isolation step was skipped.
    pub fn solve(
        port_a: OnePortTerms,
        port_b: OnePortTerms,
        thru_measured: &Array2<Complex64>,
        thru_actual: &Array2<Complex64>,
        isolation: (Complex64, Complex64),
        tol: Tolerance,
    ) -> Result<Self, NetworkError> {
        ensure_square(thru_measured, 2, "through measurement")?;
        ensure_square(thru_actual, 2, "through standard")?;

        let (s11, s12, s21, s22) = (
            thru_actual[[0, 0]],
            thru_actual[[0, 1]],
            thru_actual[[1, 0]],
            thru_actual[[1, 1]],
        );

        let forward = DirectionTerms::solve(
            port_a,
            thru_measured[[0, 0]],
            thru_measured[[1, 0]],
            isolation.0,
            s11,
            s21,
            s12,
            s22,
            tol,
        )?;
        let reverse = DirectionTerms::solve(
            port_b,
            thru_measured[[1, 1]],
            thru_measured[[0, 1]],
            isolation.1,
            s22,
            s12,
            s21,
            s11,
            tol,
        )?;

        Ok(Self { forward, reverse })
    }

    /// Corrected 2x2 S-matrix from a raw one
    pub fn correct(
        &self,
        measured: &Array2<Complex64>,
        tol: Tolerance,
    ) -> Result<Array2<Complex64>, NetworkError> {
        ensure_square(measured, 2, "two-port correction")?;
        let (fw, rv) = (&self.forward, &self.reverse);
        tol.check("forward reflection tracking", fw.reflection_tracking, 1.0)?;
        tol.check("forward transmission tracking", fw.transmission_tracking, 1.0)?;
        tol.check("reverse reflection tracking", rv.reflection_tracking, 1.0)?;
        tol.check("reverse transmission tracking", rv.transmission_tracking, 1.0)?;

        let n11 = (measured[[0, 0]] - fw.directivity) / fw.reflection_tracking;
        let n21 = (measured[[1, 0]] - fw.isolation) / fw.transmission_tracking;
        let n12 = (measured[[0, 1]] - rv.isolation) / rv.transmission_tracking;
        let n22 = (measured[[1, 1]] - rv.directivity) / rv.reflection_tracking;

        let a = ONE + n11 * fw.source_match;
        let b = ONE + n22 * rv.source_match;
        let cross = n21 * n12 * fw.load_match * rv.load_match;
        let den = a * b - cross;
        tol.check("two-port correction denominator", den, (a * b).norm() + cross.norm())?;

        let s11 = (n11 * b - fw.load_match * n21 * n12) / den;
        let s21 = n21 * (ONE + n22 * (rv.source_match - fw.load_match)) / den;
        let s12 = n12 * (ONE + n11 * (fw.source_match - rv.load_match)) / den;
        let s22 = (n22 * a - rv.load_match * n21 * n12) / den;

        Ok(arr2(&[[s11, s12], [s21, s22]]))
    }

    /// Raw 2x2 S-matrix the model produces for an actual one
    pub fn distort(
        &self,
        actual: &Array2<Complex64>,
        tol: Tolerance,
    ) -> Result<Array2<Complex64>, NetworkError> {
        ensure_square(actual, 2, "two-port distortion")?;
        let (fw, rv) = (&self.forward, &self.reverse);
        let (s11, s12, s21, s22) = (actual[[0, 0]], actual[[0, 1]], actual[[1, 0]], actual[[1, 1]]);
        let ds = s11 * s22 - s21 * s12;

        let den_f = ONE - fw.source_match * s11 - fw.load_match * s22
            + fw.source_match * fw.load_match * ds;
        tol.check("forward source loop", den_f, 1.0)?;
        let den_r = ONE - rv.source_match * s22 - rv.load_match * s11
            + rv.source_match * rv.load_match * ds;
        tol.check("reverse source loop", den_r, 1.0)?;

        let m11 = fw.directivity + fw.reflection_tracking * (s11 - fw.load_match * ds) / den_f;
        let m21 = fw.isolation + fw.transmission_tracking * s21 / den_f;
        let m22 = rv.directivity + rv.reflection_tracking * (s22 - rv.load_match * ds) / den_r;
        let m12 = rv.isolation + rv.transmission_tracking * s12 / den_r;

        Ok(arr2(&[[m11, m12], [m21, m22]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    fn assert_close(a: Complex64, b: Complex64) {
        assert_relative_eq!(a.re, b.re, epsilon = 1e-10);
        assert_relative_eq!(a.im, b.im, epsilon = 1e-10);
    }

    fn port_terms(d: f64) -> OnePortTerms {
        OnePortTerms {
            directivity: c(d, 0.02),
            source_match: c(0.05, -0.03),
            reflection_tracking: c(0.9, 0.1),
        }
    }

    fn ideal_sol() -> [Complex64; 3] {
        [c(-1.0, 0.0), c(1.0, 0.0), c(0.0, 0.0)]
    }

    #[test]
    fn test_one_port_solve_recovers_terms() {
        let truth = port_terms(0.1);
        let actual = ideal_sol();
        let measured = actual.map(|g| truth.distort(g, Tolerance::default()).unwrap());

        let solved = OnePortTerms::solve(measured, actual, Tolerance::default()).unwrap();
        assert_close(solved.directivity, truth.directivity);
        assert_close(solved.source_match, truth.source_match);
        assert_close(solved.reflection_tracking, truth.reflection_tracking);

        let dut = c(0.5, 0.2);
        let raw = truth.distort(dut, Tolerance::default()).unwrap();
        assert_close(solved.correct(raw, Tolerance::default()).unwrap(), dut);
    }

    #[test]
    fn test_one_port_identical_standards_are_singular() {
        let actual = [c(1.0, 0.0), c(1.0, 0.0), c(0.0, 0.0)];
        let measured = [c(1.0, 0.0), c(1.0, 0.0), c(0.0, 0.0)];
        let err = OnePortTerms::solve(measured, actual, Tolerance::default()).unwrap_err();
        assert!(matches!(err, NetworkError::Singular { .. }));
    }

    #[test]
    fn test_two_port_roundtrip_with_non_ideal_thru() {
        let port_a = port_terms(0.1);
        let port_b = port_terms(-0.07);
        let truth = TwoPortTerms {
            forward: DirectionTerms {
                load_match: c(0.04, 0.01),
                transmission_tracking: c(0.85, -0.2),
                isolation: c(1e-4, 0.0),
                ..DirectionTerms::from_one_port(port_a)
            },
            reverse: DirectionTerms {
                load_match: c(-0.03, 0.02),
                transmission_tracking: c(0.8, 0.15),
                isolation: c(0.0, 2e-4),
                ..DirectionTerms::from_one_port(port_b)
            },
        };

        let thru = arr2(&[[c(0.02, 0.01), c(0.95, -0.1)], [c(0.95, -0.1), c(0.01, -0.02)]]);
        let thru_raw = truth.distort(&thru, Tolerance::default()).unwrap();
        let solved = TwoPortTerms::solve(
            port_a,
            port_b,
            &thru_raw,
            &thru,
            (truth.forward.isolation, truth.reverse.isolation),
            Tolerance::default(),
        )
        .unwrap();
        assert_close(solved.forward.load_match, truth.forward.load_match);
        assert_close(solved.reverse.transmission_tracking, truth.reverse.transmission_tracking);

        let dut = arr2(&[[c(0.3, -0.1), c(0.4, 0.3)], [c(0.6, 0.2), c(-0.2, 0.05)]]);
        let raw = truth.distort(&dut, Tolerance::default()).unwrap();
        let corrected = solved.correct(&raw, Tolerance::default()).unwrap();
        for (x, y) in corrected.iter().zip(dut.iter()) {
            assert_close(*x, *y);
        }
    }

    #[test]
    fn test_disconnected_thru_is_singular() {
        let port_a = port_terms(0.1);
        let port_b = port_terms(-0.07);
        let isolation = (c(1e-4, 0.0), c(0.0, 2e-4));
        let thru = arr2(&[[c(0.0, 0.0), c(1.0, 0.0)], [c(1.0, 0.0), c(0.0, 0.0)]]);
        // Open cable ends: full reflection, only crosstalk on the receivers
        let raw = arr2(&[
            [port_a.distort(c(1.0, 0.0), Tolerance::default()).unwrap(), isolation.1],
            [isolation.0, port_b.distort(c(1.0, 0.0), Tolerance::default()).unwrap()],
        ]);
        let err = TwoPortTerms::solve(port_a, port_b, &raw, &thru, isolation, Tolerance::default())
            .unwrap_err();
        match err {
            NetworkError::Singular { term, magnitude, .. } => {
                assert_eq!(term, "through transmission tracking");
                assert_eq!(magnitude, 0.0);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_correct_rejects_zero_tracking() {
        let mut terms = TwoPortTerms {
            forward: DirectionTerms::from_one_port(port_terms(0.1)),
            reverse: DirectionTerms::from_one_port(port_terms(-0.07)),
        };
        terms.reverse.transmission_tracking = c(0.0, 0.0);
        let raw = arr2(&[[c(0.1, 0.0), c(0.5, 0.0)], [c(0.5, 0.0), c(0.1, 0.0)]]);
        match terms.correct(&raw, Tolerance::default()).unwrap_err() {
            NetworkError::Singular { term, .. } => {
                assert_eq!(term, "reverse transmission tracking")
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
