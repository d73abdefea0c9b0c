//! Network parameter access
//!
//! Read-only views of the S-parameters plus the transfer (T) representation
//! of 2-port networks.

use ndarray::{s, Array1, Array3, ArrayView2};
use num_complex::Complex64;

use super::core::Network;
use crate::error::NetworkError;
use crate::frequency::Frequency;
use crate::math::conversions::complex_2_db;
use crate::math::matrix_ops::{matrix_at, stack};
use crate::math::transforms::{s2t, t2s, Tolerance};

impl Network {
    /// Get reference impedance
    pub fn z0(&self) -> &Array1<Complex64> {
        &self.z0
    }

    /// Get S-parameters
    pub fn s(&self) -> &Array3<Complex64> {
        &self.s
    }

    /// Get frequency object
    pub fn frequency(&self) -> &Frequency {
        &self.frequency
    }

    /// Get frequency vector in Hz
    pub fn f(&self) -> &[f64] {
        self.frequency.f()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn comments(&self) -> &[String] {
        &self.comments
    }

    /// S-matrix at one frequency point
    pub fn s_at(&self, f: usize) -> ArrayView2<'_, Complex64> {
        self.s.slice(s![f, .., ..])
    }

    /// One S-parameter trace, `S[i][j]` with 0-based ports
    pub fn s_ij(&self, i: usize, j: usize) -> Array1<Complex64> {
        self.s.slice(s![.., i, j]).to_owned()
    }

    /// One S-parameter trace in dB
    pub fn s_db(&self, i: usize, j: usize) -> Array1<f64> {
        self.s.slice(s![.., i, j]).mapv(complex_2_db)
    }

    /// Get T-parameters (scattering transfer), `[nfreq, 2, 2]`
    ///
    /// Fails on non-2-ports and at the first point whose S21 is singular.
    pub fn to_transfer(&self, tol: Tolerance) -> Result<Array3<Complex64>, NetworkError> {
        self.ensure_two_port("transfer parameters")?;
        let matrices = (0..self.nfreq())
            .map(|f| s2t(&matrix_at(&self.s, f), tol).map_err(|e| e.at(f, self.f()[f])))
            .collect::<Result<Vec<_>, _>>()?;
        stack(&matrices, 2)
    }

    /// Build a 2-port from T-parameters over `frequency`
    pub fn from_transfer(
        frequency: Frequency,
        t: &Array3<Complex64>,
        tol: Tolerance,
    ) -> Result<Network, NetworkError> {
        let (nfreq, rows, _) = t.dim();
        if rows != 2 {
            return Err(NetworkError::PortMismatch {
                context: "transfer parameters",
                expected: 2,
                found: rows,
            });
        }
        if nfreq != frequency.npoints() {
            return Err(NetworkError::Shape(format!(
                "{} T-matrices for a sweep of {} points",
                nfreq,
                frequency.npoints()
            )));
        }
        let matrices = (0..nfreq)
            .map(|f| t2s(&matrix_at(t, f), tol).map_err(|e| e.at(f, frequency.f()[f])))
            .collect::<Result<Vec<_>, _>>()?;
        let s = stack(&matrices, 2)?;
        Network::new(frequency, s, super::core::default_z0(2))
    }

    pub(crate) fn ensure_two_port(&self, context: &'static str) -> Result<(), NetworkError> {
        self.ensure_nports(2, context)
    }

    pub(crate) fn ensure_nports(
        &self,
        n: usize,
        context: &'static str,
    ) -> Result<(), NetworkError> {
        if self.nports() != n {
            return Err(NetworkError::PortMismatch {
                context,
                expected: n,
                found: self.nports(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frequency::FrequencyUnit;
    use approx::assert_relative_eq;
    use ndarray::arr2;

    #[test]
    fn test_transfer_roundtrip_over_sweep() {
        let freq = Frequency::from_f(vec![1.0, 2.0], FrequencyUnit::GHz).unwrap();
        let m = arr2(&[
            [Complex64::new(0.2, 0.1), Complex64::new(0.9, 0.0)],
            [Complex64::new(0.9, 0.0), Complex64::new(-0.1, 0.3)],
        ]);
        let ntwk = Network::constant(freq.clone(), &m).unwrap();
        let t = ntwk.to_transfer(Tolerance::default()).unwrap();
        let back = Network::from_transfer(freq, &t, Tolerance::default()).unwrap();
        for (a, b) in ntwk.s().iter().zip(back.s().iter()) {
            assert_relative_eq!(a.re, b.re, epsilon = 1e-12);
            assert_relative_eq!(a.im, b.im, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_transfer_error_names_point() {
        let freq = Frequency::from_f(vec![1.0, 2.0], FrequencyUnit::GHz).unwrap();
        let ntwk = Network::from_fn(freq, 2, |i, _| {
            let s21 = if i == 1 { 0.0 } else { 0.5 };
            arr2(&[
                [Complex64::new(0.1, 0.0), Complex64::new(0.5, 0.0)],
                [Complex64::new(s21, 0.0), Complex64::new(0.1, 0.0)],
            ])
        })
        .unwrap();
        let err = ntwk.to_transfer(Tolerance::default()).unwrap_err();
        assert!(err.to_string().contains("point 1 (2000000000 Hz)"));
    }

    #[test]
    fn test_s_db() {
        let freq = Frequency::from_f(vec![1.0], FrequencyUnit::GHz).unwrap();
        let ntwk = Network::one_port(freq, Complex64::new(0.1, 0.0));
        assert_relative_eq!(ntwk.s_db(0, 0)[0], -20.0, epsilon = 1e-10);
    }
}
