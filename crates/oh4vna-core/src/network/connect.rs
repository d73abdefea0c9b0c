//! Network connection functions
//!
//! Connecting n-port networks together, terminating ports, and embedding a
//! two-port behind a three-port coupler.
//!
//! Based on the "sub-network growth" algorithm described in:
//! - Filipsson, Gunnar, "A New General Computer Algorithm for S-Matrix Calculation
//!   of Interconnected Multiports", 11th European Microwave Conference, 1981.

use nalgebra::DMatrix;
use ndarray::{s, Array1, Array3};
use num_complex::Complex64;

use super::core::Network;
use crate::error::NetworkError;
use crate::math::transforms::Tolerance;

/// Connect two ports of a single n-port network's s-matrix.
///
/// Ports `k` and `l` (0-based) disappear; the remaining ports keep their
/// relative order. `hz` holds the sweep points and locates singular loops.
pub fn innerconnect_s(
    a: &Array3<Complex64>,
    k: usize,
    l: usize,
    hz: &[f64],
    tol: Tolerance,
) -> Result<Array3<Complex64>, NetworkError> {
    let (nfreq, nports, _) = a.dim();
    if hz.len() != nfreq {
        return Err(NetworkError::SweepMismatch(format!(
            "{} S-matrices for {} frequency points",
            nfreq,
            hz.len()
        )));
    }
    if k >= nports || l >= nports {
        return Err(NetworkError::Shape(format!(
            "cannot connect ports {} and {} of a {}-port",
            k, l, nports
        )));
    }
    if k == l {
        return Err(NetworkError::Shape(format!("cannot connect port {} to itself", k)));
    }

    let ext: Vec<usize> = (0..nports).filter(|&p| p != k && p != l).collect();
    let int = [k, l];
    let n_ext = ext.len();

    // The connection swaps the incident waves of the two internal ports
    let one = Complex64::new(1.0, 0.0);
    let zero = Complex64::new(0.0, 0.0);
    let m = DMatrix::from_row_slice(2, 2, &[zero, one, one, zero]);

    let mut result = Array3::<Complex64>::zeros((nfreq, n_ext, n_ext));

    for f in 0..nfreq {
        let s_ee = DMatrix::from_fn(n_ext, n_ext, |i, j| a[[f, ext[i], ext[j]]]);
        let s_ei = DMatrix::from_fn(n_ext, 2, |i, j| a[[f, ext[i], int[j]]]);
        let s_ie = DMatrix::from_fn(2, n_ext, |i, j| a[[f, int[i], ext[j]]]);
        let s_ii = DMatrix::from_fn(2, 2, |i, j| a[[f, int[i], int[j]]]);

        // S_new = S_ee + S_ei * (M - S_ii)^-1 * S_ie
        let lu = (&m - &s_ii).lu();
        tol.check("connection loop determinant", lu.determinant(), 1.0)
            .map_err(|e| e.at(f, hz[f]))?;
        let loop_inv = lu.try_inverse().ok_or_else(|| {
            NetworkError::Singular {
                point: None,
                term: "connection loop determinant",
                magnitude: 0.0,
                threshold: tol.eps,
            }
            .at(f, hz[f])
        })?;

        let s_new = s_ee + s_ei * loop_inv * s_ie;
        for i in 0..n_ext {
            for j in 0..n_ext {
                result[[f, i, j]] = s_new[(i, j)];
            }
        }
    }

    Ok(result)
}

/// Connect two n-port networks' s-matrices together.
///
/// Connects port `k` on network `A` to port `l` on network `B` (0-based).
/// The result has the ports of A (minus k) followed by the ports of B
/// (minus l).
pub fn connect_s(
    a: &Array3<Complex64>,
    k: usize,
    b: &Array3<Complex64>,
    l: usize,
    hz: &[f64],
    tol: Tolerance,
) -> Result<Array3<Complex64>, NetworkError> {
    let (nfreq, nports_a, _) = a.dim();
    let nports_b = b.shape()[1];

    if k >= nports_a || l >= nports_b {
        return Err(NetworkError::Shape(format!(
            "cannot connect port {} of a {}-port to port {} of a {}-port",
            k, nports_a, l, nports_b
        )));
    }
    if b.shape()[0] != nfreq {
        return Err(NetworkError::SweepMismatch(format!(
            "{} points vs {} points",
            nfreq,
            b.shape()[0]
        )));
    }

    // Block-diagonal composite of A and B
    let nc = nports_a + nports_b;
    let mut c = Array3::<Complex64>::zeros((nfreq, nc, nc));
    c.slice_mut(s![.., ..nports_a, ..nports_a]).assign(a);
    c.slice_mut(s![.., nports_a.., nports_a..]).assign(b);

    innerconnect_s(&c, k, nports_a + l, hz, tol)
}

impl Network {
    /// Connect two ports of this network together (innerconnect)
    pub fn innerconnect(
        &self,
        k: usize,
        l: usize,
        tol: Tolerance,
    ) -> Result<Network, NetworkError> {
        let s_new = innerconnect_s(&self.s, k, l, self.f(), tol)?;
        let z0: Vec<Complex64> = (0..self.nports())
            .filter(|&i| i != k && i != l)
            .map(|i| self.z0[i])
            .collect();
        Network::new(self.frequency.clone(), s_new, Array1::from_vec(z0))
    }

    /// Connect this network's port `k` to another network's port `l`
    ///
    /// Returns a new network with (nports_self + nports_other - 2) ports.
    pub fn connect(
        &self,
        k: usize,
        other: &Network,
        l: usize,
        tol: Tolerance,
    ) -> Result<Network, NetworkError> {
        self.frequency.ensure_compatible(&other.frequency)?;

        let s_new = connect_s(&self.s, k, &other.s, l, self.f(), tol)?;
        let z0: Vec<Complex64> = (0..self.nports())
            .filter(|&i| i != k)
            .map(|i| self.z0[i])
            .chain((0..other.nports()).filter(|&i| i != l).map(|i| other.z0[i]))
            .collect();
        Network::new(self.frequency.clone(), s_new, Array1::from_vec(z0))
    }
}

/// Terminate port `port` (0-based) of `network` with a 1-port load.
pub fn terminate(
    network: &Network,
    port: usize,
    load: &Network,
    tol: Tolerance,
) -> Result<Network, NetworkError> {
    load.ensure_nports(1, "termination load")?;
    network.connect(port, load, 0, tol)
}

/// Embed an instrument two-port behind a three-port coupler.
///
/// The coupler's through port (port 2) is wired to the two-port's
/// `injection_port` (1 or 2). The coupler's input port takes the place of
/// that instrument port, so the result is ordered
/// `[instrument port 1, instrument port 2, coupled port]`.
pub fn embed_three_port(
    two_port: &Network,
    coupler: &Network,
    injection_port: usize,
    tol: Tolerance,
) -> Result<Network, NetworkError> {
    two_port.ensure_nports(2, "embed_three_port two-port response")?;
    coupler.ensure_nports(3, "embed_three_port coupler")?;
    if !(1..=2).contains(&injection_port) {
        return Err(NetworkError::Shape(format!(
            "injection port must be 1 or 2, got {}",
            injection_port
        )));
    }

    // connect() yields [coupler input, coupled, remaining instrument port]
    let joined = coupler.connect(1, two_port, injection_port - 1, tol)?;
    let order = if injection_port == 1 { [0, 2, 1] } else { [2, 0, 1] };
    joined.renumbered(&order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frequency::{Frequency, FrequencyUnit};
    use approx::assert_relative_eq;
    use ndarray::{arr2, Array2};

    fn freq() -> Frequency {
        Frequency::from_f(vec![1.0, 2.0], FrequencyUnit::GHz).unwrap()
    }

    fn two_port(s: Array2<Complex64>) -> Network {
        Network::constant(freq(), &s).unwrap()
    }

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn test_connect_two_thrus() {
        let thru = Network::thru(freq());
        let connected = thru.connect(1, &thru, 0, Tolerance::default()).unwrap();

        assert_eq!(connected.nports(), 2);
        assert_relative_eq!(connected.s()[[0, 0, 1]].re, 1.0, epsilon = 1e-12);
        assert_relative_eq!(connected.s()[[0, 0, 0]].norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_connect_matches_cascade() {
        let a = two_port(arr2(&[[c(0.1, 0.1), c(0.8, 0.0)], [c(0.8, 0.0), c(0.2, -0.1)]]));
        let b = two_port(arr2(&[[c(-0.3, 0.0), c(0.6, 0.2)], [c(0.6, 0.2), c(0.05, 0.0)]]));

        let via_connect = a.connect(1, &b, 0, Tolerance::default()).unwrap();
        let via_cascade = a.cascade(&b, Tolerance::default()).unwrap();
        for (x, y) in via_connect.s().iter().zip(via_cascade.s().iter()) {
            assert_relative_eq!(x.re, y.re, epsilon = 1e-12);
            assert_relative_eq!(x.im, y.im, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_terminate_with_matched_load() {
        let a = two_port(arr2(&[[c(0.1, 0.0), c(0.5, 0.0)], [c(0.5, 0.0), c(0.3, 0.0)]]));
        let load = Network::one_port(freq(), c(0.0, 0.0));
        let reduced = terminate(&a, 1, &load, Tolerance::default()).unwrap();
        assert_eq!(reduced.nports(), 1);
        assert_relative_eq!(reduced.s()[[1, 0, 0]].re, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_terminate_with_reflective_load() {
        // Gamma_in = S11 + S12 S21 G / (1 - S22 G)
        let a = two_port(arr2(&[[c(0.1, 0.0), c(0.5, 0.0)], [c(0.5, 0.0), c(0.3, 0.0)]]));
        let load = Network::one_port(freq(), c(-1.0, 0.0));
        let reduced = terminate(&a, 1, &load, Tolerance::default()).unwrap();
        assert_relative_eq!(reduced.s()[[0, 0, 0]].re, 0.1 - 0.25 / 1.3, epsilon = 1e-12);
    }

    #[test]
    fn test_embed_with_ideal_splitter_ports() {
        // Coupler with a perfect thru between ports 1 and 2, nothing on port 3
        let mut m = Array2::<Complex64>::zeros((3, 3));
        m[[0, 1]] = c(1.0, 0.0);
        m[[1, 0]] = c(1.0, 0.0);
        let coupler = Network::constant(freq(), &m).unwrap();

        let dut = two_port(arr2(&[[c(0.2, 0.0), c(0.7, 0.1)], [c(0.6, 0.0), c(0.4, 0.0)]]));

        for injection in [1, 2] {
            let embedded =
                embed_three_port(&dut, &coupler, injection, Tolerance::default()).unwrap();
            assert_eq!(embedded.nports(), 3);
            let sub = embedded.subnetwork(&[0, 1]).unwrap();
            for (x, y) in sub.s().iter().zip(dut.s().iter()) {
                assert_relative_eq!(x.re, y.re, epsilon = 1e-12);
                assert_relative_eq!(x.im, y.im, epsilon = 1e-12);
            }
            for p in [0, 1] {
                assert_eq!(embedded.s()[[0, 2, p]].norm(), 0.0);
                assert_eq!(embedded.s()[[0, p, 2]].norm(), 0.0);
            }
        }
    }

    #[test]
    fn test_embed_requires_two_port() {
        let coupler = Network::constant(freq(), &Array2::zeros((3, 3))).unwrap();
        let one_port = Network::one_port(freq(), c(0.0, 0.0));
        let err = embed_three_port(&one_port, &coupler, 1, Tolerance::default()).unwrap_err();
        assert!(matches!(err, NetworkError::PortMismatch { expected: 2, found: 1, .. }));

        let thru = Network::thru(freq());
        assert!(embed_three_port(&thru, &coupler, 3, Tolerance::default()).is_err());
    }
}
