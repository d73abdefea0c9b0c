//! Network operations
//!
//! Cascade and de-embedding through transfer parameters, and the port
//! reordering helpers (flip, renumber, subnetwork).

use ndarray::{Array1, Array2, Array3};
use num_complex::Complex64;

use super::core::Network;
use crate::error::NetworkError;
use crate::math::matrix_ops::{invert_2x2, matrix_at, stack};
use crate::math::transforms::Tolerance;

/// Cascade two transfer matrices: `t1` feeds `t2`.
///
/// Order follows the physical connection: output of network 1 into input
/// of network 2.
pub fn cascade_t(t1: &Array2<Complex64>, t2: &Array2<Complex64>) -> Array2<Complex64> {
    t1.dot(t2)
}

impl Network {
    /// Cascade with another network (self ** other)
    ///
    /// Only valid for 2-port networks. Connects port 2 of self to port 1 of
    /// other. Both networks must share the same sweep.
    pub fn cascade(&self, other: &Network, tol: Tolerance) -> Result<Network, NetworkError> {
        other.ensure_two_port("cascade")?;
        self.frequency.ensure_compatible(&other.frequency)?;

        let t_a = self.to_transfer(tol)?;
        let t_b = other.to_transfer(tol)?;
        let product = (0..self.nfreq())
            .map(|f| cascade_t(&matrix_at(&t_a, f), &matrix_at(&t_b, f)))
            .collect::<Vec<_>>();
        let t = stack(&product, 2)?;

        let mut out = Network::from_transfer(self.frequency.clone(), &t, tol)?;
        out.z0 = Array1::from_vec(vec![self.z0[0], other.z0[1]]);
        Ok(out)
    }

    /// Inverse network, such that `self.cascade(self.inv())` is a thru.
    pub fn inv(&self, tol: Tolerance) -> Result<Network, NetworkError> {
        let t = self.to_transfer(tol)?;
        let inverted = (0..self.nfreq())
            .map(|f| invert_2x2(&matrix_at(&t, f), tol).map_err(|e| e.at(f, self.f()[f])))
            .collect::<Result<Vec<_>, _>>()?;
        let t_inv = stack(&inverted, 2)?;

        let mut out = Network::from_transfer(self.frequency.clone(), &t_inv, tol)?;
        out.z0 = Array1::from_vec(vec![self.z0[1], self.z0[0]]);
        Ok(out)
    }

    /// Remove a known fixture placed in front of the unknown network.
    ///
    /// `self` is the total response `fixture ** dut`; the result is
    /// `inv(fixture) ** self`.
    pub fn deembed(&self, fixture: &Network, tol: Tolerance) -> Result<Network, NetworkError> {
        self.ensure_two_port("deembed")?;
        fixture.inv(tol)?.cascade(self, tol)
    }

    /// Flip the ports of a 2-port network (swap port 1 and port 2)
    pub fn flipped(&self) -> Result<Network, NetworkError> {
        self.ensure_two_port("flip")?;
        self.renumbered(&[1, 0])
    }

    /// Reorder ports: port `i` of the result is port `order[i]` of self.
    ///
    /// `order` must be a permutation of `0..nports`.
    pub fn renumbered(&self, order: &[usize]) -> Result<Network, NetworkError> {
        let nports = self.nports();
        if order.len() != nports {
            return Err(NetworkError::PortMismatch {
                context: "renumber",
                expected: nports,
                found: order.len(),
            });
        }
        let mut seen = vec![false; nports];
        for &p in order {
            if p >= nports || seen[p] {
                return Err(NetworkError::Shape(format!(
                    "{:?} is not a permutation of {} ports",
                    order, nports
                )));
            }
            seen[p] = true;
        }
        self.subnetwork(order)
    }

    /// Extract a subnetwork with specified ports
    ///
    /// Port `i` of the result is port `ports[i]` of self (0-based).
    pub fn subnetwork(&self, ports: &[usize]) -> Result<Network, NetworkError> {
        let nports = self.nports();
        if ports.is_empty() {
            return Err(NetworkError::Shape("subnetwork needs at least one port".into()));
        }
        if let Some(&p) = ports.iter().find(|&&p| p >= nports) {
            return Err(NetworkError::Shape(format!(
                "port index {} out of range for a {}-port",
                p, nports
            )));
        }

        let nfreq = self.nfreq();
        let n = ports.len();
        let s_new =
            Array3::from_shape_fn((nfreq, n, n), |(f, i, j)| self.s[[f, ports[i], ports[j]]]);
        let z0_new = Array1::from_shape_fn(n, |i| self.z0[ports[i]]);

        let mut out = Network::new(self.frequency.clone(), s_new, z0_new)?;
        out.name = self.name.clone();
        Ok(out)
    }
}
