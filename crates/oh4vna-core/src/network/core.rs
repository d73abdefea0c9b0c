//! Core Network struct and constructors
//!
//! Contains the fundamental Network data structure and factory methods.

use std::path::Path;

use ndarray::{Array1, Array2, Array3};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_Z0;
use crate::error::NetworkError;
use crate::frequency::Frequency;
use crate::math::matrix_ops::stack;
use crate::touchstone::{parser::TouchstoneError, Touchstone};

/// An N-port network response over a frequency sweep
///
/// The scattering matrix has the same dimension at every point and the
/// point count always equals the sweep length. Port indices are 0-based
/// in this module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "NetworkRepr")]
pub struct Network {
    pub(super) frequency: Frequency,
    /// S-parameter data [nfreq, nports, nports]
    pub(super) s: Array3<Complex64>,
    /// Reference impedance (per port)
    pub(super) z0: Array1<Complex64>,
    /// Network name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) name: Option<String>,
    /// Comments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(super) comments: Vec<String>,
}

#[derive(Deserialize)]
struct NetworkRepr {
    frequency: Frequency,
    s: Array3<Complex64>,
    z0: Array1<Complex64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    comments: Vec<String>,
}

impl TryFrom<NetworkRepr> for Network {
    type Error = NetworkError;

    fn try_from(repr: NetworkRepr) -> Result<Self, Self::Error> {
        let mut ntwk = Network::new(repr.frequency, repr.s, repr.z0)?;
        ntwk.name = repr.name;
        ntwk.comments = repr.comments;
        Ok(ntwk)
    }
}

impl Network {
    /// Create a new Network from S-parameters
    pub fn new(
        frequency: Frequency,
        s: Array3<Complex64>,
        z0: Array1<Complex64>,
    ) -> Result<Self, NetworkError> {
        let (nfreq, rows, cols) = s.dim();
        if rows != cols {
            return Err(NetworkError::Shape(format!(
                "S-matrix is {}x{}, expected square",
                rows, cols
            )));
        }
        if rows == 0 {
            return Err(NetworkError::Shape("a network needs at least one port".into()));
        }
        if nfreq != frequency.npoints() {
            return Err(NetworkError::Shape(format!(
                "{} S-matrices for a sweep of {} points",
                nfreq,
                frequency.npoints()
            )));
        }
        if z0.len() != rows {
            return Err(NetworkError::PortMismatch {
                context: "reference impedance",
                expected: rows,
                found: z0.len(),
            });
        }

        Ok(Self {
            frequency,
            s,
            z0,
            name: None,
            comments: Vec::new(),
        })
    }

    /// Build a network point by point with the default reference impedance.
    ///
    /// The closure receives the point index and its frequency in Hz.
    pub fn from_fn<F>(frequency: Frequency, nports: usize, mut f: F) -> Result<Self, NetworkError>
    where
        F: FnMut(usize, f64) -> Array2<Complex64>,
    {
        let matrices: Vec<Array2<Complex64>> = frequency
            .f()
            .iter()
            .enumerate()
            .map(|(i, &hz)| f(i, hz))
            .collect();
        let s = stack(&matrices, nports)?;
        Self::new(frequency, s, default_z0(nports))
    }

    /// The same S-matrix at every frequency point.
    pub fn constant(frequency: Frequency, m: &Array2<Complex64>) -> Result<Self, NetworkError> {
        let nports = m.nrows();
        Self::from_fn(frequency, nports, |_, _| m.clone())
    }

    /// A 1-port with a constant reflection coefficient.
    pub fn one_port(frequency: Frequency, gamma: Complex64) -> Self {
        let nfreq = frequency.npoints();
        Self {
            frequency,
            s: Array3::from_elem((nfreq, 1, 1), gamma),
            z0: default_z0(1),
            name: None,
            comments: Vec::new(),
        }
    }

    /// An ideal matched, lossless through.
    pub fn thru(frequency: Frequency) -> Self {
        let nfreq = frequency.npoints();
        let mut s = Array3::<Complex64>::zeros((nfreq, 2, 2));
        for f in 0..nfreq {
            s[[f, 0, 1]] = Complex64::new(1.0, 0.0);
            s[[f, 1, 0]] = Complex64::new(1.0, 0.0);
        }
        Self {
            frequency,
            s,
            z0: default_z0(2),
            name: None,
            comments: Vec::new(),
        }
    }

    /// Wrap S-data that was shaped from `frequency` itself.
    pub(crate) fn from_sweep_s(frequency: Frequency, s: Array3<Complex64>) -> Self {
        debug_assert_eq!(s.shape()[0], frequency.npoints());
        debug_assert_eq!(s.shape()[1], s.shape()[2]);
        let nports = s.shape()[1];
        Self {
            frequency,
            s,
            z0: default_z0(nports),
            name: None,
            comments: Vec::new(),
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach comment lines, written as `!` lines in Touchstone output
    pub fn with_comments(mut self, comments: Vec<String>) -> Self {
        self.comments = comments;
        self
    }

    /// Create from a Touchstone file
    pub fn from_touchstone<P: AsRef<Path>>(path: P) -> Result<Self, TouchstoneError> {
        let ts = Touchstone::from_file(path)?;
        Self::from_touchstone_data(ts)
    }

    /// Create from Touchstone content string
    ///
    /// # Arguments
    /// * `content` - Touchstone file content as string
    /// * `nports` - Number of ports (normally taken from the `.sNp` extension)
    pub fn from_touchstone_content(content: &str, nports: usize) -> Result<Self, TouchstoneError> {
        let ts = Touchstone::from_str(content, nports)?;
        Self::from_touchstone_data(ts)
    }

    fn from_touchstone_data(ts: Touchstone) -> Result<Self, TouchstoneError> {
        let nfreq = ts.nfreq();
        let nports = ts.nports;

        let s = Array3::from_shape_fn((nfreq, nports, nports), |(f, i, j)| ts.s[f][i][j]);
        let z0 = Array1::from_vec(ts.z0.iter().map(|&x| Complex64::new(x, 0.0)).collect());

        let ntwk = Network::new(ts.frequency, s, z0)?;
        Ok(ntwk.with_comments(ts.comments))
    }

    /// Get the number of ports
    #[inline]
    pub fn nports(&self) -> usize {
        self.s.shape()[1]
    }

    /// Get the number of frequency points
    #[inline]
    pub fn nfreq(&self) -> usize {
        self.s.shape()[0]
    }
}

pub(crate) fn default_z0(nports: usize) -> Array1<Complex64> {
    Array1::from_elem(nports, Complex64::new(DEFAULT_Z0, 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frequency::{FrequencyUnit, SweepType};

    fn sweep(n: usize) -> Frequency {
        Frequency::new(1.0, 10.0, n, FrequencyUnit::GHz, SweepType::Linear).unwrap()
    }

    #[test]
    fn test_network_creation() {
        let s = Array3::<Complex64>::zeros((10, 2, 2));
        let z0 = Array1::from_elem(2, Complex64::new(50.0, 0.0));
        let ntwk = Network::new(sweep(10), s, z0).unwrap();

        assert_eq!(ntwk.nports(), 2);
        assert_eq!(ntwk.nfreq(), 10);
        assert_eq!(ntwk.z0()[0].re, 50.0);
    }

    #[test]
    fn test_network_rejects_bad_shapes() {
        let z0 = Array1::from_elem(2, Complex64::new(50.0, 0.0));
        let err = Network::new(sweep(3), Array3::zeros((4, 2, 2)), z0.clone()).unwrap_err();
        assert!(matches!(err, NetworkError::Shape(_)));

        let err = Network::new(sweep(3), Array3::zeros((3, 3, 3)), z0).unwrap_err();
        assert!(matches!(err, NetworkError::PortMismatch { expected: 3, found: 2, .. }));
    }

    #[test]
    fn test_from_fn_sees_frequency() {
        let ntwk = Network::from_fn(sweep(2), 1, |_, hz| {
            Array2::from_elem((1, 1), Complex64::new(hz / 1e10, 0.0))
        })
        .unwrap();
        assert_eq!(ntwk.s()[[0, 0, 0]].re, 0.1);
        assert_eq!(ntwk.s()[[1, 0, 0]].re, 1.0);
    }

    #[test]
    fn test_json_roundtrip_validates() {
        let ntwk = Network::thru(sweep(2)).with_name("thru");
        let json = serde_json::to_string(&ntwk).unwrap();
        let back: Network = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ntwk);
        assert_eq!(back.name(), Some("thru"));

        // three sweep points but only two S-matrices
        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["frequency"] = serde_json::to_value(sweep(3)).unwrap();
        assert!(serde_json::from_value::<Network>(value).is_err());
    }
}
