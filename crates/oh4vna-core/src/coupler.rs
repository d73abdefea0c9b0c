//! Analytical OH4VNA three-port coupler
//!
//! Port 1 is the input, port 2 the through output and port 3 the coupled
//! output. All ports share the same reflection, whose phase ramps from 0 to
//! pi/6 across the sweep. Leakage from the through port into the coupled
//! port sits `directivity_db` below the coupled signal, so a coupler without
//! coupling is perfectly isolated.

use std::f64::consts::PI;

use ndarray::{Array1, Array3};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::calibration::RawTrace;
use crate::error::NetworkError;
use crate::frequency::Frequency;
use crate::math::conversions::{db_2_mag, return_loss_2_mag};
use crate::math::transforms::Tolerance;
use crate::network::{embed_three_port, terminate, Network};

/// Fixed coupler description, in dB
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CouplerModel {
    pub return_loss_db: f64,
    pub insertion_loss_db: f64,
    /// `inf` disables the coupled port entirely
    pub coupling_db: f64,
    pub directivity_db: f64,
    /// Instrument port (1 or 2) wired to the coupler's through port
    pub injection_port: usize,
}

impl Default for CouplerModel {
    fn default() -> Self {
        Self {
            return_loss_db: 26.0,
            insertion_loss_db: 0.0,
            coupling_db: 20.0,
            directivity_db: 80.0,
            injection_port: 1,
        }
    }
}

impl CouplerModel {
    /// Coupler whose third port receives nothing
    pub fn isolated() -> Self {
        Self {
            coupling_db: f64::INFINITY,
            ..Self::default()
        }
    }

    /// Intrinsic three-port S-parameters over `sweep`
    pub fn three_port_network(&self, sweep: &Frequency) -> Network {
        let f = sweep.f();
        let n = f.len();
        let norm = f.last().copied().unwrap_or(1.0).max(1.0);

        let refl_mag = return_loss_2_mag(self.return_loss_db);
        let direct_mag = db_2_mag(-self.insertion_loss_db);
        let coupling_mag = db_2_mag(-self.coupling_db);
        let leakage_mag = coupling_mag * db_2_mag(-self.directivity_db);
        let ramp = Array1::linspace(0.0, PI / 6.0, n);

        let mut s = Array3::<Complex64>::zeros((n, 3, 3));
        for (i, &hz) in f.iter().enumerate() {
            let x = hz / norm;
            let reflection = Complex64::from_polar(refl_mag, if n > 1 { ramp[i] } else { 0.0 });
            let direct = Complex64::from_polar(direct_mag, -2.0 * PI * x);
            let coupled = Complex64::from_polar(coupling_mag, -PI * x);
            let leakage = Complex64::from_polar(leakage_mag, -0.25 * PI * x);

            for p in 0..3 {
                s[[i, p, p]] = reflection;
            }
            s[[i, 0, 1]] = direct;
            s[[i, 1, 0]] = direct;
            s[[i, 0, 2]] = coupled;
            s[[i, 2, 0]] = coupled;
            s[[i, 1, 2]] = leakage;
            s[[i, 2, 1]] = leakage;
        }

        Network::from_sweep_s(sweep.clone(), s).with_name("OH4VNA coupler")
    }

    /// Three-port response seen with the coupler in front of the instrument.
    ///
    /// The trace must span two instrument ports; the coupled port is
    /// numbered one past the highest of them.
    pub fn simulate_three_port_response(
        &self,
        raw: &RawTrace,
        tol: Tolerance,
    ) -> Result<RawTrace, NetworkError> {
        raw.network().ensure_nports(2, "coupler simulation input")?;
        let coupler = self.three_port_network(raw.frequency());
        let embedded = embed_three_port(raw.network(), &coupler, self.injection_port, tol)?;

        let ports = raw.ports();
        let coupled = ports.iter().copied().max().unwrap_or(2) + 1;
        RawTrace::new(embedded, vec![ports[0], ports[1], coupled])
    }

    /// Ports 2 and 3 of the coupler with port 1 terminated by `load`
    pub fn terminated_two_port(
        &self,
        sweep: &Frequency,
        load: &Network,
        tol: Tolerance,
    ) -> Result<Network, NetworkError> {
        terminate(&self.three_port_network(sweep), 0, load, tol)
    }
}
