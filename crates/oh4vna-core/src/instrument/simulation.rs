//! Simulated network analyzer
//!
//! The simulator measures whatever [`Device`] is attached to its
//! [`DeviceSlot`] and passes the actual response through a known error
//! model, so calibration and correction can be exercised end to end.
//! Ports with nothing attached see an open.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ndarray::{Array2, Array3};
use num_complex::Complex64;
use parking_lot::Mutex;
use tracing::debug;

use super::{
    trace_ports, CancelToken, Instrument, InstrumentInfo, InstrumentMode, PortPair, SweepConfig,
};
use crate::calibration::{
    CalibrationKit, OnePortTerms, RawTrace, StandardDefinition, StandardKind, StandardSlot,
    TwoPortTerms,
};
use crate::coupler::CouplerModel;
use crate::error::{
    CalibrationError, FrequencyPoint, InstrumentError, MeasurementError, NetworkError,
};
use crate::frequency::Frequency;
use crate::math::transforms::Tolerance;
use crate::measurement::StandardPrompt;
use crate::network::Network;

/// What is physically connected to the simulated ports
#[derive(Debug, Clone, PartialEq)]
pub enum Device {
    /// The same S-matrix at every point; `ports[i]` is the instrument port
    /// wired to device port `i`
    Constant { s: Array2<Complex64>, ports: Vec<usize> },
    /// Tabulated response that must cover the configured sweep exactly
    Network { network: Network, ports: Vec<usize> },
    /// A kit standard placed for one calibration step
    Standard { definition: StandardDefinition, slot: StandardSlot },
    /// The coupler with a load on its input; instrument ports 1 and 2 see
    /// the coupler's through and coupled ports
    CouplerFixture { coupler: CouplerModel, load: Complex64 },
}

impl Device {
    fn ports(&self) -> Vec<usize> {
        match self {
            Device::Constant { ports, .. } | Device::Network { ports, .. } => ports.clone(),
            Device::Standard { slot, .. } => slot.ports(),
            Device::CouplerFixture { .. } => vec![1, 2],
        }
    }

    /// Device S-matrices over `sweep`, ports in `self.ports()` order
    fn response(
        &self,
        sweep: &Frequency,
        tol: Tolerance,
    ) -> Result<Array3<Complex64>, InstrumentError> {
        match self {
            Device::Constant { s, .. } => Ok(Network::constant(sweep.clone(), s)?.s().clone()),
            Device::Network { network, .. } => {
                network.frequency().ensure_compatible(sweep)?;
                Ok(network.s().clone())
            }
            Device::Standard { definition, slot } => {
                let n = slot.ports().len();
                let mut out = Array3::<Complex64>::zeros((sweep.npoints(), n, n));
                for (f, &hz) in sweep.f().iter().enumerate() {
                    let point = FrequencyPoint { index: f, hz };
                    let s = definition.s_at(*slot, point).map_err(|e| {
                        InstrumentError::Protocol(format!("cannot simulate {}: {}", slot, e))
                    })?;
                    if matches!(slot, StandardSlot::Isolation(..)) {
                        // loads on both ports, no path between them
                        out[[f, 0, 0]] = s[[0, 0]];
                        out[[f, 1, 1]] = s[[0, 0]];
                    } else {
                        out.slice_mut(ndarray::s![f, .., ..]).assign(&s);
                    }
                }
                Ok(out)
            }
            Device::CouplerFixture { coupler, load } => {
                let load = Network::one_port(sweep.clone(), *load);
                Ok(coupler.terminated_two_port(sweep, &load, tol)?.s().clone())
            }
        }
    }
}

/// Shared handle to the device attached to a simulator
///
/// Clones refer to the same slot, so a test or an operator prompt can swap
/// devices while the simulator is owned by an instrument context.
#[derive(Debug, Clone, Default)]
pub struct DeviceSlot(Arc<Mutex<Option<Device>>>);

impl DeviceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, device: Device) {
        *self.0.lock() = Some(device);
    }

    pub fn clear(&self) {
        *self.0.lock() = None;
    }

    pub fn current(&self) -> Option<Device> {
        self.0.lock().clone()
    }
}

/// Systematic errors the simulator applies, constant over frequency
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulatedErrorModel {
    reflectometers: BTreeMap<usize, OnePortTerms>,
    pairs: BTreeMap<(usize, usize), TwoPortTerms>,
}

impl SimulatedErrorModel {
    /// No systematic error
    pub fn ideal() -> Self {
        Self::default()
    }

    pub fn with_port(mut self, port: usize, terms: OnePortTerms) -> Self {
        self.reflectometers.insert(port, terms);
        self
    }

    /// Full 12-term model between `port_a` (forward source) and `port_b`
    pub fn with_pair(mut self, port_a: usize, port_b: usize, terms: TwoPortTerms) -> Self {
        self.pairs.insert((port_a, port_b), terms);
        self
    }

    /// Raw S-matrix for an actual one whose rows are instrument `ports`
    pub fn distort(
        &self,
        actual: &Array2<Complex64>,
        ports: &[usize],
        tol: Tolerance,
    ) -> Result<Array2<Complex64>, NetworkError> {
        let mut raw = actual.clone();
        let mut done = vec![false; ports.len()];
        let index = |p: usize| ports.iter().position(|&q| q == p);

        for (&(a, b), terms) in &self.pairs {
            if let (Some(i), Some(j)) = (index(a), index(b)) {
                let block = ndarray::arr2(&[
                    [actual[[i, i]], actual[[i, j]]],
                    [actual[[j, i]], actual[[j, j]]],
                ]);
                let m = terms.distort(&block, tol)?;
                raw[[i, i]] = m[[0, 0]];
                raw[[i, j]] = m[[0, 1]];
                raw[[j, i]] = m[[1, 0]];
                raw[[j, j]] = m[[1, 1]];
                done[i] = true;
                done[j] = true;
            }
        }
        for (i, &p) in ports.iter().enumerate() {
            if done[i] {
                continue;
            }
            let terms = self
                .reflectometers
                .get(&p)
                .copied()
                .or_else(|| {
                    self.pairs.iter().find_map(|(&(a, b), t)| {
                        if a == p {
                            Some(t.forward.one_port())
                        } else if b == p {
                            Some(t.reverse.one_port())
                        } else {
                            None
                        }
                    })
                });
            if let Some(t) = terms {
                raw[[i, i]] = t.distort(actual[[i, i]], tol)?;
            }
        }
        Ok(raw)
    }
}

/// Software stand-in for a two-port analyzer
#[derive(Debug)]
pub struct SimulatedVna {
    connected: bool,
    port_count: usize,
    config: Option<SweepConfig>,
    errors: SimulatedErrorModel,
    device: DeviceSlot,
    dwell: Duration,
    tolerance: Tolerance,
}

impl Default for SimulatedVna {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedVna {
    pub fn new() -> Self {
        Self {
            connected: false,
            port_count: 2,
            config: None,
            errors: SimulatedErrorModel::ideal(),
            device: DeviceSlot::new(),
            dwell: Duration::ZERO,
            tolerance: Tolerance::default(),
        }
    }

    pub fn with_ports(mut self, port_count: usize) -> Self {
        self.port_count = port_count;
        self
    }

    pub fn with_error_model(mut self, errors: SimulatedErrorModel) -> Self {
        self.errors = errors;
        self
    }

    /// Time spent per frequency point
    pub fn with_dwell(mut self, dwell: Duration) -> Self {
        self.dwell = dwell;
        self
    }

    pub fn with_device_slot(mut self, device: DeviceSlot) -> Self {
        self.device = device;
        self
    }

    /// Handle for attaching devices after the simulator is handed off
    pub fn device_slot(&self) -> DeviceSlot {
        self.device.clone()
    }

    /// Actual S-matrices over `ports`, open wherever nothing is wired
    fn actual_response(
        &self,
        sweep: &Frequency,
        ports: &[usize],
    ) -> Result<Array3<Complex64>, InstrumentError> {
        let n = ports.len();
        let mut s = Array3::<Complex64>::zeros((sweep.npoints(), n, n));
        for i in 0..n {
            s.slice_mut(ndarray::s![.., i, i]).fill(Complex64::new(1.0, 0.0));
        }

        if let Some(device) = self.device.current() {
            let dev_ports = device.ports();
            let response = device.response(sweep, self.tolerance)?;
            let index = |p: &usize| ports.iter().position(|q| q == p);
            for (di, dp) in dev_ports.iter().enumerate() {
                for (dj, dq) in dev_ports.iter().enumerate() {
                    let (Some(i), Some(j)) = (index(dp), index(dq)) else {
                        continue;
                    };
                    s.slice_mut(ndarray::s![.., i, j])
                        .assign(&response.slice(ndarray::s![.., di, dj]));
                }
            }
        }
        Ok(s)
    }
}

impl Instrument for SimulatedVna {
    fn connect(&mut self) -> Result<(), InstrumentError> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn info(&self) -> Result<InstrumentInfo, InstrumentError> {
        if !self.connected {
            return Err(InstrumentError::NotConnected);
        }
        Ok(InstrumentInfo {
            manufacturer: "Simulated".into(),
            model: "VNA-SIM".into(),
            serial: "SIM123456".into(),
            firmware: env!("CARGO_PKG_VERSION").into(),
            ports: self.port_count,
            address: Some("SIMULATION".into()),
        })
    }

    fn port_count(&self) -> usize {
        self.port_count
    }

    fn mode(&self) -> InstrumentMode {
        InstrumentMode::Simulated
    }

    fn preset(&mut self) -> Result<(), InstrumentError> {
        if !self.connected {
            return Err(InstrumentError::NotConnected);
        }
        self.config = None;
        self.device.clear();
        Ok(())
    }

    fn configure_sweep(&mut self, config: &SweepConfig) -> Result<(), InstrumentError> {
        if !self.connected {
            return Err(InstrumentError::NotConnected);
        }
        self.config = Some(config.clone());
        Ok(())
    }

    fn trigger_sweep(
        &mut self,
        pairs: &[PortPair],
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<RawTrace, InstrumentError> {
        if !self.connected {
            return Err(InstrumentError::NotConnected);
        }
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| InstrumentError::Protocol("sweep not configured".into()))?;
        let ports = trace_ports(pairs, self.port_count)?;
        let sweep = &config.frequency;
        let actual = self.actual_response(sweep, &ports)?;

        let started = Instant::now();
        let total = sweep.npoints();
        let mut raw = Array3::<Complex64>::zeros((total, ports.len(), ports.len()));
        for f in 0..total {
            if cancel.is_cancelled() {
                debug!(completed = f, total, "simulated sweep cancelled");
                return Err(InstrumentError::Cancelled { completed: f, total });
            }
            if started.elapsed() > timeout {
                return Err(InstrumentError::Timeout {
                    timeout_ms: timeout.as_millis(),
                });
            }
            if !self.dwell.is_zero() {
                thread::sleep(self.dwell);
            }

            let point = actual.slice(ndarray::s![f, .., ..]).to_owned();
            let m = self
                .errors
                .distort(&point, &ports, self.tolerance)
                .map_err(|e| InstrumentError::from(e.at(f, sweep.f()[f])))?;
            for pair in pairs {
                let i = ports.iter().position(|&p| p == pair.receiver);
                let j = ports.iter().position(|&p| p == pair.source);
                if let (Some(i), Some(j)) = (i, j) {
                    raw[[f, i, j]] = m[[i, j]];
                }
            }
        }
        if started.elapsed() > timeout {
            return Err(InstrumentError::Timeout {
                timeout_ms: timeout.as_millis(),
            });
        }

        let network = Network::from_sweep_s(sweep.clone(), raw).with_name("Simulated Measurement");
        Ok(RawTrace::new(network, ports)?)
    }
}

/// Operator stand-in that places kit standards on the simulator
#[derive(Debug, Clone)]
pub struct StandardFixtures {
    device: DeviceSlot,
    kit: CalibrationKit,
}

impl StandardFixtures {
    pub fn new(device: DeviceSlot, kit: CalibrationKit) -> Self {
        Self { device, kit }
    }
}

impl StandardPrompt for StandardFixtures {
    fn present(&mut self, slot: StandardSlot) -> Result<(), MeasurementError> {
        let kind = slot.kind().unwrap_or(StandardKind::Load);
        let definition = self
            .kit
            .standard(kind)
            .cloned()
            .ok_or_else(|| CalibrationError::UnknownStandard {
                kit: self.kit.id().to_string(),
                kind,
            })?;
        debug!(%slot, "placing standard on simulator");
        self.device.attach(Device::Standard { definition, slot });
        Ok(())
    }
}
