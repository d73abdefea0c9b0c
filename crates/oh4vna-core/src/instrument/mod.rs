//! Instrument collaborator
//!
//! Hardware and simulated analyzers implement the same [`Instrument`]
//! contract. Callers reach an instrument only through an
//! [`InstrumentContext`], which allows a single sweep in flight at a time.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::calibration::RawTrace;
use crate::error::InstrumentError;
use crate::frequency::Frequency;

pub mod context;
pub mod scpi;
pub mod simulation;

pub use context::{Connection, InstrumentContext, Reservation};
pub use scpi::{ScpiTransport, ScpiVna};
pub use simulation::{Device, DeviceSlot, SimulatedErrorModel, SimulatedVna, StandardFixtures};

/// One measured S-parameter, `S[receiver][source]` with 1-based ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortPair {
    pub receiver: usize,
    pub source: usize,
}

impl PortPair {
    pub fn new(receiver: usize, source: usize) -> Self {
        Self { receiver, source }
    }

    pub fn reflection(port: usize) -> Self {
        Self::new(port, port)
    }

    /// Every pair among `ports`, i.e. the full S-matrix
    pub fn full(ports: &[usize]) -> Vec<PortPair> {
        ports
            .iter()
            .flat_map(|&r| ports.iter().map(move |&s| PortPair::new(r, s)))
            .collect()
    }
}

impl fmt::Display for PortPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}{}", self.receiver, self.source)
    }
}

/// Distinct ports touched by `pairs`, ascending.
pub(crate) fn trace_ports(
    pairs: &[PortPair],
    port_count: usize,
) -> Result<Vec<usize>, InstrumentError> {
    if pairs.is_empty() {
        return Err(InstrumentError::Ports("no S-parameters requested".into()));
    }
    let mut ports: Vec<usize> = pairs.iter().flat_map(|p| [p.receiver, p.source]).collect();
    ports.sort_unstable();
    ports.dedup();
    if let Some(&bad) = ports.iter().find(|&&p| p == 0 || p > port_count) {
        return Err(InstrumentError::Ports(format!(
            "port {} is outside 1..={}",
            bad, port_count
        )));
    }
    Ok(ports)
}

/// Hardware or simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentMode {
    Hardware,
    Simulated,
}

/// Identification of a connected instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentInfo {
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
    pub firmware: String,
    pub ports: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl fmt::Display for InstrumentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} (SN {})", self.manufacturer, self.model, self.serial)
    }
}

/// Stimulus settings for a sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    pub frequency: Frequency,
    pub if_bandwidth_hz: f64,
    pub power_dbm: f64,
}

impl SweepConfig {
    /// 1 kHz IF bandwidth at -10 dBm
    pub fn new(frequency: Frequency) -> Self {
        Self {
            frequency,
            if_bandwidth_hz: 1000.0,
            power_dbm: -10.0,
        }
    }

    pub fn with_if_bandwidth(mut self, hz: f64) -> Self {
        self.if_bandwidth_hz = hz;
        self
    }

    pub fn with_power(mut self, dbm: f64) -> Self {
        self.power_dbm = dbm;
        self
    }
}

/// Cooperative cancellation flag shared with an in-flight sweep
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Network analyzer contract
pub trait Instrument: Send {
    fn connect(&mut self) -> Result<(), InstrumentError>;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    fn info(&self) -> Result<InstrumentInfo, InstrumentError>;

    fn port_count(&self) -> usize;

    fn mode(&self) -> InstrumentMode;

    /// Return to the power-on state
    fn preset(&mut self) -> Result<(), InstrumentError>;

    fn configure_sweep(&mut self, config: &SweepConfig) -> Result<(), InstrumentError>;

    /// Run one sweep and return the requested S-parameters.
    ///
    /// The trace spans the distinct requested ports in ascending order.
    /// Entries that were not requested are zero. The sweep fails with
    /// [`InstrumentError::Timeout`] once `timeout` elapses and with
    /// [`InstrumentError::Cancelled`] when `cancel` fires; partial data is
    /// dropped in both cases.
    fn trigger_sweep(
        &mut self,
        pairs: &[PortPair],
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<RawTrace, InstrumentError>;
}
