//! SCPI driver for R&S ZVA/ZNB analyzers
//!
//! The driver only speaks SCPI text; the transport that carries it (VISA,
//! raw socket, GPIB) is injected by the caller.

use std::thread;
use std::time::{Duration, Instant};

use ndarray::Array3;
use num_complex::Complex64;
use tracing::{debug, info};

use super::{
    trace_ports, CancelToken, Instrument, InstrumentInfo, InstrumentMode, PortPair, SweepConfig,
};
use crate::calibration::RawTrace;
use crate::error::InstrumentError;
use crate::frequency::{Frequency, SweepType};
use crate::network::Network;

/// Bit 4 of the operation condition register: sweep in progress
const MEASURING_BIT: u32 = 1 << 4;

/// Maximum deviation between configured and reported frequency points
const FREQUENCY_RESOLUTION_HZ: f64 = 1.0;

/// Line-oriented SCPI transport
pub trait ScpiTransport: Send {
    fn write(&mut self, command: &str) -> Result<(), InstrumentError>;

    fn query(&mut self, command: &str) -> Result<String, InstrumentError>;

    fn close(&mut self) {}
}

/// Analyzer driven through SCPI commands
#[derive(Debug)]
pub struct ScpiVna<T> {
    transport: T,
    address: String,
    idn: Option<Vec<String>>,
    port_count: usize,
    sweep: Option<Frequency>,
    poll_interval: Duration,
}

impl<T: ScpiTransport> ScpiVna<T> {
    pub fn new(transport: T, address: impl Into<String>) -> Self {
        Self {
            transport,
            address: address.into(),
            idn: None,
            port_count: 2,
            sweep: None,
            poll_interval: Duration::from_millis(100),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn ensure_connected(&self) -> Result<(), InstrumentError> {
        if self.idn.is_some() {
            Ok(())
        } else {
            Err(InstrumentError::NotConnected)
        }
    }

    fn query_port_count(&mut self) -> usize {
        match self.transport.query("SYST:CONF:PORT?") {
            Ok(reply) => match reply.trim().parse::<f64>() {
                Ok(n) if n >= 1.0 => n as usize,
                _ => 2,
            },
            Err(e) => {
                debug!(error = %e, "port count query failed, assuming 2 ports");
                2
            }
        }
    }

    fn query_values(&mut self, command: &str) -> Result<Vec<f64>, InstrumentError> {
        let reply = self.transport.query(command)?;
        reply
            .trim()
            .split(',')
            .map(|v| {
                v.trim().parse::<f64>().map_err(|_| {
                    InstrumentError::Protocol(format!("{}: cannot parse {:?}", command, v))
                })
            })
            .collect()
    }

    fn opc(&mut self) -> Result<(), InstrumentError> {
        self.transport.query("*OPC?").map(|_| ())
    }

    /// Poll the operation register until the sweep finishes
    fn wait_for_sweep(
        &mut self,
        timeout: Duration,
        cancel: &CancelToken,
        total: usize,
    ) -> Result<(), InstrumentError> {
        let started = Instant::now();
        loop {
            if cancel.is_cancelled() {
                self.transport.write("ABOR")?;
                return Err(InstrumentError::Cancelled { completed: 0, total });
            }
            let status = self.transport.query("STAT:OPER:COND?")?;
            let status: u32 = status.trim().parse().map_err(|_| {
                InstrumentError::Protocol(format!("bad operation status {:?}", status))
            })?;
            if status & MEASURING_BIT == 0 {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                self.transport.write("ABOR")?;
                return Err(InstrumentError::Timeout {
                    timeout_ms: timeout.as_millis(),
                });
            }
            thread::sleep(self.poll_interval);
        }
    }

    /// Reported stimulus must agree with the configured sweep
    fn check_frequency(&mut self, sweep: &Frequency) -> Result<(), InstrumentError> {
        let reported = self.query_values("FREQ:DATA?")?;
        if reported.len() != sweep.npoints() {
            return Err(InstrumentError::Protocol(format!(
                "instrument reports {} points, {} configured",
                reported.len(),
                sweep.npoints()
            )));
        }
        if let Some((i, (a, b))) = reported
            .iter()
            .zip(sweep.f())
            .enumerate()
            .find(|(_, (a, b))| (*a - *b).abs() > FREQUENCY_RESOLUTION_HZ)
        {
            return Err(InstrumentError::Protocol(format!(
                "instrument point {} is {} Hz, configured {} Hz",
                i, a, b
            )));
        }
        Ok(())
    }
}

impl<T: ScpiTransport> Instrument for ScpiVna<T> {
    fn connect(&mut self) -> Result<(), InstrumentError> {
        let idn = self.transport.query("*IDN?")?;
        let idn = idn.trim();
        if !idn.contains("ZVA") && !idn.contains("ZNB") {
            self.transport.close();
            return Err(InstrumentError::Protocol(format!(
                "not a supported R&S analyzer: {}",
                idn
            )));
        }
        self.idn = Some(idn.split(',').map(|s| s.trim().to_string()).collect());
        self.port_count = self.query_port_count();
        info!(address = %self.address, idn, ports = self.port_count, "connected to analyzer");
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.idn.take().is_some() {
            self.transport.close();
            info!(address = %self.address, "disconnected from analyzer");
        }
    }

    fn is_connected(&self) -> bool {
        self.idn.is_some()
    }

    fn info(&self) -> Result<InstrumentInfo, InstrumentError> {
        let idn = self.idn.as_ref().ok_or(InstrumentError::NotConnected)?;
        let field = |i: usize| idn.get(i).cloned().unwrap_or_else(|| "Unknown".to_string());
        Ok(InstrumentInfo {
            manufacturer: field(0),
            model: field(1),
            serial: field(2),
            firmware: field(3),
            ports: self.port_count,
            address: Some(self.address.clone()),
        })
    }

    fn port_count(&self) -> usize {
        self.port_count
    }

    fn mode(&self) -> InstrumentMode {
        InstrumentMode::Hardware
    }

    fn preset(&mut self) -> Result<(), InstrumentError> {
        self.ensure_connected()?;
        self.transport.write("*RST")?;
        self.transport.write("*CLS")?;
        self.opc()?;
        self.sweep = None;
        Ok(())
    }

    fn configure_sweep(&mut self, config: &SweepConfig) -> Result<(), InstrumentError> {
        self.ensure_connected()?;
        let sweep = &config.frequency;
        if sweep.sweep_type() != SweepType::Linear {
            return Err(InstrumentError::Protocol(format!(
                "{:?} sweeps are not supported, use a linear sweep",
                sweep.sweep_type()
            )));
        }
        self.transport.write("SWE:TYPE LIN")?;
        self.transport.write(&format!("FREQ:STAR {}", sweep.start()))?;
        self.transport.write(&format!("FREQ:STOP {}", sweep.stop()))?;
        self.transport.write(&format!("SWE:POIN {}", sweep.npoints()))?;
        self.transport.write(&format!("BAND {}", config.if_bandwidth_hz))?;
        self.transport.write(&format!("SOUR:POW {}", config.power_dbm))?;
        self.opc()?;
        self.sweep = Some(sweep.clone());
        debug!(
            points = sweep.npoints(),
            start = sweep.start(),
            stop = sweep.stop(),
            "sweep configured"
        );
        Ok(())
    }

    fn trigger_sweep(
        &mut self,
        pairs: &[PortPair],
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<RawTrace, InstrumentError> {
        self.ensure_connected()?;
        let sweep = self
            .sweep
            .clone()
            .ok_or_else(|| InstrumentError::Protocol("sweep not configured".into()))?;
        let ports = trace_ports(pairs, self.port_count)?;
        let total = sweep.npoints();

        self.transport.write("CALC:PAR:DEL:ALL")?;
        for pair in pairs {
            self.transport
                .write(&format!("CALC:PAR:SDEF 'Trc_{}', '{}'", pair, pair))?;
        }
        self.transport.write("INIT:CONT OFF")?;
        self.transport.write("INIT:IMM")?;
        self.wait_for_sweep(timeout, cancel, total)?;
        self.check_frequency(&sweep)?;

        let mut s = Array3::<Complex64>::zeros((total, ports.len(), ports.len()));
        for pair in pairs {
            self.transport.write(&format!("CALC:PAR:SEL 'Trc_{}'", pair))?;
            let values = self.query_values("CALC:DATA? SDAT")?;
            if values.len() != 2 * total {
                return Err(InstrumentError::Protocol(format!(
                    "{}: expected {} values, got {}",
                    pair,
                    2 * total,
                    values.len()
                )));
            }
            let i = ports.iter().position(|&p| p == pair.receiver).unwrap_or(0);
            let j = ports.iter().position(|&p| p == pair.source).unwrap_or(0);
            for (f, re_im) in values.chunks_exact(2).enumerate() {
                s[[f, i, j]] = Complex64::new(re_im[0], re_im[1]);
            }
        }

        let network = Network::from_sweep_s(sweep, s).with_name("ZVA Measurement");
        Ok(RawTrace::new(network, ports)?)
    }
}
