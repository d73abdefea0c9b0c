//! Exclusive access to one instrument
//!
//! An [`InstrumentContext`] owns the driver. At most one [`Connection`] is
//! live at a time and, through it, at most one [`Reservation`]. A second
//! caller gets [`InstrumentError::Busy`] instead of queueing behind a sweep.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::{CancelToken, Instrument, InstrumentInfo, InstrumentMode, PortPair, SweepConfig};
use crate::calibration::RawTrace;
use crate::error::InstrumentError;

type Shared = Arc<Mutex<Box<dyn Instrument>>>;

/// Owner of an instrument driver
#[derive(Clone)]
pub struct InstrumentContext {
    instrument: Shared,
    connected: Arc<AtomicBool>,
}

impl fmt::Debug for InstrumentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentContext")
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl InstrumentContext {
    pub fn new(instrument: impl Instrument + 'static) -> Self {
        Self {
            instrument: Arc::new(Mutex::new(Box::new(instrument))),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Open the single connection to the instrument
    pub fn connect(&self) -> Result<Connection, InstrumentError> {
        if self
            .connected
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(InstrumentError::Busy);
        }

        let opened = {
            let mut instrument = self.instrument.lock();
            instrument
                .connect()
                .and_then(|_| instrument.info().map(|info| (info, instrument.mode())))
        };
        match opened {
            Ok((info, mode)) => {
                info!(instrument = %info, ?mode, ports = info.ports, "instrument connected");
                Ok(Connection {
                    instrument: Arc::clone(&self.instrument),
                    connected: Arc::clone(&self.connected),
                    info,
                    mode,
                })
            }
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                warn!(error = %e, "instrument connection failed");
                Err(e)
            }
        }
    }
}

/// Live connection; the instrument disconnects when this is dropped
pub struct Connection {
    instrument: Shared,
    connected: Arc<AtomicBool>,
    info: InstrumentInfo,
    mode: InstrumentMode,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("info", &self.info)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn info(&self) -> &InstrumentInfo {
        &self.info
    }

    pub fn mode(&self) -> InstrumentMode {
        self.mode
    }

    pub fn port_count(&self) -> usize {
        self.info.ports
    }

    /// Take the instrument for a sequence of commands
    pub fn reserve(&self) -> Result<Reservation<'_>, InstrumentError> {
        self.instrument
            .try_lock()
            .map(|guard| Reservation { guard })
            .ok_or(InstrumentError::Busy)
    }

    /// Configure and run one sweep under a single reservation
    pub fn sweep(
        &self,
        config: &SweepConfig,
        pairs: &[PortPair],
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<RawTrace, InstrumentError> {
        let mut instrument = self.reserve()?;
        instrument.configure_sweep(config)?;
        debug!(points = config.frequency.npoints(), pairs = pairs.len(), "sweep started");
        instrument.trigger_sweep(pairs, timeout, cancel)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.instrument.lock().disconnect();
        self.connected.store(false, Ordering::SeqCst);
        info!(instrument = %self.info, "instrument disconnected");
    }
}

/// Exclusive hold on the instrument
pub struct Reservation<'a> {
    guard: MutexGuard<'a, Box<dyn Instrument>>,
}

impl Deref for Reservation<'_> {
    type Target = dyn Instrument;

    fn deref(&self) -> &Self::Target {
        &**self.guard
    }
}

impl DerefMut for Reservation<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frequency::{Frequency, FrequencyUnit};
    use crate::instrument::SimulatedVna;

    fn config() -> SweepConfig {
        SweepConfig::new(Frequency::from_f(vec![1.0, 2.0, 3.0], FrequencyUnit::GHz).unwrap())
    }

    fn reflection() -> [PortPair; 1] {
        [PortPair::reflection(1)]
    }

    #[test]
    fn test_second_connection_is_busy() {
        let ctx = InstrumentContext::new(SimulatedVna::new());
        let conn = ctx.connect().unwrap();
        assert_eq!(conn.info().model, "VNA-SIM");
        assert_eq!(conn.mode(), InstrumentMode::Simulated);
        assert!(matches!(ctx.connect(), Err(InstrumentError::Busy)));

        drop(conn);
        assert!(!ctx.is_connected());
        assert!(ctx.connect().is_ok());
    }

    #[test]
    fn test_sweep_while_reserved_is_busy() {
        let ctx = InstrumentContext::new(SimulatedVna::new());
        let conn = ctx.connect().unwrap();
        let held = conn.reserve().unwrap();
        let err = conn
            .sweep(&config(), &reflection(), Duration::from_secs(1), &CancelToken::new())
            .unwrap_err();
        assert_eq!(err, InstrumentError::Busy);

        drop(held);
        let trace = conn
            .sweep(&config(), &reflection(), Duration::from_secs(1), &CancelToken::new())
            .unwrap();
        assert_eq!(trace.ports(), &[1]);
    }

    #[test]
    fn test_slow_sweep_times_out() {
        let ctx = InstrumentContext::new(SimulatedVna::new().with_dwell(Duration::from_millis(20)));
        let conn = ctx.connect().unwrap();
        let err = conn
            .sweep(&config(), &reflection(), Duration::from_millis(5), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, InstrumentError::Timeout { timeout_ms: 5 }));
    }

    #[test]
    fn test_cancelled_sweep_reports_progress() {
        let ctx = InstrumentContext::new(SimulatedVna::new());
        let conn = ctx.connect().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = conn
            .sweep(&config(), &[PortPair::reflection(1)], Duration::from_secs(1), &cancel)
            .unwrap_err();
        assert_eq!(err, InstrumentError::Cancelled { completed: 0, total: 3 });
    }
}
