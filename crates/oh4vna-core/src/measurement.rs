//! Measurement Orchestrator
//!
//! Sequences calibration acquisition and device measurements around an
//! instrument [`Connection`]. A measurement passes through a fixed pipeline:
//!
//! 1. plan the port pairs to sweep,
//! 2. resolve the calibration record when correction is requested,
//! 3. acquire the raw trace (busy/timeout retried within [`RetryPolicy`]),
//! 4. route through the coupler model (simulation, three-port requests),
//! 5. apply correction,
//! 6. store the result with its metadata.
//!
//! Each stage consumes the previous one, so a sweep cannot be taken before
//! the calibration lookup has happened.

use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::calibration::{
    CalibrationEngine, CalibrationKit, CalibrationMethod, CalibrationRecord, CorrectedTrace, KitRef,
    RawTrace, StandardMeasurements, StandardSlot,
};
use crate::config::Settings;
use crate::coupler::CouplerModel;
use crate::error::{CalibrationError, InstrumentError, MeasurementError, PersistenceError};
use crate::instrument::{CancelToken, Connection, InstrumentMode, PortPair, SweepConfig};
use crate::network::Network;
use crate::persistence::{MeasurementMetadata, Repository, StoredMeasurement};

/// Hook that gets a standard onto the instrument before it is swept.
///
/// An operator prompt blocks until the standard is connected; a simulation
/// attaches the standard to the simulated device.
pub trait StandardPrompt {
    fn present(&mut self, slot: StandardSlot) -> Result<(), MeasurementError>;
}

impl<F> StandardPrompt for F
where
    F: FnMut(StandardSlot) -> Result<(), MeasurementError>,
{
    fn present(&mut self, slot: StandardSlot) -> Result<(), MeasurementError> {
        self(slot)
    }
}

/// Bounded retry of busy/timeout sweep failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first, at least 1
    pub max_attempts: u32,
    /// Delay before the second attempt, growing linearly
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_millis(250))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// A single attempt
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn run<T, F>(&self, what: &str, mut op: F) -> Result<T, InstrumentError>
    where
        F: FnMut() -> Result<T, InstrumentError>,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(what, attempt, max = self.max_attempts, error = %e, "retrying");
                    thread::sleep(self.backoff * attempt);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Which calibration a measurement is corrected with
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Correction {
    #[default]
    None,
    /// A specific stored record
    Record(Uuid),
    /// The newest unexpired record for the sweep and this kit
    Active(KitRef),
}

/// What to measure
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRequest {
    pub sweep: SweepConfig,
    /// 1-based instrument ports; the full S-matrix among them is swept
    pub ports: Vec<usize>,
    /// Report the coupler's third port as well
    pub three_port: bool,
    pub correction: Correction,
    pub notes: Option<String>,
    pub tags: Vec<String>,
}

impl MeasurementRequest {
    pub fn new(sweep: SweepConfig, ports: Vec<usize>) -> Self {
        Self {
            sweep,
            ports,
            three_port: false,
            correction: Correction::None,
            notes: None,
            tags: Vec::new(),
        }
    }

    pub fn with_three_port(mut self) -> Self {
        self.three_port = true;
        self
    }

    pub fn with_correction(mut self, correction: Correction) -> Self {
        self.correction = correction;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }
}

/// Trace produced by a measurement
#[derive(Debug, Clone, PartialEq)]
pub enum MeasuredTrace {
    Raw(RawTrace),
    Corrected(CorrectedTrace),
}

impl MeasuredTrace {
    pub fn network(&self) -> &Network {
        match self {
            MeasuredTrace::Raw(t) => t.network(),
            MeasuredTrace::Corrected(t) => t.network(),
        }
    }

    pub fn ports(&self) -> &[usize] {
        match self {
            MeasuredTrace::Raw(t) => t.ports(),
            MeasuredTrace::Corrected(t) => t.ports(),
        }
    }

    pub fn is_corrected(&self) -> bool {
        matches!(self, MeasuredTrace::Corrected(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementOutcome {
    pub metadata: MeasurementMetadata,
    pub trace: MeasuredTrace,
}

struct Planned<'r> {
    request: &'r MeasurementRequest,
    pairs: Vec<PortPair>,
}

struct Resolved<'r> {
    plan: Planned<'r>,
    record: Option<CalibrationRecord>,
}

struct Acquired<'r> {
    resolved: Resolved<'r>,
    raw: RawTrace,
}

/// Runs calibrations and measurements against one repository
#[derive(Debug)]
pub struct MeasurementOrchestrator<R: Repository> {
    repository: R,
    engine: CalibrationEngine,
    retry: RetryPolicy,
    sweep_timeout: Duration,
    coupler: CouplerModel,
    measure_isolation: bool,
}

impl<R: Repository> MeasurementOrchestrator<R> {
    pub fn new(repository: R) -> Self {
        Self {
            repository,
            engine: CalibrationEngine::default(),
            retry: RetryPolicy::default(),
            sweep_timeout: Duration::from_secs(30),
            coupler: CouplerModel::default(),
            measure_isolation: false,
        }
    }

    pub fn from_settings(repository: R, settings: &Settings) -> Self {
        Self::new(repository)
            .with_engine(settings.engine())
            .with_retry(settings.retry_policy())
            .with_sweep_timeout(settings.sweep_timeout())
            .with_coupler(settings.coupler)
    }

    pub fn with_engine(mut self, engine: CalibrationEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sweep_timeout(mut self, timeout: Duration) -> Self {
        self.sweep_timeout = timeout;
        self
    }

    pub fn with_coupler(mut self, coupler: CouplerModel) -> Self {
        self.coupler = coupler;
        self
    }

    /// Also sweep the optional isolation slots of two-port methods
    pub fn with_isolation(mut self, measure: bool) -> Self {
        self.measure_isolation = measure;
        self
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn engine(&self) -> &CalibrationEngine {
        &self.engine
    }

    /// Sweep every standard `method` needs, solve and store the record.
    ///
    /// Each slot is presented through `prompt` before it is swept. Nothing
    /// is stored unless every sweep and the solve succeed.
    pub fn calibrate<P>(
        &self,
        conn: &Connection,
        kit: &CalibrationKit,
        method: CalibrationMethod,
        sweep: &SweepConfig,
        prompt: &mut P,
        cancel: &CancelToken,
    ) -> Result<CalibrationRecord, MeasurementError>
    where
        P: StandardPrompt + ?Sized,
    {
        method.validate()?;
        kit.ensure_covers(method)?;
        if let Some(&port) = method.ports().iter().find(|&&p| p > conn.port_count()) {
            return Err(CalibrationError::PortOutOfRange {
                port,
                context: format!("{} with {} ports", conn.info(), conn.port_count()),
            }
            .into());
        }

        let mut slots = method.required_slots();
        if self.measure_isolation {
            slots.extend(method.optional_slots());
        }
        info!(%method, kit = %kit.reference(), slots = slots.len(), "calibration started");

        let mut measurements = StandardMeasurements::new();
        for slot in slots {
            prompt.present(slot)?;
            let pairs = match slot {
                StandardSlot::Short(p) | StandardSlot::Open(p) | StandardSlot::Load(p) => {
                    vec![PortPair::reflection(p)]
                }
                StandardSlot::Through(a, b) | StandardSlot::Isolation(a, b) => {
                    PortPair::full(&[a, b])
                }
            };
            let trace = self.sweep(conn, sweep, &pairs, cancel)?;
            debug!(%slot, "standard measured");
            measurements.insert(slot, trace);
        }

        let record = self
            .engine
            .compute_error_terms(&measurements, kit, method, &sweep.frequency)?;
        self.repository.store_calibration_record(&record)?;
        info!(id = %record.id(), expires_at = %record.expires_at(), "calibration stored");
        Ok(record)
    }

    /// Run one measurement through the full pipeline
    pub fn measure(
        &self,
        conn: &Connection,
        request: &MeasurementRequest,
        cancel: &CancelToken,
    ) -> Result<MeasurementOutcome, MeasurementError> {
        let planned = self.plan(conn, request)?;
        let resolved = self.resolve(planned)?;
        let acquired = self.acquire(conn, resolved, cancel)?;
        let (trace, request) = self.process(conn.mode(), acquired)?;
        self.store(conn, request, trace)
    }

    pub fn recent_measurements(
        &self,
        limit: usize,
    ) -> Result<Vec<MeasurementMetadata>, MeasurementError> {
        Ok(self.repository.list_measurements(limit)?)
    }

    pub fn load_measurement(&self, id: Uuid) -> Result<StoredMeasurement, MeasurementError> {
        Ok(self.repository.load_measurement(id)?)
    }

    fn sweep(
        &self,
        conn: &Connection,
        sweep: &SweepConfig,
        pairs: &[PortPair],
        cancel: &CancelToken,
    ) -> Result<RawTrace, MeasurementError> {
        let trace = self
            .retry
            .run("sweep", || conn.sweep(sweep, pairs, self.sweep_timeout, cancel))?;
        Ok(trace)
    }

    fn plan<'r>(
        &self,
        conn: &Connection,
        request: &'r MeasurementRequest,
    ) -> Result<Planned<'r>, MeasurementError> {
        let mut ports = request.ports.clone();
        ports.sort_unstable();
        ports.dedup();
        if ports.is_empty() || ports.len() != request.ports.len() {
            let detail = format!("invalid port list {:?}", request.ports);
            return Err(InstrumentError::Ports(detail).into());
        }
        if let Some(&port) = ports.iter().find(|&&p| p == 0 || p > conn.port_count()) {
            return Err(InstrumentError::Ports(format!(
                "port {} is outside 1..={}",
                port,
                conn.port_count()
            ))
            .into());
        }
        Ok(Planned {
            request,
            pairs: PortPair::full(&ports),
        })
    }

    fn resolve<'r>(&self, plan: Planned<'r>) -> Result<Resolved<'r>, MeasurementError> {
        let sweep = &plan.request.sweep.frequency;
        let now = Utc::now();
        let record = match &plan.request.correction {
            Correction::None => None,
            Correction::Record(id) => {
                let record = match self.repository.load_calibration_record(*id) {
                    Ok(record) => record,
                    Err(PersistenceError::NotFound(_)) => {
                        return Err(MeasurementError::NoCalibration(format!(
                            "calibration {} does not exist",
                            id
                        )))
                    }
                    Err(e) => return Err(e.into()),
                };
                if record.is_expired(now) {
                    return Err(MeasurementError::NoCalibration(format!(
                        "calibration {} expired at {}",
                        id,
                        record.expires_at()
                    )));
                }
                if record.sweep() != sweep {
                    return Err(MeasurementError::NoCalibration(format!(
                        "calibration {} was computed for a different sweep",
                        id
                    )));
                }
                Some(record)
            }
            Correction::Active(kit) => {
                let record = self.repository.active_calibration(sweep, kit, now)?;
                let record = record.ok_or_else(|| {
                    let detail = format!("{} points with kit {}", sweep.npoints(), kit);
                    MeasurementError::NoCalibration(detail)
                })?;
                Some(record)
            }
        };
        if let Some(record) = &record {
            debug!(id = %record.id(), method = %record.method(), "calibration resolved");
        }
        Ok(Resolved { plan, record })
    }

    fn acquire<'r>(
        &self,
        conn: &Connection,
        resolved: Resolved<'r>,
        cancel: &CancelToken,
    ) -> Result<Acquired<'r>, MeasurementError> {
        let raw = self.sweep(conn, &resolved.plan.request.sweep, &resolved.plan.pairs, cancel)?;
        Ok(Acquired { resolved, raw })
    }

    fn process<'r>(
        &self,
        mode: InstrumentMode,
        acquired: Acquired<'r>,
    ) -> Result<(MeasuredTrace, &'r MeasurementRequest), MeasurementError> {
        let Acquired { resolved, raw } = acquired;
        let request = resolved.plan.request;

        let raw = if request.three_port && mode == InstrumentMode::Simulated {
            debug!(coupling_db = self.coupler.coupling_db, "routing through coupler model");
            self.coupler
                .simulate_three_port_response(&raw, self.engine.tolerance)?
        } else {
            raw
        };

        let trace = match resolved.record {
            Some(record) => MeasuredTrace::Corrected(self.engine.apply_correction(&raw, &record)?),
            None => MeasuredTrace::Raw(raw),
        };
        Ok((trace, request))
    }

    fn store(
        &self,
        conn: &Connection,
        request: &MeasurementRequest,
        trace: MeasuredTrace,
    ) -> Result<MeasurementOutcome, MeasurementError> {
        let metadata = match &trace {
            MeasuredTrace::Raw(t) => MeasurementMetadata::uncalibrated(t),
            MeasuredTrace::Corrected(t) => MeasurementMetadata::corrected(t),
        }
        .with_instrument(conn.info().clone())
        .with_tags(request.tags.iter().cloned());
        let metadata = match &request.notes {
            Some(notes) => metadata.with_notes(notes.clone()),
            None => metadata,
        };

        self.repository.store_measurement(trace.network(), &metadata)?;
        info!(
            id = %metadata.id,
            ports = ?trace.ports(),
            corrected = trace.is_corrected(),
            "measurement stored"
        );
        Ok(MeasurementOutcome { metadata, trace })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::OnePortTerms;
    use crate::frequency::{Frequency, FrequencyUnit};
    use crate::instrument::{
        Device, InstrumentContext, SimulatedErrorModel, SimulatedVna, StandardFixtures,
    };
    use crate::persistence::{CalibrationState, MemoryRepository};
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;
    use num_complex::Complex64;
    use std::cell::Cell;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    fn sweep() -> SweepConfig {
        SweepConfig::new(Frequency::from_f(vec![1.0, 2.0, 3.0], FrequencyUnit::GHz).unwrap())
    }

    fn simulator() -> SimulatedVna {
        let errors = SimulatedErrorModel::ideal().with_port(
            1,
            OnePortTerms {
                directivity: c(0.05, 0.0),
                source_match: c(0.1, -0.05),
                reflection_tracking: c(0.9, 0.1),
            },
        );
        SimulatedVna::new().with_error_model(errors)
    }

    #[test]
    fn test_retry_policy_is_bounded() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let result: Result<(), _> = policy.run("test", || {
            calls.set(calls.get() + 1);
            Err(InstrumentError::Busy)
        });
        assert_eq!(result, Err(InstrumentError::Busy));
        assert_eq!(calls.get(), 3);

        calls.set(0);
        let result: Result<(), _> = policy.run("test", || {
            calls.set(calls.get() + 1);
            Err(InstrumentError::NotConnected)
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_correction_without_calibration_fails_before_sweeping() {
        let vna = simulator();
        let ctx = InstrumentContext::new(vna);
        let conn = ctx.connect().unwrap();
        let orchestrator = MeasurementOrchestrator::new(MemoryRepository::new());
        let request = MeasurementRequest::new(sweep(), vec![1])
            .with_correction(Correction::Active(CalibrationKit::ideal_osl().reference()));

        let err = orchestrator.measure(&conn, &request, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, MeasurementError::NoCalibration(_)));
        assert!(orchestrator.recent_measurements(10).unwrap().is_empty());
    }

    #[test]
    fn test_calibrate_then_measure_corrected() {
        let vna = simulator();
        let device = vna.device_slot();
        let ctx = InstrumentContext::new(vna);
        let conn = ctx.connect().unwrap();
        let kit = CalibrationKit::ideal_osl();
        let orchestrator = MeasurementOrchestrator::new(MemoryRepository::new());

        let mut fixtures = StandardFixtures::new(device.clone(), kit.clone());
        let record = orchestrator
            .calibrate(
                &conn,
                &kit,
                CalibrationMethod::OnePort { port: 1 },
                &sweep(),
                &mut fixtures,
                &CancelToken::new(),
            )
            .unwrap();

        let dut = c(0.3, -0.4);
        device.attach(Device::Constant {
            s: arr2(&[[dut]]),
            ports: vec![1],
        });
        let request = MeasurementRequest::new(sweep(), vec![1])
            .with_correction(Correction::Active(kit.reference()))
            .with_notes("dut");
        let outcome = orchestrator.measure(&conn, &request, &CancelToken::new()).unwrap();

        assert!(outcome.trace.is_corrected());
        assert_eq!(outcome.metadata.calibration.calibration_id(), Some(record.id()));
        assert_eq!(outcome.metadata.notes.as_deref(), Some("dut"));
        for f in 0..3 {
            let g = outcome.trace.network().s()[[f, 0, 0]];
            assert_abs_diff_eq!(g.re, dut.re, epsilon = 1e-9);
            assert_abs_diff_eq!(g.im, dut.im, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_uncorrected_measurement_is_marked() {
        let ctx = InstrumentContext::new(SimulatedVna::new());
        let conn = ctx.connect().unwrap();
        let orchestrator = MeasurementOrchestrator::new(MemoryRepository::new());
        let outcome = orchestrator
            .measure(&conn, &MeasurementRequest::new(sweep(), vec![1, 2]), &CancelToken::new())
            .unwrap();
        assert_eq!(outcome.metadata.calibration, CalibrationState::Uncalibrated);
        assert_eq!(outcome.trace.ports(), &[1, 2]);
        let stored = orchestrator.load_measurement(outcome.metadata.id).unwrap();
        assert_eq!(stored.network.nports(), 2);
    }

    #[test]
    fn test_simulated_three_port_request_adds_coupled_port() {
        let ctx = InstrumentContext::new(SimulatedVna::new());
        let conn = ctx.connect().unwrap();
        let orchestrator = MeasurementOrchestrator::new(MemoryRepository::new())
            .with_coupler(CouplerModel::isolated());
        let request = MeasurementRequest::new(sweep(), vec![1, 2]).with_three_port();
        let outcome = orchestrator.measure(&conn, &request, &CancelToken::new()).unwrap();

        assert_eq!(outcome.trace.ports(), &[1, 2, 3]);
        let s = outcome.trace.network().s();
        for f in 0..3 {
            assert_eq!(s[[f, 2, 0]].norm(), 0.0);
            assert_eq!(s[[f, 2, 1]].norm(), 0.0);
        }
    }

    #[test]
    fn test_missing_kit_standard_stops_before_sweeping() {
        let ctx = InstrumentContext::new(SimulatedVna::new());
        let conn = ctx.connect().unwrap();
        let orchestrator = MeasurementOrchestrator::new(MemoryRepository::new());
        let presented = Cell::new(0);
        let mut prompt = |_slot: StandardSlot| -> Result<(), MeasurementError> {
            presented.set(presented.get() + 1);
            Ok(())
        };
        let err = orchestrator
            .calibrate(
                &conn,
                &CalibrationKit::ideal_osl(),
                CalibrationMethod::Solt { port_a: 1, port_b: 2 },
                &sweep(),
                &mut prompt,
                &CancelToken::new(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            MeasurementError::Calibration(CalibrationError::InsufficientStandards { .. })
        ));
        assert_eq!(presented.get(), 0);
        assert!(orchestrator.repository().list_calibrations(10).unwrap().is_empty());
    }
}
