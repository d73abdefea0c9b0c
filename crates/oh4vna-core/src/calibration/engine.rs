//! Error-term computation and correction
//!
//! The engine validates inputs in a fixed order: kit coverage, then the
//! presence of every required measurement, then sweep agreement. Solving
//! happens per frequency point and stops at the first degenerate point.

use std::collections::BTreeMap;

use chrono::Duration;
use ndarray::{arr2, Array3};
use num_complex::Complex64;
use tracing::{debug, info};

use super::kit::{CalibrationKit, CalibrationMethod};
use super::record::{CalibrationRecord, ErrorTerms};
use super::solt::{OnePortTerms, TwoPortTerms};
use super::standards::{StandardKind, StandardSlot};
use super::trace::{CorrectedTrace, Provenance, RawTrace};
use crate::constants::DEFAULT_CAL_VALIDITY_HOURS;
use crate::error::{CalibrationError, FrequencyPoint};
use crate::frequency::Frequency;
use crate::math::transforms::Tolerance;
use crate::network::Network;

/// Raw standard measurements collected during a calibration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StandardMeasurements {
    traces: BTreeMap<StandardSlot, RawTrace>,
}

impl StandardMeasurements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a measurement, replacing any earlier one for the slot
    pub fn insert(&mut self, slot: StandardSlot, trace: RawTrace) {
        self.traces.insert(slot, trace);
    }

    pub fn get(&self, slot: StandardSlot) -> Option<&RawTrace> {
        self.traces.get(&slot)
    }

    pub fn contains(&self, slot: StandardSlot) -> bool {
        self.traces.contains_key(&slot)
    }

    pub fn slots(&self) -> impl Iterator<Item = StandardSlot> + '_ {
        self.traces.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }
}

/// Solver settings shared by every calibration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationEngine {
    pub tolerance: Tolerance,
    pub validity: Duration,
}

impl Default for CalibrationEngine {
    fn default() -> Self {
        Self {
            tolerance: Tolerance::default(),
            validity: Duration::hours(DEFAULT_CAL_VALIDITY_HOURS),
        }
    }
}

impl CalibrationEngine {
    pub fn new(tolerance: Tolerance, validity: Duration) -> Self {
        Self { tolerance, validity }
    }

    /// Solve the error model of `method` from raw standard measurements.
    pub fn compute_error_terms(
        &self,
        measurements: &StandardMeasurements,
        kit: &CalibrationKit,
        method: CalibrationMethod,
        sweep: &Frequency,
    ) -> Result<CalibrationRecord, CalibrationError> {
        method.validate()?;
        kit.ensure_covers(method)?;

        let missing: Vec<StandardSlot> = method
            .required_slots()
            .into_iter()
            .filter(|slot| !measurements.contains(*slot))
            .collect();
        if !missing.is_empty() {
            return Err(CalibrationError::InsufficientStandards { method, missing });
        }

        let used: Vec<StandardSlot> = method
            .required_slots()
            .into_iter()
            .chain(method.optional_slots().into_iter().filter(|s| measurements.contains(*s)))
            .collect();
        for &slot in &used {
            if let Some(trace) = measurements.get(slot) {
                trace
                    .frequency()
                    .ensure_compatible(sweep)
                    .map_err(|e| CalibrationError::InconsistentSweep {
                        slot: slot.to_string(),
                        detail: e.to_string(),
                    })?;
            }
        }

        let terms = match method {
            CalibrationMethod::OnePort { port } => ErrorTerms::OnePort {
                port,
                terms: self.solve_one_port(measurements, kit, port, sweep)?,
            },
            CalibrationMethod::Solt { port_a, port_b } => ErrorTerms::TwoPort {
                port_a,
                port_b,
                terms: self.solve_two_port(measurements, kit, port_a, port_b, sweep)?,
            },
        };

        let record = CalibrationRecord::new(
            method,
            kit.reference(),
            sweep.clone(),
            terms,
            used,
            self.validity,
        );
        info!(
            calibration_id = %record.id(),
            %method,
            kit = %record.kit(),
            points = sweep.npoints(),
            "calibration solved"
        );
        Ok(record)
    }

    fn solve_one_port(
        &self,
        measurements: &StandardMeasurements,
        kit: &CalibrationKit,
        port: usize,
        sweep: &Frequency,
    ) -> Result<Vec<OnePortTerms>, CalibrationError> {
        let method = CalibrationMethod::OnePort { port };
        let mut slots = Vec::with_capacity(3);
        for (slot, kind) in [
            (StandardSlot::Short(port), StandardKind::Short),
            (StandardSlot::Open(port), StandardKind::Open),
            (StandardSlot::Load(port), StandardKind::Load),
        ] {
            let missing = || CalibrationError::InsufficientStandards {
                method,
                missing: vec![slot],
            };
            let standard = kit.standard(kind).ok_or_else(missing)?;
            let trace = measurements.get(slot).ok_or_else(missing)?;
            slots.push((slot, standard, trace));
        }

        sweep
            .f()
            .iter()
            .enumerate()
            .map(|(f, &hz)| -> Result<OnePortTerms, CalibrationError> {
                let point = FrequencyPoint { index: f, hz };
                let mut measured = [Complex64::new(0.0, 0.0); 3];
                let mut actual = [Complex64::new(0.0, 0.0); 3];
                for (k, (slot, standard, trace)) in slots.iter().enumerate() {
                    measured[k] = trace.value(port, port, f, &slot.to_string())?;
                    actual[k] = standard.reflection_at(*slot, point)?;
                }
                OnePortTerms::solve(measured, actual, self.tolerance)
                    .map_err(|e| CalibrationError::from(e.at(f, hz)))
            })
            .collect()
    }

    fn solve_two_port(
        &self,
        measurements: &StandardMeasurements,
        kit: &CalibrationKit,
        port_a: usize,
        port_b: usize,
        sweep: &Frequency,
    ) -> Result<Vec<TwoPortTerms>, CalibrationError> {
        let method = CalibrationMethod::Solt { port_a, port_b };
        let terms_a = self.solve_one_port(measurements, kit, port_a, sweep)?;
        let terms_b = self.solve_one_port(measurements, kit, port_b, sweep)?;

        let thru_slot = StandardSlot::Through(port_a, port_b);
        let missing = || CalibrationError::InsufficientStandards {
            method,
            missing: vec![thru_slot],
        };
        let thru_std = kit.standard(StandardKind::Through).ok_or_else(missing)?;
        let thru = measurements.get(thru_slot).ok_or_else(missing)?;
        let isolation_slot = StandardSlot::Isolation(port_a, port_b);
        let isolation = measurements.get(isolation_slot);
        if isolation.is_none() {
            debug!(%method, "no isolation measurement, crosstalk taken as zero");
        }

        let label = thru_slot.to_string();
        sweep
            .f()
            .iter()
            .enumerate()
            .map(|(f, &hz)| -> Result<TwoPortTerms, CalibrationError> {
                let point = FrequencyPoint { index: f, hz };
                let at = |to: usize, from: usize| thru.value(to, from, f, &label);
                let thru_measured = arr2(&[
                    [at(port_a, port_a)?, at(port_a, port_b)?],
                    [at(port_b, port_a)?, at(port_b, port_b)?],
                ]);
                let thru_actual = thru_std.s_at(thru_slot, point)?;
                let crosstalk = match isolation {
                    Some(iso) => {
                        let label = isolation_slot.to_string();
                        (
                            iso.value(port_b, port_a, f, &label)?,
                            iso.value(port_a, port_b, f, &label)?,
                        )
                    }
                    None => (Complex64::new(0.0, 0.0), Complex64::new(0.0, 0.0)),
                };
                TwoPortTerms::solve(
                    terms_a[f],
                    terms_b[f],
                    &thru_measured,
                    &thru_actual,
                    crosstalk,
                    self.tolerance,
                )
                .map_err(|e| CalibrationError::DegenerateStandard {
                    slot: thru_slot,
                    source: e.at(f, hz),
                })
            })
            .collect()
    }

    /// Correct a raw trace with a calibration record.
    ///
    /// Only the ports covered by the record are corrected; every other
    /// entry passes through unchanged. A SOLT record applied to a trace that
    /// contains only one of its ports corrects that port's reflection.
    pub fn apply_correction(
        &self,
        raw: &RawTrace,
        record: &CalibrationRecord,
    ) -> Result<CorrectedTrace, CalibrationError> {
        raw.frequency()
            .ensure_compatible(record.sweep())
            .map_err(|e| CalibrationError::InconsistentSweep {
                slot: "raw trace".into(),
                detail: e.to_string(),
            })?;

        let tol = self.tolerance;
        let hz = raw.frequency().f();
        let mut s: Array3<Complex64> = raw.network().s().clone();

        let corrected_ports = match record.terms() {
            ErrorTerms::OnePort { port, terms } => {
                let i = raw.require(*port, "one-port correction")?;
                for (f, t) in terms.iter().enumerate() {
                    s[[f, i, i]] = t.correct(s[[f, i, i]], tol).map_err(|e| e.at(f, hz[f]))?;
                }
                vec![*port]
            }
            ErrorTerms::TwoPort { port_a, port_b, terms } => {
                match (raw.index_of(*port_a), raw.index_of(*port_b)) {
                    (Some(a), Some(b)) => {
                        for (f, t) in terms.iter().enumerate() {
                            let measured = arr2(&[
                                [s[[f, a, a]], s[[f, a, b]]],
                                [s[[f, b, a]], s[[f, b, b]]],
                            ]);
                            let c = t.correct(&measured, tol).map_err(|e| e.at(f, hz[f]))?;
                            s[[f, a, a]] = c[[0, 0]];
                            s[[f, a, b]] = c[[0, 1]];
                            s[[f, b, a]] = c[[1, 0]];
                            s[[f, b, b]] = c[[1, 1]];
                        }
                        vec![*port_a, *port_b]
                    }
                    (Some(i), None) | (None, Some(i)) => {
                        let port = raw.ports()[i];
                        for f in 0..terms.len() {
                            let t = record.terms().one_port(port, f).ok_or_else(|| {
                                CalibrationError::PortOutOfRange {
                                    port,
                                    context: "SOLT record".into(),
                                }
                            })?;
                            s[[f, i, i]] =
                                t.correct(s[[f, i, i]], tol).map_err(|e| e.at(f, hz[f]))?;
                        }
                        vec![port]
                    }
                    (None, None) => {
                        return Err(CalibrationError::PortOutOfRange {
                            port: *port_a,
                            context: format!("SOLT correction (trace ports {:?})", raw.ports()),
                        })
                    }
                }
            }
        };

        let network = Network::new(raw.frequency().clone(), s, raw.network().z0().clone())?;
        let network = match raw.network().name() {
            Some(name) => network.with_name(name),
            None => network,
        };
        debug!(calibration_id = %record.id(), ports = ?corrected_ports, "trace corrected");

        Ok(CorrectedTrace::new(
            network,
            raw.ports().to_vec(),
            Provenance {
                calibration_id: record.id(),
                kit: record.kit().clone(),
                method: record.method(),
                corrected_ports,
            },
        ))
    }
}

/// [`CalibrationEngine::compute_error_terms`] with default settings
pub fn compute_error_terms(
    measurements: &StandardMeasurements,
    kit: &CalibrationKit,
    method: CalibrationMethod,
    sweep: &Frequency,
) -> Result<CalibrationRecord, CalibrationError> {
    CalibrationEngine::default().compute_error_terms(measurements, kit, method, sweep)
}

/// [`CalibrationEngine::apply_correction`] with default settings
pub fn apply_correction(
    raw: &RawTrace,
    record: &CalibrationRecord,
) -> Result<CorrectedTrace, CalibrationError> {
    CalibrationEngine::default().apply_correction(raw, record)
}
