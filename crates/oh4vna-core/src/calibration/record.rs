//! Calibration records

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::kit::{CalibrationMethod, KitRef};
use super::solt::{OnePortTerms, TwoPortTerms};
use super::standards::StandardSlot;
use super::trace::RawTrace;
use crate::error::NetworkError;
use crate::frequency::Frequency;
use crate::math::transforms::Tolerance;
use crate::network::Network;

/// Solved error model, one entry per sweep point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum ErrorTerms {
    OnePort {
        port: usize,
        terms: Vec<OnePortTerms>,
    },
    TwoPort {
        port_a: usize,
        port_b: usize,
        terms: Vec<TwoPortTerms>,
    },
}

impl ErrorTerms {
    pub fn npoints(&self) -> usize {
        match self {
            ErrorTerms::OnePort { terms, .. } => terms.len(),
            ErrorTerms::TwoPort { terms, .. } => terms.len(),
        }
    }

    /// Instrument ports the model covers
    pub fn ports(&self) -> Vec<usize> {
        match self {
            ErrorTerms::OnePort { port, .. } => vec![*port],
            ErrorTerms::TwoPort { port_a, port_b, .. } => vec![*port_a, *port_b],
        }
    }

    /// Raw trace the model produces for an `actual` response.
    ///
    /// `actual` is a one-port for a one-port model and a two-port ordered
    /// `[port_a, port_b]` for SOLT.
    pub fn distort(&self, actual: &Network, tol: Tolerance) -> Result<RawTrace, NetworkError> {
        if actual.nfreq() != self.npoints() {
            return Err(NetworkError::SweepMismatch(format!(
                "{} error-term points vs {} network points",
                self.npoints(),
                actual.nfreq()
            )));
        }
        let hz = actual.f();
        let mut s = actual.s().clone();
        match self {
            ErrorTerms::OnePort { terms, .. } => {
                actual.ensure_nports(1, "one-port error model")?;
                for (f, t) in terms.iter().enumerate() {
                    s[[f, 0, 0]] = t.distort(s[[f, 0, 0]], tol).map_err(|e| e.at(f, hz[f]))?;
                }
            }
            ErrorTerms::TwoPort { terms, .. } => {
                actual.ensure_nports(2, "two-port error model")?;
                for (f, t) in terms.iter().enumerate() {
                    let raw = t
                        .distort(&actual.s_at(f).to_owned(), tol)
                        .map_err(|e| e.at(f, hz[f]))?;
                    s.slice_mut(ndarray::s![f, .., ..]).assign(&raw);
                }
            }
        }
        let network = Network::new(actual.frequency().clone(), s, actual.z0().clone())?;
        RawTrace::new(network, self.ports())
    }

    /// Reflectometer model of one port at point `f`
    pub fn one_port(&self, port: usize, f: usize) -> Option<OnePortTerms> {
        match self {
            ErrorTerms::OnePort { port: p, terms } if *p == port => terms.get(f).copied(),
            ErrorTerms::TwoPort { port_a, terms, .. } if *port_a == port => {
                terms.get(f).map(|t| t.forward.one_port())
            }
            ErrorTerms::TwoPort { port_b, terms, .. } if *port_b == port => {
                terms.get(f).map(|t| t.reverse.one_port())
            }
            _ => None,
        }
    }
}

/// Immutable result of a completed calibration.
///
/// A record is only valid for the exact sweep and kit it was computed with,
/// and only until it expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    id: Uuid,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    method: CalibrationMethod,
    kit: KitRef,
    sweep: Frequency,
    terms: ErrorTerms,
    standards_completed: Vec<StandardSlot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    notes: Option<String>,
}

impl CalibrationRecord {
    pub(crate) fn new(
        method: CalibrationMethod,
        kit: KitRef,
        sweep: Frequency,
        terms: ErrorTerms,
        standards_completed: Vec<StandardSlot>,
        validity: Duration,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at,
            expires_at: created_at + validity,
            method,
            kit,
            sweep,
            terms,
            standards_completed,
            operator: None,
            notes: None,
        }
    }

    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn method(&self) -> CalibrationMethod {
        self.method
    }

    pub fn kit(&self) -> &KitRef {
        &self.kit
    }

    pub fn sweep(&self) -> &Frequency {
        &self.sweep
    }

    pub fn terms(&self) -> &ErrorTerms {
        &self.terms
    }

    pub fn standards_completed(&self) -> &[StandardSlot] {
        &self.standards_completed
    }

    pub fn operator(&self) -> Option<&str> {
        self.operator.as_deref()
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Usable for a measurement on `sweep` with `kit`, right now
    pub fn is_valid_for(&self, sweep: &Frequency, kit: &KitRef) -> bool {
        self.is_valid_at(sweep, kit, Utc::now())
    }

    pub fn is_valid_at(&self, sweep: &Frequency, kit: &KitRef, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && self.sweep == *sweep && self.kit == *kit
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, by: Duration) {
        self.created_at -= by;
        self.expires_at -= by;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationKit;
    use crate::frequency::FrequencyUnit;

    fn record(sweep: &Frequency) -> CalibrationRecord {
        CalibrationRecord::new(
            CalibrationMethod::OnePort { port: 1 },
            CalibrationKit::ideal_osl().reference(),
            sweep.clone(),
            ErrorTerms::OnePort {
                port: 1,
                terms: vec![OnePortTerms::ideal(); sweep.npoints()],
            },
            CalibrationMethod::OnePort { port: 1 }.required_slots(),
            Duration::hours(8),
        )
    }

    #[test]
    fn test_validity_requires_sweep_kit_and_time() {
        let sweep = Frequency::from_f(vec![1.0, 2.0], FrequencyUnit::GHz).unwrap();
        let kit = CalibrationKit::ideal_osl().reference();
        let mut rec = record(&sweep);
        assert!(rec.is_valid_for(&sweep, &kit));

        let other_sweep = Frequency::from_f(vec![1.0, 2.5], FrequencyUnit::GHz).unwrap();
        assert!(!rec.is_valid_for(&other_sweep, &kit));
        assert!(!rec.is_valid_for(&sweep, &CalibrationKit::ideal_solt().reference()));

        rec.backdate(Duration::hours(9));
        assert!(rec.is_expired(Utc::now()));
        assert!(!rec.is_valid_for(&sweep, &kit));
    }

    #[test]
    fn test_record_json_roundtrip() {
        let sweep = Frequency::from_f(vec![1.1, 2.3], FrequencyUnit::GHz).unwrap();
        let rec = record(&sweep).with_operator("bench-2").with_notes("after warm-up");
        let json = serde_json::to_string(&rec).unwrap();
        let back: CalibrationRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
        assert_eq!(back.operator(), Some("bench-2"));
    }

    #[test]
    fn test_one_port_lookup_on_two_port_terms() {
        use crate::calibration::solt::DirectionTerms;
        let t = TwoPortTerms {
            forward: DirectionTerms::from_one_port(OnePortTerms::ideal()),
            reverse: DirectionTerms::from_one_port(OnePortTerms {
                directivity: num_complex::Complex64::new(0.1, 0.0),
                ..OnePortTerms::ideal()
            }),
        };
        let terms = ErrorTerms::TwoPort {
            port_a: 1,
            port_b: 3,
            terms: vec![t],
        };
        assert_eq!(terms.one_port(3, 0).unwrap().directivity.re, 0.1);
        assert!(terms.one_port(2, 0).is_none());
    }
}
