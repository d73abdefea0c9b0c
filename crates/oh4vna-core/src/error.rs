//! Error taxonomy
//!
//! Network-algebra and calibration errors describe malformed input or a
//! degenerate physical configuration and are never retried. Instrument
//! busy/timeout errors are the only retryable class.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::calibration::{CalibrationMethod, StandardKind, StandardSlot};
use crate::touchstone::parser::TouchstoneError;

/// Location of a failing frequency point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyPoint {
    /// Index into the sweep
    pub index: usize,
    /// Frequency in Hz
    pub hz: f64,
}

impl fmt::Display for FrequencyPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "point {} ({} Hz)", self.index, self.hz)
    }
}

fn fmt_point(point: &Option<FrequencyPoint>) -> String {
    match point {
        Some(p) => p.to_string(),
        None => "single-point evaluation".to_string(),
    }
}

/// Network algebra errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetworkError {
    #[error(
        "singular network at {}: {term} = {magnitude:e} is below tolerance {threshold:e}",
        fmt_point(.point)
    )]
    Singular {
        point: Option<FrequencyPoint>,
        term: &'static str,
        magnitude: f64,
        threshold: f64,
    },

    #[error("port mismatch in {context}: expected {expected} ports, found {found}")]
    PortMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("sweep mismatch: {0}")]
    SweepMismatch(String),

    #[error("invalid network shape: {0}")]
    Shape(String),
}

impl NetworkError {
    /// Attach the sweep location to a single-point singularity.
    pub fn at(self, index: usize, hz: f64) -> Self {
        match self {
            NetworkError::Singular {
                point: None,
                term,
                magnitude,
                threshold,
            } => NetworkError::Singular {
                point: Some(FrequencyPoint { index, hz }),
                term,
                magnitude,
                threshold,
            },
            other => other,
        }
    }
}

/// Calibration input validation and solving errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("insufficient standards for {method}: missing {}", join_slots(.missing))]
    InsufficientStandards {
        method: CalibrationMethod,
        missing: Vec<StandardSlot>,
    },

    #[error("inconsistent sweep for {slot}: {detail}")]
    InconsistentSweep { slot: String, detail: String },

    #[error("missing standard data for {standard} at {point}")]
    MissingStandardData {
        standard: String,
        point: FrequencyPoint,
    },

    #[error("degenerate {slot} measurement: {source}")]
    DegenerateStandard {
        slot: StandardSlot,
        #[source]
        source: NetworkError,
    },

    #[error("port {port} is not part of {context}")]
    PortOutOfRange { port: usize, context: String },

    #[error("kit {kit} does not define a {kind} standard")]
    UnknownStandard { kit: String, kind: StandardKind },

    #[error(transparent)]
    Network(#[from] NetworkError),
}

fn join_slots(slots: &[StandardSlot]) -> String {
    slots
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Instrument collaborator errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InstrumentError {
    #[error("instrument busy: a sweep is already in flight")]
    Busy,

    #[error("sweep timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u128 },

    #[error("instrument not connected")]
    NotConnected,

    #[error("sweep cancelled after {completed} of {total} points")]
    Cancelled { completed: usize, total: usize },

    #[error("unsupported port selection: {0}")]
    Ports(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

impl InstrumentError {
    /// Busy and timeout are the only conditions worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, InstrumentError::Busy | InstrumentError::Timeout { .. })
    }
}

/// Persistence collaborator errors
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Touchstone(#[from] TouchstoneError),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("invalid calibration kit: {0}")]
    InvalidKit(String),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PersistenceError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Measurement orchestration errors
#[derive(Error, Debug)]
pub enum MeasurementError {
    #[error("no calibration available for {0}")]
    NoCalibration(String),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Instrument(#[from] InstrumentError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl MeasurementError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, MeasurementError::Instrument(e) if e.is_retryable())
    }
}
