//! Calibration engine
//!
//! Standard definitions and kits, the SOL/SOLT error models, calibration
//! records, and correction of raw traces.

pub mod engine;
pub mod kit;
pub mod record;
pub mod solt;
pub mod standards;
pub mod trace;

pub use engine::{apply_correction, compute_error_terms, CalibrationEngine, StandardMeasurements};
pub use kit::{CalibrationKit, CalibrationMethod, KitRef};
pub use record::{CalibrationRecord, ErrorTerms};
pub use solt::{DirectionTerms, OnePortTerms, TwoPortTerms};
pub use standards::{
    OffsetLine, ParametricStandard, StandardDefinition, StandardKind, StandardModel, StandardSlot,
};
pub use trace::{CorrectedTrace, Provenance, RawTrace};
