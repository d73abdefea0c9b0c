//! oh4vna-core: VNA measurement correction for the OH4VNA test bench
//!
//! Calibrates a network analyzer against known standards, corrects raw
//! traces, and emulates the OH4VNA three-port coupler behind a two-port
//! instrument.
//!
//! ## Modules
//!
//! - `frequency` - Frequency sweep definition
//! - `math` - Conversions and S/T-parameter transforms
//! - `network` - N-port network response and network algebra
//! - `touchstone` - Touchstone file I/O
//! - `calibration` - Standards, kits, SOL/SOLT error terms and correction
//! - `coupler` - Analytical three-port coupler model
//! - `instrument` - Analyzer contract, simulator, SCPI driver, connections
//! - `persistence` - Calibration and measurement repositories
//! - `measurement` - Measurement orchestrator
//! - `config` - Application settings

pub mod calibration;
pub mod config;
pub mod constants;
pub mod coupler;
pub mod error;
pub mod frequency;
pub mod instrument;
pub mod math;
pub mod measurement;
pub mod network;
pub mod persistence;
pub mod touchstone;

pub use calibration::{
    CalibrationEngine, CalibrationKit, CalibrationRecord, CorrectedTrace, RawTrace,
};
pub use coupler::CouplerModel;
pub use error::{
    CalibrationError, InstrumentError, MeasurementError, NetworkError, PersistenceError,
};
pub use frequency::Frequency;
pub use measurement::MeasurementOrchestrator;
pub use network::Network;
