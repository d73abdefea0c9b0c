//! Persistence collaborator
//!
//! Calibration records and measurements are stored by identifier. A stored
//! measurement is the S-parameter data plus a metadata sidecar that says
//! whether, and by which calibration, it was corrected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calibration::{CalibrationRecord, CorrectedTrace, KitRef, Provenance, RawTrace};
use crate::error::{NetworkError, PersistenceError};
use crate::frequency::Frequency;
use crate::instrument::InstrumentInfo;
use crate::network::Network;

pub mod file;
pub mod memory;

pub use file::{normalize_serial, FileRepository};
pub use memory::MemoryRepository;

/// Correction state recorded next to every measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CalibrationState {
    Uncalibrated,
    Corrected(Provenance),
}

impl CalibrationState {
    pub fn calibration_id(&self) -> Option<Uuid> {
        match self {
            CalibrationState::Uncalibrated => None,
            CalibrationState::Corrected(p) => Some(p.calibration_id),
        }
    }
}

/// Metadata sidecar of a stored measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementMetadata {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub sweep: Frequency,
    /// Instrument ports of the stored network, in network order
    pub ports: Vec<usize>,
    pub port_count: usize,
    pub calibration: CalibrationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<InstrumentInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl MeasurementMetadata {
    fn with_state(network: &Network, ports: &[usize], calibration: CalibrationState) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            sweep: network.frequency().clone(),
            ports: ports.to_vec(),
            port_count: network.nports(),
            calibration,
            instrument: None,
            notes: None,
            tags: Vec::new(),
        }
    }

    pub fn uncalibrated(trace: &RawTrace) -> Self {
        Self::with_state(trace.network(), trace.ports(), CalibrationState::Uncalibrated)
    }

    pub fn corrected(trace: &CorrectedTrace) -> Self {
        Self::with_state(
            trace.network(),
            trace.ports(),
            CalibrationState::Corrected(trace.provenance().clone()),
        )
    }

    pub fn with_instrument(mut self, info: InstrumentInfo) -> Self {
        self.instrument = Some(info);
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

    /// The sidecar must describe `network` exactly
    pub(crate) fn ensure_describes(&self, network: &Network) -> Result<(), PersistenceError> {
        self.sweep.ensure_compatible(network.frequency())?;
        if self.port_count != network.nports() || self.ports.len() != network.nports() {
            return Err(NetworkError::PortMismatch {
                context: "measurement metadata",
                expected: self.port_count,
                found: network.nports(),
            }
            .into());
        }
        Ok(())
    }
}

/// A measurement read back from a repository
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMeasurement {
    pub metadata: MeasurementMetadata,
    pub network: Network,
}

/// Storage of calibration records and measurements
pub trait Repository: Send + Sync {
    fn store_calibration_record(
        &self,
        record: &CalibrationRecord,
    ) -> Result<Uuid, PersistenceError>;

    fn load_calibration_record(&self, id: Uuid) -> Result<CalibrationRecord, PersistenceError>;

    /// Newest first
    fn list_calibrations(&self, limit: usize) -> Result<Vec<CalibrationRecord>, PersistenceError>;

    fn store_measurement(
        &self,
        network: &Network,
        metadata: &MeasurementMetadata,
    ) -> Result<Uuid, PersistenceError>;

    fn load_measurement(&self, id: Uuid) -> Result<StoredMeasurement, PersistenceError>;

    /// Newest first
    fn list_measurements(&self, limit: usize) -> Result<Vec<MeasurementMetadata>, PersistenceError>;

    /// Newest unexpired record computed for exactly `sweep` and `kit`
    fn active_calibration(
        &self,
        sweep: &Frequency,
        kit: &KitRef,
        now: DateTime<Utc>,
    ) -> Result<Option<CalibrationRecord>, PersistenceError> {
        Ok(self
            .list_calibrations(usize::MAX)?
            .into_iter()
            .find(|r| r.is_valid_at(sweep, kit, now)))
    }
}
