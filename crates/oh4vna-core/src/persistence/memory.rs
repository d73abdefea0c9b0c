//! In-memory repository for tests and dry runs

use parking_lot::RwLock;
use uuid::Uuid;

use super::{MeasurementMetadata, Repository, StoredMeasurement};
use crate::calibration::CalibrationRecord;
use crate::error::PersistenceError;
use crate::network::Network;

#[derive(Debug, Default)]
pub struct MemoryRepository {
    calibrations: RwLock<Vec<CalibrationRecord>>,
    measurements: RwLock<Vec<StoredMeasurement>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Repository for MemoryRepository {
    fn store_calibration_record(
        &self,
        record: &CalibrationRecord,
    ) -> Result<Uuid, PersistenceError> {
        let mut calibrations = self.calibrations.write();
        calibrations.retain(|r| r.id() != record.id());
        calibrations.push(record.clone());
        calibrations.sort_by_key(|r| r.created_at());
        Ok(record.id())
    }

    fn load_calibration_record(&self, id: Uuid) -> Result<CalibrationRecord, PersistenceError> {
        self.calibrations
            .read()
            .iter()
            .find(|r| r.id() == id)
            .cloned()
            .ok_or_else(|| PersistenceError::NotFound(format!("calibration {}", id)))
    }

    fn list_calibrations(&self, limit: usize) -> Result<Vec<CalibrationRecord>, PersistenceError> {
        Ok(self.calibrations.read().iter().rev().take(limit).cloned().collect())
    }

    fn store_measurement(
        &self,
        network: &Network,
        metadata: &MeasurementMetadata,
    ) -> Result<Uuid, PersistenceError> {
        metadata.ensure_describes(network)?;
        let mut measurements = self.measurements.write();
        measurements.push(StoredMeasurement {
            metadata: metadata.clone(),
            network: network.clone(),
        });
        measurements.sort_by_key(|m| m.metadata.timestamp);
        Ok(metadata.id)
    }

    fn load_measurement(&self, id: Uuid) -> Result<StoredMeasurement, PersistenceError> {
        self.measurements
            .read()
            .iter()
            .find(|m| m.metadata.id == id)
            .cloned()
            .ok_or_else(|| PersistenceError::NotFound(format!("measurement {}", id)))
    }

    fn list_measurements(
        &self,
        limit: usize,
    ) -> Result<Vec<MeasurementMetadata>, PersistenceError> {
        Ok(self
            .measurements
            .read()
            .iter()
            .rev()
            .take(limit)
            .map(|m| m.metadata.clone())
            .collect())
    }
}
