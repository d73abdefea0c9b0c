//! Calibration kits and calibration methods

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::standards::{StandardDefinition, StandardKind, StandardSlot};
use crate::error::CalibrationError;

/// Immutable, versioned set of standard definitions.
///
/// Kits are identified by id, serial number, characterization date and
/// revision. A re-imported kit is a new revision, never an edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationKit {
    id: String,
    name: String,
    serial: String,
    calibration_date: NaiveDate,
    #[serde(default = "first_revision")]
    revision: u32,
    standards: BTreeMap<StandardKind, StandardDefinition>,
}

fn first_revision() -> u32 {
    1
}

/// Identity of the kit a calibration was computed with
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KitRef {
    pub id: String,
    pub serial: String,
    pub calibration_date: NaiveDate,
    pub revision: u32,
}

impl fmt::Display for KitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} SN{} ({}, rev {})",
            self.id, self.serial, self.calibration_date, self.revision
        )
    }
}

impl CalibrationKit {
    /// Build a kit; later definitions of the same kind replace earlier ones.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        serial: impl Into<String>,
        calibration_date: NaiveDate,
        standards: impl IntoIterator<Item = StandardDefinition>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            serial: serial.into(),
            calibration_date,
            revision: first_revision(),
            standards: standards.into_iter().map(|s| (s.kind(), s)).collect(),
        }
    }

    pub fn with_revision(mut self, revision: u32) -> Self {
        self.revision = revision;
        self
    }

    /// Lossless short, open and load
    pub fn ideal_osl() -> Self {
        Self::new(
            "perfect-osl",
            "Perfect OSL",
            "0000",
            NaiveDate::default(),
            [
                StandardDefinition::ideal(StandardKind::Short, Complex64::new(-1.0, 0.0)),
                StandardDefinition::ideal(StandardKind::Open, Complex64::new(1.0, 0.0)),
                StandardDefinition::ideal(StandardKind::Load, Complex64::new(0.0, 0.0)),
            ],
        )
    }

    /// Lossless short, open, load and a zero-length matched through
    pub fn ideal_solt() -> Self {
        let mut kit = Self::ideal_osl();
        kit.id = "perfect-solt".into();
        kit.name = "Perfect SOLT".into();
        kit.standards.insert(
            StandardKind::Through,
            StandardDefinition::ideal(StandardKind::Through, Complex64::new(1.0, 0.0)),
        );
        kit
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn calibration_date(&self) -> NaiveDate {
        self.calibration_date
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn standard(&self, kind: StandardKind) -> Option<&StandardDefinition> {
        self.standards.get(&kind)
    }

    pub fn standards(&self) -> impl Iterator<Item = &StandardDefinition> {
        self.standards.values()
    }

    pub fn reference(&self) -> KitRef {
        KitRef {
            id: self.id.clone(),
            serial: self.serial.clone(),
            calibration_date: self.calibration_date,
            revision: self.revision,
        }
    }

    /// Require every standard kind `method` needs.
    ///
    /// The error lists every slot that cannot be evaluated.
    pub fn ensure_covers(&self, method: CalibrationMethod) -> Result<(), CalibrationError> {
        let missing: Vec<StandardSlot> = method
            .required_slots()
            .into_iter()
            .filter(|slot| slot.kind().is_some_and(|k| !self.standards.contains_key(&k)))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(CalibrationError::InsufficientStandards { method, missing })
        }
    }
}

/// Calibration procedure, with 1-based instrument ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum CalibrationMethod {
    /// Short-open-load on one port
    OnePort { port: usize },
    /// Short-open-load on both ports plus a through, isolation optional
    Solt { port_a: usize, port_b: usize },
}

impl CalibrationMethod {
    pub fn ports(&self) -> Vec<usize> {
        match *self {
            CalibrationMethod::OnePort { port } => vec![port],
            CalibrationMethod::Solt { port_a, port_b } => vec![port_a, port_b],
        }
    }

    /// Standard kinds a kit must define
    pub fn required_kinds(&self) -> Vec<StandardKind> {
        let mut kinds = vec![StandardKind::Short, StandardKind::Open, StandardKind::Load];
        if matches!(self, CalibrationMethod::Solt { .. }) {
            kinds.push(StandardKind::Through);
        }
        kinds
    }

    /// Measurements the procedure cannot do without, in connection order
    pub fn required_slots(&self) -> Vec<StandardSlot> {
        let mut slots = Vec::new();
        for port in self.ports() {
            slots.extend([
                StandardSlot::Short(port),
                StandardSlot::Open(port),
                StandardSlot::Load(port),
            ]);
        }
        if let CalibrationMethod::Solt { port_a, port_b } = *self {
            slots.push(StandardSlot::Through(port_a, port_b));
        }
        slots
    }

    /// Measurements used when present
    pub fn optional_slots(&self) -> Vec<StandardSlot> {
        match *self {
            CalibrationMethod::OnePort { .. } => Vec::new(),
            CalibrationMethod::Solt { port_a, port_b } => {
                vec![StandardSlot::Isolation(port_a, port_b)]
            }
        }
    }

    /// Ports are 1-based and a SOLT pair must be distinct
    pub fn validate(&self) -> Result<(), CalibrationError> {
        let ports = self.ports();
        if let Some(&port) = ports.iter().find(|&&p| p == 0) {
            return Err(CalibrationError::PortOutOfRange {
                port,
                context: "1-based instrument ports".into(),
            });
        }
        if let CalibrationMethod::Solt { port_a, port_b } = *self {
            if port_a == port_b {
                return Err(CalibrationError::PortOutOfRange {
                    port: port_b,
                    context: format!("a SOLT pair with port {}", port_a),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for CalibrationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationMethod::OnePort { port } => write!(f, "one-port SOL on port {}", port),
            CalibrationMethod::Solt { port_a, port_b } => {
                write!(f, "SOLT on ports {}-{}", port_a, port_b)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_slots() {
        let solt = CalibrationMethod::Solt { port_a: 1, port_b: 2 };
        let slots = solt.required_slots();
        assert_eq!(slots.len(), 7);
        assert_eq!(slots[6], StandardSlot::Through(1, 2));
        assert_eq!(solt.required_kinds().len(), 4);
    }

    #[test]
    fn test_osl_kit_cannot_do_solt() {
        let solt = CalibrationMethod::Solt { port_a: 1, port_b: 2 };
        let err = CalibrationKit::ideal_osl().ensure_covers(solt).unwrap_err();
        match err {
            CalibrationError::InsufficientStandards { missing, .. } => {
                assert_eq!(missing, vec![StandardSlot::Through(1, 2)]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(CalibrationKit::ideal_solt().ensure_covers(solt).is_ok());
    }

    #[test]
    fn test_kit_json_roundtrip() {
        let kit = CalibrationKit::ideal_solt().with_revision(3);
        let json = serde_json::to_string(&kit).unwrap();
        let back: CalibrationKit = serde_json::from_str(&json).unwrap();
        assert_eq!(back, kit);
        assert_eq!(back.reference().revision, 3);
    }

    #[test]
    fn test_same_port_solt_is_rejected() {
        let err = CalibrationMethod::Solt { port_a: 2, port_b: 2 }.validate().unwrap_err();
        assert!(matches!(err, CalibrationError::PortOutOfRange { port: 2, .. }));
        assert!(CalibrationMethod::OnePort { port: 0 }.validate().is_err());
    }
}
