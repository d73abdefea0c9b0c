//! Calibration standard definitions
//!
//! A standard is described either by a fixed ideal value, by a parametric
//! model evaluated per frequency, or by tabulated characterization data.
//! An instrument-specific override, when present for a point, wins over the
//! model. Points with neither are reported, never extrapolated.

use std::f64::consts::PI;
use std::fmt;

use ndarray::{arr2, Array2};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_Z0;
use crate::error::{CalibrationError, FrequencyPoint, NetworkError};
use crate::network::Network;

/// Physical kind of a calibration standard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StandardKind {
    Short,
    Open,
    Load,
    Through,
}

impl StandardKind {
    /// Port count of the standard's S-matrix
    pub fn nports(&self) -> usize {
        match self {
            StandardKind::Through => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for StandardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StandardKind::Short => "short",
            StandardKind::Open => "open",
            StandardKind::Load => "load",
            StandardKind::Through => "through",
        };
        f.write_str(name)
    }
}

/// One standard measurement of a calibration, with 1-based port numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StandardSlot {
    Short(usize),
    Open(usize),
    Load(usize),
    Through(usize, usize),
    /// Crosstalk measurement with loads on both ports
    Isolation(usize, usize),
}

impl StandardSlot {
    pub fn reflect(kind: StandardKind, port: usize) -> Option<Self> {
        match kind {
            StandardKind::Short => Some(StandardSlot::Short(port)),
            StandardKind::Open => Some(StandardSlot::Open(port)),
            StandardKind::Load => Some(StandardSlot::Load(port)),
            StandardKind::Through => None,
        }
    }

    /// The standard definition this slot is evaluated against.
    ///
    /// Isolation uses the load standards already connected and needs no
    /// definition of its own.
    pub fn kind(&self) -> Option<StandardKind> {
        match self {
            StandardSlot::Short(_) => Some(StandardKind::Short),
            StandardSlot::Open(_) => Some(StandardKind::Open),
            StandardSlot::Load(_) => Some(StandardKind::Load),
            StandardSlot::Through(..) => Some(StandardKind::Through),
            StandardSlot::Isolation(..) => None,
        }
    }

    /// Instrument ports involved, in measurement order
    pub fn ports(&self) -> Vec<usize> {
        match *self {
            StandardSlot::Short(p) | StandardSlot::Open(p) | StandardSlot::Load(p) => vec![p],
            StandardSlot::Through(a, b) | StandardSlot::Isolation(a, b) => vec![a, b],
        }
    }
}

impl fmt::Display for StandardSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StandardSlot::Short(p) => write!(f, "short@port{}", p),
            StandardSlot::Open(p) => write!(f, "open@port{}", p),
            StandardSlot::Load(p) => write!(f, "load@port{}", p),
            StandardSlot::Through(a, b) => write!(f, "through@port{}-{}", a, b),
            StandardSlot::Isolation(a, b) => write!(f, "isolation@port{}-{}", a, b),
        }
    }
}

/// Offset transmission line in front of a standard's termination
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffsetLine {
    /// One-way delay in seconds
    pub delay_s: f64,
    /// Loss in ohm/s at 1 GHz
    pub loss_ohm_per_s: f64,
    /// Characteristic impedance in ohms
    pub z0: f64,
}

impl Default for OffsetLine {
    fn default() -> Self {
        Self {
            delay_s: 0.0,
            loss_ohm_per_s: 0.0,
            z0: DEFAULT_Z0,
        }
    }
}

impl OffsetLine {
    /// Complex characteristic impedance and `gamma * length` at `hz`
    fn at(&self, hz: f64) -> (Complex64, Complex64) {
        if hz <= 0.0 {
            return (Complex64::new(self.z0, 0.0), Complex64::new(0.0, 0.0));
        }
        let skin = (hz / 1e9).sqrt();
        let alpha_l = self.loss_ohm_per_s * self.delay_s / (2.0 * self.z0) * skin;
        let beta_l = 2.0 * PI * hz * self.delay_s + alpha_l;
        let zc = Complex64::new(self.z0, 0.0)
            + Complex64::new(1.0, -1.0) * (self.loss_ohm_per_s / (4.0 * PI * hz)) * skin;
        (zc, Complex64::new(alpha_l, beta_l))
    }
}

/// Polynomial standard model in SI units
///
/// Open: fringing capacitance `C0 + C1 f + C2 f^2 + C3 f^3` (F).
/// Short: inductance `L0 + L1 f + L2 f^2 + L3 f^3` (H).
/// Load: resistance (ohm). Through: offset line only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParametricStandard {
    pub capacitance: [f64; 4],
    pub inductance: [f64; 4],
    pub resistance: f64,
    pub offset: OffsetLine,
}

impl Default for ParametricStandard {
    fn default() -> Self {
        Self {
            capacitance: [0.0; 4],
            inductance: [0.0; 4],
            resistance: DEFAULT_Z0,
            offset: OffsetLine::default(),
        }
    }
}

fn poly(c: &[f64; 4], x: f64) -> f64 {
    c.iter().rev().fold(0.0, |acc, &k| acc * x + k)
}

impl ParametricStandard {
    /// S-matrix of the standard at `hz`, referenced to the system impedance
    pub fn evaluate(&self, kind: StandardKind, hz: f64) -> Array2<Complex64> {
        let (zc, gamma_l) = self.offset.at(hz);
        let z0 = Complex64::new(DEFAULT_Z0, 0.0);
        let one = Complex64::new(1.0, 0.0);
        let omega = 2.0 * PI * hz;

        // Termination reflection relative to the offset line impedance
        let gamma_t = match kind {
            StandardKind::Open => {
                let jwcz = Complex64::new(0.0, omega * poly(&self.capacitance, hz)) * zc;
                (one - jwcz) / (one + jwcz)
            }
            StandardKind::Short => {
                let zl = Complex64::new(0.0, omega * poly(&self.inductance, hz));
                (zl - zc) / (zl + zc)
            }
            StandardKind::Load => {
                let r = Complex64::new(self.resistance, 0.0);
                (r - zc) / (r + zc)
            }
            StandardKind::Through => {
                let g1 = (zc - z0) / (zc + z0);
                let e = (-gamma_l).exp();
                let den = one - g1 * g1 * e * e;
                let s11 = g1 * (one - e * e) / den;
                let s21 = e * (one - g1 * g1) / den;
                return arr2(&[[s11, s21], [s21, s11]]);
            }
        };

        // Move the reference plane through the offset line, then to z0
        let g = gamma_t * (-gamma_l * 2.0).exp();
        let gamma = (zc * (one + g) - z0 * (one - g)) / (zc * (one + g) + z0 * (one - g));
        arr2(&[[gamma]])
    }
}

/// How a standard's response is known
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StandardModel {
    /// Fixed reflection, or the transmission of a matched through
    Ideal(Complex64),
    Parametric(ParametricStandard),
    /// Characterization data; only its exact frequency points are defined
    Tabulated(Network),
}

/// A calibration standard owned by a kit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardDefinition {
    kind: StandardKind,
    model: StandardModel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    override_data: Option<Network>,
}

impl StandardDefinition {
    pub fn new(kind: StandardKind, model: StandardModel) -> Result<Self, CalibrationError> {
        if let StandardModel::Tabulated(data) = &model {
            data.ensure_nports(kind.nports(), "tabulated standard data")?;
        }
        Ok(Self {
            kind,
            model,
            override_data: None,
        })
    }

    pub fn ideal(kind: StandardKind, value: Complex64) -> Self {
        Self {
            kind,
            model: StandardModel::Ideal(value),
            override_data: None,
        }
    }

    /// Attach instrument-specific data that takes precedence where defined
    pub fn with_override(mut self, data: Network) -> Result<Self, CalibrationError> {
        data.ensure_nports(self.kind.nports(), "standard override data")?;
        self.override_data = Some(data);
        Ok(self)
    }

    pub fn kind(&self) -> StandardKind {
        self.kind
    }

    pub fn model(&self) -> &StandardModel {
        &self.model
    }

    pub fn override_data(&self) -> Option<&Network> {
        self.override_data.as_ref()
    }

    /// Actual S-matrix of the standard at one sweep point.
    ///
    /// `slot` only labels errors.
    pub fn s_at(
        &self,
        slot: StandardSlot,
        point: FrequencyPoint,
    ) -> Result<Array2<Complex64>, CalibrationError> {
        if let Some(data) = &self.override_data {
            if let Some(i) = data.frequency().index_of(point.hz) {
                return Ok(data.s_at(i).to_owned());
            }
        }

        match &self.model {
            StandardModel::Ideal(value) => Ok(match self.kind {
                StandardKind::Through => {
                    let zero = Complex64::new(0.0, 0.0);
                    arr2(&[[zero, *value], [*value, zero]])
                }
                _ => arr2(&[[*value]]),
            }),
            StandardModel::Parametric(p) => Ok(p.evaluate(self.kind, point.hz)),
            StandardModel::Tabulated(data) => data
                .frequency()
                .index_of(point.hz)
                .map(|i| data.s_at(i).to_owned())
                .ok_or_else(|| CalibrationError::MissingStandardData {
                    standard: slot.to_string(),
                    point,
                }),
        }
    }

    /// Reflection coefficient of a one-port standard at one sweep point
    pub fn reflection_at(
        &self,
        slot: StandardSlot,
        point: FrequencyPoint,
    ) -> Result<Complex64, CalibrationError> {
        if self.kind == StandardKind::Through {
            return Err(NetworkError::PortMismatch {
                context: "reflection standard",
                expected: 1,
                found: 2,
            }
            .into());
        }
        Ok(self.s_at(slot, point)?[[0, 0]])
    }
}
