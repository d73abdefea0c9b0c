//! Frequency sweep grid
//!
//! A sweep is an ordered sequence of strictly increasing frequency points.
//! Two sweeps are compatible only when their point sets are identical;
//! nothing in this crate resamples or interpolates between sweeps.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::NetworkError;

/// Frequency construction errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrequencyError {
    #[error("a sweep needs at least one frequency point")]
    Empty,

    #[error("frequency point {index} is not finite and non-negative: {value}")]
    InvalidPoint { index: usize, value: f64 },

    #[error("frequency points must be strictly increasing (index {index}: {prev} >= {next})")]
    NotIncreasing { index: usize, prev: f64, next: f64 },

    #[error("unknown frequency unit '{0}'")]
    UnknownUnit(String),
}

/// Display unit of a sweep; points are always stored in Hz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FrequencyUnit {
    Hz,
    KHz,
    MHz,
    #[default]
    GHz,
    THz,
}

static UNITS: [(FrequencyUnit, &str, f64); 5] = [
    (FrequencyUnit::Hz, "HZ", 1.0),
    (FrequencyUnit::KHz, "KHZ", 1e3),
    (FrequencyUnit::MHz, "MHZ", 1e6),
    (FrequencyUnit::GHz, "GHZ", 1e9),
    (FrequencyUnit::THz, "THZ", 1e12),
];

impl FrequencyUnit {
    fn entry(&self) -> &'static (FrequencyUnit, &'static str, f64) {
        // every variant has a row
        UNITS.iter().find(|(u, _, _)| u == self).unwrap_or(&UNITS[0])
    }

    /// Hz per unit
    pub fn multiplier(&self) -> f64 {
        self.entry().2
    }

    /// Spelling used on Touchstone option lines
    pub fn touchstone_name(&self) -> &'static str {
        self.entry().1
    }
}

impl FromStr for FrequencyUnit {
    type Err = FrequencyError;

    /// Case-insensitive, e.g. `GHz`, `ghz` or `GHZ`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        UNITS
            .iter()
            .find(|(_, name, _)| *name == upper)
            .map(|(unit, _, _)| *unit)
            .ok_or_else(|| FrequencyError::UnknownUnit(s.to_string()))
    }
}

/// How the points of a sweep were laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SweepType {
    #[default]
    Linear,
    Log,
    /// Arbitrary point list
    Segment,
}

/// The points at which a network is known
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "FrequencyRepr")]
pub struct Frequency {
    /// Hz
    f: Vec<f64>,
    unit: FrequencyUnit,
    sweep_type: SweepType,
}

#[derive(Deserialize)]
struct FrequencyRepr {
    f: Vec<f64>,
    #[serde(default)]
    unit: FrequencyUnit,
    #[serde(default)]
    sweep_type: SweepType,
}

impl TryFrom<FrequencyRepr> for Frequency {
    type Error = FrequencyError;

    fn try_from(repr: FrequencyRepr) -> Result<Self, Self::Error> {
        Frequency::validated(repr.f, repr.unit, repr.sweep_type)
    }
}

impl PartialEq for Frequency {
    /// Exact point-set equality; the display unit and sweep type are not compared.
    fn eq(&self, other: &Self) -> bool {
        self.first_difference(other).is_none()
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mult = self.unit.multiplier();
        write!(
            f,
            "{}-{} {:?}, {} pts",
            self.start() / mult,
            self.stop() / mult,
            self.unit,
            self.npoints()
        )
    }
}

/// `n` points from `start` to `stop` inclusive, both in Hz
fn lay_out(start: f64, stop: f64, n: usize, sweep_type: SweepType) -> Vec<f64> {
    if n == 1 {
        return vec![start];
    }
    let last = (n - 1) as f64;
    match sweep_type {
        SweepType::Log => {
            let (a, b) = (start.ln(), stop.ln());
            (0..n).map(|k| (a + (b - a) * k as f64 / last).exp()).collect()
        }
        SweepType::Linear | SweepType::Segment => (0..n)
            .map(|k| start + (stop - start) * k as f64 / last)
            .collect(),
    }
}

impl Frequency {
    /// Evenly laid out sweep with `start` and `stop` given in `unit`.
    ///
    /// ```
    /// use oh4vna_core::frequency::{Frequency, FrequencyUnit, SweepType};
    /// let sweep = Frequency::new(1.0, 3.0, 3, FrequencyUnit::GHz, SweepType::Linear).unwrap();
    /// assert_eq!(sweep.f(), &[1e9, 2e9, 3e9]);
    /// ```
    pub fn new(
        start: f64,
        stop: f64,
        npoints: usize,
        unit: FrequencyUnit,
        sweep_type: SweepType,
    ) -> Result<Self, FrequencyError> {
        if npoints == 0 {
            return Err(FrequencyError::Empty);
        }
        let scale = unit.multiplier();
        let points = lay_out(start * scale, stop * scale, npoints, sweep_type);
        Self::validated(points, unit, sweep_type)
    }

    /// Arbitrary point list given in `unit`
    pub fn from_f(f: Vec<f64>, unit: FrequencyUnit) -> Result<Self, FrequencyError> {
        let scale = unit.multiplier();
        Self::validated(f.into_iter().map(|x| x * scale).collect(), unit, SweepType::Segment)
    }

    fn validated(
        f: Vec<f64>,
        unit: FrequencyUnit,
        sweep_type: SweepType,
    ) -> Result<Self, FrequencyError> {
        if f.is_empty() {
            return Err(FrequencyError::Empty);
        }
        let invalid = f.iter().enumerate().find(|(_, v)| !v.is_finite() || **v < 0.0);
        if let Some((index, &value)) = invalid {
            return Err(FrequencyError::InvalidPoint { index, value });
        }
        if let Some(i) = f.windows(2).position(|w| w[1] <= w[0]) {
            return Err(FrequencyError::NotIncreasing {
                index: i + 1,
                prev: f[i],
                next: f[i + 1],
            });
        }
        Ok(Self { f, unit, sweep_type })
    }

    /// Points in Hz
    #[inline]
    pub fn f(&self) -> &[f64] {
        &self.f
    }

    /// Points in the display unit
    pub fn f_scaled(&self) -> Vec<f64> {
        let scale = self.unit.multiplier();
        self.f.iter().map(|hz| hz / scale).collect()
    }

    #[inline]
    pub fn npoints(&self) -> usize {
        self.f.len()
    }

    /// First point in Hz
    #[inline]
    pub fn start(&self) -> f64 {
        self.f[0]
    }

    /// Last point in Hz
    #[inline]
    pub fn stop(&self) -> f64 {
        self.f[self.f.len() - 1]
    }

    #[inline]
    pub fn unit(&self) -> FrequencyUnit {
        self.unit
    }

    #[inline]
    pub fn sweep_type(&self) -> SweepType {
        self.sweep_type
    }

    /// Index of an exact frequency point, if present
    pub fn index_of(&self, hz: f64) -> Option<usize> {
        self.f.iter().position(|x| x.to_bits() == hz.to_bits())
    }

    fn first_difference(&self, other: &Frequency) -> Option<(usize, f64, f64)> {
        if self.npoints() != other.npoints() {
            return Some((self.npoints().min(other.npoints()), f64::NAN, f64::NAN));
        }
        self.f
            .iter()
            .zip(&other.f)
            .position(|(a, b)| a.to_bits() != b.to_bits())
            .map(|i| (i, self.f[i], other.f[i]))
    }

    /// Require an identical point set, naming the first difference.
    pub fn ensure_compatible(&self, other: &Frequency) -> Result<(), NetworkError> {
        if self.npoints() != other.npoints() {
            return Err(NetworkError::SweepMismatch(format!(
                "{} points vs {} points",
                self.npoints(),
                other.npoints()
            )));
        }
        match self.first_difference(other) {
            Some((index, a, b)) => Err(NetworkError::SweepMismatch(format!(
                "point {} differs: {} Hz vs {} Hz",
                index, a, b
            ))),
            None => Ok(()),
        }
    }
}
