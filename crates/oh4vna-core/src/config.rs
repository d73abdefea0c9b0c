//! Application settings
//!
//! Precedence: environment (`OH4VNA_*`) > TOML file > defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationEngine;
use crate::constants::{DEFAULT_CAL_VALIDITY_HOURS, DEFAULT_SINGULARITY_EPS};
use crate::coupler::CouplerModel;
use crate::frequency::{Frequency, FrequencyUnit, SweepType};
use crate::instrument::SweepConfig;
use crate::math::transforms::Tolerance;
use crate::measurement::RetryPolicy;

/// Fewest sweep points the analyzer is configured with
pub const MIN_POINTS: usize = 11;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Use the simulated analyzer instead of hardware
    pub simulation: bool,
    pub data_root: PathBuf,
    /// VISA resource string of the hardware analyzer
    pub vna_address: Option<String>,
    pub vna_timeout_ms: u64,
    pub start_freq_hz: f64,
    pub stop_freq_hz: f64,
    pub points: usize,
    pub if_bandwidth_hz: f64,
    pub power_dbm: f64,
    pub cal_validity_hours: i64,
    /// Sweep attempts per measurement, including the first
    pub sweep_retries: u32,
    pub retry_backoff_ms: u64,
    pub singularity_eps: f64,
    pub coupler: CouplerModel,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            simulation: true,
            data_root: PathBuf::from("./data"),
            vna_address: None,
            vna_timeout_ms: 30_000,
            start_freq_hz: 1e6,
            stop_freq_hz: 6e9,
            points: 201,
            if_bandwidth_hz: 1000.0,
            power_dbm: -10.0,
            cal_validity_hours: DEFAULT_CAL_VALIDITY_HOURS,
            sweep_retries: 2,
            retry_backoff_ms: 250,
            singularity_eps: DEFAULT_SINGULARITY_EPS,
            coupler: CouplerModel::default(),
        }
    }
}

impl Settings {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Load from an optional file, apply environment overrides, validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `OH4VNA_*` overrides using `lookup` to read variables
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: String) -> Result<T> {
            value
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid {}: {:?}", key, value))
        }

        if let Some(v) = lookup("OH4VNA_SIMULATION") {
            self.simulation = match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => bail!("Invalid OH4VNA_SIMULATION: {:?}", v),
            };
        }
        if let Some(v) = lookup("OH4VNA_DATA_ROOT") {
            self.data_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("OH4VNA_VNA_ADDRESS") {
            self.vna_address = Some(v).filter(|a| !a.trim().is_empty());
        }
        if let Some(v) = lookup("OH4VNA_VNA_TIMEOUT") {
            self.vna_timeout_ms = parse("OH4VNA_VNA_TIMEOUT", v)?;
        }
        if let Some(v) = lookup("OH4VNA_START_FREQ") {
            self.start_freq_hz = parse("OH4VNA_START_FREQ", v)?;
        }
        if let Some(v) = lookup("OH4VNA_STOP_FREQ") {
            self.stop_freq_hz = parse("OH4VNA_STOP_FREQ", v)?;
        }
        if let Some(v) = lookup("OH4VNA_POINTS") {
            self.points = parse("OH4VNA_POINTS", v)?;
        }
        if let Some(v) = lookup("OH4VNA_IF_BW") {
            self.if_bandwidth_hz = parse("OH4VNA_IF_BW", v)?;
        }
        if let Some(v) = lookup("OH4VNA_POWER") {
            self.power_dbm = parse("OH4VNA_POWER", v)?;
        }
        if let Some(v) = lookup("OH4VNA_CAL_VALIDITY_HOURS") {
            self.cal_validity_hours = parse("OH4VNA_CAL_VALIDITY_HOURS", v)?;
        }
        if let Some(v) = lookup("OH4VNA_SWEEP_RETRIES") {
            self.sweep_retries = parse("OH4VNA_SWEEP_RETRIES", v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.points < MIN_POINTS {
            bail!("points must be at least {}, got {}", MIN_POINTS, self.points);
        }
        if !(self.start_freq_hz >= 0.0 && self.start_freq_hz < self.stop_freq_hz) {
            bail!(
                "invalid frequency range {} Hz .. {} Hz",
                self.start_freq_hz,
                self.stop_freq_hz
            );
        }
        if !(self.if_bandwidth_hz > 0.0) {
            bail!("IF bandwidth must be positive, got {}", self.if_bandwidth_hz);
        }
        if self.cal_validity_hours <= 0 {
            bail!("calibration validity must be positive, got {} h", self.cal_validity_hours);
        }
        if self.sweep_retries == 0 {
            bail!("sweep_retries must allow at least one attempt");
        }
        if !(self.singularity_eps > 0.0) {
            bail!("singularity_eps must be positive, got {}", self.singularity_eps);
        }
        if !matches!(self.coupler.injection_port, 1 | 2) {
            bail!("coupler injection port must be 1 or 2, got {}", self.coupler.injection_port);
        }
        if !self.simulation && self.vna_address.is_none() {
            bail!("hardware mode needs vna_address (OH4VNA_VNA_ADDRESS)");
        }
        Ok(())
    }

    pub fn default_sweep(&self) -> Result<Frequency> {
        Frequency::new(
            self.start_freq_hz,
            self.stop_freq_hz,
            self.points,
            FrequencyUnit::Hz,
            SweepType::Linear,
        )
        .context("Invalid default sweep")
    }

    pub fn sweep_config(&self) -> Result<SweepConfig> {
        Ok(SweepConfig::new(self.default_sweep()?)
            .with_if_bandwidth(self.if_bandwidth_hz)
            .with_power(self.power_dbm))
    }

    pub fn tolerance(&self) -> Tolerance {
        Tolerance::new(self.singularity_eps)
    }

    pub fn engine(&self) -> CalibrationEngine {
        CalibrationEngine::new(self.tolerance(), chrono::Duration::hours(self.cal_validity_hours))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.sweep_retries, Duration::from_millis(self.retry_backoff_ms))
    }

    pub fn sweep_timeout(&self) -> Duration {
        Duration::from_millis(self.vna_timeout_ms)
    }
}
