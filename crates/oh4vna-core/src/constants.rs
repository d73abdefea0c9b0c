//! Numerical constants for network algebra and calibration
//!
//! Provides standardized tolerance values and instrument defaults
//! used throughout the library.

/// Default relative tolerance for singular-network detection.
///
/// A conversion pivot is treated as zero when its magnitude is at or below
/// `DEFAULT_SINGULARITY_EPS * max|element|` of the matrix being converted.
pub const DEFAULT_SINGULARITY_EPS: f64 = 1e-9;

/// Default reference impedance in ohms.
pub const DEFAULT_Z0: f64 = 50.0;

/// Default validity window of a calibration record, in hours.
pub const DEFAULT_CAL_VALIDITY_HOURS: i64 = 8;
