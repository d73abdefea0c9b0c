//! Mathematical functions module
//!
//! Provides the dB/phase conversions, small complex-matrix helpers and
//! scattering/transfer transforms used by the network algebra.

pub mod conversions;
pub mod matrix_ops;
pub mod transforms;

pub use conversions::*;
pub use transforms::{s2t, t2s, Tolerance};
