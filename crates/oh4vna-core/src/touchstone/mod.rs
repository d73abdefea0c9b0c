//! Touchstone file I/O module
//!
//! Provides reading and writing of Touchstone (.snp) files.

pub mod parser;
pub mod writer;

pub use parser::{SParamFormat, Touchstone, TouchstoneError};
