//! Network I/O functions
//!
//! Conversion between [`Network`] and Touchstone data.

use std::path::Path;

use super::core::Network;
use crate::touchstone::parser::{SParamFormat, Touchstone, TouchstoneError};

impl Network {
    /// Write the network to a Touchstone file
    ///
    /// # Arguments
    /// * `path` - Path to output file (should have .sNp extension)
    /// * `format` - Output format (RI, MA, or DB)
    pub fn write_touchstone<P: AsRef<Path>>(
        &self,
        path: P,
        format: SParamFormat,
    ) -> Result<(), TouchstoneError> {
        self.to_touchstone(format).write(path)
    }

    pub fn to_touchstone_contents(&self, format: SParamFormat) -> String {
        self.to_touchstone(format).to_string()
    }

    /// Convert Network to Touchstone data
    pub fn to_touchstone(&self, format: SParamFormat) -> Touchstone {
        let n = self.nports();
        let s = (0..self.nfreq())
            .map(|f| {
                (0..n)
                    .map(|i| (0..n).map(|j| self.s[[f, i, j]]).collect())
                    .collect()
            })
            .collect();

        // Touchstone v1 carries a single real reference impedance
        let z0 = self.z0.iter().map(|z| z.re).collect();

        let mut comments = Vec::new();
        if let Some(name) = &self.name {
            comments.push(name.clone());
        }
        comments.extend(self.comments.iter().cloned());

        Touchstone {
            nports: n,
            frequency: self.frequency.clone(),
            s,
            z0,
            comments,
            format,
        }
    }

    /// Touchstone extension for this port count, e.g. `s2p`
    pub fn touchstone_extension(&self) -> String {
        format!("s{}p", self.nports())
    }
}
