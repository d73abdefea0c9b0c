//! Touchstone file writer
//!
//! Writes S-parameter data in Touchstone v1 layout. RI values use the
//! shortest representation that parses back to the same `f64`.

use num_complex::Complex64;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::parser::{SParamFormat, Touchstone, TouchstoneError};
use crate::math::conversions::{complex_2_db, complex_2_degree};

impl fmt::Display for Touchstone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for comment in &self.comments {
            writeln!(f, "! {}", comment)?;
        }

        let format = match self.format {
            SParamFormat::RI => "RI",
            SParamFormat::MA => "MA",
            SParamFormat::DB => "DB",
        };
        let z0 = self.z0.first().copied().unwrap_or(crate::constants::DEFAULT_Z0);
        writeln!(
            f,
            "# {} S {} R {}",
            self.frequency.unit().touchstone_name(),
            format,
            z0
        )?;

        for (freq, matrix) in self.frequency.f_scaled().iter().zip(self.s.iter()) {
            write!(f, "{}", freq)?;
            for (k, (i, j)) in self.write_order().into_iter().enumerate() {
                // Wrap records of 3+ ports after each matrix row
                if self.nports > 2 && k > 0 && k % self.nports == 0 {
                    writeln!(f)?;
                }
                let (v1, v2) = self.format_complex(matrix[i][j]);
                write!(f, " {:e} {:e}", v1, v2)?;
            }
            writeln!(f)?;
        }

        Ok(())
    }
}

impl Touchstone {
    /// Write to a Touchstone file
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), TouchstoneError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)
    }

    /// Write to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), TouchstoneError> {
        write!(writer, "{}", self)?;
        writer.flush()?;
        Ok(())
    }

    // 2-port data is written S11 S21 S12 S22, everything else row-major
    fn write_order(&self) -> Vec<(usize, usize)> {
        let n = self.nports;
        if n == 2 {
            vec![(0, 0), (1, 0), (0, 1), (1, 1)]
        } else {
            (0..n).flat_map(|i| (0..n).map(move |j| (i, j))).collect()
        }
    }

    fn format_complex(&self, c: Complex64) -> (f64, f64) {
        match self.format {
            SParamFormat::RI => (c.re, c.im),
            SParamFormat::MA => (c.norm(), complex_2_degree(c)),
            SParamFormat::DB => (complex_2_db(c), complex_2_degree(c)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frequency::{Frequency, FrequencyUnit};

    fn sample(nports: usize) -> Touchstone {
        let frequency = Frequency::from_f(vec![1.0, 1.5], FrequencyUnit::GHz).unwrap();
        let s = (0..2)
            .map(|f| {
                (0..nports)
                    .map(|i| {
                        (0..nports)
                            .map(|j| {
                                let re = 0.1 * (i + 1) as f64 / 3.0;
                                Complex64::new(re, -0.01 * (j + f) as f64)
                            })
                            .collect()
                    })
                    .collect()
            })
            .collect();
        Touchstone {
            nports,
            frequency,
            s,
            z0: vec![50.0; nports],
            comments: vec!["written by test".into()],
            format: SParamFormat::RI,
        }
    }

    #[test]
    fn test_ri_output_parses_back_exactly() {
        for nports in [1, 2, 3] {
            let ts = sample(nports);
            let text = ts.to_string();
            let back = Touchstone::from_str(&text, nports).unwrap();
            assert_eq!(back.s, ts.s);
            assert_eq!(back.comments, ts.comments);
            assert_eq!(back.frequency, ts.frequency);
        }
    }

    #[test]
    fn test_option_line() {
        let text = sample(1).to_string();
        assert!(text.contains("# GHZ S RI R 50"));
    }
}
