//! Touchstone file parser
//!
//! Reads Touchstone v1 S-parameter files of any port count. Data records may
//! wrap across lines; values are buffered until a full frequency record
//! (`1 + 2 * nports^2` numbers) is available.

use num_complex::Complex64;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

use crate::constants::DEFAULT_Z0;
use crate::error::NetworkError;
use crate::frequency::{Frequency, FrequencyError, FrequencyUnit};
use crate::math::conversions::{dbdeg_2_reim, magdeg_2_reim};

/// Touchstone parsing errors
#[derive(Error, Debug)]
pub enum TouchstoneError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Invalid option line: {0}")]
    InvalidOption(String),

    #[error("Invalid file extension: expected .sNp format")]
    InvalidExtension,

    #[error("unsupported parameter type {0}: only S-parameters are read")]
    UnsupportedParameter(String),

    #[error("invalid frequency axis: {0}")]
    Frequency(#[from] FrequencyError),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// How each complex value is written as a pair of numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SParamFormat {
    /// Real, imaginary
    #[default]
    RI,
    /// Linear magnitude, degrees
    MA,
    /// dB, degrees
    DB,
}

impl std::str::FromStr for SParamFormat {
    type Err = TouchstoneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RI" => Ok(SParamFormat::RI),
            "MA" => Ok(SParamFormat::MA),
            "DB" => Ok(SParamFormat::DB),
            other => Err(TouchstoneError::InvalidOption(format!("unknown data format {}", other))),
        }
    }
}

impl SParamFormat {
    fn to_complex(self, v1: f64, v2: f64) -> Complex64 {
        match self {
            SParamFormat::RI => Complex64::new(v1, v2),
            SParamFormat::MA => magdeg_2_reim(v1, v2),
            SParamFormat::DB => dbdeg_2_reim(v1, v2),
        }
    }
}

/// Options parsed from the `#` line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptionLine {
    pub unit: FrequencyUnit,
    pub format: SParamFormat,
    pub z0: f64,
}

impl Default for OptionLine {
    /// Touchstone defaults: `# GHZ S MA R 50`
    fn default() -> Self {
        Self {
            unit: FrequencyUnit::GHz,
            format: SParamFormat::MA,
            z0: DEFAULT_Z0,
        }
    }
}

/// Contents of one `.sNp` file
#[derive(Debug, Clone)]
pub struct Touchstone {
    pub nports: usize,
    pub frequency: Frequency,
    /// `[point][row][col]`
    pub s: Vec<Vec<Vec<Complex64>>>,
    /// Ohms, one per port
    pub z0: Vec<f64>,
    /// `!` comment text, without the marker
    pub comments: Vec<String>,
    pub format: SParamFormat,
}

impl Touchstone {
    /// Read a file; the port count comes from its `.sNp` extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TouchstoneError> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or(TouchstoneError::InvalidExtension)?;
        let nports = Self::parse_extension(ext)?;

        let file = File::open(path)?;
        Self::parse(BufReader::new(file), nports)
    }

    /// Port count encoded in an `sNp` extension
    pub fn parse_extension(ext: &str) -> Result<usize, TouchstoneError> {
        let lower = ext.to_ascii_lowercase();
        lower
            .strip_prefix('s')
            .and_then(|rest| rest.strip_suffix('p'))
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .ok_or(TouchstoneError::InvalidExtension)
    }

    /// Parse in-memory content; `nports` stands in for the file extension.
    ///
    /// ```
    /// use oh4vna_core::touchstone::Touchstone;
    /// let content = "# GHz S RI R 50\n1.0 0.1 0.0 0.9 0.0 0.9 0.0 0.1 0.0";
    /// let ts = Touchstone::from_str(content, 2).unwrap();
    /// assert_eq!(ts.nfreq(), 1);
    /// ```
    pub fn from_str(content: &str, nports: usize) -> Result<Self, TouchstoneError> {
        Self::parse(std::io::Cursor::new(content), nports)
    }

    fn parse<R: BufRead>(reader: R, nports: usize) -> Result<Self, TouchstoneError> {
        let mut options: Option<OptionLine> = None;
        let mut comments = Vec::new();
        let mut pending: Vec<f64> = Vec::new();
        let mut freq_values: Vec<f64> = Vec::new();
        let mut last_line = 0;
        let mut raw: Vec<Vec<f64>> = Vec::new();
        let mut noise_block = false;
        let record_len = 1 + 2 * nports * nports;

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let line_no = index + 1;
            last_line = line_no;

            // Anything after '!' is a comment
            let (data, comment) = match line.find('!') {
                Some(pos) => (&line[..pos], Some(line[pos + 1..].trim())),
                None => (line.as_str(), None),
            };
            if let Some(comment) = comment {
                if !comment.is_empty() {
                    comments.push(comment.to_string());
                }
            }

            let data = data.trim();
            if data.is_empty() || noise_block {
                continue;
            }
            if data.starts_with('[') {
                return Err(TouchstoneError::Parse {
                    line: line_no,
                    message: "Touchstone 2.0 keywords are not supported".into(),
                });
            }
            if data.starts_with('#') {
                // Only the first option line counts
                if options.is_none() {
                    options = Some(Self::parse_option_line(data)?);
                }
                continue;
            }

            let values = data
                .split_whitespace()
                .map(|token| {
                    token.parse::<f64>().map_err(|_| TouchstoneError::Parse {
                        line: line_no,
                        message: format!("'{}' is not a number", token),
                    })
                })
                .collect::<Result<Vec<f64>, _>>()?;

            // 2-port files may append noise parameters, which restart the
            // frequency axis at a record boundary
            if nports == 2 && pending.is_empty() {
                if let (Some(&first), Some(&last)) = (values.first(), freq_values.last()) {
                    if first <= last {
                        noise_block = true;
                        continue;
                    }
                }
            }
            pending.extend(values);

            while pending.len() >= record_len {
                let record: Vec<f64> = pending.drain(..record_len).collect();
                freq_values.push(record[0]);
                raw.push(record);
            }
        }

        if !pending.is_empty() {
            return Err(TouchstoneError::Parse {
                line: last_line,
                message: format!(
                    "{} trailing values do not form a complete {}-port record",
                    pending.len(),
                    nports
                ),
            });
        }

        let options = options.unwrap_or_default();
        let s = raw
            .iter()
            .map(|record| Self::record_matrix(record, nports, options.format))
            .collect();
        let frequency = Frequency::from_f(freq_values, options.unit)?;

        Ok(Touchstone {
            nports,
            frequency,
            s,
            z0: vec![options.z0; nports],
            comments,
            format: options.format,
        })
    }

    // Data pairs follow the frequency value. 2-port files list
    // S11 S21 S12 S22; every other port count is row-major.
    fn record_matrix(record: &[f64], nports: usize, format: SParamFormat) -> Vec<Vec<Complex64>> {
        let mut m = vec![vec![Complex64::new(0.0, 0.0); nports]; nports];
        for (k, pair) in record[1..].chunks_exact(2).enumerate() {
            let (row, col) = if nports == 2 { (k % 2, k / 2) } else { (k / nports, k % nports) };
            m[row][col] = format.to_complex(pair[0], pair[1]);
        }
        m
    }

    /// Parse the option line (# Hz S RI R 50)
    pub fn parse_option_line(line: &str) -> Result<OptionLine, TouchstoneError> {
        let mut options = OptionLine::default();
        let mut parts = line.trim_start_matches('#').split_whitespace();

        while let Some(part) = parts.next() {
            let upper = part.to_uppercase();
            if let Ok(unit) = upper.parse::<FrequencyUnit>() {
                options.unit = unit;
            } else if let Ok(format) = upper.parse::<SParamFormat>() {
                options.format = format;
            } else if upper == "R" {
                let value = parts
                    .next()
                    .and_then(|v| v.parse::<f64>().ok())
                    .ok_or_else(|| TouchstoneError::InvalidOption(line.to_string()))?;
                options.z0 = value;
            } else if upper == "S" {
                continue;
            } else if matches!(upper.as_str(), "Y" | "Z" | "G" | "H") {
                return Err(TouchstoneError::UnsupportedParameter(upper));
            } else {
                return Err(TouchstoneError::InvalidOption(line.to_string()));
            }
        }

        Ok(options)
    }

    /// Get the number of frequency points
    pub fn nfreq(&self) -> usize {
        self.s.len()
    }
}
