//! Raw and corrected measurement traces

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::kit::{CalibrationMethod, KitRef};
use crate::error::{CalibrationError, NetworkError};
use crate::frequency::Frequency;
use crate::network::Network;

/// Uncorrected instrument response.
///
/// Port `i` of the network is instrument port `ports[i]` (1-based).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTraceRepr")]
pub struct RawTrace {
    network: Network,
    ports: Vec<usize>,
}

#[derive(Deserialize)]
struct RawTraceRepr {
    network: Network,
    ports: Vec<usize>,
}

impl TryFrom<RawTraceRepr> for RawTrace {
    type Error = NetworkError;

    fn try_from(repr: RawTraceRepr) -> Result<Self, Self::Error> {
        RawTrace::new(repr.network, repr.ports)
    }
}

impl RawTrace {
    pub fn new(network: Network, ports: Vec<usize>) -> Result<Self, NetworkError> {
        if ports.len() != network.nports() {
            return Err(NetworkError::PortMismatch {
                context: "raw trace port map",
                expected: network.nports(),
                found: ports.len(),
            });
        }
        let mut sorted = ports.clone();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != ports.len() || sorted.first() == Some(&0) {
            return Err(NetworkError::Shape(format!(
                "instrument ports {:?} must be distinct and 1-based",
                ports
            )));
        }
        Ok(Self { network, ports })
    }

    /// Trace whose network ports are instrument ports 1..=n
    pub fn from_network(network: Network) -> Self {
        let ports = (1..=network.nports()).collect();
        Self { network, ports }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn into_network(self) -> Network {
        self.network
    }

    pub fn ports(&self) -> &[usize] {
        &self.ports
    }

    pub fn frequency(&self) -> &Frequency {
        self.network.frequency()
    }

    /// Network index of an instrument port
    pub fn index_of(&self, port: usize) -> Option<usize> {
        self.ports.iter().position(|&p| p == port)
    }

    /// `S[to][from]` at point `f`, addressed by instrument ports
    pub(crate) fn value(
        &self,
        to: usize,
        from: usize,
        f: usize,
        context: &str,
    ) -> Result<Complex64, CalibrationError> {
        let i = self.require(to, context)?;
        let j = self.require(from, context)?;
        Ok(self.network.s()[[f, i, j]])
    }

    pub(crate) fn require(&self, port: usize, context: &str) -> Result<usize, CalibrationError> {
        self.index_of(port).ok_or_else(|| CalibrationError::PortOutOfRange {
            port,
            context: format!("{} (trace ports {:?})", context, self.ports),
        })
    }
}

/// Where a corrected trace came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub calibration_id: Uuid,
    pub kit: KitRef,
    pub method: CalibrationMethod,
    /// Instrument ports the error model was applied to
    pub corrected_ports: Vec<usize>,
}

/// Error-corrected response; uncorrected ports pass through unchanged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectedTrace {
    network: Network,
    ports: Vec<usize>,
    provenance: Provenance,
}

impl CorrectedTrace {
    pub(crate) fn new(network: Network, ports: Vec<usize>, provenance: Provenance) -> Self {
        Self {
            network,
            ports,
            provenance,
        }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn into_network(self) -> Network {
        self.network
    }

    pub fn ports(&self) -> &[usize] {
        &self.ports
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frequency::FrequencyUnit;

    #[test]
    fn test_port_map_validation() {
        let freq = Frequency::from_f(vec![1.0], FrequencyUnit::GHz).unwrap();
        let thru = Network::thru(freq);
        assert!(RawTrace::new(thru.clone(), vec![2, 3]).is_ok());
        assert!(RawTrace::new(thru.clone(), vec![2, 2]).is_err());
        assert!(RawTrace::new(thru.clone(), vec![0, 1]).is_err());
        assert!(RawTrace::new(thru.clone(), vec![1]).is_err());

        let trace = RawTrace::new(thru, vec![3, 1]).unwrap();
        assert_eq!(trace.index_of(1), Some(1));
        assert!(trace.require(2, "test").is_err());
    }
}
