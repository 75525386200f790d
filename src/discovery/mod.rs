//! Device discovery and identification.
//!
//! Finds the XL2 analyzer and the GPS receiver among all serial ports on the host:
//!
//! 1. [`PlatformProfile`] narrows the enumerated ports to plausible candidates.
//! 2. [`scoring`] guesses a role from USB metadata alone; a confident guess is accepted
//!    without opening the port.
//! 3. Otherwise [`PortProber`] talks to the port (`*IDN?` for the analyzer, passive
//!    sentence listening for the GPS).
//! 4. [`DeviceClassifier`] runs all of this concurrently across ports, caches results,
//!    and ranks candidates per role.

pub mod cache;
pub mod classifier;
pub mod platform;
pub mod probe;
pub mod scoring;

pub use cache::ClassificationCache;
pub use classifier::{ClassificationReport, DeviceClassifier, ScanSummary};
pub use platform::{PlatformKind, PlatformProfile, RoleSignatures};
pub use probe::{GpsHit, PortProber, SerialProber};
pub use scoring::{HardwareGuess, ScoringWeights};

use crate::hardware::PortDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which device a port is believed to host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRole {
    /// NTi XL2 analyzer
    Xl2,
    /// GPS receiver
    Gps,
    /// Nothing identified
    Unknown,
}

impl DeviceRole {
    /// The roles the rig connects to.
    pub const CONNECTABLE: [DeviceRole; 2] = [DeviceRole::Xl2, DeviceRole::Gps];
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRole::Xl2 => write!(f, "xl2"),
            DeviceRole::Gps => write!(f, "gps"),
            DeviceRole::Unknown => write!(f, "unknown"),
        }
    }
}

/// How a candidate's role was decided.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    /// USB metadata alone, no port I/O
    Hardware,
    /// A reply or sentence read from the port
    Probe,
    /// Nothing matched
    None,
}

/// Outcome of classifying one port. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceCandidate {
    /// Port the candidate was built from
    pub port: PortDescriptor,
    /// Role assigned to the port
    pub role: DeviceRole,
    /// 0-100
    pub confidence: u8,
    /// Raw line read during the probe
    pub response: Option<String>,
    /// Why the port could not be identified
    pub error: Option<String>,
    /// How the role was decided
    pub method: DetectionMethod,
    /// Baud rate a GPS sentence was heard at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baud_rate: Option<u32>,
}

impl DeviceCandidate {
    /// Candidate for `role`, with `confidence` capped at 100.
    pub fn identified(
        port: PortDescriptor,
        role: DeviceRole,
        confidence: u8,
        method: DetectionMethod,
    ) -> Self {
        Self {
            port,
            role,
            confidence: confidence.min(100),
            response: None,
            error: None,
            method,
            baud_rate: None,
        }
    }

    /// Unidentified candidate, with the failure that prevented identification.
    pub fn unknown(port: PortDescriptor, error: Option<String>) -> Self {
        Self {
            port,
            role: DeviceRole::Unknown,
            confidence: 0,
            response: None,
            error,
            method: DetectionMethod::None,
            baud_rate: None,
        }
    }

    /// Attaches the raw reply read during the probe.
    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    /// Attaches the baud rate a GPS sentence was heard at.
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = Some(baud_rate);
        self
    }

    /// Path of the underlying port.
    pub fn path(&self) -> &str {
        &self.port.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_is_clamped() {
        let c = DeviceCandidate::identified(
            PortDescriptor::new("/dev/ttyACM0"),
            DeviceRole::Xl2,
            250,
            DetectionMethod::Probe,
        );
        assert_eq!(c.confidence, 100);
    }

    #[test]
    fn test_role_display_matches_serde() {
        for role in [DeviceRole::Xl2, DeviceRole::Gps, DeviceRole::Unknown] {
            let json = serde_json::to_value(role).unwrap();
            assert_eq!(json, role.to_string());
        }
    }
}
