//! Confidence scoring.
//!
//! Evidence accumulates additively and is capped at `max_confidence`. A reply that
//! carries the analyzer's product keyword, or a line with a known sentence prefix,
//! outweighs any amount of USB metadata.

use super::{DeviceRole, PlatformProfile, RoleSignatures};
use crate::hardware::PortDescriptor;
use serde::{Deserialize, Serialize};

/// Named weights and thresholds. All of them can be overridden from configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// Product keyword in an `*IDN?` reply, or a sentence prefix heard on the port
    pub response_match: u8,
    /// Manufacturer string matches a role signature
    pub manufacturer_match: u8,
    /// USB vendor id matches a role signature
    pub vendor_match: u8,
    /// USB product id matches (only counted together with the vendor id)
    pub product_match: u8,
    /// A hardware-only guess at or above this skips active probing
    pub fast_path_threshold: u8,
    /// Cap applied to every score
    pub max_confidence: u8,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            response_match: 70,
            manufacturer_match: 40,
            vendor_match: 35,
            product_match: 15,
            fast_path_threshold: 70,
            max_confidence: 100,
        }
    }
}

impl ScoringWeights {
    fn cap(&self, score: u32) -> u8 {
        let cap = self.max_confidence.min(100);
        score.min(u32::from(cap)) as u8
    }

    /// Hardware evidence for one role.
    pub fn hardware_score(&self, port: &PortDescriptor, signatures: &RoleSignatures) -> u8 {
        let mut score = 0u32;
        if signatures.manufacturer_matches(port) {
            score += u32::from(self.manufacturer_match);
        }
        if signatures.vendor_matches(port) {
            score += u32::from(self.vendor_match);
        }
        if signatures.product_matches(port) {
            score += u32::from(self.product_match);
        }
        self.cap(score)
    }

    /// Score after the port answered as `role`, on top of its hardware evidence.
    pub fn probe_score(&self, hardware_score: u8) -> u8 {
        self.cap(u32::from(self.response_match) + u32::from(hardware_score))
    }
}

/// Role suggested by USB metadata alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HardwareGuess {
    /// Role with the higher score, unknown when neither scored
    pub role: DeviceRole,
    /// Score of that role
    pub confidence: u8,
    /// Score as an XL2
    pub xl2_score: u8,
    /// Score as a GPS
    pub gps_score: u8,
}

impl HardwareGuess {
    /// Score as `role`; zero for unknown.
    pub fn score_for(&self, role: DeviceRole) -> u8 {
        match role {
            DeviceRole::Xl2 => self.xl2_score,
            DeviceRole::Gps => self.gps_score,
            DeviceRole::Unknown => 0,
        }
    }

    /// Role tests to run, most likely first.
    pub fn probe_order(&self) -> [DeviceRole; 2] {
        match self.role {
            DeviceRole::Gps => [DeviceRole::Gps, DeviceRole::Xl2],
            _ => [DeviceRole::Xl2, DeviceRole::Gps],
        }
    }
}

/// Scores `port` against both role signatures.
///
/// Equal non-zero scores resolve to the analyzer.
pub fn hardware_guess(
    port: &PortDescriptor,
    profile: &PlatformProfile,
    weights: &ScoringWeights,
) -> HardwareGuess {
    let xl2_score = weights.hardware_score(port, &profile.xl2);
    let gps_score = weights.hardware_score(port, &profile.gps);

    let (role, confidence) = if xl2_score == 0 && gps_score == 0 {
        (DeviceRole::Unknown, 0)
    } else if xl2_score >= gps_score {
        (DeviceRole::Xl2, xl2_score)
    } else {
        (DeviceRole::Gps, gps_score)
    };

    HardwareGuess {
        role,
        confidence,
        xl2_score,
        gps_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manufacturer_and_vendor_reach_fast_path() {
        let weights = ScoringWeights::default();
        let port = PortDescriptor::new("/dev/ttyACM0")
            .with_usb_ids(0x1a2b, 0x9999)
            .with_manufacturer("NTi Audio AG");

        let guess = hardware_guess(&port, &PlatformProfile::linux(), &weights);
        assert_eq!(guess.role, DeviceRole::Xl2);
        assert_eq!(guess.confidence, 75);
        assert!(guess.confidence >= weights.fast_path_threshold);
    }

    #[test]
    fn test_bridge_chip_alone_stays_below_threshold() {
        let weights = ScoringWeights::default();
        let port = PortDescriptor::new("/dev/ttyUSB0").with_usb_ids(0x067b, 0x2303);

        let guess = hardware_guess(&port, &PlatformProfile::linux(), &weights);
        assert_eq!(guess.role, DeviceRole::Gps);
        assert_eq!(guess.confidence, 50);
        assert!(guess.confidence < weights.fast_path_threshold);
        assert_eq!(guess.probe_order(), [DeviceRole::Gps, DeviceRole::Xl2]);
    }

    #[test]
    fn test_scores_are_capped() {
        let weights = ScoringWeights {
            max_confidence: 90,
            ..ScoringWeights::default()
        };
        assert_eq!(weights.probe_score(75), 90);

        let uncapped = ScoringWeights {
            response_match: 255,
            max_confidence: 255,
            ..ScoringWeights::default()
        };
        assert_eq!(uncapped.probe_score(255), 100);
    }

    #[test]
    fn test_no_evidence_is_unknown() {
        let guess = hardware_guess(
            &PortDescriptor::new("/dev/ttyUSB7"),
            &PlatformProfile::linux(),
            &ScoringWeights::default(),
        );
        assert_eq!(guess.role, DeviceRole::Unknown);
        assert_eq!(guess.confidence, 0);
        assert_eq!(guess.probe_order(), [DeviceRole::Xl2, DeviceRole::Gps]);
    }
}
