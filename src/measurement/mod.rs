//! Analyzer measurements and their bounded history.

pub mod history;

pub use history::MeasurementHistory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a measurement line carried.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementKind {
    /// One level reading (e.g. "-42.1 dB")
    SingleValue,
    /// One level per frequency bin
    Spectrum,
}

/// A single reading received from the analyzer. Immutable once recorded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// UTC timestamp when the line was received
    pub timestamp: DateTime<Utc>,
    /// The line as received
    pub raw: String,
    /// Reading or spectrum
    pub kind: MeasurementKind,
    /// Parsed values; a single element for `SingleValue`
    pub values: Vec<f64>,
    /// Level at the target-frequency bin, when a bin is known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_value: Option<f64>,
    /// Index of the target-frequency bin
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_index: Option<usize>,
}

impl Measurement {
    /// Reading holding one level.
    pub fn single_value(raw: impl Into<String>, value: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            raw: raw.into(),
            kind: MeasurementKind::SingleValue,
            values: vec![value],
            target_value: None,
            target_index: None,
        }
    }

    /// Builds a spectrum measurement, extracting the level at `target_index` if that
    /// bin exists in `values`.
    pub fn spectrum(raw: impl Into<String>, values: Vec<f64>, target_index: Option<usize>) -> Self {
        let target_index = target_index.filter(|&i| i < values.len());
        let target_value = target_index.map(|i| values[i]);
        Self {
            timestamp: Utc::now(),
            raw: raw.into(),
            kind: MeasurementKind::Spectrum,
            values,
            target_value,
            target_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spectrum_extracts_target_bin() {
        let m = Measurement::spectrum("raw", vec![-10.0, -20.0, -30.0], Some(1));
        assert_eq!(m.kind, MeasurementKind::Spectrum);
        assert_eq!(m.target_value, Some(-20.0));
        assert_eq!(m.target_index, Some(1));
    }

    #[test]
    fn test_spectrum_ignores_out_of_range_bin() {
        let m = Measurement::spectrum("raw", vec![-10.0, -20.0], Some(5));
        assert_eq!(m.target_value, None);
        assert_eq!(m.target_index, None);
    }

    #[test]
    fn test_serializes_kind_snake_case() {
        let m = Measurement::single_value("-42.0 dB", -42.0);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["kind"], "single_value");
        assert!(json.get("target_value").is_none());
    }
}
