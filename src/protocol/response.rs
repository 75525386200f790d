//! Classification of analyzer reply lines.
//!
//! The XL2 does not tag its replies, so the kind of a line is inferred from its shape:
//!
//! | Kind            | Rule                                                   |
//! |-----------------|--------------------------------------------------------|
//! | Identification  | contains a product keyword                             |
//! | Frequency table | comma list, more than 10 fields, contains `Hz`         |
//! | Spectrum        | comma list, more than 10 fields, no `Hz`               |
//! | Single value    | contains `dB`                                          |
//!
//! The spectrum rule is purely structural. Any long comma-separated line that is not
//! a frequency table is taken as a spectrum, including a verbose NMEA sentence read
//! from the wrong port; unparseable fields come through as NaN.

/// Substrings that identify an XL2 `*IDN?` reply.
pub const PRODUCT_KEYWORDS: [&str; 2] = ["XL2", "NTi"];
/// Unit that marks a frequency table.
pub const FREQUENCY_UNIT: &str = "Hz";
/// Unit that marks a level reading.
pub const DECIBEL_UNIT: &str = "dB";

/// A list needs more than this many fields to be a table or a spectrum.
pub const MIN_LIST_FIELDS: usize = 10;

/// One classified reply line.
#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    /// Reply to `*IDN?`
    Identification(String),
    /// Bin frequencies in Hz
    FrequencyTable(Vec<f64>),
    /// Levels in dB, one per bin
    Spectrum(Vec<f64>),
    /// A single level in dB
    SingleValue(f64),
    /// Anything else, including blank lines
    Unknown,
}

/// Whether `line` looks like an XL2 identification reply.
pub fn is_identification(line: &str) -> bool {
    PRODUCT_KEYWORDS.iter().any(|k| line.contains(k))
}

/// Leading number of a field such as `"-42.10 dB"`; NaN when there is none.
fn parse_field(field: &str) -> f64 {
    field
        .split_whitespace()
        .next()
        .and_then(|token| token.parse::<f64>().ok())
        .unwrap_or(f64::NAN)
}

/// Classifies one reply line.
pub fn parse_response(line: &str) -> Response {
    let line = line.trim();
    if line.is_empty() {
        return Response::Unknown;
    }

    if is_identification(line) {
        return Response::Identification(line.to_string());
    }

    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() > MIN_LIST_FIELDS {
        let values = fields.iter().map(|f| parse_field(f)).collect();
        return if line.contains(FREQUENCY_UNIT) {
            Response::FrequencyTable(values)
        } else {
            Response::Spectrum(values)
        };
    }

    if line.contains(DECIBEL_UNIT) {
        let value = parse_field(line);
        if value.is_finite() {
            return Response::SingleValue(value);
        }
    }

    Response::Unknown
}

/// Index of the bin for `target_hz`.
///
/// Bin 0 wins outright when it lies within `tolerance_hz` of the target. Otherwise the
/// bin minimizing `|f - target|` is chosen; on a tie the later bin wins. NaN bins are
/// never chosen. `None` only for a table without any usable bin.
pub fn find_target_bin(frequencies: &[f64], target_hz: f64, tolerance_hz: f64) -> Option<usize> {
    let first = *frequencies.first()?;
    if (first - target_hz).abs() <= tolerance_hz {
        return Some(0);
    }

    let mut best: Option<(usize, f64)> = None;
    for (index, frequency) in frequencies.iter().enumerate() {
        let distance = (frequency - target_hz).abs();
        if distance.is_nan() {
            continue;
        }
        match best {
            Some((_, closest)) if distance > closest => {}
            _ => best = Some((index, distance)),
        }
    }
    best.map(|(index, _)| index)
}
