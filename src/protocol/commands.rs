//! XL2 command set and input validation.
//!
//! Everything user-supplied is checked here before a byte goes out on the wire.

use crate::error::{RigError, RigResult};

/// Identification query.
pub const IDENTIFY: &str = "*IDN?";
/// Resets the analyzer to defaults.
pub const RESET: &str = "*RST";
/// Switches the measurement function to FFT.
pub const SELECT_FFT: &str = "MEAS:FUNC FFT";
/// Starts acquisition.
pub const START_ACQUISITION: &str = "INIT START";
/// Stops acquisition.
pub const STOP_ACQUISITION: &str = "INIT STOP";
/// Triggers one measurement.
pub const TRIGGER: &str = "MEAS:INIT";
/// Queries the FFT bin frequencies.
pub const QUERY_FREQUENCIES: &str = "MEAS:FFT:F?";
/// Queries the live FFT spectrum.
pub const QUERY_SPECTRUM: &str = "MEAS:FFT? LIVE";

/// Upper bound of the analyzer's FFT range.
pub const MAX_FREQUENCY_HZ: f64 = 24_000.0;
/// Largest FFT zoom factor.
pub const MAX_ZOOM: u32 = 32;
/// Longest command accepted by [`validate_command`].
pub const MAX_COMMAND_LEN: usize = 128;

/// Sets the FFT zoom factor.
pub fn zoom(level: u32) -> String {
    format!("MEAS:FFT:ZOOM {level}")
}

/// Sets the FFT start frequency.
pub fn start_frequency(hz: f64) -> String {
    format!("MEAS:FFT:FSTART {hz}")
}

/// Non-empty, no whitespace or control characters.
pub fn validate_port_path(path: &str) -> RigResult<()> {
    if path.is_empty() {
        return Err(RigError::Validation("port path is empty".into()));
    }
    if path.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(RigError::Validation(format!(
            "port path {path:?} contains whitespace or control characters"
        )));
    }
    Ok(())
}

/// Printable ASCII, no line terminators, bounded length.
pub fn validate_command(command: &str) -> RigResult<()> {
    if command.trim().is_empty() {
        return Err(RigError::Validation("command is empty".into()));
    }
    if command.len() > MAX_COMMAND_LEN {
        return Err(RigError::Validation(format!(
            "command is {} bytes, limit is {MAX_COMMAND_LEN}",
            command.len()
        )));
    }
    if !command.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err(RigError::Validation(format!(
            "command {command:?} must be printable ASCII without line breaks"
        )));
    }
    Ok(())
}

/// Target frequency: finite and within (0, 24 kHz].
pub fn validate_frequency(hz: f64) -> RigResult<()> {
    if !hz.is_finite() || hz <= 0.0 || hz > MAX_FREQUENCY_HZ {
        return Err(RigError::Validation(format!(
            "frequency {hz} Hz is outside (0, {MAX_FREQUENCY_HZ}]"
        )));
    }
    Ok(())
}

/// FFT start frequency: finite and within [0, 24 kHz).
pub fn validate_start_frequency(hz: f64) -> RigResult<()> {
    if !hz.is_finite() || hz < 0.0 || hz >= MAX_FREQUENCY_HZ {
        return Err(RigError::Validation(format!(
            "start frequency {hz} Hz is outside [0, {MAX_FREQUENCY_HZ})"
        )));
    }
    Ok(())
}

/// Zoom is a power of two from 1 to 32.
pub fn validate_zoom(level: u32) -> RigResult<()> {
    if level == 0 || level > MAX_ZOOM || !level.is_power_of_two() {
        return Err(RigError::Validation(format!(
            "zoom {level} must be a power of two between 1 and {MAX_ZOOM}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_path_validation() {
        assert!(validate_port_path("/dev/ttyUSB0").is_ok());
        assert!(validate_port_path("COM3").is_ok());
        assert!(validate_port_path("").is_err());
        assert!(validate_port_path("/dev/tty USB0").is_err());
        assert!(validate_port_path("/dev/ttyUSB0\n").is_err());
    }

    #[test]
    fn test_command_validation() {
        assert!(validate_command(QUERY_SPECTRUM).is_ok());
        assert!(validate_command("   ").is_err());
        assert!(validate_command("*RST\r\nINIT START").is_err());
        assert!(validate_command("MEAS:FUNC FFT°").is_err());
        assert!(validate_command(&"A".repeat(MAX_COMMAND_LEN + 1)).is_err());
    }

    #[test]
    fn test_frequency_bounds() {
        assert!(validate_frequency(12.5).is_ok());
        assert!(validate_frequency(MAX_FREQUENCY_HZ).is_ok());
        assert!(validate_frequency(0.0).is_err());
        assert!(validate_frequency(-5.0).is_err());
        assert!(validate_frequency(f64::NAN).is_err());
        assert!(validate_frequency(24_000.1).is_err());

        assert!(validate_start_frequency(0.0).is_ok());
        assert!(validate_start_frequency(MAX_FREQUENCY_HZ).is_err());
    }

    #[test]
    fn test_zoom_levels() {
        for level in [1, 2, 4, 8, 16, 32] {
            assert!(validate_zoom(level).is_ok(), "zoom {level}");
        }
        for level in [0, 3, 12, 64] {
            assert!(validate_zoom(level).is_err(), "zoom {level}");
        }
    }

    #[test]
    fn test_command_formatting() {
        assert_eq!(zoom(4), "MEAS:FFT:ZOOM 4");
        assert_eq!(start_frequency(0.0), "MEAS:FFT:FSTART 0");
        assert_eq!(start_frequency(12.5), "MEAS:FFT:FSTART 12.5");
    }
}
