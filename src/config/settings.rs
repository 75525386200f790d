//! Strongly-typed settings loaded through Figment.

use crate::discovery::platform::PlatformKind;
use crate::discovery::scoring::ScoringWeights;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default location of the settings file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/xl2_daq.toml";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file or environment could not be merged or deserialized
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    /// A loaded value is out of range
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationSettings,
    /// Port discovery and classification
    #[serde(default)]
    pub discovery: DiscoverySettings,
    /// XL2 analyzer session
    #[serde(default)]
    pub xl2: Xl2Settings,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, with colours
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
    /// `production` or `development`; development adds error detail to API errors
    pub environment: String,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: "XL2 DAQ".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            environment: "production".to_string(),
            event_capacity: 1024,
        }
    }
}

impl ApplicationSettings {
    /// Whether API errors carry debug detail.
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }
}

/// Port discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    /// How long a classification result stays fresh
    pub cache_ttl_secs: u64,
    /// Bound on opening a port
    pub open_timeout_ms: u64,
    /// Bound on waiting for the `*IDN?` reply
    pub identify_timeout_ms: u64,
    /// Listening window for a GPS sentence at one baud rate
    pub gps_listen_ms: u64,
    /// Baud rates raced concurrently when listening for GPS
    pub gps_primary_bauds: Vec<u32>,
    /// Baud rates tried one after another when the race finds nothing
    pub gps_fallback_bauds: Vec<u32>,
    /// Baud rate used to probe the XL2
    pub xl2_baud_rate: u32,
    /// Platform profile selection
    #[serde(default)]
    pub platform: PlatformKind,
    /// Overrides the profile's permissive fallback when set
    #[serde(default)]
    pub permissive: Option<bool>,
    /// Confidence weights and thresholds
    #[serde(default)]
    pub weights: ScoringWeights,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 30,
            open_timeout_ms: 2000,
            identify_timeout_ms: 1500,
            gps_listen_ms: 2500,
            gps_primary_bauds: vec![9600, 4800],
            gps_fallback_bauds: vec![38400, 57600, 115200],
            xl2_baud_rate: 115200,
            platform: PlatformKind::Auto,
            permissive: None,
            weights: ScoringWeights::default(),
        }
    }
}

impl DiscoverySettings {
    /// [`Self::cache_ttl_secs`] as a duration.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// [`Self::open_timeout_ms`] as a duration.
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    /// [`Self::identify_timeout_ms`] as a duration.
    pub fn identify_timeout(&self) -> Duration {
        Duration::from_millis(self.identify_timeout_ms)
    }

    /// [`Self::gps_listen_ms`] as a duration.
    pub fn gps_listen(&self) -> Duration {
        Duration::from_millis(self.gps_listen_ms)
    }
}

/// XL2 analyzer session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Xl2Settings {
    /// Serial baud rate
    pub baud_rate: u32,
    /// Frequency of interest whose bin is extracted from every spectrum
    pub target_frequency_hz: f64,
    /// Tolerance for the exact-match check on the first bin
    pub frequency_tolerance_hz: f64,
    /// FFT zoom factor
    pub zoom: u32,
    /// FFT start frequency
    pub start_frequency_hz: f64,
    /// Continuous sampling interval
    pub interval_ms: u64,
    /// Number of measurements kept in history
    pub history_size: usize,
    /// Delay between initialization commands
    pub settle_ms: u64,
    /// Delay after `*RST`
    pub reset_settle_ms: u64,
    /// Bound on waiting for the frequency table
    pub response_timeout_ms: u64,
}

impl Default for Xl2Settings {
    fn default() -> Self {
        Self {
            baud_rate: 115200,
            target_frequency_hz: 12.5,
            frequency_tolerance_hz: 0.1,
            zoom: 1,
            start_frequency_hz: 0.0,
            interval_ms: 1500,
            history_size: 1000,
            settle_ms: 200,
            reset_settle_ms: 1000,
            response_timeout_ms: 3000,
        }
    }
}

impl Xl2Settings {
    /// [`Self::interval_ms`] as a duration.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// [`Self::settle_ms`] as a duration.
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// [`Self::reset_settle_ms`] as a duration.
    pub fn reset_settle(&self) -> Duration {
        Duration::from_millis(self.reset_settle_ms)
    }

    /// [`Self::response_timeout_ms`] as a duration.
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Settings {
    /// Load configuration from the default file and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment variables still apply.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file is malformed or validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings: Self = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("XL2DAQ_").split("__"))
            .extract()
            .map_err(|e| ConfigError::LoadError(Box::new(e)))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration after loading
    ///
    /// # Errors
    ///
    /// Returns a ConfigError with a descriptive message for any validation failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_environments = ["production", "development"];
        if !valid_environments.contains(&self.application.environment.to_ascii_lowercase().as_str())
        {
            return Err(ConfigError::ValidationError(format!(
                "Invalid environment '{}'. Must be one of: {}",
                self.application.environment,
                valid_environments.join(", ")
            )));
        }

        if self.application.event_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "event_capacity must be > 0".to_string(),
            ));
        }

        if self.discovery.gps_primary_bauds.is_empty() {
            return Err(ConfigError::ValidationError(
                "gps_primary_bauds cannot be empty".to_string(),
            ));
        }

        if self.discovery.weights.max_confidence > 100 {
            return Err(ConfigError::ValidationError(format!(
                "Invalid max_confidence {}. Must be 0-100",
                self.discovery.weights.max_confidence
            )));
        }

        if self.xl2.history_size == 0 {
            return Err(ConfigError::ValidationError(
                "xl2.history_size must be > 0".to_string(),
            ));
        }

        if self.xl2.interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "xl2.interval_ms must be > 0".to_string(),
            ));
        }

        crate::protocol::commands::validate_zoom(self.xl2.zoom)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        crate::protocol::commands::validate_frequency(self.xl2.target_frequency_hz)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        if !self.xl2.start_frequency_hz.is_finite() || self.xl2.start_frequency_hz < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "Invalid start_frequency_hz {}",
                self.xl2.start_frequency_hz
            )));
        }

        if !self.xl2.frequency_tolerance_hz.is_finite() || self.xl2.frequency_tolerance_hz < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "Invalid frequency_tolerance_hz {}",
                self.xl2.frequency_tolerance_hz
            )));
        }

        Ok(())
    }
}
