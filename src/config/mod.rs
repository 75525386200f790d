//! Configuration System
//!
//! This module provides configuration management for the rig using Figment.
//!
//! # Configuration Sources
//!
//! Configuration is loaded from (in order of precedence):
//! 1. Environment variables prefixed with `XL2DAQ_`
//! 2. TOML configuration file (default: `config/xl2_daq.toml`)
//! 3. Built-in defaults
//!
//! # Example
//!
//! ```no_run
//! use xl2_daq::config::Settings;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::load()?;
//!     println!("App name: {}", settings.application.name);
//!     println!("Target frequency: {} Hz", settings.xl2.target_frequency_hz);
//!     Ok(())
//! }
//! ```
//!
//! # Environment Variables
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! XL2DAQ_APPLICATION__LOG_LEVEL=debug
//! XL2DAQ_XL2__TARGET_FREQUENCY_HZ=50
//! XL2DAQ_DISCOVERY__CACHE_TTL_SECS=10
//! ```

pub mod settings;

pub use settings::{
    ApplicationSettings, ConfigError, DiscoverySettings, LogFormat, Settings, Xl2Settings,
    DEFAULT_CONFIG_PATH,
};
