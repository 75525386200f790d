//! Tracing initialization.
//!
//! `RUST_LOG` takes precedence when set, so fine-grained filters such as
//! `RUST_LOG=xl2_daq::discovery=trace` keep working. Otherwise the configured
//! `application.log_level` applies to the whole process.

use crate::config::{ApplicationSettings, LogFormat};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the global tracing subscriber.
///
/// # Errors
///
/// Fails if a global subscriber is already installed or the filter does not parse.
pub fn init(settings: &ApplicationSettings) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.log_level)?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    match settings.log_format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true))
            .try_init()?,
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init()?,
    }

    tracing::debug!(
        app = %settings.name,
        level = %settings.log_level,
        "tracing initialized"
    );
    Ok(())
}
