//! Active port probing.
//!
//! Two role tests, both bounded in time:
//!
//! - **XL2**: open at the analyzer baud rate, send `*IDN?`, take the first line back.
//! - **GPS**: open and listen for a line starting with a known sentence prefix. The
//!   primary baud rates are raced concurrently and the first one to hear a sentence
//!   wins; the fallback rates are then tried one at a time.
//!
//! Every link is dropped as soon as its test ends (success, timeout or error), which
//! closes the port even when a read was still pending.

use crate::config::DiscoverySettings;
use crate::error::{RigError, RigResult};
use crate::hardware::serial::open_with_timeout;
use crate::hardware::{PortDescriptor, SerialConnector};
use crate::protocol::commands::IDENTIFY;
use crate::protocol::gps::is_gps_sentence;
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tracing::{debug, trace};

/// A GPS sentence heard on a port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GpsHit {
    /// The sentence, trimmed
    pub sentence: String,
    /// Baud rate it was heard at
    pub baud_rate: u32,
}

/// Talks to a port to find out what is attached.
#[async_trait]
pub trait PortProber: Send + Sync {
    /// First line returned for the identification query.
    async fn identify_xl2(&self, port: &PortDescriptor) -> RigResult<String>;

    /// First positioning sentence heard at any supported baud rate.
    async fn listen_gps(&self, port: &PortDescriptor) -> RigResult<GpsHit>;
}

/// [`PortProber`] over a [`SerialConnector`].
pub struct SerialProber {
    connector: Arc<dyn SerialConnector>,
    settings: DiscoverySettings,
}

impl SerialProber {
    /// Prober opening ports through `connector`.
    pub fn new(connector: Arc<dyn SerialConnector>, settings: DiscoverySettings) -> Self {
        Self {
            connector,
            settings,
        }
    }

    async fn listen_at(&self, path: &str, baud_rate: u32) -> RigResult<GpsHit> {
        let mut link = open_with_timeout(
            self.connector.as_ref(),
            path,
            baud_rate,
            self.settings.open_timeout(),
        )
        .await?;

        let heard = link
            .read_line_matching(self.settings.gps_listen(), is_gps_sentence)
            .await;
        drop(link);

        match heard? {
            Some(sentence) => Ok(GpsHit {
                sentence,
                baud_rate,
            }),
            None => Err(RigError::timeout(
                format!("GPS sentence on {path} at {baud_rate} baud"),
                self.settings.gps_listen(),
            )),
        }
    }
}

#[async_trait]
impl PortProber for SerialProber {
    async fn identify_xl2(&self, port: &PortDescriptor) -> RigResult<String> {
        let limit = self.settings.identify_timeout();
        let mut link = open_with_timeout(
            self.connector.as_ref(),
            &port.path,
            self.settings.xl2_baud_rate,
            self.settings.open_timeout(),
        )
        .await?;

        link.write_line(IDENTIFY).await?;
        let reply = link.read_line_matching(limit, |_| true).await;
        drop(link);

        match reply? {
            Some(line) => {
                debug!(port = %port.path, response = %line, "identification reply");
                Ok(line)
            }
            None => Err(RigError::timeout(
                format!("reply to {IDENTIFY} on {}", port.path),
                limit,
            )),
        }
    }

    async fn listen_gps(&self, port: &PortDescriptor) -> RigResult<GpsHit> {
        let path = port.path.as_str();
        let mut last_error = None;
        let mut retry = Vec::new();

        {
            let mut race: FuturesUnordered<_> = self
                .settings
                .gps_primary_bauds
                .iter()
                .map(|&baud| async move { (baud, self.listen_at(path, baud).await) })
                .collect();

            while let Some((baud, result)) = race.next().await {
                match result {
                    Ok(hit) => {
                        debug!(port = %path, baud_rate = baud, "GPS sentence heard");
                        return Ok(hit);
                    }
                    Err(e) => {
                        trace!(port = %path, baud_rate = baud, error = %e, "GPS listen failed");
                        // Concurrent opens of one device can collide; try those again alone
                        if e.is_port_failure() {
                            retry.push(baud);
                        }
                        last_error = Some(e);
                    }
                }
            }
        }

        let sequential = retry
            .into_iter()
            .chain(self.settings.gps_fallback_bauds.iter().copied());
        for baud in sequential {
            match self.listen_at(path, baud).await {
                Ok(hit) => {
                    debug!(port = %path, baud_rate = baud, "GPS sentence heard");
                    return Ok(hit);
                }
                Err(e) => {
                    trace!(port = %path, baud_rate = baud, error = %e, "GPS listen failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            RigError::timeout(format!("GPS sentence on {path}"), self.settings.gps_listen())
        }))
    }
}
