//! GPS receiver link.
//!
//! Sentences are only recognized by prefix and forwarded as events; decoding belongs to
//! whichever NMEA parser sits downstream.

use crate::discovery::DeviceRole;
use crate::error::RigResult;
use crate::events::{EventSink, RigEvent};
use crate::hardware::serial::{open_with_timeout, LineReader};
use crate::hardware::SerialConnector;
use crate::protocol::commands::validate_port_path;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Talker prefixes of standard positioning sentences.
pub const GPS_SENTENCE_PREFIXES: [&str; 7] = ["$GP", "$GN", "$GL", "$GA", "$GB", "$BD", "$GQ"];

/// Whether `line` starts with a known talker prefix.
pub fn is_gps_sentence(line: &str) -> bool {
    let line = line.trim_start();
    GPS_SENTENCE_PREFIXES.iter().any(|p| line.starts_with(p))
}

/// Snapshot of the GPS link.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GpsStatus {
    /// Whether a port is open
    pub connected: bool,
    /// Open port
    pub port: Option<String>,
    /// Baud rate it was opened at
    pub baud_rate: Option<u32>,
    /// Sentences received since connecting
    pub sentences: u64,
    /// Most recent sentence
    pub last_sentence: Option<String>,
}

#[derive(Default)]
struct GpsData {
    port: Option<String>,
    baud_rate: Option<u32>,
    sentences: u64,
    last_sentence: Option<String>,
    reader: Option<JoinHandle<()>>,
    generation: u64,
}

struct Shared {
    sink: Arc<dyn EventSink>,
    data: Mutex<GpsData>,
}

impl GpsData {
    /// Forgets the current link, returning the port it was bound to.
    fn clear_link(&mut self) -> Option<String> {
        self.baud_rate = None;
        self.sentences = 0;
        self.last_sentence = None;
        self.port.take()
    }
}

impl Shared {
    async fn reset(&self) {
        let (port, reader) = {
            let mut data = self.data.lock().await;
            let reader = data.reader.take();
            (data.clear_link(), reader)
        };
        if let Some(reader) = reader {
            reader.abort();
        }
        self.announce_disconnected(port);
    }

    fn announce_disconnected(&self, port: Option<String>) {
        if port.is_none() {
            return;
        }
        info!(port = ?port, "GPS disconnected");
        self.sink.emit(RigEvent::Disconnected {
            role: DeviceRole::Gps,
            port,
        });
        self.sink.emit(RigEvent::ConnectionStatus {
            role: DeviceRole::Gps,
            connected: false,
            port: None,
        });
    }
}

async fn read_sentences(shared: Arc<Shared>, mut reader: LineReader, generation: u64) {
    let reason = loop {
        match reader.read_line().await {
            Ok(Some(line)) if is_gps_sentence(&line) => {
                {
                    let mut data = shared.data.lock().await;
                    data.sentences += 1;
                    data.last_sentence = Some(line.clone());
                }
                shared.sink.emit(RigEvent::GpsSentence {
                    port: reader.path().to_string(),
                    sentence: line,
                });
            }
            Ok(Some(line)) => trace!(port = %reader.path(), line = %line, "non-sentence line"),
            Ok(None) => break "GPS stream ended".to_string(),
            Err(e) => break e.to_string(),
        }
    };

    let port = {
        let mut data = shared.data.lock().await;
        // A newer connection owns the session now
        if data.generation != generation {
            return;
        }
        data.reader = None;
        data.clear_link()
    };
    if port.is_some() {
        warn!(port = %reader.path(), reason = %reason, "GPS lost");
        shared.sink.emit(RigEvent::Error {
            role: DeviceRole::Gps,
            code: "PORT_IO".to_string(),
            message: reason,
        });
        shared.announce_disconnected(port);
    }
}

/// Holds the connection to the GPS receiver.
pub struct GpsSession {
    connector: Arc<dyn SerialConnector>,
    default_baud: u32,
    open_timeout: Duration,
    shared: Arc<Shared>,
    connect_lock: Mutex<()>,
}

impl GpsSession {
    /// Session that opens ports through `connector` at `default_baud` unless told otherwise.
    pub fn new(
        connector: Arc<dyn SerialConnector>,
        sink: Arc<dyn EventSink>,
        default_baud: u32,
        open_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            default_baud,
            open_timeout,
            shared: Arc::new(Shared {
                sink,
                data: Mutex::new(GpsData::default()),
            }),
            connect_lock: Mutex::new(()),
        }
    }

    /// Connects to `path` at `baud_rate` (the default rate when `None`).
    ///
    /// Already connected to `path`: no-op. Connected elsewhere: that link is closed first.
    pub async fn connect(&self, path: &str, baud_rate: Option<u32>) -> RigResult<String> {
        validate_port_path(path)?;
        let _connecting = self.connect_lock.lock().await;

        if let Some(current) = self.current_port().await {
            if current == path {
                return Ok(current);
            }
            self.shared.reset().await;
        }

        let baud_rate = baud_rate.unwrap_or(self.default_baud);
        let link =
            match open_with_timeout(self.connector.as_ref(), path, baud_rate, self.open_timeout)
                .await
            {
                Ok(link) => link,
                Err(e) => {
                    warn!(port = %path, error = %e, "GPS connect failed");
                    self.shared.sink.emit(RigEvent::Error {
                        role: DeviceRole::Gps,
                        code: e.code().to_string(),
                        message: e.to_string(),
                    });
                    return Err(e);
                }
            };
        // Nothing is ever sent to the receiver
        let (reader, _writer) = link.into_split();

        {
            let mut data = self.shared.data.lock().await;
            data.generation += 1;
            data.port = Some(path.to_string());
            data.baud_rate = Some(baud_rate);
            data.reader = Some(tokio::spawn(read_sentences(
                self.shared.clone(),
                reader,
                data.generation,
            )));
        }

        info!(port = %path, baud_rate, "GPS connected");
        self.shared.sink.emit(RigEvent::Connected {
            role: DeviceRole::Gps,
            port: path.to_string(),
        });
        self.shared.sink.emit(RigEvent::ConnectionStatus {
            role: DeviceRole::Gps,
            connected: true,
            port: Some(path.to_string()),
        });
        Ok(path.to_string())
    }

    /// Closes the port. Idempotent.
    pub async fn disconnect(&self) {
        let _connecting = self.connect_lock.lock().await;
        debug!("GPS disconnect requested");
        self.shared.reset().await;
    }

    /// Port currently open, if any.
    pub async fn current_port(&self) -> Option<String> {
        self.shared.data.lock().await.port.clone()
    }

    /// Snapshot of the link.
    pub async fn status(&self) -> GpsStatus {
        let data = self.shared.data.lock().await;
        GpsStatus {
            connected: data.port.is_some(),
            port: data.port.clone(),
            baud_rate: data.baud_rate,
            sentences: data.sentences,
            last_sentence: data.last_sentence.clone(),
        }
    }
}
