//! Typed lifecycle and measurement events.
//!
//! The core only ever writes into an [`EventSink`]. Whatever forwards events to
//! clients (websocket, SSE, a log) subscribes to a sink; it never calls back into
//! the sessions or the orchestrator.
//!
//! # Data Flow
//!
//! ```text
//! Classifier / Sessions / Orchestrator --[RigEvent]--> EventSink ---> subscribers
//! ```

use crate::discovery::{DeviceRole, ScanSummary};
use crate::measurement::Measurement;
use crate::orchestrator::{PhaseStatus, StartupPhase, StartupResult};
use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Everything the core reports to the outside world.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RigEvent {
    /// Discovery began over this many enumerated ports.
    ScanStarted {
        /// Ports the enumerator returned
        port_count: usize,
    },
    /// Discovery finished.
    ScanCompleted {
        /// Counts and timing of the finished scan
        summary: ScanSummary,
    },
    /// A session opened its port.
    Connected {
        /// Role whose session opened
        role: DeviceRole,
        /// Port it opened
        port: String,
    },
    /// A session closed or lost its port.
    Disconnected {
        /// Role whose session closed
        role: DeviceRole,
        /// Port that was open, if any
        port: Option<String>,
    },
    /// Something went wrong on one role.
    Error {
        /// Role the failure belongs to
        role: DeviceRole,
        /// Stable error code, such as `PORT_IO`
        code: String,
        /// Human readable description
        message: String,
    },
    /// The device identified itself.
    DeviceInfo {
        /// Role that identified itself
        role: DeviceRole,
        /// Raw identification string
        info: String,
    },
    /// A single-value reading.
    Measurement {
        /// The reading
        measurement: Measurement,
    },
    /// The XL2 reported its FFT bin frequencies.
    FrequencyTable {
        /// Bin centre frequencies in Hz
        frequencies: Vec<f64>,
        /// Bin nearest the target frequency
        target_index: Option<usize>,
    },
    /// A full FFT spectrum.
    Spectrum {
        /// The spectrum, with its target value when known
        measurement: Measurement,
    },
    /// A command line went out to a device.
    CommandSent {
        /// Role the command went to
        role: DeviceRole,
        /// Command text without terminator
        command: String,
    },
    /// A startup phase changed status.
    StartupPhase {
        /// Phase that changed
        phase: StartupPhase,
        /// Its new status
        status: PhaseStatus,
        /// Error text for a failed phase
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// The startup sequence finished.
    StartupComplete {
        /// Outcome of the whole sequence
        result: StartupResult,
    },
    /// Whether a role currently holds a port.
    ConnectionStatus {
        /// Role reported on
        role: DeviceRole,
        /// Whether it holds a port
        connected: bool,
        /// Port it holds
        port: Option<String>,
    },
    /// A raw sentence from the GPS receiver.
    GpsSentence {
        /// Port the sentence arrived on
        port: String,
        /// The sentence without line terminator
        sentence: String,
    },
}

impl RigEvent {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            RigEvent::ScanStarted { .. } => "scan_started",
            RigEvent::ScanCompleted { .. } => "scan_completed",
            RigEvent::Connected { .. } => "connected",
            RigEvent::Disconnected { .. } => "disconnected",
            RigEvent::Error { .. } => "error",
            RigEvent::DeviceInfo { .. } => "device_info",
            RigEvent::Measurement { .. } => "measurement",
            RigEvent::FrequencyTable { .. } => "frequency_table",
            RigEvent::Spectrum { .. } => "spectrum",
            RigEvent::CommandSent { .. } => "command_sent",
            RigEvent::StartupPhase { .. } => "startup_phase",
            RigEvent::StartupComplete { .. } => "startup_complete",
            RigEvent::ConnectionStatus { .. } => "connection_status",
            RigEvent::GpsSentence { .. } => "gps_sentence",
        }
    }
}

/// Receives events produced by the core.
pub trait EventSink: Send + Sync {
    /// Delivers one event. Must not block.
    fn emit(&self, event: RigEvent);
}

/// Fans events out to any number of subscribers over a broadcast channel.
///
/// Slow subscribers lag and lose the oldest events; emitting never blocks.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<RigEvent>,
}

impl BroadcastSink {
    /// Channel holding up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// New receiver seeing every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RigEvent> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: RigEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}

/// Keeps every event in memory, in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<RigEvent>>,
}

impl RecordingSink {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event recorded so far.
    pub fn events(&self) -> Vec<RigEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Commands reported through `CommandSent`, in order.
    pub fn commands(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                RigEvent::CommandSent { command, .. } => Some(command),
                _ => None,
            })
            .collect()
    }

    /// How many recorded events carry `name`.
    pub fn count(&self, name: &str) -> usize {
        self.events().iter().filter(|e| e.name() == name).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: RigEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_sink_delivers_to_subscribers() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();
        assert_eq!(sink.subscriber_count(), 1);

        sink.emit(RigEvent::CommandSent {
            role: DeviceRole::Xl2,
            command: "*IDN?".into(),
        });

        match rx.recv().await.unwrap() {
            RigEvent::CommandSent { command, .. } => assert_eq!(command, "*IDN?"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_broadcast_without_subscribers_does_not_fail() {
        let sink = BroadcastSink::new(1);
        sink.emit(RigEvent::ScanStarted { port_count: 0 });
    }

    #[test]
    fn test_events_serialize_with_type_tag() {
        let event = RigEvent::Connected {
            role: DeviceRole::Gps,
            port: "/dev/ttyUSB1".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "connected");
        assert_eq!(json["role"], "gps");
    }

    #[test]
    fn test_recording_sink_filters_commands() {
        let sink = RecordingSink::new();
        sink.emit(RigEvent::ScanStarted { port_count: 2 });
        sink.emit(RigEvent::CommandSent {
            role: DeviceRole::Xl2,
            command: "MEAS:INIT".into(),
        });
        assert_eq!(sink.commands(), vec!["MEAS:INIT"]);
        assert_eq!(sink.count("scan_started"), 1);
    }
}
