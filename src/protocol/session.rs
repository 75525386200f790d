//! XL2 protocol session.
//!
//! Owns the single serial link to the analyzer and drives its lifecycle:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Initializing -> Connected -> Measuring
//!       ^                                                                   |
//!       +------------------------- disconnect / device lost ----------------+
//! ```
//!
//! Commands are fire-and-forget. A reader task classifies every incoming line
//! ([`parse_response`]) and updates the session: identification, frequency table,
//! spectra and single values all arrive that way and are reported through the
//! [`EventSink`]. The continuous loop is a second task that only writes.
//!
//! # Locking
//!
//! - `connect_lock` serializes connect/disconnect; a second `connect` waits for the first.
//! - `init_lock` guards the FFT init sequence; a concurrent `initialize_fft` returns
//!   immediately instead of queueing a second device reset.
//! - Session data and the writer have their own mutexes. Code that needs both takes the
//!   data lock first.

use crate::config::Xl2Settings;
use crate::discovery::DeviceRole;
use crate::error::{RigError, RigResult};
use crate::events::{EventSink, RigEvent};
use crate::hardware::serial::{open_with_timeout, LineReader, LineWriter};
use crate::hardware::SerialConnector;
use crate::measurement::{Measurement, MeasurementHistory};
use crate::protocol::commands::{self, validate_command, validate_port_path};
use crate::protocol::response::{find_target_bin, parse_response, Response};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, trace, warn};

const ROLE: DeviceRole = DeviceRole::Xl2;

/// Where the session is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No port open
    Disconnected,
    /// Opening the port and identifying the device
    Connecting,
    /// Port open, sampling stopped
    Connected,
    /// Running the FFT initialization sequence
    Initializing,
    /// Sampling continuously
    Measuring,
}

/// Snapshot returned by [`Xl2Session::status`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionStatus {
    /// Lifecycle state
    pub state: SessionState,
    /// Open port
    pub port: Option<String>,
    /// Reply to the identification query
    pub device_info: Option<String>,
    /// Bins in the frequency table
    pub frequency_bins: usize,
    /// Frequency whose level is extracted
    pub target_frequency_hz: f64,
    /// Bin holding that frequency
    pub target_index: Option<usize>,
    /// FFT zoom factor
    pub zoom: u32,
    /// FFT start frequency
    pub start_frequency_hz: f64,
    /// Whether the sampling loop runs
    pub continuous: bool,
    /// Measurements in history
    pub history_len: usize,
}

struct SessionData {
    state: SessionState,
    port: Option<String>,
    device_info: Option<String>,
    frequencies: Vec<f64>,
    target_frequency_hz: f64,
    target_index: Option<usize>,
    zoom: u32,
    start_frequency_hz: f64,
    continuous: bool,
    history: MeasurementHistory,
    reader: Option<JoinHandle<()>>,
    sampler: Option<JoinHandle<()>>,
    generation: u64,
}

impl SessionData {
    fn new(settings: &Xl2Settings) -> Self {
        Self {
            state: SessionState::Disconnected,
            port: None,
            device_info: None,
            frequencies: Vec::new(),
            target_frequency_hz: settings.target_frequency_hz,
            target_index: None,
            zoom: settings.zoom,
            start_frequency_hz: settings.start_frequency_hz,
            continuous: false,
            history: MeasurementHistory::new(settings.history_size),
            reader: None,
            sampler: None,
            generation: 0,
        }
    }

    /// Drops everything tied to the current link. Returns the port, the reader task and
    /// the sampler task so the caller can decide what to abort.
    fn clear_link(&mut self) -> (Option<String>, Option<JoinHandle<()>>, Option<JoinHandle<()>>) {
        self.state = SessionState::Disconnected;
        self.device_info = None;
        self.frequencies.clear();
        self.target_index = None;
        self.continuous = false;
        self.history.clear();
        (self.port.take(), self.reader.take(), self.sampler.take())
    }
}

struct Shared {
    sink: Arc<dyn EventSink>,
    tolerance_hz: f64,
    data: Mutex<SessionData>,
    writer: Mutex<Option<LineWriter>>,
    table_ready: Notify,
}

impl Shared {
    async fn send(&self, command: &str) -> RigResult<()> {
        {
            let mut writer = self.writer.lock().await;
            let Some(writer) = writer.as_mut() else {
                return Err(RigError::port_io(
                    "xl2",
                    std::io::Error::from(std::io::ErrorKind::NotConnected),
                ));
            };
            writer.write_line(command).await?;
        }
        debug!(command = %command, "command sent");
        self.sink.emit(RigEvent::CommandSent {
            role: ROLE,
            command: command.to_string(),
        });
        Ok(())
    }

    async fn handle_line(&self, line: &str) {
        let event = {
            let mut data = self.data.lock().await;
            match parse_response(line) {
                Response::Identification(info) => {
                    info!(device = %info, "XL2 identified itself");
                    data.device_info = Some(info.clone());
                    Some(RigEvent::DeviceInfo { role: ROLE, info })
                }
                Response::FrequencyTable(frequencies) => {
                    data.target_index =
                        find_target_bin(&frequencies, data.target_frequency_hz, self.tolerance_hz);
                    debug!(
                        bins = frequencies.len(),
                        target_index = ?data.target_index,
                        "frequency table received"
                    );
                    data.frequencies = frequencies.clone();
                    self.table_ready.notify_waiters();
                    Some(RigEvent::FrequencyTable {
                        frequencies,
                        target_index: data.target_index,
                    })
                }
                Response::Spectrum(values) => {
                    let measurement = Measurement::spectrum(line, values, data.target_index);
                    data.history.push(measurement.clone());
                    Some(RigEvent::Spectrum { measurement })
                }
                Response::SingleValue(value) => {
                    let measurement = Measurement::single_value(line, value);
                    data.history.push(measurement.clone());
                    Some(RigEvent::Measurement { measurement })
                }
                Response::Unknown => {
                    trace!(line = %line, "unclassified line");
                    None
                }
            }
        };
        if let Some(event) = event {
            self.sink.emit(event);
        }
    }

    /// Clears the link and reports the disconnect.
    ///
    /// `lost` is set when the reader task itself saw the stream end: the reset then only
    /// applies if that reader's connection is still the current one, the loss is reported
    /// as an error, and the reader is left to finish on its own.
    async fn reset(&self, lost: Option<(u64, String)>) {
        let (port, reader, sampler) = {
            let mut data = self.data.lock().await;
            if let Some((generation, _)) = &lost {
                if data.generation != *generation {
                    return;
                }
            }
            data.clear_link()
        };
        *self.writer.lock().await = None;

        if let Some(sampler) = sampler {
            sampler.abort();
        }
        if lost.is_none() {
            if let Some(reader) = reader {
                reader.abort();
            }
        }
        if port.is_none() {
            return;
        }
        if let Some((_, reason)) = lost {
            warn!(port = ?port, reason = %reason, "XL2 lost");
            self.sink.emit(RigEvent::Error {
                role: ROLE,
                code: "PORT_IO".to_string(),
                message: reason,
            });
        }
        info!(port = ?port, "XL2 disconnected");
        self.sink.emit(RigEvent::Disconnected { role: ROLE, port });
        self.sink.emit(RigEvent::ConnectionStatus {
            role: ROLE,
            connected: false,
            port: None,
        });
    }
}

async fn read_responses(shared: Arc<Shared>, mut reader: LineReader, generation: u64) {
    let reason = loop {
        match reader.read_line().await {
            Ok(Some(line)) => shared.handle_line(&line).await,
            Ok(None) => break format!("XL2 stream on {} ended", reader.path()),
            Err(e) => break e.to_string(),
        }
    };
    shared.reset(Some((generation, reason))).await;
}

async fn sample_continuously(shared: Arc<Shared>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let tick = async {
            shared.send(commands::TRIGGER).await?;
            shared.send(commands::QUERY_SPECTRUM).await
        };
        if let Err(e) = tick.await {
            warn!(error = %e, "measurement tick failed, fetching spectrum only");
            if let Err(e) = shared.send(commands::QUERY_SPECTRUM).await {
                warn!(error = %e, "spectrum fetch failed");
            }
        }
    }
}

/// The connection to the XL2 analyzer.
pub struct Xl2Session {
    connector: Arc<dyn SerialConnector>,
    settings: Xl2Settings,
    shared: Arc<Shared>,
    connect_lock: Mutex<()>,
    init_lock: Mutex<()>,
}

impl Xl2Session {
    /// Disconnected session that opens ports through `connector`.
    pub fn new(
        connector: Arc<dyn SerialConnector>,
        sink: Arc<dyn EventSink>,
        settings: Xl2Settings,
    ) -> Self {
        let shared = Arc::new(Shared {
            sink,
            tolerance_hz: settings.frequency_tolerance_hz,
            data: Mutex::new(SessionData::new(&settings)),
            writer: Mutex::new(None),
            table_ready: Notify::new(),
        });
        Self {
            connector,
            settings,
            shared,
            connect_lock: Mutex::new(()),
            init_lock: Mutex::new(()),
        }
    }

    /// Connects, identifies, initializes FFT mode and starts continuous sampling.
    ///
    /// - Connected and `port` is `None` or the current port: no-op, returns the port.
    /// - Connected to another port: disconnects first.
    /// - A connect already in flight: waits for it, then applies the rules above.
    ///
    /// On failure the session is left disconnected.
    #[instrument(skip(self))]
    pub async fn connect(&self, port: Option<&str>) -> RigResult<String> {
        if let Some(path) = port {
            validate_port_path(path)?;
        }
        let _connecting = self.connect_lock.lock().await;

        let path = match (self.current_port().await, port) {
            (Some(current), None) => return Ok(current),
            (Some(current), Some(path)) if current == path => return Ok(current),
            (Some(current), Some(path)) => {
                info!(from = %current, to = %path, "switching XL2 port");
                self.teardown().await;
                path
            }
            (None, Some(path)) => path,
            (None, None) => {
                return Err(RigError::Validation(
                    "no port given and the XL2 is not connected".into(),
                ))
            }
        };

        match self.establish(path).await {
            Ok(()) => Ok(path.to_string()),
            Err(e) => {
                warn!(port = %path, error = %e, "XL2 connect failed");
                self.shared.sink.emit(RigEvent::Error {
                    role: ROLE,
                    code: e.code().to_string(),
                    message: e.to_string(),
                });
                self.teardown().await;
                Err(e)
            }
        }
    }

    async fn establish(&self, path: &str) -> RigResult<()> {
        self.shared.data.lock().await.state = SessionState::Connecting;

        let link = match open_with_timeout(
            self.connector.as_ref(),
            path,
            self.settings.baud_rate,
            self.settings.response_timeout(),
        )
        .await
        {
            Ok(link) => link,
            Err(e) => {
                self.shared.data.lock().await.state = SessionState::Disconnected;
                return Err(e);
            }
        };
        let (reader, writer) = link.into_split();

        {
            let mut data = self.shared.data.lock().await;
            data.generation += 1;
            data.port = Some(path.to_string());
            data.state = SessionState::Connected;
            data.reader = Some(tokio::spawn(read_responses(
                self.shared.clone(),
                reader,
                data.generation,
            )));
            *self.shared.writer.lock().await = Some(writer);
        }

        info!(port = %path, baud_rate = self.settings.baud_rate, "XL2 connected");
        self.shared.sink.emit(RigEvent::Connected {
            role: ROLE,
            port: path.to_string(),
        });
        self.shared.sink.emit(RigEvent::ConnectionStatus {
            role: ROLE,
            connected: true,
            port: Some(path.to_string()),
        });

        self.shared.send(commands::IDENTIFY).await?;
        self.initialize_fft().await?;
        self.start_continuous().await
    }

    /// Runs the FFT init sequence with settle delays.
    ///
    /// No-op while measuring continuously, or while another init is running.
    pub async fn initialize_fft(&self) -> RigResult<()> {
        let Ok(_initializing) = self.init_lock.try_lock() else {
            debug!("FFT initialization already running");
            return Ok(());
        };

        let (zoom, start_hz) = {
            let mut data = self.shared.data.lock().await;
            if data.continuous || data.state == SessionState::Measuring {
                debug!("measuring, skipping FFT initialization");
                return Ok(());
            }
            if data.port.is_none() {
                return Err(RigError::Validation("XL2 is not connected".into()));
            }
            data.state = SessionState::Initializing;
            (data.zoom, data.start_frequency_hz)
        };

        let settle = self.settings.settle();
        let steps = [
            (commands::RESET.to_string(), self.settings.reset_settle()),
            (commands::SELECT_FFT.to_string(), settle),
            (commands::START_ACQUISITION.to_string(), settle),
            (commands::zoom(zoom), settle),
            (commands::start_frequency(start_hz), settle),
            (commands::TRIGGER.to_string(), settle),
        ];

        let mut result = Ok(());
        for (command, pause) in steps {
            if let Err(e) = self.shared.send(&command).await {
                result = Err(e);
                break;
            }
            tokio::time::sleep(pause).await;
        }

        let mut data = self.shared.data.lock().await;
        if data.state == SessionState::Initializing {
            data.state = SessionState::Connected;
        }
        if result.is_ok() {
            info!(zoom, start_hz, "FFT mode initialized");
        }
        result
    }

    /// Starts the sampling loop. No-op if it is already running.
    pub async fn start_continuous(&self) -> RigResult<()> {
        {
            let data = self.shared.data.lock().await;
            if data.sampler.is_some() {
                return Ok(());
            }
            if data.port.is_none() {
                return Err(RigError::Validation("XL2 is not connected".into()));
            }
        }

        self.ensure_frequency_table().await?;

        let mut data = self.shared.data.lock().await;
        if data.sampler.is_some() {
            return Ok(());
        }
        if data.port.is_none() {
            return Err(RigError::Validation("XL2 disconnected during start".into()));
        }
        data.continuous = true;
        data.state = SessionState::Measuring;
        data.sampler = Some(tokio::spawn(sample_continuously(
            self.shared.clone(),
            self.settings.interval(),
        )));
        info!(interval_ms = self.settings.interval_ms, "continuous sampling started");
        Ok(())
    }

    /// Fetches the frequency table once if none is known yet.
    async fn ensure_frequency_table(&self) -> RigResult<()> {
        if !self.shared.data.lock().await.frequencies.is_empty() {
            return Ok(());
        }

        let table = self.shared.table_ready.notified();
        self.shared.send(commands::QUERY_FREQUENCIES).await?;
        let limit = self.settings.response_timeout();
        if tokio::time::timeout(limit, table).await.is_err() {
            let err = RigError::Protocol(format!("no frequency table within {limit:?}"));
            warn!(error = %err, "spectra will lack a target value");
            self.shared.sink.emit(RigEvent::Error {
                role: ROLE,
                code: err.code().to_string(),
                message: err.to_string(),
            });
        }
        Ok(())
    }

    /// Stops the sampling loop. Idempotent.
    pub async fn stop_continuous(&self) {
        let mut data = self.shared.data.lock().await;
        if let Some(sampler) = data.sampler.take() {
            sampler.abort();
            info!("continuous sampling stopped");
        }
        data.continuous = false;
        if data.state == SessionState::Measuring {
            data.state = SessionState::Connected;
        }
    }

    /// Stops sampling and acquisition (best effort), closes the port and resets the
    /// session.
    pub async fn disconnect(&self) {
        let _connecting = self.connect_lock.lock().await;
        self.teardown().await;
    }

    async fn teardown(&self) {
        self.stop_continuous().await;
        if self.shared.data.lock().await.port.is_some() {
            if let Err(e) = self.shared.send(commands::STOP_ACQUISITION).await {
                warn!(error = %e, "could not stop acquisition");
            }
        }
        self.shared.reset(None).await;
    }

    /// Sends a raw command after validating it.
    pub async fn send_command(&self, command: &str) -> RigResult<()> {
        validate_command(command)?;
        self.shared.send(command.trim()).await
    }

    /// Sets the FFT zoom, applying it right away when connected.
    pub async fn set_zoom(&self, level: u32) -> RigResult<()> {
        commands::validate_zoom(level)?;
        let connected = {
            let mut data = self.shared.data.lock().await;
            data.zoom = level;
            data.port.is_some()
        };
        if connected {
            self.shared.send(&commands::zoom(level)).await?;
        }
        Ok(())
    }

    /// Sets the FFT start frequency, applying it right away when connected.
    pub async fn set_start_frequency(&self, hz: f64) -> RigResult<()> {
        commands::validate_start_frequency(hz)?;
        let connected = {
            let mut data = self.shared.data.lock().await;
            data.start_frequency_hz = hz;
            data.port.is_some()
        };
        if connected {
            self.shared.send(&commands::start_frequency(hz)).await?;
        }
        Ok(())
    }

    /// Changes the frequency of interest and relocates its bin in the current table.
    pub async fn set_target_frequency(&self, hz: f64) -> RigResult<Option<usize>> {
        commands::validate_frequency(hz)?;
        let (frequencies, target_index) = {
            let mut data = self.shared.data.lock().await;
            data.target_frequency_hz = hz;
            data.target_index = find_target_bin(&data.frequencies, hz, self.shared.tolerance_hz);
            (data.frequencies.clone(), data.target_index)
        };
        if !frequencies.is_empty() {
            self.shared.sink.emit(RigEvent::FrequencyTable {
                frequencies,
                target_index,
            });
        }
        Ok(target_index)
    }

    /// Port currently open, if any.
    pub async fn current_port(&self) -> Option<String> {
        self.shared.data.lock().await.port.clone()
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SessionState {
        self.shared.data.lock().await.state
    }

    /// Whether the sampling loop runs.
    pub async fn is_continuous(&self) -> bool {
        self.shared.data.lock().await.continuous
    }

    /// Recorded measurements, oldest first.
    pub async fn history(&self) -> Vec<Measurement> {
        self.shared.data.lock().await.history.to_vec()
    }

    /// Most recent measurement.
    pub async fn latest(&self) -> Option<Measurement> {
        self.shared.data.lock().await.history.latest().cloned()
    }

    /// Snapshot of the session.
    pub async fn status(&self) -> SessionStatus {
        let data = self.shared.data.lock().await;
        SessionStatus {
            state: data.state,
            port: data.port.clone(),
            device_info: data.device_info.clone(),
            frequency_bins: data.frequencies.len(),
            target_frequency_hz: data.target_frequency_hz,
            target_index: data.target_index,
            zoom: data.zoom,
            start_frequency_hz: data.start_frequency_hz,
            continuous: data.continuous,
            history_len: data.history.len(),
        }
    }
}
