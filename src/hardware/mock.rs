//! Mock Hardware Implementations
//!
//! Provides simulated serial devices for testing without physical hardware.
//! Links are backed by `tokio::io::duplex`, and each opened port gets its own
//! device task on the far end of the pipe. Timing uses `tokio::time`, so tests can
//! run with a paused clock.
//!
//! # Available Mocks
//!
//! - [`MockDevice::Xl2`] - answers the analyzer command set
//! - [`MockDevice::Gps`] - streams a sentence at one baud rate, line noise at any other
//! - [`MockDevice::Silent`] - opens but never talks
//! - [`MockDevice::Unavailable`] - fails to open
//!
//! [`MockConnector::unplug`] ends every open link to a device, as pulling the cable would.
//! [`MockConnector::exclusive`] refuses a second open of a port while a link to it is
//! alive, like Windows COM ports or a tty opened with `TIOCEXCL`.

use crate::error::{RigError, RigResult};
use crate::hardware::serial::{SerialConnector, SerialLink};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, ReadBuf,
};
use tokio::sync::{watch, Mutex};

/// Behaviour of a simulated XL2 analyzer.
#[derive(Clone, Debug)]
pub struct MockXl2 {
    /// Reply to `*IDN?`
    pub identity: String,
    /// Bins returned by `MEAS:FFT:F?`
    pub frequencies: Vec<f64>,
    /// Levels returned by `MEAS:FFT? LIVE`
    pub spectrum: Vec<f64>,
}

impl Default for MockXl2 {
    fn default() -> Self {
        let frequencies: Vec<f64> = (1..=24).map(|i| f64::from(i) * 12.5).collect();
        let spectrum = frequencies
            .iter()
            .enumerate()
            .map(|(i, _)| -60.0 + i as f64)
            .collect();
        Self {
            identity: "NTi Audio,XL2,A2A-12345-E0,V4.21".to_string(),
            frequencies,
            spectrum,
        }
    }
}

/// Behaviour of a simulated GPS receiver.
#[derive(Clone, Debug)]
pub struct MockGps {
    /// Baud rate the receiver actually talks at
    pub baud_rate: u32,
    /// Sentence repeated every `period`
    pub sentence: String,
    /// Pause between sentences
    pub period: Duration,
}

impl Default for MockGps {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            sentence: "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47"
                .to_string(),
            period: Duration::from_millis(200),
        }
    }
}

/// A simulated device attached to a port path.
#[derive(Clone, Debug)]
pub enum MockDevice {
    /// Answers the analyzer command set
    Xl2(MockXl2),
    /// Streams positioning sentences
    Gps(MockGps),
    /// Opens but never talks
    Silent,
    /// Fails to open
    Unavailable,
}

type OpenPorts = Arc<std::sync::Mutex<HashSet<String>>>;

/// Marks a port as open until the link holding it is dropped.
struct PortLease {
    path: String,
    open: OpenPorts,
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.open
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.path);
    }
}

/// Our end of the pipe, holding the port's lease.
struct LeasedStream {
    inner: DuplexStream,
    _lease: PortLease,
}

impl AsyncRead for LeasedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for LeasedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[derive(Default)]
struct MockState {
    devices: HashMap<String, MockDevice>,
    opens: HashMap<String, usize>,
    commands: HashMap<String, Vec<String>>,
    plugs: HashMap<String, watch::Sender<bool>>,
}

/// Connector that opens simulated devices instead of real ports.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
    /// Set for exclusive-open ports
    open: Option<OpenPorts>,
}

impl MockConnector {
    /// Connector whose ports can be opened any number of times at once.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector whose ports refuse a second open while a link is alive.
    pub fn exclusive() -> Self {
        Self {
            open: Some(OpenPorts::default()),
            ..Self::default()
        }
    }

    /// Attaches `device` at `path`, replacing any previous device.
    pub async fn attach(&self, path: &str, device: MockDevice) {
        let mut state = self.state.lock().await;
        state.devices.insert(path.to_string(), device);
        state
            .plugs
            .insert(path.to_string(), watch::channel(false).0);
    }

    /// Removes the device at `path` and closes its open links from the device side.
    pub async fn unplug(&self, path: &str) {
        let mut state = self.state.lock().await;
        state.devices.remove(path);
        if let Some(plug) = state.plugs.remove(path) {
            plug.send_replace(true);
        }
    }

    /// Number of times `path` has been opened.
    pub async fn open_count(&self, path: &str) -> usize {
        self.state
            .lock()
            .await
            .opens
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    /// Every command line an XL2 mock at `path` has received, in order.
    pub async fn commands(&self, path: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .commands
            .get(path)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SerialConnector for MockConnector {
    async fn open(&self, path: &str, baud_rate: u32) -> RigResult<SerialLink> {
        let (device, unplugged) = {
            let mut state = self.state.lock().await;
            *state.opens.entry(path.to_string()).or_insert(0) += 1;
            (
                state.devices.get(path).cloned(),
                state.plugs.get(path).map(watch::Sender::subscribe),
            )
        };

        let device = match device {
            None => {
                return Err(RigError::port_io(
                    path,
                    std::io::Error::from(std::io::ErrorKind::NotFound),
                ))
            }
            Some(MockDevice::Unavailable) => {
                return Err(RigError::port_io(
                    path,
                    std::io::Error::new(std::io::ErrorKind::PermissionDenied, "port busy"),
                ))
            }
            Some(device) => device,
        };

        let lease = match &self.open {
            Some(open) => {
                let mut ports = open.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if !ports.insert(path.to_string()) {
                    return Err(RigError::port_io(
                        path,
                        io::Error::new(io::ErrorKind::PermissionDenied, "busy"),
                    ));
                }
                Some(PortLease {
                    path: path.to_string(),
                    open: open.clone(),
                })
            }
            None => None,
        };

        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        match device {
            MockDevice::Xl2(xl2) => {
                let task = run_xl2(xl2, theirs, path.to_string(), self.state.clone());
                tokio::spawn(until_unplugged(task, unplugged));
            }
            MockDevice::Gps(gps) => {
                tokio::spawn(until_unplugged(run_gps(gps, theirs, baud_rate), unplugged));
            }
            MockDevice::Silent => {
                tokio::spawn(until_unplugged(run_silent(theirs), unplugged));
            }
            MockDevice::Unavailable => {}
        }

        Ok(match lease {
            Some(lease) => SerialLink::from_stream(
                path,
                LeasedStream {
                    inner: ours,
                    _lease: lease,
                },
            ),
            None => SerialLink::from_stream(path, ours),
        })
    }
}

/// Runs a device task until it ends or the device is unplugged; dropping the task
/// drops its end of the pipe.
async fn until_unplugged<F>(task: F, unplugged: Option<watch::Receiver<bool>>)
where
    F: std::future::Future<Output = ()>,
{
    let Some(mut unplugged) = unplugged else {
        return task.await;
    };
    let wait = async move {
        while !*unplugged.borrow_and_update() {
            if unplugged.changed().await.is_err() {
                return;
            }
        }
    };
    tokio::select! {
        _ = task => {}
        _ = wait => {}
    }
}

fn format_list(values: &[f64], unit: &str) -> String {
    values
        .iter()
        .map(|v| format!("{v:.2} {unit}"))
        .collect::<Vec<_>>()
        .join(", ")
}

async fn run_xl2(device: MockXl2, stream: DuplexStream, path: String, state: Arc<Mutex<MockState>>) {
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut lines = BufReader::new(read_half).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let command = line.trim().to_string();
        if command.is_empty() {
            continue;
        }
        state
            .lock()
            .await
            .commands
            .entry(path.clone())
            .or_default()
            .push(command.clone());

        let reply = match command.as_str() {
            "*IDN?" => Some(device.identity.clone()),
            "MEAS:FFT:F?" => Some(format_list(&device.frequencies, "Hz")),
            "MEAS:FFT? LIVE" => Some(format_list(&device.spectrum, "dB")),
            _ => None,
        };

        if let Some(reply) = reply {
            if write_half
                .write_all(format!("{reply}\r\n").as_bytes())
                .await
                .is_err()
            {
                break;
            }
        }
    }
}

async fn run_gps(device: MockGps, mut stream: DuplexStream, opened_at: u32) {
    let payload = if opened_at == device.baud_rate {
        format!("{}\r\n", device.sentence).into_bytes()
    } else {
        // What a receiver sounds like at the wrong baud rate
        vec![0xf8, 0x80, 0x1e, 0xe0, 0xfe, b'\n']
    };

    loop {
        if stream.write_all(&payload).await.is_err() {
            break;
        }
        tokio::time::sleep(device.period).await;
    }
}

async fn run_silent(stream: DuplexStream) {
    let (read_half, _write_half) = tokio::io::split(stream);
    let mut lines = BufReader::new(read_half).lines();
    while let Ok(Some(_)) = lines.next_line().await {}
}
