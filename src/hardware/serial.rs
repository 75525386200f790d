//! Async line-oriented serial links.
//!
//! A [`SerialLink`] is an open port split into a buffered line reader and a writer.
//! Commands are terminated with CRLF; replies are read up to `\n` with trailing
//! `\r`/`\n` stripped. Bytes that are not valid UTF-8 (typical when listening at the
//! wrong baud rate) are replaced rather than failing the read.
//!
//! Dropping both halves closes the port.

use crate::error::{RigError, RigResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Command terminator expected by the analyzer.
pub const LINE_TERMINATOR: &str = "\r\n";

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Opens serial links.
#[async_trait]
pub trait SerialConnector: Send + Sync {
    /// Opens `path` at `baud_rate`, 8N1.
    async fn open(&self, path: &str, baud_rate: u32) -> RigResult<SerialLink>;
}

/// An open serial port.
pub struct SerialLink {
    reader: LineReader,
    writer: LineWriter,
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("path", &self.reader.path)
            .finish_non_exhaustive()
    }
}

impl SerialLink {
    /// Wraps any bidirectional byte stream.
    pub fn from_stream<S>(path: &str, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: LineReader {
                path: path.to_string(),
                inner: BufReader::new(Box::new(read_half)),
            },
            writer: LineWriter {
                path: path.to_string(),
                inner: Box::new(write_half),
            },
        }
    }

    /// Writes one command line.
    pub async fn write_line(&mut self, line: &str) -> RigResult<()> {
        self.writer.write_line(line).await
    }

    /// Next non-empty line, or `None` at end of stream.
    pub async fn read_line(&mut self) -> RigResult<Option<String>> {
        self.reader.read_line().await
    }

    /// Reads lines until one satisfies `accept` or `limit` expires.
    ///
    /// Returns `Ok(None)` on timeout. End of stream is reported as an I/O error.
    pub async fn read_line_matching<F>(
        &mut self,
        limit: Duration,
        mut accept: F,
    ) -> RigResult<Option<String>>
    where
        F: FnMut(&str) -> bool + Send,
    {
        let path = self.reader.path.clone();
        let search = async {
            loop {
                match self.reader.read_line().await? {
                    Some(line) if accept(&line) => return Ok(line),
                    Some(line) => {
                        tracing::trace!(port = %path, line = %line, "ignoring line");
                    }
                    None => {
                        return Err(RigError::port_io(
                            path.clone(),
                            std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
                        ))
                    }
                }
            }
        };

        match tokio::time::timeout(limit, search).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Separates the halves so reading and writing can live in different tasks.
    pub fn into_split(self) -> (LineReader, LineWriter) {
        (self.reader, self.writer)
    }
}

/// Read half of a [`SerialLink`].
pub struct LineReader {
    path: String,
    inner: BufReader<BoxedReader>,
}

impl LineReader {
    /// Next non-empty line, or `None` at end of stream.
    pub async fn read_line(&mut self) -> RigResult<Option<String>> {
        let mut buf = Vec::with_capacity(256);
        loop {
            buf.clear();
            let n = self
                .inner
                .read_until(b'\n', &mut buf)
                .await
                .map_err(|e| RigError::port_io(self.path.clone(), e))?;
            if n == 0 {
                return Ok(None);
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_matches(|c| c == '\r' || c == '\n' || c == '\0');
            if !line.trim().is_empty() {
                return Ok(Some(line.to_string()));
            }
        }
    }

    /// Port this half reads from.
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Write half of a [`SerialLink`].
pub struct LineWriter {
    path: String,
    inner: BoxedWriter,
}

impl LineWriter {
    /// Writes `line` followed by CRLF and flushes.
    pub async fn write_line(&mut self, line: &str) -> RigResult<()> {
        let payload = format!("{line}{LINE_TERMINATOR}");
        self.inner
            .write_all(payload.as_bytes())
            .await
            .map_err(|e| RigError::port_io(self.path.clone(), e))?;
        self.inner
            .flush()
            .await
            .map_err(|e| RigError::port_io(self.path.clone(), e))?;
        tracing::trace!(port = %self.path, command = %line, "sent");
        Ok(())
    }
}

/// Opens real ports with `tokio-serial` (8N1, no flow control).
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSerialConnector;

#[async_trait]
impl SerialConnector for TokioSerialConnector {
    #[cfg(feature = "instrument_serial")]
    async fn open(&self, path: &str, baud_rate: u32) -> RigResult<SerialLink> {
        use tokio_serial::SerialPortBuilderExt;

        let stream = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| RigError::port_io(path, e.into()))?;

        tracing::debug!(port = %path, baud_rate, "serial port opened");
        Ok(SerialLink::from_stream(path, stream))
    }

    #[cfg(not(feature = "instrument_serial"))]
    async fn open(&self, _path: &str, _baud_rate: u32) -> RigResult<SerialLink> {
        Err(RigError::SerialFeatureDisabled)
    }
}

/// Opens `path`, bounded by `limit`.
pub async fn open_with_timeout(
    connector: &dyn SerialConnector,
    path: &str,
    baud_rate: u32,
    limit: Duration,
) -> RigResult<SerialLink> {
    match tokio::time::timeout(limit, connector.open(path, baud_rate)).await {
        Ok(result) => result,
        Err(_) => Err(RigError::timeout(format!("opening {path}"), limit)),
    }
}
