//! TCP transport for gateway communication.
//!
//! [`TcpTransport`] implements the [`Transport`] trait over a single TCP
//! session with an Ampio gateway (MSERV-3s and compatible, port 1235 by
//! default). [`TcpConnector`] implements [`Connector`] by opening a new
//! `TcpTransport` on every call, so the client can reconnect after the
//! gateway drops the session.
//!
//! # Example
//!
//! ```no_run
//! use ampio_transport::TcpConnector;
//! use ampio_core::transport::Connector;
//!
//! # async fn example() -> ampio_core::Result<()> {
//! let connector = TcpConnector::new("192.168.1.140:1235");
//! let transport = connector.connect().await?;
//! assert!(transport.is_connected());
//! # Ok(())
//! # }
//! ```

use ampio_core::error::{Error, Result};
use ampio_core::format_bytes;
use ampio_core::transport::{Connector, Transport};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Default connection timeout (5 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP transport to an Ampio gateway.
///
/// The connection is established eagerly via [`connect`](TcpTransport::connect)
/// or [`connect_with_timeout`](TcpTransport::connect_with_timeout).
#[derive(Debug)]
pub struct TcpTransport {
    /// The underlying TCP stream, `None` after `close()` is called.
    stream: Option<TcpStream>,
    /// The address string for logging.
    addr: String,
}

impl TcpTransport {
    /// Connect to a gateway using the default timeout.
    ///
    /// The `addr` parameter is a `host:port` string, e.g.
    /// `"192.168.1.140:1235"`.
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::connect_with_timeout(addr, DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Connect to a gateway with a specified timeout.
    pub async fn connect_with_timeout(addr: &str, timeout: Duration) -> Result<Self> {
        tracing::debug!(
            addr = %addr,
            timeout_ms = timeout.as_millis(),
            "Connecting to gateway"
        );

        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                tracing::warn!(addr = %addr, "TCP connection timed out");
                Error::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(addr = %addr, error = %e, "TCP connection failed");
                map_connect_error(e, addr)
            })?;

        // Commands are a few dozen bytes; don't let Nagle hold them back.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(
                addr = %addr,
                error = %e,
                "Failed to set TCP_NODELAY (continuing anyway)"
            );
        }

        tracing::info!(addr = %addr, "Connected successfully");

        Ok(Self {
            stream: Some(stream),
            addr: addr.to_string(),
        })
    }

    /// Wrap an existing `TcpStream` as a `TcpTransport`.
    ///
    /// Useful when the connection was accepted from a listener in tests.
    pub fn from_stream(stream: TcpStream, addr: String) -> Self {
        tracing::debug!(addr = %addr, "Wrapping existing TCP stream");
        Self {
            stream: Some(stream),
            addr,
        }
    }

    /// Get the address string this transport was connected to.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(
            addr = %self.addr,
            bytes = data.len(),
            data = %format_bytes(data),
            "Sending data"
        );

        stream.write_all(data).await.map_err(|e| {
            tracing::warn!(addr = %self.addr, error = %e, "Failed to send data");
            map_io_error(e)
        })?;

        stream.flush().await.map_err(|e| {
            tracing::warn!(addr = %self.addr, error = %e, "Failed to flush TCP stream");
            map_io_error(e)
        })?;

        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        match tokio::time::timeout(timeout, stream.read(buf)).await {
            Ok(Ok(0)) => {
                tracing::info!(addr = %self.addr, "The server closed the connection");
                Err(Error::ConnectionLost)
            }
            Ok(Ok(n)) => {
                tracing::trace!(
                    addr = %self.addr,
                    bytes = n,
                    data = %format_bytes(&buf[..n]),
                    "Received data"
                );
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::warn!(addr = %self.addr, error = %e, "Failed to receive data");
                Err(map_io_error(e))
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            tracing::debug!(addr = %self.addr, "Closing TCP connection");

            if let Err(e) = stream.shutdown().await {
                tracing::debug!(
                    addr = %self.addr,
                    error = %e,
                    "Failed to shutdown TCP stream (continuing anyway)"
                );
            }
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

/// Opens a new [`TcpTransport`] to a fixed gateway address per attempt.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    timeout: Duration,
}

impl TcpConnector {
    /// Create a connector for `addr` with the default connect timeout.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the connect timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The gateway address this connector dials.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        tracing::info!(addr = %self.addr, "Trying to connect");
        let transport = TcpTransport::connect_with_timeout(&self.addr, self.timeout).await?;
        Ok(Box::new(transport))
    }

    fn endpoint(&self) -> String {
        self.addr.clone()
    }
}

/// Map a connection-time I/O error to the appropriate [`Error`] variant.
fn map_connect_error(e: std::io::Error, addr: &str) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            Error::Transport(format!("connection refused: {}", addr))
        }
        _ => Error::Io(e),
    }
}

/// Map a data-path I/O error to the appropriate [`Error`] variant.
fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::UnexpectedEof => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}
