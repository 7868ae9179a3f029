//! AmpioBuilder -- fluent builder for constructing [`AmpioClient`] instances.
//!
//! Separates configuration from construction so that callers can set
//! credentials, reconnect policy and timeouts before the IO task starts.
//!
//! # Example
//!
//! ```no_run
//! use ampio_ip::builder::AmpioBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> ampio_core::Result<()> {
//! let client = AmpioBuilder::new("192.168.1.140")
//!     .username("admin")
//!     .password("12345")
//!     .reconnect_delay(Duration::from_secs(10))
//!     .build()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use ampio_core::error::{Error, Result};
use ampio_core::transport::Connector;
use ampio_transport::TcpConnector;

use crate::client::AmpioClient;
use crate::commands::{self, DEFAULT_PASSWORD, DEFAULT_USERNAME};
use crate::io::{IoConfig, Shared, spawn_io_task};

/// TCP port the gateway listens on.
pub const DEFAULT_PORT: u16 = 1235;

/// Wait between a lost session and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Upper bound on one transport read.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Capacity of the broadcast event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Fluent builder for [`AmpioClient`].
///
/// Every setting has a default matching the gateway's factory
/// configuration, so the simplest usage is:
///
/// ```ignore
/// let client = AmpioBuilder::new("192.168.1.140").build().await?;
/// ```
#[derive(Debug, Clone)]
pub struct AmpioBuilder {
    host: String,
    port: u16,
    username: String,
    password: String,
    reconnect_delay: Duration,
    connect_timeout: Duration,
    poll_interval: Duration,
    event_capacity: usize,
}

impl AmpioBuilder {
    /// Create a builder for the gateway at `host`.
    pub fn new(host: &str) -> Self {
        AmpioBuilder {
            host: host.to_string(),
            port: DEFAULT_PORT,
            username: DEFAULT_USERNAME.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: ampio_transport::tcp::DEFAULT_CONNECT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Override the gateway port (default: 1235).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the login sent in the handshake (default: `admin`).
    pub fn username(mut self, username: &str) -> Self {
        self.username = username.to_string();
        self
    }

    /// Set the password sent in the handshake (default: `12345`).
    pub fn password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }

    /// Set the wait before reconnecting after a failure (default: 5s).
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the TCP connect timeout (default: 5s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set how long a single read may wait before the IO task checks the
    /// outbound queue again (default: 100ms).
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the capacity of the [`subscribe()`](AmpioClient::subscribe)
    /// channel (default: 256).
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// The `host:port` address the client will dial.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate(&self) -> Result<()> {
        if self.username.is_empty() {
            return Err(Error::InvalidParameter("username must not be empty".into()));
        }
        if self.reconnect_delay.is_zero() {
            return Err(Error::InvalidParameter(
                "reconnect_delay must be greater than zero".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidParameter(
                "poll_interval must be greater than zero".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(Error::InvalidParameter(
                "event_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Start a client with a caller-provided connector.
    ///
    /// This is the entry point for tests (pass a `MockConnector` from
    /// `ampio-test-harness`) and for callers that reach the gateway
    /// through something other than a plain TCP socket.
    pub async fn build_with_connector(self, connector: Box<dyn Connector>) -> Result<AmpioClient> {
        self.validate()?;

        let handshake = commands::handshake_frames(&self.username, &self.password)?;
        let config = IoConfig {
            handshake: handshake.map(Bytes::from),
            reconnect_delay: self.reconnect_delay,
            poll_interval: self.poll_interval,
        };

        let endpoint = connector.endpoint();
        let shared = Arc::new(Shared::new(self.event_capacity));
        let io = spawn_io_task(connector, config, Arc::clone(&shared))?;

        tracing::debug!(endpoint = %endpoint, username = %self.username, "Ampio client started");
        Ok(AmpioClient::new(io, shared, endpoint))
    }

    /// Start a client that connects over TCP.
    ///
    /// Returns as soon as the IO task is running; the first connection
    /// attempt happens in the background. Use
    /// [`wait_until_ready()`](AmpioClient::wait_until_ready) to wait for it.
    pub async fn build(self) -> Result<AmpioClient> {
        if self.host.is_empty() {
            return Err(Error::InvalidParameter("host is required for build()".into()));
        }
        let connector = TcpConnector::new(self.address()).with_timeout(self.connect_timeout);
        self.build_with_connector(Box::new(connector)).await
    }
}
