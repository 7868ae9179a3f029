//! Mock gateway listening on a real TCP socket.
//!
//! [`MockGateway`] accepts client connections on a random localhost port,
//! records every byte each connection sends, pushes scripted bytes to the
//! current connection, and can drop the connection to exercise reconnects.
//! Use it for end-to-end tests that go through `TcpTransport`.
//!
//! # Example
//!
//! ```
//! use ampio_test_harness::MockGateway;
//!
//! # async fn example() -> ampio_core::Result<()> {
//! let gateway = MockGateway::start().await?;
//! let addr = gateway.addr().to_string();
//! // ... connect a client to `addr`, then:
//! gateway.send(&[0x2d, 0xd4, 0x03, 0x00, 0x00, 0x00, 0x01, 0x2d, 0x00]);
//! gateway.drop_connection();
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ampio_core::error::{Error, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

enum Command {
    Send(Vec<u8>),
    DropConnection,
}

/// Bytes received per accepted connection, in accept order.
#[derive(Debug, Default)]
struct Received {
    connections: Vec<Vec<u8>>,
}

/// A scripted Ampio gateway on a localhost TCP port.
pub struct MockGateway {
    addr: String,
    received: Arc<Mutex<Received>>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl MockGateway {
    /// Bind to a random localhost port and start accepting connections.
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Transport(format!("failed to bind mock gateway: {}", e)))?;
        let addr = listener.local_addr().map_err(Error::Io)?.to_string();

        let received = Arc::new(Mutex::new(Received::default()));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(serve(listener, Arc::clone(&received), cmd_rx));

        Ok(Self {
            addr,
            received,
            cmd_tx,
            task,
        })
    }

    /// The `host:port` address clients should connect to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Write bytes to the current connection.
    ///
    /// Ignored (with a log line) if no client is connected.
    pub fn send(&self, data: &[u8]) {
        let _ = self.cmd_tx.send(Command::Send(data.to_vec()));
    }

    /// Close the current connection from the gateway side.
    pub fn drop_connection(&self) {
        let _ = self.cmd_tx.send(Command::DropConnection);
    }

    fn lock(&self) -> MutexGuard<'_, Received> {
        self.received.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of connections accepted so far.
    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    /// All bytes received on the `index`-th accepted connection.
    pub fn received(&self, index: usize) -> Vec<u8> {
        self.lock()
            .connections
            .get(index)
            .cloned()
            .unwrap_or_default()
    }

    /// Wait until `count` connections have been accepted.
    pub async fn wait_for_connections(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.connection_count() < count {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }

    /// Wait until the `index`-th connection has received at least `len`
    /// bytes, returning them.
    pub async fn wait_for_received(
        &self,
        index: usize,
        len: usize,
        timeout: Duration,
    ) -> std::result::Result<Vec<u8>, String> {
        let deadline = Instant::now() + timeout;
        loop {
            let data = self.received(index);
            if data.len() >= len {
                return Ok(data);
            }
            if Instant::now() >= deadline {
                return Err(format!(
                    "connection {}: received {} bytes, expected at least {}",
                    index,
                    data.len(),
                    len
                ));
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Current client connection: write half plus the task draining the read half.
struct Session {
    writer: OwnedWriteHalf,
    reader: JoinHandle<()>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn serve(
    listener: TcpListener,
    received: Arc<Mutex<Received>>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut session: Option<Session> = None;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "mock gateway accept failed");
                        continue;
                    }
                };
                tracing::debug!(peer = %peer, "mock gateway accepted connection");

                let index = {
                    let mut rx = received.lock().unwrap_or_else(PoisonError::into_inner);
                    rx.connections.push(Vec::new());
                    rx.connections.len() - 1
                };

                let (mut read_half, writer) = stream.into_split();
                let received = Arc::clone(&received);
                let reader = tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    loop {
                        match read_half.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                let mut rx = received.lock().unwrap_or_else(PoisonError::into_inner);
                                rx.connections[index].extend_from_slice(&buf[..n]);
                            }
                        }
                    }
                });

                // A new client replaces the previous one.
                session = Some(Session { writer, reader });
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send(data)) => match session.as_mut() {
                        Some(s) => {
                            if let Err(e) = s.writer.write_all(&data).await {
                                tracing::warn!(error = %e, "mock gateway write failed");
                            }
                        }
                        None => tracing::warn!("mock gateway has no client, dropping {} bytes", data.len()),
                    },
                    Some(Command::DropConnection) => {
                        if session.take().is_some() {
                            tracing::debug!("mock gateway dropped connection");
                        }
                    }
                    None => break,
                }
            }
        }
    }
}
