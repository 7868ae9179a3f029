//! Mock transport and connector for deterministic testing of the client.
//!
//! An Ampio gateway talks first: once the handshake is sent it pushes bus
//! traffic without being asked. [`MockTransport`] therefore does not pair
//! requests with responses. Tests push inbound chunks through a
//! [`MockHandle`] at any time, inspect everything the client wrote, and
//! simulate the gateway dropping the session.
//!
//! [`MockConnector`] hands out scripted transports (or failures) in order,
//! recording the instant of every connection attempt so reconnect timing
//! can be asserted under paused Tokio time.
//!
//! # Example
//!
//! ```
//! use ampio_test_harness::MockTransport;
//!
//! let transport = MockTransport::new();
//! let handle = transport.handle();
//! handle.push_inbound(&[0x2d, 0xd4, 0x03, 0x00, 0x00, 0x00, 0x01, 0x2d, 0x00]);
//! assert!(handle.sent_frames().is_empty());
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use ampio_core::error::{Error, Result};
use ampio_core::transport::{Connector, Transport};

#[derive(Debug, Default)]
struct MockState {
    /// Chunks the "gateway" has pushed and the client has not read yet.
    inbound: VecDeque<Vec<u8>>,
    /// One entry per `send()` call, in order.
    sent: Vec<Vec<u8>>,
    /// The gateway side has gone away.
    remote_closed: bool,
    /// The client called `close()`.
    closed: bool,
    /// When the client first observed the remote close.
    lost_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<MockState>,
    wake: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A mock [`Transport`] driven from a [`MockHandle`].
///
/// `receive()` returns pushed chunks in order, waits for more until the
/// timeout expires, and reports [`Error::ConnectionLost`] once the handle
/// has closed the remote side and all pushed bytes were read.
#[derive(Debug, Default)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

/// Test-side view of a [`MockTransport`] that stays usable after the
/// transport has been moved into the client.
#[derive(Debug, Clone)]
pub struct MockHandle {
    shared: Arc<Shared>,
}

impl MockTransport {
    /// Create a connected mock transport with nothing queued.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock transport that reports the session as lost on the
    /// first read, after any bytes pushed through the handle.
    pub fn closing() -> Self {
        let transport = Self::new();
        transport.handle().close_remote();
        transport
    }

    /// Get a handle for pushing data and inspecting writes.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl MockHandle {
    /// Queue bytes for the client to read, as if the gateway sent them.
    pub fn push_inbound(&self, data: &[u8]) {
        self.shared.lock().inbound.push_back(data.to_vec());
        self.shared.wake.notify_one();
    }

    /// Simulate the gateway closing the session.
    pub fn close_remote(&self) {
        self.shared.lock().remote_closed = true;
        self.shared.wake.notify_one();
    }

    /// Every buffer the client has sent, one entry per `send()` call.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.shared.lock().sent.clone()
    }

    /// Whether the client has closed this transport.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// The instant at which the client first read the remote close.
    pub fn lost_at(&self) -> Option<Instant> {
        self.shared.lock().lost_at
    }

    /// Wait until at least `count` buffers have been sent.
    ///
    /// Returns the sent buffers, or `None` if `timeout` expires first.
    pub async fn wait_for_sent(&self, count: usize, timeout: Duration) -> Option<Vec<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        loop {
            let sent = self.sent_frames();
            if sent.len() >= count {
                return Some(sent);
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(Error::NotConnected);
        }
        if state.remote_closed {
            return Err(Error::ConnectionLost);
        }
        state.sent.push(data.to_vec());
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = self.shared.lock();
                if state.closed {
                    return Err(Error::NotConnected);
                }
                if let Some(mut chunk) = state.inbound.pop_front() {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        state.inbound.push_front(chunk.split_off(n));
                    }
                    return Ok(n);
                }
                if state.remote_closed {
                    state.lost_at.get_or_insert_with(Instant::now);
                    return Err(Error::ConnectionLost);
                }
            }

            if tokio::time::timeout_at(deadline, self.shared.wake.notified())
                .await
                .is_err()
            {
                return Err(Error::Timeout);
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.shared.lock().closed = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        let state = self.shared.lock();
        !state.closed && !state.remote_closed
    }
}

/// One scripted result for [`MockConnector::connect`].
#[derive(Debug)]
enum Outcome {
    Connected(MockTransport),
    Refused(String),
}

#[derive(Debug, Default)]
struct ConnectorState {
    outcomes: VecDeque<Outcome>,
    attempts: Vec<Instant>,
}

/// A [`Connector`] that replays scripted outcomes in order.
///
/// Once the script is exhausted every further attempt fails with
/// [`Error::Transport`]. Clones share the script and the attempt log.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl MockConnector {
    /// Create a connector with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ConnectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Script a successful attempt yielding `transport`.
    pub fn push_transport(&self, transport: MockTransport) {
        self.lock().outcomes.push_back(Outcome::Connected(transport));
    }

    /// Script a successful attempt and return the handle of its transport.
    pub fn push_connection(&self) -> MockHandle {
        let transport = MockTransport::new();
        let handle = transport.handle();
        self.push_transport(transport);
        handle
    }

    /// Script a failed attempt.
    pub fn push_refusal(&self, reason: &str) {
        self.lock()
            .outcomes
            .push_back(Outcome::Refused(reason.to_string()));
    }

    /// Instants of every connection attempt so far.
    pub fn attempts(&self) -> Vec<Instant> {
        self.lock().attempts.clone()
    }

    /// Wait until at least `count` attempts were made, or `timeout` expires.
    pub async fn wait_for_attempts(&self, count: usize, timeout: Duration) -> Option<Vec<Instant>> {
        let deadline = Instant::now() + timeout;
        loop {
            let attempts = self.attempts();
            if attempts.len() >= count {
                return Some(attempts);
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        let mut state = self.lock();
        state.attempts.push(Instant::now());
        match state.outcomes.pop_front() {
            Some(Outcome::Connected(transport)) => Ok(Box::new(transport)),
            Some(Outcome::Refused(reason)) => Err(Error::Transport(reason)),
            None => Err(Error::Transport("no scripted connection left".into())),
        }
    }

    fn endpoint(&self) -> String {
        "mock".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pushed_chunks_are_read_in_order() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        handle.push_inbound(&[0x01, 0x02]);
        handle.push_inbound(&[0x03]);

        let mut buf = [0u8; 16];
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], &[0x01, 0x02]);
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], &[0x03]);
    }

    #[tokio::test]
    async fn partial_reads_keep_the_remainder() {
        let mut mock = MockTransport::new();
        mock.handle().push_inbound(&[0xAA, 0xBB, 0xCC]);

        let mut buf = [0u8; 2];
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], &[0xAA, 0xBB]);
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], &[0xCC]);
    }

    #[tokio::test(start_paused = true)]
    async fn receive_without_data_times_out() {
        let mut mock = MockTransport::new();
        let mut buf = [0u8; 8];
        let result = mock.receive(&mut buf, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn push_wakes_a_pending_receive() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();

        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            let n = mock.receive(&mut buf, Duration::from_secs(5)).await.unwrap();
            buf[..n].to_vec()
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.push_inbound(&[0x42]);
        assert_eq!(reader.await.unwrap(), vec![0x42]);
    }

    #[tokio::test]
    async fn remote_close_after_buffered_data() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        handle.push_inbound(&[0x01]);
        handle.close_remote();

        let mut buf = [0u8; 8];
        assert_eq!(mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap(), 1);
        let result = mock.receive(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(Error::ConnectionLost)));
        assert!(handle.lost_at().is_some());
        assert!(!mock.is_connected());
    }

    #[tokio::test]
    async fn sends_are_recorded() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.send(&[0x01]).await.unwrap();
        mock.send(&[0x02, 0x03]).await.unwrap();
        assert_eq!(handle.sent_frames(), vec![vec![0x01], vec![0x02, 0x03]]);
    }

    #[tokio::test]
    async fn close_blocks_further_io() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.close().await.unwrap();
        assert!(handle.is_closed());
        assert!(matches!(mock.send(&[0x01]).await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn connector_replays_script_then_fails() {
        let connector = MockConnector::new();
        connector.push_refusal("gateway busy");
        let _handle = connector.push_connection();

        match connector.connect().await {
            Err(Error::Transport(msg)) => assert_eq!(msg, "gateway busy"),
            _ => panic!("expected scripted refusal"),
        }
        assert!(connector.connect().await.is_ok());
        assert!(connector.connect().await.is_err());
        assert_eq!(connector.attempts().len(), 3);
    }
}
