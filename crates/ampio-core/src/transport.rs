//! Transport and connector traits for gateway communication.
//!
//! The [`Transport`] trait abstracts over the byte stream to a gateway.
//! The [`Connector`] trait produces a fresh transport for every connection
//! attempt, which is what lets the client reconnect without knowing whether
//! it talks to a real TCP socket or a mock from `ampio-test-harness`.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to a gateway.
///
/// Implementations handle buffering and error mapping at the socket
/// layer. Framing and checksums are handled by the protocol engine that
/// consumes this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the gateway.
    ///
    /// Completes once all bytes have been handed to the socket.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the gateway into the provided buffer.
    ///
    /// Returns the number of bytes read. Waits up to `timeout`; returns
    /// [`Error::Timeout`](crate::error::Error::Timeout) if nothing arrived
    /// and [`Error::ConnectionLost`](crate::error::Error::ConnectionLost)
    /// once the peer has closed the stream.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport connection.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}

/// Factory for gateway transports.
///
/// Called once per connection attempt; a failed attempt is retried by the
/// client after its reconnect delay.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new transport to the gateway.
    async fn connect(&self) -> Result<Box<dyn Transport>>;

    /// Human-readable endpoint description for logging.
    fn endpoint(&self) -> String;
}
