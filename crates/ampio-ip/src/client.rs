//! AmpioClient -- the public handle to a gateway connection.
//!
//! The client owns the IO task (see [`crate::io`]) and exposes the
//! operations applications need: listener registration, the two output
//! commands, event subscription and state queries. Commands are queued,
//! never sent directly; they go out in order once the session is ready,
//! including after a reconnect.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};

use ampio_core::error::{Error, Result};
use ampio_core::events::ClientEvent;
use ampio_core::types::{ChannelValue, ConnectionState, ReadingKind};
use ampio_core::format_mac;

use crate::builder::{AmpioBuilder, DEFAULT_PORT};
use crate::commands;
use crate::io::{ClientIo, Shared};
use crate::listeners::{Listener, ListenerKey, lock_registry};

/// A client session with an Ampio gateway.
///
/// Constructed via [`AmpioBuilder`] or [`AmpioClient::connect`]. The
/// connection is maintained in the background: a lost session is retried
/// after the configured delay until the client is shut down or dropped.
pub struct AmpioClient {
    io: ClientIo,
    shared: Arc<Shared>,
    endpoint: String,
}

impl Drop for AmpioClient {
    fn drop(&mut self) {
        // Graceful: signal the IO loop to exit at the next select iteration.
        self.io.cancel.cancel();
        // Abort in case it is stuck in a connect attempt.
        self.io.task.abort();
    }
}

impl AmpioClient {
    pub(crate) fn new(io: ClientIo, shared: Arc<Shared>, endpoint: String) -> Self {
        AmpioClient {
            io,
            shared,
            endpoint,
        }
    }

    /// Connect to the gateway at `host:port` with default credentials.
    ///
    /// Pass [`DEFAULT_PORT`] for a gateway with factory settings.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        AmpioBuilder::new(host).port(port).build().await
    }

    /// Connect to the gateway at `host` on [`DEFAULT_PORT`].
    pub async fn connect_default(host: &str) -> Result<Self> {
        Self::connect(host, DEFAULT_PORT).await
    }

    /// The endpoint this client dials.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Call `listener` whenever channel `channel` of kind `kind` on device
    /// `mac` changes value.
    ///
    /// Bitmap kinds use bit positions `0..24`; byte and temperature kinds
    /// use 1-based slots. Registering the same listener twice has no
    /// further effect. Always returns `true`.
    pub fn register_listener(
        &self,
        mac: u32,
        channel: u8,
        kind: ReadingKind,
        listener: &Listener,
    ) -> bool {
        let key = ListenerKey::new(mac, channel, kind);
        tracing::debug!(key = %key, "Registering listener");
        lock_registry(&self.shared.registry).register(key, listener.clone())
    }

    /// Remove a listener. Returns `false` if it was not registered for
    /// that channel.
    pub fn unregister_listener(
        &self,
        mac: u32,
        channel: u8,
        kind: ReadingKind,
        listener: &Listener,
    ) -> bool {
        lock_registry(&self.shared.registry)
            .unregister(ListenerKey::new(mac, channel, kind), listener)
    }

    /// Switch a binary output on the gateway server (`mac` 0 or 1,
    /// `channel` 0-7).
    ///
    /// Returns once the command is queued.
    pub fn send_binary_output(&self, mac: u32, channel: u8, on: bool) -> Result<()> {
        let frame = commands::set_binary_output(mac, channel, on).inspect_err(|e| {
            tracing::warn!(mac = %format_mac(mac), channel, error = %e, "Binary output rejected");
        })?;
        tracing::debug!(mac = %format_mac(mac), channel, on, "Queueing binary output");
        self.io.enqueue(frame)
    }

    /// Set a byte output on a bus device.
    ///
    /// Returns once the command is queued.
    pub fn send_byte_output(&self, mac: u32, channel: u8, value: u8) -> Result<()> {
        let frame = commands::set_byte_output(mac, channel, value).inspect_err(|e| {
            tracing::warn!(mac = %format_mac(mac), channel, error = %e, "Byte output rejected");
        })?;
        tracing::debug!(mac = %format_mac(mac), channel, value, "Queueing byte output");
        self.io.enqueue(frame)
    }

    /// Subscribe to connection and channel-change events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.subscribe()
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.connection_state()
    }

    /// A receiver that observes every connection state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.watch_state()
    }

    /// Returns `true` while a session is up and the handshake is queued.
    pub fn is_ready(&self) -> bool {
        self.connection_state() == ConnectionState::Ready
    }

    /// Wait until the session is ready, or fail with [`Error::Timeout`].
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        let mut state = self.watch_state();
        tokio::time::timeout(timeout, state.wait_for(|s| *s == ConnectionState::Ready))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|_| Error::NotConnected)?;
        Ok(())
    }

    /// Wait until every queued command has been written to the gateway,
    /// or fail with [`Error::Timeout`].
    ///
    /// Call before [`shutdown`](Self::shutdown) when queued commands must
    /// not be dropped. Commands waiting for a reconnect count as unwritten.
    pub async fn flush(&self, timeout: Duration) -> Result<()> {
        let mut pending = self.shared.watch_pending();
        tokio::time::timeout(timeout, pending.wait_for(|n| *n == 0))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|_| Error::NotConnected)?;
        Ok(())
    }

    /// Last known value of a channel, if the device has reported it.
    pub fn channel_value(&self, mac: u32, channel: u8, kind: ReadingKind) -> Option<ChannelValue> {
        self.shared.lock_state().channel_value(mac, channel, kind)
    }

    /// Last known input or output bitmap of a device.
    pub fn bitmap(&self, mac: u32, kind: ReadingKind) -> Option<u32> {
        self.shared.lock_state().bitmap(mac, kind)
    }

    /// Devices that have reported state since the client started.
    pub fn devices(&self) -> Vec<u32> {
        self.shared.lock_state().devices()
    }

    /// Stop the IO task and close the connection.
    ///
    /// Listener callbacks already in flight complete before this returns.
    pub async fn shutdown(mut self) {
        tracing::info!(endpoint = %self.endpoint, "Shutting down");
        self.io.shutdown().await;
    }
}
