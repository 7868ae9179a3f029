//! Asynchronous client event types.
//!
//! Events are emitted by the client through a [`tokio::sync::broadcast`]
//! channel whenever the connection state or a device channel changes.
//! Dashboards and bridges subscribe to these events instead of registering
//! per-channel listeners.

use crate::types::{ChannelValue, ReadingKind};

/// One changed channel, as produced by the diff engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelChange {
    /// Device MAC the reading came from.
    pub mac: u32,
    /// Channel index: bit position for bitmaps, 1-based slot for arrays.
    pub channel: u8,
    /// Kind of the reading.
    pub kind: ReadingKind,
    /// New value of the channel.
    pub value: ChannelValue,
}

/// An event emitted by the client.
///
/// Delivered on a best-effort basis through a bounded broadcast channel;
/// slow consumers may miss events under heavy bus traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A device channel changed value.
    ChannelChanged(ChannelChange),

    /// Connected to the gateway and handshake frames queued.
    Connected,

    /// Connection to the gateway was lost.
    Disconnected,

    /// Waiting to reconnect after a failure.
    Reconnecting {
        /// The reconnection attempt number (1-based).
        attempt: u32,
    },
}
