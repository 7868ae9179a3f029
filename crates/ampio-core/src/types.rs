//! Core types used throughout the Ampio driver.
//!
//! These describe what the gateway reports about devices on the bus,
//! independent of how the bytes were framed on the wire.

use std::fmt;
use std::str::FromStr;

/// Semantic category of a device reading.
///
/// Together with the device MAC and a channel index, the kind addresses a
/// single observable value (one input bit, one byte slot, one temperature
/// sensor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReadingKind {
    /// Binary inputs, reported as a 24-bit bitmap.
    Input,
    /// Binary outputs, reported as a 24-bit bitmap.
    Output,
    /// Byte-valued channels (dimmers, LED levels), 18 slots per device.
    Byte,
    /// Float temperature sensors at 0.1 degree resolution, 6 slots per device.
    TempF,
}

impl ReadingKind {
    /// All kinds, in wire-report order.
    pub const ALL: [ReadingKind; 4] = [
        ReadingKind::Input,
        ReadingKind::Output,
        ReadingKind::Byte,
        ReadingKind::TempF,
    ];

    /// Number of addressable channels a device exposes for this kind.
    ///
    /// Bitmap kinds are indexed from 0 by bit position; array kinds are
    /// indexed from 1.
    pub fn channel_count(&self) -> usize {
        match self {
            ReadingKind::Input | ReadingKind::Output => 24,
            ReadingKind::Byte => 18,
            ReadingKind::TempF => 6,
        }
    }

    /// Returns `true` for kinds reported as a bitmap.
    pub fn is_bitmap(&self) -> bool {
        matches!(self, ReadingKind::Input | ReadingKind::Output)
    }
}

impl fmt::Display for ReadingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReadingKind::Input => "input",
            ReadingKind::Output => "output",
            ReadingKind::Byte => "byte",
            ReadingKind::TempF => "tempF",
        };
        write!(f, "{s}")
    }
}

/// Error returned when parsing an unknown reading kind string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseReadingKindError(String);

impl fmt::Display for ParseReadingKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown reading kind: {}", self.0)
    }
}

impl std::error::Error for ParseReadingKindError {}

impl FromStr for ReadingKind {
    type Err = ParseReadingKindError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "input" | "in" => Ok(ReadingKind::Input),
            "output" | "out" => Ok(ReadingKind::Output),
            "byte" => Ok(ReadingKind::Byte),
            "tempf" | "temp" => Ok(ReadingKind::TempF),
            _ => Err(ParseReadingKindError(s.to_string())),
        }
    }
}

/// The value of a single channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelValue {
    /// One bit of an input or output bitmap.
    Bit(bool),
    /// A raw byte slot.
    Byte(u8),
    /// A temperature in degrees Celsius.
    Temperature(f32),
}

impl fmt::Display for ChannelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelValue::Bit(on) => write!(f, "{}", u8::from(*on)),
            ChannelValue::Byte(b) => write!(f, "{b}"),
            ChannelValue::Temperature(t) => write!(f, "{t:.1}"),
        }
    }
}

/// Lifecycle state of the connection to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No session, and none being attempted.
    Disconnected,
    /// A TCP connection attempt is in flight.
    Connecting,
    /// Connected; handshake frames are being queued.
    Handshaking,
    /// Handshake queued; the outbound queue is draining.
    Ready,
    /// Waiting out the reconnect delay after a failure.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Ready => "ready",
            ConnectionState::Reconnecting => "reconnecting",
        };
        write!(f, "{s}")
    }
}
