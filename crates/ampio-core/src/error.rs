//! Error types for the Ampio driver.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport-layer, protocol-layer, and
//! application-layer errors are all captured here.

use crate::types::ReadingKind;

/// The error type for all Ampio operations.
///
/// Variants cover the failure modes met when talking to a gateway:
/// socket failures, malformed frames, rejected commands, and bounds
/// violations in the channel state cache.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (TCP socket).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (malformed transport frame or sub-frame).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for the gateway.
    #[error("timeout waiting for gateway")]
    Timeout,

    /// The requested operation is not supported for this target.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// An invalid parameter was passed to a command or the builder.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// No connection to the gateway has been established, or the client
    /// has been shut down.
    #[error("not connected")]
    NotConnected,

    /// The connection to the gateway was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// A channel index fell outside the fixed-size array kept for a kind.
    ///
    /// Raised instead of writing into a neighbouring slot.
    #[error("channel {channel} out of range for {kind} readings")]
    ChannelOutOfRange {
        /// Kind whose array was addressed.
        kind: ReadingKind,
        /// The offending 1-based channel index.
        channel: usize,
    },

    /// A payload does not fit the 32-bit length field of a transport frame.
    #[error("frame payload too large: {0} bytes")]
    FrameTooLarge(usize),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
