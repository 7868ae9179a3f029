//! Transport frame encoder/decoder.
//!
//! Every message between client and gateway travels inside a transport
//! frame. This module handles the pure byte-level encoding and decoding of
//! those frames and their additive checksum. No I/O happens here.
//!
//! # Frame format
//!
//! ```text
//! 2D D4 <length:u32 LE> <type> [<payload>...] <crc:u16 LE>
//! ```
//!
//! - Preamble: `0xD42D` as a little-endian `u16`
//! - `length`: number of bytes following the header, i.e. `3 + payload`
//! - `type`: frame type (`0x00` CAN traffic, `0x05` binary output, `0x0A`-`0x0C` handshake)
//! - `crc`: `0x2D` plus the sum of all payload bytes, truncated to 16 bits;
//!   the type byte is not covered

use bytes::{BufMut, BytesMut};

use ampio_core::{Error, Result};

/// Frame preamble, little-endian on the wire.
pub const PREAMBLE: u16 = 0xD42D;

/// The preamble as it appears in the byte stream.
pub const PREAMBLE_BYTES: [u8; 2] = PREAMBLE.to_le_bytes();

/// Size of the preamble plus length field.
pub const HEADER_LEN: usize = 6;

/// Checksum seed.
pub const CRC_SEED: u16 = 0x2D;

/// Largest `length` accepted from the gateway.
///
/// Gateway frames carry a handful of 13-byte sub-frames; a larger length
/// means the stream position is wrong, not that a huge frame is coming.
/// Kept small so a corrupted header cannot stall decoding while the
/// claimed body trickles in.
pub const MAX_FRAME_LEN: u32 = 1024;

/// Frame type bytes.
pub mod frame_type {
    /// CAN bus traffic: payload is a sequence of 13-byte sub-frames.
    pub const CAN: u8 = 0x00;
    /// Binary output command addressed to the gateway server.
    pub const BINARY_OUTPUT: u8 = 0x05;
    /// Handshake: username.
    pub const USER: u8 = 0x0A;
    /// Handshake: password.
    pub const PASSWORD: u8 = 0x0B;
    /// Handshake: client info.
    pub const INFO: u8 = 0x0C;
}

/// A decoded transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFrame {
    /// Frame type byte.
    pub frame_type: u8,
    /// Payload bytes, excluding the type byte and checksum.
    pub payload: Vec<u8>,
    /// Checksum carried by the frame (as received, or as computed when built).
    pub crc: u16,
}

impl TransportFrame {
    /// Build a frame with a freshly computed checksum.
    pub fn new(frame_type: u8, payload: impl Into<Vec<u8>>) -> Self {
        let payload = payload.into();
        let crc = checksum(&payload);
        Self {
            frame_type,
            payload,
            crc,
        }
    }

    /// Value of the wire `length` field for this frame.
    pub fn length(&self) -> usize {
        3 + self.payload.len()
    }

    /// Returns `true` if the carried checksum matches the payload.
    pub fn has_valid_crc(&self) -> bool {
        self.crc == checksum(&self.payload)
    }

    /// Encode into wire bytes, recomputing the checksum.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_transport_frame(self.frame_type, &self.payload)
    }
}

/// Compute the frame checksum of `payload`.
///
/// # Example
///
/// ```
/// use ampio_ip::frame::checksum;
///
/// assert_eq!(checksum(&[]), 0x002D);
/// assert_eq!(checksum(b"ok"), 0x0107);
/// ```
pub fn checksum(payload: &[u8]) -> u16 {
    payload
        .iter()
        .fold(CRC_SEED, |crc, &b| crc.wrapping_add(u16::from(b)))
}

/// Encode a transport frame into raw bytes ready for transmission.
///
/// Fails with [`Error::FrameTooLarge`] only if the payload cannot be
/// described by the 32-bit length field.
///
/// # Example
///
/// ```
/// use ampio_ip::frame::{encode_transport_frame, frame_type};
///
/// let bytes = encode_transport_frame(frame_type::INFO, b"ok").unwrap();
/// assert_eq!(
///     bytes,
///     vec![0x2D, 0xD4, 0x05, 0x00, 0x00, 0x00, 0x0C, 0x6F, 0x6B, 0x07, 0x01]
/// );
/// ```
pub fn encode_transport_frame(frame_type: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let length = payload
        .len()
        .checked_add(3)
        .and_then(|len| u32::try_from(len).ok())
        .ok_or(Error::FrameTooLarge(payload.len()))?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + length as usize);
    buf.put_u16_le(PREAMBLE);
    buf.put_u32_le(length);
    buf.put_u8(frame_type);
    buf.put_slice(payload);
    buf.put_u16_le(checksum(payload));
    Ok(buf.to_vec())
}

/// A problem found while scanning the inbound stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFault {
    /// The frame decoded, but its checksum does not match the payload.
    ChecksumMismatch {
        /// Type byte of the affected frame.
        frame_type: u8,
        /// Checksum computed over the payload.
        expected: u16,
        /// Checksum carried by the frame.
        received: u16,
    },

    /// The header at `offset` is not a valid frame header; the stream
    /// position can no longer be trusted.
    Desync {
        /// Offset of the bad header within the scanned buffer.
        offset: usize,
        /// Preamble field found there.
        preamble: u16,
        /// Length field found there.
        length: u32,
    },
}

/// Result of scanning a buffer with [`decode_stream`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedStream {
    /// Complete frames, in stream order.
    pub frames: Vec<TransportFrame>,
    /// Bytes covered by `frames`. On desync this is the offset of the bad
    /// header; otherwise anything past it is a partial frame to keep.
    pub consumed: usize,
    /// Checksum and framing faults seen during the scan.
    pub faults: Vec<StreamFault>,
}

impl DecodedStream {
    /// Returns `true` if the scan stopped on a framing desync.
    pub fn is_desynced(&self) -> bool {
        self.faults
            .iter()
            .any(|f| matches!(f, StreamFault::Desync { .. }))
    }
}

/// Decode every complete transport frame at the start of `buf`.
///
/// The buffer may hold zero, one, or several concatenated frames followed
/// by a partial frame. A checksum mismatch is reported but the frame is
/// still returned. A bad header stops the scan and is reported as
/// [`StreamFault::Desync`]; use [`resync_offset`] to find the next
/// plausible frame start.
///
/// # Example
///
/// ```
/// use ampio_ip::frame::{decode_stream, encode_transport_frame};
///
/// let mut buf = encode_transport_frame(0x0C, b"ok").unwrap();
/// buf.extend_from_slice(&[0x2D, 0xD4, 0x05]); // start of the next frame
///
/// let decoded = decode_stream(&buf);
/// assert_eq!(decoded.frames.len(), 1);
/// assert_eq!(decoded.frames[0].payload, b"ok");
/// assert_eq!(decoded.consumed, 11);
/// ```
pub fn decode_stream(buf: &[u8]) -> DecodedStream {
    let mut decoded = DecodedStream::default();
    let mut pos = 0;

    while buf.len() - pos >= HEADER_LEN {
        let rest = &buf[pos..];
        let preamble = u16::from_le_bytes([rest[0], rest[1]]);
        let length = u32::from_le_bytes([rest[2], rest[3], rest[4], rest[5]]);

        if preamble != PREAMBLE || !(3..=MAX_FRAME_LEN).contains(&length) {
            decoded.faults.push(StreamFault::Desync {
                offset: pos,
                preamble,
                length,
            });
            break;
        }

        let total = HEADER_LEN + length as usize;
        if rest.len() < total {
            break;
        }

        let body = &rest[HEADER_LEN..total];
        let crc_at = body.len() - 2;
        let frame = TransportFrame {
            frame_type: body[0],
            payload: body[1..crc_at].to_vec(),
            crc: u16::from_le_bytes([body[crc_at], body[crc_at + 1]]),
        };

        if !frame.has_valid_crc() {
            decoded.faults.push(StreamFault::ChecksumMismatch {
                frame_type: frame.frame_type,
                expected: checksum(&frame.payload),
                received: frame.crc,
            });
        }

        decoded.frames.push(frame);
        pos += total;
    }

    decoded.consumed = pos;
    decoded
}

/// Number of bytes to discard from a buffer whose first header is bad.
///
/// Skips to the next occurrence of the preamble after position 0. If there
/// is none, everything is discarded except a trailing `0x2D`, which may be
/// the first half of a preamble still in flight.
pub fn resync_offset(buf: &[u8]) -> usize {
    if let Some(pos) = buf.windows(2).skip(1).position(|w| w == PREAMBLE_BYTES) {
        return pos + 1;
    }
    match buf.last() {
        Some(&b) if b == PREAMBLE_BYTES[0] && buf.len() > 1 => buf.len() - 1,
        _ => buf.len(),
    }
}
