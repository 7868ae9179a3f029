//! Outbound frame builders.
//!
//! This module constructs the complete transport frames the client sends:
//! the three handshake frames and the two output commands. All functions
//! are pure; the IO task queues the returned bytes.
//!
//! Addressing follows the gateway's split between the server itself
//! (MAC `0` or `1`, which owns the binary outputs on the gateway board)
//! and modules on the CAN bus (any larger MAC).

use ampio_core::{Error, Result, format_mac};

use crate::can::CanFrame;
use crate::frame::{encode_transport_frame, frame_type};

/// Default gateway login.
pub const DEFAULT_USERNAME: &str = "admin";

/// Default gateway password.
pub const DEFAULT_PASSWORD: &str = "12345";

/// Payload of the client info frame.
const INFO_PAYLOAD: &[u8] = b"ok";

/// Largest MAC that addresses the gateway server rather than a bus device.
pub const SERVER_MAC_MAX: u32 = 1;

/// Number of binary outputs on the gateway server.
pub const SERVER_OUTPUT_COUNT: u8 = 8;

/// Sub-frame MAC used for commands relayed to a bus device.
const RELAY_MAC: u32 = 0x0F00_0000;

/// Opcode (`d4`) for "set byte output".
const OP_SET_BYTE: u8 = 0x07;

/// Returns `true` if `mac` addresses the gateway server.
pub fn is_server_mac(mac: u32) -> bool {
    mac <= SERVER_MAC_MAX
}

/// Handshake frame carrying the username.
pub fn user_frame(username: &str) -> Result<Vec<u8>> {
    encode_transport_frame(frame_type::USER, username.as_bytes())
}

/// Handshake frame carrying the password.
pub fn password_frame(password: &str) -> Result<Vec<u8>> {
    encode_transport_frame(frame_type::PASSWORD, password.as_bytes())
}

/// Handshake frame announcing the client.
///
/// # Example
///
/// ```
/// use ampio_ip::commands::info_frame;
///
/// assert_eq!(
///     info_frame().unwrap(),
///     vec![0x2D, 0xD4, 0x05, 0x00, 0x00, 0x00, 0x0C, 0x6F, 0x6B, 0x07, 0x01]
/// );
/// ```
pub fn info_frame() -> Result<Vec<u8>> {
    encode_transport_frame(frame_type::INFO, INFO_PAYLOAD)
}

/// The three handshake frames, in the order they must be sent.
pub fn handshake_frames(username: &str, password: &str) -> Result<[Vec<u8>; 3]> {
    Ok([user_frame(username)?, password_frame(password)?, info_frame()?])
}

/// Switch binary output `channel` (0-7) on the gateway server.
///
/// Returns [`Error::Unsupported`] for device MACs and
/// [`Error::InvalidParameter`] for channels past the last output.
pub fn set_binary_output(mac: u32, channel: u8, on: bool) -> Result<Vec<u8>> {
    if !is_server_mac(mac) {
        return Err(Error::Unsupported(format!(
            "binary output on device {}",
            format_mac(mac)
        )));
    }
    if channel >= SERVER_OUTPUT_COUNT {
        return Err(Error::InvalidParameter(format!(
            "binary output channel {channel} (server has {SERVER_OUTPUT_COUNT})"
        )));
    }

    let state = if on { 0xFF } else { 0x00 };
    let frame = CanFrame::new(0, 0, &[1 << channel, state]);
    encode_transport_frame(frame_type::BINARY_OUTPUT, frame.as_bytes())
}

/// Set byte output `channel` on bus device `mac` to `value`.
///
/// The channel is passed to the device as given. Returns
/// [`Error::Unsupported`] for the gateway server.
///
/// # Example
///
/// ```
/// use ampio_ip::commands::set_byte_output;
///
/// let bytes = set_byte_output(0x1305, 1, 0x02).unwrap();
/// assert_eq!(
///     bytes,
///     vec![
///         0x2D, 0xD4, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0F, 0x08, 0x00, 0x00,
///         0x13, 0x05, 0x07, 0x01, 0x02, 0x00, 0x66, 0x00
///     ]
/// );
/// ```
pub fn set_byte_output(mac: u32, channel: u8, value: u8) -> Result<Vec<u8>> {
    if is_server_mac(mac) {
        return Err(Error::Unsupported(
            "byte output on the gateway server".into(),
        ));
    }

    let mut frame = CanFrame::new(RELAY_MAC, 8, &[]);
    frame.set_mac2(mac);
    frame.set_data(4, OP_SET_BYTE);
    frame.set_data(5, channel);
    frame.set_data(6, value);
    encode_transport_frame(frame_type::CAN, frame.as_bytes())
}
