//! Ampio over IP gateway client.
//!
//! This crate speaks the binary protocol of Ampio building-automation
//! gateways (MSERV-3s and compatible) over TCP. It provides:
//!
//! - **Frame codec** ([`frame`], [`can`]) -- encode and decode transport
//!   frames with their additive checksum, and the 13-byte CAN sub-frames
//!   they carry.
//! - **Decoder** ([`decoder`]) -- classify sub-frames into binary, byte and
//!   temperature readings.
//! - **State store** ([`state`]) -- remember the last value of every
//!   channel and report only what changed.
//! - **Listeners** ([`listeners`]) -- per-channel callbacks, run on a
//!   dedicated dispatch thread.
//! - **Command builders** ([`commands`]) -- handshake frames and the binary
//!   and byte output commands.
//! - **AmpioClient** ([`client`]) -- the connection manager handle: queued
//!   sends, automatic reconnect, events and state queries.
//! - **AmpioBuilder** ([`builder`]) -- fluent builder for `AmpioClient`.
//!
//! # Example
//!
//! ```
//! use ampio_ip::can::CanFrame;
//! use ampio_ip::decoder::{classify, Classification, Reading};
//! use ampio_ip::frame::{decode_stream, encode_transport_frame, frame_type};
//!
//! // A gateway frame carrying one binary status report from device 0x1305.
//! let sub = CanFrame::new(0x1305, 8, &[0xFE, 0x0F, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00]);
//! let bytes = encode_transport_frame(frame_type::CAN, sub.as_bytes()).unwrap();
//!
//! let decoded = decode_stream(&bytes);
//! let can = CanFrame::from_slice(&decoded.frames[0].payload).unwrap();
//! assert_eq!(can.mac(), 0x1305);
//! assert_eq!(
//!     classify(&can),
//!     Classification::Reading(Reading::Binary { inputs: 0b101, outputs: 0 })
//! );
//! ```

pub mod builder;
pub mod can;
pub mod client;
pub mod commands;
pub mod decoder;
pub mod frame;
pub(crate) mod io;
pub mod listeners;
pub mod state;

pub use builder::{AmpioBuilder, DEFAULT_PORT};
pub use client::AmpioClient;
pub use listeners::Listener;
