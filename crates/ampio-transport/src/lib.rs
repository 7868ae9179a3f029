//! Transport implementations for the Ampio driver.
//!
//! This crate provides the TCP implementation of the
//! [`Transport`](ampio_core::Transport) trait from `ampio-core`, plus a
//! [`TcpConnector`] that opens a fresh [`TcpTransport`] for every connection
//! attempt the client makes.
//!
//! # Example
//!
//! ```no_run
//! use ampio_transport::TcpTransport;
//! use ampio_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> ampio_core::Result<()> {
//! let mut transport = TcpTransport::connect("192.168.1.140:1235").await?;
//!
//! // Info frame: type 12, payload "ok"
//! transport
//!     .send(&[0x2d, 0xd4, 0x05, 0x00, 0x00, 0x00, 0x0c, 0x6f, 0x6b, 0x07, 0x01])
//!     .await?;
//!
//! let mut buf = [0u8; 1024];
//! let n = transport.receive(&mut buf, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

pub mod tcp;

pub use tcp::{TcpConnector, TcpTransport};
