//! ampio-core: Core traits, types, and error definitions for the Ampio
//! over IP driver.
//!
//! This crate defines the protocol-agnostic pieces that the driver, the
//! transports, and the test harness share. Applications that only consume
//! change events can depend on these types without pulling in the socket
//! code.
//!
//! # Key types
//!
//! - [`Transport`] / [`Connector`] -- byte-level channel to a gateway and
//!   the factory that opens one per connection attempt
//! - [`ReadingKind`], [`ChannelValue`] -- what a device channel reports
//! - [`ClientEvent`], [`ChannelChange`] -- asynchronous notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod helpers;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use events::{ChannelChange, ClientEvent};
pub use helpers::{format_bytes, format_mac, parse_mac};
pub use transport::{Connector, Transport};
pub use types::*;
