//! ampio-test-harness: Test utilities, mock transports, and a scripted
//! gateway for the Ampio driver.
//!
//! This crate provides [`MockTransport`] and [`MockConnector`] for
//! deterministic unit testing of the client's IO loop without a network,
//! and [`MockGateway`] for end-to-end tests over a loopback TCP socket.

pub mod mock_tcp;
pub mod mock_transport;

pub use mock_tcp::MockGateway;
pub use mock_transport::{MockConnector, MockHandle, MockTransport};
