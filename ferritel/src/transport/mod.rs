//! Cleartext transport layer.
//!
//! A [`Connector`] opens a [`Transport`] to one target. The Telnet
//! implementation speaks RFC 854 over TCP; [`sim`] provides an in-process
//! device network for tests and dry runs.

mod codec;
pub mod config;
pub mod sim;
mod telnet;

pub use codec::TelnetCodec;
pub use config::{DEFAULT_TELNET_PORT, TransportConfig};
pub use telnet::{TelnetConnector, TelnetTransport};

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// An open byte-stream connection to one device.
pub trait Transport: Send {
    /// Write bytes to the device.
    fn send(&mut self, data: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Read whatever the device has sent, waiting at most `timeout`.
    ///
    /// Returns an empty vector when nothing arrived in time. A closed
    /// connection is reported as [`TransportError::Disconnected`](crate::error::TransportError::Disconnected).
    fn receive(&mut self, timeout: Duration) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Tear down the connection. Closing twice is a no-op.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}

/// Opens transports to targets.
pub trait Connector: Send + Sync {
    /// The transport type produced by this connector.
    type Transport: Transport;

    /// Connect to the host described by `config`.
    fn open(&self, config: &TransportConfig)
    -> impl Future<Output = Result<Self::Transport>> + Send;
}
