//! Peripheral Transport
//!
//! The seam between the controller and whatever radio stack carries frames.
//! Implementations push [`TransportEvent`]s into the service queue; the
//! controller only ever calls the request methods below.

use crate::domain::models::PeripheralHandle;
use async_trait::async_trait;
use thiserror::Error;

/// Events raised by the transport, delivered through the service queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The radio link to the peripheral is up
    LinkUp,
    /// The radio link dropped (remote close, out of range, ...)
    LinkDown,
    /// Outcome of a service/characteristic enumeration request
    ServicesDiscovered { ok: bool },
    /// Bytes from a notification or from a read
    DataAvailable(Vec<u8>),
    /// An advertisement seen while discovery is running
    DeviceDiscovered(PeripheralHandle),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("bluetooth adapter unavailable")]
    Unavailable,

    #[error("invalid peripheral address: {0}")]
    InvalidAddress(String),

    #[error("connection failed: {0}")]
    ConnectFailed(String),

    #[error("GATT operation failed: {0}")]
    Gatt(String),

    #[error("link is not connected")]
    NotConnected,

    #[error("transport I/O error: {0}")]
    Io(String),

    #[error("{0} timed out")]
    TimedOut(&'static str),
}

/// The adapter side: discovery plus opening links
#[async_trait]
pub trait PeripheralTransport: Send {
    type Link: PeripheralLink;

    async fn start_discovery(&mut self) -> Result<(), TransportError>;
    async fn stop_discovery(&mut self) -> Result<(), TransportError>;

    /// Start connecting to `address`
    ///
    /// Returns the link handle right away; `LinkUp`/`LinkDown` report how the
    /// attempt ends.
    async fn connect(&mut self, address: &str) -> Result<Self::Link, TransportError>;
}

/// One open connection handle
///
/// Whoever holds the handle owns the underlying OS resource and must call
/// [`PeripheralLink::close`] exactly once before dropping it.
#[async_trait]
pub trait PeripheralLink: Send {
    /// Request service enumeration; the result arrives as `ServicesDiscovered`.
    /// Must return as soon as the request is issued.
    async fn discover_services(&mut self) -> Result<(), TransportError>;
    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError>;
    async fn read_frame(&mut self) -> Result<Vec<u8>, TransportError>;
    async fn set_notify(&mut self, enabled: bool) -> Result<(), TransportError>;
    /// Disconnect and release the handle
    async fn close(&mut self) -> Result<(), TransportError>;
}
