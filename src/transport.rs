//! Transport seam between the session cycle and a BLE stack.
//!
//! [`crate::ble::BleTransport`] implements it on top of `btleplug`; tests drive
//! the session cycle with an in-memory implementation.

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::Result;

/// A notification pushed by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Characteristic the value was pushed on
    pub characteristic: Uuid,
    /// Raw bytes
    pub value: Vec<u8>,
}

/// Stream of notifications from one open session
pub type NotificationStream = BoxStream<'static, Notification>;

/// Opens sessions to a device
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Session type produced by [`Transport::connect`]
    type Session: TransportSession;

    /// Open a connection to the device at `address`
    async fn connect(&self, address: &str) -> Result<Self::Session>;

    /// Whether a connectable path to `address` currently exists
    async fn is_reachable(&self, address: &str) -> bool;
}

/// One open connection
#[async_trait]
pub trait TransportSession: Send + Sync + 'static {
    /// Whether the link is actually up
    async fn is_connected(&self) -> bool;

    /// Read a characteristic value
    async fn read_characteristic(&self, characteristic: Uuid) -> Result<Vec<u8>>;

    /// Enable notifications on `characteristic` and return their stream
    async fn start_notify(&mut self, characteristic: Uuid) -> Result<NotificationStream>;

    /// Write a descriptor of `characteristic`
    async fn write_descriptor(
        &self,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<()>;

    /// Disable notifications on `characteristic`
    async fn stop_notify(&mut self, characteristic: Uuid) -> Result<()>;

    /// Close the connection
    async fn disconnect(&self) -> Result<()>;
}
