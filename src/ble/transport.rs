//! The narrow BLE interface the connection manager drives.
//!
//! The real implementation lives in [`crate::ble::btleplug_transport`];
//! tests substitute scripted transports.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use uuid::Uuid;

use crate::error::Result;

/// Stream of raw notification payloads from one characteristic.
///
/// The stream ends when the transport stops delivering notifications.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// Scan, connect and subscribe primitives for a single peripheral.
#[async_trait]
pub trait BleTransport: Send + Sync + 'static {
    /// A peripheral found by [`scan`](Self::scan), not yet connected.
    type Device: Send + 'static;
    /// A live connection.
    type Handle: Send + Sync + 'static;

    /// Look for the peripheral with the given address or name.
    ///
    /// Returns `Ok(None)` if it did not show up within `timeout`.
    async fn scan(&self, identifier: &str, timeout: Duration) -> Result<Option<Self::Device>>;

    /// Connect to a scanned peripheral within `timeout`.
    async fn connect(&self, device: Self::Device, timeout: Duration) -> Result<Self::Handle>;

    /// Subscribe to notifications of `characteristic`.
    async fn subscribe(
        &self,
        handle: &Self::Handle,
        characteristic: Uuid,
    ) -> Result<NotificationStream>;

    /// Whether the connection is still up.
    async fn is_alive(&self, handle: &Self::Handle) -> bool;

    /// Tear the connection down.
    async fn disconnect(&self, handle: &Self::Handle) -> Result<()>;
}
