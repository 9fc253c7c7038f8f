//! BLE communication module.
//!
//! This module provides the link to the thermometer: the transport
//! abstraction, its btleplug implementation, and the connection manager
//! that keeps the link alive.

#[cfg(feature = "bluetooth")]
pub mod btleplug_transport;
pub mod connection;
pub mod transport;
pub mod uuids;

#[cfg(feature = "bluetooth")]
pub use btleplug_transport::{BtleplugTransport, DiscoveredDevice};
pub use connection::{
    ConnectionManager, LinkSettings, LinkState, ReadingHandler, TRANSPORT_GRACE,
};
pub use transport::{BleTransport, NotificationStream};
pub use uuids::*;
