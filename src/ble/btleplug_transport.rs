//! [`BleTransport`] backed by btleplug.
//!
//! The adapter is acquired lazily on first use so that a missing or
//! powered-off radio is just another transport failure for the
//! connection manager to back off from.

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::future;
use futures::stream::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::ble::transport::{BleTransport, NotificationStream};
use crate::error::{Error, Result};

/// A peripheral seen during a discovery sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Hardware address (or platform id where addresses are hidden).
    pub address: String,
    /// Advertised local name.
    pub name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

/// BLE transport using the first Bluetooth adapter on the system.
pub struct BtleplugTransport {
    adapter: Mutex<Option<Adapter>>,
}

impl Default for BtleplugTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl BtleplugTransport {
    /// Create a transport that opens the adapter on first use.
    pub fn new() -> Self {
        Self {
            adapter: Mutex::new(None),
        }
    }

    /// Create a transport with a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter: Mutex::new(Some(adapter)),
        }
    }

    async fn adapter(&self) -> Result<Adapter> {
        let mut slot = self.adapter.lock().await;
        if let Some(adapter) = slot.as_ref() {
            return Ok(adapter.clone());
        }

        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        *slot = Some(adapter.clone());
        Ok(adapter)
    }

    /// Scan for `duration` and list every peripheral seen.
    pub async fn discover(&self, duration: Duration) -> Result<Vec<DiscoveredDevice>> {
        let adapter = self.adapter().await?;

        adapter.start_scan(ScanFilter::default()).await?;
        let scanning = ScanGuard::new(adapter.clone());
        tokio::time::sleep(duration).await;

        let mut devices = Vec::new();
        for peripheral in adapter.peripherals().await? {
            if let Ok(Some(properties)) = peripheral.properties().await {
                devices.push(DiscoveredDevice {
                    address: properties.address.to_string(),
                    name: properties.local_name,
                    rssi: properties.rssi,
                });
            }
        }

        scanning.stop().await;

        devices.sort_by_key(|d| std::cmp::Reverse(d.rssi.unwrap_or(i16::MIN)));
        Ok(devices)
    }

    /// Whether a peripheral answers to `identifier` (address, platform id or name).
    async fn matches(peripheral: &Peripheral, identifier: &str) -> bool {
        if peripheral.id().to_string().eq_ignore_ascii_case(identifier) {
            return true;
        }

        match peripheral.properties().await {
            Ok(Some(properties)) => {
                properties.address.to_string().eq_ignore_ascii_case(identifier)
                    || properties.local_name.as_deref() == Some(identifier)
            }
            _ => false,
        }
    }
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    type Device = Peripheral;
    type Handle = Peripheral;

    async fn scan(&self, identifier: &str, timeout: Duration) -> Result<Option<Peripheral>> {
        let adapter = self.adapter().await?;
        let mut events = adapter.events().await?;

        adapter.start_scan(ScanFilter::default()).await?;
        let scanning = ScanGuard::new(adapter.clone());

        let search = async {
            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };

                let peripheral = match adapter.peripheral(&id).await {
                    Ok(p) => p,
                    Err(e) => {
                        trace!("Failed to get peripheral: {}", e);
                        continue;
                    }
                };

                if Self::matches(&peripheral, identifier).await {
                    return Some(peripheral);
                }
            }
            None
        };

        let found = tokio::time::timeout(timeout, search).await.unwrap_or(None);
        scanning.stop().await;

        Ok(found)
    }

    async fn connect(&self, device: Peripheral, timeout: Duration) -> Result<Peripheral> {
        let timed_out = |_| Error::Timeout {
            operation: "connect",
        };

        // A link that comes up late or half-way must not outlive a failure
        let link = LinkGuard::new(device.clone());
        let established = async {
            device.connect().await?;
            device.discover_services().await
        };

        match tokio::time::timeout(timeout, established).await {
            Ok(Ok(())) => {
                link.keep();
                debug!("Connected to {}", device.id());
                Ok(device)
            }
            Ok(Err(e)) => {
                link.drop_link().await;
                Err(e.into())
            }
            Err(elapsed) => {
                link.drop_link().await;
                Err(timed_out(elapsed))
            }
        }
    }

    async fn subscribe(
        &self,
        handle: &Peripheral,
        characteristic: Uuid,
    ) -> Result<NotificationStream> {
        let target = handle
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: characteristic.to_string(),
            })?;

        // Open the stream before subscribing so the first notification is not lost
        let notifications = handle.notifications().await?;
        handle.subscribe(&target).await?;

        debug!(
            "Subscribed to {}, properties: {:?}",
            characteristic, target.properties
        );

        Ok(Box::pin(
            notifications
                .filter(move |n| future::ready(n.uuid == characteristic))
                .map(|n| Bytes::from(n.value)),
        ))
    }

    async fn is_alive(&self, handle: &Peripheral) -> bool {
        handle.is_connected().await.unwrap_or(false)
    }

    async fn disconnect(&self, handle: &Peripheral) -> Result<()> {
        handle.disconnect().await?;
        Ok(())
    }
}

/// Stops an active scan, also when the scanning future is abandoned.
struct ScanGuard {
    adapter: Option<Adapter>,
}

impl ScanGuard {
    fn new(adapter: Adapter) -> Self {
        Self {
            adapter: Some(adapter),
        }
    }

    async fn stop(mut self) {
        if let Some(adapter) = self.adapter.take() {
            if let Err(e) = adapter.stop_scan().await {
                debug!("Failed to stop scan: {}", e);
            }
        }
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        if let Some(adapter) = self.adapter.take() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    if let Err(e) = adapter.stop_scan().await {
                        debug!("Failed to stop abandoned scan: {}", e);
                    }
                });
            }
        }
    }
}

/// Disconnects a freshly connected peripheral unless the connect attempt
/// completes.
struct LinkGuard {
    peripheral: Option<Peripheral>,
}

impl LinkGuard {
    fn new(peripheral: Peripheral) -> Self {
        Self {
            peripheral: Some(peripheral),
        }
    }

    fn keep(mut self) {
        self.peripheral = None;
    }

    async fn drop_link(mut self) {
        if let Some(peripheral) = self.peripheral.take() {
            if let Err(e) = peripheral.disconnect().await {
                debug!("Failed to drop half-open link: {}", e);
            }
        }
    }
}

impl Drop for LinkGuard {
    fn drop(&mut self) {
        if let Some(peripheral) = self.peripheral.take() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    if let Err(e) = peripheral.disconnect().await {
                        debug!("Failed to drop abandoned link: {}", e);
                    }
                });
            }
        }
    }
}
