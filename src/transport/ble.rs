//! BLE central transport built on btleplug.
//!
//! Discovery is filtered by the endpoint's primary service and advertised
//! name prefix. Each logical channel maps to one GATT characteristic; chunk
//! writes use write-with-response so every packet is acknowledged before the
//! next goes out, which is what the constrained peer requires.

use std::collections::HashMap;
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::StreamExt;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::protocol::DEFAULT_CHUNK_SIZE;
use crate::transport::{ChannelId, EndpointDescriptor, Transport, TransportEvent};

/// How long discovery scans before giving up.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// BLE transport for attendance devices.
pub struct BleTransport {
    chunk_size: usize,
    scan_timeout: Duration,
    adapter: Option<Adapter>,
    peripheral: Option<Peripheral>,
    characteristics: HashMap<ChannelId, Characteristic>,
    event_tx: Option<mpsc::Sender<TransportEvent>>,
    notify_task: Option<JoinHandle<()>>,
    watch_task: Option<JoinHandle<()>>,
}

impl Default for BleTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl BleTransport {
    /// Creates a transport with the default chunk size and scan timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            adapter: None,
            peripheral: None,
            characteristics: HashMap::new(),
            event_tx: None,
            notify_task: None,
            watch_task: None,
        }
    }

    /// Sets the chunk size for links with a larger negotiated MTU.
    #[must_use]
    pub const fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Sets the discovery scan timeout.
    #[must_use]
    pub const fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    fn characteristic(&self, channel: ChannelId) -> Result<&Characteristic> {
        self.characteristics
            .get(&channel)
            .ok_or(Error::ChannelUnavailable { channel })
    }

    fn live_peripheral(&self) -> Result<&Peripheral> {
        self.peripheral.as_ref().ok_or(Error::NotConnected)
    }

    async fn discover(&mut self, endpoint: &EndpointDescriptor) -> Result<Peripheral> {
        let manager = Manager::new().await.map_err(map_btle)?;
        let adapters = manager.adapters().await.map_err(map_btle)?;
        let Some(adapter) = adapters.into_iter().next() else {
            return Err(Error::NotSupported {
                reason: "no Bluetooth adapter present".into(),
            });
        };

        adapter
            .start_scan(ScanFilter {
                services: vec![endpoint.service],
            })
            .await
            .map_err(map_btle)?;
        tracing::info!(prefix = %endpoint.name_prefix, "scanning for device");

        let deadline = tokio::time::Instant::now() + self.scan_timeout;
        let found = loop {
            if let Some(peripheral) = find_matching(&adapter, endpoint).await {
                break Some(peripheral);
            }
            if tokio::time::Instant::now() >= deadline {
                break None;
            }
            tokio::time::sleep(SCAN_POLL_INTERVAL).await;
        };
        if let Err(err) = adapter.stop_scan().await {
            tracing::debug!(error = %err, "stop_scan failed");
        }

        let peripheral = found.ok_or(Error::DeviceNotFound)?;
        self.adapter = Some(adapter);
        Ok(peripheral)
    }

    async fn start_pumps(&mut self) -> Result<()> {
        let Some(tx) = self.event_tx.clone() else {
            return Ok(());
        };
        let peripheral = self.live_peripheral()?.clone();

        // Notification pump: every characteristic value lands here; chunks on
        // unknown characteristics are dropped.
        let notifications = peripheral.notifications().await.map_err(map_btle)?;
        let chunk_tx = tx.clone();
        self.notify_task = Some(tokio::spawn(async move {
            let mut notifications = notifications;
            while let Some(notification) = notifications.next().await {
                let Some(channel) = ChannelId::from_uuid(notification.uuid) else {
                    tracing::trace!(uuid = %notification.uuid, "chunk on unknown characteristic");
                    continue;
                };
                let event = TransportEvent::Chunk {
                    channel,
                    data: Bytes::from(notification.value),
                };
                if chunk_tx.send(event).await.is_err() {
                    return;
                }
            }
            tracing::debug!("notification stream ended");
            let _ = chunk_tx.send(TransportEvent::LinkLost).await;
        }));

        // Disconnect watch: the adapter reports unsolicited link loss.
        if let Some(adapter) = &self.adapter {
            let mut events = adapter.events().await.map_err(map_btle)?;
            let device_id = peripheral.id();
            self.watch_task = Some(tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    if let CentralEvent::DeviceDisconnected(id) = event {
                        if id == device_id {
                            tracing::info!("peer disconnected");
                            let _ = tx.send(TransportEvent::LinkLost).await;
                            return;
                        }
                    }
                }
            }));
        }
        Ok(())
    }

    fn stop_pumps(&mut self) {
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
        if let Some(task) = self.watch_task.take() {
            task.abort();
        }
    }
}

impl Transport for BleTransport {
    fn connect<'a>(
        &'a mut self,
        endpoint: &'a EndpointDescriptor,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.peripheral.is_some() {
                return Ok(());
            }

            let peripheral = self.discover(endpoint).await?;
            peripheral.connect().await.map_err(map_btle)?;
            peripheral.discover_services().await.map_err(map_btle)?;

            let mut characteristics = HashMap::new();
            for characteristic in peripheral.characteristics() {
                if let Some(channel) = ChannelId::from_uuid(characteristic.uuid) {
                    characteristics.insert(channel, characteristic);
                }
            }
            tracing::info!(channels = characteristics.len(), "connected to device");

            self.characteristics = characteristics;
            self.peripheral = Some(peripheral);
            self.start_pumps().await?;
            Ok(())
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.stop_pumps();
            self.characteristics.clear();
            if let Some(peripheral) = self.peripheral.take() {
                if let Err(err) = peripheral.disconnect().await {
                    tracing::debug!(error = %err, "peripheral disconnect failed");
                }
            }
            self.adapter = None;
            Ok(())
        })
    }

    fn write_chunk(&mut self, channel: ChannelId, chunk: Bytes) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let peripheral = self.live_peripheral()?;
            let characteristic = self.characteristic(channel)?;
            peripheral
                .write(characteristic, &chunk, WriteType::WithResponse)
                .await
                .map_err(map_btle)
        })
    }

    fn read_channel(&mut self, channel: ChannelId) -> BoxFuture<'_, Result<Bytes>> {
        Box::pin(async move {
            let peripheral = self.live_peripheral()?;
            let characteristic = self.characteristic(channel)?;
            let value = peripheral.read(characteristic).await.map_err(map_btle)?;
            Ok(Bytes::from(value))
        })
    }

    fn subscribe(&mut self, channel: ChannelId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let peripheral = self.live_peripheral()?;
            let characteristic = self.characteristic(channel)?;
            peripheral.subscribe(characteristic).await.map_err(map_btle)
        })
    }

    fn set_event_sender(&mut self, sender: mpsc::Sender<TransportEvent>) {
        self.event_tx = Some(sender);
    }

    fn channels(&self) -> Vec<ChannelId> {
        self.characteristics.keys().copied().collect()
    }

    fn is_connected(&self) -> bool {
        self.peripheral.is_some()
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

async fn find_matching(adapter: &Adapter, endpoint: &EndpointDescriptor) -> Option<Peripheral> {
    let peripherals = adapter.peripherals().await.ok()?;
    for peripheral in peripherals {
        let Ok(Some(properties)) = peripheral.properties().await else {
            continue;
        };
        if properties
            .local_name
            .as_deref()
            .is_some_and(|name| name.starts_with(&endpoint.name_prefix))
        {
            return Some(peripheral);
        }
    }
    None
}

fn map_btle(err: btleplug::Error) -> Error {
    match err {
        btleplug::Error::PermissionDenied => Error::PermissionDenied {
            reason: "Bluetooth access denied".into(),
        },
        btleplug::Error::DeviceNotFound => Error::DeviceNotFound,
        btleplug::Error::NotConnected => Error::NotConnected,
        other => Error::Transport {
            message: other.to_string(),
        },
    }
}
