//! Bluetooth LE transport over the Nordic UART Service
//!
//! Discovery scans for peripherals advertising the NUS service. Once
//! connected, notifications on the TX characteristic feed the reader and
//! writes go to the RX characteristic without response, split into chunks
//! that fit a conservative MTU.

use async_trait::async_trait;
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, ValueNotification,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{Stream, StreamExt};
use parking_lot::Mutex;
use serialkit_core::{Error, Result, TransportError};
use std::pin::Pin;
use tokio::sync::watch;
use tokio::time::{timeout, Duration};
use uuid::Uuid;

use super::{
    ByteReader, ByteWriter, ConnectionParams, Device, DeviceHandle, DeviceKind, LinkSlot,
    StreamPair, Transport,
};

/// Nordic UART Service
pub const NUS_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);
/// Central to peripheral characteristic
pub const NUS_RX_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);
/// Peripheral to central characteristic (notify)
pub const NUS_TX_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/// Largest single write
pub const BLE_WRITE_CHUNK: usize = 244;

/// Default scan window for discovery
pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(3);

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// A discovered Bluetooth LE peripheral
#[derive(Debug, Clone)]
pub struct BluetoothDeviceInfo {
    /// Platform peripheral handle
    pub peripheral: Peripheral,
    /// Peripheral address as reported by the adapter
    pub address: String,
    /// Advertised local name
    pub name: Option<String>,
}

impl BluetoothDeviceInfo {
    /// Registry id, `bluetooth_<address>`
    pub fn device_id(&self) -> String {
        device_id(&self.address)
    }

    /// Wrap as a registry device
    pub fn into_device(self) -> Device {
        let title = device_title(self.name.as_deref(), &self.address);
        Device::new(
            self.device_id(),
            title,
            DeviceKind::Bluetooth,
            DeviceHandle::Bluetooth(self),
        )
    }
}

fn device_id(address: &str) -> String {
    format!("bluetooth_{}", address)
}

fn device_title(name: Option<&str>, address: &str) -> String {
    match name {
        Some(name) if !name.is_empty() => format!("{} ({})", name, address),
        _ => format!("Unknown device ({})", address),
    }
}

/// Transport for Bluetooth LE UART peripherals
pub struct BluetoothTransport {
    scan_duration: Duration,
    link: LinkSlot,
    connected: Mutex<Option<Peripheral>>,
}

impl Default for BluetoothTransport {
    fn default() -> Self {
        Self::new(DEFAULT_SCAN_DURATION)
    }
}

impl BluetoothTransport {
    /// Create a transport scanning for `scan_duration` during discovery
    pub fn new(scan_duration: Duration) -> Self {
        Self {
            scan_duration,
            link: LinkSlot::default(),
            connected: Mutex::new(None),
        }
    }

    async fn adapter() -> Result<Adapter> {
        let manager = Manager::new()
            .await
            .map_err(|e| Error::other(format!("Failed to create BLE manager: {}", e)))?;
        let adapters = manager
            .adapters()
            .await
            .map_err(|e| Error::other(format!("Failed to get BLE adapters: {}", e)))?;
        adapters
            .into_iter()
            .next()
            .ok_or_else(|| Error::other("No BLE adapters available"))
    }

    async fn open(
        &self,
        device: &Device,
        peripheral: &Peripheral,
        params: &ConnectionParams,
    ) -> Result<(NotificationStream, Characteristic)> {
        let open_failed =
            |cause: String| -> Error { TransportError::open_failed(&device.id, cause).into() };

        let limit = Duration::from_millis(params.connect_timeout_ms);
        match timeout(limit, peripheral.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(open_failed(e.to_string())),
            Err(_) => return Err(open_failed(format!("timed out after {:?}", limit))),
        }

        peripheral
            .discover_services()
            .await
            .map_err(|e| open_failed(format!("service discovery failed: {}", e)))?;

        let characteristics = peripheral.characteristics();
        let notify = characteristics
            .iter()
            .find(|c| c.uuid == NUS_TX_CHARACTERISTIC_UUID)
            .cloned()
            .ok_or_else(|| open_failed("UART TX characteristic not found".to_string()))?;
        let write = characteristics
            .iter()
            .find(|c| c.uuid == NUS_RX_CHARACTERISTIC_UUID)
            .cloned()
            .ok_or_else(|| open_failed("UART RX characteristic not found".to_string()))?;

        peripheral
            .subscribe(&notify)
            .await
            .map_err(|e| open_failed(format!("failed to subscribe to notifications: {}", e)))?;
        let notifications = peripheral
            .notifications()
            .await
            .map_err(|e| open_failed(format!("failed to get notifications stream: {}", e)))?;

        Ok((notifications, write))
    }
}

#[async_trait]
impl Transport for BluetoothTransport {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Bluetooth
    }

    async fn discover(&self) -> Result<Vec<Device>> {
        let adapter = Self::adapter().await?;
        adapter
            .start_scan(ScanFilter {
                services: vec![NUS_SERVICE_UUID],
            })
            .await
            .map_err(|e| Error::other(format!("Failed to start BLE scan: {}", e)))?;
        tokio::time::sleep(self.scan_duration).await;

        let peripherals = adapter
            .peripherals()
            .await
            .map_err(|e| Error::other(format!("Failed to list BLE peripherals: {}", e)));
        if let Err(e) = adapter.stop_scan().await {
            tracing::debug!("Failed to stop BLE scan: {}", e);
        }

        let mut devices = Vec::new();
        for peripheral in peripherals? {
            let name = match peripheral.properties().await {
                Ok(Some(properties)) => properties.local_name,
                _ => None,
            };
            let address = peripheral.address().to_string();
            devices.push(
                BluetoothDeviceInfo {
                    peripheral,
                    address,
                    name,
                }
                .into_device(),
            );
        }
        tracing::debug!("BLE scan found {} peripherals", devices.len());
        Ok(devices)
    }

    async fn connect(&self, device: &Device, params: &ConnectionParams) -> Result<StreamPair> {
        let DeviceHandle::Bluetooth(info) = &device.handle else {
            return Err(TransportError::WrongTransport {
                device: device.id.clone(),
                transport: self.kind().to_string(),
            }
            .into());
        };

        let closed = self.link.open(&device.id)?;
        let (notifications, write_char) = match self.open(device, &info.peripheral, params).await {
            Ok(opened) => opened,
            Err(e) => {
                self.link.close();
                if let Err(e) = info.peripheral.disconnect().await {
                    tracing::debug!("BLE cleanup after failed open: {}", e);
                }
                tracing::warn!("Failed to open {}: {}", device.id, e);
                return Err(e);
            }
        };

        *self.connected.lock() = Some(info.peripheral.clone());
        tracing::info!("Connected to BLE peripheral {}", info.address);

        Ok(StreamPair {
            reader: Box::new(BleReader {
                notifications,
                closed: closed.clone(),
            }),
            writer: Box::new(BleWriter {
                peripheral: info.peripheral.clone(),
                characteristic: write_char,
                closed,
            }),
        })
    }

    async fn disconnect(&self) -> Result<()> {
        let device = self.link.close();
        let peripheral = self.connected.lock().take();
        if let Some(peripheral) = peripheral {
            if let Err(e) = peripheral.disconnect().await {
                tracing::error!("Failed to disconnect BLE peripheral: {}", e);
            }
        }
        if let Some(device) = device {
            tracing::info!("Closed Bluetooth device {}", device);
        }
        Ok(())
    }
}

struct BleReader {
    notifications: NotificationStream,
    closed: watch::Receiver<()>,
}

#[async_trait]
impl ByteReader for BleReader {
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            let notification = tokio::select! {
                biased;
                _ = self.closed.changed() => return Ok(None),
                next = self.notifications.next() => next,
            };
            match notification {
                Some(n) if n.uuid == NUS_TX_CHARACTERISTIC_UUID => return Ok(Some(n.value)),
                Some(_) => continue,
                None => return Ok(None),
            }
        }
    }
}

struct BleWriter {
    peripheral: Peripheral,
    characteristic: Characteristic,
    closed: watch::Receiver<()>,
}

#[async_trait]
impl ByteWriter for BleWriter {
    async fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(BLE_WRITE_CHUNK) {
            if self.closed.has_changed().is_err() {
                return Err(TransportError::NotConnected.into());
            }
            self.peripheral
                .write(&self.characteristic, chunk, WriteType::WithoutResponse)
                .await
                .map_err(TransportError::io)?;
        }
        Ok(())
    }
}
