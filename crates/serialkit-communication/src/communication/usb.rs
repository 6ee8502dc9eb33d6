//! USB CDC-ACM transport
//!
//! USB devices are identified by vendor/product id rather than by port
//! name, so a board keeps its registry id when it re-enumerates on a
//! different port. Streams are opened through the CDC port the OS exposes.

use async_trait::async_trait;
use serialkit_core::{Error, Result, TransportError};

use super::known_devices::device_title;
use super::serial::{open_stream, stream_pair};
use super::{ConnectionParams, Device, DeviceHandle, DeviceKind, LinkSlot, StreamPair, Transport};

/// A USB device exposing a CDC serial interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    /// USB vendor ID
    pub vid: u16,
    /// USB product ID
    pub pid: u16,
    /// OS port the CDC interface is exposed on
    pub port_name: String,
    /// Manufacturer string if reported
    pub manufacturer: Option<String>,
    /// Product string if reported
    pub product: Option<String>,
    /// Serial number if reported
    pub serial_number: Option<String>,
}

impl UsbDeviceInfo {
    /// Registry id, `usb_<vid>_<pid>` in lowercase hex
    pub fn device_id(&self) -> String {
        format!("usb_{:04x}_{:04x}", self.vid, self.pid)
    }

    /// Wrap as a registry device
    pub fn into_device(self) -> Device {
        Device::new(
            self.device_id(),
            device_title(self.vid, self.pid),
            DeviceKind::Usb,
            DeviceHandle::Usb(self),
        )
    }
}

/// List USB devices that expose a serial interface
pub fn list_usb_devices() -> Result<Vec<UsbDeviceInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate USB devices: {}", e);
        Error::other(format!("Failed to enumerate USB devices: {}", e))
    })?;

    Ok(ports
        .into_iter()
        .filter_map(|port| match port.port_type {
            serialport::SerialPortType::UsbPort(usb) => Some(UsbDeviceInfo {
                vid: usb.vid,
                pid: usb.pid,
                port_name: port.port_name,
                manufacturer: usb.manufacturer,
                product: usb.product,
                serial_number: usb.serial_number,
            }),
            _ => None,
        })
        .collect())
}

/// Transport for USB CDC devices
#[derive(Default)]
pub struct UsbTransport {
    link: LinkSlot,
}

impl UsbTransport {
    /// Create a USB transport
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for UsbTransport {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Usb
    }

    async fn discover(&self) -> Result<Vec<Device>> {
        let devices = tokio::task::spawn_blocking(list_usb_devices)
            .await
            .map_err(|e| Error::other(format!("USB enumeration task failed: {}", e)))??;
        Ok(devices.into_iter().map(UsbDeviceInfo::into_device).collect())
    }

    async fn connect(&self, device: &Device, params: &ConnectionParams) -> Result<StreamPair> {
        let DeviceHandle::Usb(info) = &device.handle else {
            return Err(TransportError::WrongTransport {
                device: device.id.clone(),
                transport: self.kind().to_string(),
            }
            .into());
        };

        let closed = self.link.open(&device.id)?;
        match open_stream(&device.id, &info.port_name, params) {
            Ok(stream) => {
                tracing::info!(
                    "Opened USB device {:04x}:{:04x} on {}",
                    info.vid,
                    info.pid,
                    info.port_name
                );
                Ok(stream_pair(stream, closed))
            }
            Err(e) => {
                self.link.close();
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(device) = self.link.close() {
            tracing::info!("Closed USB device {}", device);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn esp32() -> UsbDeviceInfo {
        UsbDeviceInfo {
            vid: 0x303a,
            pid: 0x1001,
            port_name: "/dev/ttyACM0".to_string(),
            manufacturer: Some("Espressif".to_string()),
            product: None,
            serial_number: None,
        }
    }

    #[test]
    fn test_device_id_is_lowercase_hex() {
        let device = esp32().into_device();
        assert_eq!(device.id, "usb_303a_1001");
        assert_eq!(device.title, "ESP USB_SERIAL_JTAG (VID:303a PID:1001)");
        assert_eq!(device.kind, DeviceKind::Usb);
    }

    #[tokio::test]
    async fn test_open_failure_is_reported() {
        let transport = UsbTransport::new();
        let mut info = esp32();
        info.port_name = "/dev/serialkit-missing-port".to_string();
        let device = info.into_device();

        let err = transport
            .connect(&device, &ConnectionParams::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(TransportError::OpenFailed { .. })
        ));
        transport.disconnect().await.unwrap();
    }
}
