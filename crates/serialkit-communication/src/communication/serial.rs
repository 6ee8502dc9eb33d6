//! Serial port transport
//!
//! Provides port enumeration and async serial streams for RS-232 ports and
//! USB-UART bridges.
//!
//! Supports:
//! - Port enumeration and discovery
//! - Baud rate configuration
//! - Flow control settings
//! - Parity and stop bit configuration
//! - Non-blocking chunked read/write through `tokio-serial`

use async_trait::async_trait;
use serialkit_core::{Error, Result, TransportError};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use super::known_devices::device_title;
use super::{
    ConnectionParams, Device, DeviceHandle, DeviceKind, IoReader, IoWriter, LinkSlot,
    SerialParity, StreamPair, Transport,
};

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// Serial number if available
    pub serial_number: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    /// Create a new port info
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
            manufacturer: None,
            serial_number: None,
            vid: None,
            pid: None,
        }
    }

    /// Set manufacturer
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Set serial number
    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    /// Set USB IDs
    pub fn with_usb_ids(mut self, vid: u16, pid: u16) -> Self {
        self.vid = Some(vid);
        self.pid = Some(pid);
        self
    }

    /// Whether the port belongs to a USB device
    pub fn is_usb(&self) -> bool {
        self.vid.is_some()
    }

    /// Registry id, `serial_<port name>`
    pub fn device_id(&self) -> String {
        format!("serial_{}", self.port_name)
    }

    /// Title from the known-device table for USB bridges, else the description
    pub fn title(&self) -> String {
        match (self.vid, self.pid) {
            (Some(vid), Some(pid)) => device_title(vid, pid),
            _ => format!("{} ({})", self.description, self.port_name),
        }
    }

    /// Wrap as a registry device
    pub fn into_device(self) -> Device {
        Device::new(
            self.device_id(),
            self.title(),
            DeviceKind::Serial,
            DeviceHandle::Serial(self),
        )
    }
}

/// List available serial ports on the system
///
/// Returns a list of available ports with information about each port,
/// including USB vendor/product ids for USB-UART bridges.
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    match serialport::available_ports() {
        Ok(ports) => Ok(ports.iter().map(port_info).collect()),
        Err(e) => {
            tracing::error!("Failed to enumerate serial ports: {}", e);
            Err(Error::other(format!("Failed to enumerate ports: {}", e)))
        }
    }
}

pub(crate) fn port_info(port: &serialport::SerialPortInfo) -> SerialPortInfo {
    let info = SerialPortInfo::new(&port.port_name, get_port_description(port));

    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb_info) => {
            let mut info = info.with_usb_ids(usb_info.vid, usb_info.pid);
            if let Some(ref mfg) = usb_info.manufacturer {
                info = info.with_manufacturer(mfg);
            }
            if let Some(ref serial) = usb_info.serial_number {
                info = info.with_serial_number(serial);
            }
            info
        }
        _ => info,
    }
}

/// Get a user-friendly description for a port
fn get_port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb_info) => {
            format!(
                "USB {} {}",
                usb_info.manufacturer.as_deref().unwrap_or("Device"),
                usb_info.product.as_deref().unwrap_or("Serial Port")
            )
        }
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

/// Convert a parity setting to serialport format
fn to_serialport_parity(parity: SerialParity) -> tokio_serial::Parity {
    match parity {
        SerialParity::None => tokio_serial::Parity::None,
        SerialParity::Even => tokio_serial::Parity::Even,
        SerialParity::Odd => tokio_serial::Parity::Odd,
    }
}

fn to_data_bits(bits: u8) -> Option<tokio_serial::DataBits> {
    match bits {
        5 => Some(tokio_serial::DataBits::Five),
        6 => Some(tokio_serial::DataBits::Six),
        7 => Some(tokio_serial::DataBits::Seven),
        8 => Some(tokio_serial::DataBits::Eight),
        _ => None,
    }
}

fn to_stop_bits(bits: u8) -> Option<tokio_serial::StopBits> {
    match bits {
        1 => Some(tokio_serial::StopBits::One),
        2 => Some(tokio_serial::StopBits::Two),
        _ => None,
    }
}

/// Open `port_name` as an async serial stream with the given line settings
pub(crate) fn open_stream(
    device_id: &str,
    port_name: &str,
    params: &ConnectionParams,
) -> Result<SerialStream> {
    let data_bits = to_data_bits(params.data_bits).ok_or_else(|| {
        TransportError::open_failed(device_id, format!("invalid data bits: {}", params.data_bits))
    })?;
    let stop_bits = to_stop_bits(params.stop_bits).ok_or_else(|| {
        TransportError::open_failed(device_id, format!("invalid stop bits: {}", params.stop_bits))
    })?;

    let builder = tokio_serial::new(port_name, params.baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(to_serialport_parity(params.parity))
        .flow_control(if params.flow_control {
            tokio_serial::FlowControl::Hardware
        } else {
            tokio_serial::FlowControl::None
        });

    match builder.open_native_async() {
        Ok(stream) => Ok(stream),
        Err(e) => {
            tracing::warn!("Failed to open serial port {}: {}", port_name, e);
            Err(TransportError::open_failed(device_id, e).into())
        }
    }
}

/// Split an open serial stream into chunk reader and writer
pub(crate) fn stream_pair(
    stream: SerialStream,
    closed: tokio::sync::watch::Receiver<()>,
) -> StreamPair {
    let (read_half, write_half) = tokio::io::split(stream);
    StreamPair {
        reader: Box::new(IoReader::new(read_half, closed.clone())),
        writer: Box::new(IoWriter::new(write_half, closed)),
    }
}

/// Transport for native serial ports.
///
/// Ports of USB devices are left to [`UsbTransport`](super::UsbTransport)
/// unless the transport is built with [`including_usb`](Self::including_usb).
#[derive(Default)]
pub struct SerialTransport {
    link: LinkSlot,
    include_usb: bool,
}

impl SerialTransport {
    /// Create a serial transport listing non-USB ports
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a serial transport that also lists USB-UART ports, for
    /// setups without a USB transport
    pub fn including_usb() -> Self {
        Self {
            include_usb: true,
            ..Self::default()
        }
    }
}

fn serial_devices(ports: Vec<SerialPortInfo>, include_usb: bool) -> Vec<Device> {
    ports
        .into_iter()
        .filter(|port| include_usb || !port.is_usb())
        .map(SerialPortInfo::into_device)
        .collect()
}

#[async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Serial
    }

    async fn discover(&self) -> Result<Vec<Device>> {
        let ports = tokio::task::spawn_blocking(list_ports)
            .await
            .map_err(|e| Error::other(format!("Port enumeration task failed: {}", e)))??;
        Ok(serial_devices(ports, self.include_usb))
    }

    async fn connect(&self, device: &Device, params: &ConnectionParams) -> Result<StreamPair> {
        let DeviceHandle::Serial(info) = &device.handle else {
            return Err(TransportError::WrongTransport {
                device: device.id.clone(),
                transport: self.kind().to_string(),
            }
            .into());
        };

        let closed = self.link.open(&device.id)?;
        match open_stream(&device.id, &info.port_name, params) {
            Ok(stream) => {
                tracing::info!("Opened {} at {} baud", info.port_name, params.baud_rate);
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
            tracing::info!("Closed serial device {}", device);
        }
        Ok(())
    }
}
