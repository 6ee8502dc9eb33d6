//! Device model and transport contract
//!
//! Every backend (serial port, USB CDC device, Bluetooth LE peripheral, TCP
//! endpoint, simulated IMU) implements [`Transport`]. A successful connect
//! hands out a [`StreamPair`]: a chunked reader and writer that the session
//! drives. Device selection is delegated to a [`DeviceSelector`] supplied by
//! the embedding application.

pub mod bluetooth;
pub mod known_devices;
mod link;
pub mod network;
pub mod serial;
pub mod simulated;
pub mod usb;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serialkit_core::{Result, TransportError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

pub use bluetooth::{BluetoothDeviceInfo, BluetoothTransport};
pub use network::NetworkTransport;
pub use serial::{list_ports, SerialPortInfo, SerialTransport};
pub use simulated::SimulatedTransport;
pub use usb::{UsbDeviceInfo, UsbTransport};

pub(crate) use link::LinkSlot;

/// Size of the buffer used for a single read
pub const READ_CHUNK_SIZE: usize = 4096;

/// Transport family of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Native serial port (RS-232, USB-UART bridges)
    Serial,
    /// USB CDC-ACM device
    Usb,
    /// Bluetooth LE peripheral
    Bluetooth,
    /// TCP socket
    Network,
    /// Synthetic IMU data source
    Simulated,
}

impl DeviceKind {
    /// Every kind, in discovery order
    pub const ALL: [DeviceKind; 5] = [
        DeviceKind::Serial,
        DeviceKind::Usb,
        DeviceKind::Bluetooth,
        DeviceKind::Network,
        DeviceKind::Simulated,
    ];

    /// Short lowercase name, also the device id prefix
    pub fn name(&self) -> &'static str {
        match self {
            DeviceKind::Serial => "serial",
            DeviceKind::Usb => "usb",
            DeviceKind::Bluetooth => "bluetooth",
            DeviceKind::Network => "network",
            DeviceKind::Simulated => "simulated",
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Transport-owned resource identifying the endpoint
#[derive(Debug, Clone)]
pub enum DeviceHandle {
    /// Enumerated serial port
    Serial(SerialPortInfo),
    /// USB CDC device and the port it is exposed on
    Usb(UsbDeviceInfo),
    /// Bluetooth LE peripheral
    Bluetooth(BluetoothDeviceInfo),
    /// `host:port` socket address
    Network(String),
    /// The simulated source
    Simulated,
}

/// An authorized or discovered endpoint
#[derive(Debug, Clone)]
pub struct Device {
    /// Unique id within a registry
    pub id: String,
    /// Human readable title
    pub title: String,
    /// Transport family
    pub kind: DeviceKind,
    /// Backend resource
    pub handle: DeviceHandle,
}

impl Device {
    /// Create a device
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        kind: DeviceKind,
        handle: DeviceHandle,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            kind,
            handle,
        }
    }
}

/// Parity setting for serial connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

/// Connection parameters handed to [`Transport::connect`] unmodified.
///
/// Serial and USB backends honour the line settings, the network and
/// Bluetooth backends honour the timeout, the simulated backend ignores them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5-8)
    pub data_bits: u8,
    /// Stop bits (1-2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Hardware flow control
    pub flow_control: bool,
    /// Timeout for establishing the link, in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            baud_rate: 115200,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: false,
            connect_timeout_ms: 5000,
        }
    }
}

/// Inbound half of an open connection
#[async_trait]
pub trait ByteReader: Send {
    /// Wait for the next chunk. `Ok(None)` means the stream has ended.
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Outbound half of an open connection
#[async_trait]
pub trait ByteWriter: Send {
    /// Write one chunk in full
    async fn write_chunk(&mut self, data: &[u8]) -> Result<()>;
}

/// Reader/writer pair returned by a successful connect
pub struct StreamPair {
    /// Inbound chunks
    pub reader: Box<dyn ByteReader>,
    /// Outbound chunks
    pub writer: Box<dyn ByteWriter>,
}

impl std::fmt::Debug for StreamPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPair").finish_non_exhaustive()
    }
}

/// Outcome of the out-of-band device authorization prompt
#[derive(Debug, Clone)]
pub enum Selection {
    /// The operator picked a device
    Chosen(Device),
    /// The operator closed the prompt
    Cancelled,
    /// The prompt itself failed
    Failed(String),
}

/// User-authorization step, supplied by the embedding application
#[async_trait]
pub trait DeviceSelector: Send + Sync {
    /// Let the operator choose one of `candidates`
    async fn select(&self, kind: DeviceKind, candidates: Vec<Device>) -> Selection;
}

/// Selector that always takes the first candidate, for headless use
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstDeviceSelector;

#[async_trait]
impl DeviceSelector for FirstDeviceSelector {
    async fn select(&self, _kind: DeviceKind, candidates: Vec<Device>) -> Selection {
        match candidates.into_iter().next() {
            Some(device) => Selection::Chosen(device),
            None => Selection::Cancelled,
        }
    }
}

/// Byte-stream backend for one transport family
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport family served by this backend
    fn kind(&self) -> DeviceKind;

    /// Enumerate endpoints reachable without user interaction
    async fn discover(&self) -> Result<Vec<Device>>;

    /// Ask the operator to authorize one endpoint.
    ///
    /// Returns `Ok(None)` when the operator declines.
    async fn request(&self, selector: &dyn DeviceSelector) -> Result<Option<Device>> {
        let kind = self.kind();
        let candidates = self.discover().await.map_err(|e| TransportError::RequestFailed {
            kind: kind.to_string(),
            reason: e.to_string(),
        })?;

        match selector.select(kind, candidates).await {
            Selection::Chosen(device) if device.kind == kind => Ok(Some(device)),
            Selection::Chosen(device) => Err(TransportError::WrongTransport {
                device: device.id,
                transport: kind.to_string(),
            }
            .into()),
            Selection::Cancelled => {
                tracing::debug!("{} device selection cancelled", kind);
                Ok(None)
            }
            Selection::Failed(reason) => Err(TransportError::RequestFailed {
                kind: kind.to_string(),
                reason,
            }
            .into()),
        }
    }

    /// Open `device` and hand out its reader and writer.
    ///
    /// Fails with `AlreadyConnected` while a previous connection of this
    /// transport is still open.
    async fn connect(&self, device: &Device, params: &ConnectionParams) -> Result<StreamPair>;

    /// Release the open endpoint, if any. Pending reads end and further
    /// writes fail with `NotConnected`.
    async fn disconnect(&self) -> Result<()>;
}

/// Chunk reader over any tokio byte stream, ending when its link closes
pub(crate) struct IoReader<R> {
    inner: R,
    closed: watch::Receiver<()>,
    buf: Vec<u8>,
}

impl<R> IoReader<R> {
    pub(crate) fn new(inner: R, closed: watch::Receiver<()>) -> Self {
        Self {
            inner,
            closed,
            buf: vec![0u8; READ_CHUNK_SIZE],
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> ByteReader for IoReader<R> {
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        tokio::select! {
            biased;
            _ = self.closed.changed() => Ok(None),
            read = self.inner.read(&mut self.buf) => match read {
                Ok(0) => Ok(None),
                Ok(n) => Ok(Some(self.buf[..n].to_vec())),
                Err(e) => Err(TransportError::io(e).into()),
            },
        }
    }
}

/// Chunk writer over any tokio byte stream, failing writes once its link
/// closes, including a write already blocked on the device
pub(crate) struct IoWriter<W> {
    inner: W,
    closed: watch::Receiver<()>,
}

impl<W> IoWriter<W> {
    pub(crate) fn new(inner: W, closed: watch::Receiver<()>) -> Self {
        Self { inner, closed }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ByteWriter for IoWriter<W> {
    async fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        if self.closed.has_changed().is_err() {
            return Err(TransportError::NotConnected.into());
        }
        let inner = &mut self.inner;
        let write = async move {
            inner.write_all(data).await?;
            inner.flush().await
        };
        tokio::select! {
            biased;
            _ = self.closed.changed() => Err(TransportError::NotConnected.into()),
            written = write => match written {
                Ok(()) => Ok(()),
                Err(e) => Err(TransportError::io(e).into()),
            },
        }
    }
}
