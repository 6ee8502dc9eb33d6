//! TCP socket transport
//!
//! Endpoints are configured up front (`host:port`); discovery lists them
//! without probing. Connecting is bounded by the `connect_timeout_ms`
//! connection parameter.

use async_trait::async_trait;
use parking_lot::RwLock;
use serialkit_core::{Result, TransportError};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

use super::{
    ConnectionParams, Device, DeviceHandle, DeviceKind, IoReader, IoWriter, LinkSlot, StreamPair,
    Transport,
};

/// Registry id for a socket address, `network_<host:port>`
pub fn device_id(address: &str) -> String {
    format!("network_{}", address)
}

/// Wrap a socket address as a registry device
pub fn make_device(address: &str) -> Device {
    Device::new(
        device_id(address),
        format!("TCP {}", address),
        DeviceKind::Network,
        DeviceHandle::Network(address.to_string()),
    )
}

/// Transport for TCP endpoints
#[derive(Default)]
pub struct NetworkTransport {
    endpoints: RwLock<Vec<String>>,
    link: LinkSlot,
}

impl NetworkTransport {
    /// Create a transport with no configured endpoints
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport offering `endpoints` during discovery
    pub fn with_endpoints<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let transport = Self::new();
        for endpoint in endpoints {
            transport.add_endpoint(endpoint);
        }
        transport
    }

    /// Offer another endpoint during discovery. Duplicates are ignored.
    pub fn add_endpoint(&self, endpoint: impl Into<String>) {
        let endpoint = endpoint.into();
        let mut endpoints = self.endpoints.write();
        if !endpoints.contains(&endpoint) {
            endpoints.push(endpoint);
        }
    }

    /// Configured endpoints
    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.read().clone()
    }
}

#[async_trait]
impl Transport for NetworkTransport {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Network
    }

    async fn discover(&self) -> Result<Vec<Device>> {
        Ok(self
            .endpoints
            .read()
            .iter()
            .map(|address| make_device(address))
            .collect())
    }

    async fn connect(&self, device: &Device, params: &ConnectionParams) -> Result<StreamPair> {
        let DeviceHandle::Network(address) = &device.handle else {
            return Err(TransportError::WrongTransport {
                device: device.id.clone(),
                transport: self.kind().to_string(),
            }
            .into());
        };

        let closed = self.link.open(&device.id)?;
        let limit = Duration::from_millis(params.connect_timeout_ms);
        let stream = match timeout(limit, TcpStream::connect(address.as_str())).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.link.close();
                tracing::warn!("Failed to connect to {}: {}", address, e);
                return Err(TransportError::open_failed(&device.id, e).into());
            }
            Err(_) => {
                self.link.close();
                tracing::warn!("Connection to {} timed out", address);
                return Err(TransportError::open_failed(
                    &device.id,
                    format!("timed out after {:?}", limit),
                )
                .into());
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not disable Nagle on {}: {}", address, e);
        }
        tracing::info!("Connected to {}", address);

        let (read_half, write_half) = stream.into_split();
        Ok(StreamPair {
            reader: Box::new(IoReader::new(read_half, closed.clone())),
            writer: Box::new(IoWriter::new(write_half, closed)),
        })
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(device) = self.link.close() {
            tracing::info!("Closed network device {}", device);
        }
        Ok(())
    }
}
