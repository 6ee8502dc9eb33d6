//! Authorized and discovered devices
//!
//! The registry keeps one entry per device id across every registered
//! transport and routes connects to the transport owning the device.

use parking_lot::RwLock;
use serialkit_core::{Result, TransportError};
use std::sync::Arc;

use crate::communication::{ConnectionParams, Device, DeviceKind, DeviceSelector, Transport};
use crate::session::Session;

/// Device list plus the transports that produced it
pub struct ConnectionRegistry {
    transports: RwLock<Vec<Arc<dyn Transport>>>,
    devices: RwLock<Vec<Device>>,
    session: Session,
}

impl ConnectionRegistry {
    /// Create an empty registry driving `session`
    pub fn new(session: Session) -> Self {
        Self {
            transports: RwLock::new(Vec::new()),
            devices: RwLock::new(Vec::new()),
            session,
        }
    }

    /// Register a backend, replacing any backend of the same kind
    pub fn register_transport(&self, transport: Arc<dyn Transport>) {
        let mut transports = self.transports.write();
        transports.retain(|t| t.kind() != transport.kind());
        tracing::debug!("Registered {} transport", transport.kind());
        transports.push(transport);
    }

    /// Backend serving `kind`
    pub fn transport(&self, kind: DeviceKind) -> Option<Arc<dyn Transport>> {
        self.transports
            .read()
            .iter()
            .find(|t| t.kind() == kind)
            .cloned()
    }

    /// Add a device unless its id is already known. Returns true if added.
    pub fn insert(&self, device: Device) -> bool {
        let mut devices = self.devices.write();
        if devices.iter().any(|d| d.id == device.id) {
            return false;
        }
        tracing::debug!("Registered device {} ({})", device.id, device.title);
        devices.push(device);
        true
    }

    /// Enumerate every backend and append devices not seen before.
    ///
    /// Backend failures are logged and count as no devices found. Returns
    /// the number of new entries.
    pub async fn discover(&self) -> usize {
        let transports: Vec<_> = self.transports.read().clone();
        let mut added = 0;
        for transport in transports {
            match transport.discover().await {
                Ok(found) => {
                    for device in found {
                        if self.insert(device) {
                            added += 1;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("{} discovery failed: {}", transport.kind(), e);
                }
            }
        }
        added
    }

    /// Ask the operator to authorize a device of `kind`.
    ///
    /// Returns `Ok(None)` if the operator declined. An already-known id
    /// returns the existing entry.
    pub async fn authorize(
        &self,
        kind: DeviceKind,
        selector: &dyn DeviceSelector,
    ) -> Result<Option<Device>> {
        let transport = self.transport(kind).ok_or_else(|| TransportError::RequestFailed {
            kind: kind.to_string(),
            reason: "no transport registered".to_string(),
        })?;

        let Some(device) = transport.request(selector).await? else {
            return Ok(None);
        };
        if !self.insert(device.clone()) {
            tracing::debug!("Device {} already authorized", device.id);
            return Ok(self.get(&device.id));
        }
        Ok(Some(device))
    }

    /// Look up a device by id
    pub fn get(&self, id: &str) -> Option<Device> {
        self.devices.read().iter().find(|d| d.id == id).cloned()
    }

    /// Every known device, in registration order
    pub fn devices(&self) -> Vec<Device> {
        self.devices.read().clone()
    }

    /// The device of the open connection, if any
    pub fn active_connection(&self) -> Option<Device> {
        if self.session.is_open() {
            self.session.device()
        } else {
            None
        }
    }

    /// Connect the session to a registered device
    pub async fn connect(&self, id: &str, params: &ConnectionParams) -> Result<()> {
        let device = self
            .get(id)
            .ok_or_else(|| TransportError::UnknownDevice { id: id.to_string() })?;
        let transport = self.transport(device.kind).ok_or_else(|| TransportError::OpenFailed {
            device: device.id.clone(),
            reason: format!("no {} transport registered", device.kind),
        })?;
        self.session.connect(transport, device, params).await
    }

    /// Close the session's connection
    pub async fn disconnect(&self) -> Result<()> {
        self.session.disconnect().await
    }

    /// Disconnect and forget every device
    pub async fn reset(&self) -> Result<()> {
        self.session.disconnect().await?;
        let cleared = std::mem::take(&mut *self.devices.write()).len();
        tracing::debug!("Registry reset, {} devices removed", cleared);
        Ok(())
    }

    /// Session driven by this registry
    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("devices", &self.devices.read().len())
            .field("session", &self.session)
            .finish()
    }
}
