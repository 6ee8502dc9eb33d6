//! Connection lifecycle
//!
//! A [`Session`] owns the single active connection: it opens the device
//! through its transport, attaches the writer to the [`SendPipeline`] and
//! runs the read loop that feeds inbound chunks through the receive hook
//! onto the `incoming-data` topic. A failed read or write tears the
//! connection down.
//!
//! State machine:
//!
//! ```text
//! Disconnected -> Connecting -> Open -> Closing -> Disconnected
//!                      |          |
//!                      |          +-- link lost / write failed --> Disconnected
//!                      +-- open failed ----------> Disconnected
//! ```

use parking_lot::{Mutex, RwLock};
use serialkit_core::codec;
use serialkit_core::{
    BusEvent, ConnectionEvent, ConnectionState, EventBus, QueueError, Result, TransportError,
};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::communication::{ByteReader, ConnectionParams, Device, Transport};
use crate::pipeline::{DataInterceptor, InterceptorSlot, SendPipeline, SendPipelineConfig};

struct ActiveConnection {
    device: Device,
    transport: Arc<dyn Transport>,
    shutdown: oneshot::Sender<()>,
    read_task: JoinHandle<()>,
}

struct SessionInner {
    bus: EventBus,
    pipeline: SendPipeline,
    interceptor: InterceptorSlot,
    state: Mutex<ConnectionState>,
    device: RwLock<Option<Device>>,
    active: tokio::sync::Mutex<Option<ActiveConnection>>,
}

impl SessionInner {
    fn transition(&self, to: ConnectionState) {
        let from = std::mem::replace(&mut *self.state.lock(), to);
        if from == to {
            return;
        }
        let device = self.device.read().as_ref().map(|d| d.id.clone());
        tracing::debug!("Connection {} -> {}", from, to);
        self.bus
            .publish(BusEvent::Connection(ConnectionEvent::StateChanged { device, from, to }));
    }

    fn deliver(&self, chunk: Vec<u8>) {
        let interceptor = self.interceptor.read().clone();
        let raw = match interceptor {
            Some(interceptor) => interceptor.on_receive(chunk),
            None => chunk,
        };
        if raw.is_empty() {
            return;
        }
        let text = codec::decode(&raw);
        self.bus.publish(BusEvent::IncomingData { raw, text });
    }

    /// Tear down after the link dropped on its own
    async fn link_lost(&self, reason: String) {
        let Some(active) = self.active.lock().await.take() else {
            return;
        };
        tracing::warn!("Connection to {} lost: {}", active.device.id, reason);
        self.bus
            .publish(BusEvent::Connection(ConnectionEvent::LinkError {
                device: active.device.id.clone(),
                reason,
            }));

        self.pipeline.detach().await;
        if let Err(e) = active.transport.disconnect().await {
            tracing::error!("Failed to release {}: {}", active.device.id, e);
        }
        self.transition(ConnectionState::Disconnected);
        *self.device.write() = None;
    }
}

/// Owner of the single active connection. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a session publishing on `bus`
    pub fn new(bus: EventBus, config: SendPipelineConfig) -> Self {
        let interceptor: InterceptorSlot = Arc::new(RwLock::new(None));
        let pipeline = SendPipeline::with_interceptor(bus.clone(), config, interceptor.clone());
        Self {
            inner: Arc::new(SessionInner {
                bus,
                pipeline,
                interceptor,
                state: Mutex::new(ConnectionState::Disconnected),
                device: RwLock::new(None),
                active: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Open `device` through `transport` and start streaming.
    ///
    /// Fails with `AlreadyConnected` unless the session is disconnected.
    pub async fn connect(
        &self,
        transport: Arc<dyn Transport>,
        device: Device,
        params: &ConnectionParams,
    ) -> Result<()> {
        let mut active = self.inner.active.lock().await;
        {
            let state = *self.inner.state.lock();
            if active.is_some() || state != ConnectionState::Disconnected {
                let current = self
                    .inner
                    .device
                    .read()
                    .as_ref()
                    .map(|d| d.id.clone())
                    .unwrap_or_default();
                return Err(TransportError::AlreadyConnected { device: current }.into());
            }
        }

        *self.inner.device.write() = Some(device.clone());
        self.inner.transition(ConnectionState::Connecting);

        let pair = match transport.connect(&device, params).await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!("Failed to connect to {}: {}", device.id, e);
                self.inner.transition(ConnectionState::Disconnected);
                *self.inner.device.write() = None;
                return Err(e);
            }
        };

        let write_failure = self
            .inner
            .pipeline
            .attach_monitored(&device.id, pair.writer)
            .await;

        let (shutdown, shutdown_rx) = oneshot::channel();
        let read_task = tokio::spawn(read_loop(
            Arc::downgrade(&self.inner),
            pair.reader,
            shutdown_rx,
            write_failure,
        ));

        tracing::info!("Connected to {} ({})", device.title, device.id);
        *active = Some(ActiveConnection {
            device,
            transport,
            shutdown,
            read_task,
        });
        self.inner.transition(ConnectionState::Open);
        Ok(())
    }

    /// Close the active connection. Does nothing when disconnected.
    ///
    /// Pending reads and an in-flight write are abandoned, queued payloads
    /// discarded and the transport released before this returns.
    pub async fn disconnect(&self) -> Result<()> {
        let Some(active) = self.inner.active.lock().await.take() else {
            return Ok(());
        };
        self.inner.transition(ConnectionState::Closing);

        self.inner.pipeline.detach().await;
        let _ = active.shutdown.send(());
        let released = active.transport.disconnect().await;
        if let Err(e) = active.read_task.await {
            tracing::debug!("Read task ended abnormally: {}", e);
        }

        tracing::info!("Disconnected from {}", active.device.id);
        self.inner.transition(ConnectionState::Disconnected);
        *self.inner.device.write() = None;
        released
    }

    /// Queue raw bytes for sending
    pub fn send(&self, payload: impl Into<Vec<u8>>) -> std::result::Result<(), QueueError> {
        self.inner.pipeline.enqueue(payload)
    }

    /// Encode text (optionally as hex) and queue it for sending
    pub fn send_text(&self, text: &str, as_hex: bool) -> Result<()> {
        let bytes = codec::encode(text, as_hex)?;
        self.inner.pipeline.enqueue(bytes)?;
        Ok(())
    }

    /// Install or remove the data interceptor for both directions
    pub fn set_interceptor(&self, interceptor: Option<Arc<dyn DataInterceptor>>) {
        *self.inner.interceptor.write() = interceptor;
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// Whether a connection is open
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// The device being connected to or connected
    pub fn device(&self) -> Option<Device> {
        self.inner.device.read().clone()
    }

    /// Outbound queue of this session
    pub fn pipeline(&self) -> &SendPipeline {
        &self.inner.pipeline
    }

    /// Bus this session publishes on
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("device", &self.device().map(|d| d.id))
            .finish()
    }
}

async fn read_loop(
    session: Weak<SessionInner>,
    mut reader: Box<dyn ByteReader>,
    mut shutdown: oneshot::Receiver<()>,
    mut write_failure: oneshot::Receiver<String>,
) {
    let reason = loop {
        let chunk = tokio::select! {
            biased;
            _ = &mut shutdown => return,
            failure = &mut write_failure => match failure {
                Ok(reason) => break format!("write failed: {}", reason),
                // Pipeline detached by disconnect
                Err(_) => return,
            },
            chunk = reader.read_chunk() => chunk,
        };
        let Some(inner) = session.upgrade() else {
            return;
        };
        match chunk {
            Ok(Some(bytes)) => inner.deliver(bytes),
            Ok(None) => break "stream ended".to_string(),
            Err(e) => break e.to_string(),
        }
    };

    if let Some(inner) = session.upgrade() {
        inner.link_lost(reason).await;
    }
}
