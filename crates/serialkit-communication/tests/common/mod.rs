#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serialkit_communication::{
    ByteReader, ByteWriter, ConnectionParams, Device, DeviceHandle, DeviceKind, StreamPair,
    Transport,
};
use serialkit_core::{BusEvent, ConnectionEvent, ConnectionState, EventBus, Topic, TransportError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub type Written = Arc<Mutex<Vec<(Instant, Vec<u8>)>>>;

/// In-memory transport recording writes and accepting injected reads
pub struct MockTransport {
    written: Written,
    inbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    open: Arc<AtomicBool>,
    faults: WriteFaults,
    pub fail_open: AtomicBool,
    pub disconnects: AtomicUsize,
    devices: Vec<Device>,
}

/// Switches shared between a transport and the writers it hands out
#[derive(Clone, Default)]
pub struct WriteFaults {
    /// Writes never complete
    pub stall: Arc<AtomicBool>,
    /// Writes fail while the reader stays alive
    pub fail: Arc<AtomicBool>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Self::with_devices(vec![mock_device("mock:1")])
    }

    pub fn with_devices(devices: Vec<Device>) -> Arc<Self> {
        Arc::new(Self {
            written: Arc::new(Mutex::new(Vec::new())),
            inbound: Mutex::new(None),
            open: Arc::new(AtomicBool::new(false)),
            faults: WriteFaults::default(),
            fail_open: AtomicBool::new(false),
            disconnects: AtomicUsize::new(0),
            devices,
        })
    }

    /// Deliver a chunk to the reader of the open connection
    pub fn push_inbound(&self, bytes: &[u8]) -> bool {
        match self.inbound.lock().as_ref() {
            Some(tx) => tx.send(bytes.to_vec()).is_ok(),
            None => false,
        }
    }

    /// Simulate the device vanishing
    pub fn drop_link(&self) {
        self.inbound.lock().take();
        self.open.store(false, Ordering::SeqCst);
    }

    /// Make every following write hang
    pub fn stall_writes(&self) {
        self.faults.stall.store(true, Ordering::SeqCst);
    }

    /// Make every following write fail
    pub fn fail_writes(&self) {
        self.faults.fail.store(true, Ordering::SeqCst);
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().iter().map(|(_, b)| b.clone()).collect()
    }

    pub fn write_times(&self) -> Vec<Instant> {
        self.written.lock().iter().map(|(t, _)| *t).collect()
    }
}

pub fn mock_device(address: &str) -> Device {
    Device::new(
        format!("network_{}", address),
        format!("Mock {}", address),
        DeviceKind::Network,
        DeviceHandle::Network(address.to_string()),
    )
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Network
    }

    async fn discover(&self) -> serialkit_core::Result<Vec<Device>> {
        Ok(self.devices.clone())
    }

    async fn connect(
        &self,
        device: &Device,
        _params: &ConnectionParams,
    ) -> serialkit_core::Result<StreamPair> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(TransportError::open_failed(&device.id, "device busy").into());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inbound.lock() = Some(tx);
        self.open.store(true, Ordering::SeqCst);
        Ok(StreamPair {
            reader: Box::new(MockReader { rx }),
            writer: Box::new(MockWriter {
                written: self.written.clone(),
                open: self.open.clone(),
                faults: self.faults.clone(),
            }),
        })
    }

    async fn disconnect(&self) -> serialkit_core::Result<()> {
        self.inbound.lock().take();
        self.open.store(false, Ordering::SeqCst);
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockReader {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl ByteReader for MockReader {
    async fn read_chunk(&mut self) -> serialkit_core::Result<Option<Vec<u8>>> {
        Ok(self.rx.recv().await)
    }
}

pub struct MockWriter {
    written: Written,
    open: Arc<AtomicBool>,
    faults: WriteFaults,
}

impl MockWriter {
    pub fn new() -> (Box<dyn ByteWriter>, Written) {
        let written: Written = Arc::new(Mutex::new(Vec::new()));
        (
            Box::new(MockWriter {
                written: written.clone(),
                open: Arc::new(AtomicBool::new(true)),
                faults: WriteFaults::default(),
            }),
            written,
        )
    }

    /// Writer whose behaviour is switched through the returned faults
    pub fn faulty() -> (Box<dyn ByteWriter>, Written, WriteFaults) {
        let written: Written = Arc::new(Mutex::new(Vec::new()));
        let faults = WriteFaults::default();
        (
            Box::new(MockWriter {
                written: written.clone(),
                open: Arc::new(AtomicBool::new(true)),
                faults: faults.clone(),
            }),
            written,
            faults,
        )
    }
}

#[async_trait]
impl ByteWriter for MockWriter {
    async fn write_chunk(&mut self, data: &[u8]) -> serialkit_core::Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected.into());
        }
        if self.faults.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.faults.fail.load(Ordering::SeqCst) {
            return Err(TransportError::io("device rejected write").into());
        }
        self.written.lock().push((Instant::now(), data.to_vec()));
        Ok(())
    }
}

/// Record every event published on `topic`
pub fn record(bus: &EventBus, topic: Topic) -> Arc<Mutex<Vec<BusEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let e = events.clone();
    bus.subscribe(topic, move |event| e.lock().push(event.clone()));
    events
}

/// State transitions among recorded connection events
pub fn transitions(events: &[BusEvent]) -> Vec<(ConnectionState, ConnectionState)> {
    events
        .iter()
        .filter_map(|event| match event {
            BusEvent::Connection(ConnectionEvent::StateChanged { from, to, .. }) => {
                Some((*from, *to))
            }
            _ => None,
        })
        .collect()
}
