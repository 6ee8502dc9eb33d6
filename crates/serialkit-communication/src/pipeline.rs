//! Paced outbound send queue
//!
//! Implements a bounded FIFO in front of the transport writer with a single
//! drain task per connection.
//!
//! # Features
//! - Bounded queue, rejecting whole payloads when full
//! - At most one drain loop per connection
//! - Fixed pacing delay between consecutive writes
//! - Outbound hook, then the optional trailing XOR checksum, applied just
//!   before the write
//! - Queue cleared and drain loop cancelled on detach, even mid-write
//! - A failed write closes the pipeline and signals the owner

use parking_lot::{Mutex, RwLock};
use serialkit_core::codec::append_checksum;
use serialkit_core::{BusEvent, ConnectionEvent, EventBus, QueueError};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tokio::time::{Duration, Instant};

use crate::communication::ByteWriter;

/// Default queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Default delay between writes
pub const DEFAULT_PACING: Duration = Duration::from_millis(10);

/// Transforms bytes in flight.
///
/// Installed on a session; `on_receive` runs on every inbound chunk before
/// it is published, `on_send` on every outbound payload before it is
/// written. Returning an empty buffer drops the chunk.
pub trait DataInterceptor: Send + Sync {
    /// Inbound transform
    fn on_receive(&self, data: Vec<u8>) -> Vec<u8>;
    /// Outbound transform
    fn on_send(&self, data: Vec<u8>) -> Vec<u8>;
}

/// Shared, replaceable interceptor
pub type InterceptorSlot = Arc<RwLock<Option<Arc<dyn DataInterceptor>>>>;

/// Configuration for the send pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendPipelineConfig {
    /// Maximum number of queued payloads
    pub capacity: usize,
    /// Delay after each write
    pub pacing: Duration,
    /// Append an XOR checksum byte to every payload
    pub checksum: bool,
}

impl Default for SendPipelineConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            pacing: DEFAULT_PACING,
            checksum: false,
        }
    }
}

/// A payload waiting to be written
#[derive(Debug, Clone)]
pub struct QueueItem {
    /// Bytes as enqueued, before the outbound hook and checksum
    pub payload: Vec<u8>,
    /// When the payload was accepted
    pub enqueued_at: Instant,
}

#[derive(Default)]
struct DrainState {
    open: bool,
    draining: bool,
    /// Bumped on every attach/detach; a drain loop exits once it is stale.
    epoch: u64,
    device: Option<String>,
    runtime: Option<Handle>,
    /// Dropped on detach; wakes a drain loop blocked in a write.
    cancel: Option<watch::Sender<()>>,
    /// Reason of the first failed write goes to the owner.
    failure: Option<oneshot::Sender<String>>,
}

struct PipelineInner {
    config: RwLock<SendPipelineConfig>,
    state: Mutex<DrainState>,
    queue: Mutex<VecDeque<QueueItem>>,
    writer: tokio::sync::Mutex<Option<Box<dyn ByteWriter>>>,
    interceptor: InterceptorSlot,
    bus: EventBus,
}

impl PipelineInner {
    fn is_current(&self, epoch: u64) -> bool {
        let state = self.state.lock();
        state.open && state.epoch == epoch
    }
}

/// Bounded, paced outbound queue. Cheap to clone.
#[derive(Clone)]
pub struct SendPipeline {
    inner: Arc<PipelineInner>,
}

impl SendPipeline {
    /// Create a pipeline publishing written frames on `bus`
    pub fn new(bus: EventBus, config: SendPipelineConfig) -> Self {
        Self::with_interceptor(bus, config, Arc::new(RwLock::new(None)))
    }

    /// Create a pipeline sharing an interceptor slot with its session
    pub fn with_interceptor(
        bus: EventBus,
        config: SendPipelineConfig,
        interceptor: InterceptorSlot,
    ) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                config: RwLock::new(config),
                state: Mutex::new(DrainState::default()),
                queue: Mutex::new(VecDeque::new()),
                writer: tokio::sync::Mutex::new(None),
                interceptor,
                bus,
            }),
        }
    }

    /// Start accepting payloads for a freshly opened connection.
    ///
    /// A failed write is published as a `LinkError`.
    pub async fn attach(&self, device_id: &str, writer: Box<dyn ByteWriter>) {
        // Nobody listens, so a failure falls back to the bus
        let _ = self.attach_monitored(device_id, writer).await;
    }

    /// Like [`attach`](Self::attach), but the reason of the first failed
    /// write is delivered on the returned channel instead of the bus.
    ///
    /// After a failure the pipeline is closed: the queue is cleared and
    /// `enqueue` fails with `NotConnected` until the next attach.
    pub async fn attach_monitored(
        &self,
        device_id: &str,
        writer: Box<dyn ByteWriter>,
    ) -> oneshot::Receiver<String> {
        self.cancel_drain();
        let mut slot = self.inner.writer.lock().await;
        *slot = Some(writer);

        let (failure_tx, failure_rx) = oneshot::channel();
        let mut state = self.inner.state.lock();
        state.open = true;
        state.draining = false;
        state.epoch += 1;
        state.device = Some(device_id.to_string());
        state.runtime = Handle::try_current().ok();
        state.cancel = Some(watch::channel(()).0);
        state.failure = Some(failure_tx);
        self.inner.queue.lock().clear();
        tracing::debug!("Send pipeline attached to {}", device_id);
        failure_rx
    }

    /// Stop accepting payloads and discard everything queued.
    ///
    /// An in-flight write is abandoned; no write happens after this returns.
    pub async fn detach(&self) {
        let discarded = self.cancel_drain();

        self.inner.writer.lock().await.take();
        if discarded > 0 {
            tracing::debug!("Send pipeline detached, {} queued payloads discarded", discarded);
        } else {
            tracing::debug!("Send pipeline detached");
        }
    }

    /// Close the queue and wake the drain loop. Returns the number of
    /// payloads discarded.
    fn cancel_drain(&self) -> usize {
        let mut state = self.inner.state.lock();
        state.open = false;
        state.draining = false;
        state.epoch += 1;
        state.device = None;
        state.runtime = None;
        state.cancel = None;
        state.failure = None;
        let mut queue = self.inner.queue.lock();
        let discarded = queue.len();
        queue.clear();
        discarded
    }

    /// Queue a payload for writing.
    ///
    /// Fails with `NotConnected` when no connection is open and with
    /// `QueueFull` at capacity; in both cases nothing is queued.
    pub fn enqueue(&self, payload: impl Into<Vec<u8>>) -> Result<(), QueueError> {
        let config = self.inner.config.read().clone();
        let mut state = self.inner.state.lock();
        if !state.open {
            return Err(QueueError::NotConnected);
        }

        {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= config.capacity {
                tracing::warn!("Send queue full, dropping payload");
                return Err(QueueError::QueueFull {
                    capacity: config.capacity,
                });
            }
            queue.push_back(QueueItem {
                payload: payload.into(),
                enqueued_at: Instant::now(),
            });
        }

        if !state.draining {
            let (Some(runtime), Some(cancel)) = (state.runtime.clone(), state.cancel.as_ref())
            else {
                tracing::error!("Send pipeline has no runtime to drain on");
                return Ok(());
            };
            let cancelled = cancel.subscribe();
            state.draining = true;
            let epoch = state.epoch;
            runtime.spawn(drain(self.inner.clone(), epoch, cancelled));
        }
        Ok(())
    }

    /// Number of queued payloads
    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.inner.queue.lock().is_empty()
    }

    /// Whether a drain loop is active
    pub fn is_draining(&self) -> bool {
        self.inner.state.lock().draining
    }

    /// Whether a connection is attached
    pub fn is_open(&self) -> bool {
        self.inner.state.lock().open
    }

    /// Snapshot of the queued payloads, oldest first
    pub fn queued(&self) -> Vec<QueueItem> {
        self.inner.queue.lock().iter().cloned().collect()
    }

    /// Get the current configuration
    pub fn config(&self) -> SendPipelineConfig {
        self.inner.config.read().clone()
    }

    /// Replace the configuration. Capacity applies to later enqueues,
    /// pacing to the next drain loop, checksum to the next write.
    pub fn set_config(&self, config: SendPipelineConfig) {
        *self.inner.config.write() = config;
    }

    /// Enable or disable checksum framing
    pub fn set_checksum(&self, enabled: bool) {
        self.inner.config.write().checksum = enabled;
    }

    /// Install or remove the outbound hook
    pub fn set_interceptor(&self, interceptor: Option<Arc<dyn DataInterceptor>>) {
        *self.inner.interceptor.write() = interceptor;
    }
}

impl std::fmt::Debug for SendPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendPipeline")
            .field("queued", &self.len())
            .field("open", &self.is_open())
            .field("config", &self.config())
            .finish()
    }
}

async fn drain(inner: Arc<PipelineInner>, epoch: u64, mut cancelled: watch::Receiver<()>) {
    let pacing = inner.config.read().pacing;
    loop {
        let item = {
            let mut state = inner.state.lock();
            if !state.open || state.epoch != epoch {
                return;
            }
            match inner.queue.lock().pop_front() {
                Some(item) => item,
                None => {
                    state.draining = false;
                    return;
                }
            }
        };

        tracing::trace!("Payload waited {:?} in queue", item.enqueued_at.elapsed());

        let interceptor = inner.interceptor.read().clone();
        let bytes = match interceptor {
            Some(interceptor) => interceptor.on_send(item.payload),
            None => item.payload,
        };
        if bytes.is_empty() {
            continue;
        }
        let bytes = if inner.config.read().checksum {
            append_checksum(&bytes)
        } else {
            bytes
        };

        let result = {
            let mut writer = tokio::select! {
                biased;
                _ = cancelled.changed() => return,
                writer = inner.writer.lock() => writer,
            };
            if !inner.is_current(epoch) {
                return;
            }
            let Some(writer) = writer.as_mut() else {
                return;
            };
            tokio::select! {
                biased;
                _ = cancelled.changed() => return,
                result = writer.write_chunk(&bytes) => result,
            }
        };

        if let Err(e) = result {
            fail(&inner, epoch, e.to_string());
            return;
        }
        inner.bus.publish(BusEvent::OutgoingData { raw: bytes });

        tokio::select! {
            biased;
            _ = cancelled.changed() => return,
            _ = tokio::time::sleep(pacing) => {}
        }
    }
}

/// Close the pipeline after a failed write and hand the reason to the owner
fn fail(inner: &PipelineInner, epoch: u64, reason: String) {
    let (device, failure) = {
        let mut state = inner.state.lock();
        if !state.open || state.epoch != epoch {
            return;
        }
        state.open = false;
        state.draining = false;
        let discarded = {
            let mut queue = inner.queue.lock();
            let discarded = queue.len();
            queue.clear();
            discarded
        };
        let device = state.device.clone().unwrap_or_default();
        tracing::error!(
            "Write to {} failed: {}; {} queued payloads discarded",
            device,
            reason,
            discarded
        );
        (device, state.failure.take())
    };

    let unclaimed = match failure {
        Some(failure) => failure.send(reason).err(),
        None => Some(reason),
    };
    if let Some(reason) = unclaimed {
        inner
            .bus
            .publish(BusEvent::Connection(ConnectionEvent::LinkError { device, reason }));
    }
}
