//! Simulated IMU transport
//!
//! Emits `pitch:<f>,roll:<f>,yaw:<f>\n` lines on a scheduler timer, each
//! angle following a bounded random walk. Anything written to the device
//! is looped back to its reader, so outbound frames can be observed
//! without hardware.

use async_trait::async_trait;
use parking_lot::Mutex;
use serialkit_core::{Result, Scheduler, TransportError};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Duration;

use super::{
    ByteReader, ByteWriter, ConnectionParams, Device, DeviceHandle, DeviceKind, LinkSlot,
    StreamPair, Transport,
};

/// Registry id of the simulated device
pub const SIMULATED_DEVICE_ID: &str = "simulated";

/// Scheduler timer driving the generator
pub const SIMULATED_TIMER_ID: &str = "simulated:imu";

/// Default emission interval
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(50);

/// The single simulated device
pub fn make_device() -> Device {
    Device::new(
        SIMULATED_DEVICE_ID,
        "Simulated IMU",
        DeviceKind::Simulated,
        DeviceHandle::Simulated,
    )
}

/// Random-walk attitude generator
#[derive(Debug, Clone)]
pub struct ImuGenerator {
    pitch: f64,
    roll: f64,
    yaw: f64,
    state: u64,
}

impl ImuGenerator {
    /// Create a generator at zero attitude
    pub fn new(seed: u64) -> Self {
        Self {
            pitch: 0.0,
            roll: 0.0,
            yaw: 0.0,
            state: seed,
        }
    }

    fn next_unit(&mut self) -> f64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.state >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Advance one step and render the line
    pub fn next_line(&mut self) -> String {
        self.pitch += self.next_unit() * 0.4 - 0.2;
        self.roll += self.next_unit() * 0.4 - 0.1;
        self.yaw += self.next_unit() * 0.4;
        format!(
            "pitch:{:.2},roll:{:.2},yaw:{:.2}\n",
            self.pitch, self.roll, self.yaw
        )
    }
}

/// Transport producing synthetic IMU lines
pub struct SimulatedTransport {
    scheduler: Arc<Scheduler>,
    interval: Duration,
    link: LinkSlot,
}

impl SimulatedTransport {
    /// Create a simulated transport emitting every [`DEFAULT_INTERVAL`]
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self::with_interval(scheduler, DEFAULT_INTERVAL)
    }

    /// Create a simulated transport with a custom cadence
    pub fn with_interval(scheduler: Arc<Scheduler>, interval: Duration) -> Self {
        Self {
            scheduler,
            interval,
            link: LinkSlot::default(),
        }
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Simulated
    }

    async fn discover(&self) -> Result<Vec<Device>> {
        Ok(vec![make_device()])
    }

    async fn connect(&self, device: &Device, _params: &ConnectionParams) -> Result<StreamPair> {
        if !matches!(device.handle, DeviceHandle::Simulated) {
            return Err(TransportError::WrongTransport {
                device: device.id.clone(),
                transport: self.kind().to_string(),
            }
            .into());
        }

        let closed = self.link.open(&device.id)?;
        let (tx, rx) = mpsc::unbounded_channel();

        let generator = Mutex::new(ImuGenerator::new(0x5EED));
        let emit = tx.clone();
        self.scheduler.start(SIMULATED_TIMER_ID, self.interval, move || {
            let line = generator.lock().next_line();
            // Receiver gone means the reader was dropped; nothing to do.
            let _ = emit.send(line.into_bytes());
        });
        tracing::info!("Simulated IMU started every {:?}", self.interval);

        Ok(StreamPair {
            reader: Box::new(LoopbackReader {
                rx,
                closed: closed.clone(),
            }),
            writer: Box::new(LoopbackWriter { tx, closed }),
        })
    }

    async fn disconnect(&self) -> Result<()> {
        self.scheduler.clear(SIMULATED_TIMER_ID);
        if self.link.close().is_some() {
            tracing::info!("Simulated IMU stopped");
        }
        Ok(())
    }
}

struct LoopbackReader {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    closed: watch::Receiver<()>,
}

#[async_trait]
impl ByteReader for LoopbackReader {
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        tokio::select! {
            biased;
            _ = self.closed.changed() => Ok(None),
            chunk = self.rx.recv() => Ok(chunk),
        }
    }
}

struct LoopbackWriter {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    closed: watch::Receiver<()>,
}

#[async_trait]
impl ByteWriter for LoopbackWriter {
    async fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        if self.closed.has_changed().is_err() {
            return Err(TransportError::NotConnected.into());
        }
        self.tx
            .send(data.to_vec())
            .map_err(|_| TransportError::NotConnected.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialkit_core::scheduler::DEFAULT_RESOLUTION;

    fn parse(line: &str) -> Vec<(String, f64)> {
        line.trim_end()
            .split(',')
            .map(|pair| {
                let (k, v) = pair.split_once(':').unwrap();
                (k.to_string(), v.parse().unwrap())
            })
            .collect()
    }

    #[test]
    fn test_generator_line_format() {
        let mut generator = ImuGenerator::new(1);
        for _ in 0..100 {
            let line = generator.next_line();
            assert!(line.ends_with('\n'));
            let fields = parse(&line);
            let keys: Vec<_> = fields.iter().map(|(k, _)| k.as_str()).collect();
            assert_eq!(keys, vec!["pitch", "roll", "yaw"]);
            for (_, v) in &fields {
                assert!(v.is_finite());
            }
            let decimals = line
                .trim_end()
                .split(',')
                .all(|p| p.rsplit('.').next().map(str::len) == Some(2));
            assert!(decimals, "{}", line);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_emits_lines_and_loops_back_writes() {
        let scheduler = Arc::new(Scheduler::new());
        let _driver = scheduler.spawn_driver(DEFAULT_RESOLUTION);
        let transport = SimulatedTransport::new(scheduler.clone());
        let device = transport.discover().await.unwrap().remove(0);
        assert_eq!(device.id, SIMULATED_DEVICE_ID);

        let StreamPair {
            mut reader,
            mut writer,
        } = transport
            .connect(&device, &ConnectionParams::default())
            .await
            .unwrap();

        let first = reader.read_chunk().await.unwrap().unwrap();
        assert!(String::from_utf8(first).unwrap().starts_with("pitch:"));

        writer.write_chunk(b"echo").await.unwrap();
        let mut saw_echo = false;
        for _ in 0..5 {
            if reader.read_chunk().await.unwrap().as_deref() == Some(b"echo".as_slice()) {
                saw_echo = true;
                break;
            }
        }
        assert!(saw_echo);

        transport.disconnect().await.unwrap();
        assert!(!scheduler.contains(SIMULATED_TIMER_ID));
        assert_eq!(reader.read_chunk().await.unwrap(), None);
        assert!(writer.write_chunk(b"late").await.is_err());
    }
}
