use parking_lot::Mutex;
use serialkit_core::{Result, TransportError};
use tokio::sync::watch;

struct OpenLink {
    device_id: String,
    // Dropping the sender wakes every reader and fails every writer.
    _closed: watch::Sender<()>,
}

/// Tracks the single open connection of a transport
#[derive(Default)]
pub(crate) struct LinkSlot {
    open: Mutex<Option<OpenLink>>,
}

impl LinkSlot {
    /// Mark `device_id` open, returning the close signal for its streams
    pub(crate) fn open(&self, device_id: &str) -> Result<watch::Receiver<()>> {
        let mut open = self.open.lock();
        if let Some(link) = open.as_ref() {
            return Err(TransportError::AlreadyConnected {
                device: link.device_id.clone(),
            }
            .into());
        }
        let (tx, rx) = watch::channel(());
        *open = Some(OpenLink {
            device_id: device_id.to_string(),
            _closed: tx,
        });
        Ok(rx)
    }

    /// Close the open link. Returns the id of the device that was open.
    pub(crate) fn close(&self) -> Option<String> {
        self.open.lock().take().map(|link| link.device_id)
    }

    pub(crate) fn device_id(&self) -> Option<String> {
        self.open.lock().as_ref().map(|link| link.device_id.clone())
    }
}
