//! In-process virtual bus
//!
//! Every connection opened on the same channel name sees the frames sent by
//! the other connections on that channel, never its own. Frames are stamped
//! when they are sent and delivered on one thread per connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use super::{BusAdapter, FrameCallback};
use crate::error::BusError;
use crate::types::{CanFrame, MAX_EXTENDED_ID, MAX_STANDARD_ID};

/// Classic CAN payload limit
const MAX_PAYLOAD: usize = 8;

type SharedCallback = Arc<dyn Fn(CanFrame) + Send + Sync + 'static>;

struct Endpoint {
    id: u64,
    inbox: mpsc::Sender<CanFrame>,
}

/// channel name -> connected endpoints
fn hub() -> &'static Mutex<HashMap<String, Vec<Endpoint>>> {
    static HUB: OnceLock<Mutex<HashMap<String, Vec<Endpoint>>>> = OnceLock::new();
    HUB.get_or_init(|| Mutex::new(HashMap::new()))
}

static NEXT_ENDPOINT_ID: AtomicU64 = AtomicU64::new(1);

/// One connection to a virtual channel
pub struct VirtualBus {
    id: u64,
    channel: String,
    callback: Arc<RwLock<Option<SharedCallback>>>,
    closed: AtomicBool,
    delivery_handle: Mutex<Option<JoinHandle<()>>>,
}

impl VirtualBus {
    /// Join the named channel, creating it if needed
    ///
    /// Fails if the delivery thread cannot be started; the channel is left
    /// untouched in that case.
    pub fn connect(channel: &str) -> Result<Self, BusError> {
        let id = NEXT_ENDPOINT_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel::<CanFrame>();

        let callback: Arc<RwLock<Option<SharedCallback>>> = Arc::new(RwLock::new(None));
        let delivery_callback = Arc::clone(&callback);

        // Ends once the hub drops this endpoint's sender
        let handle = std::thread::Builder::new()
            .name(format!("can-rx-virtual-{}", id))
            .spawn(move || {
                for frame in rx {
                    let current = delivery_callback.read().clone();
                    if let Some(callback) = current {
                        callback(frame);
                    }
                }
                log::debug!("Virtual bus delivery thread {} stopped", id);
            })
            .map_err(|e| spawn_failed(channel, e))?;

        hub()
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(Endpoint { id, inbox: tx });

        log::debug!("Virtual bus endpoint {} joined channel '{}'", id, channel);

        Ok(Self {
            id,
            channel: channel.to_string(),
            callback,
            closed: AtomicBool::new(false),
            delivery_handle: Mutex::new(Some(handle)),
        })
    }

    /// Number of connections currently on a channel
    pub fn connections(channel: &str) -> usize {
        hub().lock().get(channel).map(|v| v.len()).unwrap_or(0)
    }

    fn validate(frame: &CanFrame) -> Result<(), BusError> {
        if frame.data.len() > MAX_PAYLOAD {
            return Err(BusError::InvalidFrame(format!(
                "payload of {} bytes exceeds {} bytes",
                frame.data.len(),
                MAX_PAYLOAD
            )));
        }
        let max_id = if frame.is_extended { MAX_EXTENDED_ID } else { MAX_STANDARD_ID };
        if frame.can_id > max_id {
            return Err(BusError::InvalidFrame(format!(
                "CAN ID 0x{:X} out of range",
                frame.can_id
            )));
        }
        Ok(())
    }
}

fn spawn_failed(channel: &str, err: std::io::Error) -> BusError {
    BusError::ConnectionFailed(format!(
        "Failed to start delivery thread for virtual channel '{}': {}",
        channel, err
    ))
}

impl BusAdapter for VirtualBus {
    fn send(&self, frame: &CanFrame) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        Self::validate(frame)?;

        let stamped = frame.clone().with_timestamp(Utc::now());
        let hub = hub().lock();
        if let Some(endpoints) = hub.get(&self.channel) {
            for endpoint in endpoints.iter().filter(|e| e.id != self.id) {
                // A peer whose delivery thread is gone simply misses the frame
                let _ = endpoint.inbox.send(stamped.clone());
            }
        }

        log::trace!("Virtual bus '{}' sent {}", self.channel, stamped);
        Ok(())
    }

    fn on_receive(&self, callback: FrameCallback) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        *self.callback.write() = Some(Arc::from(callback));
        Ok(())
    }

    fn channel(&self) -> &str {
        &self.channel
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut hub = hub().lock();
            if let Some(endpoints) = hub.get_mut(&self.channel) {
                endpoints.retain(|e| e.id != self.id);
                if endpoints.is_empty() {
                    hub.remove(&self.channel);
                }
            }
        }

        if let Some(handle) = self.delivery_handle.lock().take() {
            // Never join from inside our own callback
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }

        log::debug!("Virtual bus endpoint {} left channel '{}'", self.id, self.channel);
    }
}

impl Drop for VirtualBus {
    fn drop(&mut self) {
        self.shutdown();
    }
}
