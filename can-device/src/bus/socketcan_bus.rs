//! SocketCAN adapter for Linux CAN interfaces

use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use socketcan::{
    CanFrame as SocketFrame, CanInterface, CanSocket, EmbeddedFrame, ExtendedId, Frame, Id,
    Socket, StandardId,
};

use super::{BusAdapter, FrameCallback};
use crate::error::BusError;
use crate::types::CanFrame;

/// How long a blocking read waits before re-checking the shutdown flag
const READ_TIMEOUT: Duration = Duration::from_millis(100);

type SharedCallback = Arc<dyn Fn(CanFrame) + Send + Sync + 'static>;

/// Connection to a SocketCAN interface
pub struct SocketCanBus {
    interface: String,
    writer: Mutex<CanSocket>,
    callback: Arc<RwLock<Option<SharedCallback>>>,
    running: Arc<AtomicBool>,
    listener_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SocketCanBus {
    /// Open the interface, optionally applying a bit rate first
    pub fn open(interface: &str, bitrate: Option<u32>) -> Result<Self, BusError> {
        if let Some(bitrate) = bitrate {
            Self::apply_bitrate(interface, bitrate)?;
        }

        let writer = CanSocket::open(interface).map_err(|e| {
            BusError::ConnectionFailed(format!("Failed to open '{}': {}", interface, e))
        })?;
        let reader = CanSocket::open(interface).map_err(|e| {
            BusError::ConnectionFailed(format!("Failed to open '{}': {}", interface, e))
        })?;
        reader.set_read_timeout(READ_TIMEOUT).map_err(|e| {
            BusError::ConnectionFailed(format!("Failed to set read timeout: {}", e))
        })?;

        let bus = Self {
            interface: interface.to_string(),
            writer: Mutex::new(writer),
            callback: Arc::new(RwLock::new(None)),
            running: Arc::new(AtomicBool::new(true)),
            listener_handle: Mutex::new(None),
        };
        bus.start_listener(reader)?;

        Ok(bus)
    }

    fn apply_bitrate(interface: &str, bitrate: u32) -> Result<(), BusError> {
        let iface = CanInterface::open(interface).map_err(|e| {
            BusError::ConnectionFailed(format!("Failed to open interface '{}': {:?}", interface, e))
        })?;
        iface.set_bitrate(bitrate, None::<u32>).map_err(|e| {
            BusError::ConnectionFailed(format!(
                "Failed to set bitrate {} on '{}': {:?}",
                bitrate, interface, e
            ))
        })?;
        log::info!("Bitrate of '{}' set to {}", interface, bitrate);
        Ok(())
    }

    fn start_listener(&self, reader: CanSocket) -> Result<(), BusError> {
        let callback = Arc::clone(&self.callback);
        let running = Arc::clone(&self.running);
        let interface = self.interface.clone();

        let handle = std::thread::Builder::new()
            .name(format!("can-rx-{}", interface))
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    match reader.read_frame() {
                        Ok(SocketFrame::Data(frame)) => {
                            let received = CanFrame::new(frame.raw_id(), frame.data().to_vec())
                                .with_timestamp(Utc::now())
                                .with_extended(frame.is_extended());
                            let current = callback.read().clone();
                            if let Some(callback) = current {
                                callback(received);
                            }
                        }
                        Ok(_) => {
                            // Remote and error frames carry no signals
                        }
                        Err(ref e)
                            if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
                        Err(e) => {
                            log::error!("SocketCAN read error on '{}': {}", interface, e);
                            std::thread::sleep(READ_TIMEOUT);
                        }
                    }
                }
                log::debug!("SocketCAN listener on '{}' stopped", interface);
            })
            .map_err(|e| BusError::ConnectionFailed(format!("Failed to spawn listener: {}", e)))?;

        *self.listener_handle.lock() = Some(handle);
        Ok(())
    }

    fn to_socket_frame(frame: &CanFrame) -> Result<SocketFrame, BusError> {
        let id: Id = if frame.is_extended {
            ExtendedId::new(frame.can_id)
                .ok_or_else(|| BusError::InvalidFrame(format!("Invalid extended CAN ID: 0x{:X}", frame.can_id)))?
                .into()
        } else {
            u16::try_from(frame.can_id)
                .ok()
                .and_then(StandardId::new)
                .ok_or_else(|| BusError::InvalidFrame(format!("Invalid standard CAN ID: 0x{:X}", frame.can_id)))?
                .into()
        };

        SocketFrame::new(id, &frame.data)
            .ok_or_else(|| BusError::InvalidFrame(format!("Invalid payload of {} bytes", frame.data.len())))
    }
}

impl BusAdapter for SocketCanBus {
    fn send(&self, frame: &CanFrame) -> Result<(), BusError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        let socket_frame = Self::to_socket_frame(frame)?;
        self.writer
            .lock()
            .write_frame(&socket_frame)
            .map_err(|e| BusError::SendFailed(e.to_string()))
    }

    fn on_receive(&self, callback: FrameCallback) -> Result<(), BusError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        *self.callback.write() = Some(Arc::from(callback));
        Ok(())
    }

    fn channel(&self) -> &str {
        &self.interface
    }

    fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.listener_handle.lock().take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for SocketCanBus {
    fn drop(&mut self) {
        self.shutdown();
    }
}
