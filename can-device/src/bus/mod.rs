//! Bus adapters
//!
//! This module provides the transports a device can sit on:
//! - Virtual adapter: in-process bus shared by all connections on a channel name
//! - SocketCAN adapter for Linux CAN interfaces (feature `socketcan`)
//!
//! # Example
//!
//! ```no_run
//! use can_device::bus;
//! use can_device::{BusConfig, BusKind, CanFrame};
//!
//! let connection = bus::open(&BusConfig::new(BusKind::Virtual, "demo")).unwrap();
//! connection.on_receive(Box::new(|frame| println!("{}", frame))).unwrap();
//! connection.send(&CanFrame::new(0x123, vec![1, 2, 3])).unwrap();
//! ```

pub mod virtual_bus;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan_bus;

pub use virtual_bus::VirtualBus;

use crate::config::{BusConfig, BusKind};
use crate::error::BusError;
use crate::types::CanFrame;

/// Callback invoked once per received frame, in arrival order
pub type FrameCallback = Box<dyn Fn(CanFrame) + Send + Sync + 'static>;

/// A live connection to a CAN bus
pub trait BusAdapter: Send + Sync {
    /// Transmit one frame
    fn send(&self, frame: &CanFrame) -> Result<(), BusError>;

    /// Register the receive callback
    ///
    /// The callback runs on the adapter's delivery thread. Registering a
    /// second callback replaces the first.
    fn on_receive(&self, callback: FrameCallback) -> Result<(), BusError>;

    /// Channel / interface name of this connection
    fn channel(&self) -> &str;

    /// Stop delivering frames and release the connection
    fn shutdown(&self);
}

/// Open a bus connection based on configuration
///
/// Failure here is fatal for a device: there is nothing to do without a
/// live connection.
pub fn open(config: &BusConfig) -> Result<Box<dyn BusAdapter>, BusError> {
    log::info!(
        "Opening {} bus on channel '{}' (bitrate: {:?})",
        config.kind,
        config.channel,
        config.bitrate
    );

    match config.kind {
        BusKind::Virtual => Ok(Box::new(VirtualBus::connect(&config.channel)?)),
        #[cfg(all(target_os = "linux", feature = "socketcan"))]
        BusKind::SocketCan => Ok(Box::new(socketcan_bus::SocketCanBus::open(
            &config.channel,
            config.bitrate,
        )?)),
        #[cfg(not(all(target_os = "linux", feature = "socketcan")))]
        BusKind::SocketCan => Err(BusError::Unsupported(
            "SocketCAN requires Linux and the 'socketcan' feature".to_string(),
        )),
    }
}
