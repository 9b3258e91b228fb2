//! CAN Device Library
//!
//! A library for sitting on a CAN bus as a device described by a DBC file:
//! received frames are decoded against the database, and signal updates are
//! encoded into frames and transmitted.
//!
//! # Architecture
//!
//! - The signal database is loaded once and shared read-only
//! - A message registry keeps the latest decoded snapshot per message,
//!   reachable both by message name and by frame id
//! - Liveness is derived from the age of the last frame and the cycle time
//! - Sends are stateless: unspecified signals fall back to their initial
//!   values from the database
//! - Bus adapters (virtual, SocketCAN) deliver frames on their own thread
//!
//! # Example Usage
//!
//! ```no_run
//! use can_device::{BusConfig, BusKind, Device, DeviceConfig, SignalValues};
//! use std::path::PathBuf;
//!
//! let config = DeviceConfig::new(PathBuf::from("vehicle.dbc"))
//!     .with_bus(BusConfig::new(BusKind::Virtual, "vcan0"));
//! let device = Device::open(&config).unwrap();
//!
//! let mut signals = SignalValues::new();
//! signals.insert("EngineSpeed".to_string(), 1500.into());
//! device.send_signals("EngineData", &signals).unwrap();
//!
//! if device.is_alive("BatteryStatus", 5.0).is_alive() {
//!     println!("{:?}", device.get_signal("BatteryStatus", "BatteryVoltage"));
//! }
//! ```

// Public modules
pub mod bus;
pub mod config;
pub mod device;
pub mod error;
pub mod liveness;
pub mod registry;
pub mod signals;
pub mod types;

// Re-export main types for convenience
pub use bus::{BusAdapter, FrameCallback, VirtualBus};
pub use config::{BusConfig, BusKind, DeviceConfig, SchemaOptions};
pub use device::{Device, DeviceStats, SendReport};
pub use error::{BusError, DecodeError, DeviceError, EncodeError, Result, SchemaError};
pub use liveness::Liveness;
pub use registry::{MessageRegistry, Observation};
pub use signals::{DatabaseStats, MessageDefinition, SignalDatabase, SignalDefinition};
pub use types::{
    CanFrame, DecodedSignal, DecodedSnapshot, SignalValue, SignalValues, Timestamp,
};

// Internal modules (not exposed in public API)
mod message_decoder;
mod message_encoder;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
