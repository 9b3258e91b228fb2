//! Device configuration types
//!
//! Everything needed to bring a device up: where the signal database lives and
//! how to read it, which bus to attach to, and the default liveness timeout.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Top-level configuration for a [`crate::Device`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Path to the signal database (DBC)
    #[serde(default)]
    pub database: PathBuf,

    /// How the database file is read
    #[serde(default)]
    pub schema: SchemaOptions,

    /// Bus to attach to
    #[serde(default)]
    pub bus: BusConfig,

    /// Default liveness timeout (multiplier of the cycle time, or seconds for
    /// aperiodic messages)
    #[serde(default = "default_liveness_timeout")]
    pub liveness_timeout: f64,
}

/// Options controlling how a signal database is loaded and applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaOptions {
    /// Text encoding of the database file
    #[serde(default = "default_encoding")]
    pub encoding: String,

    /// Optional mask applied to frame ids before lookup
    #[serde(default)]
    pub frame_id_mask: Option<u32>,

    /// Reject short payloads on decode and oversized signals on load
    #[serde(default)]
    pub strict: bool,
}

/// Transport flavour of a bus connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    /// In-process bus shared by all connections on the same channel name
    #[default]
    Virtual,
    /// Linux SocketCAN interface (requires the `socketcan` feature)
    SocketCan,
}

impl fmt::Display for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusKind::Virtual => write!(f, "virtual"),
            BusKind::SocketCan => write!(f, "socketcan"),
        }
    }
}

impl std::str::FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "virtual" => Ok(BusKind::Virtual),
            "socketcan" => Ok(BusKind::SocketCan),
            other => Err(format!("unknown bus kind '{}'", other)),
        }
    }
}

/// Bus connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default)]
    pub kind: BusKind,

    /// Channel / interface name (e.g. "vcan0")
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Bit rate to apply to the hardware, if any
    #[serde(default)]
    pub bitrate: Option<u32>,
}

fn default_encoding() -> String {
    "cp1252".to_string()
}

fn default_channel() -> String {
    "vcan0".to_string()
}

fn default_liveness_timeout() -> f64 {
    5.0
}

impl Default for SchemaOptions {
    fn default() -> Self {
        Self {
            encoding: default_encoding(),
            frame_id_mask: None,
            strict: false,
        }
    }
}

impl SchemaOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the file encoding
    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = encoding.into();
        self
    }

    /// Builder method: set the frame id mask
    pub fn with_frame_id_mask(mut self, mask: u32) -> Self {
        self.frame_id_mask = Some(mask);
        self
    }

    /// Builder method: enable or disable strict decoding
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Apply the frame id mask (identity when none is configured)
    pub fn mask(&self, frame_id: u32) -> u32 {
        match self.frame_id_mask {
            Some(mask) => frame_id & mask,
            None => frame_id,
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            kind: BusKind::default(),
            channel: default_channel(),
            bitrate: None,
        }
    }
}

impl BusConfig {
    /// Create a bus configuration for the given kind and channel
    pub fn new(kind: BusKind, channel: impl Into<String>) -> Self {
        Self {
            kind,
            channel: channel.into(),
            bitrate: None,
        }
    }

    /// Builder method: set the bit rate
    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = Some(bitrate);
        self
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::new(PathBuf::new())
    }
}

impl DeviceConfig {
    /// Create a configuration for the given database with default settings
    pub fn new(database: impl Into<PathBuf>) -> Self {
        Self {
            database: database.into(),
            schema: SchemaOptions::default(),
            bus: BusConfig::default(),
            liveness_timeout: default_liveness_timeout(),
        }
    }

    /// Builder method: set schema options
    pub fn with_schema(mut self, schema: SchemaOptions) -> Self {
        self.schema = schema;
        self
    }

    /// Builder method: set bus configuration
    pub fn with_bus(mut self, bus: BusConfig) -> Self {
        self.bus = bus;
        self
    }

    /// Builder method: set default liveness timeout
    pub fn with_liveness_timeout(mut self, timeout: f64) -> Self {
        self.liveness_timeout = timeout;
        self
    }
}
