//! Error types for the CAN device
//!
//! The receive path and the send path handle failures differently: decode
//! errors are absorbed where frames are recorded, while encode and transport
//! errors are returned to the caller of the send path.

use thiserror::Error;

/// Errors raised while loading a signal database
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse DBC file: {0}")]
    DbcParse(String),

    #[error("Unsupported database format: {0}")]
    UnsupportedFormat(String),

    #[error("Unsupported text encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Invalid signal definition: {0}")]
    InvalidSignalDefinition(String),
}

/// Errors raised while decoding a payload against a message definition
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Message not found: CAN ID 0x{0:X}")]
    UnknownFrameId(u32),

    #[error("Wrong data size for '{message}': expected {expected} bytes, got {actual}")]
    WrongDataSize {
        message: String,
        expected: usize,
        actual: usize,
    },

    #[error("No signal of '{0}' could be decoded")]
    NoSignals(String),
}

/// Errors raised while encoding signal values into a payload
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EncodeError {
    #[error("Message not found: {0}")]
    UnknownMessage(String),

    #[error("Missing value for signal '{signal}' of '{message}'")]
    MissingSignal { message: String, signal: String },

    #[error("Signal '{signal}' is not part of '{message}'")]
    UnknownSignal { message: String, signal: String },

    #[error("Value {value} of signal '{signal}' is outside [{min}, {max}]")]
    OutOfRange {
        signal: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Value {value} of signal '{signal}' is not a finite number")]
    NonFinite { signal: String, value: f64 },

    #[error("Raw value {raw} of signal '{signal}' does not fit in {length} bits")]
    RawOverflow {
        signal: String,
        raw: i64,
        length: u16,
    },
}

/// Transport failures reported by a bus adapter
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Bus not supported: {0}")]
    Unsupported(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Connection closed")]
    Closed,
}

/// Errors surfaced by the device facade
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("Message not found: {0}")]
    MessageNotFound(String),
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;
