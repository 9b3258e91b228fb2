//! Core types for the CAN device library
//!
//! This module defines the values that flow between the bus, the signal
//! database and the registry: raw frames, decoded snapshots and signal values.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Timestamp type used throughout the device
pub type Timestamp = DateTime<Utc>;

/// Signal name -> value mapping accepted by the encoder and the send path
pub type SignalValues = HashMap<String, SignalValue>;

/// Largest identifier representable in an 11-bit (standard) CAN frame
pub const MAX_STANDARD_ID: u32 = 0x7FF;

/// Largest identifier representable in a 29-bit (extended) CAN frame
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

/// Raw CAN frame as delivered by (or handed to) a bus adapter
///
/// Immutable once captured: the registry keeps the frame that produced the
/// latest snapshot next to it, including its receipt timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct CanFrame {
    /// Receipt time for inbound frames, creation time for outbound ones
    pub timestamp: Timestamp,
    /// CAN message ID (11-bit or 29-bit)
    pub can_id: u32,
    /// Frame data bytes (0-8 bytes for classic CAN)
    pub data: Vec<u8>,
    /// True if this is an extended (29-bit) CAN ID
    pub is_extended: bool,
}

impl CanFrame {
    /// Create a frame stamped with the current time
    ///
    /// Identifiers above the 11-bit range are flagged as extended.
    pub fn new(can_id: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp: Utc::now(),
            can_id,
            data: data.into(),
            is_extended: can_id > MAX_STANDARD_ID,
        }
    }

    /// Builder method: override the timestamp
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Builder method: force the extended-id flag
    pub fn with_extended(mut self, is_extended: bool) -> Self {
        self.is_extended = is_extended;
        self
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_extended {
            write!(f, "{:08X} [{}]", self.can_id, self.data.len())?;
        } else {
            write!(f, "{:03X} [{}]", self.can_id, self.data.len())?;
        }
        for byte in &self.data {
            write!(f, " {:02X}", byte)?;
        }
        Ok(())
    }
}

/// A decoded signal with its current value
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSignal {
    /// Signal name from the DBC
    pub name: String,
    /// Decoded physical value
    pub value: SignalValue,
    /// Engineering unit (e.g., "km/h", "°C", "V")
    pub unit: Option<String>,
    /// Raw value before scaling (useful for debugging)
    pub raw_value: i64,
}

/// Every signal value extracted from one frame of one message
///
/// Snapshots are replaced wholesale on each new frame, never merged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedSnapshot {
    /// Decoded signals in definition order
    pub signals: Vec<DecodedSignal>,
    /// Active multiplexer value (if the message is multiplexed)
    pub multiplexer_value: Option<u64>,
}

impl DecodedSnapshot {
    /// Look up a decoded signal by name
    pub fn get(&self, name: &str) -> Option<&DecodedSignal> {
        self.signals.iter().find(|s| s.name == name)
    }

    /// Value of a signal, if it was present in the frame
    pub fn value(&self, name: &str) -> Option<SignalValue> {
        self.get(name).map(|s| s.value.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Convert into a name -> value map (e.g. to feed back into the encoder)
    pub fn to_values(&self) -> SignalValues {
        self.signals
            .iter()
            .map(|s| (s.name.clone(), s.value.clone()))
            .collect()
    }
}

/// Signal value types supported by the device
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SignalValue {
    /// Signed integer value
    Integer(i64),
    /// Floating-point value (after scaling/offset)
    Float(f64),
    /// Boolean value (single unscaled bit)
    Boolean(bool),
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Integer(v) => write!(f, "{}", v),
            SignalValue::Float(v) => write!(f, "{:.3}", v),
            SignalValue::Boolean(v) => write!(f, "{}", if *v { "true" } else { "false" }),
        }
    }
}

impl SignalValue {
    /// Convert signal value to f64 (physical value used by the encoder)
    pub fn as_f64(&self) -> f64 {
        match self {
            SignalValue::Integer(v) => *v as f64,
            SignalValue::Float(v) => *v,
            SignalValue::Boolean(v) => if *v { 1.0 } else { 0.0 },
        }
    }

    /// Convert signal value to i64 if possible
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SignalValue::Integer(v) => Some(*v),
            SignalValue::Float(v) if v.is_finite() => Some(*v as i64),
            SignalValue::Float(_) => None,
            SignalValue::Boolean(v) => Some(if *v { 1 } else { 0 }),
        }
    }

    /// Check if this is a boolean value
    pub fn as_bool(&self) -> bool {
        match self {
            SignalValue::Boolean(v) => *v,
            SignalValue::Integer(v) => *v != 0,
            SignalValue::Float(v) => *v != 0.0,
        }
    }

    /// Parse a value typed on a command line ("true", "12", "3.5")
    pub fn parse(text: &str) -> Option<SignalValue> {
        let text = text.trim();
        match text {
            "true" => return Some(SignalValue::Boolean(true)),
            "false" => return Some(SignalValue::Boolean(false)),
            _ => {}
        }
        if let Ok(v) = text.parse::<i64>() {
            return Some(SignalValue::Integer(v));
        }
        text.parse::<f64>().ok().map(SignalValue::Float)
    }
}

impl From<i64> for SignalValue {
    fn from(v: i64) -> Self {
        SignalValue::Integer(v)
    }
}

impl From<i32> for SignalValue {
    fn from(v: i32) -> Self {
        SignalValue::Integer(v as i64)
    }
}

impl From<f64> for SignalValue {
    fn from(v: f64) -> Self {
        SignalValue::Float(v)
    }
}

impl From<bool> for SignalValue {
    fn from(v: bool) -> Self {
        SignalValue::Boolean(v)
    }
}
