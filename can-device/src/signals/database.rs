//! Signal database
//!
//! The immutable schema a device runs against. Message definitions are shared
//! as `Arc<MessageDefinition>` so observations in the registry can point back
//! at the definition that decoded them.

use crate::config::SchemaOptions;
use crate::error::{DecodeError, EncodeError, SchemaError};
use crate::message_decoder::MessageDecoder;
use crate::message_encoder::MessageEncoder;
use crate::types::{DecodedSnapshot, SignalValue, SignalValues};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// A complete CAN message definition
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDefinition {
    /// CAN message ID (extended flag stripped)
    pub id: u32,
    /// Message name
    pub name: String,
    /// Message size in bytes
    pub size: usize,
    /// True if the message uses a 29-bit identifier
    pub is_extended: bool,
    /// Sender ECU name (optional)
    pub sender: Option<String>,
    /// Expected transmission period in milliseconds (0 = aperiodic)
    pub cycle_time_ms: u64,
    /// All signals in this message
    pub signals: Vec<SignalDefinition>,
    /// True if this message has multiplexed signals
    pub is_multiplexed: bool,
    /// Multiplexer signal name (if multiplexed)
    pub multiplexer_signal: Option<String>,
    /// Source file (DBC filename)
    pub source: String,
}

/// A CAN signal definition
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDefinition {
    /// Signal name
    pub name: String,
    /// Start bit in the CAN frame (DBC numbering)
    pub start_bit: u16,
    /// Length in bits
    pub length: u16,
    /// Byte order
    pub byte_order: ByteOrder,
    /// Value type (signed/unsigned)
    pub value_type: ValueType,
    /// Scale factor to convert raw value to physical value
    pub factor: f64,
    /// Offset to add after scaling
    pub offset: f64,
    /// Minimum physical value
    pub min: f64,
    /// Maximum physical value
    pub max: f64,
    /// Engineering unit (e.g., "km/h", "°C", "V")
    pub unit: Option<String>,
    /// Initial physical value, if the database declares one
    pub initial: Option<f64>,
    /// Multiplexer info (None if not multiplexed)
    pub multiplexer_info: Option<MultiplexerInfo>,
}

/// Byte order for signal extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian (Intel format)
    LittleEndian,
    /// Big-endian (Motorola format)
    BigEndian,
}

/// Value type for signal interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Signed integer
    Signed,
    /// Unsigned integer
    Unsigned,
}

/// Multiplexer information for multiplexed signals
#[derive(Debug, Clone, PartialEq)]
pub struct MultiplexerInfo {
    /// Name of the multiplexer signal that controls this signal
    pub multiplexer_signal: String,
    /// Multiplexer value(s) for which this signal is active
    pub multiplexer_values: Vec<u64>,
}

impl SignalDefinition {
    /// True when the signal is a single unscaled bit
    pub fn is_boolean(&self) -> bool {
        self.factor == 1.0 && self.offset == 0.0 && self.length == 1
    }

    /// True when factor or offset change the raw value
    pub fn is_scaled(&self) -> bool {
        self.factor != 1.0 || self.offset != 0.0
    }

    /// A range is declared when min and max differ (DBC uses [0|0] for "none")
    pub fn has_range(&self) -> bool {
        self.min != self.max
    }

    /// Physical value of a raw integer
    pub fn raw_to_physical(&self, raw: i64) -> f64 {
        self.offset + self.factor * (raw as f64)
    }

    /// Raw integer closest to a physical value
    pub fn physical_to_raw(&self, physical: f64) -> i64 {
        let factor = if self.factor == 0.0 { 1.0 } else { self.factor };
        ((physical - self.offset) / factor).round() as i64
    }

    /// Wrap a physical value in the variant the decoder would produce
    pub fn typed_value(&self, physical: f64) -> SignalValue {
        if self.is_boolean() {
            SignalValue::Boolean(physical != 0.0)
        } else if self.is_scaled() {
            SignalValue::Float(physical)
        } else {
            SignalValue::Integer(physical.round() as i64)
        }
    }

    /// Value used for this signal when a send does not override it
    ///
    /// Signals without a declared initial value default to zero.
    pub fn default_value(&self) -> SignalValue {
        self.typed_value(self.initial.unwrap_or(0.0))
    }

    /// Frame bit positions covered by this signal
    ///
    /// Each entry is `(byte_index, bit_in_byte, value_bit)`, where `value_bit`
    /// is the bit of the raw value stored at that position.
    pub fn bit_positions(&self) -> Vec<(usize, u8, usize)> {
        let length = self.length as usize;
        let mut positions = Vec::with_capacity(length);

        match self.byte_order {
            ByteOrder::LittleEndian => {
                // Start bit is the LSB, bits run upwards through the frame
                for i in 0..length {
                    let bit_pos = self.start_bit as usize + i;
                    positions.push((bit_pos / 8, (bit_pos % 8) as u8, i));
                }
            }
            ByteOrder::BigEndian => {
                // Start bit is the MSB, bits run down each byte then jump to
                // the MSB of the next byte (DBC sawtooth numbering)
                let mut bit_pos = self.start_bit as usize;
                for i in 0..length {
                    positions.push((bit_pos / 8, (bit_pos % 8) as u8, length - 1 - i));
                    if bit_pos % 8 == 0 {
                        bit_pos += 15;
                    } else {
                        bit_pos -= 1;
                    }
                }
            }
        }

        positions
    }

    /// Number of payload bytes needed to hold this signal
    pub fn required_bytes(&self) -> usize {
        self.bit_positions()
            .iter()
            .map(|(byte, _, _)| byte + 1)
            .max()
            .unwrap_or(0)
    }

    /// Whether this signal is present for the given multiplexer value
    pub fn is_active(&self, multiplexer_value: Option<u64>) -> bool {
        match (&self.multiplexer_info, multiplexer_value) {
            (None, _) => true,
            (Some(info), Some(value)) => info.multiplexer_values.contains(&value),
            (Some(_), None) => false,
        }
    }
}

impl MessageDefinition {
    /// Look up a signal definition by name
    pub fn signal(&self, name: &str) -> Option<&SignalDefinition> {
        self.signals.iter().find(|s| s.name == name)
    }

    /// The multiplexer switch signal, if the message has one
    pub fn multiplexer(&self) -> Option<&SignalDefinition> {
        self.multiplexer_signal
            .as_deref()
            .and_then(|name| self.signal(name))
    }

    /// Default signal set: every signal's initial value (zero when undefined)
    pub fn default_values(&self) -> SignalValues {
        self.signals
            .iter()
            .map(|s| (s.name.clone(), s.default_value()))
            .collect()
    }
}

/// The signal database
pub struct SignalDatabase {
    /// All message definitions in load order
    messages: Vec<Arc<MessageDefinition>>,

    /// Masked CAN ID -> index into `messages`
    id_lookup: HashMap<u32, usize>,

    /// Message name -> index into `messages`
    name_lookup: HashMap<String, usize>,

    /// Options the database was loaded with
    options: SchemaOptions,
}

impl SignalDatabase {
    /// Create a new empty signal database
    pub fn new() -> Self {
        Self::with_options(SchemaOptions::default())
    }

    /// Create a new empty signal database with the given options
    pub fn with_options(options: SchemaOptions) -> Self {
        Self {
            messages: Vec::new(),
            id_lookup: HashMap::new(),
            name_lookup: HashMap::new(),
            options,
        }
    }

    /// Load a database file
    ///
    /// Only DBC files are supported.
    pub fn load_file(path: &Path, options: &SchemaOptions) -> Result<Self, SchemaError> {
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase());

        match extension.as_deref() {
            Some("dbc") => {
                let messages = crate::signals::dbc::parse_dbc_file(path, options)?;
                Ok(Self::from_messages(messages, options.clone()))
            }
            _ => Err(SchemaError::UnsupportedFormat(format!(
                "{:?} (expected a .dbc file)",
                path
            ))),
        }
    }

    /// Parse DBC text held in memory
    pub fn from_dbc_str(content: &str, options: &SchemaOptions) -> Result<Self, SchemaError> {
        let messages = crate::signals::dbc::parse_dbc_str(content, "<memory>", options)?;
        Ok(Self::from_messages(messages, options.clone()))
    }

    /// Build a database from already converted definitions
    pub fn from_messages(messages: Vec<MessageDefinition>, options: SchemaOptions) -> Self {
        let mut db = Self::with_options(options);
        for message in messages {
            db.add_message(message);
        }
        db
    }

    /// Add a message definition to the database
    ///
    /// A later definition with the same (masked) id or name replaces the
    /// earlier one in the lookups.
    pub fn add_message(&mut self, message: MessageDefinition) {
        let index = self.messages.len();
        let masked_id = self.options.mask(message.id);

        if let Some(previous) = self.id_lookup.insert(masked_id, index) {
            log::warn!(
                "Message '{}' replaces '{}' for CAN ID 0x{:X}",
                message.name,
                self.messages[previous].name,
                masked_id
            );
        }
        self.name_lookup.insert(message.name.clone(), index);
        self.messages.push(Arc::new(message));
    }

    /// Options the database was loaded with
    pub fn options(&self) -> &SchemaOptions {
        &self.options
    }

    /// Get a message definition by frame id (the frame id mask is applied)
    pub fn message_by_frame_id(&self, frame_id: u32) -> Option<&Arc<MessageDefinition>> {
        self.id_lookup
            .get(&self.options.mask(frame_id))
            .and_then(|idx| self.messages.get(*idx))
    }

    /// Get a message definition by name
    pub fn message_by_name(&self, message_name: &str) -> Option<&Arc<MessageDefinition>> {
        self.name_lookup
            .get(message_name)
            .and_then(|idx| self.messages.get(*idx))
    }

    /// Decode a payload received with the given frame id
    pub fn decode(&self, frame_id: u32, data: &[u8]) -> Result<DecodedSnapshot, DecodeError> {
        let message = self
            .message_by_frame_id(frame_id)
            .ok_or(DecodeError::UnknownFrameId(frame_id))?;
        MessageDecoder::decode(data, message, self.options.strict)
    }

    /// Encode a signal set for the named message
    pub fn encode(&self, message_name: &str, values: &SignalValues) -> Result<Vec<u8>, EncodeError> {
        let message = self
            .message_by_name(message_name)
            .ok_or_else(|| EncodeError::UnknownMessage(message_name.to_string()))?;
        MessageEncoder::encode(message, values)
    }

    /// Iterate over all message definitions in load order
    pub fn messages(&self) -> impl Iterator<Item = &Arc<MessageDefinition>> {
        self.messages.iter()
    }

    /// Get database statistics
    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            num_messages: self.messages.len(),
            num_signals: self.messages.iter().map(|m| m.signals.len()).sum(),
            num_periodic: self.messages.iter().filter(|m| m.cycle_time_ms > 0).count(),
        }
    }

    /// Get all unique CAN IDs in the database
    pub fn frame_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.messages.iter().map(|m| m.id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Database statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Total number of message definitions
    pub num_messages: usize,
    /// Total number of signal definitions
    pub num_signals: usize,
    /// Messages with a nonzero cycle time
    pub num_periodic: usize,
}

impl Default for SignalDatabase {
    fn default() -> Self {
        Self::new()
    }
}
