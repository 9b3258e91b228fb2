//! Message Decoding Engine
//!
//! Extracts signal values from raw CAN payloads based on signal definitions
//! from the signal database. Handles bit extraction, endianness, multiplexing,
//! and physical value conversion.

use crate::error::DecodeError;
use crate::signals::database::{MessageDefinition, SignalDefinition, ValueType};
use crate::types::{DecodedSignal, DecodedSnapshot};

/// Message decoder - extracts signals from CAN payloads
pub struct MessageDecoder;

impl MessageDecoder {
    /// Decode a payload into a snapshot of every active signal
    ///
    /// In strict mode a payload shorter than the declared message size is
    /// rejected; otherwise signals that do not fit are skipped.
    pub fn decode(
        data: &[u8],
        message_def: &MessageDefinition,
        strict: bool,
    ) -> Result<DecodedSnapshot, DecodeError> {
        if strict && data.len() < message_def.size {
            return Err(DecodeError::WrongDataSize {
                message: message_def.name.clone(),
                expected: message_def.size,
                actual: data.len(),
            });
        }

        // For multiplexed messages, first extract the multiplexer signal value
        let multiplexer_value = message_def
            .multiplexer()
            .and_then(|mux_signal| Self::extract_signal_value(data, mux_signal))
            .map(|value| value as u64);

        let signals: Vec<DecodedSignal> = message_def
            .signals
            .iter()
            .filter(|signal| signal.is_active(multiplexer_value))
            .filter_map(|signal| Self::decode_signal(data, signal))
            .collect();

        if signals.is_empty() {
            return Err(DecodeError::NoSignals(message_def.name.clone()));
        }

        Ok(DecodedSnapshot {
            signals,
            multiplexer_value,
        })
    }

    /// Decode a single signal from CAN frame data
    fn decode_signal(data: &[u8], signal: &SignalDefinition) -> Option<DecodedSignal> {
        let raw_value = Self::extract_signal_value(data, signal)?;
        let physical_value = signal.raw_to_physical(raw_value);

        Some(DecodedSignal {
            name: signal.name.clone(),
            value: signal.typed_value(physical_value),
            unit: signal.unit.clone(),
            raw_value,
        })
    }

    /// Extract raw signal value from CAN frame data
    ///
    /// Returns `None` if the signal does not fit in the payload.
    fn extract_signal_value(data: &[u8], signal: &SignalDefinition) -> Option<i64> {
        let positions = signal.bit_positions();

        if positions.iter().any(|(byte, _, _)| *byte >= data.len()) {
            log::debug!(
                "Signal '{}' requires {} bytes but frame only has {} bytes",
                signal.name,
                signal.required_bytes(),
                data.len()
            );
            return None;
        }

        let mut raw: u64 = 0;
        for (byte_idx, bit_in_byte, value_bit) in positions {
            let bit_value = (data[byte_idx] >> bit_in_byte) & 0x01;
            raw |= (bit_value as u64) << value_bit;
        }

        Some(match signal.value_type {
            ValueType::Unsigned => raw as i64,
            ValueType::Signed => Self::sign_extend(raw, signal.length as usize),
        })
    }

    /// Sign-extend a value from N bits to 64 bits
    fn sign_extend(value: u64, bit_length: usize) -> i64 {
        if bit_length >= 64 {
            return value as i64;
        }

        let sign_bit = 1u64 << (bit_length - 1);
        if (value & sign_bit) != 0 {
            let mask = !0u64 << bit_length;
            (value | mask) as i64
        } else {
            value as i64
        }
    }
}
