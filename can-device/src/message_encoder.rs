//! Message Encoding Engine
//!
//! Inverse of the decoder: packs physical signal values into a payload using
//! the same bit layout rules.

use crate::error::EncodeError;
use crate::signals::database::{MessageDefinition, SignalDefinition, ValueType};
use crate::types::SignalValues;

/// Message encoder - packs signal values into CAN payloads
pub struct MessageEncoder;

impl MessageEncoder {
    /// Encode a complete signal set for a message
    ///
    /// Every signal active under the multiplexer value in `values` must be
    /// present. Names that do not belong to the message, non-finite values and
    /// values outside the declared range are rejected.
    pub fn encode(
        message_def: &MessageDefinition,
        values: &SignalValues,
    ) -> Result<Vec<u8>, EncodeError> {
        if let Some(unknown) = values.keys().find(|name| message_def.signal(name).is_none()) {
            return Err(EncodeError::UnknownSignal {
                message: message_def.name.clone(),
                signal: unknown.clone(),
            });
        }

        let multiplexer_value = match message_def.multiplexer() {
            Some(mux_signal) => {
                let value = values.get(&mux_signal.name).ok_or_else(|| EncodeError::MissingSignal {
                    message: message_def.name.clone(),
                    signal: mux_signal.name.clone(),
                })?;
                Some(mux_signal.physical_to_raw(value.as_f64()).max(0) as u64)
            }
            None => None,
        };

        let mut data = vec![0u8; message_def.size];

        for signal in message_def
            .signals
            .iter()
            .filter(|signal| signal.is_active(multiplexer_value))
        {
            let value = values.get(&signal.name).ok_or_else(|| EncodeError::MissingSignal {
                message: message_def.name.clone(),
                signal: signal.name.clone(),
            })?;
            let physical = value.as_f64();

            if !physical.is_finite() {
                return Err(EncodeError::NonFinite {
                    signal: signal.name.clone(),
                    value: physical,
                });
            }

            if signal.has_range() && (physical < signal.min || physical > signal.max) {
                return Err(EncodeError::OutOfRange {
                    signal: signal.name.clone(),
                    value: physical,
                    min: signal.min,
                    max: signal.max,
                });
            }

            let raw = signal.physical_to_raw(physical);
            Self::check_raw_fits(signal, raw)?;
            Self::insert_signal_value(&mut data, signal, raw);
        }

        log::trace!("Encoded '{}' as {:02X?}", message_def.name, data);

        Ok(data)
    }

    /// Reject raw values the signal's bit length cannot represent
    fn check_raw_fits(signal: &SignalDefinition, raw: i64) -> Result<(), EncodeError> {
        let length = signal.length as u32;
        let fits = match (signal.value_type, length) {
            (_, 64) => true,
            (ValueType::Unsigned, _) => raw >= 0 && (raw as u64) < (1u64 << length),
            (ValueType::Signed, _) => {
                let limit = 1i64 << (length - 1);
                raw >= -limit && raw < limit
            }
        };

        if fits {
            Ok(())
        } else {
            Err(EncodeError::RawOverflow {
                signal: signal.name.clone(),
                raw,
                length: signal.length,
            })
        }
    }

    /// Write the low `length` bits of `raw` at the signal's positions
    fn insert_signal_value(data: &mut Vec<u8>, signal: &SignalDefinition, raw: i64) {
        let raw = raw as u64;

        for (byte_idx, bit_in_byte, value_bit) in signal.bit_positions() {
            if byte_idx >= data.len() {
                data.resize(byte_idx + 1, 0);
            }
            let mask = 1u8 << bit_in_byte;
            if (raw >> value_bit) & 0x01 != 0 {
                data[byte_idx] |= mask;
            } else {
                data[byte_idx] &= !mask;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message_decoder::MessageDecoder;
    use crate::signals::database::tests::{message, plain_signal};
    use crate::signals::database::{ByteOrder, MultiplexerInfo};
    use crate::types::SignalValue;

    fn values(pairs: &[(&str, SignalValue)]) -> SignalValues {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_encode_little_endian() {
        let msg = message(0x10, "Pair", vec![plain_signal("Lo", 0, 8), plain_signal("Wide", 8, 16)]);
        let data = MessageEncoder::encode(
            &msg,
            &values(&[("Lo", 0xAB.into()), ("Wide", 0x1234.into())]),
        )
        .unwrap();
        assert_eq!(data, vec![0xAB, 0x34, 0x12, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_encode_big_endian() {
        let mut signal = plain_signal("Motorola", 7, 16);
        signal.byte_order = ByteOrder::BigEndian;
        let mut msg = message(0x11, "Be", vec![signal]);
        msg.size = 2;

        let data = MessageEncoder::encode(&msg, &values(&[("Motorola", 0x1234.into())])).unwrap();
        assert_eq!(data, vec![0x12, 0x34]);
    }

    #[test]
    fn test_encode_signed_and_scaled() {
        let mut temp = plain_signal("Temp", 0, 8);
        temp.value_type = ValueType::Signed;
        let mut volts = plain_signal("Volts", 8, 16);
        volts.factor = 0.01;
        let msg = message(0x12, "Mixed", vec![temp, volts]);

        let data = MessageEncoder::encode(
            &msg,
            &values(&[("Temp", (-1).into()), ("Volts", 12.5.into())]),
        )
        .unwrap();
        assert_eq!(&data[..3], &[0xFF, 0xE2, 0x04]);

        let snapshot = MessageDecoder::decode(&data, &msg, false).unwrap();
        assert_eq!(snapshot.value("Temp"), Some(SignalValue::Integer(-1)));
        assert!((snapshot.value("Volts").unwrap().as_f64() - 12.5).abs() < 0.005);
    }

    #[test]
    fn test_missing_signal() {
        let msg = message(0x13, "Pair", vec![plain_signal("A", 0, 8), plain_signal("B", 8, 8)]);
        assert_eq!(
            MessageEncoder::encode(&msg, &values(&[("A", 1.into())])),
            Err(EncodeError::MissingSignal {
                message: "Pair".to_string(),
                signal: "B".to_string(),
            })
        );
    }

    #[test]
    fn test_unknown_signal_rejected() {
        let msg = message(0x14, "One", vec![plain_signal("A", 0, 8)]);
        let input = values(&[("A", 1.into()), ("Bogus", 2.into())]);

        assert_eq!(
            MessageEncoder::encode(&msg, &input),
            Err(EncodeError::UnknownSignal {
                message: "One".to_string(),
                signal: "Bogus".to_string(),
            })
        );
    }

    #[test]
    fn test_range_check() {
        let mut speed = plain_signal("Speed", 0, 8);
        speed.max = 200.0;
        let msg = message(0x15, "Speed", vec![speed]);

        assert!(MessageEncoder::encode(&msg, &values(&[("Speed", 200.into())])).is_ok());
        assert!(matches!(
            MessageEncoder::encode(&msg, &values(&[("Speed", 250.into())])),
            Err(EncodeError::OutOfRange { .. })
        ));
        assert!(matches!(
            MessageEncoder::encode(&msg, &values(&[("Speed", (-1).into())])),
            Err(EncodeError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut volts = plain_signal("Volts", 0, 16);
        volts.factor = 0.01;
        let msg = message(0x18, "Supply", vec![volts]);

        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                MessageEncoder::encode(&msg, &values(&[("Volts", value.into())])),
                Err(EncodeError::NonFinite { .. })
            ));
        }
    }

    #[test]
    fn test_raw_overflow() {
        let msg = message(0x16, "Nibble", vec![plain_signal("N", 0, 4)]);
        assert!(matches!(
            MessageEncoder::encode(&msg, &values(&[("N", 16.into())])),
            Err(EncodeError::RawOverflow { raw: 16, length: 4, .. })
        ));
        assert!(matches!(
            MessageEncoder::encode(&msg, &values(&[("N", (-1).into())])),
            Err(EncodeError::RawOverflow { .. })
        ));
    }

    #[test]
    fn test_encode_multiplexed() {
        let mode = plain_signal("Mode", 0, 8);
        let mut a = plain_signal("SignalA", 8, 8);
        a.multiplexer_info = Some(MultiplexerInfo {
            multiplexer_signal: "Mode".to_string(),
            multiplexer_values: vec![0],
        });
        let mut b = plain_signal("SignalB", 8, 8);
        b.multiplexer_info = Some(MultiplexerInfo {
            multiplexer_signal: "Mode".to_string(),
            multiplexer_values: vec![1],
        });
        let mut msg = message(0x17, "Mux", vec![mode, a, b]);
        msg.is_multiplexed = true;
        msg.multiplexer_signal = Some("Mode".to_string());

        // Only the signals of the selected page are required
        let data = MessageEncoder::encode(&msg, &values(&[("Mode", 1.into()), ("SignalB", 9.into())]))
            .unwrap();
        assert_eq!(&data[..2], &[1, 9]);

        assert!(matches!(
            MessageEncoder::encode(&msg, &values(&[("SignalB", 9.into())])),
            Err(EncodeError::MissingSignal { .. })
        ));
    }
}
