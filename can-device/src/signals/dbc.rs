//! DBC file parser
//!
//! Parses Vector DBC files and converts them into our internal signal database format.

use crate::config::SchemaOptions;
use crate::error::SchemaError;
use crate::signals::database::{
    ByteOrder, MessageDefinition, MultiplexerInfo, SignalDefinition, ValueType,
};
use crate::types::MAX_EXTENDED_ID;
use std::path::Path;

/// Bit 31 of a DBC message id marks a 29-bit identifier
const DBC_EXTENDED_FLAG: u32 = 0x8000_0000;

const CYCLE_TIME_ATTRIBUTE: &str = "GenMsgCycleTime";
const START_VALUE_ATTRIBUTE: &str = "GenSigStartValue";

/// Parse a DBC file and return message definitions
pub fn parse_dbc_file(path: &Path, options: &SchemaOptions) -> Result<Vec<MessageDefinition>, SchemaError> {
    log::info!("Parsing DBC file: {:?}", path);

    let bytes = std::fs::read(path)?;
    let content = decode_text(&bytes, &options.encoding)?;

    let source_filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown.dbc")
        .to_string();

    let messages = parse_dbc_str(&content, &source_filename, options)?;

    log::info!("Parsed {} messages from {:?}", messages.len(), path);

    Ok(messages)
}

/// Parse DBC text and return message definitions
pub fn parse_dbc_str(
    content: &str,
    source: &str,
    options: &SchemaOptions,
) -> Result<Vec<MessageDefinition>, SchemaError> {
    let dbc = can_dbc::DBC::from_slice(content.as_bytes()).map_err(|e| {
        SchemaError::DbcParse(format!("Failed to parse DBC {}: {:?}", source, e))
    })?;

    let attributes = DbcAttributes::collect(&dbc);

    dbc.messages()
        .iter()
        .map(|dbc_msg| convert_message(dbc_msg, &attributes, source, options))
        .collect()
}

/// Characters of cp1252 bytes 0x80..=0x9F; the rest of the code page matches Latin-1
///
/// The five unassigned bytes (0x81, 0x8D, 0x8F, 0x90, 0x9D) map to the C1
/// control of the same value.
const CP1252_HIGH: [char; 32] = [
    '\u{20AC}', '\u{0081}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{008D}', '\u{017D}', '\u{008F}',
    '\u{0090}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}', '\u{0153}', '\u{009D}', '\u{017E}', '\u{0178}',
];

fn cp1252_char(byte: u8) -> char {
    match byte {
        0x80..=0x9F => CP1252_HIGH[(byte - 0x80) as usize],
        _ => byte as char,
    }
}

/// Decode raw file bytes using the configured text encoding
fn decode_text(bytes: &[u8], encoding: &str) -> Result<String, SchemaError> {
    match encoding.to_ascii_lowercase().replace('_', "-").as_str() {
        "utf-8" | "utf8" => String::from_utf8(bytes.to_vec())
            .map_err(|e| SchemaError::DbcParse(format!("File is not valid UTF-8: {}", e))),
        "cp1252" | "windows-1252" => Ok(bytes.iter().map(|&b| cp1252_char(b)).collect()),
        "latin-1" | "latin1" | "iso-8859-1" => Ok(bytes.iter().map(|&b| b as char).collect()),
        other => Err(SchemaError::UnsupportedEncoding(other.to_string())),
    }
}

/// Numeric view of a DBC attribute value
fn attribute_number(value: &can_dbc::AttributeValue) -> Option<f64> {
    match value {
        can_dbc::AttributeValue::AttributeValueU64(v) => Some(*v as f64),
        can_dbc::AttributeValue::AttributeValueI64(v) => Some(*v as f64),
        can_dbc::AttributeValue::AttributeValueF64(v) => Some(*v),
        can_dbc::AttributeValue::AttributeValueCharString(s) => s.trim().parse().ok(),
    }
}

/// The two attributes the device cares about, with their defaults
#[derive(Default)]
struct DbcAttributes {
    default_cycle_time: Option<f64>,
    default_start_value: Option<f64>,
    /// (raw message id, cycle time)
    cycle_times: Vec<(u32, f64)>,
    /// (raw message id, signal name, raw start value)
    start_values: Vec<(u32, String, f64)>,
}

impl DbcAttributes {
    fn collect(dbc: &can_dbc::DBC) -> Self {
        let mut attributes = Self::default();

        for default in dbc.attribute_defaults() {
            let value = attribute_number(default.attribute_value());
            match default.attribute_name().as_str() {
                CYCLE_TIME_ATTRIBUTE => attributes.default_cycle_time = value,
                START_VALUE_ATTRIBUTE => attributes.default_start_value = value,
                _ => {}
            }
        }

        for attribute in dbc.attribute_values() {
            match (attribute.attribute_name().as_str(), attribute.attribute_value()) {
                (
                    CYCLE_TIME_ATTRIBUTE,
                    can_dbc::AttributeValuedForObjectType::MessageDefinitionAttributeValue(
                        message_id,
                        Some(value),
                    ),
                ) => {
                    if let Some(cycle) = attribute_number(value) {
                        attributes.cycle_times.push((message_id.0, cycle));
                    }
                }
                (
                    START_VALUE_ATTRIBUTE,
                    can_dbc::AttributeValuedForObjectType::SignalAttributeValue(
                        message_id,
                        signal_name,
                        value,
                    ),
                ) => {
                    if let Some(start) = attribute_number(value) {
                        attributes
                            .start_values
                            .push((message_id.0, signal_name.clone(), start));
                    }
                }
                _ => {}
            }
        }

        attributes
    }

    fn cycle_time(&self, message_id: u32) -> u64 {
        self.cycle_times
            .iter()
            .find(|(id, _)| *id == message_id)
            .map(|(_, cycle)| *cycle)
            .or(self.default_cycle_time)
            .filter(|cycle| cycle.is_finite() && *cycle > 0.0)
            .map(|cycle| cycle.round() as u64)
            .unwrap_or(0)
    }

    fn start_value(&self, message_id: u32, signal_name: &str) -> Option<f64> {
        self.start_values
            .iter()
            .find(|(id, name, _)| *id == message_id && name == signal_name)
            .map(|(_, _, value)| *value)
            .or(self.default_start_value)
    }
}

/// Convert a can-dbc message to our MessageDefinition
fn convert_message(
    dbc_msg: &can_dbc::Message,
    attributes: &DbcAttributes,
    source: &str,
    options: &SchemaOptions,
) -> Result<MessageDefinition, SchemaError> {
    let raw_id = dbc_msg.message_id().0;
    let is_extended = raw_id & DBC_EXTENDED_FLAG != 0;
    let id = raw_id & MAX_EXTENDED_ID;
    let size = *dbc_msg.message_size() as usize;

    let mut is_multiplexed = false;
    let mut multiplexer_signal_name: Option<String> = None;

    // First pass: identify multiplexer signal
    for dbc_sig in dbc_msg.signals() {
        match dbc_sig.multiplexer_indicator() {
            can_dbc::MultiplexIndicator::Multiplexor => {
                is_multiplexed = true;
                multiplexer_signal_name = Some(dbc_sig.name().to_string());
            }
            can_dbc::MultiplexIndicator::MultiplexedSignal(_) => is_multiplexed = true,
            _ => {}
        }
    }

    // Second pass: convert all signals
    let mut signals = Vec::new();
    for dbc_sig in dbc_msg.signals() {
        let initial = attributes.start_value(raw_id, dbc_sig.name());
        let signal = convert_signal(dbc_sig, multiplexer_signal_name.as_deref(), initial)?;

        if signal.required_bytes() > size {
            let detail = format!(
                "Signal '{}' of '{}' needs {} bytes, message is {} bytes",
                signal.name,
                dbc_msg.message_name(),
                signal.required_bytes(),
                size
            );
            if options.strict {
                return Err(SchemaError::InvalidSignalDefinition(detail));
            }
            log::warn!("{}", detail);
        }

        signals.push(signal);
    }

    Ok(MessageDefinition {
        id,
        name: dbc_msg.message_name().to_string(),
        size,
        is_extended,
        sender: match dbc_msg.transmitter() {
            can_dbc::Transmitter::NodeName(name) => Some(name.to_string()),
            _ => None,
        },
        cycle_time_ms: attributes.cycle_time(raw_id),
        signals,
        is_multiplexed,
        multiplexer_signal: multiplexer_signal_name,
        source: source.to_string(),
    })
}

/// Convert a can-dbc signal to our SignalDefinition
///
/// `raw_initial` is the `GenSigStartValue` attribute, which DBC stores as a
/// raw value; it is scaled to a physical value here.
fn convert_signal(
    dbc_sig: &can_dbc::Signal,
    multiplexer_signal_name: Option<&str>,
    raw_initial: Option<f64>,
) -> Result<SignalDefinition, SchemaError> {
    let byte_order = match *dbc_sig.byte_order() {
        can_dbc::ByteOrder::LittleEndian => ByteOrder::LittleEndian,
        can_dbc::ByteOrder::BigEndian => ByteOrder::BigEndian,
    };

    let value_type = match *dbc_sig.value_type() {
        can_dbc::ValueType::Signed => ValueType::Signed,
        can_dbc::ValueType::Unsigned => ValueType::Unsigned,
    };

    let multiplexer_info = match *dbc_sig.multiplexer_indicator() {
        can_dbc::MultiplexIndicator::MultiplexedSignal(switch_value) => {
            Some(MultiplexerInfo {
                multiplexer_signal: multiplexer_signal_name
                    .ok_or_else(|| {
                        SchemaError::InvalidSignalDefinition(format!(
                            "Multiplexed signal '{}' but no multiplexer found",
                            dbc_sig.name()
                        ))
                    })?
                    .to_string(),
                multiplexer_values: vec![switch_value],
            })
        }
        _ => None,
    };

    let length = *dbc_sig.signal_size() as u16;
    if length == 0 || length > 64 {
        return Err(SchemaError::InvalidSignalDefinition(format!(
            "Signal '{}' has unsupported length {}",
            dbc_sig.name(),
            length
        )));
    }

    let factor = *dbc_sig.factor();
    let offset = *dbc_sig.offset();

    Ok(SignalDefinition {
        name: dbc_sig.name().to_string(),
        start_bit: *dbc_sig.start_bit() as u16,
        length,
        byte_order,
        value_type,
        factor,
        offset,
        min: *dbc_sig.min(),
        max: *dbc_sig.max(),
        unit: if dbc_sig.unit().is_empty() {
            None
        } else {
            Some(dbc_sig.unit().to_string())
        },
        initial: raw_initial.map(|raw| offset + factor * raw),
        multiplexer_info,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Small database shared by tests across the crate
    pub(crate) const VEHICLE_DBC: &str = r#"
VERSION ""

NS_ :
    CM_
    BA_DEF_
    BA_
    BA_DEF_DEF_

BS_:

BU_: ECU1 ECU2

BO_ 291 EngineData: 8 ECU1
 SG_ EngineSpeed : 0|16@1+ (1,0) [0|8000] "rpm" ECU2
 SG_ EngineTemp : 16|8@1+ (1,-40) [-40|215] "C" ECU2

BO_ 512 BatteryStatus: 8 ECU1
 SG_ BatteryVoltage : 0|16@1+ (0.01,0) [0|16] "V" ECU2
 SG_ Charging : 16|1@1+ (1,0) [0|1] "" ECU2

BO_ 768 Command: 2 ECU2
 SG_ A : 0|8@1+ (1,0) [0|255] "" ECU1
 SG_ B : 8|8@1+ (1,0) [0|255] "" ECU1

BO_ 1024 MultiplexedMsg: 8 ECU1
 SG_ Mode M : 0|8@1+ (1,0) [0|3] "" ECU2
 SG_ SignalA m0 : 8|16@1+ (1,0) [0|100] "%" ECU2
 SG_ SignalB m1 : 8|16@1+ (0.1,0) [0|1000] "mV" ECU2

BA_DEF_ BO_ "GenMsgCycleTime" INT 0 65535;
BA_DEF_ SG_ "GenSigStartValue" INT 0 65535;
BA_DEF_DEF_ "GenMsgCycleTime" 0;
BA_DEF_DEF_ "GenSigStartValue" 0;
BA_ "GenMsgCycleTime" BO_ 291 100;
BA_ "GenMsgCycleTime" BO_ 512 1000;
BA_ "GenSigStartValue" SG_ 768 A 1;
BA_ "GenSigStartValue" SG_ 291 EngineTemp 40;
"#;

    fn write_temp(content: &str) -> NamedTempFile {
        let mut temp_file = tempfile::Builder::new().suffix(".dbc").tempfile().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        temp_file.flush().unwrap();
        temp_file
    }

    #[test]
    fn test_parse_simple_dbc() {
        let temp_file = write_temp(VEHICLE_DBC);
        let messages = parse_dbc_file(temp_file.path(), &SchemaOptions::new()).unwrap();

        assert_eq!(messages.len(), 4);

        let msg1 = &messages[0];
        assert_eq!(msg1.id, 291);
        assert_eq!(msg1.name, "EngineData");
        assert_eq!(msg1.size, 8);
        assert!(!msg1.is_extended);
        assert_eq!(msg1.sender, Some("ECU1".to_string()));
        assert_eq!(msg1.signals.len(), 2);

        let sig1 = &msg1.signals[0];
        assert_eq!(sig1.name, "EngineSpeed");
        assert_eq!(sig1.start_bit, 0);
        assert_eq!(sig1.length, 16);
        assert_eq!(sig1.factor, 1.0);
        assert_eq!(sig1.offset, 0.0);
        assert_eq!(sig1.unit, Some("rpm".to_string()));
    }

    #[test]
    fn test_cycle_time_attribute() {
        let messages = parse_dbc_str(VEHICLE_DBC, "vehicle.dbc", &SchemaOptions::new()).unwrap();

        let cycle = |name: &str| {
            messages
                .iter()
                .find(|m| m.name == name)
                .map(|m| m.cycle_time_ms)
                .unwrap()
        };
        assert_eq!(cycle("EngineData"), 100);
        assert_eq!(cycle("BatteryStatus"), 1000);
        assert_eq!(cycle("Command"), 0);
    }

    #[test]
    fn test_start_value_attribute() {
        let messages = parse_dbc_str(VEHICLE_DBC, "vehicle.dbc", &SchemaOptions::new()).unwrap();

        let command = messages.iter().find(|m| m.name == "Command").unwrap();
        assert_eq!(command.signal("A").unwrap().initial, Some(1.0));
        assert_eq!(command.signal("B").unwrap().initial, Some(0.0));

        // Raw start value 40 with offset -40 is a physical 0
        let engine = messages.iter().find(|m| m.name == "EngineData").unwrap();
        assert_eq!(engine.signal("EngineTemp").unwrap().initial, Some(0.0));
    }

    #[test]
    fn test_parse_multiplexed_signals() {
        let messages = parse_dbc_str(VEHICLE_DBC, "vehicle.dbc", &SchemaOptions::new()).unwrap();

        let msg = messages.iter().find(|m| m.name == "MultiplexedMsg").unwrap();
        assert!(msg.is_multiplexed);
        assert_eq!(msg.multiplexer_signal, Some("Mode".to_string()));
        assert_eq!(msg.signals.len(), 3);

        let sig_a = msg.signal("SignalA").unwrap();
        assert_eq!(
            sig_a.multiplexer_info.as_ref().unwrap().multiplexer_signal,
            "Mode"
        );
        assert_eq!(sig_a.multiplexer_info.as_ref().unwrap().multiplexer_values, vec![0]);
    }

    #[test]
    fn test_extended_frame_id() {
        let dbc = r#"
VERSION ""

NS_ :

BS_:

BU_: ECU1

BO_ 2566844926 J1939Msg: 8 ECU1
 SG_ Value : 0|8@1+ (1,0) [0|255] "" ECU1
"#;
        let messages = parse_dbc_str(dbc, "j1939.dbc", &SchemaOptions::new()).unwrap();
        assert!(messages[0].is_extended);
        assert_eq!(messages[0].id, 2566844926 & 0x1FFF_FFFF);
    }

    #[test]
    fn test_encodings() {
        assert_eq!(decode_text(b"BO_", "UTF-8").unwrap(), "BO_");
        assert_eq!(decode_text(&[0x42, 0xB0], "cp1252").unwrap(), "B\u{b0}");
        assert!(decode_text(&[0xFF], "utf-8").is_err());
        assert!(matches!(
            decode_text(b"x", "ebcdic"),
            Err(SchemaError::UnsupportedEncoding(_))
        ));
    }

    #[test]
    fn test_cp1252_high_range() {
        let text = decode_text(&[0x80, 0x89, 0x84, 0x99, 0x9F], "cp1252").unwrap();
        assert_eq!(text, "\u{20AC}\u{2030}\u{201E}\u{2122}\u{0178}");
        assert_eq!(decode_text(&[0x81], "windows-1252").unwrap(), "\u{0081}");

        // Latin-1 keeps the C1 range as is
        assert_eq!(decode_text(&[0x80], "latin-1").unwrap(), "\u{0080}");
    }

    #[test]
    fn test_cp1252_unit_in_file() {
        let content = VEHICLE_DBC.replace("\"V\"", "\"\u{20AC}/V\"");
        let bytes: Vec<u8> = content
            .chars()
            .map(|c| if c == '\u{20AC}' { 0x80 } else { c as u8 })
            .collect();

        let mut temp_file = tempfile::Builder::new().suffix(".dbc").tempfile().unwrap();
        temp_file.write_all(&bytes).unwrap();
        temp_file.flush().unwrap();

        let messages = parse_dbc_file(temp_file.path(), &SchemaOptions::new()).unwrap();
        let battery = messages.iter().find(|m| m.name == "BatteryStatus").unwrap();
        assert_eq!(battery.signals[0].unit.as_deref(), Some("\u{20AC}/V"));
    }

    #[test]
    fn test_invalid_dbc() {
        let result = parse_dbc_str("this is not a dbc", "broken.dbc", &SchemaOptions::new());
        assert!(matches!(result, Err(SchemaError::DbcParse(_))));
    }

    #[test]
    fn test_signal_exceeding_message_size() {
        let dbc = r#"
VERSION ""

NS_ :

BS_:

BU_: ECU1

BO_ 16 Short: 1 ECU1
 SG_ Wide : 0|16@1+ (1,0) [0|0] "" ECU1
"#;
        assert!(parse_dbc_str(dbc, "short.dbc", &SchemaOptions::new()).is_ok());

        let strict = SchemaOptions::new().with_strict(true);
        assert!(matches!(
            parse_dbc_str(dbc, "short.dbc", &strict),
            Err(SchemaError::InvalidSignalDefinition(_))
        ));
    }
}
