//! Subcommand implementations

use anyhow::{bail, Context, Result};
use can_device::{Device, DeviceConfig, Liveness, SignalDatabase, SignalValue, SignalValues};
use serde::Serialize;
use std::thread;
use std::time::Duration;

/// Print every message of the database
pub fn list(config: &DeviceConfig, json: bool) -> Result<()> {
    let database = SignalDatabase::load_file(&config.database, &config.schema)
        .with_context(|| format!("Failed to load signal database: {:?}", config.database))?;

    if json {
        let messages: Vec<_> = database
            .messages()
            .map(|m| {
                serde_json::json!({
                    "id": m.id,
                    "name": m.name,
                    "size": m.size,
                    "extended": m.is_extended,
                    "cycle_time_ms": m.cycle_time_ms,
                    "signals": m.signals.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&messages)?);
        return Ok(());
    }

    let stats = database.stats();
    println!("Signal Database: {:?}", config.database);
    println!(
        "  Messages: {} ({} periodic)",
        stats.num_messages, stats.num_periodic
    );
    println!("  Signals:  {}\n", stats.num_signals);

    for message in database.messages() {
        let cycle = match message.cycle_time_ms {
            0 => "-".to_string(),
            ms => format!("{} ms", ms),
        };
        println!("0x{:X}  {}  [{} bytes, cycle {}]", message.id, message.name, message.size, cycle);
        for signal in &message.signals {
            let unit = signal.unit.as_deref().unwrap_or("");
            let initial = signal.default_value();
            println!(
                "    {:<24} {}|{}  init {} {}",
                signal.name, signal.start_bit, signal.length, initial, unit
            );
        }
    }

    Ok(())
}

/// One watched message in a monitor tick
#[derive(Debug, Serialize)]
struct MessageStatus {
    message: String,
    liveness: Liveness,
    signals: SignalValues,
}

/// Periodically print the last values and liveness of watched messages
pub fn monitor(
    config: &DeviceConfig,
    messages: &[String],
    interval_ms: u64,
    count: Option<usize>,
    json: bool,
) -> Result<()> {
    let device = open_device(config)?;

    let watched: Vec<String> = if messages.is_empty() {
        device.database().messages().map(|m| m.name.clone()).collect()
    } else {
        for name in messages {
            if device.database().message_by_name(name).is_none() {
                bail!("Unknown message '{}'", name);
            }
        }
        messages.to_vec()
    };

    let mut ticks = 0usize;
    loop {
        thread::sleep(Duration::from_millis(interval_ms));

        let statuses: Vec<MessageStatus> = watched
            .iter()
            .map(|name| MessageStatus {
                message: name.clone(),
                liveness: device.is_alive_default(name),
                signals: device
                    .get_message(name)
                    .map(|observation| observation.snapshot.to_values())
                    .unwrap_or_default(),
            })
            .collect();

        if json {
            println!("{}", serde_json::to_string(&statuses)?);
        } else {
            for status in &statuses {
                println!("{:<24} {}", status.message, status.liveness);
                let mut names: Vec<_> = status.signals.keys().collect();
                names.sort();
                for name in names {
                    println!("    {:<24} {}", name, status.signals[name]);
                }
            }
            println!();
        }

        ticks += 1;
        if count.is_some_and(|count| ticks >= count) {
            break;
        }
    }

    let stats = device.stats();
    log::info!(
        "Frames: {} received, {} recorded, {} ignored",
        stats.frames_received,
        stats.frames_recorded,
        stats.frames_ignored
    );
    Ok(())
}

/// Encode and send one frame
pub fn send(config: &DeviceConfig, message: &str, assignments: &[String], json: bool) -> Result<()> {
    let overrides = parse_assignments(assignments)?;
    let device = open_device(config)?;

    let report = device
        .send_signals(message, &overrides)
        .with_context(|| format!("Failed to send '{}'", message))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let payload: Vec<String> = report.data.iter().map(|b| format!("{:02X}", b)).collect();
        println!("✓ Sent {} (0x{:X}): {}", report.message, report.frame_id, payload.join(" "));
        let mut names: Vec<_> = report.signals.keys().collect();
        names.sort();
        for name in names {
            println!("    {:<24} {}", name, report.signals[name]);
        }
    }

    Ok(())
}

/// Listen for a while, then report liveness of one message
pub fn alive(
    config: &DeviceConfig,
    message: &str,
    timeout: Option<f64>,
    wait_ms: u64,
    json: bool,
) -> Result<Liveness> {
    let device = open_device(config)?;
    if device.database().message_by_name(message).is_none() {
        bail!("Unknown message '{}'", message);
    }

    thread::sleep(Duration::from_millis(wait_ms));

    let timeout = timeout.unwrap_or(config.liveness_timeout);
    let liveness = device.is_alive(message, timeout);

    if json {
        println!(
            "{}",
            serde_json::json!({ "message": message, "timeout": timeout, "liveness": liveness })
        );
    } else {
        println!("{}: {}", message, liveness);
    }

    Ok(liveness)
}

fn open_device(config: &DeviceConfig) -> Result<Device> {
    Device::open(config).with_context(|| {
        format!(
            "Failed to open device ({:?} on {} bus '{}')",
            config.database, config.bus.kind, config.bus.channel
        )
    })
}

/// Parse `NAME=VALUE` pairs given with `--signal`
pub fn parse_assignments(assignments: &[String]) -> Result<SignalValues> {
    let mut values = SignalValues::new();
    for assignment in assignments {
        let Some((name, value)) = assignment.split_once('=') else {
            bail!("Expected NAME=VALUE, got '{}'", assignment);
        };
        let name = name.trim();
        if name.is_empty() {
            bail!("Missing signal name in '{}'", assignment);
        }
        let value = SignalValue::parse(value)
            .with_context(|| format!("Invalid value for signal '{}': '{}'", name, value))?;
        values.insert(name.to_string(), value);
    }
    Ok(values)
}

/// Parse a decimal or `0x`-prefixed hexadecimal number
pub fn parse_u32(text: &str) -> Result<u32, String> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse::<u32>(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", text, e))
}
