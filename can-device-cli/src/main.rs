//! CAN Device CLI Application
//!
//! Command-line front-end for the can-device library:
//! - Inspect a DBC signal database
//! - Monitor received messages and their liveness
//! - Send signal updates as encoded frames
//! - Check whether a message is alive on the bus

use anyhow::Result;
use can_device::{BusKind, DeviceConfig, Liveness};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;

/// CAN Device - act as a DBC-described device on a CAN bus
#[derive(Parser, Debug)]
#[command(name = "can-device-cli")]
#[command(about = "Receive, decode and send CAN signals described by a DBC file", long_about = None)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (device.toml)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Path to the DBC signal database
    #[arg(long, value_name = "FILE", global = true)]
    dbc: Option<PathBuf>,

    /// Bus kind: socketcan, or virtual (default; in-process only, so a
    /// standalone run has no peers to send to or hear from)
    #[arg(long, value_name = "KIND", global = true)]
    bus: Option<BusKind>,

    /// Bus channel / interface name
    #[arg(long, value_name = "NAME", global = true)]
    channel: Option<String>,

    /// Bit rate to apply to the interface
    #[arg(long, value_name = "BPS", global = true)]
    bitrate: Option<u32>,

    /// Drop received frames shorter than their declared size
    #[arg(long, global = true)]
    strict: bool,

    /// Mask applied to frame ids before lookup (decimal or 0x-hex)
    #[arg(long, value_name = "MASK", value_parser = commands::parse_u32, global = true)]
    frame_id_mask: Option<u32>,

    /// Text encoding of the DBC file (cp1252, utf-8, ...)
    #[arg(long, value_name = "ENCODING", global = true)]
    encoding: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the messages and signals of the database
    List,

    /// Print last received values and liveness of messages
    Monitor {
        /// Message to watch (can be repeated; default: all)
        #[arg(short, long, value_name = "NAME")]
        message: Vec<String>,

        /// Time between two printouts
        #[arg(long, value_name = "MS", default_value_t = 1000)]
        interval_ms: u64,

        /// Stop after this many printouts
        #[arg(long, value_name = "N")]
        count: Option<usize>,

        /// Liveness timeout (cycle-time multiplier, or seconds if aperiodic)
        #[arg(long, value_name = "T")]
        timeout: Option<f64>,
    },

    /// Send one frame of a message
    Send {
        /// Message to send
        #[arg(short, long, value_name = "NAME")]
        message: String,

        /// Signal value as NAME=VALUE (can be repeated)
        #[arg(short, long, value_name = "NAME=VALUE")]
        signal: Vec<String>,
    },

    /// Listen for a while and report whether a message is alive
    Alive {
        /// Message to check
        #[arg(short, long, value_name = "NAME")]
        message: String,

        /// Liveness timeout (cycle-time multiplier, or seconds if aperiodic)
        #[arg(long, value_name = "T")]
        timeout: Option<f64>,

        /// How long to listen before evaluating
        #[arg(long, value_name = "MS", default_value_t = 1000)]
        wait_ms: u64,
    },
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("CAN Device CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using device library v{}", can_device::VERSION);

    let liveness_timeout = match &args.command {
        Command::Monitor { timeout, .. } | Command::Alive { timeout, .. } => *timeout,
        _ => None,
    };

    let overrides = config::Overrides {
        database: args.dbc.clone(),
        bus: args.bus,
        channel: args.channel.clone(),
        bitrate: args.bitrate,
        strict: args.strict,
        frame_id_mask: args.frame_id_mask,
        encoding: args.encoding.clone(),
        liveness_timeout,
    };
    let device_config = config::resolve(args.config.as_deref(), &overrides)?;
    log::debug!("Effective configuration: {:?}", device_config);

    if lacks_peers(&args.command, &device_config) {
        log::warn!(
            "Using the in-process virtual bus '{}': nothing outside this process \
             will see sent frames or deliver received ones (use --bus socketcan)",
            device_config.bus.channel
        );
    }

    match &args.command {
        Command::List => commands::list(&device_config, args.json)?,
        Command::Monitor {
            message,
            interval_ms,
            count,
            ..
        } => commands::monitor(&device_config, message, *interval_ms, *count, args.json)?,
        Command::Send { message, signal } => {
            commands::send(&device_config, message, signal, args.json)?
        }
        Command::Alive {
            message,
            timeout,
            wait_ms,
        } => {
            let liveness =
                commands::alive(&device_config, message, *timeout, *wait_ms, args.json)?;
            if liveness != Liveness::Alive {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// True when a bus command would run on the in-process virtual bus
fn lacks_peers(command: &Command, config: &DeviceConfig) -> bool {
    !matches!(command, Command::List) && config.bus.kind == BusKind::Virtual
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
