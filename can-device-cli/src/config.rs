//! Configuration loading for the CLI
//!
//! A device is described by an optional TOML file holding a
//! [`DeviceConfig`], with command line flags layered on top.

use anyhow::{bail, Context, Result};
use can_device::{BusKind, DeviceConfig};
use std::fs;
use std::path::{Path, PathBuf};

/// Settings given on the command line; `None` keeps the file/default value
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub database: Option<PathBuf>,
    pub bus: Option<BusKind>,
    pub channel: Option<String>,
    pub bitrate: Option<u32>,
    pub strict: bool,
    pub frame_id_mask: Option<u32>,
    pub encoding: Option<String>,
    pub liveness_timeout: Option<f64>,
}

/// Load a device configuration from a TOML file
pub fn load_config(path: &Path) -> Result<DeviceConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: DeviceConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    // Database paths are relative to the config file
    if config.database.is_relative() && !config.database.as_os_str().is_empty() {
        if let Some(dir) = path.parent() {
            config.database = dir.join(&config.database);
        }
    }

    Ok(config)
}

/// Build the effective configuration from an optional file plus flags
pub fn resolve(config_path: Option<&Path>, overrides: &Overrides) -> Result<DeviceConfig> {
    let mut config = match config_path {
        Some(path) => load_config(path)?,
        None => DeviceConfig::default(),
    };

    if let Some(database) = &overrides.database {
        config.database = database.clone();
    }
    if let Some(kind) = overrides.bus {
        config.bus.kind = kind;
    }
    if let Some(channel) = &overrides.channel {
        config.bus.channel = channel.clone();
    }
    if let Some(bitrate) = overrides.bitrate {
        config.bus.bitrate = Some(bitrate);
    }
    if overrides.strict {
        config.schema.strict = true;
    }
    if let Some(mask) = overrides.frame_id_mask {
        config.schema.frame_id_mask = Some(mask);
    }
    if let Some(encoding) = &overrides.encoding {
        config.schema.encoding = encoding.clone();
    }
    if let Some(timeout) = overrides.liveness_timeout {
        config.liveness_timeout = timeout;
    }

    if config.database.as_os_str().is_empty() {
        bail!("No signal database given (use --dbc or set `database` in the config file)");
    }
    if config.liveness_timeout <= 0.0 {
        bail!("Liveness timeout must be positive, got {}", config.liveness_timeout);
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut temp_file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        temp_file.flush().unwrap();
        temp_file
    }

    #[test]
    fn test_config_deserialization() {
        let temp_file = write_config(
            r#"
            database = "/data/body.dbc"
            liveness_timeout = 3.0

            [schema]
            encoding = "utf-8"
            frame_id_mask = 536870911
            strict = true

            [bus]
            kind = "socketcan"
            channel = "can1"
            bitrate = 500000
        "#,
        );

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.database, PathBuf::from("/data/body.dbc"));
        assert_eq!(config.liveness_timeout, 3.0);
        assert_eq!(config.schema.encoding, "utf-8");
        assert_eq!(config.schema.frame_id_mask, Some(0x1FFF_FFFF));
        assert!(config.schema.strict);
        assert_eq!(config.bus.kind, BusKind::SocketCan);
        assert_eq!(config.bus.channel, "can1");
        assert_eq!(config.bus.bitrate, Some(500_000));
    }

    #[test]
    fn test_defaults_for_missing_sections() {
        let temp_file = write_config(r#"database = "body.dbc""#);

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.schema.encoding, "cp1252");
        assert!(!config.schema.strict);
        assert_eq!(config.bus.kind, BusKind::Virtual);
        assert_eq!(config.bus.channel, "vcan0");
        assert_eq!(config.liveness_timeout, 5.0);

        // Relative database path resolved next to the config file
        let dir = temp_file.path().parent().unwrap();
        assert_eq!(config.database, dir.join("body.dbc"));
    }

    #[test]
    fn test_flags_override_file() {
        let temp_file = write_config(
            r#"
            database = "/data/body.dbc"
            [bus]
            channel = "vcan3"
        "#,
        );

        let overrides = Overrides {
            channel: Some("vcan7".to_string()),
            strict: true,
            liveness_timeout: Some(2.0),
            ..Default::default()
        };
        let config = resolve(Some(temp_file.path()), &overrides).unwrap();
        assert_eq!(config.database, PathBuf::from("/data/body.dbc"));
        assert_eq!(config.bus.channel, "vcan7");
        assert!(config.schema.strict);
        assert_eq!(config.liveness_timeout, 2.0);
    }

    #[test]
    fn test_database_required() {
        assert!(resolve(None, &Overrides::default()).is_err());

        let overrides = Overrides {
            database: Some(PathBuf::from("body.dbc")),
            ..Default::default()
        };
        let config = resolve(None, &overrides).unwrap();
        assert_eq!(config.database, PathBuf::from("body.dbc"));
    }

    #[test]
    fn test_invalid_toml() {
        let temp_file = write_config("database = ");
        assert!(load_config(temp_file.path()).is_err());
    }
}
