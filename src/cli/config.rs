//! Command-line interface configuration
//!
//! Settings are read from `flash-station.toml`, looked up first in the
//! working directory and then in the user's configuration directory. Every
//! key is optional; command-line flags override what the file says.
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud = 115200
//! high_baud = 230400
//!
//! [strap]
//! mode = "gpio"
//! chip = "/dev/gpiochip0"
//! reset = 17
//! boot = 27
//!
//! [storage]
//! root = "/mnt/sdcard"
//!
//! [log]
//! capacity = 1024
//! ```

use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
    time::Duration,
};

use directories::ProjectDirs;
use log::debug;
use miette::{IntoDiagnostic, Result, WrapErr};
use serde::{Deserialize, Serialize};

use crate::{
    engine::ConnectArgs,
    flasher::{StationSettings, DEFAULT_BAUD, DEFAULT_HIGH_BAUD},
    status::{StatusBoard, DEFAULT_LOG_CAPACITY},
};

const CONFIG_FILE: &str = "flash-station.toml";

/// How the target's reset and boot pins are driven
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum StrapMode {
    /// Through the serial adapter's RTS (reset) and DTR (boot) lines
    #[default]
    Modem,
    /// Through Linux GPIO lines
    Gpio,
}

/// Serial connection settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial port connected to the target
    pub port: Option<String>,
    /// Initial baud rate, restored after every job
    pub baud: u32,
    /// Baud rate negotiated after connecting, `0` to keep the initial one
    pub high_baud: u32,
    /// Time to wait for each bootloader sync reply
    pub timeout_ms: u64,
    /// Number of sync attempts
    pub trials: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        let connect = ConnectArgs::default();

        Self {
            port: None,
            baud: DEFAULT_BAUD,
            high_baud: DEFAULT_HIGH_BAUD,
            timeout_ms: connect.sync_timeout.as_millis() as u64,
            trials: connect.trials,
        }
    }
}

/// Strap line settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StrapConfig {
    pub mode: StrapMode,
    /// GPIO character device, for the `gpio` mode
    pub chip: String,
    /// GPIO line offset wired to the target's reset (EN) pin
    pub reset: u32,
    /// GPIO line offset wired to the target's boot (IO0) pin
    pub boot: u32,
    /// Time each step of a strap sequence is held
    pub hold_ms: u64,
}

impl Default for StrapConfig {
    fn default() -> Self {
        Self {
            mode: StrapMode::default(),
            chip: "/dev/gpiochip0".into(),
            reset: 4,
            boot: 5,
            hold_ms: 50,
        }
    }
}

impl StrapConfig {
    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the images
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("images"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Number of status messages kept for readers
    pub capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

/// Configuration for the station
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub strap: StrapConfig,
    pub storage: StorageConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from the first configuration file found, falling
    /// back to defaults when there is none
    pub fn load() -> Result<Self> {
        match Self::find_config_path() {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = read_to_string(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
        let config = Self::parse(&raw)
            .wrap_err_with(|| format!("Failed to parse {}", path.display()))?;

        debug!("Config from {}: {config:#?}", path.display());

        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        toml::from_str(raw).into_diagnostic()
    }

    /// Worker settings derived from the configuration
    pub fn station_settings(&self) -> StationSettings {
        StationSettings {
            high_baud: (self.serial.high_baud != 0).then_some(self.serial.high_baud),
            connect: ConnectArgs {
                sync_timeout: Duration::from_millis(self.serial.timeout_ms),
                trials: self.serial.trials,
            },
        }
    }

    /// A status board sized for the configured log retention
    pub fn status_board(&self) -> StatusBoard {
        StatusBoard::new(self.log.capacity)
    }

    fn find_config_path() -> Option<PathBuf> {
        if let Ok(cwd) = std::env::current_dir() {
            let local_config = cwd.join(CONFIG_FILE);
            if local_config.exists() {
                return Some(local_config);
            }
        }

        let global_config = ProjectDirs::from("rs", "flash-station", "flash-station")?
            .config_dir()
            .join(CONFIG_FILE);

        global_config.exists().then_some(global_config)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.serial.baud, 115_200);
        assert_eq!(config.station_settings(), StationSettings::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [serial]
            port = "/dev/ttyAMA0"
            high_baud = 0

            [strap]
            mode = "gpio"
            reset = 17
            boot = 27
            "#,
        )
        .unwrap();

        assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyAMA0"));
        assert_eq!(config.serial.baud, DEFAULT_BAUD);
        assert_eq!(config.strap.mode, StrapMode::Gpio);
        assert_eq!(config.strap.chip, "/dev/gpiochip0");
        assert_eq!(config.strap.hold(), Duration::from_millis(50));
        assert_eq!(config.storage.root, PathBuf::from("images"));
        assert_eq!(config.station_settings().high_baud, None);
    }

    #[test]
    fn unknown_strap_mode_is_rejected() {
        assert!(Config::parse("[strap]\nmode = \"magic\"").is_err());
    }

    #[test]
    fn load_from_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[log]\ncapacity = 16\n[storage]\nroot = \"/sd\"").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.log.capacity, 16);
        assert_eq!(config.status_board().logs_since(0).next_cursor, 0);
        assert_eq!(config.storage.root, PathBuf::from("/sd"));

        assert!(Config::load_from(&dir.path().join("missing.toml")).is_err());
    }
}
