//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{GroundStationError, Result};
use crate::protocol::frame::MAX_LINKS;

/// Baud rates accepted for a link
pub const SUPPORTED_BAUD_RATES: &[u32] = &[9600, 57600, 115200, 230400, 460800, 921600];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub links: Vec<LinkConfig>,

    #[serde(default)]
    pub station: StationConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial link configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// Station timing and queue configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StationConfig {
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,
}

/// History buffer capacities
#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_rssi_capacity")]
    pub rssi_capacity: usize,

    #[serde(default = "default_position_capacity")]
    pub position_capacity: usize,

    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

/// File output configuration
#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_image_dir")]
    pub image_dir: String,

    #[serde(default = "default_image_extension")]
    pub image_extension: String,

    #[serde(default = "default_log_file")]
    pub log_file: String,

    #[serde(default)]
    pub history_file: String,
}

/// Diagnostic logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 115200 }

fn default_read_timeout_ms() -> u64 { 1000 }
fn default_reconnect_interval_ms() -> u64 { 2000 }
fn default_poll_interval_ms() -> u64 { 1000 }
fn default_command_queue_capacity() -> usize { 256 }

fn default_rssi_capacity() -> usize { 100 }
fn default_position_capacity() -> usize { 500 }
fn default_log_capacity() -> usize { 500 }

fn default_image_dir() -> String { ".".to_string() }
fn default_image_extension() -> String { "webp".to_string() }
fn default_log_file() -> String { "log.txt".to_string() }

fn default_log_level() -> String { "info".to_string() }
fn default_log_dir() -> String { "./logs".to_string() }

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
        }
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: default_read_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            command_queue_capacity: default_command_queue_capacity(),
        }
    }
}

impl StationConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            rssi_capacity: default_rssi_capacity(),
            position_capacity: default_position_capacity(),
            log_capacity: default_log_capacity(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            image_dir: default_image_dir(),
            image_extension: default_image_extension(),
            log_file: default_log_file(),
            history_file: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: default_log_dir(),
        }
    }
}

impl Default for Config {
    /// Single link on the default port with default settings
    fn default() -> Self {
        Self {
            links: vec![LinkConfig::default()],
            station: StationConfig::default(),
            history: HistoryConfig::default(),
            output: OutputConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn invalid(message: impl std::fmt::Display) -> GroundStationError {
    GroundStationError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use balloon_ground::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // One decoding core serves one or two links
        if self.links.is_empty() || self.links.len() > MAX_LINKS {
            return Err(invalid(format!(
                "between 1 and {} links must be configured, got {}",
                MAX_LINKS,
                self.links.len()
            )));
        }

        for (index, link) in self.links.iter().enumerate() {
            if link.port.is_empty() {
                return Err(invalid(format!("links[{}]: serial port cannot be empty", index)));
            }

            if !SUPPORTED_BAUD_RATES.contains(&link.baud_rate) {
                return Err(invalid(format!(
                    "links[{}]: baud_rate must be one of: {:?}",
                    index, SUPPORTED_BAUD_RATES
                )));
            }
        }

        if self.links.len() == MAX_LINKS && self.links[0].port == self.links[1].port {
            return Err(invalid("both links cannot use the same serial port"));
        }

        // Validate timing fields
        if self.station.read_timeout_ms == 0 || self.station.read_timeout_ms > 10000 {
            return Err(invalid("read_timeout_ms must be between 1 and 10000"));
        }

        if self.station.reconnect_interval_ms == 0 || self.station.reconnect_interval_ms > 60000 {
            return Err(invalid("reconnect_interval_ms must be between 1 and 60000"));
        }

        if self.station.poll_interval_ms == 0 || self.station.poll_interval_ms > 60000 {
            return Err(invalid("poll_interval_ms must be between 1 and 60000"));
        }

        if self.station.command_queue_capacity == 0 || self.station.command_queue_capacity > 65536 {
            return Err(invalid("command_queue_capacity must be between 1 and 65536"));
        }

        // Validate history capacities
        for (name, value) in [
            ("rssi_capacity", self.history.rssi_capacity),
            ("position_capacity", self.history.position_capacity),
            ("log_capacity", self.history.log_capacity),
        ] {
            if value == 0 || value > 10000 {
                return Err(invalid(format!("{} must be between 1 and 10000", name)));
            }
        }

        // Validate output
        if self.output.image_dir.is_empty() {
            return Err(invalid("image_dir cannot be empty"));
        }

        if self.output.image_extension.is_empty()
            || !self.output.image_extension.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(invalid("image_extension must be a non-empty alphanumeric extension"));
        }

        // Validate log level
        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(invalid("log level must be one of: trace, debug, info, warn, error"));
        }

        Ok(())
    }
}
