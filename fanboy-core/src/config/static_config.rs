//! Static configuration loaded once at startup
//!
//! This configuration is read-only after the daemon starts. Every section
//! and key has a default, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{FanboyError, Result};

/// Serial line parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Serial link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path, optionally ending in a wildcard segment (e.g. `/dev/ttyACM*`)
    pub device: String,
    /// Line speed
    pub baud_rate: u32,
    /// Data bits per character (5-8)
    pub data_bits: u8,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    /// Parity mode
    pub parity: Parity,
    /// Read deadline for one response frame, in milliseconds
    pub timeout_ms: u64,
    /// Log every frame sent and received
    pub debug_uart: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyACM*".to_string(),
            baud_rate: 4800,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            timeout_ms: 100,
            debug_uart: false,
        }
    }
}

impl SerialConfig {
    /// Per-frame read deadline
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Driver behaviour configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Number of fan outputs; channels are numbered 1..=channel_count
    pub channel_count: u8,
    /// Poller tick interval in milliseconds
    pub poll_interval_ms: u64,
    /// A poll starting sooner than this after the previous one is skipped
    pub min_poll_interval_ms: u64,
    /// Speed applied to every channel after the first successful sync
    pub initial_speed: u8,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            channel_count: 6,
            poll_interval_ms: 1000,
            min_poll_interval_ms: 900,
            initial_speed: 0,
        }
    }
}

impl DriverConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn min_poll_interval(&self) -> Duration {
        Duration::from_millis(self.min_poll_interval_ms)
    }
}

/// Retry and reconnect policy for the link session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts to open the port before giving up
    pub connect_attempts: u32,
    /// Wait between failed open attempts, in seconds
    pub connect_backoff_secs: u64,
    /// Read deadline for the sync acknowledgement, in milliseconds
    pub sync_timeout_ms: u64,
    /// Pause between sync attempts, in milliseconds
    pub sync_retry_delay_ms: u64,
    /// Consecutive sync timeouts after which the port is closed and reopened
    pub sync_failure_threshold: u32,
    /// Total sync attempts in one resync before it fails
    pub max_sync_attempts: u32,
    /// Reads used to discard stale bytes after a successful sync
    pub drain_attempts: u32,
    /// Deadline for each drain read, in milliseconds
    pub drain_timeout_ms: u64,
    /// Attempts per command on I/O or timeout failure
    pub command_attempts: u32,
    /// Pause between command attempts, in milliseconds
    pub command_retry_delay_ms: u64,
    /// Header mismatches tolerated per command before it fails
    pub max_desync_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 5,
            connect_backoff_secs: 5,
            sync_timeout_ms: 100,
            sync_retry_delay_ms: 50,
            sync_failure_threshold: 10,
            max_sync_attempts: 100,
            drain_attempts: 8,
            drain_timeout_ms: 20,
            command_attempts: 3,
            command_retry_delay_ms: 50,
            max_desync_retries: 10,
        }
    }
}

impl RetryConfig {
    pub fn connect_backoff(&self) -> Duration {
        Duration::from_secs(self.connect_backoff_secs)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn sync_retry_delay(&self) -> Duration {
        Duration::from_millis(self.sync_retry_delay_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn command_retry_delay(&self) -> Duration {
        Duration::from_millis(self.command_retry_delay_ms)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub bind: String,
    /// Server port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 80,
        }
    }
}

/// Hardware watchdog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Whether the keep-alive task runs at all
    pub enabled: bool,
    /// Watchdog device node
    pub device: String,
    /// Keep-alive interval in seconds
    pub interval_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: "/dev/watchdog0".to_string(),
            interval_secs: 5,
        }
    }
}

impl WatchdogConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Static configuration for the fanboy daemon.
///
/// Located at `~/.config/fanboy/config.toml` by default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticConfig {
    pub serial: SerialConfig,
    pub driver: DriverConfig,
    pub retry: RetryConfig,
    pub server: ServerConfig,
    pub watchdog: WatchdogConfig,
}

impl StaticConfig {
    /// Parse StaticConfig from TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Serialize StaticConfig to TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| FanboyError::Serialization(e.to_string()))
    }

    /// Reject values the driver cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.driver.channel_count == 0 {
            return Err(FanboyError::Config(
                "driver.channel_count must be at least 1".to_string(),
            ));
        }
        if !(5..=8).contains(&self.serial.data_bits) {
            return Err(FanboyError::Config(format!(
                "serial.data_bits must be 5-8, got {}",
                self.serial.data_bits
            )));
        }
        if !matches!(self.serial.stop_bits, 1 | 2) {
            return Err(FanboyError::Config(format!(
                "serial.stop_bits must be 1 or 2, got {}",
                self.serial.stop_bits
            )));
        }
        if self.driver.initial_speed > crate::MAX_SPEED_PERCENT {
            return Err(FanboyError::Config(format!(
                "driver.initial_speed must be 0-100, got {}",
                self.driver.initial_speed
            )));
        }

        let retry = &self.retry;
        for (name, value) in [
            ("retry.connect_attempts", retry.connect_attempts),
            ("retry.sync_failure_threshold", retry.sync_failure_threshold),
            ("retry.max_sync_attempts", retry.max_sync_attempts),
            ("retry.command_attempts", retry.command_attempts),
        ] {
            if value == 0 {
                return Err(FanboyError::Config(format!("{} must be at least 1", name)));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_static_config() {
        let config = StaticConfig::default();
        assert_eq!(config.serial.device, "/dev/ttyACM*");
        assert_eq!(config.serial.baud_rate, 4800);
        assert_eq!(config.driver.channel_count, 6);
        assert_eq!(config.retry.sync_failure_threshold, 10);
        assert_eq!(config.server.port, 80);
        assert!(config.watchdog.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = StaticConfig::from_toml("").unwrap();
        assert_eq!(config.serial.data_bits, 8);
        assert_eq!(config.retry.command_attempts, 3);
    }

    #[test]
    fn test_static_config_serialization() {
        let toml_str = StaticConfig::default().to_toml().unwrap();

        assert!(toml_str.contains("[serial]"));
        assert!(toml_str.contains("[driver]"));
        assert!(toml_str.contains("[retry]"));
        assert!(toml_str.contains("[watchdog]"));
        assert!(toml_str.contains("parity = \"none\""));
    }

    #[test]
    fn test_static_config_partial_deserialization() {
        let toml_str = r#"
            [serial]
            device = "/dev/ttyUSB0"
            parity = "even"
            stop_bits = 2

            [driver]
            channel_count = 3

            [watchdog]
            enabled = false
        "#;

        let config = StaticConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.serial.device, "/dev/ttyUSB0");
        assert_eq!(config.serial.parity, Parity::Even);
        assert_eq!(config.serial.stop_bits, 2);
        assert_eq!(config.serial.baud_rate, 4800);
        assert_eq!(config.driver.channel_count, 3);
        assert_eq!(config.driver.poll_interval_ms, 1000);
        assert!(!config.watchdog.enabled);
        assert_eq!(config.watchdog.device, "/dev/watchdog0");
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let result = StaticConfig::from_toml("[serial\nbaud_rate = fast");
        assert!(matches!(result, Err(FanboyError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_channels() {
        let mut config = StaticConfig::default();
        config.driver.channel_count = 0;
        assert!(matches!(config.validate(), Err(FanboyError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_framing() {
        let mut config = StaticConfig::default();
        config.serial.data_bits = 9;
        assert!(config.validate().is_err());

        let mut config = StaticConfig::default();
        config.serial.stop_bits = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_retry_counts() {
        let mut config = StaticConfig::default();
        config.retry.sync_failure_threshold = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sync_failure_threshold"));
    }

    #[test]
    fn test_duration_helpers() {
        let config = StaticConfig::default();
        assert_eq!(config.serial.frame_timeout(), Duration::from_millis(100));
        assert_eq!(config.retry.connect_backoff(), Duration::from_secs(5));
        assert_eq!(config.driver.min_poll_interval(), Duration::from_millis(900));
        assert!(config.driver.min_poll_interval() < config.driver.poll_interval());
        assert_eq!(config.watchdog.interval(), Duration::from_secs(5));
    }
}
