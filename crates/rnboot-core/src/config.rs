//! Session configuration.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::protocol::{
    APP_FLASH_END, APP_FLASH_START, CONFIG_ROW_ADDRESS, DEFAULT_BAUD_RATE, RESET_WAIT_MS,
    TEXT_TIMEOUT_MS,
};

/// Configuration for an update session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// First byte of the erase range.
    pub erase_start: u32,
    /// End of the erase range (exclusive).
    pub erase_end: u32,
    /// Address whose records are verified with the configuration checksum.
    pub config_row_address: u32,
    /// Bootloader response timeout in milliseconds. Unset or 0 waits forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_timeout_ms: Option<u64>,
    /// Timeout for text-mode replies from the firmware. 0 waits forever.
    pub handshake_timeout_ms: u64,
    /// Pause around firmware/bootloader resets.
    pub reset_wait_ms: u64,
    /// Reject responses whose echoed header does not match the request.
    pub verify_echo: bool,
    /// Serial baud rate.
    pub baud_rate: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            erase_start: APP_FLASH_START,
            erase_end: APP_FLASH_END,
            config_row_address: CONFIG_ROW_ADDRESS,
            response_timeout_ms: None,
            handshake_timeout_ms: TEXT_TIMEOUT_MS,
            reset_wait_ms: RESET_WAIT_MS,
            verify_echo: true,
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Bootloader response timeout. Unset or zero waits indefinitely.
    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Text-mode reply timeout. Zero waits indefinitely.
    pub fn handshake_timeout(&self) -> Option<Duration> {
        Some(self.handshake_timeout_ms)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn reset_wait(&self) -> Duration {
        Duration::from_millis(self.reset_wait_ms)
    }

    /// Whether `address` lies in the erased range or is the configuration row.
    pub fn covers(&self, address: u32) -> bool {
        (self.erase_start..self.erase_end).contains(&address) || address == self.config_row_address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.erase_start, 0x300);
        assert_eq!(config.erase_end, 0x10000);
        assert_eq!(config.baud_rate, 57600);
        assert_eq!(config.response_timeout(), None);
        assert_eq!(config.handshake_timeout(), Some(Duration::from_millis(1000)));
        assert!(config.verify_echo);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: SessionConfig =
            toml::from_str("baud_rate = 115200\nresponse_timeout_ms = 2000\n").unwrap();
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.response_timeout(), Some(Duration::from_millis(2000)));
        assert_eq!(config.erase_start, 0x300);
    }

    #[test]
    fn test_zero_timeouts_wait_indefinitely() {
        let config = SessionConfig {
            response_timeout_ms: Some(0),
            handshake_timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.response_timeout(), None);
        assert_eq!(config.handshake_timeout(), None);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("rnboot-config-{}.toml", std::process::id()));
        let config = SessionConfig {
            verify_echo: false,
            reset_wait_ms: 750,
            ..Default::default()
        };
        config.save_to_file(&path).unwrap();
        let loaded = SessionConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_covers() {
        let config = SessionConfig::default();
        assert!(config.covers(0x300));
        assert!(config.covers(0xFFFF));
        assert!(!config.covers(0x10000));
        assert!(!config.covers(0x200));
        assert!(config.covers(0x30_0000));
    }
}
