// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving the demo's settings.

use anyhow::{bail, Context, Result};
use gethostname::gethostname;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::bluetooth::constants::{
    default_service_uuid, DEFAULT_DISCOVERABLE, DEFAULT_READ_BUFFER_SIZE, DEFAULT_RFCOMM_CHANNEL,
    DEFAULT_SCAN_DURATION, MAX_DISCOVERABLE,
};
use crate::bluetooth::SessionOptions;

const APP_DIR: &str = "bluelink";

/// Get a sanitized hostname suitable for Bluetooth device name.
/// Bluetooth names should only contain alphanumeric chars, spaces, and hyphens.
fn get_sanitized_hostname() -> String {
    sanitize_name(&gethostname().to_string_lossy())
}

fn sanitize_name(raw: &str) -> String {
    let sanitized: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == ' ' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = sanitized.trim_matches('-');
    if trimmed.is_empty() {
        "Bluelink".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bluetooth: BluetoothConfig,
    pub discovery: DiscoveryConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Adapter to use, e.g. "hci0". The default adapter when unset.
    pub adapter: Option<String>,

    /// Authenticate and encrypt links.
    pub secure: bool,

    /// Service UUID. Defaults to the UUID matching `secure`.
    pub service_uuid: Option<Uuid>,

    /// Name published with the service record.
    pub service_name: String,

    /// RFCOMM channel used by the channel-based commands.
    pub rfcomm_channel: u8,

    /// How long `discoverable` keeps the adapter visible.
    pub discoverable_timeout_secs: u64,

    /// Name advertised to remote devices.
    /// This is always computed at runtime from the system hostname.
    #[serde(skip)]
    pub alias: String,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            adapter: None,
            secure: true,
            service_uuid: None,
            service_name: "Bluelink".to_string(),
            rfcomm_channel: DEFAULT_RFCOMM_CHANNEL,
            discoverable_timeout_secs: DEFAULT_DISCOVERABLE.as_secs(),
            alias: get_sanitized_hostname(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Length of one scan in seconds.
    pub scan_duration_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            scan_duration_secs: DEFAULT_SCAN_DURATION.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Largest chunk delivered by one read.
    pub read_buffer_size: usize,

    /// Accept timeout in milliseconds. 0 waits forever.
    pub accept_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            accept_timeout_ms: 0,
        }
    }
}

impl Config {
    /// Default location: `<config_dir>/bluelink/config.toml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from `path`, writing the defaults there when the
    /// file does not exist yet.
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            let config = Self::default();
            config.save(path)?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the library would refuse later.
    pub fn validate(&self) -> Result<()> {
        let secs = self.bluetooth.discoverable_timeout_secs;
        if secs == 0 || secs > MAX_DISCOVERABLE.as_secs() {
            bail!(
                "discoverable_timeout_secs must be 1 to {}, got {}",
                MAX_DISCOVERABLE.as_secs(),
                secs
            );
        }
        if !(1..=30).contains(&self.bluetooth.rfcomm_channel) {
            bail!(
                "rfcomm_channel must be 1 to 30, got {}",
                self.bluetooth.rfcomm_channel
            );
        }
        if self.discovery.scan_duration_secs == 0 {
            bail!("scan_duration_secs must be positive");
        }
        if self.session.read_buffer_size == 0 {
            bail!("read_buffer_size must be positive");
        }
        Ok(())
    }

    /// The configured service UUID, or the default for the security mode.
    pub fn service_uuid(&self) -> Uuid {
        self.bluetooth
            .service_uuid
            .unwrap_or_else(|| default_service_uuid(self.bluetooth.secure))
    }

    pub fn discoverable_timeout(&self) -> Duration {
        Duration::from_secs(self.bluetooth.discoverable_timeout_secs)
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.discovery.scan_duration_secs)
    }

    pub fn accept_timeout(&self) -> Option<Duration> {
        match self.session.accept_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// RFCOMM channel for the fixed-channel commands: the one asked for, or
    /// the configured one.
    pub fn rfcomm_channel(&self, requested: Option<u8>) -> u8 {
        requested.unwrap_or(self.bluetooth.rfcomm_channel)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            read_buffer_size: self.session.read_buffer_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::constants::{SERVICE_UUID_INSECURE, SERVICE_UUID_SECURE};
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("my-laptop"), "my-laptop");
        assert_eq!(sanitize_name("host.local"), "host-local");
        assert_eq!(sanitize_name("..."), "Bluelink");
        assert_eq!(sanitize_name("_box_"), "box");
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert!(config.bluetooth.secure);
        assert_eq!(config.scan_duration(), DEFAULT_SCAN_DURATION);
        assert_eq!(config.accept_timeout(), None);
        assert!(!config.bluetooth.alias.is_empty());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[bluetooth]\nsecure = false\n\n[session]\naccept_timeout_ms = 1000\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert!(!config.bluetooth.secure);
        assert_eq!(config.service_uuid(), SERVICE_UUID_INSECURE);
        assert_eq!(config.accept_timeout(), Some(Duration::from_millis(1000)));
        assert_eq!(config.session.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
    }

    #[test]
    fn test_save_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.bluetooth.adapter = Some("hci1".to_string());
        config.bluetooth.rfcomm_channel = 5;
        config.save(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.bluetooth.adapter.as_deref(), Some("hci1"));
        assert_eq!(loaded.bluetooth.rfcomm_channel, 5);
        assert_eq!(loaded.service_uuid(), SERVICE_UUID_SECURE);
    }

    #[test]
    fn test_rfcomm_channel_falls_back_to_config() {
        let mut config = Config::default();
        assert_eq!(config.rfcomm_channel(None), DEFAULT_RFCOMM_CHANNEL);

        config.bluetooth.rfcomm_channel = 7;
        assert_eq!(config.rfcomm_channel(None), 7);
        assert_eq!(config.rfcomm_channel(Some(3)), 3);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut config = Config::default();
        config.bluetooth.discoverable_timeout_secs = 301;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.bluetooth.rfcomm_channel = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.session.read_buffer_size = 0;
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[discovery]\nscan_duration_secs = 0\n").unwrap();

        assert!(Config::load_from(&path).is_err());
    }
}
