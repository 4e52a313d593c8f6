//! Application configuration
//!
//! Everything is persisted as a single TOML document. The `[device]` table is
//! the flat device record (`device.id`, `device.name`, `device.address`,
//! `device.protocol`, `device.credentials`) written after setup.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{DeviceError, Error, Result};
use crate::receiver::{Credentials, ProtocolKind};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Configured receiver, absent until setup ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceConfig>,
    pub audio: AudioConfig,
    pub stream: StreamConfig,
    pub bridge: BridgeConfig,
    pub playback: PlaybackConfig,
    pub library: LibraryConfig,
}

/// Persisted receiver record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub name: String,
    pub address: String,
    pub protocol: ProtocolKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

impl DeviceConfig {
    /// Push devices without credentials cannot be played to
    pub fn is_authenticated(&self) -> bool {
        self.protocol != ProtocolKind::Push || self.credentials.is_some()
    }

    /// Fail fast for an unpaired push device, otherwise return the stored credentials
    pub fn require_credentials(&self) -> Result<Option<&Credentials>> {
        if !self.is_authenticated() {
            return Err(DeviceError::MissingCredentials(self.name.clone()).into());
        }
        Ok(self.credentials.as_ref())
    }
}

/// Capture and encoding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name, default input when absent
    pub input_device: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_millis: u32,
    pub bitrate_kbps: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            frame_millis: DEFAULT_FRAME_MILLIS,
            bitrate_kbps: DEFAULT_BITRATE_KBPS,
        }
    }
}

/// Live distribution server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub bind_address: IpAddr,
    pub base_port: u16,
    pub port_range: u16,
    pub channel_capacity: usize,
    pub read_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            base_port: DEFAULT_STREAM_PORT,
            port_range: DEFAULT_PORT_RANGE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            read_timeout_ms: 1000,
        }
    }
}

impl StreamConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Media bridge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub bind_address: IpAddr,
    pub base_port: u16,
    pub port_range: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            base_port: DEFAULT_BRIDGE_PORT,
            port_range: DEFAULT_PORT_RANGE,
        }
    }
}

/// Receiver control timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub poll_interval_ms: u64,
    pub connect_timeout_secs: u64,
    pub pairing_timeout_secs: u64,
    pub discovery_timeout_secs: u64,
    /// Consecutive failed polls before a transport error becomes fatal
    pub max_poll_errors: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            connect_timeout_secs: 10,
            pairing_timeout_secs: 60,
            discovery_timeout_secs: 5,
            max_poll_errors: 300,
        }
    }
}

impl PlaybackConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_secs(self.pairing_timeout_secs)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }
}

/// Local audio library
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    pub audio_dir: PathBuf,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            audio_dir: PathBuf::from("audio"),
        }
    }
}

impl AppConfig {
    /// Default config file location for this platform
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("net", "lan-audio", "caster")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path`, falling back to defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        tracing::info!("Configuration saved to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.audio.channels, 1 | 2) {
            return Err(Error::Config(format!(
                "audio.channels must be 1 or 2, got {}",
                self.audio.channels
            )));
        }
        if self.audio.sample_rate == 0 || self.audio.frame_millis == 0 {
            return Err(Error::Config(
                "audio.sample_rate and audio.frame_millis must be non-zero".into(),
            ));
        }
        if self.stream.port_range == 0 || self.bridge.port_range == 0 {
            return Err(Error::Config("port_range must be at least 1".into()));
        }
        if self.stream.channel_capacity == 0 {
            return Err(Error::Config("stream.channel_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_record_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.device = Some(DeviceConfig {
            id: "AA:BB:CC".into(),
            name: "Living Room".into(),
            address: "192.168.1.20".into(),
            protocol: ProtocolKind::Push,
            credentials: Some(Credentials::new("secret-blob")),
        });
        config.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("[device]"));
        assert!(text.contains("protocol = \"push\""));

        let loaded = AppConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded.device, config.device);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert!(config.device.is_none());
        assert_eq!(config.stream.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.playback.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_unpaired_push_device_is_rejected() {
        let device = DeviceConfig {
            id: "1".into(),
            name: "Bedroom".into(),
            address: "10.0.0.5".into(),
            protocol: ProtocolKind::Push,
            credentials: None,
        };
        let err = device.require_credentials().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::MissingCredentials);

        let pull = DeviceConfig { protocol: ProtocolKind::Pull, ..device };
        assert!(pull.require_credentials().unwrap().is_none());
    }

    #[test]
    fn test_invalid_channels() {
        let mut config = AppConfig::default();
        config.audio.channels = 6;
        assert!(config.validate().is_err());
    }
}
