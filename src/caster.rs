//! High-level operations over a configured receiver
//!
//! [`Caster`] owns the configuration, the device registry supplied by the
//! embedding application and the broadcast session.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::audio::{AudioFrameSource, FrameSource};
use crate::config::{AppConfig, DeviceConfig};
use crate::error::{DeviceError, Error, NetworkError, Result, SessionError};
use crate::media::{list_audio_files, resolve_audio_file, MediaSource};
use crate::playback::{adapter_for, PlaybackAdapter, PlaybackHandle};
use crate::receiver::{DeviceRegistry, PinEntry, ProtocolKind, UnifiedDeviceHandle};
use crate::session::{BroadcastSession, ReceiverTarget, SessionStatus};

pub struct Caster {
    config: AppConfig,
    config_path: Option<PathBuf>,
    registry: Arc<dyn DeviceRegistry>,
    session: BroadcastSession,
}

impl Caster {
    pub fn new(config: AppConfig, registry: Arc<dyn DeviceRegistry>) -> Self {
        let session = BroadcastSession::new(config.audio.clone(), config.stream.clone());
        Self {
            config,
            config_path: None,
            registry,
            session,
        }
    }

    /// Persist device setup to `path`
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn adapter(&self, protocol: ProtocolKind) -> Arc<dyn PlaybackAdapter> {
        adapter_for(protocol, self.registry.clone(), &self.config)
    }

    /// Scan the network for receivers
    pub async fn discover(&self) -> Result<Vec<UnifiedDeviceHandle>> {
        let scan = self.config.playback.discovery_timeout();
        let bound = scan + self.config.playback.connect_timeout();
        tracing::info!("Scanning for receivers ({:?})", scan);

        let devices = tokio::time::timeout(bound, self.registry.discover(scan))
            .await
            .map_err(|_| NetworkError::Timeout(bound))??;
        tracing::info!("Found {} receiver(s)", devices.len());
        Ok(devices)
    }

    /// Discover and pick the receiver with this id (or display name)
    pub async fn find_device(&self, id: &str) -> Result<UnifiedDeviceHandle> {
        let mut devices = self.discover().await?;
        let index = devices
            .iter()
            .position(|d| d.id == id)
            .or_else(|| devices.iter().position(|d| d.display_name == id));
        match index {
            Some(i) => Ok(devices.swap_remove(i)),
            None => {
                tracing::warn!("Receiver {} not found among {} discovered", id, devices.len());
                Err(DeviceError::NotFound(id.to_string()).into())
            }
        }
    }

    /// Pair when the protocol needs it and store the device record
    pub async fn setup_device(&mut self, device: &UnifiedDeviceHandle, pin: &dyn PinEntry) -> Result<DeviceConfig> {
        let adapter = self.adapter(device.protocol);
        let credentials = if adapter.needs_pairing() {
            adapter.pair(device, pin).await?
        } else {
            None
        };

        let record = DeviceConfig {
            id: device.id.clone(),
            name: device.display_name.clone(),
            address: device.address.clone(),
            protocol: device.protocol,
            credentials,
        };
        self.config.device = Some(record.clone());
        if let Some(path) = &self.config_path {
            self.config.save(path)?;
        }
        tracing::info!("Configured {} ({})", record.name, record.protocol);
        Ok(record)
    }

    /// The configured receiver
    pub fn device(&self) -> Result<&DeviceConfig> {
        self.config
            .device
            .as_ref()
            .ok_or_else(|| Error::Config("no receiver configured; run setup first".into()))
    }

    /// Play a local file on the configured receiver
    pub async fn play_file(&self, path: &Path) -> Result<PlaybackHandle> {
        let record = self.device()?;
        let credentials = record.require_credentials()?.cloned();
        let source = MediaSource::file(path)?;

        let device = self.find_device(&record.id).await?;
        let adapter = self.adapter(device.protocol);
        adapter.play(&device, credentials.as_ref(), source).await
    }

    /// Microphone source for the configured input device
    pub fn microphone(&self) -> Box<dyn FrameSource> {
        Box::new(AudioFrameSource::new(self.config.audio.input_device.clone()))
    }

    /// Start a live broadcast, optionally played on the configured receiver.
    ///
    /// Returns the live stream URL.
    pub async fn start_broadcast(&self, source: Box<dyn FrameSource>, to_receiver: bool) -> Result<String> {
        if self.session.state().is_active() {
            return Err(SessionError::AlreadyActive.into());
        }

        let target = if to_receiver {
            let record = self.device()?;
            let credentials = record.require_credentials()?.cloned();
            let device = self.find_device(&record.id).await?;
            Some(ReceiverTarget {
                adapter: self.adapter(device.protocol),
                device,
                credentials,
            })
        } else {
            None
        };

        self.session.start(source, target).await
    }

    pub async fn stop_broadcast(&self) -> Result<()> {
        self.session.stop().await
    }

    pub fn broadcast_status(&self) -> SessionStatus {
        self.session.status()
    }

    /// Playable files in the configured audio directory
    pub fn audio_files(&self) -> Result<Vec<PathBuf>> {
        list_audio_files(&self.config.library.audio_dir)
    }

    /// A path, or a file name inside the audio directory
    pub fn resolve_file(&self, arg: &str) -> Result<PathBuf> {
        resolve_audio_file(arg, &self.config.library.audio_dir)
    }
}
