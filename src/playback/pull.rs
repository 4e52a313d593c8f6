//! Pull-style playback
//!
//! The receiver is handed an HTTP URL and fetches the bytes itself. Local
//! files are exposed through a [`MediaBridgeServer`] owned by the playback.
//! The native client is synchronous, so every call runs on the blocking
//! thread pool.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::{BridgeConfig, PlaybackConfig};
use crate::error::{Error, NetworkError, Result};
use crate::media::MediaSource;
use crate::network::{advertised_ip, MediaBridgeServer};
use crate::playback::{connect_with_timeout, PlaybackAdapter, PlaybackHandle, PlaybackOutcome, PollErrors};
use crate::receiver::{
    Credentials, DeviceRegistry, NativeSession, PinEntry, PlayerState, ProtocolKind, PullSession,
    UnifiedDeviceHandle,
};

type SharedPullSession = Arc<Mutex<Box<dyn PullSession>>>;

pub struct PullAdapter {
    registry: Arc<dyn DeviceRegistry>,
    settings: PlaybackConfig,
    bridge: BridgeConfig,
}

impl PullAdapter {
    pub fn new(registry: Arc<dyn DeviceRegistry>, settings: PlaybackConfig, bridge: BridgeConfig) -> Self {
        Self {
            registry,
            settings,
            bridge,
        }
    }
}

#[async_trait]
impl PlaybackAdapter for PullAdapter {
    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Pull
    }

    fn needs_pairing(&self) -> bool {
        false
    }

    async fn pair(&self, _device: &UnifiedDeviceHandle, _pin: &dyn PinEntry) -> Result<Option<Credentials>> {
        Ok(None)
    }

    async fn play(
        &self,
        device: &UnifiedDeviceHandle,
        _credentials: Option<&Credentials>,
        source: MediaSource,
    ) -> Result<PlaybackHandle> {
        let (bridge, url, content_type) = match &source {
            MediaSource::File(path) => {
                let advertise = advertised_ip(self.bridge.bind_address, Some(&device.address));
                let bridge = MediaBridgeServer::start(path, &self.bridge, advertise).await?;
                let url = bridge.url().to_string();
                let content_type = bridge.content_type();
                (Some(bridge), url, content_type)
            }
            MediaSource::Url(url) => (None, url.clone(), source.content_type()),
        };

        tracing::info!("Connecting to {} ({})", device.display_name, device.address);
        let connected = connect_with_timeout(
            self.registry.as_ref(),
            device,
            None,
            self.settings.connect_timeout(),
        )
        .await;

        let session: SharedPullSession = match connected {
            Ok(NativeSession::Pull(session)) => Arc::new(Mutex::new(session)),
            Ok(NativeSession::Push(mut other)) => {
                other.close().await;
                shutdown_bridge(bridge).await;
                return Err(Error::transport(format!(
                    "{} answered with a push session",
                    device.display_name
                )));
            }
            Err(e) => {
                shutdown_bridge(bridge).await;
                return Err(e);
            }
        };

        let load_url = url.clone();
        let load_timeout = self.settings.connect_timeout();
        let loaded = tokio::time::timeout(
            load_timeout,
            blocking(&session, move |s| s.load(&load_url, content_type)),
        )
        .await;
        match loaded {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                release(&session).await;
                shutdown_bridge(bridge).await;
                return Err(e);
            }
            Err(_) => {
                tracing::warn!("{} did not accept {} in time", device.display_name, url);
                release_detached(session);
                shutdown_bridge(bridge).await;
                return Err(NetworkError::Timeout(load_timeout).into());
            }
        }
        tracing::info!("{} is fetching {} ({})", device.display_name, url, content_type);

        let cancel = CancellationToken::new();
        let monitor = monitor(
            session,
            bridge,
            self.settings.clone(),
            cancel.clone(),
            device.display_name.clone(),
        );
        Ok(PlaybackHandle::spawn(device.display_name.clone(), source, cancel, monitor))
    }
}

/// Run a native client call on the blocking pool
async fn blocking<T, F>(session: &SharedPullSession, f: F) -> Result<T>
where
    F: FnOnce(&mut dyn PullSession) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let session = session.clone();
    tokio::task::spawn_blocking(move || {
        let mut guard = session.lock();
        f(&mut **guard)
    })
    .await
    .map_err(|e| Error::transport(format!("pull client call failed: {}", e)))?
}

async fn release(session: &SharedPullSession) {
    let _ = blocking(session, |s| {
        s.close();
        Ok(())
    })
    .await;
}

/// Close once the stuck call returns, without waiting for it
fn release_detached(session: SharedPullSession) {
    tokio::task::spawn_blocking(move || session.lock().close());
}

async fn shutdown_bridge(bridge: Option<MediaBridgeServer>) {
    if let Some(bridge) = bridge {
        bridge.shutdown().await;
    }
}

/// Poll until the player goes idle after having played. Always releases the
/// session and the bridge.
async fn monitor(
    session: SharedPullSession,
    bridge: Option<MediaBridgeServer>,
    settings: PlaybackConfig,
    cancel: CancellationToken,
    device: String,
) -> Result<PlaybackOutcome> {
    let mut errors = PollErrors::new(settings.max_poll_errors);
    // An idle read before the first PLAYING is the receiver not having started yet
    let mut seen_playing = false;

    let outcome = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = blocking(&session, |s| s.stop()).await {
                    tracing::warn!("Stopping {} failed: {}", device, e);
                }
                break Ok(PlaybackOutcome::Stopped);
            }
            _ = tokio::time::sleep(settings.poll_interval()) => {}
        }

        match blocking(&session, |s| s.player_state()).await {
            Ok(PlayerState::Idle) if seen_playing => break Ok(PlaybackOutcome::Completed),
            Ok(state) => {
                errors.reset();
                if state == PlayerState::Playing && !seen_playing {
                    tracing::info!("{} started playing", device);
                    seen_playing = true;
                }
                tracing::debug!("{} is {:?}", device, state);
            }
            Err(e) => {
                if let Some(fatal) = errors.record(&device, e) {
                    break Err(fatal);
                }
            }
        }
    };

    release(&session).await;
    shutdown_bridge(bridge).await;
    match &outcome {
        Ok(PlaybackOutcome::Completed) => tracing::info!("Playback on {} completed", device),
        Ok(PlaybackOutcome::Stopped) => tracing::info!("Playback on {} stopped", device),
        Err(_) => {}
    }
    outcome
}
