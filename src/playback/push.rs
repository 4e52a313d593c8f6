//! Push-style playback
//!
//! The receiver is handed the path or URL and streams it under its own
//! control. Requires credentials from a previous pairing.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::PlaybackConfig;
use crate::error::{DeviceError, Error, ErrorKind, Result};
use crate::media::MediaSource;
use crate::playback::{connect_with_timeout, PlaybackAdapter, PlaybackHandle, PlaybackOutcome, PollErrors};
use crate::receiver::{
    Credentials, DeviceRegistry, DeviceState, NativeSession, PinEntry, ProtocolKind, PushSession,
    UnifiedDeviceHandle,
};

pub struct PushAdapter {
    registry: Arc<dyn DeviceRegistry>,
    settings: PlaybackConfig,
}

impl PushAdapter {
    pub fn new(registry: Arc<dyn DeviceRegistry>, settings: PlaybackConfig) -> Self {
        Self { registry, settings }
    }
}

#[async_trait]
impl PlaybackAdapter for PushAdapter {
    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Push
    }

    fn needs_pairing(&self) -> bool {
        true
    }

    async fn pair(&self, device: &UnifiedDeviceHandle, pin: &dyn PinEntry) -> Result<Option<Credentials>> {
        let timeout = self.settings.pairing_timeout();
        tracing::info!("Pairing with {}", device.display_name);

        match tokio::time::timeout(timeout, self.registry.pair(device, pin)).await {
            Err(_) => Err(DeviceError::PairingFailed(format!(
                "{} did not complete pairing within {:?}",
                device.display_name, timeout
            ))
            .into()),
            Ok(Err(e)) if e.kind() == ErrorKind::PairingFailed => Err(e),
            Ok(Err(e)) => Err(DeviceError::PairingFailed(e.to_string()).into()),
            Ok(Ok(None)) => Err(DeviceError::PairingFailed(format!(
                "{} returned no credentials",
                device.display_name
            ))
            .into()),
            Ok(Ok(Some(credentials))) => {
                tracing::info!("Paired with {}", device.display_name);
                Ok(Some(credentials))
            }
        }
    }

    async fn play(
        &self,
        device: &UnifiedDeviceHandle,
        credentials: Option<&Credentials>,
        source: MediaSource,
    ) -> Result<PlaybackHandle> {
        let credentials = credentials
            .ok_or_else(|| DeviceError::MissingCredentials(device.display_name.clone()))?;

        tracing::info!("Connecting to {} ({})", device.display_name, device.address);
        let session = connect_with_timeout(
            self.registry.as_ref(),
            device,
            Some(credentials),
            self.settings.connect_timeout(),
        )
        .await?;

        let mut session = match session {
            NativeSession::Push(session) => session,
            NativeSession::Pull(mut other) => {
                other.close();
                return Err(Error::transport(format!(
                    "{} answered with a pull session",
                    device.display_name
                )));
            }
        };

        if let Err(e) = session.start_stream(&source).await {
            session.close().await;
            return Err(e);
        }
        tracing::info!("Streaming {} to {}", source, device.display_name);

        let cancel = CancellationToken::new();
        let monitor = monitor(
            session,
            self.settings.clone(),
            cancel.clone(),
            device.display_name.clone(),
        );
        Ok(PlaybackHandle::spawn(device.display_name.clone(), source, cancel, monitor))
    }
}

/// Poll the device until it reports idle; always closes the session
async fn monitor(
    mut session: Box<dyn PushSession>,
    settings: PlaybackConfig,
    cancel: CancellationToken,
    device: String,
) -> Result<PlaybackOutcome> {
    let mut errors = PollErrors::new(settings.max_poll_errors);

    let outcome = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(PlaybackOutcome::Stopped),
            _ = tokio::time::sleep(settings.poll_interval()) => {}
        }

        match session.device_state().await {
            Ok(DeviceState::Idle) => break Ok(PlaybackOutcome::Completed),
            Ok(state) => {
                errors.reset();
                tracing::debug!("{} is {:?}", device, state);
            }
            Err(e) => {
                if let Some(fatal) = errors.record(&device, e) {
                    break Err(fatal);
                }
            }
        }
    };

    session.close().await;
    match &outcome {
        Ok(PlaybackOutcome::Completed) => tracing::info!("Playback on {} completed", device),
        Ok(PlaybackOutcome::Stopped) => tracing::info!("Playback on {} stopped", device),
        Err(_) => {}
    }
    outcome
}
