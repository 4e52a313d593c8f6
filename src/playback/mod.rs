//! Unified playback over push and pull receivers
//!
//! [`PlaybackAdapter`] is the one interface the rest of the crate uses to
//! get audio onto a receiver. [`adapter_for`] picks the implementation from
//! the device's protocol family.

pub mod pull;
pub mod push;

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::error::{Error, NetworkError, Result};
use crate::media::MediaSource;
use crate::receiver::{
    Credentials, DeviceRegistry, NativeSession, PinEntry, ProtocolKind, UnifiedDeviceHandle,
};

pub use pull::PullAdapter;
pub use push::PushAdapter;

/// How a playback ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Receiver reported it finished playing
    Completed,
    /// Stopped on request
    Stopped,
}

/// Plays sources on one family of receivers
#[async_trait]
pub trait PlaybackAdapter: Send + Sync {
    fn protocol(&self) -> ProtocolKind;

    fn needs_pairing(&self) -> bool;

    /// Pair with the device. `Ok(None)` when the protocol needs no credentials.
    async fn pair(&self, device: &UnifiedDeviceHandle, pin: &dyn PinEntry) -> Result<Option<Credentials>>;

    /// Start playing `source` and return a handle tracking completion
    async fn play(
        &self,
        device: &UnifiedDeviceHandle,
        credentials: Option<&Credentials>,
        source: MediaSource,
    ) -> Result<PlaybackHandle>;
}

/// Pick the adapter for a protocol family
pub fn adapter_for(
    protocol: ProtocolKind,
    registry: Arc<dyn DeviceRegistry>,
    config: &AppConfig,
) -> Arc<dyn PlaybackAdapter> {
    match protocol {
        ProtocolKind::Push => Arc::new(PushAdapter::new(registry, config.playback.clone())),
        ProtocolKind::Pull => Arc::new(PullAdapter::new(
            registry,
            config.playback.clone(),
            config.bridge.clone(),
        )),
    }
}

/// Running playback on a receiver.
///
/// A background monitor polls the receiver until it finishes. Dropping the
/// handle requests a stop.
pub struct PlaybackHandle {
    device_name: String,
    source: MediaSource,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<PlaybackOutcome>>>,
}

impl PlaybackHandle {
    pub(crate) fn spawn<F>(device_name: String, source: MediaSource, cancel: CancellationToken, monitor: F) -> Self
    where
        F: Future<Output = Result<PlaybackOutcome>> + Send + 'static,
    {
        Self {
            device_name,
            source,
            cancel,
            task: Some(tokio::spawn(monitor)),
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn source(&self) -> &MediaSource {
        &self.source
    }

    /// True once the monitor has exited (completed, stopped or failed)
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map(|t| t.is_finished()).unwrap_or(true)
    }

    /// Wait for the receiver to finish
    pub async fn wait(mut self) -> Result<PlaybackOutcome> {
        let Some(task) = self.task.take() else {
            return Ok(PlaybackOutcome::Stopped);
        };
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => Err(Error::transport(format!("playback monitor failed: {}", e))),
        }
    }

    /// Ask the monitor to stop playback and release the device, then wait
    pub async fn stop(self) -> Result<PlaybackOutcome> {
        self.cancel.cancel();
        self.wait().await
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.cancel.cancel();
        }
    }
}

/// Connect through the registry, bounded by `timeout`
pub(crate) async fn connect_with_timeout(
    registry: &dyn DeviceRegistry,
    device: &UnifiedDeviceHandle,
    credentials: Option<&Credentials>,
    timeout: Duration,
) -> Result<NativeSession> {
    match tokio::time::timeout(timeout, registry.connect(device, credentials)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!("Connecting to {} timed out", device.display_name);
            Err(NetworkError::Timeout(timeout).into())
        }
    }
}

/// Consecutive poll failures, fatal past the configured bound
pub(crate) struct PollErrors {
    count: u32,
    limit: u32,
}

impl PollErrors {
    pub(crate) fn new(limit: u32) -> Self {
        Self {
            count: 0,
            limit: limit.max(1),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.count = 0;
    }

    /// Record a failure; returns the error once the bound is reached
    pub(crate) fn record(&mut self, device: &str, error: Error) -> Option<Error> {
        self.count += 1;
        if self.count >= self.limit {
            tracing::error!("Giving up on {} after {} failed polls: {}", device, self.count, error);
            return Some(error);
        }
        tracing::warn!("Polling {} failed ({}/{}): {}", device, self.count, self.limit, error);
        None
    }
}
