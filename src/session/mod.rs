//! Live broadcast session
//!
//! Ties capture, encoding, the chunk channel and the distribution server
//! together, optionally pointing a receiver at the live URL.
//!
//! ```text
//! Idle ──start──▶ Starting ──ok──▶ Live ──stop──▶ Stopping ──▶ Idle
//!                    │
//!                    └──failure (resources torn down)──▶ Idle
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audio::buffer::create_chunk_channel;
use crate::audio::{FrameFormat, FrameSource, SharedChunkChannel};
use crate::codec::pipeline::{frame_callback, shared_pipeline};
use crate::codec::{EncodePipeline, Mp3Encoder, SharedPipeline};
use crate::config::{AudioConfig, StreamConfig};
use crate::error::{AudioError, DeviceError, Result, SessionError};
use crate::media::MediaSource;
use crate::network::{advertised_ip, ChunkDistributionServer};
use crate::playback::{PlaybackAdapter, PlaybackHandle};
use crate::receiver::{Credentials, UnifiedDeviceHandle};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Live,
    Stopping,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Live => "live",
            SessionState::Stopping => "stopping",
        }
    }

    /// Anything but Idle blocks a second start
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Idle)
    }
}

/// Receiver told to fetch the live stream once it is up
pub struct ReceiverTarget {
    pub adapter: Arc<dyn PlaybackAdapter>,
    pub device: UnifiedDeviceHandle,
    pub credentials: Option<Credentials>,
}

/// Snapshot of the session for display
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: SessionState,
    pub id: Option<Uuid>,
    pub url: Option<String>,
    pub receiver: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub chunks_pushed: u64,
    pub chunks_dropped: u64,
    pub bytes_sent: u64,
    /// Stream errors the capture source reported while live
    pub capture_errors: u64,
}

/// Everything owned while live
struct LiveResources {
    id: Uuid,
    started_at: DateTime<Utc>,
    source: Box<dyn FrameSource>,
    pipeline: SharedPipeline,
    channel: SharedChunkChannel,
    server: ChunkDistributionServer,
    cancel: CancellationToken,
    playback: Option<PlaybackHandle>,
    capture_errors: u64,
}

/// Coordinates at most one live broadcast. Owned by the caller.
pub struct BroadcastSession {
    audio: AudioConfig,
    stream: StreamConfig,
    state: Mutex<SessionState>,
    live: Mutex<Option<LiveResources>>,
}

/// Resets a failed start back to Idle
struct StartGuard<'a> {
    state: &'a Mutex<SessionState>,
    armed: bool,
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.state.lock() = SessionState::Idle;
        }
    }
}

impl BroadcastSession {
    pub fn new(audio: AudioConfig, stream: StreamConfig) -> Self {
        Self {
            audio,
            stream,
            state: Mutex::new(SessionState::Idle),
            live: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_live(&self) -> bool {
        self.state() == SessionState::Live
    }

    /// Start capturing from `source` and serving the live stream.
    ///
    /// Returns the distribution URL. With a `target`, the receiver is told
    /// to play that URL before this returns.
    pub async fn start(&self, source: Box<dyn FrameSource>, target: Option<ReceiverTarget>) -> Result<String> {
        {
            let mut state = self.state.lock();
            if state.is_active() {
                return Err(SessionError::AlreadyActive.into());
            }
            if let Some(target) = &target {
                if target.adapter.needs_pairing() && target.credentials.is_none() {
                    return Err(DeviceError::MissingCredentials(target.device.display_name.clone()).into());
                }
            }
            *state = SessionState::Starting;
        }
        let mut guard = StartGuard {
            state: &self.state,
            armed: true,
        };
        tracing::info!("Broadcast session starting");

        let resources = self.acquire(source, target).await?;
        let url = resources.server.url().to_string();
        *self.live.lock() = Some(resources);

        guard.armed = false;
        *self.state.lock() = SessionState::Live;
        tracing::info!("Broadcast session live at {}", url);
        Ok(url)
    }

    async fn acquire(&self, source: Box<dyn FrameSource>, target: Option<ReceiverTarget>) -> Result<LiveResources> {
        let encoder = Mp3Encoder::new(self.audio.sample_rate, self.audio.channels, self.audio.bitrate_kbps)?;
        let channel = create_chunk_channel(self.stream.channel_capacity);
        let cancel = CancellationToken::new();

        let remote = target.as_ref().map(|t| t.device.address.as_str());
        let advertise = advertised_ip(self.stream.bind_address, remote);
        let server = ChunkDistributionServer::start(&self.stream, channel.clone(), cancel.clone(), advertise).await?;

        let pipeline = shared_pipeline(EncodePipeline::new(encoder, channel.clone()));
        let format = FrameFormat::new(self.audio.sample_rate, self.audio.channels, self.audio.frame_millis);
        let callback = frame_callback(pipeline.clone());
        let started = tokio::task::spawn_blocking(move || {
            let mut source = source;
            let result = source.start(format, callback);
            (source, result)
        })
        .await;
        let source = match started {
            Ok((source, Ok(()))) => source,
            Ok((_, Err(e))) => {
                tracing::error!("Capture failed to start: {}", e);
                server.shutdown().await;
                return Err(e.into());
            }
            Err(e) => {
                server.shutdown().await;
                return Err(AudioError::CaptureDeviceUnavailable(e.to_string()).into());
            }
        };

        let mut resources = LiveResources {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            source,
            pipeline,
            channel,
            server,
            cancel,
            playback: None,
            capture_errors: 0,
        };

        if let Some(target) = target {
            let stream = MediaSource::Url(resources.server.url().to_string());
            match target
                .adapter
                .play(&target.device, target.credentials.as_ref(), stream)
                .await
            {
                Ok(handle) => resources.playback = Some(handle),
                Err(e) => {
                    tracing::error!("{} refused the live stream: {}", target.device.display_name, e);
                    release(resources).await;
                    return Err(e);
                }
            }
        }

        Ok(resources)
    }

    /// Stop a live session and release everything it holds.
    ///
    /// A no-op when nothing is live.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != SessionState::Live {
                tracing::debug!("Stop requested while {:?}, nothing to do", *state);
                return Ok(());
            }
            *state = SessionState::Stopping;
        }
        tracing::info!("Broadcast session stopping");

        let resources = self.live.lock().take();
        if let Some(resources) = resources {
            release(resources).await;
        }

        {
            let mut state = self.state.lock();
            if *state == SessionState::Stopping {
                *state = SessionState::Idle;
            }
        }
        tracing::info!("Broadcast session stopped");
        Ok(())
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.state();
        let mut live = self.live.lock();
        match live.as_mut() {
            Some(res) => {
                res.drain_capture_errors();
                SessionStatus {
                    state,
                    id: Some(res.id),
                    url: Some(res.server.url().to_string()),
                    receiver: res.playback.as_ref().map(|p| p.device_name().to_string()),
                    started_at: Some(res.started_at),
                    chunks_pushed: res.channel.pushed_count(),
                    chunks_dropped: res.channel.dropped_count(),
                    bytes_sent: res.server.bytes_sent(),
                    capture_errors: res.capture_errors,
                }
            }
            None => SessionStatus {
                state,
                id: None,
                url: None,
                receiver: None,
                started_at: None,
                chunks_pushed: 0,
                chunks_dropped: 0,
                bytes_sent: 0,
                capture_errors: 0,
            },
        }
    }
}

impl LiveResources {
    fn drain_capture_errors(&mut self) {
        for e in self.source.take_errors() {
            tracing::warn!("Session {} capture error: {}", self.id, e);
            self.capture_errors += 1;
        }
    }
}

/// Tear down in order: capture, encoder trailer, channel, server, receiver
async fn release(mut resources: LiveResources) {
    resources.drain_capture_errors();
    let LiveResources {
        id,
        started_at,
        source,
        pipeline,
        channel,
        server,
        cancel,
        playback,
        mut capture_errors,
    } = resources;

    let stopped = tokio::task::spawn_blocking(move || {
        let mut source = source;
        source.stop();
        source.take_errors()
    })
    .await;
    match stopped {
        Ok(errors) => {
            for e in errors {
                tracing::warn!("Session {} capture error: {}", id, e);
                capture_errors += 1;
            }
        }
        Err(e) => tracing::warn!("Capture shutdown failed: {}", e),
    }

    let taken = pipeline.lock().take();
    if let Some(pipeline) = taken {
        pipeline.finish();
    }
    channel.close();

    cancel.cancel();
    server.shutdown().await;

    if let Some(playback) = playback {
        match playback.stop().await {
            Ok(outcome) => tracing::debug!("Receiver playback ended: {:?}", outcome),
            Err(e) => tracing::warn!("Receiver playback ended with error: {}", e),
        }
    }

    let elapsed = Utc::now() - started_at;
    tracing::info!(
        "Session {} released after {}s: {} chunks queued, {} dropped, {} capture errors",
        id,
        elapsed.num_seconds(),
        channel.pushed_count(),
        channel.dropped_count(),
        capture_errors
    );
}

impl Drop for BroadcastSession {
    fn drop(&mut self) {
        if let Some(resources) = self.live.get_mut().take() {
            resources.cancel.cancel();
            tracing::warn!("Broadcast session {} dropped while live", resources.id);
        }
    }
}
