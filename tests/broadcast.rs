//! Live broadcast session lifecycle with a synthetic source

mod common;

use futures_util::StreamExt;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{test_config, wait_until, Calls, FakeRegistry};
use lan_audio_caster::audio::{FrameCallback, FrameFormat, FrameSource, SyntheticSource};
use lan_audio_caster::config::DeviceConfig;
use lan_audio_caster::error::AudioError;
use lan_audio_caster::playback::adapter_for;
use lan_audio_caster::receiver::{Credentials, DeviceState, ProtocolKind};
use lan_audio_caster::session::{BroadcastSession, ReceiverTarget, SessionState};
use lan_audio_caster::{Caster, ErrorKind};

/// Source whose device never opens
struct BrokenSource;

impl FrameSource for BrokenSource {
    fn start(&mut self, _format: FrameFormat, _on_frame: FrameCallback) -> Result<(), AudioError> {
        Err(AudioError::CaptureDeviceUnavailable("no microphone".into()))
    }

    fn stop(&mut self) {}

    fn is_running(&self) -> bool {
        false
    }
}

/// Silence whose capture thread takes a while to wind down
struct SlowStopSource {
    inner: SyntheticSource,
    delay: Duration,
}

impl FrameSource for SlowStopSource {
    fn start(&mut self, format: FrameFormat, on_frame: FrameCallback) -> Result<(), AudioError> {
        self.inner.start(format, on_frame)
    }

    fn stop(&mut self) {
        std::thread::sleep(self.delay);
        self.inner.stop();
    }

    fn is_running(&self) -> bool {
        self.inner.is_running()
    }
}

/// Silence that reports stream errors after it starts
struct NoisySource {
    inner: SyntheticSource,
    pending: Vec<AudioError>,
}

impl FrameSource for NoisySource {
    fn start(&mut self, format: FrameFormat, on_frame: FrameCallback) -> Result<(), AudioError> {
        self.inner.start(format, on_frame)
    }

    fn stop(&mut self) {
        self.inner.stop();
    }

    fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    fn take_errors(&mut self) -> Vec<AudioError> {
        std::mem::take(&mut self.pending)
    }
}

/// Records whether anything tried to start it
struct WatchedSource(Arc<AtomicBool>);

impl FrameSource for WatchedSource {
    fn start(&mut self, _format: FrameFormat, _on_frame: FrameCallback) -> Result<(), AudioError> {
        self.0.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {}

    fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn session(stream_port: u16) -> BroadcastSession {
    let config = test_config(stream_port, stream_port + 10);
    BroadcastSession::new(config.audio, config.stream)
}

#[tokio::test]
async fn test_live_stream_carries_mp3() {
    let session = session(19_600);
    let url = session.start(Box::new(SyntheticSource::tone(440.0)), None).await.unwrap();

    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "audio/mpeg");

    let mut body = response.bytes_stream();
    let mut received = Vec::new();
    while received.len() < 2048 {
        let chunk = tokio::time::timeout(Duration::from_secs(5), body.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        received.extend_from_slice(&chunk);
    }
    // MPEG audio frame sync
    let sync = received.windows(2).any(|w| w[0] == 0xFF && (w[1] & 0xE0) == 0xE0);
    assert!(sync);

    let status = session.status();
    assert!(status.chunks_pushed > 0);
    assert!(status.bytes_sent > 0);

    drop(body);
    session.stop().await.unwrap();
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_second_start_is_already_active() {
    let session = session(19_620);
    session.start(Box::new(SyntheticSource::silence()), None).await.unwrap();

    let err = session
        .start(Box::new(SyntheticSource::silence()), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyActive);
    assert_eq!(session.state(), SessionState::Live);

    session.stop().await.unwrap();
    session.stop().await.unwrap();
    assert_eq!(session.state(), SessionState::Idle);

    // Can go live again after stopping
    session.start(Box::new(SyntheticSource::silence()), None).await.unwrap();
    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_capture_failure_releases_server() {
    let session = session(19_640);
    let err = session.start(Box::new(BrokenSource), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CaptureDeviceUnavailable);
    assert_eq!(session.state(), SessionState::Idle);
    assert!(TcpListener::bind(("127.0.0.1", 19_640)).is_ok());
}

#[tokio::test]
async fn test_unpaired_push_target_fails_before_serving() {
    let config = test_config(19_660, 19_670);
    let registry = Arc::new(FakeRegistry::push(vec![], DeviceState::Playing));
    let calls = registry.calls.clone();
    let device = registry.device.clone();
    let adapter = adapter_for(ProtocolKind::Push, registry, &config);
    let session = BroadcastSession::new(config.audio.clone(), config.stream.clone());

    let target = ReceiverTarget {
        adapter,
        device,
        credentials: None,
    };
    let err = session
        .start(Box::new(SyntheticSource::silence()), Some(target))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingCredentials);
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(Calls::count(&calls.connect), 0);
    assert!(TcpListener::bind(("127.0.0.1", 19_660)).is_ok());
}

#[tokio::test]
async fn test_caster_broadcast_to_unpaired_push_device() {
    let registry = Arc::new(FakeRegistry::push(vec![], DeviceState::Playing));
    let calls = registry.calls.clone();
    let mut config = test_config(19_680, 19_690);
    config.device = Some(DeviceConfig {
        id: registry.device.id.clone(),
        name: registry.device.display_name.clone(),
        address: registry.device.address.clone(),
        protocol: ProtocolKind::Push,
        credentials: None,
    });
    let caster = Caster::new(config, registry);

    let err = caster
        .start_broadcast(Box::new(SyntheticSource::silence()), true)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingCredentials);
    assert_eq!(Calls::count(&calls.discover), 0);
    assert!(caster.broadcast_status().url.is_none());
}

#[tokio::test]
async fn test_pull_receiver_is_pointed_at_live_url() {
    let registry = Arc::new(FakeRegistry::pull(0, Arc::new(AtomicBool::new(false))));
    let calls = registry.calls.clone();
    let mut config = test_config(19_700, 19_710);
    config.device = Some(DeviceConfig {
        id: registry.device.id.clone(),
        name: registry.device.display_name.clone(),
        address: registry.device.address.clone(),
        protocol: ProtocolKind::Pull,
        credentials: None,
    });
    let caster = Caster::new(config, registry);

    let url = caster
        .start_broadcast(Box::new(SyntheticSource::silence()), true)
        .await
        .unwrap();
    let (loaded, content_type) = calls.loaded.lock()[0].clone();
    assert_eq!(loaded, url);
    assert_eq!(content_type, "audio/mpeg");

    let status = caster.broadcast_status();
    assert_eq!(status.state, SessionState::Live);
    assert_eq!(status.receiver.as_deref(), Some("Fake pull receiver"));

    caster.stop_broadcast().await.unwrap();
    assert_eq!(Calls::count(&calls.stopped), 1);
    assert_eq!(Calls::count(&calls.closed), 1);
    assert_eq!(caster.broadcast_status().state, SessionState::Idle);
}

#[tokio::test]
async fn test_push_receiver_with_credentials_streams_live_url() {
    let registry = Arc::new(FakeRegistry::push(vec![], DeviceState::Playing));
    let calls = registry.calls.clone();
    let mut config = test_config(19_720, 19_730);
    config.device = Some(DeviceConfig {
        id: registry.device.id.clone(),
        name: registry.device.display_name.clone(),
        address: registry.device.address.clone(),
        protocol: ProtocolKind::Push,
        credentials: Some(Credentials::new("secret")),
    });
    let caster = Caster::new(config, registry);

    let url = caster
        .start_broadcast(Box::new(SyntheticSource::silence()), true)
        .await
        .unwrap();
    assert_eq!(calls.started.lock().as_slice(), &[url]);

    caster.stop_broadcast().await.unwrap();
    assert_eq!(Calls::count(&calls.closed), 1);
}

#[tokio::test]
async fn test_start_during_stop_is_rejected() {
    let session = Arc::new(session(19_740));
    let slow = SlowStopSource {
        inner: SyntheticSource::silence(),
        delay: Duration::from_millis(500),
    };
    session.start(Box::new(slow), None).await.unwrap();

    let stopping = tokio::spawn({
        let session = session.clone();
        async move { session.stop().await }
    });
    assert!(wait_until(Duration::from_secs(2), || session.state() == SessionState::Stopping).await);

    let err = session
        .start(Box::new(SyntheticSource::silence()), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyActive);

    stopping.await.unwrap().unwrap();
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.status().url.is_none());

    // Nothing leaked from the rejected start
    session.start(Box::new(SyntheticSource::silence()), None).await.unwrap();
    assert!(session.is_live());
    session.stop().await.unwrap();
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_port_exhaustion_leaves_session_idle() {
    let (base, held) = common::hold_consecutive_ports(3);
    let mut config = test_config(base, 19_770);
    config.stream.port_range = 3;
    let session = BroadcastSession::new(config.audio, config.stream);

    let started = Arc::new(AtomicBool::new(false));
    let err = session
        .start(Box::new(WatchedSource(started.clone())), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PortExhausted);
    assert_eq!(session.state(), SessionState::Idle);
    assert!(!started.load(Ordering::SeqCst));
    assert!(session.status().url.is_none());
    drop(held);
}

#[tokio::test]
async fn test_capture_errors_are_counted() {
    let session = session(19_780);
    let noisy = NoisySource {
        inner: SyntheticSource::silence(),
        pending: vec![
            AudioError::CaptureDeviceUnavailable("buffer overrun".into()),
            AudioError::CaptureDeviceUnavailable("device reset".into()),
        ],
    };
    session.start(Box::new(noisy), None).await.unwrap();

    assert_eq!(session.status().capture_errors, 2);
    // Already drained errors are not counted twice
    assert_eq!(session.status().capture_errors, 2);

    session.stop().await.unwrap();
    assert_eq!(session.status().capture_errors, 0);
}
