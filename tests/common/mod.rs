//! Scripted receiver registry shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lan_audio_caster::config::{AppConfig, BridgeConfig, PlaybackConfig, StreamConfig};
use lan_audio_caster::error::{DeviceError, Error, Result};
use lan_audio_caster::media::MediaSource;
use lan_audio_caster::receiver::{
    Credentials, DeviceRegistry, DeviceState, NativeRef, NativeSession, PinEntry, PlayerState,
    ProtocolKind, PullSession, PushSession, UnifiedDeviceHandle,
};

/// What the fake receiver was asked to do
#[derive(Default)]
pub struct Calls {
    pub discover: AtomicUsize,
    pub pair: AtomicUsize,
    pub connect: AtomicUsize,
    pub closed: AtomicUsize,
    pub stopped: AtomicUsize,
    pub started: Mutex<Vec<String>>,
    pub loaded: Mutex<Vec<(String, String)>>,
}

impl Calls {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn last_loaded_url(&self) -> Option<String> {
        self.loaded.lock().last().map(|(url, _)| url.clone())
    }
}

/// Scripted push receiver: replays `script`, then reports `tail` forever
pub struct FakePush {
    script: VecDeque<std::result::Result<DeviceState, String>>,
    tail: DeviceState,
    calls: Arc<Calls>,
}

#[async_trait]
impl PushSession for FakePush {
    async fn start_stream(&mut self, source: &MediaSource) -> Result<()> {
        self.calls.started.lock().push(source.to_string());
        Ok(())
    }

    async fn device_state(&mut self) -> Result<DeviceState> {
        match self.script.pop_front() {
            Some(Ok(state)) => Ok(state),
            Some(Err(msg)) => Err(Error::transport(msg)),
            None => Ok(self.tail),
        }
    }

    async fn close(&mut self) {
        self.calls.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scripted pull receiver: idle for `idle_polls` polls after loading, then
/// playing until `finished` is set
pub struct FakePull {
    polls: usize,
    idle_polls: usize,
    finished: Arc<AtomicBool>,
    load_delay: Duration,
    calls: Arc<Calls>,
}

impl PullSession for FakePull {
    fn load(&mut self, url: &str, content_type: &str) -> Result<()> {
        self.calls
            .loaded
            .lock()
            .push((url.to_string(), content_type.to_string()));
        if !self.load_delay.is_zero() {
            std::thread::sleep(self.load_delay);
        }
        Ok(())
    }

    fn player_state(&mut self) -> Result<PlayerState> {
        self.polls += 1;
        if self.polls <= self.idle_polls {
            return Ok(PlayerState::Idle);
        }
        if self.finished.load(Ordering::SeqCst) {
            Ok(PlayerState::Idle)
        } else {
            Ok(PlayerState::Playing)
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.calls.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        self.calls.closed.fetch_add(1, Ordering::SeqCst);
    }
}

pub enum Script {
    Push {
        states: Vec<std::result::Result<DeviceState, String>>,
        tail: DeviceState,
    },
    Pull {
        idle_polls: usize,
        finished: Arc<AtomicBool>,
    },
}

pub struct FakeRegistry {
    pub device: UnifiedDeviceHandle,
    pub calls: Arc<Calls>,
    script: Mutex<Option<Script>>,
    pair_result: Option<String>,
    connect_delay: Duration,
    load_delay: Duration,
}

impl FakeRegistry {
    pub fn push(states: Vec<std::result::Result<DeviceState, String>>, tail: DeviceState) -> Self {
        Self::new(ProtocolKind::Push, Script::Push { states, tail })
    }

    pub fn pull(idle_polls: usize, finished: Arc<AtomicBool>) -> Self {
        Self::new(ProtocolKind::Pull, Script::Pull { idle_polls, finished })
    }

    fn new(protocol: ProtocolKind, script: Script) -> Self {
        Self {
            device: UnifiedDeviceHandle {
                id: format!("fake-{}", protocol),
                display_name: format!("Fake {} receiver", protocol),
                address: "127.0.0.1".into(),
                protocol,
                native: NativeRef::new(protocol),
            },
            calls: Arc::new(Calls::default()),
            script: Mutex::new(Some(script)),
            pair_result: Some("paired-secret".into()),
            connect_delay: Duration::ZERO,
            load_delay: Duration::ZERO,
        }
    }

    pub fn with_pair_result(mut self, result: Option<&str>) -> Self {
        self.pair_result = result.map(str::to_string);
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Pull receivers block this long inside `load`
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }
}

#[async_trait]
impl DeviceRegistry for FakeRegistry {
    async fn discover(&self, _timeout: Duration) -> Result<Vec<UnifiedDeviceHandle>> {
        self.calls.discover.fetch_add(1, Ordering::SeqCst);
        Ok(vec![self.device.clone()])
    }

    async fn pair(&self, device: &UnifiedDeviceHandle, pin: &dyn PinEntry) -> Result<Option<Credentials>> {
        self.calls.pair.fetch_add(1, Ordering::SeqCst);
        let Some(pin) = pin.read_pin(device) else {
            return Err(DeviceError::PairingFailed("pin entry aborted".into()).into());
        };
        match &self.pair_result {
            Some(secret) if pin == "1234" => Ok(Some(Credentials::new(secret.clone()))),
            Some(_) => Err(Error::transport("wrong pin")),
            None => Ok(None),
        }
    }

    async fn connect(
        &self,
        _device: &UnifiedDeviceHandle,
        _credentials: Option<&Credentials>,
    ) -> Result<NativeSession> {
        self.calls.connect.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        let script = self
            .script
            .lock()
            .take()
            .ok_or_else(|| Error::transport("fake receiver already connected"))?;
        Ok(match script {
            Script::Push { states, tail } => NativeSession::Push(Box::new(FakePush {
                script: states.into(),
                tail,
                calls: self.calls.clone(),
            })),
            Script::Pull { idle_polls, finished } => NativeSession::Pull(Box::new(FakePull {
                polls: 0,
                idle_polls,
                finished,
                load_delay: self.load_delay,
                calls: self.calls.clone(),
            })),
        })
    }
}

/// Loopback-only configuration with fast polling
pub fn test_config(stream_port: u16, bridge_port: u16) -> AppConfig {
    let lo = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let mut config = AppConfig::default();
    config.audio.channels = 1;
    config.audio.bitrate_kbps = 64;
    config.stream = StreamConfig {
        bind_address: lo,
        base_port: stream_port,
        read_timeout_ms: 100,
        ..StreamConfig::default()
    };
    config.bridge = BridgeConfig {
        bind_address: lo,
        base_port: bridge_port,
        ..BridgeConfig::default()
    };
    config.playback = PlaybackConfig {
        poll_interval_ms: 20,
        connect_timeout_secs: 1,
        discovery_timeout_secs: 1,
        max_poll_errors: 3,
        ..PlaybackConfig::default()
    };
    config
}

/// Write `seconds` of 16-bit mono silence as a WAV file
pub fn write_silent_wav(path: &std::path::Path, seconds: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for _ in 0..(8_000 * seconds) {
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();
}

/// Poll `check` until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Bind `count` consecutive loopback ports; they stay taken while the
/// listeners live
pub fn hold_consecutive_ports(count: u16) -> (u16, Vec<TcpListener>) {
    let lo = IpAddr::V4(Ipv4Addr::LOCALHOST);
    loop {
        let first = TcpListener::bind((lo, 0)).unwrap();
        let base = first.local_addr().unwrap().port();
        if base > u16::MAX - count {
            continue;
        }
        let rest: Vec<_> = (1..count)
            .filter_map(|i| TcpListener::bind((lo, base + i)).ok())
            .collect();
        if rest.len() == usize::from(count - 1) {
            let mut held = vec![first];
            held.extend(rest);
            return (base, held);
        }
    }
}
