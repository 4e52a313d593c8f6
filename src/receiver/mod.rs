//! Receiver devices and the protocol boundary
//!
//! Discovery, pairing and the native receiver protocols are provided by
//! external device libraries through [`DeviceRegistry`]. The core only
//! carries the opaque [`NativeRef`] back to the registry and drives the
//! sessions it returns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::media::MediaSource;

/// Receiver protocol family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    /// Receiver is handed a source reference and streams it itself
    Push,
    /// Receiver must be given an HTTP URL to fetch
    Pull,
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolKind::Push => f.write_str("push"),
            ProtocolKind::Pull => f.write_str("pull"),
        }
    }
}

impl std::str::FromStr for ProtocolKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "push" => Ok(ProtocolKind::Push),
            "pull" => Ok(ProtocolKind::Pull),
            other => Err(format!("unknown protocol '{}', expected push or pull", other)),
        }
    }
}

/// Long-lived pairing credentials, opaque to the core
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(String);

impl Credentials {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials(..)")
    }
}

/// Protocol-specific handle owned by the device library
#[derive(Clone)]
pub struct NativeRef(Arc<dyn Any + Send + Sync>);

impl NativeRef {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Only the registry that created the handle knows its type
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for NativeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NativeRef(..)")
    }
}

/// A discovered receiver. Valid for one operation only; discover again next run.
#[derive(Debug, Clone)]
pub struct UnifiedDeviceHandle {
    pub id: String,
    pub display_name: String,
    pub address: String,
    pub protocol: ProtocolKind,
    pub native: NativeRef,
}

/// Playback state reported by a push receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Idle,
    Loading,
    Playing,
    Paused,
    Seeking,
}

/// Player state reported by a pull receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Buffering,
    Playing,
    Paused,
}

/// Source of the PIN a receiver displays during pairing
pub trait PinEntry: Send + Sync {
    /// `None` aborts the pairing
    fn read_pin(&self, device: &UnifiedDeviceHandle) -> Option<String>;
}

/// Fixed PIN, for non-interactive callers
pub struct FixedPin(pub String);

impl PinEntry for FixedPin {
    fn read_pin(&self, _device: &UnifiedDeviceHandle) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Connected push-protocol session
#[async_trait]
pub trait PushSession: Send {
    /// Hand the receiver a local file path or URL to stream
    async fn start_stream(&mut self, source: &MediaSource) -> Result<()>;

    async fn device_state(&mut self) -> Result<DeviceState>;

    async fn close(&mut self);
}

/// Connected pull-protocol session. The native client is synchronous; the
/// core calls it from the blocking thread pool.
pub trait PullSession: Send {
    /// Ask the receiver to fetch and play `url`
    fn load(&mut self, url: &str, content_type: &str) -> Result<()>;

    fn player_state(&mut self) -> Result<PlayerState>;

    fn stop(&mut self) -> Result<()>;

    fn close(&mut self);
}

/// Native session returned by [`DeviceRegistry::connect`]
pub enum NativeSession {
    Push(Box<dyn PushSession>),
    Pull(Box<dyn PullSession>),
}

impl NativeSession {
    pub fn protocol(&self) -> ProtocolKind {
        match self {
            NativeSession::Push(_) => ProtocolKind::Push,
            NativeSession::Pull(_) => ProtocolKind::Pull,
        }
    }
}

/// Discovery, pairing and connection, provided by device-protocol libraries.
///
/// All three are fallible remote operations; the core never retries them.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn discover(&self, timeout: Duration) -> Result<Vec<UnifiedDeviceHandle>>;

    /// Run the pairing handshake. `Ok(None)` means the device needs no credentials.
    async fn pair(&self, device: &UnifiedDeviceHandle, pin: &dyn PinEntry) -> Result<Option<Credentials>>;

    async fn connect(
        &self,
        device: &UnifiedDeviceHandle,
        credentials: Option<&Credentials>,
    ) -> Result<NativeSession>;
}
