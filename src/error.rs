//! Error types for the audio caster

use std::fmt;
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio capture errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Capture device unavailable: {0}")]
    CaptureDeviceUnavailable(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Encoder errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Flush failed: {0}")]
    FlushFailed(String),
}

/// HTTP server and transport errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("No free port in {base}..{end}", end = *base as u32 + *count as u32)]
    PortExhausted { base: u16, count: u16 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Source not found: {0}")]
    SourceNotFound(String),
}

/// Receiver device errors
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Device {0} has no stored credentials; pair it first")]
    MissingCredentials(String),

    #[error("Pairing failed: {0}")]
    PairingFailed(String),
}

/// Broadcast session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("A broadcast session is already active")]
    AlreadyActive,
}

/// Coarse classification reported alongside every user-visible failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DeviceNotFound,
    PortExhausted,
    CaptureDeviceUnavailable,
    MissingCredentials,
    PairingFailed,
    TransportError,
    EncoderFault,
    AlreadyActive,
    SourceNotFound,
    Config,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DeviceNotFound => "device-not-found",
            ErrorKind::PortExhausted => "port-exhausted",
            ErrorKind::CaptureDeviceUnavailable => "capture-device-unavailable",
            ErrorKind::MissingCredentials => "missing-credentials",
            ErrorKind::PairingFailed => "pairing-failed",
            ErrorKind::TransportError => "transport-error",
            ErrorKind::EncoderFault => "encoder-fault",
            ErrorKind::AlreadyActive => "already-active",
            ErrorKind::SourceNotFound => "source-not-found",
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Audio(_) => ErrorKind::CaptureDeviceUnavailable,
            Error::Codec(_) => ErrorKind::EncoderFault,
            Error::Network(NetworkError::PortExhausted { .. }) => ErrorKind::PortExhausted,
            Error::Network(NetworkError::SourceNotFound(_)) => ErrorKind::SourceNotFound,
            Error::Network(_) => ErrorKind::TransportError,
            Error::Device(DeviceError::NotFound(_)) => ErrorKind::DeviceNotFound,
            Error::Device(DeviceError::MissingCredentials(_)) => ErrorKind::MissingCredentials,
            Error::Device(DeviceError::PairingFailed(_)) => ErrorKind::PairingFailed,
            Error::Session(SessionError::AlreadyActive) => ErrorKind::AlreadyActive,
            Error::Config(_) => ErrorKind::Config,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Shorthand for a transport failure
    pub fn transport(msg: impl Into<String>) -> Self {
        Error::Network(NetworkError::Transport(msg.into()))
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
