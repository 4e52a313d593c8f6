//! # LAN Audio Caster
//!
//! Streams local audio files and live microphone input to playback receivers
//! on the local network.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                          LIVE BROADCAST SESSION                          │
//! │                                                                          │
//! │  ┌─────────────┐   ┌──────────────┐   ┌──────────────┐                   │
//! │  │ Microphone  │──▶│ MP3 Encoder  │──▶│ ChunkChannel │  (drop newest     │
//! │  │ (capture    │   │ (in capture  │   │ bounded SPSC │   when full)      │
//! │  │  thread)    │   │  callback)   │   └──────┬───────┘                   │
//! │  └─────────────┘   └──────────────┘          │                           │
//! │                                              ▼                           │
//! │                                   ┌─────────────────────┐                │
//! │                                   │ Distribution server │ GET /live.mp3  │
//! │                                   │ (axum, chunked)     │───────┐        │
//! │                                   └─────────────────────┘       │        │
//! └─────────────────────────────────────────────────────────────────┼────────┘
//!                                                                   │ HTTP
//! ┌──────────────────────────────┐    play(url)    ┌────────────────▼───────┐
//! │ PlaybackAdapter (push|pull)  │────────────────▶│        Receiver        │
//! │ polls state until idle       │◀────────────────│                        │
//! └──────────────┬───────────────┘     state       └────────────────▲───────┘
//!                │ file source, pull receivers only                 │ HTTP
//!                ▼                                                  │
//!       ┌─────────────────────┐         GET /<file name>            │
//!       │ Media bridge server │─────────────────────────────────────┘
//!       │ (one file, per play)│
//!       └─────────────────────┘
//! ```
//!
//! Device discovery, pairing and the native receiver protocols live behind the
//! [`receiver::DeviceRegistry`] trait.

pub mod audio;
pub mod caster;
pub mod codec;
pub mod config;
pub mod error;
pub mod media;
pub mod network;
pub mod playback;
pub mod receiver;
pub mod session;

pub use caster::Caster;
pub use error::{Error, ErrorKind, Result};

/// Application-wide constants
pub mod constants {
    /// Default capture sample rate
    pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Default MP3 bitrate in kbps
    pub const DEFAULT_BITRATE_KBPS: u32 = 128;

    /// Default capture frame length in milliseconds
    pub const DEFAULT_FRAME_MILLIS: u32 = 20;

    /// Default first port tried by the live distribution server
    pub const DEFAULT_STREAM_PORT: u16 = 8090;

    /// Default first port tried by the media bridge
    pub const DEFAULT_BRIDGE_PORT: u16 = 8000;

    /// Number of consecutive ports tried before giving up
    pub const DEFAULT_PORT_RANGE: u16 = 10;

    /// Encoded chunks buffered between capture and distribution
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

    /// Path of the live stream endpoint
    pub const LIVE_STREAM_PATH: &str = "/live.mp3";

    /// Extensions recognised as playable audio files
    pub const AUDIO_EXTENSIONS: [&str; 5] = ["mp3", "m4a", "wav", "flac", "aac"];
}
