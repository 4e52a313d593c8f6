//! MP3 codec wrapper
//!
//! Streaming MP3 encoding for the live broadcast path.

pub mod encoder;
pub mod pipeline;

pub use encoder::{EncoderStats, Mp3Encoder};
pub use pipeline::{EncodePipeline, SharedPipeline};
