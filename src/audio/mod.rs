//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod synthetic;

pub use buffer::{ChunkChannel, FrameAssembler, PushOutcome, RecvOutcome, SharedChunkChannel};
pub use capture::AudioFrameSource;
pub use device::{list_input_devices, InputDeviceInfo};
pub use synthetic::SyntheticSource;

use crate::error::AudioError;

/// Shape of the PCM frames delivered to a frame callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_millis: u32,
}

impl FrameFormat {
    pub fn new(sample_rate: u32, channels: u16, frame_millis: u32) -> Self {
        Self {
            sample_rate,
            channels,
            frame_millis,
        }
    }

    /// Samples per channel in one frame
    pub fn samples_per_channel(&self) -> usize {
        (self.sample_rate as u64 * self.frame_millis as u64 / 1000) as usize
    }

    /// Interleaved samples in one frame
    pub fn frame_len(&self) -> usize {
        self.samples_per_channel() * self.channels as usize
    }
}

/// Callback invoked once per frame on the capture thread
pub type FrameCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// A source of continuous fixed-size PCM frames.
///
/// Frames are delivered on the source's own thread; the callback must
/// return quickly and never block on I/O.
pub trait FrameSource: Send {
    fn start(&mut self, format: FrameFormat, on_frame: FrameCallback) -> Result<(), AudioError>;

    /// Halt delivery and join the capture thread. Idempotent.
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Drain stream errors reported since the last call
    fn take_errors(&mut self) -> Vec<AudioError> {
        Vec::new()
    }
}
