//! Encode-and-enqueue step run inside the capture callback

use parking_lot::Mutex;
use std::sync::Arc;

use crate::audio::buffer::{PushOutcome, SharedChunkChannel};
use crate::audio::FrameCallback;
use crate::codec::encoder::Mp3Encoder;

/// Owns the encoder while a session is live and feeds the chunk channel
pub struct EncodePipeline {
    encoder: Mp3Encoder,
    channel: SharedChunkChannel,
    encode_errors: u64,
}

impl EncodePipeline {
    pub fn new(encoder: Mp3Encoder, channel: SharedChunkChannel) -> Self {
        Self {
            encoder,
            channel,
            encode_errors: 0,
        }
    }

    /// Encode one PCM frame and push the result. Never blocks.
    pub fn handle_frame(&mut self, pcm: &[f32]) {
        match self.encoder.encode(pcm) {
            Ok(chunk) if !chunk.is_empty() => {
                self.channel.push(chunk);
            }
            Ok(_) => {}
            Err(e) => {
                self.encode_errors += 1;
                if self.encode_errors == 1 || self.encode_errors % 100 == 0 {
                    tracing::warn!("Encoding failed ({} so far): {}", self.encode_errors, e);
                }
            }
        }
    }

    /// Flush the encoder and push the trailer, best effort
    pub fn finish(self) -> PushOutcome {
        match self.encoder.flush() {
            Ok(trailer) if !trailer.is_empty() => self.channel.push(trailer),
            Ok(_) => PushOutcome::Queued,
            Err(e) => {
                tracing::warn!("Encoder flush failed: {}", e);
                PushOutcome::Dropped
            }
        }
    }

    pub fn encode_errors(&self) -> u64 {
        self.encode_errors
    }
}

/// Pipeline slot shared between the capture callback and the session.
///
/// The callback only touches it while capture runs; the session takes it
/// out after capture has stopped to flush.
pub type SharedPipeline = Arc<Mutex<Option<EncodePipeline>>>;

pub fn shared_pipeline(pipeline: EncodePipeline) -> SharedPipeline {
    Arc::new(Mutex::new(Some(pipeline)))
}

/// Frame callback that drives a shared pipeline
pub fn frame_callback(pipeline: SharedPipeline) -> FrameCallback {
    Box::new(move |frame: &[f32]| {
        if let Some(pipeline) = pipeline.lock().as_mut() {
            pipeline.handle_frame(frame);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::create_chunk_channel;

    #[test]
    fn test_pipeline_feeds_channel_and_flushes_once() {
        let channel = create_chunk_channel(1000);
        let encoder = Mp3Encoder::new(44_100, 1, 64).unwrap();
        let shared = shared_pipeline(EncodePipeline::new(encoder, channel.clone()));

        let mut callback = frame_callback(shared.clone());
        let frame = vec![0.1f32; 882];
        for _ in 0..40 {
            callback(&frame);
        }
        let before_flush = channel.pushed_count();
        assert!(before_flush > 0);

        let pipeline = shared.lock().take().unwrap();
        assert_eq!(pipeline.encode_errors(), 0);
        pipeline.finish();
        assert!(channel.pushed_count() >= before_flush);

        // Callback is inert once the pipeline has been taken
        callback(&frame);
        assert!(shared.lock().is_none());
    }
}
