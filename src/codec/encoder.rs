//! MP3 encoder wrapper
//!
//! Wraps LAME for streaming use: every call to [`Mp3Encoder::encode`] may
//! return an empty chunk while LAME buffers internally, and
//! [`Mp3Encoder::flush`] consumes the encoder so the trailer is emitted
//! exactly once.

use bytes::Bytes;
use mp3lame_encoder::{Bitrate, Builder, FlushNoGap, InterleavedPcm, MonoPcm, Quality};

use crate::error::CodecError;

/// Largest trailer LAME emits on flush
const MAX_FLUSH_SIZE: usize = 7200;

/// Streaming MP3 encoder with fixed format
pub struct Mp3Encoder {
    encoder: mp3lame_encoder::Encoder,
    sample_rate: u32,
    channels: u16,
    bitrate_kbps: u32,
    /// Conversion buffer (reused to avoid allocations)
    pcm: Vec<i16>,
    /// Frame counter for statistics
    frames_encoded: u64,
    /// Total bytes produced
    bytes_produced: u64,
}

impl Mp3Encoder {
    /// Create a new encoder. Sample rate, channel count and bitrate are
    /// fixed for the lifetime of the instance.
    pub fn new(sample_rate: u32, channels: u16, bitrate_kbps: u32) -> Result<Self, CodecError> {
        if !matches!(channels, 1 | 2) {
            return Err(CodecError::EncoderInit(format!(
                "Unsupported channel count: {}",
                channels
            )));
        }

        let mut builder = Builder::new()
            .ok_or_else(|| CodecError::EncoderInit("Failed to create LAME encoder".to_string()))?;
        builder
            .set_num_channels(channels as u8)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set channels: {:?}", e)))?;
        builder
            .set_sample_rate(sample_rate)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set sample rate: {:?}", e)))?;
        builder
            .set_brate(nearest_bitrate(bitrate_kbps))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {:?}", e)))?;
        builder
            .set_quality(Quality::Best)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set quality: {:?}", e)))?;

        let encoder = builder
            .build()
            .map_err(|e| CodecError::EncoderInit(format!("Failed to build encoder: {:?}", e)))?;

        Ok(Self {
            encoder,
            sample_rate,
            channels,
            bitrate_kbps,
            pcm: Vec::new(),
            frames_encoded: 0,
            bytes_produced: 0,
        })
    }

    /// Encode interleaved f32 samples. The result may be empty.
    pub fn encode(&mut self, samples: &[f32]) -> Result<Bytes, CodecError> {
        if samples.len() % self.channels as usize != 0 {
            return Err(CodecError::EncodingFailed(format!(
                "{} samples is not a whole number of {}-channel frames",
                samples.len(),
                self.channels
            )));
        }

        self.pcm.clear();
        self.pcm
            .extend(samples.iter().map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16));

        // LAME recommendation: 1.25 * num_samples + 7200 bytes.
        let per_channel = samples.len() / self.channels as usize;
        let estimated_size = (per_channel as f64 * 1.25 + 7200.0) as usize;
        let mut mp3_buffer: Vec<u8> = Vec::with_capacity(estimated_size);

        let written = if self.channels == 1 {
            self.encoder
                .encode_to_vec(MonoPcm(self.pcm.as_slice()), &mut mp3_buffer)
        } else {
            self.encoder
                .encode_to_vec(InterleavedPcm(self.pcm.as_slice()), &mut mp3_buffer)
        }
        .map_err(|e| CodecError::EncodingFailed(format!("{:?}", e)))?;

        self.frames_encoded += 1;
        self.bytes_produced += written as u64;
        Ok(Bytes::from(mp3_buffer))
    }

    /// Emit the final frames. Consumes the encoder.
    pub fn flush(mut self) -> Result<Bytes, CodecError> {
        let mut flush_buffer: Vec<u8> = Vec::with_capacity(MAX_FLUSH_SIZE);
        let written = self
            .encoder
            .flush_to_vec::<FlushNoGap>(&mut flush_buffer)
            .map_err(|e| CodecError::FlushFailed(format!("{:?}", e)))?;

        self.bytes_produced += written as u64;
        tracing::debug!(
            "Encoder flushed {} bytes after {} frames ({} bytes total)",
            written,
            self.frames_encoded,
            self.bytes_produced
        );
        Ok(Bytes::from(flush_buffer))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn bitrate_kbps(&self) -> u32 {
        self.bitrate_kbps
    }

    /// Get statistics
    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
        }
    }
}

/// Map requested bitrate to nearest supported value
fn nearest_bitrate(kbps: u32) -> Bitrate {
    match kbps {
        0..=64 => Bitrate::Kbps64,
        65..=96 => Bitrate::Kbps96,
        97..=128 => Bitrate::Kbps128,
        129..=192 => Bitrate::Kbps192,
        193..=256 => Bitrate::Kbps256,
        _ => Bitrate::Kbps320,
    }
}

/// Encoder statistics
#[derive(Debug, Clone, Copy)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_surround() {
        assert!(Mp3Encoder::new(44_100, 6, 128).is_err());
    }

    #[test]
    fn test_encode_then_flush_produces_mp3() {
        let mut encoder = Mp3Encoder::new(44_100, 2, 128).unwrap();
        let frame = vec![0.0f32; 882 * 2];

        let mut output = Vec::new();
        for _ in 0..50 {
            output.extend_from_slice(&encoder.encode(&frame).unwrap());
        }
        assert_eq!(encoder.stats().frames_encoded, 50);
        output.extend_from_slice(&encoder.flush().unwrap());

        // One second of audio at 128 kbps is roughly 16 KB
        assert!(output.len() > 4_000);
        // MPEG audio frame sync
        let synced = output.windows(2).any(|w| w[0] == 0xFF && (w[1] & 0xE0) == 0xE0);
        assert!(synced);
    }

    #[test]
    fn test_encoder_moves_to_capture_thread() {
        fn assert_send<T: Send>() {}
        assert_send::<Mp3Encoder>();

        let mut encoder = Mp3Encoder::new(22_050, 1, 64).unwrap();
        let produced = std::thread::spawn(move || {
            let frame = vec![0.25f32; 441];
            let mut total = 0;
            for _ in 0..40 {
                total += encoder.encode(&frame).unwrap().len();
            }
            total + encoder.flush().unwrap().len()
        })
        .join()
        .unwrap();
        assert!(produced > 0);
    }

    #[test]
    fn test_partial_frame_rejected() {
        let mut encoder = Mp3Encoder::new(44_100, 2, 128).unwrap();
        assert!(encoder.encode(&[0.0; 3]).is_err());
    }
}
