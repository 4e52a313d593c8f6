//! Audio capture from an input device
//!
//! The cpal stream is built and kept alive on a dedicated thread, since the
//! stream handle cannot move between threads on every platform. Device
//! callbacks are re-blocked into fixed-size frames before they reach the
//! frame callback.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::FrameAssembler;
use crate::audio::device::find_input_device;
use crate::audio::{FrameCallback, FrameFormat, FrameSource};
use crate::error::AudioError;

/// How long `start` waits for the capture thread to open the device
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Microphone-backed frame source
pub struct AudioFrameSource {
    /// Input device name, default input when `None`
    device_name: Option<String>,

    /// Whether capture is running
    running: Arc<AtomicBool>,

    /// Stream thread handle
    thread_handle: Option<JoinHandle<()>>,

    /// Channel for stream errors reported after start
    error_rx: Option<Receiver<AudioError>>,

    /// Frames handed to the callback
    frames_delivered: Arc<AtomicU64>,
}

impl AudioFrameSource {
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            error_rx: None,
            frames_delivered: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Get total frames delivered since the last start
    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::Relaxed)
    }

}

impl FrameSource for AudioFrameSource {
    fn start(&mut self, format: FrameFormat, mut on_frame: FrameCallback) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        self.error_rx = Some(error_rx);
        self.frames_delivered.store(0, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let device_name = self.device_name.clone();
        let frames = self.frames_delivered.clone();
        let counted: FrameCallback = Box::new(move |frame: &[f32]| {
            frames.fetch_add(1, Ordering::Relaxed);
            on_frame(frame);
        });

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let stream = match open_stream(device_name.as_deref(), format, running.clone(), counted, error_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        running.store(false, Ordering::SeqCst);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Keep thread alive while running
                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }

                // Stream is dropped here, stopping capture
                drop(stream);
            })
            .map_err(|e| AudioError::CaptureDeviceUnavailable(e.to_string()))?;
        self.thread_handle = Some(handle);

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => {
                tracing::info!(
                    "Capture started: {}Hz, {} channels, {}ms frames",
                    format.sample_rate,
                    format.channels,
                    format.frame_millis
                );
                Ok(())
            }
            Ok(Err(e)) => {
                self.stop();
                Err(e)
            }
            Err(_) => {
                self.stop();
                Err(AudioError::CaptureDeviceUnavailable(
                    "timed out opening input device".to_string(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::debug!("Capture thread joined");
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn take_errors(&mut self) -> Vec<AudioError> {
        match &self.error_rx {
            Some(rx) => rx.try_iter().collect(),
            None => Vec::new(),
        }
    }
}

impl Drop for AudioFrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open and start the input stream; runs on the capture thread
fn open_stream(
    device_name: Option<&str>,
    format: FrameFormat,
    running: Arc<AtomicBool>,
    on_frame: FrameCallback,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError> {
    let device = find_input_device(device_name)?;
    let sample_format = device
        .default_input_config()
        .map_err(|e| AudioError::CaptureDeviceUnavailable(e.to_string()))?
        .sample_format();

    let config = StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let frame_len = format.frame_len();

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, frame_len, running, on_frame, error_tx),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, frame_len, running, on_frame, error_tx),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, frame_len, running, on_frame, error_tx),
        other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    }?;

    stream
        .play()
        .map_err(|e| AudioError::CaptureDeviceUnavailable(e.to_string()))?;
    Ok(stream)
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    frame_len: usize,
    running: Arc<AtomicBool>,
    mut on_frame: FrameCallback,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut assembler = FrameAssembler::new(frame_len);
    let mut scratch: Vec<f32> = Vec::with_capacity(frame_len);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                scratch.clear();
                scratch.extend(data.iter().map(|&s| f32::from_sample(s)));
                assembler.push(&scratch, |frame| on_frame(frame));
            },
            move |err| {
                tracing::warn!("Input stream error: {}", err);
                let _ = error_tx.try_send(AudioError::CaptureDeviceUnavailable(err.to_string()));
            },
            None,
        )
        .map_err(|e| AudioError::CaptureDeviceUnavailable(e.to_string()))
}
