//! Generated frame source
//!
//! Produces silence or a sine tone paced in real time on its own thread.
//! Used when no microphone is wanted (tests, `caster live --tone`).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::{FrameCallback, FrameFormat, FrameSource};
use crate::error::AudioError;

/// What the synthetic source generates
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    Silence,
    Tone { frequency: f32, amplitude: f32 },
}

pub struct SyntheticSource {
    signal: Signal,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    frames_delivered: Arc<AtomicU64>,
}

impl SyntheticSource {
    pub fn new(signal: Signal) -> Self {
        Self {
            signal,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            frames_delivered: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn silence() -> Self {
        Self::new(Signal::Silence)
    }

    pub fn tone(frequency: f32) -> Self {
        Self::new(Signal::Tone {
            frequency,
            amplitude: 0.3,
        })
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::Relaxed)
    }

    /// Shared counter, readable after the source has been moved
    pub fn frame_counter(&self) -> Arc<AtomicU64> {
        self.frames_delivered.clone()
    }
}

impl FrameSource for SyntheticSource {
    fn start(&mut self, format: FrameFormat, mut on_frame: FrameCallback) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        if format.frame_len() == 0 {
            return Err(AudioError::UnsupportedFormat(format!("{:?}", format)));
        }
        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let frames = self.frames_delivered.clone();
        let signal = self.signal;
        let frame_period = Duration::from_millis(format.frame_millis as u64);

        let handle = thread::Builder::new()
            .name("synthetic-capture".to_string())
            .spawn(move || {
                let channels = format.channels as usize;
                let mut buffer = vec![0.0f32; format.frame_len()];
                let mut phase = 0.0f32;
                let mut next_deadline = Instant::now();

                while running.load(Ordering::Relaxed) {
                    if let Signal::Tone { frequency, amplitude } = signal {
                        let step = std::f32::consts::TAU * frequency / format.sample_rate as f32;
                        for frame in buffer.chunks_exact_mut(channels) {
                            let value = phase.sin() * amplitude;
                            frame.iter_mut().for_each(|s| *s = value);
                            phase = (phase + step) % std::f32::consts::TAU;
                        }
                    }
                    on_frame(&buffer);
                    frames.fetch_add(1, Ordering::Relaxed);

                    next_deadline += frame_period;
                    let now = Instant::now();
                    if next_deadline > now {
                        thread::sleep(next_deadline - now);
                    } else {
                        next_deadline = now;
                    }
                }
            })
            .map_err(|e| AudioError::CaptureDeviceUnavailable(e.to_string()))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.stop();
    }
}
