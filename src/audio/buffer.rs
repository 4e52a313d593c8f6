//! Buffers between the capture thread and the async side
//!
//! [`ChunkChannel`] is the single hand-off point between the real-time
//! capture callback and the tokio runtime. Pushing never blocks: when the
//! queue is full the newest chunk is dropped and counted.
//!
//! [`FrameAssembler`] re-blocks device callbacks of arbitrary length into
//! fixed-size PCM frames.

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Result of a push into the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Channel was full, chunk discarded
    Dropped,
    /// Channel was closed, chunk discarded
    Closed,
}

/// Result of a timed receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvOutcome {
    Chunk(Bytes),
    Timeout,
    /// Closed and fully drained
    Closed,
}

/// Bounded single-producer/single-consumer queue of encoded chunks
pub struct ChunkChannel {
    queue: ArrayQueue<Bytes>,
    notify: Notify,
    closed: AtomicBool,
    pushed: AtomicU64,
    dropped: AtomicU64,
}

impl ChunkChannel {
    /// Create a new channel holding at most `capacity` chunks
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            pushed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push a chunk without blocking
    pub fn push(&self, chunk: Bytes) -> PushOutcome {
        if self.closed.load(Ordering::Acquire) {
            return PushOutcome::Closed;
        }
        match self.queue.push(chunk) {
            Ok(()) => {
                self.pushed.fetch_add(1, Ordering::Relaxed);
                self.notify.notify_one();
                PushOutcome::Queued
            }
            Err(_) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 100 == 0 {
                    tracing::warn!("Chunk channel full, {} chunks dropped so far", dropped);
                }
                PushOutcome::Dropped
            }
        }
    }

    /// Pop without waiting
    pub fn try_pop(&self) -> Option<Bytes> {
        self.queue.pop()
    }

    /// Wait up to `timeout` for the next chunk.
    ///
    /// Queued chunks are still returned after [`close`](Self::close);
    /// `Closed` is reported once the queue is empty.
    pub async fn recv_timeout(&self, timeout: Duration) -> RecvOutcome {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(chunk) = self.queue.pop() {
                return RecvOutcome::Chunk(chunk);
            }
            if self.closed.load(Ordering::Acquire) {
                // A push may have raced the close flag
                return match self.queue.pop() {
                    Some(chunk) => RecvOutcome::Chunk(chunk),
                    None => RecvOutcome::Closed,
                };
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return match self.queue.pop() {
                    Some(chunk) => RecvOutcome::Chunk(chunk),
                    None => RecvOutcome::Timeout,
                };
            }
        }
    }

    /// Stop accepting chunks and wake the consumer
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Chunks accepted so far
    pub fn pushed_count(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Chunks discarded because the channel was full
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a chunk channel
pub type SharedChunkChannel = Arc<ChunkChannel>;

/// Create a new shared chunk channel
pub fn create_chunk_channel(capacity: usize) -> SharedChunkChannel {
    Arc::new(ChunkChannel::new(capacity))
}

/// Accumulates interleaved samples and yields fixed-size frames
pub struct FrameAssembler {
    frame_len: usize,
    pending: Vec<f32>,
}

impl FrameAssembler {
    /// `frame_len` is the total interleaved sample count per frame
    pub fn new(frame_len: usize) -> Self {
        Self {
            frame_len: frame_len.max(1),
            pending: Vec::with_capacity(frame_len.max(1) * 2),
        }
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Append samples and call `on_frame` for every complete frame
    pub fn push<F>(&mut self, samples: &[f32], mut on_frame: F)
    where
        F: FnMut(&[f32]),
    {
        self.pending.extend_from_slice(samples);
        let complete = self.pending.len() / self.frame_len * self.frame_len;
        if complete == 0 {
            return;
        }
        for frame in self.pending[..complete].chunks_exact(self.frame_len) {
            on_frame(frame);
        }
        self.pending.drain(..complete);
    }

    /// Samples waiting for a full frame
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
