//! Mic Ingest: appends inbound PCM payloads into a bounded rolling buffer
//! keyed by a monotonic absolute sample index.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::error::{Result, VoxError};
use crate::event::Event;
use crate::segmenter::{Segmenter, SegmenterConfig, SegmenterEvent};

/// Samples of look-back the rolling buffer must keep available behind the
/// live write position, covering the segmenter's pre-roll plus a margin for
/// the longest plausible utterance. Sized generously so ordinary operation
/// never reports `BufferPressure`; sustained pressure past this window is
/// the fatal condition the contract calls out.
pub const RETENTION_SECONDS: u64 = 30;

/// A bounded FIFO of 16-bit mono PCM samples, indexed by an absolute sample
/// count since session start (never wraps, never resets).
pub struct RollingBuffer {
    samples: std::collections::VecDeque<i16>,
    /// Absolute index of `samples[0]`.
    base_index: u64,
    /// Absolute index one past the last sample appended.
    end_index: u64,
    capacity: usize,
}

impl RollingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: std::collections::VecDeque::with_capacity(capacity),
            base_index: 0,
            end_index: 0,
            capacity,
        }
    }

    pub fn highest_index(&self) -> u64 {
        self.end_index
    }

    pub fn base_index(&self) -> u64 {
        self.base_index
    }

    /// Append one inbound audio frame's PCM payload. `payload` must have an
    /// even length (16-bit samples); odd lengths are a framing error.
    /// `evict_floor` is the lowest absolute index any live segment or the
    /// segmenter's look-back window still needs; samples below it may be
    /// dropped to respect capacity.
    pub fn push_frame(&mut self, payload: &[u8], evict_floor: u64) -> Result<()> {
        if payload.len() % 2 != 0 {
            return Err(VoxError::FramingError {
                discarded: payload.len(),
            });
        }
        for chunk in payload.chunks_exact(2) {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            self.samples.push_back(sample);
            self.end_index += 1;
        }
        self.evict(evict_floor)
    }

    fn evict(&mut self, evict_floor: u64) -> Result<()> {
        while self.samples.len() > self.capacity {
            if self.base_index >= evict_floor {
                // Evicting further would touch samples still in use; grow
                // transiently instead of corrupting a live segment.
                let overrun = self.samples.len() - self.capacity;
                return Err(VoxError::BufferPressure { overrun });
            }
            self.samples.pop_front();
            self.base_index += 1;
        }
        Ok(())
    }

    /// Borrow the PCM slice `[start, end)` as a contiguous `Vec<i16>`.
    /// Panics if the range has been evicted or exceeds `highest_index()`;
    /// callers must only call this for segments frozen under the
    /// controller's invariants.
    pub fn slice(&self, start: u64, end: u64) -> Vec<i16> {
        assert!(start >= self.base_index, "slice start already evicted");
        assert!(end <= self.end_index, "slice end beyond ingested samples");
        assert!(end > start, "slice must be non-empty");
        let offset = (start - self.base_index) as usize;
        let len = (end - start) as usize;
        self.samples.iter().skip(offset).take(len).copied().collect()
    }

    pub fn mean_abs(&self, start: u64, end: u64) -> f64 {
        let slice = self.slice(start, end);
        if slice.is_empty() {
            return 0.0;
        }
        let sum: f64 = slice.iter().map(|s| (*s as f64).abs()).sum();
        sum / slice.len() as f64
    }
}

/// Drives the rolling buffer and segmenter off the serial reader's cadence:
/// one inbound audio payload in, zero or more `SegmentStart`/`SegmentEnd`
/// events out. Strictly downstream of the reader; never blocks it, since
/// `frames` is an unbounded channel and this task's own work is
/// CPU-only (no collaborator I/O).
pub async fn run_mic_ingest(
    buffer: Arc<Mutex<RollingBuffer>>,
    segmenter_config: SegmenterConfig,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::UnboundedSender<Event>,
) {
    let mut segmenter = Segmenter::new(segmenter_config);
    let sample_rate = crate::segmenter::SAMPLE_RATE_HZ as u64;
    let retention_samples = RETENTION_SECONDS * sample_rate;

    while let Some(payload) = frames.recv().await {
        let poll_events = {
            let mut buf = buffer.lock().await;
            let floor = buf.highest_index().saturating_sub(retention_samples);
            match buf.push_frame(&payload, floor) {
                Ok(()) => {}
                Err(VoxError::BufferPressure { overrun }) => {
                    tracing::warn!(overrun, "buffer pressure: sustained inability to evict");
                }
                Err(VoxError::FramingError { discarded }) => {
                    tracing::warn!(discarded, "framing error: odd-length audio payload");
                    continue;
                }
                Err(e) => {
                    tracing::error!(error = %e, "unexpected mic ingest error");
                    continue;
                }
            }
            segmenter.poll(&buf)
        };

        for ev in poll_events {
            let mapped = match ev {
                SegmenterEvent::SegmentStart { start_index } => Event::SegmentStart { start_index },
                SegmenterEvent::SegmentEnd(segment) => Event::SegmentEnd(segment),
            };
            if events.send(mapped).is_err() {
                return;
            }
        }
    }

    // The frames channel closed (serial reader shut down). Flush whatever
    // segment was still waiting out its merge window so a trailing
    // utterance at shutdown isn't silently dropped.
    if let Some(SegmenterEvent::SegmentEnd(segment)) = segmenter.flush_pending() {
        let _ = events.send(Event::SegmentEnd(segment));
    }
}
